/// Multilingual name table: locale code → name, with "default" holding the
/// untranslated name. Kept as a sorted vector; tables are tiny.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTable {
    names: Vec<(String, String)>,
}

pub const DEFAULT_LOCALE: &str = "default";

impl NameTable {
    pub fn new() -> NameTable {
        NameTable::default()
    }

    pub fn with_default(name: impl Into<String>) -> NameTable {
        let mut table = NameTable::new();
        table.set(DEFAULT_LOCALE, name);
        table
    }

    pub fn set(&mut self, locale: impl Into<String>, name: impl Into<String>) {
        let locale = locale.into();
        let name = name.into();
        if name.is_empty() {
            return;
        }
        match self.names.binary_search_by(|(l, _)| l.as_str().cmp(&locale)) {
            Ok(i) => self.names[i].1 = name,
            Err(i) => self.names.insert(i, (locale, name)),
        }
    }

    pub fn get(&self, locale: &str) -> Option<&str> {
        self.names
            .binary_search_by(|(l, _)| l.as_str().cmp(locale))
            .ok()
            .map(|i| self.names[i].1.as_str())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.get(DEFAULT_LOCALE)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(l, n)| (l.as_str(), n.as_str()))
    }

    /// Fills locales missing here from `other`; existing entries win.
    pub fn merge_missing_from(&mut self, other: &NameTable) {
        for (locale, name) in other.iter() {
            if self.get(locale).is_none() {
                self.set(locale, name);
            }
        }
    }

    /// Extracts a table from OSM tags: `name` plus every `name:<locale>`.
    pub fn from_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> NameTable {
        let mut table = NameTable::new();
        for (key, value) in tags {
            if key == "name" {
                table.set(DEFAULT_LOCALE, value);
            } else if let Some(locale) = key.strip_prefix("name:") {
                if !locale.is_empty() {
                    table.set(locale, value);
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_localized_names() {
        let tags = [
            ("name", "Москва"),
            ("name:en", "Moscow"),
            ("highway", "residential"),
        ];
        let table = NameTable::from_tags(tags.into_iter());
        assert_eq!(table.default_name(), Some("Москва"));
        assert_eq!(table.get("en"), Some("Moscow"));
        assert_eq!(table.get("de"), None);
    }

    #[test]
    fn merge_keeps_existing() {
        let mut first = NameTable::with_default("Arbat Street");
        let mut second = NameTable::with_default("Арбат");
        second.set("en", "Arbat");
        first.merge_missing_from(&second);
        assert_eq!(first.default_name(), Some("Arbat Street"));
        assert_eq!(first.get("en"), Some("Arbat"));
    }
}
