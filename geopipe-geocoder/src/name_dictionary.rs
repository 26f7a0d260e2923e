use std::collections::HashMap;

/// A main (default-locale) normalized name plus sorted-unique alternative
/// names across other locales.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MultipleNames {
    names: Vec<String>,
}

impl MultipleNames {
    pub fn new(main_name: String) -> MultipleNames {
        MultipleNames { names: vec![main_name] }
    }

    pub fn main_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    pub fn set_main_name(&mut self, name: String) {
        if self.names.is_empty() {
            self.names.push(name);
        } else {
            self.names[0] = name;
        }
    }

    pub fn add_alt_name(&mut self, name: String) {
        if self.names.is_empty() {
            self.names.push(String::new());
        }
        match self.names[1..].binary_search(&name) {
            Ok(_) => {}
            Err(i) => self.names.insert(i + 1, name),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Positions ≥ 1 reference dictionary entries; 0 means unspecified.
pub type Position = u32;

pub const UNSPECIFIED_POSITION: Position = 0;

/// Append-only store of de-duplicated multilingual names. Shared immutably
/// by the hierarchy and every reader after load.
#[derive(Debug, Default)]
pub struct NameDictionary {
    stock: Vec<MultipleNames>,
}

impl NameDictionary {
    pub fn get(&self, position: Position) -> &MultipleNames {
        debug_assert_ne!(position, UNSPECIFIED_POSITION);
        &self.stock[position as usize - 1]
    }

    pub fn add(&mut self, names: MultipleNames) -> Position {
        self.stock.push(names);
        self.stock.len() as Position
    }

    pub fn len(&self) -> usize {
        self.stock.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stock.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MultipleNames> {
        self.stock.iter()
    }
}

/// Deduplicating builder over `NameDictionary` with a hash side-table.
#[derive(Default)]
pub struct NameDictionaryBuilder {
    dictionary: NameDictionary,
    index: HashMap<MultipleNames, Position>,
}

impl NameDictionaryBuilder {
    pub fn add(&mut self, names: MultipleNames) -> Position {
        if let Some(&position) = self.index.get(&names) {
            return position;
        }
        let position = self.dictionary.add(names.clone());
        self.index.insert(names, position);
        position
    }

    pub fn release(self) -> NameDictionary {
        self.dictionary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_names_stay_sorted_unique() {
        let mut names = MultipleNames::new("москва".into());
        names.add_alt_name("moscow".into());
        names.add_alt_name("moskau".into());
        names.add_alt_name("moscow".into());
        assert_eq!(names.main_name(), "москва");
        assert_eq!(names.names(), &["москва", "moscow", "moskau"]);
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = NameDictionaryBuilder::default();
        let a = builder.add(MultipleNames::new("cuba".into()));
        let b = builder.add(MultipleNames::new("florencia".into()));
        let c = builder.add(MultipleNames::new("cuba".into()));
        assert_eq!(a, c);
        assert_ne!(a, b);

        let dictionary = builder.release();
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.get(a).main_name(), "cuba");
    }

    #[test]
    fn position_zero_is_reserved() {
        let mut dictionary = NameDictionary::default();
        let position = dictionary.add(MultipleNames::new("x".into()));
        assert_eq!(position, 1);
    }
}
