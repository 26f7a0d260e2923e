use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Search normalization: NFD-decompose, drop combining marks, lowercase and
/// split on anything that is not alphanumeric. "Ciego de Ávila" becomes
/// ["ciego", "de", "avila"].
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.nfd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Tokens joined with single spaces; the canonical dictionary form of a
/// name.
pub fn normalize(text: &str) -> String {
    tokenize(text).join(" ")
}

pub fn is_ascii_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_lowercases() {
        assert_eq!(tokenize("Ciego de Ávila"), vec!["ciego", "de", "avila"]);
        assert_eq!(normalize("Ciego de Ávila"), "ciego de avila");
    }

    #[test]
    fn keeps_cyrillic() {
        assert_eq!(tokenize("улица Новый Арбат"), vec!["улица", "новый", "арбат"]);
        assert_eq!(tokenize("Зорге"), vec!["зорге"]);
    }

    #[test]
    fn splits_on_punctuation() {
        assert_eq!(tokenize("Москва, Зорге 7к2"), vec!["москва", "зорге", "7к2"]);
        assert_eq!(tokenize("ул. Ленина"), vec!["ул", "ленина"]);
    }

    #[test]
    fn numeric_check() {
        assert!(is_ascii_numeric("1905"));
        assert!(!is_ascii_numeric("7к2"));
        assert!(!is_ascii_numeric(""));
    }
}
