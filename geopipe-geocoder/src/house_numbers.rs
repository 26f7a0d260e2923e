use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Splits a house number into digit and letter runs: "7к2" and "7 к2" both
/// become ["7", "к", "2"], so spelling variants compare equal.
pub fn house_number_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_is_digit = false;

    for ch in text.nfd() {
        if is_combining_mark(ch) {
            continue;
        }
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        let is_digit = ch.is_ascii_digit();
        if !current.is_empty() && is_digit != current_is_digit {
            tokens.push(std::mem::take(&mut current));
        }
        current_is_digit = is_digit;
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Whether a subquery could denote a house number: it must start with a
/// short number and stay short overall.
pub fn looks_like_house_number(text: &str) -> bool {
    let tokens = house_number_tokens(text);
    let Some(first) = tokens.first() else {
        return false;
    };
    first.bytes().all(|b| b.is_ascii_digit()) && first.len() <= 6 && tokens.len() <= 8
}

/// Fuzzy comparison of two tokenized house numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub matched_tokens_count: usize,
    pub query_mismatched_tokens_count: usize,
    pub house_number_mismatched_tokens_count: usize,
}

impl MatchResult {
    pub fn is_exact(&self) -> bool {
        self.matched_tokens_count > 0
            && self.query_mismatched_tokens_count == 0
            && self.house_number_mismatched_tokens_count == 0
    }

    /// The candidate extends the query ("7 к2 с3" for "7 к2") or the query
    /// extends the candidate ("7 к2" for "7"); two-sided mismatches are not
    /// considered matches at all.
    pub fn is_one_sided(&self) -> bool {
        self.matched_tokens_count > 0
            && (self.query_mismatched_tokens_count == 0
                || self.house_number_mismatched_tokens_count == 0)
    }
}

/// Multiset token comparison between the query side and the candidate house
/// number.
pub fn match_house_numbers(query_tokens: &[String], house_tokens: &[String]) -> MatchResult {
    let mut remaining: Vec<&String> = house_tokens.iter().collect();
    let mut matched = 0usize;
    for token in query_tokens {
        if let Some(i) = remaining.iter().position(|t| *t == token) {
            remaining.swap_remove(i);
            matched += 1;
        }
    }
    MatchResult {
        matched_tokens_count: matched,
        query_mismatched_tokens_count: query_tokens.len() - matched,
        house_number_mismatched_tokens_count: house_tokens.len() - matched,
    }
}
