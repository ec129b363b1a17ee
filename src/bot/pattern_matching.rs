use log::debug;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Max separator characters tolerated between letters of a restricted term
pub const MAX_TERM_GAP: usize = 2;
/// Characters of context kept on each side of a restricted-term hit
pub const CONTEXT_RADIUS: usize = 95;

/// Check if character is a combining mark (diacritic)
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Cyrillic and Greek lookalikes of latin letters (lowercase only, input is lowercased first)
fn fold_homoglyph(c: char) -> char {
    match c {
        'а' | 'α' => 'a',
        'в' | 'β' => 'b',
        'с' | 'ϲ' => 'c',
        'е' | 'ε' => 'e',
        'һ' => 'h',
        'і' | 'ι' | 'ї' => 'i',
        'ј' => 'j',
        'к' | 'κ' => 'k',
        'м' => 'm',
        'п' | 'η' => 'n',
        'о' | 'ο' | 'σ' => 'o',
        'р' | 'ρ' => 'p',
        'ѕ' => 's',
        'т' | 'τ' => 't',
        'υ' | 'μ' => 'u',
        'ν' => 'v',
        'ш' | 'ω' => 'w',
        'х' | 'χ' => 'x',
        'у' | 'γ' => 'y',
        _ => c,
    }
}

/// Digits that read as letters
fn fold_leet_digit(c: char) -> char {
    match c {
        '0' => 'o',
        '1' => 'i',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '6' | '9' => 'g',
        '7' => 't',
        '8' => 'b',
        _ => c,
    }
}

/// Symbols that read as letters, only folded when sandwiched between alphanumerics
fn fold_leet_symbol(c: char) -> Option<char> {
    match c {
        '@' => Some('a'),
        '$' => Some('s'),
        '!' => Some('i'),
        '+' => Some('t'),
        '|' => Some('l'),
        '(' => Some('c'),
        '€' => Some('e'),
        _ => None,
    }
}

/// Strip compatibility forms and diacritics from one char, then lowercase it
fn base_char(c: char) -> Option<char> {
    let base = std::iter::once(c).nfkd().find(|d| !is_combining_mark(*d))?;
    base.to_lowercase().next()
}

/// Fold every char of `text` to its canonical look-alike, one output char per input char
///
/// Combining marks fold to a space so positions stay aligned with the input.
fn fold_chars(text: &str) -> Vec<char> {
    let bases: Vec<Option<char>> = text.chars().map(base_char).collect();

    (0..bases.len())
        .map(|i| {
            let Some(c) = bases[i] else { return ' ' };
            let c = fold_homoglyph(c);
            if c.is_ascii_digit() {
                return fold_leet_digit(c);
            }
            if let Some(letter) = fold_leet_symbol(c) {
                let before = i > 0 && bases[i - 1].map_or(false, |p| p.is_alphanumeric());
                let after = bases.get(i + 1).copied().flatten().map_or(false, |n| n.is_alphanumeric());
                if before && after {
                    return letter;
                }
            }
            c
        })
        .collect()
}

/// Canonical form used by toxicity scanning: folded look-alikes, runs collapsed,
/// non-alphanumerics collapsed to single spaces
pub fn normalize(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev: Option<char> = None;

    for c in fold_chars(text) {
        let c = if c.is_alphanumeric() { c } else { ' ' };
        if prev == Some(c) {
            continue;
        }
        if c == ' ' && prev.is_none() {
            continue;
        }
        result.push(c);
        prev = Some(c);
    }

    result.trim_end().to_string()
}

/// Result of scanning one message for restricted terms
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestrictedMatch {
    /// Matched terms in configuration order
    pub terms: Vec<String>,
    /// Some term only matched once look-alikes or separators were folded away
    pub evasion: bool,
    /// Snippet of the original text around the first hit
    pub context: String,
}

impl RestrictedMatch {
    pub fn is_match(&self) -> bool {
        !self.terms.is_empty()
    }
}

struct CompiledTerm {
    term: String,
    strict: Regex,
    tolerant: Regex,
}

/// Strict and gap-tolerant matcher for banned terms
pub struct RestrictedTermMatcher {
    terms: Vec<CompiledTerm>,
}

impl RestrictedTermMatcher {
    pub fn new(terms: &[String]) -> Self {
        let compiled = terms
            .iter()
            .filter_map(|term| {
                let letters: Vec<char> = fold_chars(term).into_iter().filter(|c| c.is_alphanumeric()).collect();
                if letters.is_empty() {
                    return None;
                }

                let strict = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term.trim()))).ok()?;
                let gap = format!("[^\\p{{L}}\\p{{N}}]{{0,{}}}", MAX_TERM_GAP);
                let body = letters
                    .iter()
                    .map(|c| format!("{}+", regex::escape(&c.to_string())))
                    .collect::<Vec<_>>()
                    .join(&gap);
                let tolerant = Regex::new(&format!(r"(?:^|[^\p{{L}}\p{{N}}]){}(?:$|[^\p{{L}}\p{{N}}])", body)).ok()?;

                Some(CompiledTerm { term: term.clone(), strict, tolerant })
            })
            .collect();

        Self { terms: compiled }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn find(&self, text: &str) -> RestrictedMatch {
        let folded: Vec<char> = fold_chars(text);
        let folded_text: String = folded.iter().collect();
        let mut result = RestrictedMatch::default();
        let mut first_hit: Option<(usize, usize)> = None;

        for compiled in &self.terms {
            if let Some(hit) = compiled.strict.find(text) {
                let start = text[..hit.start()].chars().count();
                let len = hit.as_str().chars().count();
                first_hit = Some(earliest(first_hit, (start, start + len)));
                result.terms.push(compiled.term.clone());
                continue;
            }

            if let Some(hit) = compiled.tolerant.find(&folded_text) {
                let start = folded_text[..hit.start()].chars().count();
                let len = hit.as_str().chars().count();
                first_hit = Some(earliest(first_hit, (start, start + len)));
                result.terms.push(compiled.term.clone());
                result.evasion = true;
                debug!("Restricted term '{}' matched through evasion folding", compiled.term);
            }
        }

        if let Some((start, end)) = first_hit {
            result.context = context_snippet(text, start, end);
        }
        result
    }
}

fn earliest(current: Option<(usize, usize)>, candidate: (usize, usize)) -> (usize, usize) {
    match current {
        Some(existing) if existing.0 <= candidate.0 => existing,
        _ => candidate,
    }
}

/// Up to `CONTEXT_RADIUS` chars each side of `[start, end)`, ellipsised when cut
pub fn context_snippet(text: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let from = start.saturating_sub(CONTEXT_RADIUS);
    let to = (end + CONTEXT_RADIUS).min(chars.len());

    let mut snippet = String::new();
    if from > 0 {
        snippet.push_str("...");
    }
    snippet.extend(&chars[from..to]);
    if to < chars.len() {
        snippet.push_str("...");
    }
    snippet.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(terms: &[&str]) -> RestrictedTermMatcher {
        RestrictedTermMatcher::new(&terms.iter().map(|t| t.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_leetspeak_normalization() {
        assert_eq!(normalize("b4dw0rd"), "badword");
        assert_eq!(normalize("b@dw0rd"), "badword");
        assert_eq!(normalize("you suck!"), "you suck");
    }

    #[test]
    fn test_unicode_normalization() {
        assert_eq!(normalize("cafÉ"), "cafe");
        assert_eq!(normalize("CAFE"), "cafe");
    }

    #[test]
    fn test_homoglyph_normalization() {
        // Cyrillic 'а' and Greek 'ο'
        assert_eq!(normalize("b\u{0430}dw\u{03BF}rd"), "badword");
    }

    #[test]
    fn test_repeated_char_and_separator_collapse() {
        assert_eq!(normalize("hellooooo   ...  world!!!"), "helo world");
        assert_eq!(normalize("hellllllo"), "helo");
    }

    #[test]
    fn test_strict_restricted_match() {
        let m = matcher(&["heil"]).find("well Heil there");
        assert_eq!(m.terms, vec!["heil".to_string()]);
        assert!(!m.evasion);
        assert_eq!(m.context, "well Heil there");
    }

    #[test]
    fn test_gap_tolerant_match_flags_evasion() {
        let restricted = matcher(&["heil"]);

        let m = restricted.find("h.e.i.l");
        assert!(m.is_match());
        assert!(m.evasion);

        let m = restricted.find("h3il");
        assert!(m.evasion);

        // Too many separators between letters
        assert!(!restricted.find("h...e...i...l").is_match());
        // Substring of a longer word
        assert!(!restricted.find("heilbronn").is_match());
    }

    #[test]
    fn test_context_snippet_is_bounded() {
        let text = format!("{}heil{}", "a ".repeat(100), " b".repeat(100));
        let m = matcher(&["heil"]).find(&text);

        assert!(m.context.starts_with("..."));
        assert!(m.context.ends_with("..."));
        assert!(m.context.chars().count() <= 4 + 2 * CONTEXT_RADIUS + 6);
    }
}
