use std::collections::HashSet;

use super::pattern_matching::normalize;
use crate::config::LexiconConfig;

/// Endings a lexicon word may carry and still count as a hit ("idiots", "fucking")
const INFLECTIONS: [&str; 9] = ["", "s", "es", "ed", "er", "ers", "ing", "in", "ful"];

/// Score per lexicon tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToxicSeverity {
    Low = 3,
    Medium = 6,
    High = 8,
    Critical = 10,
}

impl ToxicSeverity {
    pub fn score(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone)]
struct LexiconEntry {
    term: String,
    /// Normalized form, matched as a whole word plus an optional inflection
    normalized: String,
    severity: ToxicSeverity,
}

/// Outcome of scanning one message against the lexicon
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToxicityReport {
    pub score: f64,
    /// Distinct lexicon entries found, in lexicon order
    pub terms: Vec<String>,
    pub max_severity: u32,
}

/// Tiered severity lexicon
#[derive(Debug, Clone)]
pub struct ToxicityLexicon {
    entries: Vec<LexiconEntry>,
}

impl ToxicityLexicon {
    pub fn from_config(config: &LexiconConfig) -> Self {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        // Most severe tier first so a term listed twice keeps its highest score
        for (terms, severity) in [
            (&config.critical, ToxicSeverity::Critical),
            (&config.high, ToxicSeverity::High),
            (&config.medium, ToxicSeverity::Medium),
            (&config.low, ToxicSeverity::Low),
        ] {
            for term in terms {
                let normalized = normalize(term);
                if normalized.is_empty() || !seen.insert(normalized.clone()) {
                    continue;
                }
                entries.push(LexiconEntry {
                    term: term.clone(),
                    normalized,
                    severity,
                });
            }
        }

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `min(detected / 3 + max_severity / 10, 1)` over whole-word hits in the normalized text
    ///
    /// Unlike a plain substring scan, "class" does not hit "ass"; inflected forms still do.
    pub fn score(&self, text: &str) -> ToxicityReport {
        let haystack = format!(" {} ", normalize(text));
        let mut report = ToxicityReport::default();

        for entry in &self.entries {
            let hit = INFLECTIONS
                .iter()
                .any(|suffix| haystack.contains(&format!(" {}{} ", entry.normalized, suffix)));
            if hit {
                report.terms.push(entry.term.clone());
                report.max_severity = report.max_severity.max(entry.severity.score());
            }
        }

        if !report.terms.is_empty() {
            let detected = report.terms.len() as f64;
            report.score = (detected / 3.0 + f64::from(report.max_severity) / 10.0).min(1.0);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> ToxicityLexicon {
        ToxicityLexicon::from_config(&LexiconConfig::default())
    }

    #[test]
    fn test_clean_text_scores_zero() {
        let report = lexicon().score("have a nice day everyone");
        assert_eq!(report.score, 0.0);
        assert!(report.terms.is_empty());
    }

    #[test]
    fn test_single_low_term() {
        let report = lexicon().score("you are such a noob");
        assert_eq!(report.terms, vec!["noob".to_string()]);
        assert_eq!(report.max_severity, 3);
        assert!((report.score - (1.0 / 3.0 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_capped() {
        let report = lexicon().score("stupid idiot, kys");
        assert_eq!(report.max_severity, 10);
        assert_eq!(report.score, 1.0);
    }

    #[test]
    fn test_obfuscated_and_whole_word() {
        let lex = lexicon();
        assert!(lex.score("st00pid").terms.is_empty());
        assert_eq!(lex.score("you are 5tup1d").terms, vec!["stupid".to_string()]);
        assert_eq!(lex.score("k i l l yourself").terms.len(), 0);
        assert!(lex.score("kill yourself").terms.contains(&"kill yourself".to_string()));
        // "class" must not hit a shorter entry by substring
        assert!(lex.score("class assignment").terms.is_empty());
    }

    #[test]
    fn test_inflected_forms_count() {
        let lex = lexicon();
        assert_eq!(lex.score("what a bunch of idiots").terms, vec!["idiot".to_string()]);
        assert_eq!(lex.score("this is fucking annoying").terms, vec!["fuck".to_string()]);
        assert_eq!(lex.score("stop killing me").terms, vec!["kill".to_string()]);
        // Endings outside the list stay clean
        assert!(lex.score("she held the door").terms.is_empty());
    }
}
