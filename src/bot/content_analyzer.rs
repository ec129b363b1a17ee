use log::debug;
use regex::Regex;
use std::collections::HashSet;

use super::toxicity::ToxicityLexicon;
use crate::config::{ContentThresholds, EngineConfig};
use crate::types::{ContentAnalysisResult, ContentViolations};

const URL_PATTERN: &str = r"https?://[^\s]+";
const MENTION_PATTERN: &str = r"<@[!&]?\d+>|@everyone|@here";
const CUSTOM_EMOJI_PATTERN: &str = r"<a?:\w+:\d+>";
const TEXT_EMOJI_PATTERN: &str = r":\w+[~\d]*:";

/// Runs at or above this length count toward character repetition
const REPEAT_RUN: usize = 3;
/// Below this word-diversity ratio a message of 4+ words is low quality
const MIN_WORD_DIVERSITY: f64 = 0.3;

fn is_unicode_emoji(c: char) -> bool {
    matches!(c as u32, 0x1F600..=0x1F64F | 0x1F300..=0x1F5FF | 0x1F680..=0x1F6FF | 0x1F1E0..=0x1F1FF)
}

/// At least two distinct alphanumeric characters
fn is_meaningful_word(word: &str) -> bool {
    let distinct: HashSet<char> = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    distinct.len() >= 2
}

/// Rule-based spam and toxicity scoring for message text
pub struct ContentAnalyzer {
    thresholds: ContentThresholds,
    spam_threshold: f64,
    lexicon: ToxicityLexicon,
    url_regex: Regex,
    mention_regex: Regex,
    custom_emoji_regex: Regex,
    text_emoji_regex: Regex,
}

impl ContentAnalyzer {
    pub fn new(thresholds: ContentThresholds, spam_threshold: f64, lexicon: ToxicityLexicon) -> Result<Self, regex::Error> {
        Ok(Self {
            thresholds,
            spam_threshold,
            lexicon,
            url_regex: Regex::new(URL_PATTERN)?,
            mention_regex: Regex::new(MENTION_PATTERN)?,
            custom_emoji_regex: Regex::new(CUSTOM_EMOJI_PATTERN)?,
            text_emoji_regex: Regex::new(TEXT_EMOJI_PATTERN)?,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, regex::Error> {
        Self::new(
            config.spam.content.clone(),
            config.spam.threshold,
            ToxicityLexicon::from_config(&config.lexicon),
        )
    }

    pub fn analyze(&self, text: &str) -> ContentAnalysisResult {
        let t = &self.thresholds;

        let url_count = self.url_regex.find_iter(text).count();
        let mention_count = self.mention_regex.find_iter(text).count();
        let emoji_count =
            text.chars().filter(|c| is_unicode_emoji(*c)).count() + self.custom_emoji_regex.find_iter(text).count();
        let message_length = text.chars().count();

        let stripped = self.strip_emoji(text);
        let words: Vec<String> = stripped.split_whitespace().map(str::to_lowercase).collect();
        let word_count = words.len();
        let unique_word_count = words.iter().collect::<HashSet<_>>().len();
        let meaningful_words = words.iter().filter(|w| is_meaningful_word(w)).count();

        let mut violations = ContentViolations::default();
        let mut indicators = Vec::new();

        if url_count > t.max_urls {
            violations.too_many_urls = true;
            indicators.push(format!("Too many URLs ({}/{})", url_count, t.max_urls));
        }
        if mention_count > t.max_mentions {
            violations.too_many_mentions = true;
            indicators.push(format!("Too many mentions ({}/{})", mention_count, t.max_mentions));
        }
        if emoji_count > t.max_emojis {
            violations.too_many_emojis = true;
            indicators.push(format!("Too many emojis ({}/{})", emoji_count, t.max_emojis));
        }

        if message_length < t.min_length {
            violations.too_short = true;
            indicators.push(format!("Low quality content ({} chars)", message_length));
        } else if meaningful_words == 0 {
            violations.too_short = true;
            indicators.push("No meaningful words (emoji-only message)".to_string());
        } else if word_count >= 3 && unique_word_count == 1 {
            violations.too_short = true;
            indicators.push(format!("Repeated word spam ({} repetitions)", word_count));
        } else if word_count >= 4 && (unique_word_count as f64 / word_count as f64) < MIN_WORD_DIVERSITY {
            violations.too_short = true;
            indicators.push(format!("Low word diversity ({}/{} unique)", unique_word_count, word_count));
        }

        if self.has_excessive_caps(text) {
            violations.too_many_caps = true;
            indicators.push("Excessive capital letters".to_string());
        }
        if repetition_ratio(text) > t.repetition_ratio {
            violations.too_much_repetition = true;
            indicators.push("Excessive character repetition".to_string());
        }

        let toxicity = self.lexicon.score(text);

        let w = &t.weights;
        let mut spam_score = [
            (violations.too_many_urls, w.urls),
            (violations.too_many_mentions, w.mentions),
            (violations.too_many_emojis, w.emojis),
            (violations.too_short, w.low_quality),
            (violations.too_many_caps, w.caps),
            (violations.too_much_repetition, w.repetition),
        ]
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, weight)| weight)
        .sum::<f64>();
        if toxicity.score > t.toxicity_threshold {
            spam_score += w.toxicity_bonus;
        }
        let spam_score = spam_score.min(1.0);
        let is_spam = spam_score > self.spam_threshold;

        if is_spam {
            debug!("Content flagged as spam ({:.2}): {:?}", spam_score, indicators);
        }

        ContentAnalysisResult {
            url_count,
            mention_count,
            emoji_count,
            message_length,
            word_count,
            unique_word_count,
            toxicity_score: toxicity.score,
            toxic_terms: toxicity.terms,
            spam_score,
            is_spam,
            violations,
            spam_indicators: indicators,
        }
    }

    fn strip_emoji(&self, text: &str) -> String {
        let without_custom = self.custom_emoji_regex.replace_all(text, "");
        let without_text = self.text_emoji_regex.replace_all(&without_custom, "");
        without_text.chars().filter(|c| !is_unicode_emoji(*c)).collect()
    }

    fn has_excessive_caps(&self, text: &str) -> bool {
        let letters = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
        if letters < self.thresholds.min_caps_letters {
            return false;
        }
        let upper = text.chars().filter(|c| c.is_ascii_uppercase()).count();
        upper as f64 / letters as f64 > self.thresholds.caps_ratio
    }
}

/// Share of characters that are the 3rd or later in a run of the same character
pub fn repetition_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut repeated = 0usize;
    let mut prev = None;
    let mut run = 0usize;

    for c in text.chars() {
        total += 1;
        if prev == Some(c) {
            run += 1;
        } else {
            run = 1;
            prev = Some(c);
        }
        if run >= REPEAT_RUN {
            repeated += 1;
        }
    }

    if total == 0 {
        0.0
    } else {
        repeated as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> ContentAnalyzer {
        ContentAnalyzer::from_config(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_message() {
        let result = analyzer().analyze("");

        assert!(!result.is_spam);
        assert!(result.violations.too_short);
        assert!(!result.violations.too_many_caps);
        assert!(!result.violations.too_much_repetition);
        assert!((result.spam_score - 0.4).abs() < 1e-9);
        assert_eq!(result.spam_indicators, vec!["Low quality content (0 chars)".to_string()]);
    }

    #[test]
    fn test_all_caps_single_token() {
        let result = analyzer().analyze("AAAAAAAAAAAA");

        assert_eq!(result.message_length, 12);
        assert!(result.violations.too_many_caps);
        assert!(result.violations.too_short);
        assert_eq!(result.word_count, 1);
    }

    #[test]
    fn test_normal_message_is_clean() {
        let result = analyzer().analyze("Hey everyone, the stream starts in ten minutes!");

        assert!(!result.is_spam);
        assert_eq!(result.spam_score, 0.0);
        assert!(result.spam_indicators.is_empty());
        assert_eq!(result.word_count, 8);
    }

    #[test]
    fn test_structural_counts() {
        let text = "check https://a.example https://b.example <@123> <@!456> @everyone <:pog:111> \u{1F600}";
        let result = analyzer().analyze(text);

        assert_eq!(result.url_count, 2);
        assert_eq!(result.mention_count, 3);
        assert_eq!(result.emoji_count, 2);
    }

    #[test]
    fn test_mention_and_url_spam() {
        let mentions = (1..=8).map(|i| format!("<@{}>", i)).collect::<Vec<_>>().join(" ");
        let urls = (1..=4).map(|i| format!("https://spam{}.example", i)).collect::<Vec<_>>().join(" ");
        let result = analyzer().analyze(&format!("free nitro {} {}", mentions, urls));

        assert!(result.violations.too_many_mentions);
        assert!(result.violations.too_many_urls);
        assert!((result.spam_score - 0.7).abs() < 1e-9);
        assert!(result.is_spam);
        assert!(result.spam_indicators.contains(&"Too many mentions (8/6)".to_string()));
        assert!(result.spam_indicators.contains(&"Too many URLs (4/3)".to_string()));
    }

    #[test]
    fn test_repeated_words_are_low_quality() {
        let result = analyzer().analyze("spam spam spam");
        assert!(result.violations.too_short);
        assert_eq!(result.spam_indicators, vec!["Repeated word spam (3 repetitions)".to_string()]);
    }

    #[test]
    fn test_emoji_only_message() {
        let result = analyzer().analyze("\u{1F600}\u{1F600} <:pog:111>");
        assert!(result.violations.too_short);
        assert_eq!(result.word_count, 0);
        assert!(result.spam_indicators.contains(&"No meaningful words (emoji-only message)".to_string()));
    }

    #[test]
    fn test_emoji_removed_without_splitting_words() {
        let result = analyzer().analyze("wow:fire:nice");
        assert_eq!(result.word_count, 1);
        assert_eq!(result.unique_word_count, 1);
    }

    #[test]
    fn test_toxicity_bonus() {
        let result = analyzer().analyze("you stupid idiot, kys");

        assert_eq!(result.toxicity_score, 1.0);
        assert!(result.toxic_terms.contains(&"kys".to_string()));
        assert!((result.spam_score - 0.2).abs() < 1e-9);
        assert!(!result.is_spam);
    }

    #[test]
    fn test_repetition_ratio() {
        assert_eq!(repetition_ratio(""), 0.0);
        assert_eq!(repetition_ratio("aab"), 0.0);
        assert!((repetition_ratio("aaaa") - 0.5).abs() < 1e-9);
    }
}
