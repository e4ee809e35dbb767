// Text Processing Service
// Sentence splitting, word statistics, and readability estimates used by the
// classifier adapter and the composite scorer

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9]+(?:['’][A-Za-z]+)?").expect("word regex"))
}

/// Lowercased word tokens (letters/digits, contractions kept whole)
pub fn words(text: &str) -> Vec<String> {
    word_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

pub fn count_words(text: &str) -> usize {
    word_re().find_iter(text).count()
}

/// Split text into trimmed sentences.
/// Decimal points ("7.85 g/cm³") and terminators inside quotes do not end a sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return vec![];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut buffer = String::new();
    let mut in_quote = false;

    for i in 0..chars.len() {
        let ch = chars[i];
        buffer.push(ch);

        if ch == '"' || ch == '\u{201c}' || ch == '\u{201d}' {
            in_quote = !in_quote;
        }

        if !['.', '!', '?', '。', '！', '？'].contains(&ch) || in_quote {
            continue;
        }

        if ch == '.' && i > 0 && i + 1 < chars.len() {
            if chars[i - 1].is_ascii_digit() && chars[i + 1].is_ascii_digit() {
                continue;
            }
        }

        // Keep "..." and "?!" runs together
        if i + 1 < chars.len() && ['.', '!', '?'].contains(&chars[i + 1]) {
            continue;
        }

        let sentence = buffer.trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        buffer.clear();
    }

    let remaining = buffer.trim();
    if !remaining.is_empty() {
        sentences.push(remaining.to_string());
    }

    sentences
}

/// Coefficient of variation of sentence lengths (in words)
pub fn sentence_length_cv(sentences: &[String]) -> Option<f64> {
    if sentences.len() < 2 {
        return None;
    }
    let lens: Vec<f64> = sentences.iter().map(|s| count_words(s) as f64).collect();
    let mean = lens.iter().sum::<f64>() / lens.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    let variance = lens.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / lens.len() as f64;
    Some(variance.sqrt() / mean)
}

/// Share of word trigrams that occur more than once
pub fn trigram_repeat_rate(text: &str) -> f64 {
    let tokens = words(text);
    if tokens.len() < 3 {
        return 0.0;
    }

    let mut counts: HashMap<(&str, &str, &str), usize> = HashMap::new();
    for w in tokens.windows(3) {
        *counts
            .entry((w[0].as_str(), w[1].as_str(), w[2].as_str()))
            .or_insert(0) += 1;
    }

    let total = tokens.len() - 2;
    let repeated: usize = counts.values().filter(|c| **c > 1).map(|c| c - 1).sum();
    repeated as f64 / total as f64
}

/// True when any sentence appears more than once (case-insensitive)
pub fn has_duplicate_sentence(sentences: &[String]) -> bool {
    let mut seen = std::collections::HashSet::new();
    sentences
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| count_words(s) >= 3)
        .any(|s| !seen.insert(s))
}

fn count_syllables(word: &str) -> usize {
    let lower = word.to_lowercase();
    let mut count = 0;
    let mut prev_vowel = false;
    for ch in lower.chars() {
        let vowel = matches!(ch, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    if lower.ends_with('e') && !lower.ends_with("le") && count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// Flesch reading ease; None for text without words
pub fn flesch_reading_ease(text: &str) -> Option<f64> {
    let tokens: Vec<&str> = word_re().find_iter(text).map(|m| m.as_str()).collect();
    if tokens.is_empty() {
        return None;
    }
    let sentence_count = split_sentences(text).len().max(1) as f64;
    let word_count = tokens.len() as f64;
    let syllables: usize = tokens.iter().map(|w| count_syllables(w)).sum();

    Some(206.835 - 1.015 * (word_count / sentence_count) - 84.6 * (syllables as f64 / word_count))
}

/// Short single-line preview for logs
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let text = "Steel has a density of 7.85 g/cm³. It is strong! Is it cheap?";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 3);
        assert!(sentences[0].contains("7.85"));
        assert_eq!(sentences[2], "Is it cheap?");
    }

    #[test]
    fn test_split_sentences_empty() {
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_count_words_keeps_contractions() {
        assert_eq!(count_words("It's a laser, isn't it?"), 5);
        assert_eq!(words("Don't STOP")[0], "don't");
    }

    #[test]
    fn test_trigram_repeat_rate() {
        assert_eq!(trigram_repeat_rate("one two three four five"), 0.0);
        let repeated = "the laser cleans the laser cleans the laser cleans";
        assert!(trigram_repeat_rate(repeated) > 0.3);
    }

    #[test]
    fn test_duplicate_sentence_detection() {
        let sentences = vec![
            "The oxide layer is removed.".to_string(),
            "Then it is polished.".to_string(),
            "the oxide layer is removed.".to_string(),
        ];
        assert!(has_duplicate_sentence(&sentences));
        assert!(!has_duplicate_sentence(&sentences[..2]));
    }

    #[test]
    fn test_uniform_lengths_have_low_cv() {
        let uniform = split_sentences("One two three four. Five six seven eight. Nine ten eleven twelve.");
        assert!(sentence_length_cv(&uniform).unwrap() < 0.01);
        let varied = split_sentences("Short. This sentence runs on for quite a few more words than the first.");
        assert!(sentence_length_cv(&varied).unwrap() > 0.5);
    }

    #[test]
    fn test_flesch_orders_simple_above_complex() {
        let simple = flesch_reading_ease("The cat sat. The dog ran. We had fun.").unwrap();
        let complex = flesch_reading_ease(
            "Microstructural characterization demonstrated considerable intergranular heterogeneity.",
        )
        .unwrap();
        assert!(simple > complex);
        assert!(flesch_reading_ease("...").is_none());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("a\nb", 10), "a b");
    }
}
