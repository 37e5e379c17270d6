//! Text measurement helpers shared by the assembler, validator and evaluator.
//!
//! Everything here is pure and deterministic.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "among", "an", "and",
    "any", "are", "as", "at", "be", "because", "been", "before", "being", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "how", "however", "if", "in", "into",
    "is", "it", "its", "itself", "more", "most", "much", "must", "not", "of", "off", "on",
    "once", "only", "or", "other", "our", "out", "over", "own", "same", "should", "so", "some",
    "such", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "upon", "very", "was", "we",
    "were", "what", "when", "where", "whether", "which", "while", "who", "whom", "why", "will",
    "with", "within", "without", "would", "you", "your",
];

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[\s*([^\[\]"“”\s]+)\s*:\s*(?:"([^"]*)"|“([^”]*)”)\s*\]"#)
            .expect("marker regex is valid")
    })
}

/// Regex matching a citation marker `[source_id: "quoted span"]`.
///
/// Group 1 is the id; group 2 (straight quotes) or 3 (curly quotes) the span.
/// Ids may contain `:` (`[doi:10.1000/xyz: "..."]`); the id ends at the last
/// colon before the opening quote.
pub fn citation_marker_regex() -> &'static Regex {
    marker_regex()
}

/// Remove citation markers, leaving the surrounding prose.
pub fn strip_markers(text: &str) -> String {
    marker_regex().replace_all(text, "").into_owned()
}

/// Lowercase, drop non-alphanumerics, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else if c.is_whitespace() {
                ' '
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-delimited words of the prose (markers excluded).
pub fn words(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .collect()
}

/// Word count of a draft, excluding citation markers.
pub fn word_count(text: &str) -> usize {
    words(&strip_markers(text)).len()
}

/// Estimate tokens from character count (~4 chars per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Lowercase abbreviations whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "al", "approx", "ca", "cf", "dr", "e.g", "eds", "eq", "fig", "i.e", "mr", "mrs", "ms",
    "n.d", "pp", "prof", "vol", "vs",
];

/// Whether the period just pushed onto `current` belongs to an abbreviation
/// or an initial rather than ending the sentence.
fn is_abbreviation_period(current: &str) -> bool {
    let before = &current[..current.len() - 1];
    let token = before
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();
    if token.chars().count() == 1 && token.chars().all(|c| c.is_ascii_uppercase()) {
        return true;
    }
    ABBREVIATIONS.contains(&token.to_lowercase().as_str())
}

/// Split prose into sentences on terminal punctuation.
///
/// Punctuation only ends a sentence when followed by whitespace or the end
/// of the text, so decimals stay intact; abbreviations such as "et al." and
/// "e.g." and initials do not end sentences.
pub fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
        if !at_boundary || (c == '.' && is_abbreviation_period(&current)) {
            continue;
        }
        let trimmed = current.trim();
        if !words(trimmed).is_empty() {
            out.push(trimmed.to_string());
        }
        current.clear();
    }
    let trimmed = current.trim();
    if !words(trimmed).is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Light stemming so inflected forms of a word compare equal.
fn stem(word: &str) -> String {
    let mut base = if let Some(b) = word.strip_suffix("ies").filter(|b| b.len() >= 3) {
        format!("{b}y")
    } else if let Some(b) = word.strip_suffix("ing").filter(|b| b.len() >= 4) {
        b.to_string()
    } else if let Some(b) = word.strip_suffix("ed").filter(|b| b.len() >= 4) {
        b.to_string()
    } else if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        word.to_string()
    } else if let Some(b) = word.strip_suffix('s').filter(|b| b.len() >= 3) {
        b.to_string()
    } else {
        word.to_string()
    };
    if base.len() > 4 && base.ends_with('e') {
        base.pop();
    }
    base
}

/// Normalized, stemmed content terms (length >= 4, stopwords removed), in order.
pub fn content_terms(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|w| w.len() >= 4 && !is_stopword(w))
        .map(stem)
        .collect()
}

pub fn term_set(text: &str) -> BTreeSet<String> {
    content_terms(text).into_iter().collect()
}

/// Character-bigram Dice coefficient of two normalized strings.
pub fn dice_coefficient(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let a_grams = bigrams(a);
    let mut b_grams = bigrams(b);
    if a_grams.is_empty() || b_grams.is_empty() {
        return if a == b && !a.is_empty() { 1.0 } else { 0.0 };
    }
    let total = a_grams.len() + b_grams.len();
    let mut overlap = 0usize;
    for gram in &a_grams {
        if let Some(pos) = b_grams.iter().position(|g| g == gram) {
            b_grams.swap_remove(pos);
            overlap += 1;
        }
    }
    (2 * overlap) as f64 / total as f64
}

/// Acronym definitions written as `Long Form (LF)`.
///
/// The long form is the run of words right before the parenthesis whose
/// initials spell the acronym.
pub fn acronym_definitions(text: &str) -> Vec<(String, String)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\(([A-Z][A-Za-z]{1,9})\)")
            .expect("acronym regex is valid")
    });

    let mut out = Vec::new();
    for caps in re.captures_iter(text) {
        let (Some(whole), Some(acronym)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let acronym = acronym.as_str();
        let letters: Vec<char> = acronym
            .chars()
            .filter(char::is_ascii_uppercase)
            .collect();
        if letters.len() < 2 {
            continue;
        }
        let preceding: Vec<&str> = text[..whole.start()].split_whitespace().collect();
        if preceding.len() < letters.len() {
            continue;
        }
        let candidate = &preceding[preceding.len() - letters.len()..];
        let initials_match = candidate.iter().zip(&letters).all(|(word, letter)| {
            word.chars()
                .find(|c| c.is_alphanumeric())
                .map(|c| c.to_ascii_uppercase() == *letter)
                .unwrap_or(false)
        });
        if initials_match {
            let long_form = candidate
                .iter()
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
                .collect::<Vec<_>>()
                .join(" ");
            out.push((acronym.to_string(), long_form));
        }
    }
    out
}

/// Count of contractions such as "don't" or "we're".
pub fn contraction_count(text: &str) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\b[a-z]+(?:n't|'re|'ve|'ll|'d|'m|’re|’ve|’ll|n’t)\b|\b(?:it|that|there|what|he|she)['’]s\b")
            .expect("contraction regex is valid")
    });
    re.find_iter(text).count()
}

/// Count of first-person singular and second-person pronouns.
pub fn personal_pronoun_count(text: &str) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:i|me|my|mine|you|your|yours)\b")
            .expect("pronoun regex is valid")
    });
    re.find_iter(text).count()
}

/// Informal markers (contractions, personal pronouns, exclamations) per 100 words.
pub fn informality_rate(text: &str) -> f64 {
    let prose = strip_markers(text);
    let total = words(&prose).len();
    if total == 0 {
        return 0.0;
    }
    let markers =
        contraction_count(&prose) + personal_pronoun_count(&prose) + prose.matches('!').count();
    markers as f64 * 100.0 / total as f64
}

/// Fraction of sentences containing a passive construction.
pub fn passive_ratio(text: &str) -> f64 {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:am|is|are|was|were|be|been|being)\s+(?:\w+ly\s+)?\w+(?:ed|en)\b")
            .expect("passive regex is valid")
    });
    let all = sentences(&strip_markers(text));
    if all.is_empty() {
        return 0.0;
    }
    let passive = all.iter().filter(|s| re.is_match(s)).count();
    passive as f64 / all.len() as f64
}

/// Mean words per sentence.
pub fn average_sentence_length(text: &str) -> f64 {
    let prose = strip_markers(text);
    let all = sentences(&prose);
    if all.is_empty() {
        return 0.0;
    }
    words(&prose).len() as f64 / all.len() as f64
}

/// Fraction of words with at least `min_len` letters.
pub fn long_word_ratio(text: &str, min_len: usize) -> f64 {
    let prose = strip_markers(text);
    let all = words(&prose);
    if all.is_empty() {
        return 0.0;
    }
    let long = all
        .iter()
        .filter(|w| w.chars().filter(|c| c.is_alphabetic()).count() >= min_len)
        .count();
    long as f64 / all.len() as f64
}

/// Density of technical vocabulary: long words plus all-caps acronyms.
pub fn technical_density(text: &str) -> f64 {
    let prose = strip_markers(text);
    let all = words(&prose);
    if all.is_empty() {
        return 0.0;
    }
    let technical = all
        .iter()
        .filter(|w| {
            let letters: String = w.chars().filter(|c| c.is_alphabetic()).collect();
            letters.chars().count() >= 11
                || (letters.len() >= 2 && letters.chars().all(|c| c.is_ascii_uppercase()))
        })
        .count();
    technical as f64 / all.len() as f64
}

/// Case-insensitive whole-word (or whole-phrase) occurrences of `term`.
pub fn count_term(text: &str, term: &str) -> usize {
    let term = term.trim();
    if term.is_empty() {
        return 0;
    }
    let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
    match Regex::new(&pattern) {
        Ok(re) => re.find_iter(text).count(),
        Err(_) => 0,
    }
}
