/// Rewrites transcript text before it becomes a training label.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: &str, language: &str) -> String;
}

const PT: [&str; 21] = [
    "zero", "um", "dois", "três", "quatro", "cinco", "seis", "sete", "oito", "nove", "dez",
    "onze", "doze", "treze", "quatorze", "quinze", "dezesseis", "dezessete", "dezoito",
    "dezenove", "vinte",
];

const EN: [&str; 21] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen", "twenty",
];

/// Spells out standalone numbers 0 to 20 for Portuguese and English and
/// collapses whitespace. Other languages only get the whitespace pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumberWordsNormalizer;

impl NumberWordsNormalizer {
    fn words(language: &str) -> Option<&'static [&'static str; 21]> {
        match language.split(['-', '_']).next().unwrap_or(language) {
            "pt" => Some(&PT),
            "en" => Some(&EN),
            _ => None,
        }
    }
}

impl TextNormalizer for NumberWordsNormalizer {
    fn normalize(&self, text: &str, language: &str) -> String {
        let spelled = match Self::words(language) {
            Some(words) => spell_numbers(text, words),
            None => text.to_string(),
        };
        spelled.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Replaces digit runs that form a whole word (`\b\d+\b`) and whose text is
/// exactly one of `0`..`20`.
fn spell_numbers(text: &str, words: &[&str; 21]) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let starts_word = i == 0 || !is_word(chars[i - 1]);
        if !(c.is_ascii_digit() && starts_word) {
            out.push(c);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let run: String = chars[start..i].iter().collect();
        let ends_word = i == chars.len() || !is_word(chars[i]);

        let replacement = ends_word
            .then(|| run.parse::<usize>().ok())
            .flatten()
            .filter(|n| *n <= 20 && n.to_string() == run)
            .map(|n| words[n]);

        match replacement {
            Some(word) => out.push_str(word),
            None => out.push_str(&run),
        }
    }
    out
}
