//! Чтение словаря произношений (`.lex`).
//!
//! Формат NOWAY-словаря: по строке на произношение,
//! `word(prior) ph1 ph2 ...`; вероятность произношения в скобках
//! необязательна (по умолчанию 1.0). Комментарии начинаются с `#`.

use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use dec_core::{DecError, DecResult};

/// Одно произношение из словаря.
#[derive(Debug, Clone, PartialEq)]
pub struct LexEntry {
    pub word: String,
    /// Ln-вероятность произношения.
    pub prior: f32,
    pub phones: Vec<String>,
}

/// Прочитать словарь из файла.
pub fn read_lexicon(path: impl AsRef<Path>) -> DecResult<Vec<LexEntry>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| DecError::Lexicon(format!("cannot open {}: {e}", path.display())))?;
    let entries = read_lexicon_from(BufReader::new(file))?;
    info!("lexicon loaded: {} entries ({})", entries.len(), path.display());
    Ok(entries)
}

/// Прочитать словарь из текстового потока.
pub fn read_lexicon_from(reader: impl BufRead) -> DecResult<Vec<LexEntry>> {
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        entries.push(parse_entry(line, i + 1)?);
    }
    if entries.is_empty() {
        return Err(DecError::Lexicon("lexicon contains no entries".into()));
    }
    Ok(entries)
}

fn parse_entry(line: &str, lineno: usize) -> DecResult<LexEntry> {
    let mut parts = line.split_whitespace();
    let head = parts
        .next()
        .ok_or_else(|| DecError::Lexicon(format!("line {lineno}: empty entry")))?;

    let (word, prior) = match head.find('(') {
        Some(open) => {
            let close = head.rfind(')').ok_or_else(|| {
                DecError::Lexicon(format!("line {lineno}: unterminated pronunciation probability"))
            })?;
            if close < open {
                return Err(DecError::Lexicon(format!(
                    "line {lineno}: malformed pronunciation probability"
                )));
            }
            let word = &head[..open];
            let prob: f64 = head[open + 1..close].parse().map_err(|_| {
                DecError::Lexicon(format!(
                    "line {lineno}: bad pronunciation probability \"{}\"",
                    &head[open + 1..close]
                ))
            })?;
            if prob <= 0.0 || prob > 1.0 {
                return Err(DecError::Lexicon(format!(
                    "line {lineno}: pronunciation probability {prob} outside (0, 1]"
                )));
            }
            (word, prob.ln() as f32)
        }
        None => (head, 0.0f32),
    };

    if word.is_empty() {
        return Err(DecError::Lexicon(format!("line {lineno}: empty word")));
    }

    let phones: Vec<String> = parts.map(str::to_string).collect();
    if phones.is_empty() {
        return Err(DecError::Lexicon(format!(
            "line {lineno}: word \"{word}\" has no phones"
        )));
    }

    Ok(LexEntry {
        word: word.to_string(),
        prior,
        phones,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_entry() {
        let e = parse_entry("yes Y EH S", 1).unwrap();
        assert_eq!(e.word, "yes");
        assert_eq!(e.prior, 0.0);
        assert_eq!(e.phones, vec!["Y", "EH", "S"]);
    }

    #[test]
    fn test_parse_entry_with_prior() {
        let e = parse_entry("tomato(0.5) T AH M EY T OW", 1).unwrap();
        assert_eq!(e.word, "tomato");
        assert!((e.prior - 0.5f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_reject_entry_without_phones() {
        assert!(parse_entry("word", 1).is_err());
    }

    #[test]
    fn test_reject_bad_probability() {
        assert!(parse_entry("word(1.5) A", 1).is_err());
        assert!(parse_entry("word(0) A", 1).is_err());
        assert!(parse_entry("word(x A", 1).is_err());
    }

    #[test]
    fn test_read_with_comments() {
        let text = "# comment\nyes Y EH S\n\nno N OW\n";
        let entries = read_lexicon_from(text.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].word, "no");
    }

    #[test]
    fn test_empty_lexicon_is_fatal() {
        assert!(read_lexicon_from("# only comments\n".as_bytes()).is_err());
    }
}
