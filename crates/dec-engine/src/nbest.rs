//! Пост-обработка N-best списков: чтение gzip-файла и доверительная оценка.
//!
//! Внешний решёточный инструмент пишет строки `<score> <word>...` в
//! gzip-файл. Оценки выравниваются («flattening») множителем `alpha`, после
//! чего доверие лучшей гипотезы считается как запас `s₁ − logsumexp(s)`
//! в ln-пространстве.

use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;

use dec_core::{DecError, DecResult};

/// Одна гипотеза N-best списка.
#[derive(Debug, Clone, PartialEq)]
pub struct NbestHypothesis {
    /// Ln-оценка гипотезы (до выравнивания).
    pub score: f64,
    pub words: Vec<String>,
}

/// Прочитать gzip N-best файл.
pub fn read_nbest_gz(path: impl AsRef<Path>) -> DecResult<Vec<NbestHypothesis>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| DecError::External(format!("cannot open {}: {e}", path.display())))?;
    read_nbest_from(BufReader::new(GzDecoder::new(file)))
}

/// Прочитать N-best список из текстового потока.
pub fn read_nbest_from(reader: impl BufRead) -> DecResult<Vec<NbestHypothesis>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            DecError::External(format!("N-best line {}: read failed: {e}", i + 1))
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let score: f64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                DecError::External(format!("N-best line {}: bad score in \"{line}\"", i + 1))
            })?;
        out.push(NbestHypothesis {
            score,
            words: parts.map(str::to_string).collect(),
        });
    }
    if out.is_empty() {
        return Err(DecError::External("N-best list is empty".into()));
    }
    Ok(out)
}

/// `ln Σ exp(xᵢ)`, устойчиво к величине аргументов и их порядку.
pub fn logsumexp(scores: &[f64]) -> f64 {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = scores.iter().map(|&s| (s - max).exp()).sum();
    max + sum.ln()
}

/// Запас доверия лучшей гипотезы после выравнивания оценок множителем
/// `alpha`: `max(s·α) − logsumexp(s·α)`. Всегда ≤ 0; ближе к нулю —
/// увереннее распознавание.
pub fn confidence_margin(nbest: &[NbestHypothesis], alpha: f64) -> DecResult<f64> {
    if nbest.is_empty() {
        return Err(DecError::External("N-best list is empty".into()));
    }
    let scaled: Vec<f64> = nbest.iter().map(|h| h.score * alpha).collect();
    let best = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(best - logsumexp(&scaled))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hyp(score: f64, words: &[&str]) -> NbestHypothesis {
        NbestHypothesis {
            score,
            words: words.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_nbest_lines() {
        let text = "-120.5 yes no\n-130.25 no yes\n\n-140 yes\n";
        let list = read_nbest_from(text.as_bytes()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].words, vec!["yes", "no"]);
        assert!((list[1].score + 130.25).abs() < 1e-9);
    }

    #[test]
    fn test_bad_score_is_error() {
        assert!(read_nbest_from("abc yes\n".as_bytes()).is_err());
    }

    #[test]
    fn test_logsumexp_known_value() {
        // ln(e^0 + e^0) = ln 2.
        let v = logsumexp(&[0.0, 0.0]);
        assert!((v - 2.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_logsumexp_is_order_independent() {
        let scores = vec![-120.0, -125.5, -119.25, -140.0, -121.75];
        let base = logsumexp(&scores);
        // Все циклические перестановки дают тот же результат.
        let mut rotated = scores.clone();
        for _ in 0..scores.len() {
            rotated.rotate_left(1);
            assert!((logsumexp(&rotated) - base).abs() < 1e-12);
        }
    }

    #[test]
    fn test_logsumexp_handles_large_magnitudes() {
        let v = logsumexp(&[-1000.0, -1000.0]);
        assert!((v - (-1000.0 + 2.0f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_margin() {
        // Две равные гипотезы: запас ровно -ln 2.
        let list = vec![hyp(-100.0, &["yes"]), hyp(-100.0, &["no"])];
        let m = confidence_margin(&list, 1.0).unwrap();
        assert!((m + 2.0f64.ln()).abs() < 1e-12);

        // Далёкая вторая гипотеза почти не отнимает доверия.
        let list = vec![hyp(-100.0, &["yes"]), hyp(-200.0, &["no"])];
        let m = confidence_margin(&list, 1.0).unwrap();
        assert!(m > -1e-6);
        assert!(m <= 0.0);
    }

    #[test]
    fn test_confidence_margin_flattening() {
        // Выравнивание сжимает разрыв: доверие падает.
        let list = vec![hyp(-100.0, &["yes"]), hyp(-110.0, &["no"])];
        let sharp = confidence_margin(&list, 1.0).unwrap();
        let flat = confidence_margin(&list, 0.1).unwrap();
        assert!(flat < sharp);
    }
}
