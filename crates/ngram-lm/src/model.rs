//! Back-off n-граммная модель из ARPA-файла.
//!
//! ARPA хранит log10-вероятности; модель переводит их в натуральный
//! логарифм при загрузке, поскольку весь поиск работает в ln-пространстве.
//! N-граммы привязываются к id словаря распознавателя при чтении; n-граммы
//! со словами вне словаря пропускаются.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use dec_core::{DecError, DecResult, WordId};
use lexicon::Vocabulary;

const LN10: f32 = std::f32::consts::LN_10;

/// Оценка для слова, у которого нет даже униграммы.
///
/// При корректной перекрёстной проверке словаря не встречается.
pub const OOV_LOG_PROB: f32 = -60.0;

#[derive(Debug, Clone, Copy)]
struct Entry {
    log_prob: f32,
    backoff: f32,
}

/// Back-off n-граммная модель.
///
/// Неизменяема после загрузки; разделяется между высказываниями через `Arc`.
#[derive(Debug)]
pub struct NgramLm {
    order: usize,
    ngrams: HashMap<Box<[WordId]>, Entry>,
}

impl NgramLm {
    /// Прочитать ARPA-файл, привязав слова к словарю.
    pub fn read(path: impl AsRef<Path>, vocab: &Vocabulary) -> DecResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            DecError::LanguageModel(format!("cannot open {}: {e}", path.display()))
        })?;
        let lm = Self::read_from(BufReader::new(file), vocab)?;
        info!(
            "language model loaded: order {}, {} n-grams ({})",
            lm.order,
            lm.ngrams.len(),
            path.display()
        );
        Ok(lm)
    }

    /// Прочитать модель из текстового потока в формате ARPA.
    pub fn read_from(reader: impl BufRead, vocab: &Vocabulary) -> DecResult<Self> {
        let mut order = 0usize;
        let mut ngrams: HashMap<Box<[WordId]>, Entry> = HashMap::new();
        let mut current_n: Option<usize> = None;
        let mut in_data = false;
        let mut skipped = 0usize;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "\\data\\" {
                in_data = true;
                continue;
            }
            if line == "\\end\\" {
                current_n = None;
                continue;
            }
            if let Some(rest) = line.strip_prefix('\\') {
                // Заголовок секции вида "\2-grams:".
                if let Some(n_str) = rest.strip_suffix("-grams:") {
                    let n: usize = n_str.parse().map_err(|_| {
                        DecError::LanguageModel(format!("bad section header \"{line}\""))
                    })?;
                    current_n = Some(n);
                    order = order.max(n);
                    continue;
                }
                return Err(DecError::LanguageModel(format!(
                    "unexpected directive \"{line}\""
                )));
            }
            if in_data && current_n.is_none() {
                // Строки "ngram N=count" — только для сведения.
                if line.starts_with("ngram") {
                    continue;
                }
            }
            let Some(n) = current_n else {
                return Err(DecError::LanguageModel(format!(
                    "n-gram line outside any section: \"{line}\""
                )));
            };

            let mut parts = line.split_whitespace();
            let log10: f32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    DecError::LanguageModel(format!("bad probability in \"{line}\""))
                })?;

            let mut ids: Vec<WordId> = Vec::with_capacity(n);
            let mut unknown = false;
            for _ in 0..n {
                let w = parts.next().ok_or_else(|| {
                    DecError::LanguageModel(format!("truncated {n}-gram line \"{line}\""))
                })?;
                match vocab.id(w) {
                    Some(id) => ids.push(id),
                    None => unknown = true,
                }
            }
            if unknown {
                skipped += 1;
                continue;
            }

            // Необязательный back-off вес в конце строки.
            let backoff10: f32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);

            ngrams.insert(
                ids.into_boxed_slice(),
                Entry {
                    log_prob: log10 * LN10,
                    backoff: backoff10 * LN10,
                },
            );
        }

        if order == 0 || ngrams.is_empty() {
            return Err(DecError::LanguageModel(
                "ARPA file contains no n-gram sections".into(),
            ));
        }
        if skipped > 0 {
            debug!("ARPA: skipped {skipped} n-grams with out-of-vocabulary words");
        }
        Ok(Self { order, ngrams })
    }

    /// Порядок модели (3 для триграмм).
    pub fn order(&self) -> usize {
        self.order
    }

    /// Количество загруженных n-грамм.
    pub fn len(&self) -> usize {
        self.ngrams.len()
    }

    /// Пуста ли модель.
    pub fn is_empty(&self) -> bool {
        self.ngrams.is_empty()
    }

    /// Ln P(word | history) с back-off; история усекается до order−1 слов.
    pub fn score(&self, history: &[WordId], word: WordId) -> f32 {
        let max_hist = self.order - 1;
        let hist = if history.len() > max_hist {
            &history[history.len() - max_hist..]
        } else {
            history
        };

        let mut backoff_sum = 0.0f32;
        let mut key: Vec<WordId> = Vec::with_capacity(hist.len() + 1);
        for start in 0..=hist.len() {
            let h = &hist[start..];
            key.clear();
            key.extend_from_slice(h);
            key.push(word);
            if let Some(e) = self.ngrams.get(key.as_slice()) {
                return backoff_sum + e.log_prob;
            }
            if !h.is_empty() {
                if let Some(ctx) = self.ngrams.get(h) {
                    backoff_sum += ctx.backoff;
                }
            }
        }
        backoff_sum + OOV_LOG_PROB
    }

    /// Есть ли у слова униграмма.
    pub fn has_unigram(&self, word: WordId) -> bool {
        self.ngrams.contains_key(&[word][..])
    }

    /// Перекрёстная проверка словаря: каждое слово (кроме перечисленных
    /// в `skip`) должно иметь униграмму. Иначе — фатальная ошибка загрузки.
    pub fn check_vocabulary(&self, vocab: &Vocabulary, skip: &[WordId]) -> DecResult<()> {
        for (id, text) in vocab.iter() {
            if skip.contains(&id) {
                continue;
            }
            if !self.has_unigram(id) {
                return Err(DecError::LanguageModel(format!(
                    "word \"{text}\" has no unigram in the language model"
                )));
            }
        }
        Ok(())
    }
}

/// Усечённый суффикс истории длиной не более `len`.
pub fn truncate_history(history: &[WordId], len: usize) -> &[WordId] {
    if history.len() > len {
        &history[history.len() - len..]
    } else {
        history
    }
}
