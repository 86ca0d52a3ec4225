//! Общие типы для декодирования.
//!
//! Содержит идентификаторы слов и состояний, результат распознавания
//! и повсловное временное выравнивание.

use serde::{Deserialize, Serialize};

/// Индекс слова (или морфа) в словаре.
pub type WordId = u32;

/// Индекс эмиссионного распределения в акустической модели.
/// Совпадает с позицией значения в покадровом векторе log-вероятностей.
pub type StateId = u32;

/// Маркер «нет слова» (корень дерева, внутрисловные узлы).
pub const NO_WORD: WordId = u32::MAX;

// ---------------------------------------------------------------------------
// Результат распознавания
// ---------------------------------------------------------------------------

/// Одно слово лучшего пути с временными границами и компонентами оценки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlign {
    /// Слово (текстовая форма из словаря).
    pub word: String,

    /// Первый кадр слова (включительно).
    pub start_frame: usize,

    /// Последний кадр слова (исключительно).
    pub end_frame: usize,

    /// Акустическая составляющая (ln), накопленная внутри слова.
    pub ac_score: f32,

    /// Языковая составляющая (ln, уже умноженная на lm_scale).
    pub lm_score: f32,
}

/// Результат распознавания одного высказывания.
///
/// Получается из цепочки back-pointer'ов лучшего токена в конце поиска.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Лучший путь: слова по порядку (без маркеров предложения).
    pub words: Vec<WordAlign>,

    /// Суммарная оценка лучшего токена (ln).
    pub score: f32,

    /// Количество обработанных кадров.
    pub frames: usize,
}

impl RecognitionResult {
    /// Текст лучшего пути: слова через пробел.
    pub fn text(&self) -> String {
        let strs: Vec<&str> = self.words.iter().map(|w| w.word.as_str()).collect();
        strs.join(" ")
    }

    /// Текст для морфных моделей: единицы склеиваются, символ границы
    /// слова превращается в пробел.
    pub fn text_with_word_boundary(&self, boundary: &str) -> String {
        let mut out = String::new();
        for w in &self.words {
            if w.word == boundary {
                out.push(' ');
            } else {
                out.push_str(&w.word);
            }
        }
        out.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn align(word: &str) -> WordAlign {
        WordAlign {
            word: word.to_string(),
            start_frame: 0,
            end_frame: 1,
            ac_score: 0.0,
            lm_score: 0.0,
        }
    }

    #[test]
    fn test_text_join() {
        let r = RecognitionResult {
            words: vec![align("yes"), align("no")],
            score: -1.0,
            frames: 10,
        };
        assert_eq!(r.text(), "yes no");
    }

    #[test]
    fn test_text_with_word_boundary() {
        let r = RecognitionResult {
            words: vec![align("auto"), align("<w>"), align("talo"), align("ssa")],
            score: -1.0,
            frames: 10,
        };
        assert_eq!(r.text_with_word_boundary("<w>"), "auto talossa");
    }
}
