//! Цепочка back-pointer'ов по словам.
//!
//! Каждый токен держит `Arc` на последний завершённый узел истории;
//! общие префиксы гипотез разделяются. Идентификаторы узлов уникальны
//! в пределах высказывания и детерминированы, решётка ссылается на них.

use std::sync::Arc;

use dec_core::{WordId, NO_WORD};

/// Узел истории: одно завершённое слово.
#[derive(Debug)]
pub struct WordHistory {
    /// Завершённое слово (`NO_WORD` у корневого узла без маркера начала).
    pub word: WordId,

    /// Кадр, на котором слово началось (после возможной тишины).
    pub start_frame: usize,

    /// Кадр, на котором слово закончилось (исключительно).
    pub end_frame: usize,

    /// Языковой вклад слова (ln, со всеми масштабами и штрафами).
    pub lm_score: f32,

    /// Акустический вклад слова (ln, включая длительности и произношение).
    pub ac_score: f32,

    /// Полная оценка токена в момент завершения слова.
    pub total_score: f32,

    /// Уникальный детерминированный идентификатор узла.
    pub id: u64,

    /// Предыдущее слово.
    pub prev: Option<Arc<WordHistory>>,
}

impl WordHistory {
    /// Корневой узел истории в начале высказывания.
    ///
    /// `word` — маркер начала предложения, если словарь его знает.
    pub fn root(word: WordId) -> Arc<Self> {
        Arc::new(Self {
            word,
            start_frame: 0,
            end_frame: 0,
            lm_score: 0.0,
            ac_score: 0.0,
            total_score: 0.0,
            id: 0,
            prev: None,
        })
    }

    /// Последние `len` слов истории (включая маркер начала), старые первыми.
    ///
    /// `NO_WORD`-узлы пропускаются.
    pub fn last_words(self: &Arc<Self>, len: usize) -> Vec<WordId> {
        let mut out = Vec::with_capacity(len);
        let mut cur = Some(self);
        while let Some(node) = cur {
            if out.len() >= len {
                break;
            }
            if node.word != NO_WORD {
                out.push(node.word);
            }
            cur = node.prev.as_ref();
        }
        out.reverse();
        out
    }

    /// Вся цепочка от корня к текущему узлу.
    pub fn chain(self: &Arc<Self>) -> Vec<Arc<Self>> {
        let mut out = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(node) = cur {
            cur = node.prev.clone();
            out.push(node);
        }
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(prev: &Arc<WordHistory>, word: WordId, id: u64) -> Arc<WordHistory> {
        Arc::new(WordHistory {
            word,
            start_frame: id as usize,
            end_frame: id as usize,
            lm_score: 0.0,
            ac_score: 0.0,
            total_score: 0.0,
            id,
            prev: Some(prev.clone()),
        })
    }

    #[test]
    fn test_last_words_suffix() {
        let root = WordHistory::root(100);
        let a = push(&root, 1, 1);
        let b = push(&a, 2, 2);
        let c = push(&b, 3, 3);
        assert_eq!(c.last_words(2), vec![2, 3]);
        assert_eq!(c.last_words(10), vec![100, 1, 2, 3]);
    }

    #[test]
    fn test_last_words_skips_no_word_root() {
        let root = WordHistory::root(NO_WORD);
        let a = push(&root, 5, 1);
        assert_eq!(a.last_words(10), vec![5]);
    }

    #[test]
    fn test_chain_order() {
        let root = WordHistory::root(NO_WORD);
        let a = push(&root, 1, 1);
        let b = push(&a, 2, 2);
        let ids: Vec<u64> = b.chain().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
