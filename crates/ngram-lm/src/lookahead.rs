//! LM-lookahead: быстрая верхняя оценка языковой вероятности.
//!
//! До того как слово дочитано до конца, токену внутри дерева начисляется
//! оптимистичная оценка — максимум по словам, достижимым через узел,
//! вероятности по *младшей* модели (например, биграммной при основной
//! триграммной). На границе слова оценка снимается и заменяется точной.
//!
//! Оценки кэшируются в ограниченных буферах на узел: не более `max_depth`
//! историй на буфер, FIFO-вытеснение; `min_delta` подавляет вставку
//! записей, почти не отличающихся от уже закэшированных.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dec_core::config::LookaheadConfig;
use dec_core::WordId;

use crate::model::{truncate_history, NgramLm};

#[derive(Debug, Default)]
struct NodeBuffer {
    /// (ключ истории, оценка), от старых к новым.
    entries: VecDeque<(u64, f32)>,
}

/// Lookahead-модель с буферами на узел лексического дерева.
///
/// Кэш принадлежит одному поиску (высказыванию); сама модель разделяется.
pub struct LmLookahead {
    lm: Arc<NgramLm>,
    min_delta: f32,
    max_entries: usize,
    buffers: Vec<NodeBuffer>,
}

impl LmLookahead {
    /// Создать lookahead для дерева из `num_nodes` узлов.
    pub fn new(lm: Arc<NgramLm>, num_nodes: usize, cfg: &LookaheadConfig) -> Self {
        let mut buffers = Vec::with_capacity(num_nodes);
        buffers.resize_with(num_nodes, NodeBuffer::default);
        Self {
            lm,
            min_delta: cfg.min_delta,
            max_entries: cfg.max_depth.max(1),
            buffers,
        }
    }

    /// Порядок lookahead-модели.
    pub fn order(&self) -> usize {
        self.lm.order()
    }

    /// Верхняя оценка: максимум ln P(w | history) по словам узла.
    ///
    /// `words` — список слов, достижимых через узел (из дерева).
    /// Пустой список — оценка 0 (lookahead не применяется).
    pub fn best_score(&mut self, node: usize, history: &[WordId], words: &[WordId]) -> f32 {
        if words.is_empty() {
            return 0.0;
        }
        let hist = truncate_history(history, self.lm.order().saturating_sub(1));
        let key = hash_history(hist);

        let buffer = &mut self.buffers[node];
        if let Some(&(_, score)) = buffer.entries.iter().find(|(k, _)| *k == key) {
            return score;
        }

        let mut best = f32::NEG_INFINITY;
        for &w in words {
            let s = self.lm.score(hist, w);
            if s > best {
                best = s;
            }
        }

        // Почти совпадающая запись уже есть: не плодим дубликаты в буфере.
        let near_duplicate = self
            .buffers[node]
            .entries
            .iter()
            .any(|&(_, s)| (s - best).abs() <= self.min_delta && self.min_delta > 0.0);
        if !near_duplicate {
            let buffer = &mut self.buffers[node];
            if buffer.entries.len() >= self.max_entries {
                buffer.entries.pop_front();
            }
            buffer.entries.push_back((key, best));
        }
        best
    }
}

fn hash_history(hist: &[WordId]) -> u64 {
    let mut h = DefaultHasher::new();
    hist.hash(&mut h);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexicon::Vocabulary;

    const ARPA: &str = "\
\\data\\
ngram 1=4

\\1-grams:
-1.0 <s>
-0.3010 yes
-0.6990 no
-1.0 </s>

\\end\\
";

    fn toy() -> (Arc<NgramLm>, Vocabulary) {
        let mut vocab = Vocabulary::new();
        vocab.set_sentence_boundary("<s>", "</s>").unwrap();
        vocab.add_word("yes");
        vocab.add_word("no");
        let lm = NgramLm::read_from(ARPA.as_bytes(), &vocab).unwrap();
        (Arc::new(lm), vocab)
    }

    #[test]
    fn test_upper_bound_over_node_words() {
        let (lm, v) = toy();
        let yes = v.id("yes").unwrap();
        let no = v.id("no").unwrap();
        let mut la = LmLookahead::new(lm.clone(), 4, &LookaheadConfig::default());

        let best = la.best_score(0, &[], &[yes, no]);
        assert!((best - lm.score(&[], yes)).abs() < 1e-6);
        assert!(best >= lm.score(&[], no));
    }

    #[test]
    fn test_cache_is_stable() {
        let (lm, v) = toy();
        let yes = v.id("yes").unwrap();
        let mut la = LmLookahead::new(lm, 4, &LookaheadConfig::default());
        let a = la.best_score(2, &[], &[yes]);
        let b = la.best_score(2, &[], &[yes]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let (lm, v) = toy();
        let yes = v.id("yes").unwrap();
        let no = v.id("no").unwrap();
        let cfg = LookaheadConfig {
            min_delta: 0.0,
            max_depth: 2,
        };
        let mut la = LmLookahead::new(lm, 1, &cfg);
        // Больше историй, чем глубина буфера.
        for hist in [&[yes][..], &[no][..], &[yes, no][..], &[no, yes][..]] {
            la.best_score(0, hist, &[yes, no]);
        }
        assert!(la.buffers[0].entries.len() <= 2);
    }

    #[test]
    fn test_empty_word_list_scores_zero() {
        let (lm, _) = toy();
        let mut la = LmLookahead::new(lm, 1, &LookaheadConfig::default());
        assert_eq!(la.best_score(0, &[], &[]), 0.0);
    }
}
