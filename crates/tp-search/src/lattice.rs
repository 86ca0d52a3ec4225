//! Словный граф (решётка) и сериализация в HTK SLF.
//!
//! Дуги пишутся во время поиска в момент завершения слова, до рекомбинации,
//! поэтому конкурирующие гипотезы концов слов сохраняются. Узлы графа —
//! узлы истории; при построении граф обрезается до дуг, с которых достижим
//! хотя бы один финальный узел.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use dec_core::{DecError, DecResult, WordId};
use lexicon::Vocabulary;

/// Кадровая частота выходных времён SLF (стандартный шаг 10 мс).
const FRAMES_PER_SECOND: f32 = 100.0;

/// Одна дуга словного графа: гипотеза слова с временными границами.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeArc {
    /// Узел истории перед словом.
    pub src: u64,
    /// Узел истории после слова.
    pub dst: u64,
    pub word: WordId,
    pub start_frame: usize,
    pub end_frame: usize,
    /// Акустическая составляющая (ln).
    pub ac_score: f32,
    /// Языковая составляющая (ln, с масштабом).
    pub lm_score: f32,
}

/// Словный граф одного высказывания.
///
/// Детерминирован при фиксированной трассе поиска.
#[derive(Debug)]
pub struct WordGraph {
    /// (id узла истории, кадр) в порядке возрастания id.
    nodes: Vec<(u64, usize)>,
    arcs: Vec<LatticeArc>,
    finals: Vec<u64>,
    num_frames: usize,
}

impl WordGraph {
    /// Построить граф из записанных дуг, оставив только пути к финалам.
    pub fn build(all_arcs: &[LatticeArc], finals: &[u64], num_frames: usize) -> Self {
        // Обратная достижимость от финальных узлов.
        let mut by_dst: HashMap<u64, Vec<usize>> = HashMap::new();
        for (i, arc) in all_arcs.iter().enumerate() {
            by_dst.entry(arc.dst).or_default().push(i);
        }

        let mut reachable: HashSet<u64> = HashSet::new();
        let mut stack: Vec<u64> = finals.to_vec();
        let mut kept_idx: Vec<usize> = Vec::new();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(arc_ids) = by_dst.get(&id) {
                for &i in arc_ids {
                    kept_idx.push(i);
                    stack.push(all_arcs[i].src);
                }
            }
        }
        kept_idx.sort_unstable();
        kept_idx.dedup();

        let mut arcs: Vec<LatticeArc> = kept_idx.iter().map(|&i| all_arcs[i].clone()).collect();
        arcs.dedup();

        // Узлы: все концы дуг плюс финалы; время узла — конец входящей дуги.
        let mut times: HashMap<u64, usize> = HashMap::new();
        times.insert(0, 0);
        for arc in &arcs {
            times.entry(arc.src).or_insert(arc.start_frame);
            times.insert(arc.dst, arc.end_frame);
        }
        for &f in finals {
            times.entry(f).or_insert(num_frames);
        }
        let mut nodes: Vec<(u64, usize)> = times.into_iter().collect();
        nodes.sort_unstable();

        let mut finals: Vec<u64> = finals.to_vec();
        finals.sort_unstable();
        finals.dedup();

        WordGraph {
            nodes,
            arcs,
            finals,
            num_frames,
        }
    }

    /// Количество узлов (без виртуального конечного).
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Количество словных дуг.
    pub fn num_arcs(&self) -> usize {
        self.arcs.len()
    }

    /// Дуги графа.
    pub fn arcs(&self) -> &[LatticeArc] {
        &self.arcs
    }

    /// Записать граф в формате HTK SLF.
    ///
    /// Финальные узлы связываются `!NULL`-дугами с виртуальным конечным
    /// узлом, чтобы у решётки был единственный конец.
    pub fn write_slf(
        &self,
        out: &mut impl Write,
        utterance: &str,
        vocab: &Vocabulary,
        lm_scale: f32,
        insertion_penalty: f32,
    ) -> DecResult<()> {
        let index: HashMap<u64, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, &(id, _))| (id, i))
            .collect();
        let end_node = self.nodes.len();
        let num_nodes = end_node + 1;
        let num_links = self.arcs.len() + self.finals.len();

        writeln!(out, "VERSION=1.1")?;
        writeln!(out, "UTTERANCE={utterance}")?;
        writeln!(out, "lmscale={lm_scale:.2} wdpenalty={insertion_penalty:.2}")?;
        writeln!(out, "N={num_nodes} L={num_links}")?;

        for (i, &(_, frame)) in self.nodes.iter().enumerate() {
            writeln!(out, "I={i} t={:.2}", frame as f32 / FRAMES_PER_SECOND)?;
        }
        writeln!(
            out,
            "I={end_node} t={:.2}",
            self.num_frames as f32 / FRAMES_PER_SECOND
        )?;

        for (j, arc) in self.arcs.iter().enumerate() {
            let s = index.get(&arc.src).copied().ok_or_else(|| {
                DecError::Lattice(format!("arc source {} has no node", arc.src))
            })?;
            let e = index.get(&arc.dst).copied().ok_or_else(|| {
                DecError::Lattice(format!("arc target {} has no node", arc.dst))
            })?;
            writeln!(
                out,
                "J={j} S={s} E={e} W={} v=0 a={:.4} l={:.4}",
                vocab.word(arc.word),
                arc.ac_score,
                arc.lm_score
            )?;
        }
        for (k, f) in self.finals.iter().enumerate() {
            let s = index
                .get(f)
                .copied()
                .ok_or_else(|| DecError::Lattice(format!("final {f} has no node")))?;
            writeln!(
                out,
                "J={} S={s} E={end_node} W=!NULL v=0 a=0.0000 l=0.0000",
                self.arcs.len() + k
            )?;
        }
        Ok(())
    }

    /// Граф как SLF-строка (сравнения и тесты).
    pub fn to_slf_string(
        &self,
        utterance: &str,
        vocab: &Vocabulary,
        lm_scale: f32,
        insertion_penalty: f32,
    ) -> DecResult<String> {
        let mut buf = Vec::new();
        self.write_slf(&mut buf, utterance, vocab, lm_scale, insertion_penalty)?;
        String::from_utf8(buf).map_err(|e| DecError::Lattice(format!("non-utf8 lattice: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc(src: u64, dst: u64, word: WordId, start: usize, end: usize) -> LatticeArc {
        LatticeArc {
            src,
            dst,
            word,
            start_frame: start,
            end_frame: end,
            ac_score: -10.0,
            lm_score: -1.0,
        }
    }

    fn vocab() -> Vocabulary {
        let mut v = Vocabulary::new();
        v.add_word("yes");
        v.add_word("no");
        v
    }

    #[test]
    fn test_coaccessibility_pruning() {
        // 0 -> 1 -> 2 (финал), 0 -> 3 (тупик).
        let arcs = vec![
            arc(0, 1, 0, 0, 5),
            arc(1, 2, 1, 5, 10),
            arc(0, 3, 1, 0, 7),
        ];
        let graph = WordGraph::build(&arcs, &[2], 10);
        assert_eq!(graph.num_arcs(), 2);
        assert!(graph.arcs().iter().all(|a| a.dst != 3));
    }

    #[test]
    fn test_alternatives_survive() {
        // Две конкурирующие дуги в один финал.
        let arcs = vec![arc(0, 1, 0, 0, 10), arc(0, 2, 1, 0, 10)];
        let graph = WordGraph::build(&arcs, &[1, 2], 10);
        assert_eq!(graph.num_arcs(), 2);
    }

    #[test]
    fn test_slf_output_shape() {
        let arcs = vec![arc(0, 1, 0, 0, 5), arc(1, 2, 1, 5, 10)];
        let graph = WordGraph::build(&arcs, &[2], 10);
        let slf = graph
            .to_slf_string("utt1", &vocab(), 30.0, 0.0)
            .unwrap();

        assert!(slf.starts_with("VERSION=1.1\nUTTERANCE=utt1\n"));
        assert!(slf.contains("N=4 L=3"));
        assert!(slf.contains("W=yes"));
        assert!(slf.contains("W=no"));
        assert!(slf.contains("W=!NULL"));
        // Время конца высказывания на виртуальном узле.
        assert!(slf.contains("t=0.10"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let arcs = vec![
            arc(0, 1, 0, 0, 5),
            arc(0, 2, 1, 0, 5),
            arc(1, 3, 1, 5, 10),
            arc(2, 3, 0, 5, 10),
        ];
        let a = WordGraph::build(&arcs, &[3], 10)
            .to_slf_string("u", &vocab(), 30.0, 0.0)
            .unwrap();
        let b = WordGraph::build(&arcs, &[3], 10)
            .to_slf_string("u", &vocab(), 30.0, 0.0)
            .unwrap();
        assert_eq!(a, b);
    }
}
