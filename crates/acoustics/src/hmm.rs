//! Набор HMM и чтение `.ph`-файла.
//!
//! Каждая HMM — лево-правая цепочка состояний. Состояние ссылается на
//! эмиссионное распределение (индекс значения в покадровом векторе
//! log-вероятностей) и несёт переходы с ln-вероятностями. Метки трифонов
//! имеют вид `l-c+r`, монофоны — просто `c`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use dec_core::{DecError, DecResult, StateId};

/// Целевой узел перехода внутри HMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmmTarget {
    /// Индекс состояния внутри той же HMM.
    State(usize),
    /// Выход из HMM (в следующий узел лексического дерева).
    Exit,
}

/// Переход из состояния HMM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmTransition {
    pub target: HmmTarget,
    /// Ln-вероятность перехода.
    pub log_prob: f32,
}

/// Состояние HMM.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmState {
    /// Индекс эмиссионного распределения.
    pub emission: StateId,
    /// Исходящие переходы.
    pub transitions: Vec<HmmTransition>,
}

/// Одна HMM (фонема в контексте).
#[derive(Debug, Clone, PartialEq)]
pub struct Hmm {
    pub label: String,
    pub states: Vec<HmmState>,
}

impl Hmm {
    /// Есть ли у метки трифонный контекст.
    pub fn is_triphone(&self) -> bool {
        self.label.contains('-') && self.label.contains('+')
    }
}

/// Метка трифона `l-c+r`.
pub fn triphone_label(left: &str, center: &str, right: &str) -> String {
    format!("{left}-{center}+{right}")
}

/// Набор HMM, проиндексированный по меткам.
///
/// Неизменяем после загрузки; разделяется между высказываниями через `Arc`.
#[derive(Debug, Default)]
pub struct HmmSet {
    hmms: Vec<Hmm>,
    by_label: HashMap<String, usize>,
    num_emissions: usize,
}

impl HmmSet {
    /// Пустой набор (для программной сборки в тестах).
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить HMM. Дубликат метки — ошибка.
    pub fn add_hmm(&mut self, hmm: Hmm) -> DecResult<usize> {
        if self.by_label.contains_key(&hmm.label) {
            return Err(DecError::Model(format!(
                "duplicate HMM label \"{}\"",
                hmm.label
            )));
        }
        if hmm.states.is_empty() {
            return Err(DecError::Model(format!(
                "HMM \"{}\" has no states",
                hmm.label
            )));
        }
        for (si, state) in hmm.states.iter().enumerate() {
            for t in &state.transitions {
                if let HmmTarget::State(idx) = t.target {
                    if idx >= hmm.states.len() {
                        return Err(DecError::Model(format!(
                            "HMM \"{}\" state {} has transition to missing state {}",
                            hmm.label, si, idx
                        )));
                    }
                }
            }
            self.num_emissions = self.num_emissions.max(state.emission as usize + 1);
        }
        let idx = self.hmms.len();
        self.by_label.insert(hmm.label.clone(), idx);
        self.hmms.push(hmm);
        Ok(idx)
    }

    /// Прочитать набор из `.ph`-файла.
    pub fn read(path: impl AsRef<Path>) -> DecResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            DecError::Model(format!("cannot open HMM file {}: {e}", path.display()))
        })?;
        let set = Self::read_from(BufReader::new(file))?;
        info!(
            "HMM set loaded: {} models, {} emission distributions ({})",
            set.len(),
            set.num_emissions(),
            path.display()
        );
        Ok(set)
    }

    /// Прочитать набор из текстового потока.
    ///
    /// Формат:
    /// ```text
    /// PH V1
    /// hmm <label> <num_states>
    /// <emission_id> <num_trans> (<target_index>|exit <ln_prob>)...
    /// ```
    pub fn read_from(reader: impl BufRead) -> DecResult<Self> {
        let mut lines = reader.lines();

        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| DecError::Model("empty HMM file".into()))?;
        if header.trim() != "PH V1" {
            return Err(DecError::Model(format!(
                "bad HMM file header: \"{}\"",
                header.trim()
            )));
        }

        let mut set = HmmSet::new();
        let mut lineno = 1usize;
        loop {
            let Some(line) = lines.next().transpose()? else {
                break;
            };
            lineno += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let kw = parts.next();
            if kw != Some("hmm") {
                return Err(DecError::Model(format!(
                    "line {lineno}: expected \"hmm\", got \"{line}\""
                )));
            }
            let label = parts
                .next()
                .ok_or_else(|| DecError::Model(format!("line {lineno}: missing HMM label")))?
                .to_string();
            let num_states: usize = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DecError::Model(format!("line {lineno}: bad state count")))?;

            let mut states = Vec::with_capacity(num_states);
            for _ in 0..num_states {
                let Some(state_line) = lines.next().transpose()? else {
                    return Err(DecError::Model(format!(
                        "HMM \"{label}\": unexpected end of file"
                    )));
                };
                lineno += 1;
                states.push(Self::parse_state(state_line.trim(), lineno)?);
            }
            set.add_hmm(Hmm { label, states })?;
        }

        if set.hmms.is_empty() {
            return Err(DecError::Model("HMM file contains no models".into()));
        }
        Ok(set)
    }

    fn parse_state(line: &str, lineno: usize) -> DecResult<HmmState> {
        let mut parts = line.split_whitespace();
        let emission: StateId = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecError::Model(format!("line {lineno}: bad emission id")))?;
        let num_trans: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecError::Model(format!("line {lineno}: bad transition count")))?;

        let mut transitions = Vec::with_capacity(num_trans);
        for _ in 0..num_trans {
            let target = match parts.next() {
                Some("exit") => HmmTarget::Exit,
                Some(s) => HmmTarget::State(s.parse().map_err(|_| {
                    DecError::Model(format!("line {lineno}: bad transition target \"{s}\""))
                })?),
                None => {
                    return Err(DecError::Model(format!(
                        "line {lineno}: truncated transition list"
                    )))
                }
            };
            let log_prob: f32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    DecError::Model(format!("line {lineno}: bad transition probability"))
                })?;
            if log_prob > 0.0 {
                return Err(DecError::Model(format!(
                    "line {lineno}: transition ln-probability {log_prob} > 0"
                )));
            }
            transitions.push(HmmTransition { target, log_prob });
        }
        Ok(HmmState {
            emission,
            transitions,
        })
    }

    /// Индекс HMM по метке.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.by_label.get(label).copied()
    }

    /// HMM по индексу.
    pub fn hmm(&self, index: usize) -> &Hmm {
        &self.hmms[index]
    }

    /// Количество HMM в наборе.
    pub fn len(&self) -> usize {
        self.hmms.len()
    }

    /// Пуст ли набор.
    pub fn is_empty(&self) -> bool {
        self.hmms.is_empty()
    }

    /// Количество эмиссионных распределений (минимальная длина вектора кадра).
    pub fn num_emissions(&self) -> usize {
        self.num_emissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
PH V1
hmm a 2
0 2 0 -0.105 1 -2.303
1 2 1 -0.105 exit -2.303
hmm s-a+t 2
2 2 0 -0.5 1 -0.9
3 2 1 -0.5 exit -0.9
";

    #[test]
    fn test_read_sample() {
        let set = HmmSet::read_from(SAMPLE.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.num_emissions(), 4);
        let a = set.hmm(set.index_of("a").unwrap());
        assert_eq!(a.states.len(), 2);
        assert_eq!(a.states[0].emission, 0);
        assert_eq!(a.states[1].transitions[1].target, HmmTarget::Exit);
        assert!(!a.is_triphone());
        assert!(set.hmm(set.index_of("s-a+t").unwrap()).is_triphone());
    }

    #[test]
    fn test_bad_header_is_fatal() {
        let err = HmmSet::read_from("HTK\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DecError::Model(_)));
    }

    #[test]
    fn test_duplicate_label_is_fatal() {
        let text = "PH V1\nhmm a 1\n0 1 exit -0.1\nhmm a 1\n1 1 exit -0.1\n";
        assert!(HmmSet::read_from(text.as_bytes()).is_err());
    }

    #[test]
    fn test_transition_to_missing_state_is_fatal() {
        let text = "PH V1\nhmm a 1\n0 1 5 -0.1\n";
        assert!(HmmSet::read_from(text.as_bytes()).is_err());
    }

    #[test]
    fn test_triphone_label_format() {
        assert_eq!(triphone_label("s", "a", "t"), "s-a+t");
    }
}
