//! Загрузка комплекта моделей один раз на сессию.
//!
//! Любая ошибка загрузки фатальна: сессия без полного комплекта моделей не
//! создаётся. После загрузки все модели неизменяемы и разделяются между
//! высказываниями через `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use acoustics::{DurationModel, HmmSet};
use dec_core::{DecResult, DecoderConfig};
use lexicon::{read_lexicon, LexPrefixTree, LexiconOptions, Vocabulary};
use ngram_lm::NgramLm;
use tp_search::SearchModels;

/// Маркеры границ предложения по умолчанию.
pub const SENTENCE_START: &str = "<s>";
pub const SENTENCE_END: &str = "</s>";

/// Пути к файлам моделей одной сессии.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPaths {
    /// Набор HMM (`.ph`).
    pub hmm: PathBuf,

    /// Модель длительностей (`.dur`); без неё длительности не штрафуются.
    #[serde(default)]
    pub duration: Option<PathBuf>,

    /// Словарь произношений (`.lex`).
    pub lexicon: PathBuf,

    /// Основная n-граммная модель (ARPA).
    pub lm: PathBuf,

    /// Младшая модель для LM-lookahead (ARPA).
    #[serde(default)]
    pub lookahead_lm: Option<PathBuf>,

    /// Слово словаря, считающееся тишиной.
    #[serde(default)]
    pub silence_word: Option<String>,

    /// Метка HMM необязательной короткой тишины.
    #[serde(default)]
    pub short_silence_hmm: Option<String>,
}

/// Загруженный комплект моделей.
pub struct ModelBundle {
    pub hmms: Arc<HmmSet>,
    pub durations: Arc<DurationModel>,
    pub vocab: Arc<Vocabulary>,
    pub tree: Arc<LexPrefixTree>,
    pub lm: Arc<NgramLm>,
    pub lookahead_lm: Option<Arc<NgramLm>>,
}

impl ModelBundle {
    /// Загрузить все модели. Любая ошибка фатальна для сессии.
    pub fn load(paths: &ModelPaths, cfg: &DecoderConfig) -> DecResult<Self> {
        cfg.validate()?;

        let hmms = HmmSet::read(&paths.hmm)?;
        let durations = match &paths.duration {
            Some(p) => DurationModel::read(p)?,
            None => DurationModel::empty(),
        };

        let entries = read_lexicon(&paths.lexicon)?;
        let mut vocab = Vocabulary::new();
        vocab.set_sentence_boundary(SENTENCE_START, SENTENCE_END)?;
        let opts = LexiconOptions {
            silence_word: paths.silence_word.clone(),
            silence_is_word: cfg.silence_is_word,
            cross_word_triphones: cfg.cross_word_triphones,
            short_silence_hmm: if cfg.optional_short_silence {
                paths.short_silence_hmm.clone()
            } else {
                None
            },
            lookahead_depth: if cfg.lm_lookahead {
                cfg.lookahead.max_depth
            } else {
                0
            },
        };
        let tree = LexPrefixTree::build(&entries, &mut vocab, &hmms, &opts)?;

        let lm = NgramLm::read(&paths.lm, &vocab)?;
        // У каждого слова словаря должна быть хотя бы униграмма; тишина,
        // не являющаяся словом, в языковой модели не участвует.
        let mut skip = Vec::new();
        if !cfg.silence_is_word {
            if let Some(sil) = paths.silence_word.as_deref().and_then(|w| vocab.id(w)) {
                skip.push(sil);
            }
        }
        lm.check_vocabulary(&vocab, &skip)?;

        let lookahead_lm = match &paths.lookahead_lm {
            Some(p) => Some(Arc::new(NgramLm::read(p, &vocab)?)),
            None => None,
        };

        info!(
            "model bundle ready: {} HMMs, {} words, {} tree nodes, LM order {}",
            hmms.len(),
            vocab.len(),
            tree.num_nodes(),
            lm.order()
        );

        Ok(Self {
            hmms: Arc::new(hmms),
            durations: Arc::new(durations),
            vocab: Arc::new(vocab),
            tree: Arc::new(tree),
            lm: Arc::new(lm),
            lookahead_lm,
        })
    }

    /// Модели в виде, который потребляет поиск.
    pub fn search_models(&self) -> SearchModels {
        SearchModels {
            hmms: self.hmms.clone(),
            durations: self.durations.clone(),
            tree: self.tree.clone(),
            vocab: self.vocab.clone(),
            lm: self.lm.clone(),
            lookahead_lm: self.lookahead_lm.clone(),
        }
    }
}
