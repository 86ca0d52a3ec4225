//! Сессия распознавания: загруженные модели плюс конфигурация поиска.
//!
//! Высказывание декодируется последовательно, батч — параллельно по
//! высказываниям (rayon). Ошибки уровня высказывания логируются с его
//! идентификатором и не прерывают батч.

use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};

use acoustics::LnaReader;
use dec_core::{Acoustics, DecResult, DecoderConfig, RecognitionResult};
use lexicon::Vocabulary;
use tp_search::{TokenPassSearch, WordGraph};

use crate::bundle::ModelBundle;
use crate::recipe::RecipeEntry;

/// Результат одного высказывания.
pub struct UtteranceOutcome {
    pub id: String,
    pub result: RecognitionResult,
    /// Словный граф, если включён `generate_word_graph`.
    pub lattice: Option<WordGraph>,
}

/// Сессия: неизменяемые модели и конфигурация, живущие дольше высказываний.
pub struct Session {
    bundle: ModelBundle,
    config: DecoderConfig,
}

impl Session {
    /// Создать сессию из загруженного комплекта моделей.
    pub fn new(bundle: ModelBundle, config: DecoderConfig) -> DecResult<Self> {
        config.validate()?;
        Ok(Self { bundle, config })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.bundle.vocab
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    /// Распознать одно высказывание из произвольного источника акустики.
    pub fn recognize(
        &self,
        id: &str,
        acoustics: Box<dyn Acoustics>,
    ) -> DecResult<UtteranceOutcome> {
        let mut search =
            TokenPassSearch::new(self.bundle.search_models(), self.config.clone(), acoustics)?;
        let (result, lattice) = search.decode()?;
        info!(
            utterance = id,
            frames = result.frames,
            score = result.score,
            "decoded: {}",
            result.text()
        );
        Ok(UtteranceOutcome {
            id: id.to_string(),
            result,
            lattice,
        })
    }

    /// Распознать высказывание из LNA-файла.
    pub fn recognize_lna(&self, id: &str, path: impl AsRef<Path>) -> DecResult<UtteranceOutcome> {
        let reader = LnaReader::open(path)?;
        self.recognize(id, Box::new(reader))
    }

    /// Распознать батч рецепта, по высказыванию на rayon-задачу.
    ///
    /// Модели разделяются только на чтение; поиск, кэш оценок и
    /// lookahead-буферы у каждого высказывания свои. Ошибка одного
    /// высказывания не прерывает остальные.
    pub fn recognize_batch(
        &self,
        entries: &[RecipeEntry],
    ) -> Vec<(String, DecResult<UtteranceOutcome>)> {
        entries
            .par_iter()
            .map(|entry| {
                let id = entry.id();
                let outcome = self.recognize_lna(&id, &entry.lna);
                if let Err(e) = &outcome {
                    warn!(utterance = %id, "decoding failed: {e}");
                }
                (id, outcome)
            })
            .collect()
    }
}
