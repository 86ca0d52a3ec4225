//! Конфигурация поиска.
//!
//! Все параметры обрезки и масштабы оценок в одном месте. Значения по
//! умолчанию соответствуют рабочей настройке 3-граммной морфной модели:
//! глобальный луч 400, луч концов слов 2/3 глобального, лимит токенов 30000.

use serde::{Deserialize, Serialize};

use crate::error::{DecError, DecResult};

/// Параметры LM-lookahead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookaheadConfig {
    /// Минимальное улучшение кэшированной оценки, при котором буфер
    /// обновляется. Меньшие дельты оставляют старую оценку.
    pub min_delta: f32,

    /// Максимальная глубина узла дерева, для которой lookahead
    /// вычисляется и кэшируется.
    pub max_depth: usize,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            min_delta: 0.0,
            max_depth: 4,
        }
    }
}

/// Конфигурация token-passing поиска.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Глобальный луч: токены хуже лучшего более чем на эту величину (ln)
    /// отбрасываются.
    pub global_beam: f32,

    /// Отдельный, более узкий луч для токенов на границе слова.
    pub word_end_beam: f32,

    /// Абсолютный потолок количества живых токенов после обрезки.
    pub token_limit: usize,

    /// Глубина суффикса истории при рекомбинации. Должна быть не меньше
    /// порядка n-граммной модели.
    pub prune_similar: usize,

    /// Масштаб языковой оценки.
    pub lm_scale: f32,

    /// Масштаб переходных вероятностей HMM.
    pub transition_scale: f32,

    /// Масштаб штрафа модели длительностей.
    pub duration_scale: f32,

    /// Штраф за вставку слова (прибавляется на каждой границе слова).
    pub insertion_penalty: f32,

    /// Тишина — полноценное слово (морфные модели).
    pub silence_is_word: bool,

    /// Межсловные трифоны: контекст фонемы пересекает границу слова.
    pub cross_word_triphones: bool,

    /// Необязательная короткая тишина между словами.
    pub optional_short_silence: bool,

    /// Требовать маркер конца предложения в конце высказывания.
    pub require_sentence_end: bool,

    /// Строить словный граф (решётку) во время поиска.
    pub generate_word_graph: bool,

    /// Включить LM-lookahead.
    pub lm_lookahead: bool,

    /// Параметры lookahead-буферов.
    pub lookahead: LookaheadConfig,

    /// Символ границы слова для морфных моделей (например "<w>").
    pub word_boundary: Option<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let global_beam = 400.0;
        Self {
            global_beam,
            word_end_beam: global_beam * 2.0 / 3.0,
            token_limit: 30_000,
            prune_similar: 3,
            lm_scale: 30.0,
            transition_scale: 1.0,
            duration_scale: 3.0,
            insertion_penalty: 0.0,
            silence_is_word: false,
            cross_word_triphones: false,
            optional_short_silence: false,
            require_sentence_end: false,
            generate_word_graph: false,
            lm_lookahead: false,
            lookahead: LookaheadConfig::default(),
            word_boundary: None,
        }
    }
}

impl DecoderConfig {
    /// Загрузить конфигурацию из JSON-файла.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> DecResult<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: DecoderConfig = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Проверка согласованности параметров.
    pub fn validate(&self) -> DecResult<()> {
        if self.global_beam <= 0.0 {
            return Err(DecError::Config(format!(
                "global_beam must be positive, got {}",
                self.global_beam
            )));
        }
        if self.word_end_beam <= 0.0 {
            return Err(DecError::Config(format!(
                "word_end_beam must be positive, got {}",
                self.word_end_beam
            )));
        }
        if self.token_limit == 0 {
            return Err(DecError::Config("token_limit must be at least 1".into()));
        }
        if self.prune_similar == 0 {
            return Err(DecError::Config("prune_similar must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = DecoderConfig::default();
        assert_eq!(cfg.global_beam, 400.0);
        assert!((cfg.word_end_beam - 400.0 * 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(cfg.token_limit, 30_000);
        assert_eq!(cfg.prune_similar, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_beam() {
        let cfg = DecoderConfig {
            global_beam: 0.0,
            ..DecoderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_token_limit() {
        let cfg = DecoderConfig {
            token_limit: 0,
            ..DecoderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = DecoderConfig {
            lm_scale: 25.0,
            generate_word_graph: true,
            word_boundary: Some("<w>".to_string()),
            ..DecoderConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: DecoderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
