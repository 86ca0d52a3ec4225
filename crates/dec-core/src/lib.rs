//! # dec-core
//!
//! Базовые типы, трейты и определения ошибок для RustDecoder.
//!
//! Этот крейт предоставляет фундаментальные абстракции для всех остальных
//! крейтов в workspace:
//!
//! - Общие типы данных (`WordId`, `StateId`, `RecognitionResult`, `WordAlign`)
//! - Конфигурация поиска (`DecoderConfig`, `LookaheadConfig`)
//! - Унифицированная обработка ошибок через `DecError`
//! - Trait [`Acoustics`] — источник покадровых акустических log-вероятностей

pub mod config;
pub mod debug;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{DecoderConfig, LookaheadConfig};
pub use error::{DecError, DecResult};
pub use traits::Acoustics;
pub use types::{RecognitionResult, StateId, WordAlign, WordId, NO_WORD};
