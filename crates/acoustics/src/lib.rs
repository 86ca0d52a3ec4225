//! Акустическая сторона декодера.
//!
//! - [`HmmSet`] — набор трифонных HMM из `.ph`-файла
//! - [`DurationModel`] — гамма-модель длительностей состояний из `.dur`-файла
//! - [`LnaReader`] / [`LnaWriter`] — покадровые log-вероятности (LNA-формат)
//! - [`OneFrameAcoustics`] — инъекция кадров из памяти (тесты)
//! - [`FrameScorer`] — мемоизация оценок в пределах кадра

pub mod duration;
pub mod hmm;
pub mod lna;
pub mod scorer;

pub use duration::DurationModel;
pub use hmm::{Hmm, HmmSet, HmmState, HmmTarget, HmmTransition};
pub use lna::{LnaReader, LnaWriter, OneFrameAcoustics};
pub use scorer::FrameScorer;
