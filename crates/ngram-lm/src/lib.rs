//! Языковая модель декодера.
//!
//! - [`NgramLm`] — back-off n-граммная модель из ARPA-файла, оценки в ln
//! - [`LmLookahead`] — быстрая верхняя оценка по младшей модели для ранней
//!   обрезки, с ограниченными буферами на узел дерева

pub mod lookahead;
pub mod model;

pub use lookahead::LmLookahead;
pub use model::NgramLm;
