//! Сессия распознавания поверх token-passing декодера.
//!
//! - [`ModelPaths`] / [`ModelBundle`] — загрузка комплекта моделей один раз
//!   на сессию (HMM, длительности, словарь, дерево, LM, lookahead-LM)
//! - [`Session`] — распознавание высказываний и батчей (rayon)
//! - [`read_recipe`] — рецепты `audio=… lna=… [transcript=…]`
//! - [`read_nbest_gz`] / [`confidence_margin`] — пост-обработка N-best

pub mod bundle;
pub mod nbest;
pub mod recipe;
pub mod session;

pub use bundle::{ModelBundle, ModelPaths, SENTENCE_END, SENTENCE_START};
pub use nbest::{confidence_margin, logsumexp, read_nbest_from, read_nbest_gz, NbestHypothesis};
pub use recipe::{read_recipe, read_recipe_from, RecipeEntry};
pub use session::{Session, UtteranceOutcome};
