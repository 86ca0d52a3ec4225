//! Лексикон: словарь, произношения и префиксное дерево поиска.
//!
//! - [`Vocabulary`] — отображение слово ↔ id, маркеры границ предложения
//! - [`read_lexicon`] — чтение `.lex`-файла (`word(prior) ph1 ph2 ...`)
//! - [`LexPrefixTree`] — фонемное дерево с трифонными контекстами,
//!   межсловным fan-out и узлами тишины

pub mod reader;
pub mod tree;
pub mod vocabulary;

pub use reader::{read_lexicon, read_lexicon_from, LexEntry};
pub use tree::{LexPrefixTree, LexiconOptions, NodeId, TreeNode, WordEnd, SIL_CTX};
pub use vocabulary::Vocabulary;
