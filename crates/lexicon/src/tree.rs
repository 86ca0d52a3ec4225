//! Лексическое префиксное дерево с трифонными контекстами.
//!
//! Слова с общим началом делят узлы; каждый узел — фонема в контексте,
//! привязанная к HMM из набора. На границах слов контекст по умолчанию —
//! тишина (`_`). При включённых межсловных трифонах последняя фонема слова
//! размножается по возможным первым фонемам следующего слова (fan-out),
//! а входные узлы — по последним фонемам предыдущего (fan-in).
//!
//! Тишина моделируется отдельной цепочкой узлов вне дерева: она входима
//! после любого слова, сбрасывает межсловный контекст и, в зависимости от
//! настройки, либо является полноценным словом, либо не порождает слова.

use std::collections::HashMap;

use tracing::{debug, info};

use acoustics::HmmSet;
use dec_core::{DecError, DecResult, WordId, NO_WORD};

use crate::reader::LexEntry;
use crate::vocabulary::Vocabulary;

/// Контекстный символ тишины на границах слов.
pub const SIL_CTX: &str = "_";

/// Индекс узла дерева.
pub type NodeId = usize;

/// Настройки построения дерева.
#[derive(Debug, Clone, Default)]
pub struct LexiconOptions {
    /// Слово словаря, считающееся тишиной (например "_" или "sil").
    pub silence_word: Option<String>,

    /// Тишина — полноценное слово: попадает в выход и оценивается LM.
    pub silence_is_word: bool,

    /// Межсловные трифоны (fan-in / fan-out на границах).
    pub cross_word_triphones: bool,

    /// Метка HMM необязательной короткой тишины между словами.
    pub short_silence_hmm: Option<String>,

    /// Глубина узлов, для которых материализуются списки слов lookahead.
    pub lookahead_depth: usize,
}

/// Отметка конца слова на последнем фонемном узле.
#[derive(Debug, Clone, PartialEq)]
pub struct WordEnd {
    /// Слово; `NO_WORD` — тишина, не порождающая слова.
    pub word: WordId,

    /// Ln-вероятность произношения.
    pub prior: f32,

    /// Узел принадлежит тишине.
    pub is_silence: bool,

    /// Последняя фонема слова: левый контекст следующего слова.
    pub final_phone: String,
}

/// Узел дерева: одна фонема в контексте.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Индекс HMM в наборе.
    pub hmm: usize,

    /// Центральная фонема.
    pub phone: String,

    /// Последующие узлы внутри слова.
    pub next: Vec<NodeId>,

    /// Отметка конца слова (на последней фонеме).
    pub word_end: Option<WordEnd>,

    /// Глубина фонемы от корня (1 — первая фонема слова).
    pub depth: usize,

    /// Для fan-out копий последней фонемы: требуемая первая фонема
    /// следующего слова (`_` — тишина или конец высказывания).
    pub right_ctx: Option<String>,

    /// Слова, достижимые через узел (только до `lookahead_depth`).
    pub lookahead_words: Vec<WordId>,
}

/// Префиксное дерево произношений.
///
/// Неизменяемо после построения; разделяется между высказываниями.
#[derive(Debug)]
pub struct LexPrefixTree {
    nodes: Vec<TreeNode>,
    /// Входные узлы по левому контексту (последней фонеме предыдущего слова).
    entries_by_left: HashMap<String, Vec<NodeId>>,
    /// Начала цепочек тишины.
    silence_entries: Vec<NodeId>,
    /// Узел необязательной короткой тишины.
    short_silence: Option<NodeId>,
    /// Id слова-тишины (если тишина — слово).
    silence_word: Option<WordId>,
    lookahead_depth: usize,
}

impl LexPrefixTree {
    /// Построить дерево по словарю произношений.
    ///
    /// Слова добавляются в `vocab` в порядке появления. Фонема, которой нет
    /// в наборе HMM ни как трифона, ни как монофона — фатальная ошибка.
    pub fn build(
        entries: &[LexEntry],
        vocab: &mut Vocabulary,
        hmms: &HmmSet,
        opts: &LexiconOptions,
    ) -> DecResult<Self> {
        let mut builder = Builder {
            tree: LexPrefixTree {
                nodes: Vec::new(),
                entries_by_left: HashMap::new(),
                silence_entries: Vec::new(),
                short_silence: None,
                silence_word: None,
                lookahead_depth: opts.lookahead_depth,
            },
            entry_nodes: HashMap::new(),
            interior_nodes: HashMap::new(),
            hmms,
            opts,
        };
        builder.run(entries, vocab)?;
        let tree = builder.tree;
        info!(
            "lexicon tree built: {} nodes, {} entry contexts, cross_word={}",
            tree.nodes.len(),
            tree.entries_by_left.len(),
            opts.cross_word_triphones
        );
        Ok(tree)
    }

    /// Узел по индексу.
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    /// Количество узлов.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Входные узлы для данного левого контекста.
    ///
    /// `required_first` ограничивает первую фонему следующего слова
    /// (fan-out при межсловных трифонах).
    pub fn entries<'a>(
        &'a self,
        left_ctx: &str,
        required_first: Option<&'a str>,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.entries_by_left
            .get(left_ctx)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .copied()
            .filter(move |&id| match required_first {
                Some(p) => self.nodes[id].phone == p,
                None => true,
            })
    }

    /// Начала цепочек тишины.
    pub fn silence_entries(&self) -> &[NodeId] {
        &self.silence_entries
    }

    /// Узел короткой тишины, если настроен.
    pub fn short_silence(&self) -> Option<NodeId> {
        self.short_silence
    }

    /// Id слова-тишины (когда тишина — слово).
    pub fn silence_word(&self) -> Option<WordId> {
        self.silence_word
    }

    /// Глубина материализации lookahead-списков.
    pub fn lookahead_depth(&self) -> usize {
        self.lookahead_depth
    }
}

// ---------------------------------------------------------------------------
// Построение
// ---------------------------------------------------------------------------

struct Builder<'a> {
    tree: LexPrefixTree,
    /// (левый контекст, фонема, следующая фонема) → входной узел.
    entry_nodes: HashMap<(String, String, String), NodeId>,
    /// (путь фонем, следующая фонема) → внутренний узел.
    interior_nodes: HashMap<(String, String), NodeId>,
    hmms: &'a HmmSet,
    opts: &'a LexiconOptions,
}

impl Builder<'_> {
    fn run(&mut self, entries: &[LexEntry], vocab: &mut Vocabulary) -> DecResult<()> {
        let is_silence =
            |e: &LexEntry| Some(&e.word) == self.opts.silence_word.as_ref();

        let regular: Vec<&LexEntry> = entries.iter().filter(|e| !is_silence(e)).collect();
        let silence: Vec<&LexEntry> = entries.iter().filter(|e| is_silence(e)).collect();
        if regular.is_empty() {
            return Err(DecError::Lexicon(
                "lexicon contains no non-silence words".into(),
            ));
        }

        let mut initial_phones: Vec<String> =
            regular.iter().map(|e| e.phones[0].clone()).collect();
        initial_phones.sort();
        initial_phones.dedup();
        let mut final_phones: Vec<String> = regular
            .iter()
            .map(|e| e.phones.last().expect("checked by reader").clone())
            .collect();
        final_phones.sort();
        final_phones.dedup();

        let mut left_ctxs = vec![SIL_CTX.to_string()];
        let mut right_ctxs = vec![SIL_CTX.to_string()];
        if self.opts.cross_word_triphones {
            left_ctxs.extend(final_phones.iter().cloned());
            right_ctxs.extend(initial_phones.iter().cloned());
            left_ctxs.sort();
            left_ctxs.dedup();
            right_ctxs.sort();
            right_ctxs.dedup();
        }

        // Словарь заполняется в порядке файла, чтобы id были стабильны.
        for entry in entries {
            vocab.add_word(&entry.word);
        }

        for entry in &regular {
            self.add_word(entry, vocab, &left_ctxs, &right_ctxs)?;
        }
        for entry in &silence {
            self.add_silence(entry, vocab)?;
        }

        if let Some(label) = &self.opts.short_silence_hmm {
            let hmm = self.hmms.index_of(label).ok_or_else(|| {
                DecError::Lexicon(format!("short silence HMM \"{label}\" not in HMM set"))
            })?;
            let id = self.push_node(TreeNode {
                hmm,
                phone: label.clone(),
                next: Vec::new(),
                word_end: None,
                depth: 1,
                right_ctx: None,
                lookahead_words: Vec::new(),
            });
            self.tree.short_silence = Some(id);
        }

        for node in &mut self.tree.nodes {
            node.lookahead_words.sort_unstable();
            node.lookahead_words.dedup();
        }
        Ok(())
    }

    fn add_word(
        &mut self,
        entry: &LexEntry,
        vocab: &Vocabulary,
        left_ctxs: &[String],
        right_ctxs: &[String],
    ) -> DecResult<()> {
        let word = vocab.id(&entry.word).expect("added above");
        let phones = &entry.phones;
        let n = phones.len();

        if n == 1 {
            // Однофонемное слово: входной узел сразу конец слова,
            // копии по каждой паре (левый, правый) контекст.
            for left in left_ctxs {
                for right in right_ctxs {
                    let hmm = self.resolve(left, &phones[0], right)?;
                    let id = self.push_node(TreeNode {
                        hmm,
                        phone: phones[0].clone(),
                        next: Vec::new(),
                        word_end: Some(WordEnd {
                            word,
                            prior: entry.prior,
                            is_silence: false,
                            final_phone: phones[0].clone(),
                        }),
                        depth: 1,
                        right_ctx: Some(right.clone()),
                        lookahead_words: Vec::new(),
                    });
                    self.register_entry(left, id);
                    self.note_lookahead(id, word);
                }
            }
            return Ok(());
        }

        // Первая фонема: копии по левому контексту, общие для слов
        // с одинаковой парой (первая, вторая) фонем.
        let mut prev: Vec<NodeId> = Vec::new();
        for left in left_ctxs {
            let key = (left.clone(), phones[0].clone(), phones[1].clone());
            let id = match self.entry_nodes.get(&key) {
                Some(&id) => id,
                None => {
                    let hmm = self.resolve(left, &phones[0], &phones[1])?;
                    let id = self.push_node(TreeNode {
                        hmm,
                        phone: phones[0].clone(),
                        next: Vec::new(),
                        word_end: None,
                        depth: 1,
                        right_ctx: None,
                        lookahead_words: Vec::new(),
                    });
                    self.entry_nodes.insert(key, id);
                    self.register_entry(left, id);
                    id
                }
            };
            self.note_lookahead(id, word);
            prev.push(id);
        }

        // Внутренние фонемы: общий узел на (префикс, следующая фонема).
        for k in 1..n - 1 {
            let path = phones[..=k].join(" ");
            let key = (path, phones[k + 1].clone());
            let id = match self.interior_nodes.get(&key) {
                Some(&id) => id,
                None => {
                    let hmm = self.resolve(&phones[k - 1], &phones[k], &phones[k + 1])?;
                    let id = self.push_node(TreeNode {
                        hmm,
                        phone: phones[k].clone(),
                        next: Vec::new(),
                        word_end: None,
                        depth: k + 1,
                        right_ctx: None,
                        lookahead_words: Vec::new(),
                    });
                    self.interior_nodes.insert(key, id);
                    id
                }
            };
            self.note_lookahead(id, word);
            for &p in &prev {
                self.link(p, id);
            }
            prev = vec![id];
        }

        // Последняя фонема: fan-out копии по правому контексту.
        for right in right_ctxs {
            let hmm = self.resolve(&phones[n - 2], &phones[n - 1], right)?;
            let id = self.push_node(TreeNode {
                hmm,
                phone: phones[n - 1].clone(),
                next: Vec::new(),
                word_end: Some(WordEnd {
                    word,
                    prior: entry.prior,
                    is_silence: false,
                    final_phone: phones[n - 1].clone(),
                }),
                depth: n,
                right_ctx: Some(right.clone()),
                lookahead_words: Vec::new(),
            });
            self.note_lookahead(id, word);
            for &p in &prev {
                self.link(p, id);
            }
        }
        Ok(())
    }

    /// Цепочка тишины: контекстно-независимая, вне дерева.
    fn add_silence(&mut self, entry: &LexEntry, vocab: &Vocabulary) -> DecResult<()> {
        let word_id = vocab.id(&entry.word).expect("added above");
        let emit = if self.opts.silence_is_word {
            self.tree.silence_word = Some(word_id);
            word_id
        } else {
            NO_WORD
        };

        let mut prev: Option<NodeId> = None;
        let n = entry.phones.len();
        for (k, phone) in entry.phones.iter().enumerate() {
            let hmm = self.hmms.index_of(phone).ok_or_else(|| {
                DecError::Lexicon(format!(
                    "silence phone \"{phone}\" not in HMM set (word \"{}\")",
                    entry.word
                ))
            })?;
            let word_end = (k == n - 1).then(|| WordEnd {
                word: emit,
                prior: entry.prior,
                is_silence: true,
                final_phone: SIL_CTX.to_string(),
            });
            let id = self.push_node(TreeNode {
                hmm,
                phone: phone.clone(),
                next: Vec::new(),
                word_end,
                depth: k + 1,
                right_ctx: None,
                lookahead_words: Vec::new(),
            });
            match prev {
                Some(p) => self.link(p, id),
                None => self.tree.silence_entries.push(id),
            }
            prev = Some(id);
        }
        debug!("silence chain \"{}\": {} phones", entry.word, n);
        Ok(())
    }

    /// Трифон `l-c+r`, иначе монофон `c`, иначе фатальная ошибка.
    fn resolve(&self, left: &str, center: &str, right: &str) -> DecResult<usize> {
        let tri = acoustics::hmm::triphone_label(left, center, right);
        if let Some(idx) = self.hmms.index_of(&tri) {
            return Ok(idx);
        }
        self.hmms.index_of(center).ok_or_else(|| {
            DecError::Lexicon(format!(
                "phone \"{center}\" not in HMM set (neither \"{tri}\" nor monophone)"
            ))
        })
    }

    fn push_node(&mut self, node: TreeNode) -> NodeId {
        let id = self.tree.nodes.len();
        self.tree.nodes.push(node);
        id
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        let next = &mut self.tree.nodes[from].next;
        if !next.contains(&to) {
            next.push(to);
        }
    }

    fn register_entry(&mut self, left: &str, id: NodeId) {
        self.tree
            .entries_by_left
            .entry(left.to_string())
            .or_default()
            .push(id);
    }

    fn note_lookahead(&mut self, id: NodeId, word: WordId) {
        let node = &mut self.tree.nodes[id];
        if node.depth <= self.opts.lookahead_depth {
            node.lookahead_words.push(word);
        }
    }
}
