//! Ядро декодера: синхронный по кадрам token-passing.
//!
//! Каждый кадр живые токены продвигаются по переходам своих HMM; выход из
//! HMM ведёт в следующие узлы лексического дерева, а на узлах конца слова
//! начисляется языковая оценка и наращивается цепочка истории. Токены,
//! сошедшиеся в одной паре (узел, суффикс истории), рекомбинируются по
//! Витерби; затем срабатывают три независимых ограничителя: глобальный луч,
//! луч концов слов и абсолютный лимит токенов.
//!
//! Дуги словного графа записываются в момент завершения слова, до
//! рекомбинации, поэтому решётка сохраняет конкурирующие гипотезы.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use tracing::debug;

use acoustics::{DurationModel, FrameScorer, HmmSet, HmmTarget};
use dec_core::{Acoustics, DecError, DecResult, DecoderConfig, RecognitionResult, StateId,
    WordAlign, WordId, NO_WORD};
use lexicon::{LexPrefixTree, NodeId, Vocabulary, WordEnd, SIL_CTX};
use ngram_lm::{LmLookahead, NgramLm};

use crate::history::WordHistory;
use crate::lattice::{LatticeArc, WordGraph};

/// Неизменяемые модели одной сессии, разделяемые между высказываниями.
#[derive(Clone)]
pub struct SearchModels {
    pub hmms: Arc<HmmSet>,
    pub durations: Arc<DurationModel>,
    pub tree: Arc<LexPrefixTree>,
    pub vocab: Arc<Vocabulary>,
    pub lm: Arc<NgramLm>,
    /// Младшая модель для lookahead; `None` — использовать основную.
    pub lookahead_lm: Option<Arc<NgramLm>>,
}

/// Фаза поиска одного высказывания.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Ready,
    Decoding,
    Finished,
}

/// Отложенный вход в дерево после необязательной короткой тишины.
type ReEntry = (String, Option<String>);

/// Живая гипотеза: позиция в дереве и HMM плюс накопленные оценки.
#[derive(Debug, Clone)]
struct Token {
    node: NodeId,
    /// Индекс состояния внутри HMM узла.
    state: usize,
    /// Кадры, проведённые в текущем состоянии.
    occupancy: usize,
    /// Полная накопленная оценка (ln).
    score: f32,
    /// Акустическая составляющая текущего (незавершённого) слова.
    word_ac: f32,
    /// Кадр начала текущего слова.
    word_start: usize,
    /// Применённая сейчас lookahead-составляющая (снимается на границе слова).
    lookahead: f32,
    /// Слово завершено на этом кадре.
    at_word_end: bool,
    /// Сохранённый вход в дерево для токена внутри короткой тишины.
    reentry: Option<ReEntry>,
    history: Arc<WordHistory>,
}

/// Ключ рекомбинации: позиция плюс суффикс истории.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecombKey {
    node: NodeId,
    state: usize,
    hist: Vec<WordId>,
    reentry: Option<ReEntry>,
}

type TokenMap = HashMap<RecombKey, Token>;

/// Token-passing поиск одного высказывания.
///
/// Модели разделяются; акустика, кэши и токены принадлежат поиску.
pub struct TokenPassSearch {
    models: SearchModels,
    cfg: DecoderConfig,
    scorer: FrameScorer,
    lookahead: Option<LmLookahead>,
    /// Узлы цепочек тишины и короткой тишины.
    silence_nodes: Vec<bool>,
    tokens: Vec<Token>,
    frame: usize,
    state: SearchState,
    pending_start: bool,
    arcs: Vec<LatticeArc>,
    hist_counter: u64,
}

impl TokenPassSearch {
    /// Создать поиск для одного высказывания.
    ///
    /// # Ошибки
    /// `DecError::Config` при несогласованной конфигурации,
    /// `DecError::Lattice` если словный граф запрошен с униграммной моделью.
    pub fn new(
        models: SearchModels,
        cfg: DecoderConfig,
        acoustics: Box<dyn Acoustics>,
    ) -> DecResult<Self> {
        cfg.validate()?;
        if cfg.generate_word_graph && models.lm.order() < 2 {
            return Err(DecError::Lattice(
                "word graph generation requires an n-gram model of order >= 2".into(),
            ));
        }
        if cfg.require_sentence_end && models.vocab.sentence_end().is_none() {
            return Err(DecError::Config(
                "require_sentence_end is set but the vocabulary has no sentence end marker"
                    .into(),
            ));
        }

        let lookahead = if cfg.lm_lookahead {
            let la_lm = models
                .lookahead_lm
                .clone()
                .unwrap_or_else(|| models.lm.clone());
            Some(LmLookahead::new(
                la_lm,
                models.tree.num_nodes(),
                &cfg.lookahead,
            ))
        } else {
            None
        };

        let mut silence_nodes = vec![false; models.tree.num_nodes()];
        let mut stack: Vec<NodeId> = models.tree.silence_entries().to_vec();
        while let Some(id) = stack.pop() {
            if mem::replace(&mut silence_nodes[id], true) {
                continue;
            }
            stack.extend_from_slice(&models.tree.node(id).next);
        }
        if let Some(sp) = models.tree.short_silence() {
            silence_nodes[sp] = true;
        }

        Ok(Self {
            scorer: FrameScorer::new(acoustics),
            models,
            cfg,
            lookahead,
            silence_nodes,
            tokens: Vec::new(),
            frame: 0,
            state: SearchState::Ready,
            pending_start: true,
            arcs: Vec::new(),
            hist_counter: 0,
        })
    }

    /// Текущий кадр (количество уже обработанных кадров).
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Фаза поиска.
    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Количество живых токенов после последнего кадра.
    pub fn num_active_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Вернуть поиск в исходное состояние перед новым проходом.
    pub fn reset(&mut self) {
        self.tokens.clear();
        self.arcs.clear();
        self.frame = 0;
        self.hist_counter = 0;
        self.pending_start = true;
        self.state = SearchState::Ready;
    }

    /// Обработать один кадр. `Ok(false)` — кадры закончились.
    ///
    /// # Ошибки
    /// `DecError::Decode` если луч опустел (все гипотезы отброшены),
    /// `DecError::Acoustics` при повреждённом источнике оценок.
    pub fn run(&mut self) -> DecResult<bool> {
        if self.state == SearchState::Finished {
            return Ok(false);
        }
        let frame = self.frame;
        if !self.scorer.has_frame(frame)? {
            self.state = SearchState::Finished;
            return Ok(false);
        }
        self.state = SearchState::Decoding;

        let mut next: TokenMap = TokenMap::new();
        if mem::take(&mut self.pending_start) {
            let root_word = self.models.vocab.sentence_start().unwrap_or(NO_WORD);
            let root = Token {
                node: 0,
                state: 0,
                occupancy: 0,
                score: 0.0,
                word_ac: 0.0,
                word_start: frame,
                lookahead: 0.0,
                at_word_end: false,
                reentry: None,
                history: WordHistory::root(root_word),
            };
            self.reenter(root, frame, SIL_CTX, None, false, &mut next)?;
        }

        let tokens = mem::take(&mut self.tokens);
        for tok in tokens {
            self.expand(tok, frame, &mut next)?;
        }

        let mut survivors: Vec<Token> = next.into_values().collect();
        if survivors.is_empty() {
            self.state = SearchState::Finished;
            return Err(DecError::Decode(format!(
                "beam emptied at frame {frame}: no hypothesis could advance"
            )));
        }

        let best = survivors
            .iter()
            .map(|t| t.score)
            .fold(f32::NEG_INFINITY, f32::max);
        let best_word_end = survivors
            .iter()
            .filter(|t| t.at_word_end)
            .map(|t| t.score)
            .fold(f32::NEG_INFINITY, f32::max);
        let global_floor = best - self.cfg.global_beam;
        let word_end_floor = best_word_end - self.cfg.word_end_beam;
        survivors.retain(|t| {
            t.score >= global_floor && (!t.at_word_end || t.score >= word_end_floor)
        });

        survivors.sort_unstable_by(compare_tokens);
        if survivors.len() > self.cfg.token_limit {
            survivors.truncate(self.cfg.token_limit);
        }

        if dec_core::debug::enabled() {
            debug!(
                frame,
                tokens = survivors.len(),
                best,
                "frame advanced"
            );
        }

        self.tokens = survivors;
        self.frame += 1;
        Ok(true)
    }

    /// Завершить поиск и извлечь результат.
    ///
    /// # Ошибки
    /// `DecError::Decode` если кадров не было вовсе или (при
    /// `require_sentence_end`) ни одна гипотеза не стоит на границе слова.
    pub fn finish(&mut self) -> DecResult<(RecognitionResult, Option<WordGraph>)> {
        self.state = SearchState::Finished;
        if self.frame == 0 {
            return Err(DecError::Decode(
                "utterance contains no acoustic frames".into(),
            ));
        }
        if self.tokens.is_empty() {
            return Err(DecError::Decode("no surviving hypotheses".into()));
        }

        // Lookahead — оптимистичная добавка, в итоговую оценку не входит.
        let mut candidates: Vec<(f32, &Token)> = Vec::with_capacity(self.tokens.len());
        if self.cfg.require_sentence_end {
            let end = self
                .models
                .vocab
                .sentence_end()
                .expect("checked in new()");
            let order = self.models.lm.order();
            for tok in &self.tokens {
                if !tok.at_word_end && !self.silence_nodes[tok.node] {
                    continue;
                }
                let hist = tok.history.last_words(order.saturating_sub(1));
                let end_score = self.cfg.lm_scale * self.models.lm.score(&hist, end);
                candidates.push((tok.score - tok.lookahead + end_score, tok));
            }
            if candidates.is_empty() {
                return Err(DecError::Decode(
                    "no hypothesis reaches a sentence end".into(),
                ));
            }
        } else {
            for tok in &self.tokens {
                candidates.push((tok.score - tok.lookahead, tok));
            }
        }

        let (best_score, best) = candidates
            .iter()
            .max_by(|a, b| {
                // При равных оценках побеждает меньший id истории.
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.1.history.id.cmp(&a.1.history.id))
            })
            .map(|&(s, t)| (s, t))
            .expect("non-empty checked above");

        let sentence_start = self.models.vocab.sentence_start();
        let sentence_end = self.models.vocab.sentence_end();
        let mut words = Vec::new();
        for node in best.history.chain() {
            if node.word == NO_WORD
                || Some(node.word) == sentence_start
                || Some(node.word) == sentence_end
            {
                continue;
            }
            words.push(WordAlign {
                word: self.models.vocab.word(node.word).to_string(),
                start_frame: node.start_frame,
                end_frame: node.end_frame,
                ac_score: node.ac_score,
                lm_score: node.lm_score,
            });
        }

        let result = RecognitionResult {
            words,
            score: best_score,
            frames: self.frame,
        };

        let graph = if self.cfg.generate_word_graph {
            let mut finals: Vec<u64> = self
                .tokens
                .iter()
                .filter(|t| t.at_word_end || self.silence_nodes[t.node])
                .map(|t| t.history.id)
                .collect();
            if finals.is_empty() {
                finals = self.tokens.iter().map(|t| t.history.id).collect();
            }
            Some(WordGraph::build(&self.arcs, &finals, self.frame))
        } else {
            None
        };

        Ok((result, graph))
    }

    /// Полный проход: от сброса до результата.
    pub fn decode(&mut self) -> DecResult<(RecognitionResult, Option<WordGraph>)> {
        self.reset();
        while self.run()? {}
        self.finish()
    }

    // -----------------------------------------------------------------------
    // Продвижение одного токена
    // -----------------------------------------------------------------------

    /// Пройти переходы HMM текущего состояния токена на кадре `frame`.
    fn expand(&mut self, tok: Token, frame: usize, next: &mut TokenMap) -> DecResult<()> {
        let hmms = self.models.hmms.clone();
        let tree = self.models.tree.clone();
        let hmm = hmms.hmm(tree.node(tok.node).hmm);
        let cur = &hmm.states[tok.state];
        let trans_scale = self.cfg.transition_scale;

        for t in &cur.transitions {
            let mut moved = tok.clone();
            moved.at_word_end = false;
            moved.score += trans_scale * t.log_prob;
            moved.word_ac += trans_scale * t.log_prob;

            match t.target {
                HmmTarget::State(j) if j == tok.state => {
                    moved.occupancy += 1;
                    self.consume(&mut moved, frame, cur.emission)?;
                    insert_token(next, moved, self.cfg.prune_similar);
                }
                HmmTarget::State(j) => {
                    self.leave_state(&mut moved, cur.emission);
                    moved.state = j;
                    moved.occupancy = 1;
                    let em = hmm.states[j].emission;
                    self.consume(&mut moved, frame, em)?;
                    insert_token(next, moved, self.cfg.prune_similar);
                }
                HmmTarget::Exit => {
                    self.leave_state(&mut moved, cur.emission);
                    self.cross(moved, frame, next)?;
                }
            }
        }
        Ok(())
    }

    /// Начислить акустическую оценку кадра.
    fn consume(&mut self, tok: &mut Token, frame: usize, emission: StateId) -> DecResult<()> {
        let lp = self.scorer.score(frame, emission)?.ok_or_else(|| {
            DecError::Acoustics(format!("acoustic frame {frame} truncated mid-frame"))
        })?;
        tok.score += lp;
        tok.word_ac += lp;
        Ok(())
    }

    /// Штраф длительности при выходе из состояния.
    fn leave_state(&mut self, tok: &mut Token, emission: StateId) {
        let d = self.cfg.duration_scale
            * self.models.durations.log_prob(emission, tok.occupancy);
        tok.score += d;
        tok.word_ac += d;
    }

    /// Переход через границу узла дерева: конец слова или следующая фонема.
    fn cross(&mut self, tok: Token, frame: usize, next: &mut TokenMap) -> DecResult<()> {
        let tree = self.models.tree.clone();
        let node = tree.node(tok.node);

        if let Some(we) = node.word_end.clone() {
            let mut t = tok;
            // Снять оптимистичную оценку: дальше действует точная.
            t.score -= t.lookahead;
            t.lookahead = 0.0;
            if we.word != NO_WORD {
                self.emit_word(&mut t, &we, frame);
            } else {
                // Тишина без слова: границу отмечаем, историю не трогаем.
                t.word_start = frame;
                t.word_ac = 0.0;
                t.at_word_end = true;
            }

            let (left, require) = if self.cfg.cross_word_triphones {
                (we.final_phone.clone(), node.right_ctx.clone())
            } else {
                (SIL_CTX.to_string(), None)
            };
            let offer_sp = self.cfg.optional_short_silence && !we.is_silence;
            self.reenter(t, frame, &left, require.as_deref(), offer_sp, next)
        } else if Some(tok.node) == tree.short_silence() {
            let mut t = tok;
            let pending = t.reentry.take();
            match pending {
                Some((left, require)) => {
                    self.reenter(t, frame, &left, require.as_deref(), false, next)
                }
                None => self.reenter(t, frame, SIL_CTX, None, false, next),
            }
        } else {
            for &nxt in &node.next {
                self.enter(tok.clone(), nxt, frame, next)?;
            }
            Ok(())
        }
    }

    /// Завершить слово: точная языковая оценка, узел истории, дуга решётки.
    fn emit_word(&mut self, t: &mut Token, we: &WordEnd, frame: usize) {
        let order = self.models.lm.order();
        let hist = t.history.last_words(order.saturating_sub(1));
        let lm_contrib =
            self.cfg.lm_scale * self.models.lm.score(&hist, we.word) + self.cfg.insertion_penalty;
        t.score += lm_contrib + we.prior;
        t.word_ac += we.prior;

        self.hist_counter += 1;
        let node = Arc::new(WordHistory {
            word: we.word,
            start_frame: t.word_start,
            end_frame: frame,
            lm_score: lm_contrib,
            ac_score: t.word_ac,
            total_score: t.score,
            id: self.hist_counter,
            prev: Some(t.history.clone()),
        });
        if self.cfg.generate_word_graph {
            self.arcs.push(LatticeArc {
                src: t.history.id,
                dst: node.id,
                word: we.word,
                start_frame: t.word_start,
                end_frame: frame,
                ac_score: t.word_ac,
                lm_score: lm_contrib,
            });
        }
        t.history = node;
        t.word_start = frame;
        t.word_ac = 0.0;
        t.at_word_end = true;
    }

    /// Вход в дерево после границы слова (или в начале высказывания).
    ///
    /// `require` — обязательная первая фонема следующего слова (fan-out при
    /// межсловных трифонах); `_` предсказывает тишину или конец высказывания.
    fn reenter(
        &mut self,
        tok: Token,
        frame: usize,
        left: &str,
        require: Option<&str>,
        offer_short_silence: bool,
        next: &mut TokenMap,
    ) -> DecResult<()> {
        let tree = self.models.tree.clone();
        let silence_predicted = require == Some(SIL_CTX);

        if !silence_predicted {
            let targets: Vec<NodeId> = tree.entries(left, require).collect();
            for id in targets {
                let mut t = tok.clone();
                t.reentry = None;
                self.enter(t, id, frame, next)?;
            }
        }
        if require.is_none() || silence_predicted {
            for &id in tree.silence_entries() {
                let mut t = tok.clone();
                t.reentry = None;
                self.enter(t, id, frame, next)?;
            }
        }
        if offer_short_silence && !silence_predicted {
            if let Some(sp) = tree.short_silence() {
                let mut t = tok.clone();
                t.reentry = Some((left.to_string(), require.map(str::to_string)));
                self.enter(t, sp, frame, next)?;
            }
        }
        Ok(())
    }

    /// Вход в узел дерева: акустика первого состояния плюс lookahead-дельта.
    fn enter(
        &mut self,
        mut tok: Token,
        node: NodeId,
        frame: usize,
        next: &mut TokenMap,
    ) -> DecResult<()> {
        let tree = self.models.tree.clone();
        let hmms = self.models.hmms.clone();
        let target = tree.node(node);
        let em = hmms.hmm(target.hmm).states[0].emission;

        tok.node = node;
        tok.state = 0;
        tok.occupancy = 1;
        self.consume(&mut tok, frame, em)?;

        if let Some(la) = &mut self.lookahead {
            let applied = if target.lookahead_words.is_empty() {
                0.0
            } else {
                let hist = tok.history.last_words(la.order().saturating_sub(1));
                self.cfg.lm_scale * la.best_score(node, &hist, &target.lookahead_words)
            };
            tok.score += applied - tok.lookahead;
            tok.lookahead = applied;
        }

        insert_token(next, tok, self.cfg.prune_similar);
        Ok(())
    }
}

/// Рекомбинация Витерби: в ключе выживает токен с максимальной оценкой.
///
/// При равных оценках остаётся токен с меньшим id истории, чтобы результат
/// не зависел от порядка обхода.
fn insert_token(next: &mut TokenMap, tok: Token, prune_similar: usize) {
    let key = RecombKey {
        node: tok.node,
        state: tok.state,
        hist: tok.history.last_words(prune_similar),
        reentry: tok.reentry.clone(),
    };
    match next.entry(key) {
        std::collections::hash_map::Entry::Vacant(e) => {
            e.insert(tok);
        }
        std::collections::hash_map::Entry::Occupied(mut e) => {
            let old = e.get();
            let replace = tok.score > old.score
                || (tok.score == old.score && tok.history.id < old.history.id);
            if replace {
                e.insert(tok);
            }
        }
    }
}

/// Полный детерминированный порядок токенов: оценка по убыванию, затем
/// позиция и история.
fn compare_tokens(a: &Token, b: &Token) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.node.cmp(&b.node))
        .then_with(|| a.state.cmp(&b.state))
        .then_with(|| a.history.id.cmp(&b.history.id))
        .then_with(|| a.occupancy.cmp(&b.occupancy))
        .then_with(|| a.reentry.cmp(&b.reentry))
}
