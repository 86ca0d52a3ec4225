//! Интеграционные тесты поиска на игрушечной модели yes/no.
//!
//! Акустика задаётся из памяти: на каждом кадре одно эмиссионное состояние
//! получает ln-вероятность 0, остальные сильно штрафуются.

use std::sync::Arc;

use acoustics::hmm::{Hmm, HmmState, HmmTarget, HmmTransition};
use acoustics::{DurationModel, HmmSet, OneFrameAcoustics};
use dec_core::{DecError, DecoderConfig};
use lexicon::{read_lexicon_from, LexPrefixTree, LexiconOptions, Vocabulary};
use ngram_lm::NgramLm;
use tp_search::{SearchModels, TokenPassSearch};

const LN_HALF: f32 = -0.693_147_2;

// Эмиссии: Y=0, EH=1, S=2, N=3, OW=4, SIL=5.
const Y: usize = 0;
const EH: usize = 1;
const S: usize = 2;
const N: usize = 3;
const OW: usize = 4;
const SIL: usize = 5;

const ARPA: &str = "\
\\data\\
ngram 1=5
ngram 2=5

\\1-grams:
-2.0 <s> -0.3
-0.7 yes -0.3
-0.7 no -0.3
-1.0 </s>
-0.9 sil -0.3

\\2-grams:
-0.15 <s> yes
-0.2 yes no
-0.2 no </s>
-1.5 no yes
-1.2 yes </s>

\\end\\
";

fn toy_hmms() -> HmmSet {
    let mut set = HmmSet::new();
    for (i, label) in ["Y", "EH", "S", "N", "OW", "SIL"].iter().enumerate() {
        set.add_hmm(Hmm {
            label: label.to_string(),
            states: vec![HmmState {
                emission: i as u32,
                transitions: vec![
                    HmmTransition {
                        target: HmmTarget::State(0),
                        log_prob: LN_HALF,
                    },
                    HmmTransition {
                        target: HmmTarget::Exit,
                        log_prob: LN_HALF,
                    },
                ],
            }],
        })
        .unwrap();
    }
    set
}

fn toy_models(silence_is_word: bool, cross_word: bool) -> (SearchModels, DecoderConfig) {
    let hmms = toy_hmms();
    let entries = read_lexicon_from("yes Y EH S\nno N OW\nsil SIL\n".as_bytes()).unwrap();
    let mut vocab = Vocabulary::new();
    vocab.set_sentence_boundary("<s>", "</s>").unwrap();
    let opts = LexiconOptions {
        silence_word: Some("sil".into()),
        silence_is_word,
        cross_word_triphones: cross_word,
        short_silence_hmm: None,
        lookahead_depth: 4,
    };
    let tree = LexPrefixTree::build(&entries, &mut vocab, &hmms, &opts).unwrap();
    let lm = NgramLm::read_from(ARPA.as_bytes(), &vocab).unwrap();

    let models = SearchModels {
        hmms: Arc::new(hmms),
        durations: Arc::new(DurationModel::empty()),
        tree: Arc::new(tree),
        vocab: Arc::new(vocab),
        lm: Arc::new(lm),
        lookahead_lm: None,
    };
    let cfg = DecoderConfig {
        global_beam: 200.0,
        word_end_beam: 150.0,
        lm_scale: 1.0,
        silence_is_word,
        cross_word_triphones: cross_word,
        ..DecoderConfig::default()
    };
    (models, cfg)
}

/// Кадры, на каждом из которых выделено одно эмиссионное состояние.
fn acoustics_for(plan: &[usize]) -> OneFrameAcoustics {
    let mut a = OneFrameAcoustics::new(6);
    for &fav in plan {
        let mut frame = vec![-10.0f32; 6];
        frame[fav] = 0.0;
        a.push_frame(frame).unwrap();
    }
    a
}

/// Y-EH-S-N-OW с хвостовой тишиной: лучший путь "yes no".
fn yes_no_plan() -> Vec<usize> {
    vec![Y, Y, EH, EH, S, S, N, N, OW, OW, SIL, SIL]
}

#[test]
fn test_end_to_end_yes_no() {
    let (models, cfg) = toy_models(false, false);
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&yes_no_plan()))).unwrap();
    let (result, graph) = search.decode().unwrap();

    assert_eq!(result.text(), "yes no");
    assert_eq!(result.frames, 12);
    assert!(result.score.is_finite());
    assert!(graph.is_none());

    // Повсловное выравнивание: "yes" занимает кадры 0..6, "no" — 6..10.
    assert_eq!(result.words[0].start_frame, 0);
    assert_eq!(result.words[0].end_frame, 6);
    assert_eq!(result.words[1].start_frame, 6);
    assert_eq!(result.words[1].end_frame, 10);
}

#[test]
fn test_decode_is_deterministic() {
    let run = || {
        let (models, cfg) = toy_models(false, false);
        let cfg = DecoderConfig {
            generate_word_graph: true,
            ..cfg
        };
        let mut search =
            TokenPassSearch::new(models.clone(), cfg, Box::new(acoustics_for(&yes_no_plan())))
                .unwrap();
        let (result, graph) = search.decode().unwrap();
        let slf = graph
            .unwrap()
            .to_slf_string("utt", &models.vocab, 1.0, 0.0)
            .unwrap();
        (result.text(), result.score, slf)
    };

    let (text_a, score_a, slf_a) = run();
    let (text_b, score_b, slf_b) = run();
    assert_eq!(text_a, text_b);
    assert_eq!(score_a.to_bits(), score_b.to_bits());
    assert_eq!(slf_a, slf_b);
}

#[test]
fn test_wider_search_never_scores_worse() {
    let score_with = |token_limit: usize, global_beam: f32| {
        let (models, cfg) = toy_models(false, false);
        let cfg = DecoderConfig {
            token_limit,
            global_beam,
            word_end_beam: global_beam * 2.0 / 3.0,
            ..cfg
        };
        let mut search =
            TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&yes_no_plan()))).unwrap();
        search.decode().unwrap().0.score
    };

    let narrow = score_with(1, 30.0);
    let medium = score_with(100, 100.0);
    let wide = score_with(30_000, 400.0);
    assert!(medium >= narrow - 1e-4);
    assert!(wide >= medium - 1e-4);
}

#[test]
fn test_token_limit_one_is_greedy() {
    let (models, cfg) = toy_models(false, false);
    let cfg = DecoderConfig {
        token_limit: 1,
        ..cfg
    };
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&yes_no_plan()))).unwrap();

    search.reset();
    while search.run().unwrap() {
        assert_eq!(search.num_active_tokens(), 1);
    }
    let (result, _) = search.finish().unwrap();
    assert_eq!(result.text(), "yes no");
}

#[test]
fn test_zero_frames_is_decoding_failure() {
    let (models, cfg) = toy_models(false, false);
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(OneFrameAcoustics::new(6))).unwrap();
    let err = search.decode().unwrap_err();
    assert!(matches!(err, DecError::Decode(_)));
    assert!(err.is_utterance_level());
}

#[test]
fn test_tight_beam_keeps_best_token() {
    // Сколь угодно узкий луч не отбрасывает лучший токен кадра.
    let (models, cfg) = toy_models(false, false);
    let cfg = DecoderConfig {
        global_beam: 0.001,
        word_end_beam: 0.001,
        ..cfg
    };
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&yes_no_plan()))).unwrap();
    let (result, _) = search.decode().unwrap();
    assert!(!result.words.is_empty());
}

#[test]
fn test_lattice_records_word_hypotheses() {
    let (models, cfg) = toy_models(false, false);
    let cfg = DecoderConfig {
        generate_word_graph: true,
        ..cfg
    };
    let mut search =
        TokenPassSearch::new(models.clone(), cfg, Box::new(acoustics_for(&yes_no_plan())))
            .unwrap();
    let (_, graph) = search.decode().unwrap();
    let graph = graph.unwrap();

    assert!(graph.num_arcs() >= 2);
    let slf = graph.to_slf_string("utt1", &models.vocab, 1.0, 0.0).unwrap();
    assert!(slf.contains("W=yes"));
    assert!(slf.contains("W=no"));
    assert!(slf.starts_with("VERSION=1.1\nUTTERANCE=utt1\n"));
}

#[test]
fn test_word_graph_requires_bigram_model() {
    let (models, cfg) = toy_models(false, false);
    let unigram = "\\data\\\nngram 1=2\n\n\\1-grams:\n-0.5 yes\n-0.5 no\n\n\\end\\\n";
    let lm = NgramLm::read_from(unigram.as_bytes(), &models.vocab).unwrap();
    let models = SearchModels {
        lm: Arc::new(lm),
        ..models
    };
    let cfg = DecoderConfig {
        generate_word_graph: true,
        ..cfg
    };
    let err =
        TokenPassSearch::new(models, cfg, Box::new(OneFrameAcoustics::new(6))).unwrap_err();
    assert!(matches!(err, DecError::Lattice(_)));
}

#[test]
fn test_require_sentence_end() {
    let (models, cfg) = toy_models(false, false);
    let cfg = DecoderConfig {
        require_sentence_end: true,
        ..cfg
    };
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&yes_no_plan()))).unwrap();
    let (result, _) = search.decode().unwrap();
    assert_eq!(result.text(), "yes no");
}

#[test]
fn test_silence_as_word_appears_in_output() {
    // Пауза в середине высказывания: Y EH S _ N OW.
    let plan = vec![Y, Y, EH, EH, S, S, SIL, SIL, N, N, OW, OW, SIL, SIL];

    let (models, cfg) = toy_models(true, false);
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&plan))).unwrap();
    let (result, _) = search.decode().unwrap();
    assert_eq!(result.text(), "yes sil no");

    // Без silence_is_word та же пауза не порождает слова.
    let (models, cfg) = toy_models(false, false);
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&plan))).unwrap();
    let (result, _) = search.decode().unwrap();
    assert_eq!(result.text(), "yes no");
}

#[test]
fn test_cross_word_triphones_fall_back_to_monophones() {
    // Набор HMM содержит только монофоны: fan-out строится, а контекстные
    // метки разрешаются в монофонные модели.
    let (models, cfg) = toy_models(false, true);
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&yes_no_plan()))).unwrap();
    let (result, _) = search.decode().unwrap();
    assert_eq!(result.text(), "yes no");
}

#[test]
fn test_lookahead_preserves_best_path() {
    let (models, cfg) = toy_models(false, false);
    let cfg = DecoderConfig {
        lm_lookahead: true,
        ..cfg
    };
    let mut search =
        TokenPassSearch::new(models, cfg, Box::new(acoustics_for(&yes_no_plan()))).unwrap();
    let (result, _) = search.decode().unwrap();
    assert_eq!(result.text(), "yes no");
}
