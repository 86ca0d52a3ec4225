//!
//! CLI батч-распознавания: декодирование LNA-файлов, сравнение с эталонными
//! расшифровками и доверительная оценка по N-best спискам внешнего
//! решёточного инструмента.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use dec_core::DecoderConfig;
use dec_engine::{
    confidence_margin, read_nbest_gz, read_recipe, ModelBundle, ModelPaths, RecipeEntry, Session,
};

#[derive(Parser)]
#[command(name = "rustdec")]
#[command(author, version, about = "RustDecoder: token-passing LVCSR decoder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Пути к файлам моделей.
#[derive(Args)]
struct ModelArgs {
    /// Набор HMM (.ph)
    #[arg(long)]
    hmm: PathBuf,

    /// Модель длительностей (.dur); без неё длительности не штрафуются
    #[arg(long)]
    duration: Option<PathBuf>,

    /// Словарь произношений (.lex)
    #[arg(long)]
    lexicon: PathBuf,

    /// Основная n-граммная модель (ARPA)
    #[arg(long)]
    lm: PathBuf,

    /// Младшая модель для LM-lookahead (ARPA)
    #[arg(long)]
    lookahead_lm: Option<PathBuf>,

    /// Слово словаря, считающееся тишиной (например "sil")
    #[arg(long)]
    silence_word: Option<String>,

    /// Метка HMM короткой тишины между словами
    #[arg(long)]
    short_silence_hmm: Option<String>,
}

impl ModelArgs {
    fn to_paths(&self) -> ModelPaths {
        ModelPaths {
            hmm: self.hmm.clone(),
            duration: self.duration.clone(),
            lexicon: self.lexicon.clone(),
            lm: self.lm.clone(),
            lookahead_lm: self.lookahead_lm.clone(),
            silence_word: self.silence_word.clone(),
            short_silence_hmm: self.short_silence_hmm.clone(),
        }
    }
}

/// Настройка поиска: JSON-файл плюс точечные переопределения.
#[derive(Args)]
struct TuningArgs {
    /// JSON-файл конфигурации декодера
    #[arg(long)]
    config: Option<PathBuf>,

    /// Глобальный луч
    #[arg(long)]
    global_beam: Option<f32>,

    /// Луч концов слов (по умолчанию 2/3 глобального)
    #[arg(long)]
    word_end_beam: Option<f32>,

    /// Лимит живых токенов
    #[arg(long)]
    token_limit: Option<usize>,

    /// Глубина суффикса истории при рекомбинации (равна порядку LM)
    #[arg(long)]
    prune_similar: Option<usize>,

    /// Масштаб языковой оценки
    #[arg(long)]
    lm_scale: Option<f32>,

    /// Масштаб переходных вероятностей
    #[arg(long)]
    transition_scale: Option<f32>,

    /// Масштаб штрафа длительностей
    #[arg(long)]
    duration_scale: Option<f32>,

    /// Штраф за вставку слова
    #[arg(long)]
    insertion_penalty: Option<f32>,

    /// Тишина — полноценное слово (морфные модели)
    #[arg(long, default_value_t = false)]
    silence_is_word: bool,

    /// Межсловные трифоны
    #[arg(long, default_value_t = false)]
    cross_word_triphones: bool,

    /// Необязательная короткая тишина между словами
    #[arg(long, default_value_t = false)]
    optional_short_silence: bool,

    /// Требовать конец предложения в конце высказывания
    #[arg(long, default_value_t = false)]
    require_sentence_end: bool,

    /// Строить словный граф (.slf)
    #[arg(long, default_value_t = false)]
    word_graph: bool,

    /// Включить LM-lookahead
    #[arg(long, default_value_t = false)]
    lm_lookahead: bool,

    /// Символ границы слова для морфных моделей (например "<w>")
    #[arg(long)]
    word_boundary: Option<String>,
}

impl TuningArgs {
    fn build_config(&self) -> Result<DecoderConfig> {
        let mut cfg = match &self.config {
            Some(path) => DecoderConfig::from_json_file(path)
                .with_context(|| format!("bad config file {}", path.display()))?,
            None => DecoderConfig::default(),
        };
        if let Some(v) = self.global_beam {
            cfg.global_beam = v;
            // Как в рабочей настройке: луч концов слов следует за глобальным.
            cfg.word_end_beam = self.word_end_beam.unwrap_or(v * 2.0 / 3.0);
        } else if let Some(v) = self.word_end_beam {
            cfg.word_end_beam = v;
        }
        if let Some(v) = self.token_limit {
            cfg.token_limit = v;
        }
        if let Some(v) = self.prune_similar {
            cfg.prune_similar = v;
        }
        if let Some(v) = self.lm_scale {
            cfg.lm_scale = v;
        }
        if let Some(v) = self.transition_scale {
            cfg.transition_scale = v;
        }
        if let Some(v) = self.duration_scale {
            cfg.duration_scale = v;
        }
        if let Some(v) = self.insertion_penalty {
            cfg.insertion_penalty = v;
        }
        cfg.silence_is_word |= self.silence_is_word;
        cfg.cross_word_triphones |= self.cross_word_triphones;
        cfg.optional_short_silence |= self.optional_short_silence;
        cfg.require_sentence_end |= self.require_sentence_end;
        cfg.generate_word_graph |= self.word_graph;
        cfg.lm_lookahead |= self.lm_lookahead;
        if let Some(b) = &self.word_boundary {
            cfg.word_boundary = Some(b.clone());
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Распознать батч высказываний и сравнить с эталонами
    Recognize {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Рецепт батча (`audio=… lna=… [transcript=…]`)
        #[arg(long)]
        recipe: Option<PathBuf>,

        /// Директория с .lna-файлами (альтернатива рецепту);
        /// эталоном считается одноимённый .txt рядом
        #[arg(long)]
        lna_dir: Option<PathBuf>,

        /// Куда писать .rec и .slf (по умолчанию рядом со входом)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Внешний решёточный инструмент для N-best (например lattice-tool)
        #[arg(long)]
        lattice_tool: Option<PathBuf>,

        /// Размер N-best списка внешнего инструмента
        #[arg(long, default_value_t = 100)]
        nbest: usize,

        /// Коэффициент выравнивания log-вероятностей
        #[arg(long, default_value_t = 0.1)]
        alpha: f64,
    },

    /// Доверительная оценка готового gzip N-best списка
    Confidence {
        /// Gzip-файл со строками `<score> <word>…`
        #[arg(long)]
        nbest: PathBuf,

        /// Коэффициент выравнивания log-вероятностей
        #[arg(long, default_value_t = 0.1)]
        alpha: f64,
    },

    /// Загрузить модели и вывести сводку
    Info {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        tuning: TuningArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Recognize {
            model,
            tuning,
            recipe,
            lna_dir,
            out_dir,
            lattice_tool,
            nbest,
            alpha,
        } => run_recognize(
            &model,
            &tuning,
            recipe.as_deref(),
            lna_dir.as_deref(),
            out_dir.as_deref(),
            lattice_tool.as_deref(),
            nbest,
            alpha,
        ),

        Commands::Confidence { nbest, alpha } => {
            let list = read_nbest_gz(&nbest)
                .with_context(|| format!("cannot read N-best list {}", nbest.display()))?;
            let margin = confidence_margin(&list, alpha)?;
            println!("{margin}");
            Ok(())
        }

        Commands::Info { model, tuning } => {
            let cfg = tuning.build_config()?;
            let bundle = ModelBundle::load(&model.to_paths(), &cfg)
                .context("model loading failed")?;
            println!("HMMs:           {}", bundle.hmms.len());
            println!("Emission states: {}", bundle.hmms.num_emissions());
            println!("Vocabulary:     {} words", bundle.vocab.len());
            println!("Tree nodes:     {}", bundle.tree.num_nodes());
            println!("LM:             order {}, {} n-grams", bundle.lm.order(), bundle.lm.len());
            match &bundle.lookahead_lm {
                Some(la) => println!("Lookahead LM:   order {}, {} n-grams", la.order(), la.len()),
                None => println!("Lookahead LM:   none"),
            }
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_recognize(
    model: &ModelArgs,
    tuning: &TuningArgs,
    recipe: Option<&Path>,
    lna_dir: Option<&Path>,
    out_dir: Option<&Path>,
    lattice_tool: Option<&Path>,
    nbest: usize,
    alpha: f64,
) -> Result<()> {
    let cfg = tuning.build_config()?;

    println!("RustDecoder - batch recognition");
    println!("===============================");

    let start = Instant::now();
    let bundle = ModelBundle::load(&model.to_paths(), &cfg).context("model loading failed")?;
    println!(
        "Models loaded in {:.2}s: {} words, LM order {}",
        start.elapsed().as_secs_f32(),
        bundle.vocab.len(),
        bundle.lm.order()
    );
    let session = Session::new(bundle, cfg.clone())?;

    let entries = collect_entries(recipe, lna_dir)?;
    println!("Utterances: {}", entries.len());
    println!();

    let mut ok = 0usize;
    let mut mismatched = 0usize;
    let mut unverified = 0usize;
    let mut failed = 0usize;

    for entry in &entries {
        let id = entry.id();
        println!(":: {id}");

        let outcome = match session.recognize_lna(&id, &entry.lna) {
            Ok(o) => o,
            Err(e) => {
                warn!(utterance = %id, "decoding failed: {e}");
                failed += 1;
                continue;
            }
        };

        let text = match &cfg.word_boundary {
            Some(b) => outcome.result.text_with_word_boundary(b),
            None => outcome.result.text(),
        };

        let target_dir = out_dir
            .map(Path::to_path_buf)
            .or_else(|| entry.lna.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&target_dir)
            .with_context(|| format!("cannot create {}", target_dir.display()))?;

        let rec_path = target_dir.join(format!("{id}.rec"));
        std::fs::write(&rec_path, format!("{text}\n"))
            .with_context(|| format!("cannot write {}", rec_path.display()))?;

        if let Some(graph) = &outcome.lattice {
            let slf_path = target_dir.join(format!("{id}.slf"));
            let slf = graph.to_slf_string(
                &id,
                session.vocabulary(),
                cfg.lm_scale,
                cfg.insertion_penalty,
            )?;
            std::fs::write(&slf_path, slf)
                .with_context(|| format!("cannot write {}", slf_path.display()))?;

            if let Some(tool) = lattice_tool {
                match run_lattice_tool(tool, &slf_path, &target_dir, nbest, alpha) {
                    Ok(margin) => println!("confidence {margin}"),
                    Err(e) => warn!(utterance = %id, "lattice tool failed: {e}"),
                }
            }
        }

        match &entry.transcript {
            Some(txt_path) if txt_path.exists() => {
                let reference = std::fs::read_to_string(txt_path)
                    .with_context(|| format!("cannot read {}", txt_path.display()))?;
                let reference = normalize(&reference);
                if reference == normalize(&text) {
                    ok += 1;
                    println!("OK  {text}");
                } else {
                    mismatched += 1;
                    println!("F   {text} != {reference}");
                }
            }
            _ => {
                unverified += 1;
                println!("?   {text}");
            }
        }
    }

    println!();
    println!(
        "Done in {:.2}s: {} OK, {} mismatched, {} unverified, {} failed",
        start.elapsed().as_secs_f32(),
        ok,
        mismatched,
        unverified,
        failed
    );
    Ok(())
}

/// Высказывания батча: из рецепта или сканированием директории.
fn collect_entries(recipe: Option<&Path>, lna_dir: Option<&Path>) -> Result<Vec<RecipeEntry>> {
    match (recipe, lna_dir) {
        (Some(path), _) => Ok(read_recipe(path)?),
        (None, Some(dir)) => {
            let mut entries = Vec::new();
            for item in std::fs::read_dir(dir)
                .with_context(|| format!("cannot read directory {}", dir.display()))?
            {
                let path = item?.path();
                if path.extension().is_some_and(|e| e == "lna") {
                    let txt = path.with_extension("txt");
                    entries.push(RecipeEntry {
                        audio: None,
                        lna: path,
                        transcript: txt.exists().then_some(txt),
                    });
                }
            }
            entries.sort_by(|a, b| a.lna.cmp(&b.lna));
            if entries.is_empty() {
                anyhow::bail!("no .lna files in {}", dir.display());
            }
            Ok(entries)
        }
        (None, None) => anyhow::bail!("either --recipe or --lna-dir is required"),
    }
}

/// Запустить внешний решёточный инструмент и оценить доверие по его N-best.
///
/// Ненулевой статус — ошибка уровня высказывания: батч продолжается.
fn run_lattice_tool(
    tool: &Path,
    slf_path: &Path,
    out_dir: &Path,
    nbest: usize,
    alpha: f64,
) -> Result<f64> {
    let status = Command::new(tool)
        .arg("-read-htk")
        .arg("-in-lattice")
        .arg(slf_path)
        .arg("-nbest-decode")
        .arg(nbest.to_string())
        .arg("-out-nbest-dir")
        .arg(out_dir)
        .status()
        .with_context(|| format!("cannot run {}", tool.display()))?;
    if !status.success() {
        anyhow::bail!("{} exited with {status}", tool.display());
    }

    let nbest_path = PathBuf::from(format!("{}.gz", slf_path.display()));
    let list = read_nbest_gz(&nbest_path)
        .with_context(|| format!("cannot read N-best list {}", nbest_path.display()))?;
    Ok(confidence_margin(&list, alpha)?)
}

/// Сравнение с эталоном нечувствительно к хвостовым пробелам и переносам.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
