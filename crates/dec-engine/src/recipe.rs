//! Рецепты батча: по строке на высказывание, поля `key=value`.
//!
//! Формат рецептов aku: `audio=x.wav lna=x.lna [transcript=x.txt]`.
//! Неизвестные ключи пропускаются с предупреждением.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use dec_core::{DecError, DecResult};

/// Одно высказывание рецепта.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeEntry {
    /// Исходный аудиофайл (информационно; декодер его не читает).
    pub audio: Option<PathBuf>,

    /// Файл покадровых log-вероятностей.
    pub lna: PathBuf,

    /// Эталонная расшифровка для сравнения.
    pub transcript: Option<PathBuf>,
}

impl RecipeEntry {
    /// Идентификатор высказывания: имя LNA-файла без расширения.
    pub fn id(&self) -> String {
        self.lna
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.lna.to_string_lossy().into_owned())
    }
}

/// Прочитать рецепт из файла.
pub fn read_recipe(path: impl AsRef<Path>) -> DecResult<Vec<RecipeEntry>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| DecError::Config(format!("cannot open recipe {}: {e}", path.display())))?;
    read_recipe_from(BufReader::new(file))
}

/// Прочитать рецепт из текстового потока.
pub fn read_recipe_from(reader: impl BufRead) -> DecResult<Vec<RecipeEntry>> {
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut audio = None;
        let mut lna = None;
        let mut transcript = None;
        for field in line.split_whitespace() {
            let Some((key, value)) = field.split_once('=') else {
                return Err(DecError::Config(format!(
                    "recipe line {}: expected key=value, got \"{field}\"",
                    i + 1
                )));
            };
            match key {
                "audio" => audio = Some(PathBuf::from(value)),
                "lna" => lna = Some(PathBuf::from(value)),
                "transcript" => transcript = Some(PathBuf::from(value)),
                other => warn!("recipe line {}: unknown key \"{other}\" ignored", i + 1),
            }
        }

        let Some(lna) = lna else {
            return Err(DecError::Config(format!(
                "recipe line {}: missing lna= field",
                i + 1
            )));
        };
        entries.push(RecipeEntry {
            audio,
            lna,
            transcript,
        });
    }

    if entries.is_empty() {
        return Err(DecError::Config("recipe contains no utterances".into()));
    }
    Ok(entries)
}
