//! Гамма-модель длительностей состояний.
//!
//! Штраф начисляется один раз при выходе из состояния, по числу кадров,
//! проведённых в нём. Плотность гамма-распределения с параметрами
//! (shape `a`, rate `b`):
//!
//! ```text
//! ln f(d) = a·ln b − ln Γ(a) + (a−1)·ln d − b·d
//! ```
//!
//! Состояния без параметров не штрафуются.

use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use dec_core::{DecError, DecResult, StateId};

/// Модель длительностей, индексированная эмиссионными состояниями.
#[derive(Debug, Default)]
pub struct DurationModel {
    /// (shape, rate, ln-нормировка) на состояние.
    params: Vec<Option<(f32, f32, f32)>>,
}

impl DurationModel {
    /// Модель без штрафов (когда `.dur`-файл не задан).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Прочитать модель из `.dur`-файла.
    pub fn read(path: impl AsRef<Path>) -> DecResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            DecError::Model(format!("cannot open duration file {}: {e}", path.display()))
        })?;
        let model = Self::read_from(BufReader::new(file))?;
        info!(
            "duration model loaded: {} states ({})",
            model.params.iter().filter(|p| p.is_some()).count(),
            path.display()
        );
        Ok(model)
    }

    /// Прочитать модель из текстового потока.
    ///
    /// Формат: заголовок `DUR V1`, далее строки `<emission_id> <shape> <rate>`.
    pub fn read_from(reader: impl BufRead) -> DecResult<Self> {
        let mut lines = reader.lines();
        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| DecError::Model("empty duration file".into()))?;
        if header.trim() != "DUR V1" {
            return Err(DecError::Model(format!(
                "bad duration file header: \"{}\"",
                header.trim()
            )));
        }

        let mut model = DurationModel::default();
        for (i, line) in lines.enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let state: usize = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DecError::Model(format!("duration line {}: bad state id", i + 2)))?;
            let shape: f32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DecError::Model(format!("duration line {}: bad shape", i + 2)))?;
            let rate: f32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DecError::Model(format!("duration line {}: bad rate", i + 2)))?;
            if shape <= 0.0 || rate <= 0.0 {
                return Err(DecError::Model(format!(
                    "duration line {}: shape and rate must be positive",
                    i + 2
                )));
            }
            model.set(state as StateId, shape, rate);
        }
        Ok(model)
    }

    /// Задать параметры состояния.
    pub fn set(&mut self, state: StateId, shape: f32, rate: f32) {
        let idx = state as usize;
        if idx >= self.params.len() {
            self.params.resize(idx + 1, None);
        }
        let norm = shape * rate.ln() - ln_gamma(shape as f64) as f32;
        self.params[idx] = Some((shape, rate, norm));
    }

    /// Ln-штраф за `frames` кадров в состоянии `state` (без масштаба).
    ///
    /// Ноль для состояний без параметров и нулевых длительностей.
    pub fn log_prob(&self, state: StateId, frames: usize) -> f32 {
        if frames == 0 {
            return 0.0;
        }
        match self.params.get(state as usize).copied().flatten() {
            Some((shape, rate, norm)) => {
                let d = frames as f32;
                norm + (shape - 1.0) * d.ln() - rate * d
            }
            None => 0.0,
        }
    }

    /// Есть ли хоть одно состояние с параметрами.
    pub fn is_empty(&self) -> bool {
        self.params.iter().all(|p| p.is_none())
    }
}

/// Ln Γ(x), аппроксимация Ланцоша (g = 7, 9 коэффициентов).
fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let t = x + 7.5;
        let mut a = COEF[0];
        for (i, &c) in COEF.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_gamma_known_values() {
        assert!(ln_gamma(1.0).abs() < 1e-10);
        assert!(ln_gamma(2.0).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0f64.ln()).abs() < 1e-9);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-9);
    }

    #[test]
    fn test_exponential_special_case() {
        // shape=1, rate=1 — экспоненциальное распределение: ln f(d) = -d.
        let mut model = DurationModel::empty();
        model.set(0, 1.0, 1.0);
        assert!((model.log_prob(0, 2) + 2.0).abs() < 1e-5);
        assert!((model.log_prob(0, 5) + 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_mode_near_expected_duration() {
        // Для shape>1 мода равна (shape-1)/rate. shape=5, rate=1 => мода 4.
        let mut model = DurationModel::empty();
        model.set(0, 5.0, 1.0);
        let at_mode = model.log_prob(0, 4);
        assert!(at_mode > model.log_prob(0, 1));
        assert!(at_mode > model.log_prob(0, 12));
    }

    #[test]
    fn test_unparameterized_state_scores_zero() {
        let model = DurationModel::empty();
        assert_eq!(model.log_prob(7, 3), 0.0);
    }

    #[test]
    fn test_read_sample() {
        let text = "DUR V1\n0 2.5 0.8\n3 1.0 1.0\n";
        let model = DurationModel::read_from(text.as_bytes()).unwrap();
        assert!(model.log_prob(0, 3) != 0.0);
        assert_eq!(model.log_prob(1, 3), 0.0);
        assert!((model.log_prob(3, 2) + 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_bad_header_is_fatal() {
        assert!(DurationModel::read_from("XXX\n0 1 1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_nonpositive_shape_is_fatal() {
        assert!(DurationModel::read_from("DUR V1\n0 -1.0 1.0\n".as_bytes()).is_err());
    }
}
