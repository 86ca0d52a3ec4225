//! Источник акустических оценок.
//!
//! Декодер не знает, откуда берутся покадровые log-вероятности: из LNA-файла,
//! из памяти (тесты) или из внешнего генератора. Все реализации отдают
//! значения в натуральном логарифме.

use crate::error::DecResult;
use crate::types::StateId;

/// Покадровые акустические log-вероятности эмиссионных состояний.
///
/// Кадры запрашиваются в строгом порядке возрастания; реализация вправе
/// отбрасывать уже пройденные кадры. Значения комбинируются только
/// сложением (ln-пространство).
pub trait Acoustics: Send {
    /// Количество эмиссионных распределений (длина вектора кадра).
    fn num_models(&self) -> usize;

    /// Общее число кадров, если известно заранее.
    ///
    /// `None` — потоковый источник: конец определяется по `log_prob`.
    fn num_frames(&self) -> Option<usize>;

    /// Log-вероятность состояния `state` на кадре `frame`.
    ///
    /// `Ok(None)` — кадров больше нет (конец высказывания).
    ///
    /// # Ошибки
    /// Возвращает `DecError::Acoustics` при повреждённых входных данных.
    fn log_prob(&mut self, frame: usize, state: StateId) -> DecResult<Option<f32>>;

    /// Есть ли кадр с данным индексом.
    fn has_frame(&mut self, frame: usize) -> DecResult<bool> {
        Ok(self.log_prob(frame, 0)?.is_some())
    }
}
