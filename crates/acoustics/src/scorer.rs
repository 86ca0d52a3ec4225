//! Мемоизация акустических оценок в пределах кадра.
//!
//! Много токенов одного кадра запрашивают одни и те же состояния; источник
//! (LNA-файл) при этом опрашивается не более одного раза на состояние.
//! Кэш живёт один кадр и принадлежит одному высказыванию.

use dec_core::{Acoustics, DecResult, StateId};

/// Обёртка над [`Acoustics`] с покадровым кэшем оценок.
pub struct FrameScorer {
    acoustics: Box<dyn Acoustics>,
    cache: Vec<Option<f32>>,
    cached_frame: Option<usize>,
}

impl FrameScorer {
    pub fn new(acoustics: Box<dyn Acoustics>) -> Self {
        let n = acoustics.num_models();
        Self {
            acoustics,
            cache: vec![None; n],
            cached_frame: None,
        }
    }

    /// Количество эмиссионных распределений источника.
    pub fn num_models(&self) -> usize {
        self.acoustics.num_models()
    }

    /// Общее число кадров, если источник его знает.
    pub fn num_frames(&self) -> Option<usize> {
        self.acoustics.num_frames()
    }

    /// Log-вероятность состояния на кадре; повторные запросы берутся из кэша.
    pub fn score(&mut self, frame: usize, state: StateId) -> DecResult<Option<f32>> {
        if self.cached_frame != Some(frame) {
            self.cache.fill(None);
            self.cached_frame = Some(frame);
        }
        let idx = state as usize;
        if let Some(Some(v)) = self.cache.get(idx) {
            return Ok(Some(*v));
        }
        let value = self.acoustics.log_prob(frame, state)?;
        if let Some(v) = value {
            if idx < self.cache.len() {
                self.cache[idx] = Some(v);
            }
        }
        Ok(value)
    }

    /// Есть ли кадр с данным индексом.
    pub fn has_frame(&mut self, frame: usize) -> DecResult<bool> {
        self.acoustics.has_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dec_core::DecError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Источник, считающий реальные обращения.
    struct CountingAcoustics {
        calls: Arc<AtomicUsize>,
        frames: usize,
    }

    impl Acoustics for CountingAcoustics {
        fn num_models(&self) -> usize {
            4
        }
        fn num_frames(&self) -> Option<usize> {
            Some(self.frames)
        }
        fn log_prob(&mut self, frame: usize, state: StateId) -> DecResult<Option<f32>> {
            if state as usize >= 4 {
                return Err(DecError::Acoustics("state out of range".into()));
            }
            if frame >= self.frames {
                return Ok(None);
            }
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Some(-(frame as f32) - state as f32))
        }
    }

    #[test]
    fn test_memoization_within_frame() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scorer = FrameScorer::new(Box::new(CountingAcoustics {
            calls: calls.clone(),
            frames: 3,
        }));

        for _ in 0..10 {
            assert_eq!(scorer.score(0, 1).unwrap(), Some(-1.0));
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // Новый кадр сбрасывает кэш.
        assert_eq!(scorer.score(1, 1).unwrap(), Some(-2.0));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(scorer.score(1, 2).unwrap(), Some(-3.0));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_end_of_input() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scorer = FrameScorer::new(Box::new(CountingAcoustics { calls, frames: 1 }));
        assert_eq!(scorer.score(5, 0).unwrap(), None);
    }
}
