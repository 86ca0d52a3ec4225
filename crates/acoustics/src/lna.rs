//! LNA: покадровые акустические log-вероятности во внешнем файле.
//!
//! Формат: магия `LNA1`, один байт «байт на значение» (1, 2 или 4),
//! u32 LE — число эмиссионных распределений, далее кадры подряд.
//! Квантизация: 1 байт — `q = round(−lp·24)`, 2 байта LE — `q = round(−lp·512)`,
//! 4 байта — f32 LE без квантизации. Конец файла на границе кадра — конец
//! высказывания; обрыв внутри кадра — ошибка.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use dec_core::{Acoustics, DecError, DecResult, StateId};

const MAGIC: &[u8; 4] = b"LNA1";

/// Размер скользящего окна кадров по умолчанию.
pub const DEFAULT_WINDOW: usize = 1024;

// ---------------------------------------------------------------------------
// Чтение
// ---------------------------------------------------------------------------

/// Потоковый читатель LNA-файла со скользящим окном кадров.
///
/// Кадры читаются по мере обращения; окно удерживает последние
/// `window_size` кадров, обращение к вытесненному кадру — ошибка.
pub struct LnaReader {
    reader: BufReader<File>,
    num_models: usize,
    bytes_per_value: u8,
    window: VecDeque<Vec<f32>>,
    base_frame: usize,
    window_size: usize,
    eof: bool,
}

impl LnaReader {
    /// Открыть LNA-файл.
    pub fn open(path: impl AsRef<Path>) -> DecResult<Self> {
        Self::open_with_window(path, DEFAULT_WINDOW)
    }

    /// Открыть LNA-файл с заданным размером окна.
    pub fn open_with_window(path: impl AsRef<Path>, window_size: usize) -> DecResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| DecError::Acoustics(format!("cannot open {}: {e}", path.display())))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| DecError::Acoustics(format!("{}: bad LNA header: {e}", path.display())))?;
        if &magic != MAGIC {
            return Err(DecError::Acoustics(format!(
                "{}: not an LNA file",
                path.display()
            )));
        }

        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).map_err(|e| {
            DecError::Acoustics(format!("{}: truncated LNA header: {e}", path.display()))
        })?;
        let bytes_per_value = byte[0];
        if !matches!(bytes_per_value, 1 | 2 | 4) {
            return Err(DecError::Acoustics(format!(
                "{}: unsupported bytes per value: {bytes_per_value}",
                path.display()
            )));
        }

        let mut nm = [0u8; 4];
        reader.read_exact(&mut nm).map_err(|e| {
            DecError::Acoustics(format!("{}: truncated LNA header: {e}", path.display()))
        })?;
        let num_models = u32::from_le_bytes(nm) as usize;
        if num_models == 0 {
            return Err(DecError::Acoustics(format!(
                "{}: zero model count",
                path.display()
            )));
        }

        Ok(Self {
            reader,
            num_models,
            bytes_per_value,
            window: VecDeque::new(),
            base_frame: 0,
            window_size: window_size.max(1),
            eof: false,
        })
    }

    /// Прочитать следующий кадр. `Ok(false)` — чистый конец файла.
    fn read_next_frame(&mut self) -> DecResult<bool> {
        let frame_bytes = self.num_models * self.bytes_per_value as usize;
        let mut buf = vec![0u8; frame_bytes];
        let mut filled = 0usize;
        while filled < frame_bytes {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    self.eof = true;
                    return Ok(false);
                }
                return Err(DecError::Acoustics(format!(
                    "truncated LNA frame: got {filled} of {frame_bytes} bytes"
                )));
            }
            filled += n;
        }

        let mut frame = Vec::with_capacity(self.num_models);
        match self.bytes_per_value {
            1 => {
                for &q in &buf {
                    frame.push(-(q as f32) / 24.0);
                }
            }
            2 => {
                for chunk in buf.chunks_exact(2) {
                    let q = u16::from_le_bytes([chunk[0], chunk[1]]);
                    frame.push(-(q as f32) / 512.0);
                }
            }
            4 => {
                for chunk in buf.chunks_exact(4) {
                    frame.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            _ => unreachable!(),
        }

        self.window.push_back(frame);
        if self.window.len() > self.window_size {
            self.window.pop_front();
            self.base_frame += 1;
        }
        Ok(true)
    }

    /// Догрузить окно до кадра `frame` включительно.
    fn ensure_frame(&mut self, frame: usize) -> DecResult<bool> {
        if frame < self.base_frame {
            return Err(DecError::Acoustics(format!(
                "frame {frame} already dropped from the window (base {})",
                self.base_frame
            )));
        }
        while self.base_frame + self.window.len() <= frame {
            if self.eof || !self.read_next_frame()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Acoustics for LnaReader {
    fn num_models(&self) -> usize {
        self.num_models
    }

    fn num_frames(&self) -> Option<usize> {
        // Потоковый источник: длина неизвестна до конца файла.
        None
    }

    fn log_prob(&mut self, frame: usize, state: StateId) -> DecResult<Option<f32>> {
        let state = state as usize;
        if state >= self.num_models {
            return Err(DecError::Acoustics(format!(
                "state {state} out of range (num_models {})",
                self.num_models
            )));
        }
        if !self.ensure_frame(frame)? {
            return Ok(None);
        }
        Ok(Some(self.window[frame - self.base_frame][state]))
    }
}

// ---------------------------------------------------------------------------
// Запись
// ---------------------------------------------------------------------------

/// Писатель LNA-файлов (тесты и внешние генераторы вероятностей).
pub struct LnaWriter {
    writer: BufWriter<File>,
    num_models: usize,
    bytes_per_value: u8,
}

impl LnaWriter {
    /// Создать файл и записать заголовок.
    pub fn create(
        path: impl AsRef<Path>,
        num_models: usize,
        bytes_per_value: u8,
    ) -> DecResult<Self> {
        if !matches!(bytes_per_value, 1 | 2 | 4) {
            return Err(DecError::Acoustics(format!(
                "unsupported bytes per value: {bytes_per_value}"
            )));
        }
        if num_models == 0 {
            return Err(DecError::Acoustics("zero model count".into()));
        }
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&[bytes_per_value])?;
        writer.write_all(&(num_models as u32).to_le_bytes())?;
        Ok(Self {
            writer,
            num_models,
            bytes_per_value,
        })
    }

    /// Записать один кадр log-вероятностей.
    pub fn write_frame(&mut self, log_probs: &[f32]) -> DecResult<()> {
        if log_probs.len() != self.num_models {
            return Err(DecError::Acoustics(format!(
                "frame length {} != model count {}",
                log_probs.len(),
                self.num_models
            )));
        }
        match self.bytes_per_value {
            1 => {
                for &lp in log_probs {
                    let q = (-lp * 24.0).round().clamp(0.0, 255.0) as u8;
                    self.writer.write_all(&[q])?;
                }
            }
            2 => {
                for &lp in log_probs {
                    let q = (-lp * 512.0).round().clamp(0.0, 65_535.0) as u16;
                    self.writer.write_all(&q.to_le_bytes())?;
                }
            }
            4 => {
                for &lp in log_probs {
                    self.writer.write_all(&lp.to_le_bytes())?;
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Дописать буферы на диск.
    pub fn finish(mut self) -> DecResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Акустика из памяти
// ---------------------------------------------------------------------------

/// Кадры, задаваемые из памяти: тесты и пошаговая подача из внешнего кода.
#[derive(Debug, Clone, Default)]
pub struct OneFrameAcoustics {
    num_models: usize,
    frames: Vec<Vec<f32>>,
}

impl OneFrameAcoustics {
    /// Пустой источник на `num_models` распределений.
    pub fn new(num_models: usize) -> Self {
        Self {
            num_models,
            frames: Vec::new(),
        }
    }

    /// Добавить кадр в конец.
    pub fn push_frame(&mut self, log_probs: Vec<f32>) -> DecResult<()> {
        if log_probs.len() != self.num_models {
            return Err(DecError::Acoustics(format!(
                "frame length {} != model count {}",
                log_probs.len(),
                self.num_models
            )));
        }
        self.frames.push(log_probs);
        Ok(())
    }

    /// Количество загруженных кадров.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Нет ли кадров.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Acoustics for OneFrameAcoustics {
    fn num_models(&self) -> usize {
        self.num_models
    }

    fn num_frames(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn log_prob(&mut self, frame: usize, state: StateId) -> DecResult<Option<f32>> {
        let state = state as usize;
        if state >= self.num_models {
            return Err(DecError::Acoustics(format!(
                "state {state} out of range (num_models {})",
                self.num_models
            )));
        }
        Ok(self.frames.get(frame).map(|f| f[state]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utt.lna");

        let frames = vec![vec![-0.5f32, -3.0, -10.0], vec![-1.25, -0.0, -7.5]];
        let mut w = LnaWriter::create(&path, 3, 4).unwrap();
        for f in &frames {
            w.write_frame(f).unwrap();
        }
        w.finish().unwrap();

        let mut r = LnaReader::open(&path).unwrap();
        assert_eq!(r.num_models(), 3);
        for (fi, f) in frames.iter().enumerate() {
            for (si, &lp) in f.iter().enumerate() {
                let got = r.log_prob(fi, si as StateId).unwrap().unwrap();
                assert!((got - lp).abs() < 1e-6, "frame {fi} state {si}");
            }
        }
        assert_eq!(r.log_prob(2, 0).unwrap(), None);
    }

    #[test]
    fn test_round_trip_quantized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utt.lna");

        let mut w = LnaWriter::create(&path, 2, 1).unwrap();
        w.write_frame(&[-0.5, -4.0]).unwrap();
        w.finish().unwrap();

        let mut r = LnaReader::open(&path).unwrap();
        // Шаг квантизации 1/24.
        assert!((r.log_prob(0, 0).unwrap().unwrap() + 0.5).abs() < 1.0 / 24.0);
        assert!((r.log_prob(0, 1).unwrap().unwrap() + 4.0).abs() < 1.0 / 24.0);
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.lna");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(4u8);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        // Полтора значения вместо трёх.
        bytes.extend_from_slice(&(-1.0f32).to_le_bytes());
        bytes.extend_from_slice(&[0, 1]);
        std::fs::write(&path, &bytes).unwrap();

        let mut r = LnaReader::open(&path).unwrap();
        assert!(r.log_prob(0, 0).is_err());
    }

    #[test]
    fn test_bad_magic_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.lna");
        std::fs::write(&path, b"WAVExxxxxxxx").unwrap();
        assert!(LnaReader::open(&path).is_err());
    }

    #[test]
    fn test_one_frame_acoustics() {
        let mut a = OneFrameAcoustics::new(2);
        a.push_frame(vec![-1.0, -2.0]).unwrap();
        assert_eq!(a.num_frames(), Some(1));
        assert_eq!(a.log_prob(0, 1).unwrap(), Some(-2.0));
        assert_eq!(a.log_prob(1, 0).unwrap(), None);
        assert!(a.push_frame(vec![-1.0]).is_err());
    }
}
