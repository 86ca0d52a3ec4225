//! Словарь распознавателя.

use std::collections::HashMap;

use dec_core::{DecError, DecResult, WordId};

/// Отображение слово ↔ id с маркерами границ предложения.
///
/// Неизменяем после загрузки сессии; разделяется между высказываниями.
#[derive(Debug, Default, Clone)]
pub struct Vocabulary {
    words: Vec<String>,
    by_text: HashMap<String, WordId>,
    sentence_start: Option<WordId>,
    sentence_end: Option<WordId>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить слово; повторное добавление возвращает существующий id.
    pub fn add_word(&mut self, text: &str) -> WordId {
        if let Some(&id) = self.by_text.get(text) {
            return id;
        }
        let id = self.words.len() as WordId;
        self.words.push(text.to_string());
        self.by_text.insert(text.to_string(), id);
        id
    }

    /// Текст слова по id.
    pub fn word(&self, id: WordId) -> &str {
        &self.words[id as usize]
    }

    /// Id слова по тексту.
    pub fn id(&self, text: &str) -> Option<WordId> {
        self.by_text.get(text).copied()
    }

    /// Количество слов.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Пуст ли словарь.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Зарегистрировать маркеры начала и конца предложения.
    ///
    /// Маркеры участвуют только в языковой модели, произношений у них нет.
    pub fn set_sentence_boundary(&mut self, start: &str, end: &str) -> DecResult<()> {
        if start == end {
            return Err(DecError::Config(format!(
                "sentence start and end markers must differ, got \"{start}\""
            )));
        }
        self.sentence_start = Some(self.add_word(start));
        self.sentence_end = Some(self.add_word(end));
        Ok(())
    }

    /// Id маркера начала предложения.
    pub fn sentence_start(&self) -> Option<WordId> {
        self.sentence_start
    }

    /// Id маркера конца предложения.
    pub fn sentence_end(&self) -> Option<WordId> {
        self.sentence_end
    }

    /// Все слова по порядку id.
    pub fn iter(&self) -> impl Iterator<Item = (WordId, &str)> {
        self.words
            .iter()
            .enumerate()
            .map(|(i, w)| (i as WordId, w.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut v = Vocabulary::new();
        let yes = v.add_word("yes");
        let no = v.add_word("no");
        assert_ne!(yes, no);
        assert_eq!(v.add_word("yes"), yes);
        assert_eq!(v.id("no"), Some(no));
        assert_eq!(v.word(yes), "yes");
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn test_sentence_boundary() {
        let mut v = Vocabulary::new();
        v.set_sentence_boundary("<s>", "</s>").unwrap();
        assert!(v.sentence_start().is_some());
        assert!(v.sentence_end().is_some());
        assert_ne!(v.sentence_start(), v.sentence_end());
        assert!(v.set_sentence_boundary("<s>", "<s>").is_err());
    }
}
