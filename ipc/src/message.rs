//! Fixed-size message envelope

use core_types::Word;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum number of argument words a message can carry
pub const MAX_MESSAGE_WORDS: usize = 120;

/// Errors raised while building a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// More argument words than the envelope holds
    #[error("message carries {count} words, envelope holds at most {max}", max = MAX_MESSAGE_WORDS)]
    TooManyWords { count: usize },
}

/// A channel message: a label and up to [`MAX_MESSAGE_WORDS`] argument words
///
/// Messages are immutable once built. The label is the dispatch key; the
/// meaning of the words depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    label: Word,
    words: Vec<Word>,
}

impl Message {
    /// Creates a message with the given label and argument words
    pub fn new(label: Word, words: &[Word]) -> Result<Self, MessageError> {
        if words.len() > MAX_MESSAGE_WORDS {
            return Err(MessageError::TooManyWords { count: words.len() });
        }
        Ok(Self {
            label,
            words: words.to_vec(),
        })
    }

    /// Creates a message with no argument words
    pub fn empty(label: Word) -> Self {
        Self {
            label,
            words: Vec::new(),
        }
    }

    /// Returns the label
    pub fn label(&self) -> Word {
        self.label
    }

    /// Returns the argument word at `index`, if present
    pub fn word(&self, index: usize) -> Option<Word> {
        self.words.get(index).copied()
    }

    /// Returns all argument words
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// Returns the number of argument words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns whether the message carries no argument words
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg(label={}, words={:?})", self.label, self.words)
    }
}
