//! Question validation for the relay
//!
//! Questions are trimmed of surrounding whitespace and must be non-empty.

use thiserror::Error;

/// Maximum length for a question, in characters
pub const MAX_QUESTION_CHARS: usize = 16_384;

/// Errors that can occur during question validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuestionError {
    /// Question is missing or only whitespace
    #[error("Question cannot be empty")]
    Empty,

    /// Question exceeds the maximum length
    #[error("Question exceeds maximum length of {MAX_QUESTION_CHARS} characters")]
    TooLong,
}

/// A validated, trimmed question
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question(String);

impl Question {
    /// Get the question as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parse(raw: &str) -> Result<Self, QuestionError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(QuestionError::Empty);
        }

        if trimmed.chars().count() > MAX_QUESTION_CHARS {
            return Err(QuestionError::TooLong);
        }

        Ok(Question(trimmed.to_string()))
    }
}

impl TryFrom<&str> for Question {
    type Error = QuestionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Question {
    type Error = QuestionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Question> for String {
    fn from(question: Question) -> Self {
        question.0
    }
}

impl AsRef<str> for Question {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
