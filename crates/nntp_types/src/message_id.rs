// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Maximum length of the content between the angle brackets.
const MAX_CONTENT_LEN: usize = 248;

/// Error produced when constructing an invalid [`MessageId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MessageIdError {
    /// The identifier was empty.
    #[error("message-id cannot be empty")]
    Empty,

    /// Shorter than the minimal `<x>` form.
    #[error("message-id must have at least 3 characters")]
    TooShort,

    /// Missing the enclosing angle brackets.
    #[error("message-id must be enclosed in angle brackets")]
    MissingBrackets,

    /// Content between the brackets exceeds 248 characters.
    #[error("message-id content exceeds maximum length of 248 characters")]
    TooLong,

    /// Content contains a byte outside printable ASCII, or a `>`.
    #[error("message-id contains invalid character")]
    InvalidCharacter,
}

/// An NNTP message identifier of the form `<content>`.
///
/// The content is 1 to 248 bytes of printable ASCII (`0x21..=0x7E`,
/// excluding `>`), per the RFC 3977 `message-id` grammar. Space, control
/// characters and non-ASCII bytes are rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Validates and constructs a message identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, MessageIdError> {
        let value = value.into();

        if value.is_empty() {
            return Err(MessageIdError::Empty);
        }
        // Minimum form is "<x>".
        if value.len() < 3 {
            return Err(MessageIdError::TooShort);
        }
        if !value.starts_with('<') || !value.ends_with('>') {
            return Err(MessageIdError::MissingBrackets);
        }

        let content = &value.as_bytes()[1..value.len() - 1];
        if content.len() > MAX_CONTENT_LEN {
            return Err(MessageIdError::TooLong);
        }

        for &byte in content {
            // A-NOTGT: printable ASCII (0x21-0x7E) excluding '>'.
            if !(0x21..=0x7E).contains(&byte) || byte == b'>' {
                return Err(MessageIdError::InvalidCharacter);
            }
        }

        Ok(Self(value))
    }

    /// The full identifier, brackets included.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for MessageId {
    type Err = MessageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
