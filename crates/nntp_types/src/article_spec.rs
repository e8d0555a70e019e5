// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{Article, MessageId};

/// Selects an article either by number within the current group or by its
/// globally unique message identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArticleSpec {
    /// Selection by article number.
    Article(Article),

    /// Selection by message identifier.
    MessageId(MessageId),
}

impl ArticleSpec {
    /// Whether this selector carries an article number.
    #[must_use]
    pub const fn is_article(&self) -> bool {
        matches!(self, Self::Article(_))
    }

    /// Whether this selector carries a message identifier.
    #[must_use]
    pub const fn is_message_id(&self) -> bool {
        matches!(self, Self::MessageId(_))
    }

    /// The article number, if that is what this selector carries.
    #[must_use]
    pub const fn as_article(&self) -> Option<Article> {
        match self {
            Self::Article(article) => Some(*article),
            Self::MessageId(_) => None,
        }
    }

    /// The message identifier, if that is what this selector carries.
    #[must_use]
    pub const fn as_message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Article(_) => None,
            Self::MessageId(id) => Some(id),
        }
    }

    /// The wire rendition: the decimal number or the bracketed identifier.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::Article(article) => article.to_string(),
            Self::MessageId(id) => id.value().to_owned(),
        }
    }
}

impl From<Article> for ArticleSpec {
    fn from(value: Article) -> Self {
        Self::Article(value)
    }
}

impl From<MessageId> for ArticleSpec {
    fn from(value: MessageId) -> Self {
        Self::MessageId(value)
    }
}

impl std::fmt::Display for ArticleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Article(article) => article.fmt(f),
            Self::MessageId(id) => id.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminates_variants() {
        let by_number = ArticleSpec::from(Article::new(7).unwrap());
        assert!(by_number.is_article());
        assert!(!by_number.is_message_id());
        assert_eq!(by_number.as_article(), Some(Article::new(7).unwrap()));
        assert_eq!(by_number.as_message_id(), None);

        let by_id = ArticleSpec::from(MessageId::new("<m@n>").unwrap());
        assert!(by_id.is_message_id());
        assert_eq!(by_id.as_article(), None);
        assert_eq!(by_id.as_message_id().unwrap().value(), "<m@n>");
    }

    #[test]
    fn wire_value_rendition() {
        assert_eq!(ArticleSpec::from(Article::new(42).unwrap()).value(), "42");
        assert_eq!(
            ArticleSpec::from(MessageId::new("<m@n>").unwrap()).value(),
            "<m@n>"
        );
    }

    #[test]
    fn equality_and_ordering() {
        let a = ArticleSpec::from(Article::new(1).unwrap());
        let b = ArticleSpec::from(Article::new(2).unwrap());
        assert_ne!(a, b);
        assert!(a < b);

        let c = ArticleSpec::from(MessageId::new("<a@b>").unwrap());
        assert_eq!(c, c.clone());
    }
}
