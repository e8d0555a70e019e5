// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Error produced when constructing an invalid [`Article`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ArticleError {
    /// Article numbers start at one.
    #[error("article number must be positive and non-zero")]
    Zero,
}

/// A 1-based article number within a newsgroup.
///
/// Article numbers are assigned by the server in increasing order; zero is
/// never a valid number. The default article number is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Article(u64);

impl Article {
    /// Creates an article number; fails on zero.
    pub const fn new(value: u64) -> Result<Self, ArticleError> {
        if value == 0 {
            return Err(ArticleError::Zero);
        }
        Ok(Self(value))
    }

    /// The numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl Default for Article {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u64> for Article {
    type Error = ArticleError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Article> for u64 {
    fn from(value: Article) -> Self {
        value.0
    }
}

impl std::fmt::Display for Article {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one() {
        assert_eq!(Article::default().value(), 1);
    }

    #[test]
    fn zero_is_rejected() {
        assert_eq!(Article::new(0), Err(ArticleError::Zero));
    }

    #[test]
    fn ordering_follows_value() {
        let low = Article::new(10).unwrap();
        let high = Article::new(4000).unwrap();
        assert!(low < high);
        assert!(high >= low);
        assert_eq!(low, Article::try_from(10).unwrap());
    }

    #[test]
    fn max_value_round_trips() {
        let article = Article::new(u64::MAX).unwrap();
        assert_eq!(u64::from(article), u64::MAX);
    }

    #[test]
    fn displays_as_number() {
        assert_eq!(Article::new(451).unwrap().to_string(), "451");
    }
}
