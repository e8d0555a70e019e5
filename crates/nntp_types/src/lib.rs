// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Validated NNTP protocol value objects.
//!
//! Small, totally-ordered value types used when addressing Usenet
//! articles: [`Article`] (a 1-based article number within a group),
//! [`MessageId`] (an RFC 3977 message identifier), and [`ArticleSpec`]
//! (either of the two). Construction validates; once built, a value is
//! always well-formed.

mod article;
mod article_spec;
mod message_id;

pub use article::{Article, ArticleError};
pub use article_spec::ArticleSpec;
pub use message_id::{MessageId, MessageIdError};
