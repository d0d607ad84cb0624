//! Ticket-sellable posts and the taxonomy terms scopes match against.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub type PostId = i64;
pub type TicketId = i64;
pub type TermId = i64;

/// Kind of term a scope criterion can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermType {
    Tag,
    Category,
    Venue,
    Series,
}

impl TermType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermType::Tag => "tag",
            TermType::Category => "category",
            TermType::Venue => "venue",
            TermType::Series => "series",
        }
    }
}

impl fmt::Display for TermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TermType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tag" => Ok(TermType::Tag),
            "category" => Ok(TermType::Category),
            "venue" => Ok(TermType::Venue),
            "series" => Ok(TermType::Series),
            other => Err(CoreError::UnknownTermType(other.to_string())),
        }
    }
}

/// A concrete term: `(type, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TermRef {
    pub term: TermType,
    pub id: TermId,
}

impl TermRef {
    pub fn new(term: TermType, id: TermId) -> Self {
        Self { term, id }
    }
}

impl fmt::Display for TermRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.term, self.id)
    }
}

/// A post (event) as seen by the scope matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub post_type: String,
    /// Publication status. Recomputation does not filter on it.
    pub status: String,
    #[serde(default)]
    pub terms: BTreeSet<TermRef>,
}

impl Post {
    pub fn new(id: PostId) -> Self {
        Self {
            id,
            post_type: "event".to_string(),
            status: "publish".to_string(),
            terms: BTreeSet::new(),
        }
    }

    pub fn with_term(mut self, term: TermType, id: TermId) -> Self {
        self.terms.insert(TermRef::new(term, id));
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn has_term(&self, term: TermRef) -> bool {
        self.terms.contains(&term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_type_parses_labels() {
        assert_eq!("venue".parse::<TermType>().unwrap(), TermType::Venue);
        assert_eq!(
            "genre".parse::<TermType>().unwrap_err(),
            CoreError::UnknownTermType("genre".into())
        );
    }

    #[test]
    fn post_term_membership() {
        let post = Post::new(10).with_term(TermType::Tag, 7).with_term(TermType::Venue, 3);
        assert!(post.has_term(TermRef::new(TermType::Tag, 7)));
        assert!(!post.has_term(TermRef::new(TermType::Category, 7)));
        assert_eq!(TermRef::new(TermType::Venue, 3).to_string(), "venue:3");
    }
}
