//! Directory backend trait
//!
//! Defines the two lookups the protocol frontend needs from a user store.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Backend failures. These never reach an LDAP client; callers log them and
/// degrade to "no result".
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected result shape: {0}")]
    Shape(String),
}

/// One attribute of a search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultAttribute {
    pub name: String,
    pub values: Vec<String>,
}

/// A single directory entry as returned by a backend search.
///
/// Attributes keep insertion order. Values within an attribute are unique,
/// in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    attributes: Vec<ResultAttribute>,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `name` is present, possibly without values
    pub fn touch(&mut self, name: &str) -> &mut ResultAttribute {
        let index = match self.position(name) {
            Some(index) => index,
            None => {
                self.attributes.push(ResultAttribute {
                    name: name.to_string(),
                    values: Vec::new(),
                });
                self.attributes.len() - 1
            }
        };

        &mut self.attributes[index]
    }

    /// Add a value, ignoring it if the attribute already holds it
    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let attribute = self.touch(name);

        if !attribute.values.contains(&value) {
            attribute.values.push(value);
        }
    }

    /// Builder form of [`QueryResult::push`]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Values of an attribute (case-insensitive name)
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name)
            .map(|index| self.attributes[index].values.as_slice())
    }

    /// First value of an attribute, if any
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn attributes(&self) -> &[ResultAttribute] {
        &self.attributes
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attr| attr.name.eq_ignore_ascii_case(name))
    }
}

/// Directory backend trait
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Stored password hash of `username`.
    ///
    /// `None` when the user is unknown, ambiguous or the lookup failed.
    async fn authenticate(&self, username: &str) -> Option<String>;

    /// Entries matching `username`, projected onto `attributes`.
    ///
    /// Errors cut the scan short; whatever was collected is still returned.
    async fn search(&self, username: &str, attributes: &[String]) -> Vec<QueryResult>;
}
