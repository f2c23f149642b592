// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scalar/sequence coercion shared by the app, workflow, and job schemas.
//!
//! The source schema lets several fields be either a bare string or an
//! ordered list of strings (`inputs`/`parameters` values, `depend`). Modeling
//! this as an explicit enum keeps (de)serialization total instead of
//! stringly-typed coercion at call sites.

use serde::{Deserialize, Serialize};

/// A value that may be a single string or an ordered sequence of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    /// Normalizes into a `Vec<String>`, wrapping a single value in a
    /// one-element vector.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::List(items) => items.clone(),
        }
    }

    /// Returns the single string value, if this is not a list or the list
    /// has exactly one element.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(s) => Some(s),
            Self::List(items) if items.len() == 1 => Some(&items[0]),
            Self::List(_) => None,
        }
    }
}

impl Default for StringOrList {
    fn default() -> Self {
        Self::Single(String::new())
    }
}

impl From<&str> for StringOrList {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

impl From<String> for StringOrList {
    fn from(s: String) -> Self {
        Self::Single(s)
    }
}

impl From<Vec<String>> for StringOrList {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// Validates that a user-supplied mapping key (app/step/input/parameter name)
/// matches the schema's `[A-Za-z0-9_]+` key rule.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
