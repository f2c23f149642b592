// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! URI model: pure parsing of the heterogeneous URI schemes the data
//! manager dispatches on.

use serde::{Deserialize, Serialize};

/// The URI schemes the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Local,
    GridEngine,
    Slurm,
    Agave,
}

impl Scheme {
    pub fn parse(s: &str) -> Self {
        match s {
            "gridengine" => Self::GridEngine,
            "slurm" => Self::Slurm,
            "agave" => Self::Agave,
            _ => Self::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::GridEngine => "gridengine",
            Self::Slurm => "slurm",
            Self::Agave => "agave",
        }
    }
}

/// A parsed URI: `scheme://authority/path`.
///
/// Parsing is pure and total — any string is accepted, with `local` as the
/// default scheme for bare filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub authority: String,
    pub path: String,
    pub chopped_path: String,
    pub chopped_uri: String,
    pub name: String,
}

impl Uri {
    /// Parses a URI string of the form `scheme://authority/path` or a bare
    /// filesystem path (treated as `local` with no authority).
    pub fn parse(raw: &str) -> Self {
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme_str, rest)) => (Scheme::parse(scheme_str), rest),
            None => (Scheme::Local, raw),
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority.to_string(), format!("/{path}")),
            None => (rest.to_string(), String::new()),
        };

        let chopped_path = path.trim_end_matches('/').to_string();
        let chopped_uri = format!("{}://{}{}", scheme.as_str(), authority, chopped_path);
        let name = chopped_path
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string();

        Self {
            scheme,
            authority,
            path,
            chopped_path,
            chopped_uri,
            name,
        }
    }

    /// Joins a child path segment onto this URI's chopped path.
    pub fn join(&self, segment: &str) -> Self {
        let joined = format!(
            "{}://{}{}/{}",
            self.scheme.as_str(),
            self.authority,
            self.chopped_path,
            segment.trim_start_matches('/')
        );
        Self::parse(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_file_uri() {
        let uri = Uri::parse("local:///data/input/");
        assert_eq!(uri.scheme, Scheme::Local);
        assert_eq!(uri.authority, "");
        assert_eq!(uri.chopped_path, "/data/input");
        assert_eq!(uri.name, "input");
        assert_eq!(uri.chopped_uri, "local:///data/input");
    }

    #[test]
    fn parses_agave_uri_with_authority() {
        let uri = Uri::parse("agave://tacc.execute/work/job1");
        assert_eq!(uri.scheme, Scheme::Agave);
        assert_eq!(uri.authority, "tacc.execute");
        assert_eq!(uri.chopped_path, "/work/job1");
        assert_eq!(uri.name, "job1");
    }

    #[test]
    fn join_appends_segment() {
        let base = Uri::parse("local:///data/step1");
        let child = base.join("_log");
        assert_eq!(child.chopped_path, "/data/step1/_log");
    }

    #[test]
    fn bare_path_defaults_to_local_scheme() {
        let uri = Uri::parse("/tmp/work");
        assert_eq!(uri.scheme, Scheme::Local);
        assert_eq!(uri.chopped_path, "/tmp/work");
    }
}
