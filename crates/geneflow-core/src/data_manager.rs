// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The data-transfer layer interface: capability-dispatched operations over
//! heterogeneous URIs. Concrete backends (grid staging, remote archive
//! retrieval) live in `geneflow-contexts`; this crate only defines the
//! contract plus a `local` filesystem reference implementation, since
//! `local` is the degenerate case every other backend falls back to for
//! final staging.

use crate::error::{OrchestratorError, Result};
use crate::uri::Uri;
use async_trait::async_trait;
use std::path::Path;

/// Per-scheme configuration bundle: credentials, retry policy, client
/// handles. Modeled as a tagged variant rather than an untyped mapping per
/// the source's design note on context-specific config.
#[derive(Debug, Clone, Default)]
pub struct DataManagerCtx {
    pub retry_limit: u32,
}

/// The data manager's capability-dispatched operations. All operations are
/// re-entrant.
#[async_trait]
pub trait DataManager: Send + Sync {
    async fn exists(&self, uri: &Uri, ctx: &DataManagerCtx) -> Result<bool>;

    /// Lists basenames directly under `uri`.
    async fn list(&self, uri: &Uri, ctx: &DataManagerCtx) -> Result<Vec<String>>;

    async fn mkdir(&self, uri: &Uri, recursive: bool, ctx: &DataManagerCtx) -> Result<()>;

    async fn delete(&self, uri: &Uri, ctx: &DataManagerCtx) -> Result<()>;

    async fn copy(&self, src: &Uri, dst: &Uri, ctx: &DataManagerCtx) -> Result<()>;
}

/// A `local` filesystem data manager: the degenerate case every other
/// backend stages into before publishing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDataManager;

#[async_trait]
impl DataManager for LocalDataManager {
    async fn exists(&self, uri: &Uri, _ctx: &DataManagerCtx) -> Result<bool> {
        Ok(Path::new(&uri.chopped_path).exists())
    }

    async fn list(&self, uri: &Uri, _ctx: &DataManagerCtx) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&uri.chopped_path)
            .await
            .map_err(|e| OrchestratorError::data(e.to_string(), uri.chopped_uri.clone()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::data(e.to_string(), uri.chopped_uri.clone()))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn mkdir(&self, uri: &Uri, recursive: bool, _ctx: &DataManagerCtx) -> Result<()> {
        let result = if recursive {
            tokio::fs::create_dir_all(&uri.chopped_path).await
        } else {
            tokio::fs::create_dir(&uri.chopped_path).await
        };
        result.map_err(|e| OrchestratorError::data(e.to_string(), uri.chopped_uri.clone()))
    }

    async fn delete(&self, uri: &Uri, _ctx: &DataManagerCtx) -> Result<()> {
        let path = Path::new(&uri.chopped_path);
        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|e| OrchestratorError::data(e.to_string(), uri.chopped_uri.clone()))
    }

    async fn copy(&self, src: &Uri, dst: &Uri, _ctx: &DataManagerCtx) -> Result<()> {
        if let Some(parent) = Path::new(&dst.chopped_path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| OrchestratorError::data(e.to_string(), dst.chopped_uri.clone()))?;
        }
        tokio::fs::copy(&src.chopped_path, &dst.chopped_path)
            .await
            .map(|_| ())
            .map_err(|e| OrchestratorError::data(e.to_string(), src.chopped_uri.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::Uri;

    #[tokio::test]
    async fn mkdir_then_exists_then_list_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dm = LocalDataManager;
        let ctx = DataManagerCtx::default();

        let dir_uri = Uri::parse(&format!("local://{}/child", tmp.path().display()));
        assert!(!dm.exists(&dir_uri, &ctx).await.unwrap());

        dm.mkdir(&dir_uri, true, &ctx).await.unwrap();
        assert!(dm.exists(&dir_uri, &ctx).await.unwrap());

        let file_path = tmp.path().join("child").join("a.txt");
        tokio::fs::write(&file_path, b"hi").await.unwrap();
        let names = dm.list(&dir_uri, &ctx).await.unwrap();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn delete_then_mkdir_recreates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dm = LocalDataManager;
        let ctx = DataManagerCtx::default();
        let dir_uri = Uri::parse(&format!("local://{}/out", tmp.path().display()));

        dm.mkdir(&dir_uri, true, &ctx).await.unwrap();
        dm.delete(&dir_uri, &ctx).await.unwrap();
        assert!(!dm.exists(&dir_uri, &ctx).await.unwrap());

        dm.mkdir(&dir_uri, true, &ctx).await.unwrap();
        assert!(dm.exists(&dir_uri, &ctx).await.unwrap());
    }

    #[tokio::test]
    async fn copy_stages_file_into_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let dm = LocalDataManager;
        let ctx = DataManagerCtx::default();

        let src_path = tmp.path().join("src.txt");
        tokio::fs::write(&src_path, b"payload").await.unwrap();
        let src = Uri::parse(&format!("local://{}", src_path.display()));
        let dst_path = tmp.path().join("nested").join("dst.txt");
        let dst = Uri::parse(&format!("local://{}", dst_path.display()));

        dm.copy(&src, &dst, &ctx).await.unwrap();
        let contents = tokio::fs::read_to_string(&dst_path).await.unwrap();
        assert_eq!(contents, "payload");
    }
}
