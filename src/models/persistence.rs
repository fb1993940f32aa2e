// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Model blob storage

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tracing::{debug, info};

use super::ModelType;
use crate::error::Result;

/// Opaque blob storage for fitted models, keyed by model type
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn save_model_blob(&self, model_type: ModelType, blob: Vec<u8>) -> Result<()>;

    /// `None` when nothing has been saved for `model_type` yet.
    async fn load_model_blob(&self, model_type: ModelType) -> Result<Option<Vec<u8>>>;
}

/// One `<model_type>.bin` file per model under a directory
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, model_type: ModelType) -> PathBuf {
        self.dir.join(format!("{}.bin", model_type.as_str()))
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save_model_blob(&self, model_type: ModelType, blob: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a reader never sees a partial blob
        let path = self.blob_path(model_type);
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!("Saved {} model ({} bytes) to {:?}", model_type, blob.len(), path);
        Ok(())
    }

    async fn load_model_blob(&self, model_type: ModelType) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(model_type);
        match tokio::fs::read(&path).await {
            Ok(blob) => {
                debug!("Loaded {} model blob from {:?}", model_type, path);
                Ok(Some(blob))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
