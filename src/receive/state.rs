use crate::receive::storage;
use crate::server::lifecycle::{ShutdownReason, ShutdownSignal};
use crate::server::progress::ProgressTracker;
use crate::common::AppError;
use anyhow::{Context, Result};
use dashmap::DashSet;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;

/// Receive-specific application state
#[derive(Clone)]
pub struct ReceiveAppState {
    output_dir: Arc<PathBuf>,
    route: Arc<str>,
    /// Names stored earlier in this session
    written: Arc<DashSet<String>>,
    pub shutdown: ShutdownSignal,
    pub progress: ProgressTracker,
    pub keep_alive: bool,
}

impl ReceiveAppState {
    /// `output_dir` must be an existing directory.
    pub fn new(
        output_dir: &Path,
        route: impl Into<Arc<str>>,
        shutdown: ShutdownSignal,
        progress: ProgressTracker,
        keep_alive: bool,
    ) -> Result<Self> {
        let output_dir = output_dir
            .canonicalize()
            .with_context(|| format!("Output directory {} not found", output_dir.display()))?;
        anyhow::ensure!(
            output_dir.is_dir(),
            "Output path {} is not a directory",
            output_dir.display()
        );

        Ok(Self {
            output_dir: Arc::new(output_dir),
            route: route.into(),
            written: Arc::new(DashSet::new()),
            shutdown,
            progress,
            keep_alive,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Form action of the upload page.
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn written(&self) -> Vec<String> {
        self.written.iter().map(|name| name.clone()).collect()
    }

    /// Open a fresh destination for `wanted`, avoiding `existing` and this session's files.
    pub async fn create_file(
        &self,
        wanted: &str,
        existing: &HashSet<String>,
    ) -> io::Result<(String, File)> {
        let (name, file) = storage::create_unique(&self.output_dir, wanted, |n| {
            existing.contains(n) || self.written.contains(n)
        })
        .await?;
        self.written.insert(name.clone());
        Ok((name, file))
    }

    /// Upload failures end the session.
    pub fn fail(&self, err: AppError) -> AppError {
        self.shutdown
            .trigger(ShutdownReason::Fatal(format!("upload failed: {err}")));
        err
    }
}
