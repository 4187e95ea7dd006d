//! Sequential driver for a migration run: validates configuration, derives
//! the bucket name, suppresses content filtering, then executes the selected
//! passes in a fixed order (images, posts, postmeta, options).

use crate::progress::Progress;
use crate::rewrite::Rewriter;
use crate::store::MigrationStore;
use crate::strategies::{images, options, postmeta, posts, StrategyStats};
use anyhow::Result;
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required option: --domain")]
    MissingDomain,
    #[error("unknown migration type {0:?} (expected all, images, posts, postmeta or options)")]
    UnknownTarget(String),
}

/// Which record sets a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateTarget {
    All,
    Images,
    Posts,
    Postmeta,
    Options,
}

impl MigrateTarget {
    fn selects(self, pass: MigrateTarget) -> bool {
        self == MigrateTarget::All || self == pass
    }
}

impl FromStr for MigrateTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "images" => Ok(Self::Images),
            "posts" => Ok(Self::Posts),
            "postmeta" => Ok(Self::Postmeta),
            "options" => Ok(Self::Options),
            other => Err(ConfigError::UnknownTarget(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Bucket domain the images move to, e.g.
    /// `s3-eu-west-1.amazonaws.com/testbucket`.
    pub domain: String,
    pub batch: u64,
    pub target: MigrateTarget,
    pub ignore_meta_keys: HashSet<String>,
    pub blog_id: u64,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::MissingDomain);
        }
        Ok(())
    }
}

/// Bucket name: everything after the final `/` of the domain. A bare host
/// is its own bucket name.
pub fn bucket_from_domain(domain: &str) -> &str {
    match domain.rsplit('/').next() {
        Some(tail) => tail,
        None => domain,
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub images: Option<StrategyStats>,
    pub posts: Option<StrategyStats>,
    pub postmeta: Option<StrategyStats>,
    pub options: Option<StrategyStats>,
}

impl RunSummary {
    pub fn warnings(&self) -> u64 {
        [&self.images, &self.posts, &self.postmeta, &self.options]
            .into_iter()
            .flatten()
            .map(|s| s.warnings)
            .sum()
    }
}

pub async fn run(
    store: &dyn MigrationStore,
    config: &RunConfig,
    progress: &dyn Progress,
) -> Result<RunSummary> {
    config.validate()?;
    let rewriter = Rewriter::new(&config.domain)?;
    let bucket = bucket_from_domain(&config.domain).to_string();
    let batch = config.batch.max(1);

    // The content being rewritten was filtered when it was first saved;
    // re-filtering on these bulk writes would be wrong for trusted content
    // and slow at this volume.
    store.suppress_content_filters();

    info!(domain = %config.domain, bucket = %bucket, batch, "migration run starting");

    let mut summary = RunSummary::default();
    if config.target.selects(MigrateTarget::Images) {
        summary.images =
            Some(images::run(store, &bucket, config.blog_id, batch, progress).await?);
    }
    if config.target.selects(MigrateTarget::Posts) {
        summary.posts = Some(posts::run(store, &rewriter, batch, progress).await?);
    }
    if config.target.selects(MigrateTarget::Postmeta) {
        summary.postmeta = Some(
            postmeta::run(
                store,
                &rewriter,
                &config.ignore_meta_keys,
                batch,
                progress,
            )
            .await?,
        );
    }
    if config.target.selects(MigrateTarget::Options) {
        summary.options = Some(options::run(store, &rewriter, batch, progress).await?);
    }

    info!(warnings = summary.warnings(), "migration run completed");
    Ok(summary)
}
