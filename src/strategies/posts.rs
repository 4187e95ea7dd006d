//! Posts pass: rewrite uploads URLs in every post's guid and content.
//!
//! Every row is written back, changed or not; the rewrite is idempotent so
//! the unconditional save keeps the pass restartable without bookkeeping.

use super::StrategyStats;
use crate::progress::Progress;
use crate::rewrite::Rewriter;
use crate::scanner;
use crate::store::MigrationStore;
use anyhow::Result;
use tracing::{info, warn};

pub async fn run(
    store: &dyn MigrationStore,
    rewriter: &Rewriter,
    batch: u64,
    progress: &dyn Progress,
) -> Result<StrategyStats> {
    let total = store.count_posts().await?;
    let mut bar = progress.start("Migrate Posts", total);
    let mut stats = StrategyStats::default();

    for offset in scanner::offsets(total, batch) {
        for mut post in store.fetch_posts(batch, offset).await? {
            stats.processed += 1;
            post.guid = rewriter.rewrite(&post.guid);
            post.content = rewriter.rewrite(&post.content);
            match store.update_post(&post).await {
                Ok(()) => stats.migrated += 1,
                Err(err) => {
                    stats.warnings += 1;
                    warn!(post_id = post.id, error = %err, "post update failed; continuing");
                }
            }
            bar.tick();
        }
    }

    bar.finish();
    info!(
        processed = stats.processed,
        migrated = stats.migrated,
        warnings = stats.warnings,
        "posts: completed"
    );
    Ok(stats)
}
