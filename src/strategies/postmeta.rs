//! Postmeta pass: rewrite uploads URLs in meta values, honoring the
//! operator's ignore list for keys that hold storage bookkeeping rather
//! than presentation data.

use super::{rewrite_stored_value, StrategyStats};
use crate::progress::Progress;
use crate::rewrite::Rewriter;
use crate::scanner;
use crate::store::MigrationStore;
use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, warn};

pub async fn run(
    store: &dyn MigrationStore,
    rewriter: &Rewriter,
    ignore_keys: &HashSet<String>,
    batch: u64,
    progress: &dyn Progress,
) -> Result<StrategyStats> {
    let total = store.count_post_meta().await?;
    let mut bar = progress.start("Migrate Post Meta", total);
    let mut stats = StrategyStats::default();

    for offset in scanner::offsets(total, batch) {
        for record in store.fetch_post_meta(batch, offset).await? {
            stats.processed += 1;
            if ignore_keys.contains(&record.key) {
                stats.skipped += 1;
                bar.tick();
                continue;
            }
            let Some(raw) = record.value else {
                stats.skipped += 1;
                bar.tick();
                continue;
            };
            let next = rewrite_stored_value(&raw, rewriter);
            match store
                .upsert_post_meta(record.post_id, &record.key, &next)
                .await
            {
                Ok(()) => stats.migrated += 1,
                Err(err) => {
                    stats.warnings += 1;
                    warn!(
                        post_id = record.post_id,
                        meta_key = %record.key,
                        error = %err,
                        "meta update failed; continuing"
                    );
                }
            }
            bar.tick();
        }
    }

    bar.finish();
    info!(
        processed = stats.processed,
        migrated = stats.migrated,
        skipped = stats.skipped,
        warnings = stats.warnings,
        "postmeta: completed"
    );
    Ok(stats)
}
