//! Options pass: rewrite uploads URLs in site configuration values.

use super::{rewrite_stored_value, StrategyStats};
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
    let total = store.count_options().await?;
    let mut bar = progress.start("Migrate Options", total);
    let mut stats = StrategyStats::default();

    for offset in scanner::offsets(total, batch) {
        for option in store.fetch_options(batch, offset).await? {
            stats.processed += 1;
            let next = rewrite_stored_value(&option.value, rewriter);
            match store.upsert_option(&option.name, &next).await {
                Ok(()) => stats.migrated += 1,
                Err(err) => {
                    stats.warnings += 1;
                    warn!(option = %option.name, error = %err, "option update failed; continuing");
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
        "options: completed"
    );
    Ok(stats)
}
