//! Attachment pass: record the bucket location for each uploaded image.
//!
//! Nothing is rewritten here; the pass attaches an `amazonS3_info` meta row
//! telling the offloading plugin where the file now lives. An attachment is
//! only eligible when it has exactly one `_wp_attached_file` row and no
//! bucket meta yet, which is what makes a re-run a no-op.

use super::StrategyStats;
use crate::progress::Progress;
use crate::scanner;
use crate::store::{BucketMeta, MigrationStore, BUCKET_META_KEY};
use anyhow::Result;
use tracing::{info, warn};

/// Object key for an attachment file path. Non-primary blogs on a multisite
/// install upload under `sites/<blog_id>/`.
fn object_key(attached_file: &str, blog_id: u64) -> String {
    if blog_id != 1 {
        format!("wp-content/uploads/sites/{blog_id}/{attached_file}")
    } else {
        format!("wp-content/uploads/{attached_file}")
    }
}

pub async fn run(
    store: &dyn MigrationStore,
    bucket: &str,
    blog_id: u64,
    batch: u64,
    progress: &dyn Progress,
) -> Result<StrategyStats> {
    let total = store.count_attachments().await?;
    let mut bar = progress.start("Migrate Attachments", total);
    let mut stats = StrategyStats::default();

    for offset in scanner::offsets(total, batch) {
        for row in store.fetch_attachments(batch, offset).await? {
            stats.processed += 1;
            let attached = store.attached_files(row.id).await?;
            let already_migrated = store.has_bucket_meta(row.id).await?;
            if already_migrated || attached.len() != 1 {
                stats.skipped += 1;
                bar.tick();
                continue;
            }
            let meta = BucketMeta {
                bucket: bucket.to_string(),
                key: object_key(&attached[0], blog_id),
            };
            match store
                .insert_post_meta(row.id, BUCKET_META_KEY, &meta.to_serialized())
                .await
            {
                Ok(()) => stats.migrated += 1,
                Err(err) => {
                    stats.warnings += 1;
                    warn!(post_id = row.id, error = %err, "attachment meta write failed; continuing");
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
        "images: completed"
    );
    Ok(stats)
}
