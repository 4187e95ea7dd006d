//! Persistence layer for the migration passes.
//!
//! Strategies talk to a `MigrationStore` trait object so the scan/rewrite
//! logic stays independent of the concrete database; `MySqlStore` is the
//! production implementation against a WordPress schema.

use crate::db::{Db, Tables};
use crate::serialized::{self, ArrayKey, Value};
use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::Row;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Meta key holding an attachment's uploaded file path.
pub const ATTACHED_FILE_KEY: &str = "_wp_attached_file";
/// Meta key recording that an attachment now lives in the bucket.
pub const BUCKET_META_KEY: &str = "amazonS3_info";

#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub id: u64,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: u64,
    pub guid: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PostMetaRow {
    pub post_id: u64,
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OptionRow {
    pub name: String,
    pub value: String,
}

/// Bucket location recorded against a migrated attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMeta {
    pub bucket: String,
    pub key: String,
}

impl BucketMeta {
    /// Serialized form stored in the meta value, readable by the site's
    /// offloading plugin.
    pub fn to_serialized(&self) -> String {
        let mut map: IndexMap<ArrayKey, Value> = IndexMap::with_capacity(2);
        map.insert(
            ArrayKey::Str("bucket".to_string()),
            Value::Str(self.bucket.clone()),
        );
        map.insert(
            ArrayKey::Str("key".to_string()),
            Value::Str(self.key.clone()),
        );
        serialized::encode(&Value::Array(map))
    }
}

#[async_trait]
pub trait MigrationStore: Send + Sync {
    async fn count_attachments(&self) -> Result<u64>;
    async fn fetch_attachments(&self, limit: u64, offset: u64) -> Result<Vec<AttachmentRow>>;
    /// Every `_wp_attached_file` value recorded against the attachment.
    async fn attached_files(&self, post_id: u64) -> Result<Vec<String>>;
    async fn has_bucket_meta(&self, post_id: u64) -> Result<bool>;
    async fn insert_post_meta(&self, post_id: u64, key: &str, value: &str) -> Result<()>;

    async fn count_posts(&self) -> Result<u64>;
    async fn fetch_posts(&self, limit: u64, offset: u64) -> Result<Vec<PostRow>>;
    async fn update_post(&self, post: &PostRow) -> Result<()>;

    async fn count_post_meta(&self) -> Result<u64>;
    async fn fetch_post_meta(&self, limit: u64, offset: u64) -> Result<Vec<PostMetaRow>>;
    async fn upsert_post_meta(&self, post_id: u64, key: &str, value: &str) -> Result<()>;

    async fn count_options(&self) -> Result<u64>;
    async fn fetch_options(&self, limit: u64, offset: u64) -> Result<Vec<OptionRow>>;
    async fn upsert_option(&self, name: &str, value: &str) -> Result<()>;

    /// Trusted-source bypass: disable content filtering on post writes for
    /// the rest of the run. Migrated content was already filtered when it
    /// was first saved.
    fn suppress_content_filters(&self);
}

/// Hook applied to post content on save, standing in for the CMS's kses
/// sanitization pipeline.
pub trait ContentFilter: Send + Sync {
    fn filter(&self, content: &str) -> String;
}

pub struct MySqlStore {
    db: Db,
    tables: Tables,
    content_filter: Option<Arc<dyn ContentFilter>>,
    filters_suppressed: AtomicBool,
}

impl MySqlStore {
    pub fn new(db: Db, tables: Tables) -> Self {
        Self {
            db,
            tables,
            content_filter: None,
            filters_suppressed: AtomicBool::new(false),
        }
    }

    pub fn with_content_filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.content_filter = Some(filter);
        self
    }
}

// Table names come from `Tables` (operator-configured prefix), never from
// row data; values always go through bind parameters.
#[async_trait]
impl MigrationStore for MySqlStore {
    async fn count_attachments(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE post_type = 'attachment'",
            self.tables.posts()
        ))
        .persistent(false)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn fetch_attachments(&self, limit: u64, offset: u64) -> Result<Vec<AttachmentRow>> {
        let rows = sqlx::query(&format!(
            "SELECT ID FROM {} WHERE post_type = 'attachment' ORDER BY ID LIMIT ? OFFSET ?",
            self.tables.posts()
        ))
        .persistent(false)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(AttachmentRow {
                    id: r.try_get::<u64, _>("ID")?,
                })
            })
            .collect()
    }

    async fn attached_files(&self, post_id: u64) -> Result<Vec<String>> {
        let values: Vec<Option<String>> = sqlx::query_scalar(&format!(
            "SELECT meta_value FROM {} WHERE post_id = ? AND meta_key = ?",
            self.tables.postmeta()
        ))
        .persistent(false)
        .bind(post_id)
        .bind(ATTACHED_FILE_KEY)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(values.into_iter().flatten().collect())
    }

    async fn has_bucket_meta(&self, post_id: u64) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE post_id = ? AND meta_key = ?",
            self.tables.postmeta()
        ))
        .persistent(false)
        .bind(post_id)
        .bind(BUCKET_META_KEY)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(n > 0)
    }

    async fn insert_post_meta(&self, post_id: u64, key: &str, value: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (post_id, meta_key, meta_value) VALUES (?, ?, ?)",
            self.tables.postmeta()
        ))
        .persistent(false)
        .bind(post_id)
        .bind(key)
        .bind(value)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn count_posts(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            self.tables.posts()
        ))
        .persistent(false)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn fetch_posts(&self, limit: u64, offset: u64) -> Result<Vec<PostRow>> {
        let rows = sqlx::query(&format!(
            "SELECT ID, guid, post_content FROM {} ORDER BY ID LIMIT ? OFFSET ?",
            self.tables.posts()
        ))
        .persistent(false)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(PostRow {
                    id: r.try_get::<u64, _>("ID")?,
                    guid: r.try_get::<String, _>("guid")?,
                    content: r.try_get::<String, _>("post_content")?,
                })
            })
            .collect()
    }

    async fn update_post(&self, post: &PostRow) -> Result<()> {
        let content = match &self.content_filter {
            Some(filter) if !self.filters_suppressed.load(Ordering::Relaxed) => {
                filter.filter(&post.content)
            }
            _ => post.content.clone(),
        };
        sqlx::query(&format!(
            "UPDATE {} SET guid = ?, post_content = ? WHERE ID = ?",
            self.tables.posts()
        ))
        .persistent(false)
        .bind(&post.guid)
        .bind(&content)
        .bind(post.id)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn count_post_meta(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            self.tables.postmeta()
        ))
        .persistent(false)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn fetch_post_meta(&self, limit: u64, offset: u64) -> Result<Vec<PostMetaRow>> {
        let rows = sqlx::query(&format!(
            "SELECT post_id, meta_key, meta_value FROM {} ORDER BY meta_id LIMIT ? OFFSET ?",
            self.tables.postmeta()
        ))
        .persistent(false)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(PostMetaRow {
                    post_id: r.try_get::<u64, _>("post_id")?,
                    key: r.try_get::<String, _>("meta_key")?,
                    value: r.try_get::<Option<String>, _>("meta_value")?,
                })
            })
            .collect()
    }

    async fn upsert_post_meta(&self, post_id: u64, key: &str, value: &str) -> Result<()> {
        // rows_affected can't distinguish "no row" from "no change" on an
        // UPDATE, so existence is checked explicitly.
        let existing: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE post_id = ? AND meta_key = ?",
            self.tables.postmeta()
        ))
        .persistent(false)
        .bind(post_id)
        .bind(key)
        .fetch_one(&self.db.pool)
        .await?;
        if existing > 0 {
            sqlx::query(&format!(
                "UPDATE {} SET meta_value = ? WHERE post_id = ? AND meta_key = ?",
                self.tables.postmeta()
            ))
            .persistent(false)
            .bind(value)
            .bind(post_id)
            .bind(key)
            .execute(&self.db.pool)
            .await?;
        } else {
            self.insert_post_meta(post_id, key, value).await?;
        }
        Ok(())
    }

    async fn count_options(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            self.tables.options()
        ))
        .persistent(false)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn fetch_options(&self, limit: u64, offset: u64) -> Result<Vec<OptionRow>> {
        let rows = sqlx::query(&format!(
            "SELECT option_name, option_value FROM {} ORDER BY option_id LIMIT ? OFFSET ?",
            self.tables.options()
        ))
        .persistent(false)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(OptionRow {
                    name: r.try_get::<String, _>("option_name")?,
                    value: r.try_get::<String, _>("option_value")?,
                })
            })
            .collect()
    }

    async fn upsert_option(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (option_name, option_value) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE option_value = VALUES(option_value)",
            self.tables.options()
        ))
        .persistent(false)
        .bind(name)
        .bind(value)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    fn suppress_content_filters(&self) {
        self.filters_suppressed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory `MigrationStore` for strategy and orchestrator tests.

    use super::*;
    use anyhow::bail;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
        /// When set, every meta write fails (per-record failure injection).
        pub fail_meta_writes: AtomicBool,
        filters_suppressed: AtomicBool,
        /// Post updates that would have gone through a content filter.
        pub filtered_updates: AtomicU64,
    }

    #[derive(Default)]
    struct Inner {
        attachment_ids: Vec<u64>,
        posts: BTreeMap<u64, (String, String)>,
        postmeta: Vec<(u64, String, Option<String>)>,
        options: BTreeMap<String, String>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_attachment(&self, id: u64, attached_files: &[&str]) {
            let mut inner = self.inner.lock().unwrap();
            inner.attachment_ids.push(id);
            for file in attached_files {
                inner
                    .postmeta
                    .push((id, ATTACHED_FILE_KEY.to_string(), Some(file.to_string())));
            }
        }

        pub fn add_post(&self, id: u64, guid: &str, content: &str) {
            self.inner
                .lock()
                .unwrap()
                .posts
                .insert(id, (guid.to_string(), content.to_string()));
        }

        pub fn add_meta(&self, post_id: u64, key: &str, value: Option<&str>) {
            self.inner.lock().unwrap().postmeta.push((
                post_id,
                key.to_string(),
                value.map(str::to_string),
            ));
        }

        pub fn add_option(&self, name: &str, value: &str) {
            self.inner
                .lock()
                .unwrap()
                .options
                .insert(name.to_string(), value.to_string());
        }

        pub fn post(&self, id: u64) -> Option<(String, String)> {
            self.inner.lock().unwrap().posts.get(&id).cloned()
        }

        pub fn meta_values(&self, post_id: u64, key: &str) -> Vec<Option<String>> {
            self.inner
                .lock()
                .unwrap()
                .postmeta
                .iter()
                .filter(|(pid, k, _)| *pid == post_id && k == key)
                .map(|(_, _, v)| v.clone())
                .collect()
        }

        pub fn option(&self, name: &str) -> Option<String> {
            self.inner.lock().unwrap().options.get(name).cloned()
        }

        pub fn filters_suppressed(&self) -> bool {
            self.filters_suppressed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MigrationStore for MemoryStore {
        async fn count_attachments(&self) -> Result<u64> {
            Ok(self.inner.lock().unwrap().attachment_ids.len() as u64)
        }

        async fn fetch_attachments(&self, limit: u64, offset: u64) -> Result<Vec<AttachmentRow>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .attachment_ids
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|&id| AttachmentRow { id })
                .collect())
        }

        async fn attached_files(&self, post_id: u64) -> Result<Vec<String>> {
            Ok(self
                .meta_values(post_id, ATTACHED_FILE_KEY)
                .into_iter()
                .flatten()
                .collect())
        }

        async fn has_bucket_meta(&self, post_id: u64) -> Result<bool> {
            Ok(!self.meta_values(post_id, BUCKET_META_KEY).is_empty())
        }

        async fn insert_post_meta(&self, post_id: u64, key: &str, value: &str) -> Result<()> {
            if self.fail_meta_writes.load(Ordering::SeqCst) {
                bail!("injected meta write failure");
            }
            self.add_meta(post_id, key, Some(value));
            Ok(())
        }

        async fn count_posts(&self) -> Result<u64> {
            Ok(self.inner.lock().unwrap().posts.len() as u64)
        }

        async fn fetch_posts(&self, limit: u64, offset: u64) -> Result<Vec<PostRow>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .posts
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|(&id, (guid, content))| PostRow {
                    id,
                    guid: guid.clone(),
                    content: content.clone(),
                })
                .collect())
        }

        async fn update_post(&self, post: &PostRow) -> Result<()> {
            if !self.filters_suppressed() {
                self.filtered_updates.fetch_add(1, Ordering::SeqCst);
            }
            self.inner
                .lock()
                .unwrap()
                .posts
                .insert(post.id, (post.guid.clone(), post.content.clone()));
            Ok(())
        }

        async fn count_post_meta(&self) -> Result<u64> {
            Ok(self.inner.lock().unwrap().postmeta.len() as u64)
        }

        async fn fetch_post_meta(&self, limit: u64, offset: u64) -> Result<Vec<PostMetaRow>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .postmeta
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|(post_id, key, value)| PostMetaRow {
                    post_id: *post_id,
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect())
        }

        async fn upsert_post_meta(&self, post_id: u64, key: &str, value: &str) -> Result<()> {
            if self.fail_meta_writes.load(Ordering::SeqCst) {
                bail!("injected meta write failure");
            }
            let mut inner = self.inner.lock().unwrap();
            for entry in inner.postmeta.iter_mut() {
                if entry.0 == post_id && entry.1 == key {
                    entry.2 = Some(value.to_string());
                    return Ok(());
                }
            }
            inner
                .postmeta
                .push((post_id, key.to_string(), Some(value.to_string())));
            Ok(())
        }

        async fn count_options(&self) -> Result<u64> {
            Ok(self.inner.lock().unwrap().options.len() as u64)
        }

        async fn fetch_options(&self, limit: u64, offset: u64) -> Result<Vec<OptionRow>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .options
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|(name, value)| OptionRow {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect())
        }

        async fn upsert_option(&self, name: &str, value: &str) -> Result<()> {
            self.add_option(name, value);
            Ok(())
        }

        fn suppress_content_filters(&self) {
            self.filters_suppressed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BucketMeta;
    use crate::serialized::{self, ArrayKey, Value};

    #[test]
    fn bucket_meta_serializes_to_php_array() {
        let meta = BucketMeta {
            bucket: "testbucket".to_string(),
            key: "wp-content/uploads/2014/03/cat.png".to_string(),
        };
        let raw = meta.to_serialized();
        assert_eq!(
            raw,
            "a:2:{s:6:\"bucket\";s:10:\"testbucket\";s:3:\"key\";s:34:\"wp-content/uploads/2014/03/cat.png\";}"
        );
        // Decodes back with both members intact.
        let Value::Array(map) = serialized::decode(&raw).unwrap() else {
            panic!("expected array");
        };
        assert_eq!(
            map[&ArrayKey::Str("bucket".to_string())],
            Value::Str("testbucket".to_string())
        );
    }
}
