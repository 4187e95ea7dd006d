//! The four migration passes, run in a fixed order by the orchestrator:
//! images, posts, postmeta, options.

use crate::rewrite::Rewriter;
use crate::serialized::{self, Value};

pub mod images;
pub mod options;
pub mod postmeta;
pub mod posts;

/// Per-pass accounting. Warnings never abort a pass; they surface in the
/// run summary so the operator can grep the log afterwards.
#[derive(Debug, Default, Clone)]
pub struct StrategyStats {
    pub processed: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub warnings: u64,
}

/// Rewrite a stored value that may be PHP-serialized. Serialized arrays get
/// a depth-one rewrite of their string members and are re-encoded; anything
/// else (plain text, serialized scalars, undecodable payloads) is rewritten
/// as raw text.
pub(crate) fn rewrite_stored_value(raw: &str, rewriter: &Rewriter) -> String {
    match serialized::decode(raw) {
        Ok(value @ Value::Array(_)) => {
            serialized::encode(&serialized::rewrite_string_values(value, |s| {
                rewriter.rewrite(s)
            }))
        }
        _ => rewriter.rewrite(raw),
    }
}
