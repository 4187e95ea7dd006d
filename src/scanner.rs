//! Offset stepping for batched table scans.
//!
//! The row count is taken once per pass, before the first page. A run that
//! races concurrent writers (or resumes after an interruption) can re-read
//! or miss rows at page boundaries; every write path is idempotent, so a
//! re-read converges to the same end state.

/// Yields `0, limit, 2*limit, ...` while the offset stays below `total`.
pub fn offsets(total: u64, limit: u64) -> impl Iterator<Item = u64> {
    let step = limit.max(1);
    (0u64..)
        .map(move |page| page * step)
        .take_while(move |offset| *offset < total)
}
