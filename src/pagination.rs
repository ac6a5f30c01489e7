//! Newest-first window selection over server identifier lists
//!
//! The server returns the full ascending list of matching identifiers;
//! pagination is applied afterwards, entirely client-side.

/// Select a page of identifiers, newest first
///
/// `ids_ascending` is ordered oldest to newest. The newest `offset` entries
/// are skipped, then up to `limit` entries are taken, moving towards older
/// messages. `offset >= ids.len()` or `limit == 0` yields an empty page.
pub fn newest_first_page(ids_ascending: &[u32], limit: usize, offset: usize) -> Vec<u32> {
    let total = ids_ascending.len();
    if limit == 0 || offset >= total {
        return Vec::new();
    }
    let end = total - offset;
    let start = end.saturating_sub(limit);
    ids_ascending[start..end].iter().rev().copied().collect()
}

/// The last `limit` identifiers, newest first
pub fn latest(ids_ascending: &[u32], limit: usize) -> Vec<u32> {
    newest_first_page(ids_ascending, limit, 0)
}
