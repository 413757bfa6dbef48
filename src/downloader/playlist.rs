// Playlist selector: browse, filter, and range-select entries.

use crate::downloader::errors::RangeError;
use crate::downloader::models::PlaylistEntry;

/// Case-insensitive substring match on title and uploader. An empty or
/// whitespace-only query keeps every entry, in original order.
pub fn filter_entries<'a>(entries: &'a [PlaylistEntry], query: &str) -> Vec<&'a PlaylistEntry> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return entries.iter().collect();
    }
    entries
        .iter()
        .filter(|e| {
            e.title.to_lowercase().contains(&query)
                || e.uploader
                    .as_deref()
                    .map(|u| u.to_lowercase().contains(&query))
                    .unwrap_or(false)
        })
        .collect()
}

/// Validate a 1-based inclusive range against the playlist length.
pub fn select_range(len: usize, from: usize, to: usize) -> Result<(usize, usize), RangeError> {
    if from == 0 || to == 0 || from > to || to > len {
        return Err(RangeError { from, to, len });
    }
    Ok((from, to))
}

/// The entries a valid range denotes, in original order.
pub fn select_entries(
    entries: &[PlaylistEntry],
    from: usize,
    to: usize,
) -> Result<&[PlaylistEntry], RangeError> {
    let (from, to) = select_range(entries.len(), from, to)?;
    Ok(&entries[from - 1..to])
}

/// Render explicit 1-based indices as a `--playlist-items` expression,
/// collapsing consecutive runs.
pub fn items_expression(indices: &[usize]) -> String {
    let mut sorted: Vec<usize> = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let push = |parts: &mut Vec<String>, start: usize, end: usize| {
        parts.push(if start == end { start.to_string() } else { format!("{start}-{end}") });
    };
    let (mut start, mut prev) = (first, first);
    for i in iter {
        if i == prev + 1 {
            prev = i;
            continue;
        }
        push(&mut parts, start, prev);
        start = i;
        prev = i;
    }
    push(&mut parts, start, prev);
    parts.join(",")
}
