//! Merging a freshly fetched episode list into the stored one.

use std::collections::{HashMap, HashSet};

use super::types::EpisodeRecord;

/// Merged episode list plus the key-level diff against the stored list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciled {
    pub items: Vec<EpisodeRecord>,
    /// Keys present now but not before.
    pub added: Vec<String>,
    /// Keys present before but not now.
    pub deleted: Vec<String>,
}

/// Diffs `new_items` against `old_items` by episode key.
///
/// An episode whose media URL changed shows up as one deleted and one added
/// key. When both sides carry the same stable episode id, the new record
/// takes over the old key, so downstream state (imported posts, downloaded
/// images) stays attached to it.
///
/// With `keep_deleted`, episodes that disappeared from the feed are appended
/// to the result instead of being dropped.
pub fn reconcile(
    mut new_items: Vec<EpisodeRecord>,
    old_items: Option<&[EpisodeRecord]>,
    keep_deleted: bool,
) -> Reconciled {
    let Some(old_items) = old_items else {
        return Reconciled {
            added: new_items.iter().map(|item| item.key.clone()).collect(),
            items: new_items,
            deleted: Vec::new(),
        };
    };

    let (mut added, mut deleted) = diff(&new_items, old_items);

    if !added.is_empty() && !deleted.is_empty() {
        let deleted_by_id: HashMap<&str, &str> = old_items
            .iter()
            .filter(|item| deleted.contains(&item.key))
            .map(|item| (item.episode_id.as_str(), item.key.as_str()))
            .collect();

        let taken: HashSet<&str> = new_items.iter().map(|item| item.key.as_str()).collect();
        let mut rekeyed: Vec<(usize, String)> = Vec::new();
        let mut claimed: HashSet<&str> = HashSet::new();
        for (pos, item) in new_items.iter().enumerate() {
            if !added.contains(&item.key) {
                continue;
            }
            let Some(&old_key) = deleted_by_id.get(item.episode_id.as_str()) else {
                continue;
            };
            if taken.contains(old_key) || !claimed.insert(old_key) {
                continue;
            }
            rekeyed.push((pos, old_key.to_string()));
        }

        for (pos, old_key) in rekeyed {
            tracing::debug!(from = %new_items[pos].key, to = %old_key, "Media URL changed, keeping episode key");
            new_items[pos].key = old_key;
        }

        (added, deleted) = diff(&new_items, old_items);
    }

    if keep_deleted && !deleted.is_empty() {
        let gone: HashSet<&str> = deleted.iter().map(String::as_str).collect();
        new_items.extend(
            old_items
                .iter()
                .filter(|item| gone.contains(item.key.as_str()))
                .cloned(),
        );
    }

    Reconciled {
        items: new_items,
        added,
        deleted,
    }
}

/// (added, deleted) keys, each in list order.
fn diff(new_items: &[EpisodeRecord], old_items: &[EpisodeRecord]) -> (Vec<String>, Vec<String>) {
    let new_keys: HashSet<&str> = new_items.iter().map(|i| i.key.as_str()).collect();
    let old_keys: HashSet<&str> = old_items.iter().map(|i| i.key.as_str()).collect();

    let added = new_items
        .iter()
        .filter(|i| !old_keys.contains(i.key.as_str()))
        .map(|i| i.key.clone())
        .collect();
    let deleted = old_items
        .iter()
        .filter(|i| !new_keys.contains(i.key.as_str()))
        .map(|i| i.key.clone())
        .collect();
    (added, deleted)
}
