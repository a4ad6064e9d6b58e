//! Local-id reconciliation for persisted replicas.
//!
//! Replicas written by older builds may hold records without an explicit
//! `localId`, or several records pointing at the same remote row. This module
//! repairs both while loading a snapshot.
//!
//! # Algorithm
//!
//! 1. Backfill `localId` from the storage key where it is missing
//! 2. Give a fresh id to any record whose id is already taken
//! 3. Drop operations that target no record
//! 4. Clear pending flags on records with nothing queued
//! 5. For each remote id held by more than one record, keep the lowest local
//!    id and move the others' queued operations onto it
//!
//! Running the pass on an already clean replica changes nothing.

use crate::{
    error::Result, snapshot::PersistedRecord, CachedRecord, LocalId, MutationQueue,
    PendingAction, RemoteId, ReplicaStore, StoreSnapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// What a reconciliation pass repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdReport {
    /// Records whose local id was taken from their storage key
    pub backfilled: usize,
    /// Records given a fresh id because theirs collided
    pub reassigned: usize,
    /// Local ids of duplicate rows that were removed
    pub duplicates_removed: Vec<LocalId>,
    /// Operations moved from a removed duplicate to its keeper
    pub retargeted_ops: usize,
    /// Operations dropped because their record no longer exists
    pub orphaned_ops: usize,
    /// Records flagged pending with no queued operation, now cleared
    #[serde(default)]
    pub stale_pending: usize,
}

impl LocalIdReport {
    /// Whether the pass found nothing to repair.
    pub fn is_clean(&self) -> bool {
        self.backfilled == 0
            && self.reassigned == 0
            && self.duplicates_removed.is_empty()
            && self.retargeted_ops == 0
            && self.orphaned_ops == 0
            && self.stale_pending == 0
    }
}

/// Load a snapshot into a replica, repairing local ids on the way.
pub fn restore(snapshot: StoreSnapshot, table: &str) -> Result<(ReplicaStore, LocalIdReport)> {
    snapshot.validate(table)?;

    let mut report = LocalIdReport::default();
    let highest = snapshot
        .records
        .iter()
        .flat_map(|r| [Some(r.key), r.local_id])
        .flatten()
        .max()
        .unwrap_or(0);
    let mut next_local_id = snapshot.next_local_id.max(highest + 1);

    let mut records: BTreeMap<LocalId, CachedRecord> = BTreeMap::new();
    for persisted in snapshot.records {
        let local_id = match persisted.local_id {
            Some(id) => id,
            None => {
                report.backfilled += 1;
                persisted.key
            }
        };
        let local_id = if records.contains_key(&local_id) {
            report.reassigned += 1;
            let fresh = next_local_id;
            next_local_id += 1;
            fresh
        } else {
            local_id
        };
        records.insert(local_id, PersistedRecord::into_cached(persisted, local_id));
    }

    let (ops, orphans): (Vec<_>, Vec<_>) = snapshot
        .queue
        .into_iter()
        .partition(|op| records.contains_key(&op.target_local_id));
    report.orphaned_ops = orphans.len();

    let queue = MutationQueue::from_parts(ops, snapshot.next_queue_id);
    let mut store = ReplicaStore::from_parts(table.to_string(), records, queue, next_local_id);

    let with_ops: HashSet<LocalId> = store
        .queue()
        .peek_all()
        .iter()
        .map(|op| op.target_local_id)
        .collect();
    let stale: Vec<LocalId> = store
        .records()
        .filter(|r| {
            (r.has_pending_writes || r.pending_action != PendingAction::None)
                && !with_ops.contains(&r.local_id)
        })
        .map(|r| r.local_id)
        .collect();
    report.stale_pending = stale.len();

    for local_id in with_ops.into_iter().chain(stale) {
        store.refresh_pending_flags(local_id);
    }

    let dedupe = dedupe_remote_ids(&mut store);
    report.duplicates_removed = dedupe.duplicates_removed;
    report.retargeted_ops = dedupe.retargeted_ops;

    Ok((store, report))
}

/// Collapse records sharing a remote id onto the one with the lowest local id.
///
/// The first writer wins and the others are discarded without merging fields.
/// Operations queued against a discarded row move to the keeper.
pub fn dedupe_remote_ids(store: &mut ReplicaStore) -> LocalIdReport {
    let mut report = LocalIdReport::default();

    let mut groups: HashMap<RemoteId, Vec<LocalId>> = HashMap::new();
    for record in store.records() {
        if let Some(remote_id) = &record.remote_id {
            groups
                .entry(remote_id.clone())
                .or_default()
                .push(record.local_id);
        }
    }

    let mut groups: Vec<Vec<LocalId>> = groups.into_values().filter(|g| g.len() > 1).collect();
    groups.sort();

    for mut group in groups {
        group.sort_unstable();
        let keeper = group[0];
        let mut moved_any = false;

        for duplicate in group.into_iter().skip(1) {
            if store.remove_record(duplicate).is_none() {
                continue;
            }
            let moved = store.queue_mut().retarget(duplicate, keeper);
            moved_any |= moved > 0;
            report.retargeted_ops += moved;
            report.duplicates_removed.push(duplicate);
        }

        if moved_any {
            store.refresh_pending_flags(keeper);
        }
    }

    report
}
