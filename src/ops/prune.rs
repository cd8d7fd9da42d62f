//! Version pruning
//!
//! A node created at version `c` and orphaned at version `o` is reachable
//! from every version in `[c, o)`. It can be deleted once no retained version
//! falls in that interval. Nodes never orphaned belong to the latest version,
//! which is always retained.

use crate::model::NodeKey;
use crate::store::{Batch, NodeDb};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Delete every version in `versions` missing from `retain` (the latest is
/// kept regardless) and every node no retained version can reach.
///
/// Root and orphan records are rewritten in one batch. Returns the number of
/// node entries deleted.
pub fn prune_versions(
    ndb: &NodeDb,
    versions: &mut BTreeMap<i64, Option<NodeKey>>,
    retain: &BTreeSet<i64>,
) -> Result<usize> {
    let Some(&latest) = versions.keys().next_back() else {
        return Ok(0);
    };
    let mut kept: BTreeSet<i64> = retain
        .iter()
        .filter(|v| versions.contains_key(*v))
        .copied()
        .collect();
    kept.insert(latest);

    let dropped: Vec<i64> = versions
        .keys()
        .filter(|v| !kept.contains(*v))
        .copied()
        .collect();

    let mut batch = Batch::new();
    let mut deleted = Vec::new();
    for (orphaned_at, keys) in ndb.orphans()? {
        let (dead, live): (Vec<NodeKey>, Vec<NodeKey>) = keys
            .into_iter()
            .partition(|nk| kept.range(nk.version()..orphaned_at).next().is_none());
        if dead.is_empty() {
            continue;
        }

        for nk in &dead {
            NodeDb::batch_delete_node(&mut batch, nk);
        }
        if live.is_empty() {
            NodeDb::batch_delete_orphans(&mut batch, orphaned_at);
        } else {
            NodeDb::batch_set_orphans(&mut batch, orphaned_at, &live)?;
        }
        debug!(orphaned_at, dead = dead.len(), live = live.len(), "pruned orphan record");
        deleted.extend(dead);
    }

    for version in &dropped {
        NodeDb::batch_delete_root(&mut batch, *version);
    }
    if batch.is_empty() {
        return Ok(0);
    }

    ndb.write(batch)?;
    ndb.evict(&deleted);
    for version in &dropped {
        versions.remove(version);
    }

    info!(
        versions = dropped.len(),
        nodes = deleted.len(),
        retained = kept.len(),
        "pruned versions"
    );
    Ok(deleted.len())
}
