//! Grouping of sibling field resolutions into single `batch_resolve` calls.

use std::sync::{Arc, Mutex};

use arcstr::ArcStr;
use fnv::FnvHashMap;
use futures::channel::oneshot;
use indexmap::IndexMap;

use crate::{
    executor::{
        ExecutionParameters, FieldExecutionContext,
        error::{ErrorKind, FieldError, FieldResult},
    },
    resolver::BatchFieldResolver,
    value::ResolvedValue,
};

/// One prepared contributor of a batch group.
pub(crate) struct BatchEntry {
    /// The argument-record equivalence class.
    pub class_key: String,
    pub ctx: FieldExecutionContext,
    pub tx: oneshot::Sender<FieldResult<ResolvedValue>>,
}

/// A group is scoped to one plan step and one concrete parent type, so
/// parents of different types never share a `batch_resolve` call.
pub(crate) type GroupKey = (usize, ArcStr);

struct StepGroup {
    expected: usize,
    seen: usize,
    entries: Vec<BatchEntry>,
}

/// Collects the contributors of each batchable step across one set of
/// sibling parents.
///
/// Every counted parent either submits a prepared context or withdraws
/// (memoized cell, denied access, failed preparation). The task that
/// completes the count takes the whole group for dispatch: the batch fires
/// once all possible contributors have reported.
#[derive(Default)]
pub(crate) struct BatchCollector {
    groups: Mutex<FnvHashMap<GroupKey, StepGroup>>,
}

impl BatchCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declares how many parents may contribute to the group.
    pub(crate) fn expect(&self, key: GroupKey, count: usize) {
        let mut groups = self.groups.lock().expect("batch collector poisoned");
        groups.insert(
            key,
            StepGroup {
                expected: count,
                seen: 0,
                entries: Vec::with_capacity(count),
            },
        );
    }

    /// Submits a prepared contributor. Returns the full group when this
    /// submission completed it.
    pub(crate) fn submit(&self, key: GroupKey, entry: BatchEntry) -> Option<Vec<BatchEntry>> {
        let mut groups = self.groups.lock().expect("batch collector poisoned");
        let group = groups.get_mut(&key).expect("unexpected batch group");
        group.seen += 1;
        group.entries.push(entry);
        Self::take_if_complete(group)
    }

    /// Reports that a counted parent will not contribute. Returns the group
    /// when this withdrawal completed it.
    pub(crate) fn withdraw(&self, key: GroupKey) -> Option<Vec<BatchEntry>> {
        let mut groups = self.groups.lock().expect("batch collector poisoned");
        let group = groups.get_mut(&key).expect("unexpected batch group");
        group.seen += 1;
        Self::take_if_complete(group)
    }

    fn take_if_complete(group: &mut StepGroup) -> Option<Vec<BatchEntry>> {
        if group.seen == group.expected && !group.entries.is_empty() {
            Some(std::mem::take(&mut group.entries))
        } else {
            None
        }
    }
}

/// Dispatches a completed group: one `batch_resolve` call per argument
/// equivalence class, results distributed element-wise.
pub(crate) async fn dispatch(
    params: &ExecutionParameters,
    resolver: &Arc<dyn BatchFieldResolver>,
    entries: Vec<BatchEntry>,
) {
    let mut classes: IndexMap<String, Vec<BatchEntry>> = IndexMap::new();
    for entry in entries {
        classes.entry(entry.class_key.clone()).or_default().push(entry);
    }

    for (_, class) in classes {
        if params.shared.cancellation.is_cancelled() {
            for entry in class {
                let _ = entry.tx.send(Err(FieldError::cancelled()));
            }
            continue;
        }

        let ctxs: Vec<FieldExecutionContext> =
            class.iter().map(|e| e.ctx.clone()).collect();
        match resolver.batch_resolve(&ctxs).await {
            Ok(results) if results.len() == class.len() => {
                for (entry, result) in class.into_iter().zip(results) {
                    let _ = entry.tx.send(result);
                }
            }
            Ok(results) => {
                let error = FieldError::new(
                    format!(
                        "batch_resolve returned {} results for {} contexts",
                        results.len(),
                        class.len(),
                    ),
                    ErrorKind::BatchSizeMismatch,
                );
                for entry in class {
                    let _ = entry.tx.send(Err(error.clone()));
                }
            }
            Err(e) => {
                for entry in class {
                    let _ = entry.tx.send(Err(e.clone()));
                }
            }
        }
    }
}
