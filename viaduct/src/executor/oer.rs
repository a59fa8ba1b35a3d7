//! The memoization substrate: object-engine results and their field cells.

use std::sync::{Arc, Mutex, RwLock};

use arcstr::ArcStr;
use fnv::FnvHashMap;
use futures::{
    FutureExt as _,
    channel::oneshot,
    future::Shared,
};

use crate::{
    ast::Name,
    executor::error::{FieldError, FieldResult},
    global_id::GlobalId,
    value::{BackingMap, ResolvedValue, ScalarValue},
};

/// Index of an object-engine result in the request's arena.
///
/// Object references inside [`EngineValue`]s are indices, never owning
/// pointers: object graphs are cyclic and the arena owns every node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct OerId(u32);

/// A value as the engine carries it between resolvers and serialization.
#[derive(Clone, Debug)]
pub enum EngineValue {
    Null,
    Scalar(ScalarValue),
    Enum(Name),
    List(Vec<EngineValue>),
    Object(OerId),
    NodeRef(GlobalId),
}

/// The outcome a cell settles into.
pub(crate) type CellOutcome = FieldResult<EngineValue>;

enum CellState {
    Empty,
    InFlight(Shared<oneshot::Receiver<CellOutcome>>),
    Resolved(EngineValue),
    Error(FieldError),
}

/// The per-(object, response-key) storage slot.
///
/// State machine: `Empty → InFlight → (Resolved | Error)`. Terminal states
/// are write-once; the transition is made under the cell lock, so exactly one
/// task ever obtains the writer and later readers join the in-flight future.
pub(crate) struct FieldCell {
    state: Mutex<CellState>,
}

/// Outcome of attempting to claim a cell for writing.
pub(crate) enum CellClaim {
    /// This task owns the resolution and must [`CellWriter::complete`].
    Claimed(CellWriter),
    /// Another task is resolving; await the shared future.
    Pending(Shared<oneshot::Receiver<CellOutcome>>),
    /// Already terminal.
    Done(CellOutcome),
}

/// The single writer of a claimed cell.
pub(crate) struct CellWriter {
    cell: Arc<FieldCell>,
    tx: oneshot::Sender<CellOutcome>,
}

impl CellWriter {
    /// Writes the terminal state and releases every joined reader.
    pub(crate) fn complete(self, outcome: CellOutcome) {
        {
            let mut state = self.cell.state.lock().expect("field cell poisoned");
            *state = match &outcome {
                Ok(v) => CellState::Resolved(v.clone()),
                Err(e) => CellState::Error(e.clone()),
            };
        }
        // Joined readers may all be gone; that is fine.
        let _ = self.tx.send(outcome);
    }
}

impl FieldCell {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CellState::Empty),
        })
    }

    /// Claims this cell, transitioning `Empty → InFlight` atomically.
    pub(crate) fn claim(self: &Arc<Self>) -> CellClaim {
        let mut state = self.state.lock().expect("field cell poisoned");
        match &*state {
            CellState::Empty => {
                let (tx, rx) = oneshot::channel();
                *state = CellState::InFlight(rx.shared());
                CellClaim::Claimed(CellWriter {
                    cell: Arc::clone(self),
                    tx,
                })
            }
            CellState::InFlight(shared) => CellClaim::Pending(shared.clone()),
            CellState::Resolved(v) => CellClaim::Done(Ok(v.clone())),
            CellState::Error(e) => CellClaim::Done(Err(e.clone())),
        }
    }

    /// The terminal outcome, if the cell has settled.
    pub(crate) fn terminal(&self) -> Option<CellOutcome> {
        match &*self.state.lock().expect("field cell poisoned") {
            CellState::Resolved(v) => Some(Ok(v.clone())),
            CellState::Error(e) => Some(Err(e.clone())),
            _ => None,
        }
    }

    /// Awaits the terminal outcome, joining an in-flight resolution if one
    /// exists. Returns `None` if the cell is still `Empty`.
    pub(crate) async fn settled(self: &Arc<Self>) -> Option<CellOutcome> {
        let pending = {
            let state = self.state.lock().expect("field cell poisoned");
            match &*state {
                CellState::Empty => return None,
                CellState::InFlight(shared) => shared.clone(),
                CellState::Resolved(v) => return Some(Ok(v.clone())),
                CellState::Error(e) => return Some(Err(e.clone())),
            }
        };
        Some(join_outcome(pending).await)
    }
}

/// Awaits a shared in-flight outcome; a dropped writer reads as cancellation.
pub(crate) async fn join_outcome(
    pending: Shared<oneshot::Receiver<CellOutcome>>,
) -> CellOutcome {
    match pending.await {
        Ok(outcome) => outcome,
        Err(oneshot::Canceled) => Err(FieldError::cancelled()),
    }
}

/// One resolved (or resolving) composite object.
pub(crate) struct ObjectEngineResult {
    /// Concrete object type after narrowing.
    type_name: ArcStr,
    /// Set when this object was produced by (or for) a node resolver.
    node_id: Option<GlobalId>,
    /// Field-name-keyed data seeded by the producing resolver.
    backing: RwLock<FnvHashMap<Name, ResolvedValue>>,
    /// Response-key-keyed memoization cells.
    cells: Mutex<FnvHashMap<Name, Arc<FieldCell>>>,
}

impl ObjectEngineResult {
    pub(crate) fn type_name(&self) -> &ArcStr {
        &self.type_name
    }

    pub(crate) fn node_id(&self) -> Option<&GlobalId> {
        self.node_id.as_ref()
    }

    /// The cell for `response_key`, created `Empty` on first access.
    pub(crate) fn cell(&self, response_key: &str) -> Arc<FieldCell> {
        let mut cells = self.cells.lock().expect("OER cells poisoned");
        if let Some(cell) = cells.get(response_key) {
            return Arc::clone(cell);
        }
        let cell = FieldCell::new();
        cells.insert(Name::from(response_key), Arc::clone(&cell));
        cell
    }

    /// The already-created cell for `response_key`, if any.
    pub(crate) fn existing_cell(&self, response_key: &str) -> Option<Arc<FieldCell>> {
        self.cells
            .lock()
            .expect("OER cells poisoned")
            .get(response_key)
            .cloned()
    }

    /// Reads a field's backing value, as seeded by the producing resolver.
    pub(crate) fn backing_value(&self, field_name: &str) -> Option<ResolvedValue> {
        self.backing
            .read()
            .expect("OER backing poisoned")
            .get(field_name)
            .cloned()
    }
}

/// Per-request memoization slot for one node materialization, so a node
/// referenced from several places resolves once.
///
/// `None` outcomes cover both a null node and a failed materialization; the
/// materializing task records any error itself.
#[derive(Clone)]
pub(crate) enum NodeSlot {
    /// Materialization in progress; join the shared future.
    Pending(Shared<oneshot::Receiver<Option<OerId>>>),
    /// Materialized.
    Ready(OerId),
    /// Null node or failed materialization.
    Failed,
}

/// Arena of every object-engine result created during one request.
///
/// Shared by the request's sub-selection executions so [`OerId`]s stay valid
/// when values cross execution scopes. Destroyed with the request.
#[derive(Default)]
pub(crate) struct OerArena {
    slots: RwLock<Vec<Arc<ObjectEngineResult>>>,
}

impl OerArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates an object for `type_name`, seeded with `backing`.
    pub(crate) fn allocate(
        &self,
        type_name: ArcStr,
        node_id: Option<GlobalId>,
        backing: BackingMap,
    ) -> OerId {
        let oer = Arc::new(ObjectEngineResult {
            type_name,
            node_id,
            backing: RwLock::new(backing.into_iter().collect()),
            cells: Mutex::new(FnvHashMap::default()),
        });
        let mut slots = self.slots.write().expect("OER arena poisoned");
        let id = OerId(u32::try_from(slots.len()).expect("OER arena overflow"));
        slots.push(oer);
        id
    }

    pub(crate) fn get(&self, id: OerId) -> Arc<ObjectEngineResult> {
        Arc::clone(&self.slots.read().expect("OER arena poisoned")[id.0 as usize])
    }
}

#[cfg(test)]
mod tests {
    use crate::value::{BackingMap, ScalarValue};

    use super::{CellClaim, EngineValue, OerArena};

    #[test]
    fn cells_are_write_once_and_joinable() {
        let arena = OerArena::new();
        let id = arena.allocate("User".into(), None, BackingMap::new());
        let oer = arena.get(id);

        let cell = oer.cell("name");
        let CellClaim::Claimed(writer) = cell.claim() else {
            panic!("fresh cell must be claimable");
        };
        // A second claim while in flight joins instead.
        assert!(matches!(cell.claim(), CellClaim::Pending(_)));

        writer.complete(Ok(EngineValue::Scalar(ScalarValue::from("Ada"))));
        match cell.claim() {
            CellClaim::Done(Ok(EngineValue::Scalar(s))) => {
                assert_eq!(s.as_str(), Some("Ada"));
            }
            _ => panic!("terminal cell must report Done"),
        }
    }

    #[tokio::test]
    async fn joined_readers_observe_the_single_write() {
        let arena = OerArena::new();
        let id = arena.allocate("User".into(), None, BackingMap::new());
        let oer = arena.get(id);
        let cell = oer.cell("name");

        let CellClaim::Claimed(writer) = cell.claim() else {
            panic!("fresh cell must be claimable");
        };
        let CellClaim::Pending(pending) = cell.claim() else {
            panic!("second claim must join");
        };

        let reader = tokio::spawn(super::join_outcome(pending));
        writer.complete(Ok(EngineValue::Scalar(ScalarValue::from(1))));
        let outcome = reader.await.unwrap().unwrap();
        assert!(matches!(outcome, EngineValue::Scalar(ScalarValue::Int(1))));
    }

    #[test]
    fn same_response_key_maps_to_the_same_cell() {
        let arena = OerArena::new();
        let id = arena.allocate("User".into(), None, BackingMap::new());
        let oer = arena.get(id);
        let a = oer.cell("displayName");
        let b = oer.cell("displayName");
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
