//! Begin/end hooks around object fetches and field resolution.

use std::sync::Arc;

use arcstr::ArcStr;

use crate::resolver::Coordinate;

/// Callback invoked when the instrumented unit of work completes.
///
/// Completion callbacks must be reentrancy-safe and must not take per-field
/// locks: they run on the engine's executor, after every cell of the unit has
/// reached a terminal state.
pub type Completion = Box<dyn FnOnce() + Send>;

fn noop() -> Completion {
    Box::new(|| {})
}

/// Instrumentation surface of the engine.
///
/// Every hook returns the completion callback the engine fires when the unit
/// finishes. The default implementations observe nothing.
pub trait Instrumentation: Send + Sync {
    /// An object fetch begins: the engine starts resolving the fields of one
    /// composite value. The completion fires after all of the object's field
    /// resolvers have completed and every cell is terminal.
    fn begin_fetch_object(&self, _type_name: &ArcStr) -> Completion {
        noop()
    }

    /// Same as [`begin_fetch_object`], for serially-executed mutation roots.
    ///
    /// [`begin_fetch_object`]: Instrumentation::begin_fetch_object
    fn begin_fetch_object_serially(&self, _type_name: &ArcStr) -> Completion {
        noop()
    }

    /// A single field resolution begins.
    fn begin_field_resolve(&self, _coordinate: &Coordinate) -> Completion {
        noop()
    }
}

/// The do-nothing default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {}

/// Sink for the engine's counters.
///
/// The engine reports `viaduct.execute.requests`, `viaduct.execute.errors`,
/// and `viaduct.plan_cache.miss`; implementations bridge these into whatever
/// metrics system the embedder runs.
pub trait MeterRegistry: Send + Sync {
    /// Adds `value` to the named counter.
    fn increment(&self, metric: &str, value: u64);
}

/// Fans hooks out to a list of instrumentations in order; completions fire in
/// reverse order, innermost first.
pub struct ChainedInstrumentation {
    chain: Vec<Arc<dyn Instrumentation>>,
}

impl ChainedInstrumentation {
    pub fn new(chain: Vec<Arc<dyn Instrumentation>>) -> Self {
        Self { chain }
    }

    fn fan_out<F>(&self, begin: F) -> Completion
    where
        F: Fn(&dyn Instrumentation) -> Completion,
    {
        let mut completions: Vec<Completion> =
            self.chain.iter().map(|i| begin(i.as_ref())).collect();
        Box::new(move || {
            while let Some(done) = completions.pop() {
                done();
            }
        })
    }
}

impl Instrumentation for ChainedInstrumentation {
    fn begin_fetch_object(&self, type_name: &ArcStr) -> Completion {
        self.fan_out(|i| i.begin_fetch_object(type_name))
    }

    fn begin_fetch_object_serially(&self, type_name: &ArcStr) -> Completion {
        self.fan_out(|i| i.begin_fetch_object_serially(type_name))
    }

    fn begin_field_resolve(&self, coordinate: &Coordinate) -> Completion {
        self.fan_out(|i| i.begin_field_resolve(coordinate))
    }
}
