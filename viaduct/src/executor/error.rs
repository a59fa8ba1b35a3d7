//! The error taxonomy observable to clients and instrumentation.

use std::{cmp::Ordering, fmt, sync::RwLock};

use serde::{Serialize, Serializer, ser::SerializeMap as _};

use crate::{parser::SourcePosition, value::Value};

/// Classification of a field-level failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A resolver threw.
    DataFetching,
    /// A resolver read a field outside its declared required set.
    UnsetSelection,
    /// An ID could not be decoded, or referenced a non-node type.
    InvalidGlobalId,
    /// The document failed validation against the active schema.
    Validation,
    /// The request was cancelled or timed out.
    Cancelled,
    /// An access checker denied the field.
    AccessDenied,
    /// A sub-selection could not be executed.
    SubqueryExecution,
    /// A `batch_resolve` returned the wrong number of results.
    BatchSizeMismatch,
}

impl ErrorKind {
    /// The classification string clients see in `extensions`.
    pub fn classification(self) -> &'static str {
        match self {
            Self::DataFetching => "DataFetchingException",
            Self::UnsetSelection => "UnsetSelection",
            Self::InvalidGlobalId => "InvalidGlobalID",
            Self::Validation => "ValidationError",
            Self::Cancelled => "Cancelled",
            Self::AccessDenied => "AccessDenied",
            Self::SubqueryExecution => "SubqueryExecutionException",
            Self::BatchSizeMismatch => "BatchSizeMismatch",
        }
    }
}

/// Error produced while resolving a single field.
///
/// Carries a human-readable message, a [`classification`], and optional
/// structured `extensions`. Any [`Display`]-able error converts into one,
/// which keeps `?` usable inside resolvers.
///
/// [`classification`]: ErrorKind::classification
/// [`Display`]: fmt::Display
#[derive(Clone, Debug, PartialEq)]
pub struct FieldError {
    message: String,
    kind: ErrorKind,
    extensions: Value,
}

impl<T: fmt::Display> From<T> for FieldError {
    fn from(e: T) -> Self {
        Self {
            message: e.to_string(),
            kind: ErrorKind::DataFetching,
            extensions: Value::Null,
        }
    }
}

impl FieldError {
    /// Constructs a new [`FieldError`] with the given classification.
    #[must_use]
    pub fn new<T: fmt::Display>(message: T, kind: ErrorKind) -> Self {
        Self {
            message: message.to_string(),
            kind,
            extensions: Value::Null,
        }
    }

    /// Attaches structured `extensions` to this error.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Value) -> Self {
        self.extensions = extensions;
        self
    }

    pub(crate) fn cancelled() -> Self {
        Self::new("Request was cancelled", ErrorKind::Cancelled)
    }

    pub(crate) fn unset_selection(selection: &str) -> Self {
        Self::new(
            format!("Selection \"{selection}\" is not part of the declared required selection set"),
            ErrorKind::UnsetSelection,
        )
    }

    /// The `"message"` field of this error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The `"extensions"` attached to this error, [`Value::Null`] if none.
    #[must_use]
    pub fn extensions(&self) -> &Value {
        &self.extensions
    }
}

/// The result of resolving the value of a field.
pub type FieldResult<T> = Result<T, FieldError>;

/// One segment of a response path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, "{k}"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl Serialize for PathSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Key(k) => serializer.serialize_str(k),
            Self::Index(i) => serializer.serialize_u64(*i as u64),
        }
    }
}

/// Error that occurred during query execution, attributed to a response path.
///
/// Execution errors order by `(path joined with '.', message)`, which is the
/// deterministic order they are returned in.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionError {
    location: Option<SourcePosition>,
    path: Vec<PathSegment>,
    error: FieldError,
}

impl Eq for ExecutionError {}

impl ExecutionError {
    #[doc(hidden)]
    pub fn new(
        location: Option<SourcePosition>,
        path: Vec<PathSegment>,
        error: FieldError,
    ) -> Self {
        Self {
            location,
            path,
            error,
        }
    }

    /// Constructs an execution error at the origin of the request.
    pub fn at_origin(error: FieldError) -> Self {
        Self {
            location: None,
            path: Vec::new(),
            error,
        }
    }

    /// The underlying field error.
    pub fn error(&self) -> &FieldError {
        &self.error
    }

    /// The response path of the field that failed.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// The source location in the query, if known.
    pub fn location(&self) -> Option<&SourcePosition> {
        self.location.as_ref()
    }

    fn joined_path(&self) -> String {
        use itertools::Itertools as _;
        self.path.iter().format(".").to_string()
    }
}

impl PartialOrd for ExecutionError {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExecutionError {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.joined_path(), &self.error.message)
            .cmp(&(other.joined_path(), &other.error.message))
    }
}

impl Serialize for ExecutionError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Location {
            line: usize,
            column: usize,
        }

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("message", self.error.message())?;
        if let Some(pos) = &self.location {
            map.serialize_entry(
                "locations",
                &[Location {
                    line: pos.line() + 1,
                    column: pos.column() + 1,
                }],
            )?;
        }
        if !self.path.is_empty() {
            map.serialize_entry("path", &self.path)?;
        }
        let mut extensions = crate::value::Object::with_capacity(2);
        extensions.add_field(
            "classification",
            Value::scalar(self.error.kind().classification()),
        );
        if !self.error.extensions().is_null() {
            extensions.add_field("details", self.error.extensions().clone());
        }
        map.serialize_entry("extensions", &extensions)?;
        map.end()
    }
}

/// The response location of an in-progress field resolution, as a shared
/// immutable list so concurrent branches extend it without copying.
#[derive(Debug)]
pub enum ResponsePath {
    Root,
    Key(String, std::sync::Arc<ResponsePath>),
    Index(usize, std::sync::Arc<ResponsePath>),
}

impl ResponsePath {
    /// The root of a response.
    pub fn root() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::Root)
    }

    /// Extends a path with a response key.
    pub fn key(self: &std::sync::Arc<Self>, key: impl Into<String>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::Key(key.into(), std::sync::Arc::clone(self)))
    }

    /// Extends a path with a list index.
    pub fn index(self: &std::sync::Arc<Self>, index: usize) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::Index(index, std::sync::Arc::clone(self)))
    }

    /// Materializes the path root-first.
    pub fn segments(&self) -> Vec<PathSegment> {
        fn build(path: &ResponsePath, acc: &mut Vec<PathSegment>) {
            match path {
                ResponsePath::Root => {}
                ResponsePath::Key(k, parent) => {
                    build(parent, acc);
                    acc.push(PathSegment::Key(k.clone()));
                }
                ResponsePath::Index(i, parent) => {
                    build(parent, acc);
                    acc.push(PathSegment::Index(*i));
                }
            }
        }
        let mut acc = Vec::new();
        build(self, &mut acc);
        acc
    }
}

/// Per-request, append-only error store. Appends are atomic; the sorted view
/// is taken once at completion.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    errors: RwLock<Vec<ExecutionError>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one error.
    pub fn push(&self, error: ExecutionError) {
        self.errors
            .write()
            .expect("error accumulator poisoned")
            .push(error);
    }

    /// Number of recorded errors so far.
    pub fn len(&self) -> usize {
        self.errors
            .read()
            .expect("error accumulator poisoned")
            .len()
    }

    /// Whether any error has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains into the deterministic output order.
    pub fn into_sorted(self) -> Vec<ExecutionError> {
        let mut errors = self
            .errors
            .into_inner()
            .expect("error accumulator poisoned");
        errors.sort();
        errors
    }

    /// Copies out the current errors in deterministic order.
    pub fn sorted_snapshot(&self) -> Vec<ExecutionError> {
        let mut errors = self
            .errors
            .read()
            .expect("error accumulator poisoned")
            .clone();
        errors.sort();
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorAccumulator, ErrorKind, ExecutionError, FieldError, PathSegment};

    fn err(path: &[&str], message: &str) -> ExecutionError {
        ExecutionError::new(
            None,
            path.iter().map(|p| PathSegment::Key((*p).into())).collect(),
            FieldError::new(message, ErrorKind::DataFetching),
        )
    }

    #[test]
    fn errors_sort_by_path_then_message() {
        let acc = ErrorAccumulator::new();
        acc.push(err(&["b"], "z"));
        acc.push(err(&["a", "b"], "m"));
        acc.push(err(&["a"], "n"));
        acc.push(err(&["a"], "m"));
        let sorted = acc.into_sorted();
        let keys: Vec<_> = sorted
            .iter()
            .map(|e| {
                (
                    e.path()
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("."),
                    e.error().message().to_owned(),
                )
            })
            .collect();
        assert_eq!(
            keys,
            [
                ("a".into(), "m".to_string()),
                ("a".into(), "n".to_string()),
                ("a.b".into(), "m".to_string()),
                ("b".into(), "z".to_string()),
            ],
        );
    }

    #[test]
    fn serializes_with_classification() {
        let e = err(&["user", "name"], "boom");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["message"], "boom");
        assert_eq!(json["path"], serde_json::json!(["user", "name"]));
        assert_eq!(
            json["extensions"]["classification"],
            "DataFetchingException",
        );
    }
}
