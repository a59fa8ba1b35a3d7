//! Value representations used on either side of the engine: what resolvers
//! produce, what typed accessors read, and what requests serialize.

mod object;
mod scalar;

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::{executor::EngineObjectData, global_id::GlobalId};

pub use self::{
    object::Object,
    scalar::{ScalarValue, coercion},
};

/// Serializable value returned from query execution.
///
/// Built by the serialization pass that walks the plan over the resolved
/// object-engine results; lists and objects carry no location information.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Scalar(ScalarValue),
    List(Vec<Value>),
    Object(Object),
}

impl Value {
    /// Construct a null value.
    pub fn null() -> Self {
        Self::Null
    }

    /// Construct a scalar value.
    pub fn scalar<T: Into<ScalarValue>>(s: T) -> Self {
        Self::Scalar(s.into())
    }

    /// Construct a list value.
    pub fn list(l: Vec<Self>) -> Self {
        Self::List(l)
    }

    /// Construct an object value.
    pub fn object(o: Object) -> Self {
        Self::Object(o)
    }

    /// Does this value represent null?
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// View the underlying scalar value, if present.
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// View the underlying string value, if present.
    pub fn as_string_value(&self) -> Option<&str> {
        self.as_scalar().and_then(ScalarValue::as_str)
    }

    /// View the underlying object value, if present.
    pub fn as_object_value(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// View the underlying list value, if present.
    pub fn as_list_value(&self) -> Option<&Vec<Self>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Scalar(s) => s.serialize(serializer),
            Self::List(l) => l.serialize(serializer),
            Self::Object(o) => o.serialize(serializer),
        }
    }
}

impl<T: Into<ScalarValue>> From<T> for Value {
    fn from(s: T) -> Self {
        Self::Scalar(s.into())
    }
}

/// Field-name-keyed data a resolver hands back for a composite value.
///
/// The engine seeds a fresh object-engine result from it; selections the map
/// does not cover are resolved through their own field resolvers on demand.
pub type BackingMap = IndexMap<CompactString, ResolvedValue>;

/// What a resolver returns for its field.
#[derive(Clone, Debug)]
pub enum ResolvedValue {
    /// An explicit null.
    Null,
    /// A leaf value.
    Scalar(ScalarValue),
    /// An enum value by name.
    Enum(CompactString),
    /// A list of values.
    List(Vec<ResolvedValue>),
    /// A composite value, as field-keyed backing data. For interface- or
    /// union-typed fields the map must carry `__typename`.
    Object(BackingMap),
    /// A reference to a node by global identity. Only `id` is readable until
    /// the node's resolver has run.
    NodeRef(GlobalId),
    /// An already-resolved object from this request, e.g. obtained through a
    /// sub-selection.
    Data(EngineObjectData),
}

impl ResolvedValue {
    /// Construct a scalar resolved value.
    pub fn scalar<T: Into<ScalarValue>>(s: T) -> Self {
        Self::Scalar(s.into())
    }

    /// Construct an enum resolved value.
    pub fn enum_value<T: AsRef<str>>(s: T) -> Self {
        Self::Enum(s.as_ref().into())
    }

    /// Construct an object resolved value from field/value pairs.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, ResolvedValue)>,
    {
        Self::Object(
            fields
                .into_iter()
                .map(|(k, v)| (CompactString::from(k.as_ref()), v))
                .collect(),
        )
    }

    /// Does this value represent null?
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl<T: Into<ScalarValue>> From<T> for ResolvedValue {
    fn from(s: T) -> Self {
        Self::Scalar(s.into())
    }
}

impl<T: Into<ResolvedValue>> From<Option<T>> for ResolvedValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A value read back out of an object-engine result through a typed accessor.
#[derive(Clone, Debug)]
pub enum DataValue {
    Null,
    Scalar(ScalarValue),
    Enum(CompactString),
    List(Vec<DataValue>),
    Object(EngineObjectData),
    NodeRef(GlobalId),
}

impl DataValue {
    /// Does this value represent null?
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// View the underlying scalar, if present.
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// View the underlying string, if present.
    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(ScalarValue::as_str)
    }

    /// View the underlying `i32`, if present.
    pub fn as_int(&self) -> Option<i32> {
        self.as_scalar().and_then(ScalarValue::as_int)
    }

    /// View the underlying object accessor, if present.
    pub fn as_object(&self) -> Option<&EngineObjectData> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// View the underlying list, if present.
    pub fn as_list(&self) -> Option<&[DataValue]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Object, Value};

    #[test]
    fn response_objects_serialize_in_insertion_order() {
        let mut obj = Object::with_capacity(2);
        obj.add_field("zebra", Value::scalar(1));
        obj.add_field("aardvark", Value::scalar(2));
        assert_eq!(
            serde_json::to_string(&Value::object(obj)).unwrap(),
            r#"{"zebra":1,"aardvark":2}"#,
        );
    }

    #[test]
    fn null_serializes_bare() {
        assert_eq!(serde_json::to_string(&Value::null()).unwrap(), "null");
    }
}
