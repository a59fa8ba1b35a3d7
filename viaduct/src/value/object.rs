use indexmap::IndexMap;
use serde::{Serialize, Serializer, ser::SerializeMap as _};

use super::Value;

/// An ordered response object.
///
/// Insertion order is response order, which the GraphQL spec ties to the
/// source order of the query's response keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Object {
    key_value_list: IndexMap<String, Value>,
}

impl Object {
    /// Creates an empty [`Object`] with the given `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            key_value_list: IndexMap::with_capacity(capacity),
        }
    }

    /// Adds a new field with the given `value`, returning the previous value
    /// for the key, if any.
    pub fn add_field<K: Into<String>>(&mut self, key: K, value: Value) -> Option<Value> {
        self.key_value_list.insert(key.into(), value)
    }

    /// Checks if the object already contains a field with the given key.
    pub fn contains_field(&self, key: &str) -> bool {
        self.key_value_list.contains_key(key)
    }

    /// Gets the current value of the given field.
    pub fn get_field_value(&self, key: &str) -> Option<&Value> {
        self.key_value_list.get(key)
    }

    /// Gets a mutable view of the current value of the given field.
    pub fn get_mut_field_value(&mut self, key: &str) -> Option<&mut Value> {
        self.key_value_list.get_mut(key)
    }

    /// Number of fields in the object.
    pub fn field_count(&self) -> usize {
        self.key_value_list.len()
    }

    /// Iterates over the key/value pairs in response order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.key_value_list.iter()
    }
}

impl IntoIterator for Object {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.key_value_list.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut obj = Self::with_capacity(iter.size_hint().0);
        for (k, v) in iter {
            obj.add_field(k, v);
        }
        obj
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.field_count()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
