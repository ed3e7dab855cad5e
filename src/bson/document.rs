/*!
 * Ordered BSON document. Field order is preserved on decode and respected
 * on encode because the MongoDB command protocol is sensitive to which
 * field comes first (e.g. the command name must be the first key).
 */

use indexmap::IndexMap;
use std::collections::HashMap;

use super::value::Bson;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: IndexMap<String, Bson>,
}

impl Document {
    pub fn new() -> Self {
        Self { fields: IndexMap::new() }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        self.fields.insert(key.into(), value.into())
    }

    /// Builder-style append, the local replacement for the `bson` crate's
    /// `doc! { ... }` macro call sites in the teacher code.
    pub fn append(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Bson::as_str)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Bson::as_i32)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Bson::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Bson::as_bool)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    pub fn get_array(&self, key: &str) -> Option<&[Bson]> {
        self.get(key).and_then(Bson::as_array)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.fields.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.fields.iter()
    }

    /// First key in insertion order, used by callers that need to read the
    /// command name off an arbitrary command document.
    pub fn first_key(&self) -> Option<&str> {
        self.fields.keys().next().map(String::as_str)
    }
}

impl FromIterator<(String, Bson)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Bson)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = indexmap::map::IntoIter<String, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Unordered mappings are also accepted for encoding, as the distilled spec
/// allows; the resulting field order is the hash map's iteration order,
/// which is unspecified but stable for a single encode call.
impl From<HashMap<String, Bson>> for Document {
    fn from(map: HashMap<String, Bson>) -> Self {
        map.into_iter().collect()
    }
}

/// Convenience macro replacing the `bson` crate's `doc! { ... }` at call
/// sites throughout this crate.
#[macro_export]
macro_rules! document {
    () => { $crate::bson::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut d = $crate::bson::Document::new();
        $( d.insert($key, $value); )+
        d
    }};
}
