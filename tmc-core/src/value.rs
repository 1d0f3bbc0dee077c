//! Tagged-tree representation of a runtime-polymorphic resource (§9 design
//! note: "Runtime-polymorphic unstructured objects ... represent as a
//! tagged tree with typed accessors"). All field edits anywhere in the
//! syncer go through [`Object`]'s accessors; nothing reaches into the
//! underlying [`serde_json::Value`] directly.

use serde_json::{Map, Value as Json};

/// A loosely-typed Kubernetes-style object: a JSON object at the top level,
/// with `apiVersion`/`kind`/`metadata`/`spec`/`status` as conventional but
/// unenforced top-level fields.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Object(pub Map<String, Json>);

impl Object {
    /// Wraps a raw JSON object. Returns `None` if `value` is not a JSON object.
    pub fn from_json(value: Json) -> Option<Self> {
        match value {
            Json::Object(map) => Some(Object(map)),
            _ => None,
        }
    }

    /// Converts back into a plain [`serde_json::Value`].
    pub fn into_json(self) -> Json {
        Json::Object(self.0)
    }

    /// A full, independent copy of this object (cheap: `serde_json::Value`
    /// is reference-counted internally only for strings; this is the
    /// explicit `DeepCopy` analog named in §9).
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    fn walk<'a>(&'a self, path: &[&str]) -> Option<&'a Json> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.0.get(*first)?;
        for seg in rest {
            cur = cur.as_object()?.get(*seg)?;
        }
        Some(cur)
    }

    /// Reads a nested field as a raw JSON value, with no type narrowing.
    pub fn nested_field(&self, path: &[&str]) -> Option<&Json> {
        self.walk(path)
    }

    /// Reads a nested string field, e.g. `nested_string(&["status", "phase"])`.
    pub fn nested_string(&self, path: &[&str]) -> Option<&str> {
        self.walk(path)?.as_str()
    }

    /// Reads a nested i64 field.
    pub fn nested_i64(&self, path: &[&str]) -> Option<i64> {
        self.walk(path)?.as_i64()
    }

    /// Reads a nested bool field.
    pub fn nested_bool(&self, path: &[&str]) -> Option<bool> {
        self.walk(path)?.as_bool()
    }

    /// Reads a nested JSON-object field as a map.
    pub fn nested_map(&self, path: &[&str]) -> Option<&Map<String, Json>> {
        self.walk(path)?.as_object()
    }

    /// Reads a nested array field as a slice.
    pub fn nested_slice(&self, path: &[&str]) -> Option<&[Json]> {
        self.walk(path)?.as_array().map(Vec::as_slice)
    }

    /// Sets a nested field, creating intermediate objects as needed.
    /// Fails silently (no-op) if an intermediate segment already holds a
    /// non-object value, matching `unstructured.SetNestedField`'s
    /// "overwrite wins" behavior by replacing it with a fresh object.
    pub fn set_nested(&mut self, path: &[&str], value: Json) {
        let Some((last, init)) = path.split_last() else { return };
        let mut cur = &mut self.0;
        for seg in init {
            let entry = cur.entry(seg.to_string()).or_insert_with(|| Json::Object(Map::new()));
            if !entry.is_object() {
                *entry = Json::Object(Map::new());
            }
            cur = entry.as_object_mut().unwrap();
        }
        cur.insert(last.to_string(), value);
    }

    /// Removes a nested field if present, returning it.
    pub fn remove_nested(&mut self, path: &[&str]) -> Option<Json> {
        let (last, init) = path.split_last()?;
        let mut cur = &mut self.0;
        for seg in init {
            cur = cur.get_mut(*seg)?.as_object_mut()?;
        }
        cur.remove(*last)
    }

    /// Top-level accessor for `metadata.name`.
    pub fn name(&self) -> Option<&str> {
        self.nested_string(&["metadata", "name"])
    }

    /// Top-level accessor for `metadata.namespace`.
    pub fn namespace(&self) -> Option<&str> {
        self.nested_string(&["metadata", "namespace"])
    }

    /// Top-level accessor for an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.nested_map(&["metadata", "annotations"])
            .and_then(|m| m.get(key))
            .and_then(Json::as_str)
    }

    /// Sets an annotation, creating the `metadata.annotations` map if absent.
    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.set_nested(&["metadata", "annotations", key], Json::String(value.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_accessors_roundtrip() {
        let obj = Object::from_json(json!({
            "metadata": {"name": "web", "namespace": "default"},
            "status": {"phase": "Running", "replicas": 3}
        }))
        .unwrap();
        assert_eq!(obj.name(), Some("web"));
        assert_eq!(obj.namespace(), Some("default"));
        assert_eq!(obj.nested_string(&["status", "phase"]), Some("Running"));
        assert_eq!(obj.nested_i64(&["status", "replicas"]), Some(3));
        assert_eq!(obj.nested_string(&["status", "missing"]), None);
    }

    #[test]
    fn set_and_remove_nested() {
        let mut obj = Object::default();
        obj.set_nested(&["spec", "replicas"], json!(5));
        assert_eq!(obj.nested_i64(&["spec", "replicas"]), Some(5));
        let removed = obj.remove_nested(&["spec", "replicas"]);
        assert_eq!(removed, Some(json!(5)));
        assert_eq!(obj.nested_i64(&["spec", "replicas"]), None);
    }

    #[test]
    fn annotations() {
        let mut obj = Object::default();
        obj.set_annotation("workload.kcp.io/rv", "12345");
        assert_eq!(obj.annotation("workload.kcp.io/rv"), Some("12345"));
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut obj = Object::default();
        obj.set_nested(&["a"], json!(1));
        let copy = obj.deep_copy();
        obj.set_nested(&["a"], json!(2));
        assert_eq!(copy.nested_i64(&["a"]), Some(1));
        assert_eq!(obj.nested_i64(&["a"]), Some(2));
    }
}
