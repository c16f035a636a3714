use std::cell::RefCell;
use std::collections::BTreeMap;

use serde_json::Value;

/// Shared key-value store threaded through one `route()` call.
///
/// Interior-mutable so that the recursive executor, handlers, and remediation
/// strategies can all hold shared references while still writing values.
/// Single-threaded by design: routing is synchronous tree-walking, and sharing
/// one context across threads is out of scope.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    values: RefCell<BTreeMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self { values: RefCell::new(values) }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.borrow_mut().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.borrow_mut().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.borrow().clone()
    }

    /// Read-only view restricted to the given keys. Action nodes use this to
    /// limit what their extractors may observe.
    pub fn view(&self, keys: &[String]) -> ContextView {
        let values = self.values.borrow();
        let selected = keys
            .iter()
            .filter_map(|key| values.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        ContextView { values: selected }
    }
}

/// Immutable snapshot of a subset of context keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextView {
    values: BTreeMap<String, Value>,
}

impl ContextView {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ExecutionContext;

    #[test]
    fn set_and_get_round_trip() {
        let context = ExecutionContext::new();
        context.set("user", json!("dana"));

        assert_eq!(context.get("user"), Some(json!("dana")));
        assert!(context.contains("user"));
        assert!(context.get("missing").is_none());
    }

    #[test]
    fn view_is_restricted_to_declared_keys() {
        let context = ExecutionContext::new();
        context.set("account_id", json!("ACME"));
        context.set("api_key", json!("secret"));

        let view = context.view(&["account_id".to_owned()]);
        assert_eq!(view.get("account_id"), Some(&json!("ACME")));
        assert!(view.get("api_key").is_none());
    }

    #[test]
    fn view_of_absent_keys_is_empty() {
        let context = ExecutionContext::new();
        let view = context.view(&["nope".to_owned()]);
        assert!(view.is_empty());
    }
}
