use serde_json::{Map, Value};

/// Key/value data handed to and returned from a node
pub type Context = Map<String, Value>;

/// The shared map threaded through one workflow run.
///
/// Only whole-map merges mutate it. Keys are never removed and a later write
/// to an existing key replaces the earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    data: Context,
}

impl ExecutionContext {
    pub fn new(initial: Context) -> Self {
        Self { data: initial }
    }

    /// Full copy handed to a node as its input
    pub fn snapshot(&self) -> Context {
        self.data.clone()
    }

    pub fn merge(&mut self, output: Context) {
        for (key, value) in output {
            self.data.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> Context {
        self.data
    }
}
