use derive_ex::Ex;
use serde::{Deserialize, Serialize};


/// Construction options of a [`Graph`](crate::Graph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
#[serde(default)]
pub struct GraphConfig {
    /// Label attached to the tracing spans emitted by the graph.
    pub name: String,

    /// Discard a [`KeyOutlet`](crate::KeyOutlet) once its key is removed and no inlet is bound to it.
    pub discard_removed_keys: bool,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self {
            name: "graph".to_string(),
            discard_removed_keys: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
