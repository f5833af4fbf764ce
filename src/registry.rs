//! Stage registry: maps names to constructors.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::spec::StageArgs;
use crate::stage::Stage;

/// Builds a stage from its parsed arguments.
pub type StageConstructor = fn(&StageArgs) -> Result<Box<dyn Stage>>;

/// One registered stage type.
#[derive(Clone, Copy, Debug)]
pub struct StageDescriptor {
    /// Human-readable summary for listings.
    pub description: &'static str,
    /// Constructor invoked when the chain is built.
    pub construct: StageConstructor,
}

/// Name-indexed collection of available stage types.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, StageDescriptor>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage type, replacing any previous entry with this name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: &'static str,
        construct: StageConstructor,
    ) {
        self.stages.insert(
            name.into(),
            StageDescriptor {
                description,
                construct,
            },
        );
    }

    /// Look up a stage type by name.
    pub fn resolve(&self, name: &str) -> Result<&StageDescriptor> {
        self.stages.get(name).ok_or_else(|| Error::StageNotFound {
            name: name.to_string(),
        })
    }

    /// Whether a stage type with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The registry holding every built-in stage type.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.register(
            "identity",
            "transparent passthrough",
            crate::stages::identity::construct,
        );
        reg.register(
            "expand",
            "stride adapter, copies into tightly packed buffers",
            crate::stages::expand::construct,
        );
        reg.register(
            "scale",
            "pixel format conversion",
            crate::stages::scale::construct,
        );
        reg
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let reg = StageRegistry::builtin();
        assert!(reg.contains("identity"));
        assert!(reg.contains("expand"));
        assert!(reg.contains("scale"));
        assert_eq!(reg.names(), ["expand", "identity", "scale"]);
    }

    #[test]
    fn test_unknown_stage_is_an_error() {
        let reg = StageRegistry::builtin();
        let err = reg.resolve("nonexistent").unwrap_err();
        assert!(matches!(err, Error::StageNotFound { .. }));
    }
}
