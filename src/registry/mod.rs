//! Pipeline registry module for dispatching runs by name.
//!
//! This module provides functionality for:
//! - Registering pipeline factories under a unique name
//! - Instantiating a validated [`PipelineDefinition`] for a run
//! - Listing the pipelines an engine can run

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::EngineConfig;
use crate::error::{GraphError, RegistryError};
use crate::graph::PipelineDefinition;
use crate::pipelines;

/// Builds a pipeline definition for the given configuration.
pub type PipelineFactory =
    Arc<dyn Fn(&EngineConfig) -> Result<PipelineDefinition, GraphError> + Send + Sync>;

/// Maps pipeline names to the factories that build them.
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    factories: BTreeMap<String, PipelineFactory>,
}

impl fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.names())
            .finish()
    }
}

impl PipelineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in pipelines.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, factory) in pipelines::builtins() {
            registry.factories.insert(name.to_string(), Arc::new(factory));
        }
        registry
    }

    /// Register a pipeline factory.
    ///
    /// # Errors
    /// Returns `DuplicatePipeline` if the name is already taken.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&EngineConfig) -> Result<PipelineDefinition, GraphError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicatePipeline(name));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Build the definition registered under `name`.
    ///
    /// # Errors
    /// Returns `UnknownPipeline` for an unregistered name and `Definition` if
    /// the factory produces an invalid graph.
    pub fn instantiate(
        &self,
        name: &str,
        config: &EngineConfig,
    ) -> Result<PipelineDefinition, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPipeline(name.to_string()))?;
        Ok(factory(config)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
