//! Capabilities
//!
//! Named, schema-bound actions a model invocation may call. Split the same way
//! as definition vs. execution:
//!
//! - `CapabilityDefinition` - name, description, input schema
//! - `CapabilityExecutable` - async execution
//! - `Capability` - combined trait (blanket impl)
//! - `CapabilitySet` - ordered registry with O(1) lookup
//!
//! Schema-only consumers (prompt builders, provider tool lists) only need the
//! definition half.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::CapabilityContext;
use crate::error::{CoreError, CoreResult};

// ============================================================================
// Trait Definitions
// ============================================================================

/// Identity and input schema of a capability.
pub trait CapabilityDefinition: Send + Sync {
    /// Unique name the model uses to call this capability.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema describing the input object.
    ///
    /// ```json
    /// {
    ///   "type": "object",
    ///   "properties": { "query": { "type": "string" } },
    ///   "required": ["query"]
    /// }
    /// ```
    fn parameters_schema(&self) -> Value;
}

/// Execution half of a capability.
#[async_trait]
pub trait CapabilityExecutable: Send + Sync {
    /// Run the capability with arguments matching `parameters_schema()`.
    ///
    /// An `Err` is reported to the model invocation as an error result.
    async fn execute(&self, ctx: &CapabilityContext, args: Value) -> CoreResult<Value>;
}

/// Combined trait for capabilities that provide both halves.
pub trait Capability: CapabilityDefinition + CapabilityExecutable {}

impl<T: CapabilityDefinition + CapabilityExecutable> Capability for T {}

// ============================================================================
// FunctionCapability
// ============================================================================

/// Boxed future returned by a `FunctionCapability` handler.
pub type CapabilityFuture = Pin<Box<dyn Future<Output = CoreResult<Value>> + Send>>;

/// Handler signature for `FunctionCapability`.
pub type CapabilityHandler = Box<dyn Fn(CapabilityContext, Value) -> CapabilityFuture + Send + Sync>;

/// A capability built from an async closure.
///
/// ```ignore
/// let echo = FunctionCapability::new(
///     "echo",
///     "Echoes the message back",
///     serde_json::json!({"type": "object"}),
///     |_ctx, args| Box::pin(async move { Ok(args) }),
/// );
/// ```
pub struct FunctionCapability {
    name: String,
    description: String,
    schema: Value,
    handler: CapabilityHandler,
}

impl FunctionCapability {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(CapabilityContext, Value) -> CapabilityFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Box::new(handler),
        }
    }
}

impl CapabilityDefinition for FunctionCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }
}

#[async_trait]
impl CapabilityExecutable for FunctionCapability {
    async fn execute(&self, ctx: &CapabilityContext, args: Value) -> CoreResult<Value> {
        (self.handler)(ctx.clone(), args).await
    }
}

// ============================================================================
// CapabilitySet
// ============================================================================

/// Ordered set of capabilities.
///
/// Cloning is cheap (entries are `Arc`s), which lets callers derive a
/// restricted copy per step with [`CapabilitySet::without`].
#[derive(Clone, Default)]
pub struct CapabilitySet {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    /// Insertion order for deterministic iteration.
    order: Vec<String>,
}

impl CapabilitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Replaces any existing capability with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if !self.capabilities.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.capabilities.insert(name, capability);
    }

    /// Builder-style `register`.
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.register(capability);
        self
    }

    /// Remove a capability by name.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Capability>> {
        self.order.retain(|n| n != name);
        self.capabilities.remove(name)
    }

    /// Copy of this set with the named capabilities removed.
    pub fn without(&self, names: &[&str]) -> Self {
        let mut restricted = self.clone();
        for name in names {
            restricted.unregister(name);
        }
        restricted
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Capabilities in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Capability>> {
        self.order.iter().filter_map(|name| self.capabilities.get(name))
    }

    /// Execute a capability by name.
    ///
    /// Returns `Err(CoreError::NotFound)` if the name is not in the set.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &CapabilityContext,
        args: Value,
    ) -> CoreResult<Value> {
        match self.capabilities.get(name) {
            Some(capability) => capability.execute(ctx, args).await,
            None => Err(CoreError::not_found(format!("Capability not found: {}", name))),
        }
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("names", &self.order)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
