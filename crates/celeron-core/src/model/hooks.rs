//! Lifecycle hooks.

use super::record::Record;
use crate::error::Result;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Points in a record's persistence lifecycle where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

/// An async callback receiving the record being persisted.
pub type Hook = Arc<dyn for<'a> Fn(&'a mut Record) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Hooks registered per model name and lifecycle point.
#[derive(Default)]
pub struct HookRegistry {
    hooks: DashMap<(String, HookPoint), Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Hooks for the same point run in registration order.
    pub fn register<F>(&self, model: &str, point: HookPoint, hook: F)
    where
        F: for<'a> Fn(&'a mut Record) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.hooks
            .entry((model.to_string(), point))
            .or_default()
            .push(Arc::new(hook));
        tracing::debug!(model, ?point, "registered hook");
    }

    /// Number of hooks registered for a point.
    pub fn count(&self, model: &str, point: HookPoint) -> usize {
        self.hooks
            .get(&(model.to_string(), point))
            .map_or(0, |hooks| hooks.len())
    }

    /// Run the hooks for a point sequentially, stopping at the first failure.
    pub async fn run(&self, model: &str, point: HookPoint, record: &mut Record) -> Result<()> {
        let hooks: Vec<Hook> = match self.hooks.get(&(model.to_string(), point)) {
            Some(hooks) => hooks.clone(),
            None => return Ok(()),
        };
        for hook in hooks {
            hook(&mut *record).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("points", &self.hooks.len())
            .finish()
    }
}
