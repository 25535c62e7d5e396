use std::collections::HashMap;

use super::handlers::{AddHandler, InventoryHandler, RemoveHandler};
use super::JobHandler;
use crate::session::RemoteSession;
use crate::types::OperationKind;

/// Explicit mapping from operation kind to handler.
pub struct HandlerRegistry<S: RemoteSession> {
    handlers: HashMap<OperationKind, Box<dyn JobHandler<S>>>,
}

impl<S: RemoteSession + 'static> HandlerRegistry<S> {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Inventory, add and remove.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::empty();
        registry.register(InventoryHandler);
        registry.register(AddHandler);
        registry.register(RemoveHandler);
        registry
    }

    /// Register `handler` for its kind, replacing any previous handler.
    pub fn register<H: JobHandler<S> + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.kind(), Box::new(handler));
    }

    pub fn get(&self, kind: OperationKind) -> Option<&dyn JobHandler<S>> {
        self.handlers.get(&kind).map(|handler| handler.as_ref())
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl<S: RemoteSession + 'static> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}
