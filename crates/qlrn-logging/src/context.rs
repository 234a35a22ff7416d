//! Node context injection for multi-node logging
//!
//! A simulation runs many routing engines in one process. This module keeps
//! the identity of the node currently being driven in thread-local storage,
//! so [`crate::NodeContextLayer`] can stamp it onto every span opened while
//! that node handles an event.

use std::cell::RefCell;
use std::fmt;

use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// The node's identity, usually its primary IPv4 address
    pub node_id: String,
    /// Unique instance ID for this node's lifetime
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Creating the guard sets the node context for the current thread.
/// Dropping it restores whatever context was active before.
///
/// # Example
///
/// ```ignore
/// use qlrn_logging::NodeContextGuard;
///
/// let _guard = NodeContextGuard::new("10.0.0.1");
///
/// // Spans opened in this scope carry node_id = "10.0.0.1"
/// let _span = tracing::info_span!("route_input").entered();
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    /// Set the node identity for the current scope
    pub fn new(node_id: impl fmt::Display) -> Self {
        Self::with_instance_id(node_id, Uuid::new_v4())
    }

    /// Create a guard with a specific instance ID
    ///
    /// Simulations reuse one instance id per node so every event the node
    /// handles can be grouped.
    pub fn with_instance_id(node_id: impl fmt::Display, instance_id: Uuid) -> Self {
        let context = NodeContextData {
            node_id: node_id.to_string(),
            instance_id,
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(context));
        Self { previous }
    }

    /// Get the current node context (if any)
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current node ID (if set)
    pub fn current_node_id() -> Option<String> {
        Self::current().map(|ctx| ctx.node_id)
    }

    /// Get the current instance ID (if set)
    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a node context active
///
/// # Example
///
/// ```ignore
/// with_node_context!(addr, {
///     engine.handle_timer(timer);
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($node);
        $body
    }};
}
