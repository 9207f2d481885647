// Request-context correlation.
//
// `store` holds the thread-keyed context map with explicit capture/restore
// primitives; `propagation` wraps deferred units of work so correlation
// survives thread-pool handoffs, scheduled tasks, and per-message callbacks.

pub mod propagation;
pub mod store;

pub use propagation::{propagate, propagate_for, ChannelFlavor, PropagationPolicy};
pub use store::{ContextScope, ContextSnapshot, ContextStore, RequestContext, SESSION_ID_HEADER};
