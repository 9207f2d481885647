// Context propagation across execution-unit handoffs.
//
// A snapshot captured at submission time is restored around the wrapped
// work's execution — on whatever thread eventually runs it — and the
// executing thread's previous association comes back afterwards. This is
// the mechanism by which correlation survives thread-pool submission, timer
// scheduling, and reactive-stream callbacks.

use std::sync::Arc;
use std::thread;

use log::trace;

use super::store::{ContextSnapshot, ContextStore};

// ============================================================================
// CHANNEL FLAVORS AND POLICY
// ============================================================================

/// Delivery flavor of a duplex channel, as seen by message-endpoint hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFlavor {
    /// Connection-oriented delivery: one logical request per connection
    /// lifecycle (HTTP request/response, WebSocket session as a whole).
    Connection,
    /// Per-message delivery on a multiplexed channel: there is no single
    /// well-defined "current request" for the channel.
    PerMessage,
}

/// Which channel flavors propagate context.
///
/// Supplied by the embedder per channel; the defaults match observed
/// behavior (connection-oriented on, fire-and-forget per-message off).
#[derive(Debug, Clone)]
pub struct PropagationPolicy {
    connection: bool,
    per_message: bool,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        PropagationPolicy {
            connection: true,
            per_message: false,
        }
    }
}

impl PropagationPolicy {
    pub fn new(connection: bool, per_message: bool) -> Self {
        PropagationPolicy {
            connection,
            per_message,
        }
    }

    pub fn allows(&self, flavor: ChannelFlavor) -> bool {
        match flavor {
            ChannelFlavor::Connection => self.connection,
            ChannelFlavor::PerMessage => self.per_message,
        }
    }
}

// ============================================================================
// PROPAGATION
// ============================================================================

/// Wraps a unit of work so `snapshot` is the current context while it runs.
///
/// The wrapper may execute on any thread, immediately or after a delay; the
/// executing thread's previous association (including empty) is restored
/// when the work completes or panics.
pub fn propagate<F>(
    store: Arc<ContextStore>,
    snapshot: ContextSnapshot,
    work: F,
) -> impl FnOnce() + Send + 'static
where
    F: FnOnce() + Send + 'static,
{
    move || {
        let _scope = store.enter(Some(Arc::clone(&snapshot)));
        trace!(
            "propagated task ran, sessionId = {:?}, threadId = {:?}",
            snapshot.session_id,
            thread::current().id()
        );
        work();
        trace!(
            "propagated task finished, sessionId = {:?}, threadId = {:?}",
            snapshot.session_id,
            thread::current().id()
        );
    }
}

/// Flavor-gated variant of [`propagate`].
///
/// When the policy disables propagation for `flavor`, the work runs with
/// whatever context its executing thread already holds — deliberately
/// uncorrelated, as there is no meaningful submission-time context for
/// fire-and-forget message patterns.
pub fn propagate_for<F>(
    policy: &PropagationPolicy,
    store: &Arc<ContextStore>,
    flavor: ChannelFlavor,
    snapshot: ContextSnapshot,
    work: F,
) -> Box<dyn FnOnce() + Send + 'static>
where
    F: FnOnce() + Send + 'static,
{
    if policy.allows(flavor) {
        Box::new(propagate(Arc::clone(store), snapshot, work))
    } else {
        trace!("propagation disabled for {:?} delivery", flavor);
        Box::new(work)
    }
}
