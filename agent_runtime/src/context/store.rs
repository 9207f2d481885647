// Thread-keyed request-context store.
//
// One logical request's correlation state (session id + headers) is
// associated with at most one execution unit at a time. The store is an
// explicit key-value map addressed by thread identity — never implicit
// ambient state — with capture/restore primitives that make every handoff
// visible and testable.
//
// Memory model: the map is sharded by thread id with one mutex per shard.
// An execution unit only ever contends on its own shard, so unrelated
// request threads do not serialize against each other.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use log::{debug, trace};
use parking_lot::Mutex;

/// Header key carrying the session correlation token on inbound requests.
pub const SESSION_ID_HEADER: &str = "drill-session-id";

const SHARD_COUNT: usize = 16;

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

/// Correlation state for one logical request flowing through instrumented
/// code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Opaque correlation token; `None` means no active session.
    pub session_id: Option<String>,

    /// Header/attribute mapping propagated with the request.
    pub headers: HashMap<String, String>,

    /// Thread that first observed the request. Diagnostic only.
    pub origin_thread: String,
}

impl RequestContext {
    /// Builds a context from inbound headers; the session id is read from
    /// [`SESSION_ID_HEADER`].
    pub fn from_headers(headers: HashMap<String, String>) -> Self {
        RequestContext {
            session_id: headers.get(SESSION_ID_HEADER).cloned(),
            headers,
            origin_thread: format!("{:?}", thread::current().id()),
        }
    }

    /// Context with a bare session id and no headers.
    pub fn with_session(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let mut headers = HashMap::new();
        headers.insert(SESSION_ID_HEADER.to_string(), session_id.clone());
        RequestContext {
            session_id: Some(session_id),
            headers,
            origin_thread: format!("{:?}", thread::current().id()),
        }
    }
}

/// Immutable snapshot of a request context.
///
/// Snapshots are what crosses execution-unit boundaries; mutating the live
/// context never affects a previously captured snapshot because contexts are
/// replaced wholesale, not edited in place.
pub type ContextSnapshot = Arc<RequestContext>;

// ============================================================================
// CONTEXT STORE
// ============================================================================

/// Process-wide, thread-correlated holder of the current request context.
#[derive(Debug)]
pub struct ContextStore {
    shards: Vec<Mutex<HashMap<ThreadId, ContextSnapshot>>>,
}

impl Default for ContextStore {
    fn default() -> Self {
        ContextStore::new()
    }
}

impl ContextStore {
    pub fn new() -> Self {
        ContextStore {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, id: ThreadId) -> &Mutex<HashMap<ThreadId, ContextSnapshot>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Captures the context associated with the calling execution unit.
    ///
    /// Returns `None` for "empty" — including after a restore that was never
    /// preceded by a capture, which fails safe to empty rather than exposing
    /// another unit's state.
    pub fn capture(&self) -> Option<ContextSnapshot> {
        let id = thread::current().id();
        self.shard(id).lock().get(&id).cloned()
    }

    /// Associates a new context with the calling execution unit.
    pub fn store(&self, context: RequestContext) -> ContextSnapshot {
        let snapshot: ContextSnapshot = Arc::new(context);
        self.store_snapshot(Arc::clone(&snapshot));
        snapshot
    }

    /// Associates an existing snapshot with the calling execution unit.
    pub fn store_snapshot(&self, snapshot: ContextSnapshot) {
        let id = thread::current().id();
        self.shard(id).lock().insert(id, snapshot);
    }

    /// Clears the calling execution unit's association.
    pub fn remove(&self) -> Option<ContextSnapshot> {
        let id = thread::current().id();
        self.shard(id).lock().remove(&id)
    }

    /// Enters a scope with the given snapshot (or empty) as the current
    /// context. The previous association — including empty — is restored
    /// when the returned guard drops, on all exit paths including panics.
    pub fn enter(&self, snapshot: Option<ContextSnapshot>) -> ContextScope<'_> {
        let previous = match &snapshot {
            Some(snapshot) => {
                let id = thread::current().id();
                self.shard(id).lock().insert(id, Arc::clone(snapshot))
            }
            None => self.remove(),
        };
        ContextScope {
            store: self,
            previous,
        }
    }

    // ------------------------------------------------------------------
    // Headers processing, called by boundary-entry/exit hooks.
    // ------------------------------------------------------------------

    /// Boundary entry: records inbound headers as the current context.
    pub fn store_headers(&self, headers: HashMap<String, String>) -> ContextSnapshot {
        let context = RequestContext::from_headers(headers);
        trace!(
            "store_headers: sessionId = {:?}, threadId = {:?}",
            context.session_id,
            thread::current().id()
        );
        self.store(context)
    }

    /// Headers of the current context, for injection into outbound calls.
    pub fn retrieve_headers(&self) -> Option<HashMap<String, String>> {
        self.capture().map(|snapshot| snapshot.headers.clone())
    }

    /// Boundary exit: clears the current association.
    pub fn remove_headers(&self) {
        if self.remove().is_some() {
            debug!(
                "remove_headers: cleared context, threadId = {:?}",
                thread::current().id()
            );
        }
    }
}

/// Guard restoring the previous context association on drop.
#[must_use = "the previous context is restored when the scope drops"]
pub struct ContextScope<'a> {
    store: &'a ContextStore,
    previous: Option<ContextSnapshot>,
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => self.store.store_snapshot(previous),
            None => {
                self.store.remove();
            }
        }
    }
}
