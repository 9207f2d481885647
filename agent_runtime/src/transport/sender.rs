// Attach handshake and background message dispatch.
//
// Application threads only ever enqueue; the attach loop and the dispatcher
// run on a dedicated runtime so no request thread blocks on network I/O to
// the controller. Attach retries forever on a fixed backoff — it is the
// precondition for all telemetry and must not give up.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, trace, warn};
use thiserror::Error;

use super::mapper::DestinationMapper;
use super::message::{AgentMessage, AgentMessageDestination, DestinationVerb, ResponseStatus};
use super::queue::{DeliveryQueue, QueuedMessage, DEFAULT_QUEUE_CAPACITY};

/// Attach endpoint; deliberately not instance-prefixed — the controller
/// learns the instance id from the metadata blob itself.
pub const ATTACH_PATH: &str = "agent/instance";

// ============================================================================
// ATTACH STATE
// ============================================================================

/// Process-wide attach lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttachState {
    Detached = 0,
    Attaching = 1,
    Attached = 2,
}

impl AttachState {
    fn from_u8(value: u8) -> AttachState {
        match value {
            2 => AttachState::Attached,
            1 => AttachState::Attaching,
            _ => AttachState::Detached,
        }
    }
}

// ============================================================================
// TRANSPORT SEAM
// ============================================================================

/// Network exchange failures. Only ever seen by the background tasks;
/// application-facing calls report drops through [`ResponseStatus`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("trust material unreadable: {0}")]
    TrustMaterial(#[from] std::io::Error),

    #[error("invalid controller address: {0}")]
    Address(String),
}

/// One network exchange with the controller: verb + path + body, returning
/// the controller's status code. Implementations must enforce finite
/// connect/read timeouts — a single call never blocks forever.
#[async_trait]
pub trait AgentMessageTransport: Send + Sync {
    async fn exchange(
        &self,
        verb: DestinationVerb,
        path: &str,
        body: &[u8],
    ) -> Result<u16, TransportError>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Controller base address, e.g. `https://controller:8090`.
    pub controller_address: String,
    /// Optional API key sent with every call.
    pub api_key: Option<String>,
    /// PEM trust material; a relative path resolves against
    /// `installation_dir`, never the process working directory.
    pub truststore: Option<PathBuf>,
    /// Agent installation directory (see `configuration::InstallationDirProvider`).
    pub installation_dir: PathBuf,
    /// Fixed delay between attach attempts.
    pub attach_backoff: Duration,
    /// Connect timeout for a single exchange.
    pub connect_timeout: Duration,
    /// Overall timeout for a single exchange.
    pub request_timeout: Duration,
    /// Per-destination delivery queue bound.
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            controller_address: String::new(),
            api_key: None,
            truststore: None,
            installation_dir: PathBuf::from("."),
            attach_backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(1_500),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// ============================================================================
// SENDER CORE
// ============================================================================

/// Shared state driven by the background tasks. Split out from the sender
/// so the attach/dispatch loops are testable on any runtime.
pub(crate) struct SenderCore {
    transport: Arc<dyn AgentMessageTransport>,
    queue: DeliveryQueue,
    state: AtomicU8,
    attach_blob: Vec<u8>,
    attach_backoff: Duration,
}

impl SenderCore {
    pub(crate) fn new(
        transport: Arc<dyn AgentMessageTransport>,
        attach_blob: Vec<u8>,
        attach_backoff: Duration,
        queue_capacity: usize,
    ) -> Self {
        SenderCore {
            transport,
            queue: DeliveryQueue::new(queue_capacity),
            state: AtomicU8::new(AttachState::Detached as u8),
            attach_blob,
            attach_backoff,
        }
    }

    pub(crate) fn state(&self) -> AttachState {
        AttachState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves Detached → Attaching. Returns false when an attach sequence
    /// already ran or is running, so at most one sequence ever starts.
    pub(crate) fn begin_attach(&self) -> bool {
        self.state
            .compare_exchange(
                AttachState::Detached as u8,
                AttachState::Attaching as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Attach handshake loop: PUT the metadata blob until the controller
    /// answers with success. Retries indefinitely; there is no maximum
    /// attempt count.
    pub(crate) async fn run_attach(self: Arc<Self>) {
        debug!("attach: sending handshake to controller");
        loop {
            match self
                .transport
                .exchange(DestinationVerb::Put, ATTACH_PATH, &self.attach_blob)
                .await
            {
                Ok(code) if success(code) => break,
                Ok(code) => error!("attach: attempt failed, controller answered {}", code),
                Err(err) => error!("attach: attempt failed: {}", err),
            }
            tokio::time::sleep(self.attach_backoff).await;
        }
        self.state
            .store(AttachState::Attached as u8, Ordering::Release);
        debug!("attach: handshake successful");
    }

    /// Dispatch loop: drains the queue, one message per destination per
    /// pass, so per-destination submission order is preserved. A failed
    /// send is logged and dropped — telemetry is best-effort.
    pub(crate) async fn run_dispatch(self: Arc<Self>) {
        loop {
            let batch = self.queue.drain_pass();
            if batch.is_empty() {
                self.queue.notified().await;
                continue;
            }
            for message in batch {
                match self
                    .transport
                    .exchange(message.verb, &message.path, &message.body)
                    .await
                {
                    Ok(code) if success(code) => {
                        trace!("dispatch: {} {} delivered", message.verb, message.path)
                    }
                    Ok(code) => warn!(
                        "dispatch: {} {} rejected with {}, message dropped",
                        message.verb, message.path, code
                    ),
                    Err(err) => warn!(
                        "dispatch: {} {} failed: {}, message dropped",
                        message.verb, message.path, err
                    ),
                }
            }
        }
    }

    pub(crate) fn enqueue(&self, message: QueuedMessage) {
        self.queue.push(message);
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}

fn success(code: u16) -> bool {
    (200..300).contains(&code)
}

// ============================================================================
// AGENT MESSAGE SENDER
// ============================================================================

/// Application-facing sender.
///
/// Owns a dedicated single-worker runtime for the attach handshake and the
/// outbound send path; `send` only serializes and enqueues and is safe to
/// call from any application thread.
pub struct AgentMessageSender {
    core: Arc<SenderCore>,
    mapper: Arc<dyn DestinationMapper>,
    // Kept alive for the lifetime of the sender; dropping it stops
    // scheduling new attach attempts and new sends.
    runtime: tokio::runtime::Runtime,
}

impl AgentMessageSender {
    /// Builds a sender over the given wire transport.
    ///
    /// `attach_blob` is the opaque serialized agent metadata the controller
    /// expects in the handshake.
    pub fn new(
        transport: Arc<dyn AgentMessageTransport>,
        mapper: Arc<dyn DestinationMapper>,
        attach_blob: Vec<u8>,
        config: &TransportConfig,
    ) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("agent-transport")
            .enable_all()
            .build()?;
        let core = Arc::new(SenderCore::new(
            transport,
            attach_blob,
            config.attach_backoff,
            config.queue_capacity,
        ));
        runtime.spawn(Arc::clone(&core).run_dispatch());
        Ok(AgentMessageSender {
            core,
            mapper,
            runtime,
        })
    }

    /// Starts the attach handshake in the background. Does not block; a
    /// second call is a no-op while a sequence is running or complete.
    pub fn attach(&self) {
        if !self.core.begin_attach() {
            debug!("attach: already {:?}, ignoring", self.core.state());
            return;
        }
        self.runtime.spawn(Arc::clone(&self.core).run_attach());
    }

    /// True only after a successful attach handshake.
    pub fn is_transport_available(&self) -> bool {
        self.core.state() == AttachState::Attached
    }

    /// Submits a message for delivery.
    ///
    /// Maps the destination, serializes the payload, and enqueues. Silently
    /// drops (reported via the status, logged at debug) while the transport
    /// is unavailable. Never blocks on network I/O and never panics.
    pub fn send(
        &self,
        destination: AgentMessageDestination,
        message: &AgentMessage,
    ) -> ResponseStatus {
        if !self.is_transport_available() {
            debug!(
                "send: transport unavailable, dropping message for {}",
                destination.target
            );
            return ResponseStatus::Unavailable;
        }
        let mapped = self.mapper.map(destination);
        let body = match message.to_bytes() {
            Ok(body) => body,
            Err(err) => {
                warn!("send: unserializable payload for {}: {}", mapped.target, err);
                return ResponseStatus::Rejected;
            }
        };
        self.core.enqueue(QueuedMessage {
            verb: mapped.verb,
            path: mapped.target,
            body,
        });
        ResponseStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mapper::InstanceDestinationMapper;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// In-memory transport failing the first `failures` exchanges, then
    /// recording every successful call.
    struct FlakyTransport {
        failures: AtomicUsize,
        calls: Mutex<Vec<(DestinationVerb, String, Vec<u8>)>>,
    }

    impl FlakyTransport {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(FlakyTransport {
                failures: AtomicUsize::new(failures),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(DestinationVerb, String, Vec<u8>)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl AgentMessageTransport for FlakyTransport {
        async fn exchange(
            &self,
            verb: DestinationVerb,
            path: &str,
            body: &[u8],
        ) -> Result<u16, TransportError> {
            let remaining = self.failures.load(Ordering::Acquire);
            if remaining > 0 {
                self.failures.fetch_sub(1, Ordering::AcqRel);
                return Ok(503);
            }
            self.calls
                .lock()
                .push((verb, path.to_string(), body.to_vec()));
            Ok(200)
        }
    }

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn test_config() -> TransportConfig {
        TransportConfig {
            attach_backoff: Duration::from_millis(10),
            ..TransportConfig::default()
        }
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[tokio::test]
    async fn attach_retries_until_the_controller_answers() {
        init_logs();
        let transport = FlakyTransport::failing(3);
        let core = Arc::new(SenderCore::new(
            transport.clone(),
            b"blob".to_vec(),
            Duration::from_millis(1),
            8,
        ));
        assert!(core.begin_attach());
        assert_eq!(core.state(), AttachState::Attaching);

        Arc::clone(&core).run_attach().await;
        assert_eq!(core.state(), AttachState::Attached);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, ATTACH_PATH);
        assert_eq!(calls[0].2, b"blob");
    }

    #[tokio::test]
    async fn only_one_attach_sequence_begins() {
        let transport = FlakyTransport::failing(0);
        let core = Arc::new(SenderCore::new(
            transport,
            Vec::new(),
            Duration::from_millis(1),
            8,
        ));
        assert!(core.begin_attach());
        assert!(!core.begin_attach());
        Arc::clone(&core).run_attach().await;
        assert!(!core.begin_attach());
    }

    #[test]
    fn sender_is_unavailable_until_attach_succeeds() {
        let transport = FlakyTransport::failing(2);
        let mapper = Arc::new(InstanceDestinationMapper::new("abc123"));
        let sender = AgentMessageSender::new(
            transport.clone(),
            mapper,
            b"meta".to_vec(),
            &test_config(),
        )
        .unwrap();

        assert!(!sender.is_transport_available());
        let message = AgentMessage::new(json!({"k": 1}));
        assert_eq!(
            sender.send(AgentMessageDestination::post("coverage"), &message),
            ResponseStatus::Unavailable
        );

        sender.attach();
        sender.attach(); // second call is a no-op
        assert!(wait_until(Duration::from_secs(5), || sender
            .is_transport_available()));
    }

    #[test]
    fn messages_for_one_destination_arrive_in_submission_order() {
        let transport = FlakyTransport::failing(0);
        let mapper = Arc::new(InstanceDestinationMapper::new("abc123"));
        let sender =
            AgentMessageSender::new(transport.clone(), mapper, Vec::new(), &test_config())
                .unwrap();
        sender.attach();
        assert!(wait_until(Duration::from_secs(5), || sender
            .is_transport_available()));

        let m1 = AgentMessage::new(json!({"seq": 1}));
        let m2 = AgentMessage::new(json!({"seq": 2}));
        assert_eq!(
            sender.send(AgentMessageDestination::post("coverage"), &m1),
            ResponseStatus::Accepted
        );
        assert_eq!(
            sender.send(AgentMessageDestination::post("coverage"), &m2),
            ResponseStatus::Accepted
        );

        assert!(wait_until(Duration::from_secs(5), || {
            transport.calls().iter().filter(|c| c.1.contains("coverage")).count() == 2
        }));
        let delivered: Vec<Vec<u8>> = transport
            .calls()
            .into_iter()
            .filter(|c| c.1 == "agent/abc123/coverage")
            .map(|c| c.2)
            .collect();
        assert_eq!(delivered[0], m1.to_bytes().unwrap());
        assert_eq!(delivered[1], m2.to_bytes().unwrap());
    }

    #[tokio::test]
    async fn dispatch_drops_failed_messages_and_keeps_going() {
        init_logs();
        let transport = FlakyTransport::failing(1);
        let core = Arc::new(SenderCore::new(
            transport.clone(),
            Vec::new(),
            Duration::from_millis(1),
            8,
        ));
        core.enqueue(QueuedMessage {
            verb: DestinationVerb::Post,
            path: "agent/a/coverage".into(),
            body: b"m1".to_vec(),
        });
        core.enqueue(QueuedMessage {
            verb: DestinationVerb::Post,
            path: "agent/a/coverage".into(),
            body: b"m2".to_vec(),
        });

        let dispatcher = tokio::spawn(Arc::clone(&core).run_dispatch());
        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.calls().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatcher.abort();

        // m1 hit the failure and was dropped; m2 went through.
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, b"m2");
        assert_eq!(core.queued(), 0);
    }
}
