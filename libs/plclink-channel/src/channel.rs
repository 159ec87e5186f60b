//! Framed duplex channel engine
//!
//! Owns one transport and four background workers (connect, send, receive,
//! buffer) cooperating through two FIFO queues and a shared cancellation
//! token. Message boundaries are recovered by the buffer worker's
//! [`FrameSplitter`]; request/response callers go through [`FramedChannel::send_receive`],
//! which serializes concurrent exchanges and times out on a missing reply.
//!
//! Failure policy: worker loops never terminate on an error. Each failure is
//! reported through a per-kind de-duplication set that resets on reconnect,
//! so a persistently failing link produces one report per error kind instead
//! of a storm.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ChannelError, ErrorKind, Result};
use crate::framing::FrameSplitter;
use crate::traits::Transport;

/// Worker polling cadence
const TICK: Duration = Duration::from_millis(20);

/// Default `send_receive` reply timeout
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Fired on every connected/disconnected transition (edge-triggered)
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;
/// Fired for every fully-framed inbound message
pub type FrameCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Fired for reported errors (each kind at most once until reconnect)
pub type ErrorCallback = Arc<dyn Fn(&ChannelError) + Send + Sync>;

/// Duplex message channel over one [`Transport`], with delimiter framing and
/// synchronous request/response correlation.
pub struct FramedChannel {
    transport: Arc<dyn Transport>,
    shared: Arc<ChannelShared>,
    read_timeout: Mutex<Duration>,
    /// Admits one in-flight `send_receive` exchange at a time
    exchange_gate: tokio::sync::Mutex<()>,
    runtime: Mutex<Option<ChannelRuntime>>,
}

struct ChannelRuntime {
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// State shared between the channel handle and its workers
struct ChannelShared {
    label: String,
    send_queue: Mutex<VecDeque<Vec<u8>>>,
    recv_queue: Mutex<VecDeque<Vec<u8>>>,
    start_marker: OnceLock<Vec<u8>>,
    end_marker: OnceLock<Vec<u8>>,
    /// Error kinds already reported since the last reconnect
    reported: Mutex<HashSet<ErrorKind>>,
    /// Last connection state observed by the connect worker
    connected: Mutex<bool>,
    frame_tx: broadcast::Sender<Vec<u8>>,
    on_connection_change: Mutex<Option<ConnectionCallback>>,
    on_frame: Mutex<Option<FrameCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl FramedChannel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (frame_tx, _) = broadcast::channel(64);
        let shared = Arc::new(ChannelShared {
            label: transport.label().to_string(),
            send_queue: Mutex::new(VecDeque::new()),
            recv_queue: Mutex::new(VecDeque::new()),
            start_marker: OnceLock::new(),
            end_marker: OnceLock::new(),
            reported: Mutex::new(HashSet::new()),
            connected: Mutex::new(false),
            frame_tx,
            on_connection_change: Mutex::new(None),
            on_frame: Mutex::new(None),
            on_error: Mutex::new(None),
        });
        Self {
            transport,
            shared,
            read_timeout: Mutex::new(DEFAULT_READ_TIMEOUT),
            exchange_gate: tokio::sync::Mutex::new(()),
            runtime: Mutex::new(None),
        }
    }

    /// Endpoint description used in log events
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Reply timeout for [`FramedChannel::send_receive`]
    pub fn read_timeout(&self) -> Duration {
        *self.read_timeout.lock()
    }

    pub fn set_read_timeout(&self, timeout: Duration) {
        *self.read_timeout.lock() = timeout;
    }

    /// Frame start marker; settable exactly once, later calls are no-ops
    pub fn set_start_marker(&self, marker: Vec<u8>) {
        let _ = self.shared.start_marker.set(marker);
    }

    /// Frame end marker; settable exactly once, later calls are no-ops
    pub fn set_end_marker(&self, marker: Vec<u8>) {
        let _ = self.shared.end_marker.set(marker);
    }

    pub fn on_connection_change(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        *self.shared.on_connection_change.lock() = Some(Arc::new(callback));
    }

    pub fn on_frame(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.shared.on_frame.lock() = Some(Arc::new(callback));
    }

    pub fn on_error(&self, callback: impl Fn(&ChannelError) + Send + Sync + 'static) {
        *self.shared.on_error.lock() = Some(Arc::new(callback));
    }

    /// Subscribe to framed inbound messages (emitted in stream order)
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Vec<u8>> {
        self.shared.frame_tx.subscribe()
    }

    /// Cheap, non-blocking connection probe
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Open the transport and launch the four workers. A running channel is
    /// stopped first, so calling `start` again restarts the worker set.
    pub async fn start(&self) -> Result<()> {
        self.stop().await;

        let token = CancellationToken::new();
        self.transport.open(token.clone()).await?;

        let workers = vec![
            tokio::spawn(connect_worker(
                self.shared.clone(),
                self.transport.clone(),
                token.clone(),
            )),
            tokio::spawn(send_worker(
                self.shared.clone(),
                self.transport.clone(),
                token.clone(),
            )),
            tokio::spawn(receive_worker(
                self.shared.clone(),
                self.transport.clone(),
                token.clone(),
            )),
            tokio::spawn(buffer_worker(self.shared.clone(), token.clone())),
        ];
        *self.runtime.lock() = Some(ChannelRuntime { token, workers });

        info!(channel = %self.shared.label, "channel started");
        Ok(())
    }

    /// Cancel the workers, join them (each observes the token within one
    /// tick), shut the transport, and clear the error-dedup set.
    pub async fn stop(&self) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.token.cancel();
            for worker in runtime.workers {
                let _ = worker.await;
            }
            info!(channel = %self.shared.label, "channel stopped");
        }
        self.transport.shutdown().await;
        self.shared.reported.lock().clear();
    }

    /// Enqueue one message for transmission. Fire-and-forget: silently
    /// dropped when the channel is not connected.
    pub fn send(&self, message: Vec<u8>) {
        if self.transport.is_connected() {
            self.shared.send_queue.lock().push_back(message);
        }
    }

    /// Send one request and wait for the first framed reply.
    ///
    /// Concurrent callers are serialized through the exchange gate. On
    /// timeout the error is reported through the error callback and an empty
    /// vector is returned; callers must treat empty/short replies as failure.
    pub async fn send_receive(&self, message: Vec<u8>) -> Vec<u8> {
        let timeout = self.read_timeout();
        let _gate = self.exchange_gate.lock().await;

        // Subscribe before sending so the reply cannot slip past.
        let mut frames = self.shared.frame_tx.subscribe();
        self.send(message);

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, frames.recv()).await {
                Ok(Ok(frame)) => return frame,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return Vec::new(),
                Err(_) => {
                    let err = ChannelError::Timeout(timeout.as_millis() as u64);
                    warn!(channel = %self.shared.label, "{err}");
                    self.shared.invoke_error(&err);
                    return Vec::new();
                }
            }
        }
    }
}

impl ChannelShared {
    fn invoke_error(&self, err: &ChannelError) {
        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }

    /// Report an error once per kind; repeats are suppressed until the
    /// dedup set is cleared by a reconnect or a stop.
    fn report_error(&self, err: &ChannelError) {
        let first = self.reported.lock().insert(err.kind());
        if first {
            warn!(channel = %self.label, "{err}");
            self.invoke_error(err);
        } else {
            debug!(channel = %self.label, "suppressed repeat: {err}");
        }
    }

    fn clear_reported(&self) {
        self.reported.lock().clear();
    }

    /// Publish a connection transition; returns true when the state changed.
    /// The callback runs outside the state lock.
    fn update_connect_state(&self, connected: bool) -> bool {
        {
            let mut last = self.connected.lock();
            if *last == connected {
                return false;
            }
            *last = connected;
        }
        info!(channel = %self.label, connected, "connection state changed");
        let callback = self.on_connection_change.lock().clone();
        if let Some(callback) = callback {
            callback(connected);
        }
        true
    }

    fn emit_frame(&self, frame: Vec<u8>) {
        let callback = self.on_frame.lock().clone();
        if let Some(callback) = callback {
            callback(&frame);
        }
        // No receivers is fine; send_receive subscribes on demand.
        let _ = self.frame_tx.send(frame);
    }
}

/// Polls connection health every tick, publishes edge-triggered transitions,
/// runs one reconnect step while disconnected, and clears the error-dedup
/// set when the link comes back.
async fn connect_worker(
    shared: Arc<ChannelShared>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(TICK) => {}
            () = token.cancelled() => break,
        }

        let connected = transport.is_connected();
        if shared.update_connect_state(connected) && connected {
            shared.clear_reported();
        }
        if connected {
            continue;
        }

        tokio::select! {
            result = transport.connect() => match result {
                Ok(()) => {
                    if shared.update_connect_state(transport.is_connected()) {
                        shared.clear_reported();
                    }
                }
                Err(err) => shared.report_error(&err),
            },
            () = token.cancelled() => break,
        }
    }
    debug!(channel = %shared.label, "connect worker stopped");
}

/// Pops one outbound message per iteration while connected and writes it,
/// racing the write against cancellation.
async fn send_worker(
    shared: Arc<ChannelShared>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let message = if transport.is_connected() {
            shared.send_queue.lock().pop_front()
        } else {
            None
        };

        match message {
            None => {
                tokio::select! {
                    () = tokio::time::sleep(TICK) => {}
                    () = token.cancelled() => break,
                }
            }
            Some(message) => {
                tokio::select! {
                    result = transport.write_raw(&message) => {
                        if let Err(err) = result {
                            shared.report_error(&err);
                        }
                    }
                    () = token.cancelled() => break,
                }
            }
        }
    }
    debug!(channel = %shared.label, "send worker stopped");
}

/// Performs one raw read per iteration while connected and pushes non-empty
/// chunks onto the inbound queue for the buffer worker.
async fn receive_worker(
    shared: Arc<ChannelShared>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        if !transport.is_connected() {
            tokio::select! {
                () = tokio::time::sleep(TICK) => {}
                () = token.cancelled() => break,
            }
            continue;
        }

        tokio::select! {
            result = transport.read_raw() => match result {
                Ok(chunk) => {
                    if !chunk.is_empty() {
                        shared.recv_queue.lock().push_back(chunk);
                    }
                }
                Err(err) => shared.report_error(&err),
            },
            () = token.cancelled() => break,
        }
    }
    debug!(channel = %shared.label, "receive worker stopped");
}

/// Drains raw chunks into the frame splitter and emits every complete frame
/// in stream order.
async fn buffer_worker(shared: Arc<ChannelShared>, token: CancellationToken) {
    let mut splitter = FrameSplitter::new(
        shared.start_marker.get().cloned(),
        shared.end_marker.get().cloned(),
    );

    loop {
        if token.is_cancelled() {
            break;
        }

        let chunk = shared.recv_queue.lock().pop_front();
        match chunk {
            None => {
                tokio::select! {
                    () = tokio::time::sleep(TICK) => {}
                    () = token.cancelled() => break,
                }
            }
            Some(chunk) => {
                for frame in splitter.push_chunk(&chunk) {
                    shared.emit_frame(frame);
                }
            }
        }
    }
    debug!(channel = %shared.label, "buffer worker stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    // ========================================================================
    // Scriptable in-memory transport
    // ========================================================================

    #[derive(Default)]
    struct FakeTransport {
        connected: AtomicBool,
        fail_connect: AtomicBool,
        echo_replies: AtomicBool,
        reads: Mutex<VecDeque<Vec<u8>>>,
        written: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        fn push_read(&self, chunk: &[u8]) {
            self.reads.lock().push_back(chunk.to_vec());
        }

        fn written(&self) -> Vec<Vec<u8>> {
            self.written.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn label(&self) -> &str {
            "fake"
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn open(&self, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn connect(&self) -> Result<()> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(ChannelError::connect("scripted failure"));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn read_raw(&self) -> Result<Vec<u8>> {
            let chunk = self.reads.lock().pop_front();
            match chunk {
                Some(chunk) => Ok(chunk),
                None => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn write_raw(&self, data: &[u8]) -> Result<()> {
            self.written.lock().push(data.to_vec());
            if self.echo_replies.load(Ordering::SeqCst) {
                self.reads.lock().push_back(data.to_vec());
            }
            Ok(())
        }

        async fn shutdown(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 2s");
    }

    fn ascii_channel(transport: Arc<FakeTransport>) -> FramedChannel {
        let channel = FramedChannel::new(transport);
        channel.set_start_marker(b"<".to_vec());
        channel.set_end_marker(b"\r".to_vec());
        channel
    }

    // ========================================================================
    // Send semantics
    // ========================================================================

    #[tokio::test]
    async fn test_send_dropped_while_disconnected() {
        let transport = FakeTransport::new();
        let channel = ascii_channel(transport.clone());
        channel.start().await.unwrap();

        channel.send(b"<LOST\r".to_vec());
        transport.set_connected(true);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(transport.written().is_empty());

        channel.send(b"<KEPT\r".to_vec());
        wait_until(|| !transport.written().is_empty()).await;
        assert_eq!(transport.written(), vec![b"<KEPT\r".to_vec()]);

        channel.stop().await;
    }

    #[tokio::test]
    async fn test_markers_are_write_once() {
        let transport = FakeTransport::new();
        transport.set_connected(true);
        let channel = FramedChannel::new(transport.clone());
        channel.set_start_marker(b"<".to_vec());
        channel.set_start_marker(b"@".to_vec()); // no-op
        channel.set_end_marker(b"\r".to_vec());
        channel.set_end_marker(b"*\r".to_vec()); // no-op
        channel.start().await.unwrap();

        let frames: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = frames.clone();
        channel.on_frame(move |frame| seen.lock().push(frame.to_vec()));

        transport.push_read(b"@IGNORED*\r<REAL\r");
        wait_until(|| !frames.lock().is_empty()).await;
        // The first marker pair won: the `@...*\r` text is noise before the
        // `<` start and only the CR-terminated frame comes out.
        assert_eq!(frames.lock().as_slice(), &[b"<REAL\r".to_vec()]);

        channel.stop().await;
    }

    // ========================================================================
    // Request/response correlation
    // ========================================================================

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let transport = FakeTransport::new();
        transport.set_connected(true);
        transport.echo_replies.store(true, Ordering::SeqCst);
        let channel = ascii_channel(transport.clone());
        channel.start().await.unwrap();
        wait_until(|| channel.is_connected()).await;

        let reply = channel.send_receive(b"<PING\r".to_vec()).await;
        assert_eq!(reply, b"<PING\r".to_vec());

        channel.stop().await;
    }

    #[tokio::test]
    async fn test_send_receive_timeout_returns_empty_and_reports() {
        let transport = FakeTransport::new();
        transport.set_connected(true);
        let channel = ascii_channel(transport.clone());
        channel.set_read_timeout(Duration::from_millis(100));
        channel.start().await.unwrap();

        let errors: Arc<Mutex<Vec<ErrorKind>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        channel.on_error(move |err| seen.lock().push(err.kind()));

        let reply = channel.send_receive(b"<PING\r".to_vec()).await;
        assert!(reply.is_empty());
        assert_eq!(errors.lock().as_slice(), &[ErrorKind::Timeout]);

        channel.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_send_receive_is_serialized() {
        let transport = FakeTransport::new();
        transport.set_connected(true);
        transport.echo_replies.store(true, Ordering::SeqCst);
        let channel = Arc::new(ascii_channel(transport.clone()));
        channel.start().await.unwrap();
        wait_until(|| channel.is_connected()).await;

        let first = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send_receive(b"<ONE\r".to_vec()).await })
        };
        let second = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.send_receive(b"<TWO\r".to_vec()).await })
        };

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        // Each caller got the reply to its own request: the gate kept the
        // exchanges from interleaving.
        assert!(first == b"<ONE\r".to_vec() || first == b"<TWO\r".to_vec());
        assert_ne!(first, second);

        channel.stop().await;
    }

    // ========================================================================
    // Connection lifecycle and error de-duplication
    // ========================================================================

    #[tokio::test]
    async fn test_reconnect_edge_triggered_and_dedup_reset() {
        let transport = FakeTransport::new();
        transport.fail_connect.store(true, Ordering::SeqCst);
        let channel = ascii_channel(transport.clone());

        let transitions: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let errors: Arc<Mutex<Vec<ErrorKind>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let transitions = transitions.clone();
            channel.on_connection_change(move |connected| transitions.lock().push(connected));
        }
        {
            let errors = errors.clone();
            channel.on_error(move |err| errors.lock().push(err.kind()));
        }

        channel.start().await.unwrap();

        // Many failing ticks, one reported Connect error.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(errors.lock().as_slice(), &[ErrorKind::Connect]);
        assert!(transitions.lock().is_empty());

        // Let the link come up: exactly one `true` transition.
        transport.fail_connect.store(false, Ordering::SeqCst);
        wait_until(|| transitions.lock().as_slice() == [true]).await;

        // Drop the link with failing reconnects: one `false` transition and
        // the Connect error is reported again (dedup cleared on reconnect).
        transport.fail_connect.store(true, Ordering::SeqCst);
        transport.set_connected(false);
        wait_until(|| transitions.lock().as_slice() == [true, false]).await;
        wait_until(|| errors.lock().len() == 2).await;
        assert_eq!(errors.lock().as_slice(), &[ErrorKind::Connect, ErrorKind::Connect]);

        channel.stop().await;
    }

    #[tokio::test]
    async fn test_restart_replaces_worker_set() {
        let transport = FakeTransport::new();
        transport.set_connected(true);
        transport.echo_replies.store(true, Ordering::SeqCst);
        let channel = ascii_channel(transport.clone());

        channel.start().await.unwrap();
        channel.stop().await;
        // `shutdown` dropped the link; reconnect is the worker's job.
        assert!(!channel.is_connected());

        channel.start().await.unwrap();
        wait_until(|| channel.is_connected()).await;
        let reply = channel.send_receive(b"<AGAIN\r".to_vec()).await;
        assert_eq!(reply, b"<AGAIN\r".to_vec());

        channel.stop().await;
    }

    #[tokio::test]
    async fn test_frames_emitted_in_order_across_chunks() {
        let transport = FakeTransport::new();
        transport.set_connected(true);
        let channel = ascii_channel(transport.clone());
        channel.start().await.unwrap();

        let frames: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = frames.clone();
        channel.on_frame(move |frame| seen.lock().push(frame.to_vec()));

        transport.push_read(b"<A\r<B");
        transport.push_read(b"\r<C\r");
        wait_until(|| frames.lock().len() == 3).await;
        assert_eq!(
            frames.lock().as_slice(),
            &[b"<A\r".to_vec(), b"<B\r".to_vec(), b"<C\r".to_vec()]
        );

        channel.stop().await;
    }
}
