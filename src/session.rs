use crate::{
    channel::Channel,
    channel_id::{ChannelIdAllocator, Role},
    codec::Codec,
    config::Config,
    error::{MuxError, Result},
    flags::Flags,
    frame::Frame,
};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Notify, mpsc},
};
use tokio_util::codec::Framed;

/// Registry entry the demux reader keeps for each live channel.
#[derive(Debug)]
struct EndpointState {
    /// Routes inbound payloads to the endpoint. Dropping it seals the
    /// endpoint's buffer: blocked readers drain what is left, then observe
    /// end of stream.
    data_tx: mpsc::UnboundedSender<Bytes>,
    local_closed: Arc<AtomicBool>,
    remote_closed: Arc<AtomicBool>,
}

/// Session-wide shutdown state shared with every channel endpoint.
#[derive(Debug)]
pub(crate) struct SessionState {
    die: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            die: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn close_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.die)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.die.notify_waiters();
        }
    }
}

impl Clone for SessionState {
    fn clone(&self) -> Self {
        Self {
            die: Arc::clone(&self.die),
            closed: Arc::clone(&self.closed),
        }
    }
}

/// A multiplexing session binding many channels to one transport.
///
/// Cloning is cheap (shared inner state), so `dial` and `accept` may run
/// concurrently from different tasks.
#[derive(Debug)]
pub struct Session<T> {
    inner: Arc<SessionInner<T>>,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct SessionInner<T> {
    /// Every channel known to either side, keyed by id.
    endpoints: DashMap<u32, EndpointState>,
    config: Arc<Config>,
    /// Peer-opened channels waiting for `accept`.
    accept_tx: flume::Sender<Channel>,
    accept_rx: flume::Receiver<Channel>,
    id_alloc: ChannelIdAllocator,
    /// Egress FIFO feeding the send loop; shared by all channels.
    frame_tx: flume::Sender<Frame>,
    state: SessionState,
    _transport: std::marker::PhantomData<T>,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    /// Create the client side of a session. Channels dialed here get odd
    /// identifiers.
    pub async fn client(transport: T, config: Config) -> Result<Self> {
        Self::new(transport, config, Role::Client).await
    }

    /// Create the server side of a session. Channels dialed here get even
    /// identifiers.
    pub async fn server(transport: T, config: Config) -> Result<Self> {
        Self::new(transport, config, Role::Server).await
    }

    async fn new(transport: T, config: Config, role: Role) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let codec = Codec::new((*config).clone());
        let framed = Framed::new(transport, codec);
        let (sink, stream) = framed.split();

        let (frame_tx, frame_rx) = flume::bounded(config.send_queue_size);
        // Unbounded so the demux reader can never stall the whole session
        // behind a slow accept loop.
        let (accept_tx, accept_rx) = flume::unbounded();

        let inner = Arc::new(SessionInner {
            endpoints: DashMap::new(),
            config: Arc::clone(&config),
            accept_tx,
            accept_rx,
            id_alloc: ChannelIdAllocator::new(role),
            frame_tx,
            state: SessionState::new(),
            _transport: std::marker::PhantomData,
        });

        tokio::spawn(recv_loop(stream, Arc::clone(&inner)));
        tokio::spawn(send_loop(sink, frame_rx, Arc::clone(&inner)));

        Ok(Session { inner })
    }

    /// Open a new channel to the peer.
    ///
    /// Allocates the next id for this session's role, registers the
    /// endpoint and enqueues a SYN frame. Suspends only while the egress
    /// queue is full.
    pub async fn dial(&self) -> Result<Channel> {
        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }

        let id = match self.inner.id_alloc.next() {
            Ok(id) => id,
            Err(e) => {
                // Id space exhausted; the session cannot continue.
                self.inner.state.close();
                return Err(e);
            }
        };

        let channel = self.inner.register_endpoint(id);

        if self
            .inner
            .frame_tx
            .send_async(Frame::new_syn(id))
            .await
            .is_err()
        {
            self.inner.endpoints.remove(&id);
            return Err(MuxError::SessionClosed);
        }

        Ok(channel)
    }

    /// Wait for the next channel opened by the peer.
    ///
    /// Fails with `SessionClosed` only once the session has terminated and
    /// the accept queue is drained.
    pub async fn accept(&self) -> Result<Channel> {
        let notify = self.inner.state.close_notifier();
        let mut closed = std::pin::pin!(notify.notified());
        // Register interest before the liveness check so a concurrent
        // close cannot slip between the check and the select.
        closed.as_mut().enable();

        // A channel already queued is handed out even if the session has
        // terminated in the meantime.
        if let Ok(channel) = self.inner.accept_rx.try_recv() {
            return Ok(channel);
        }

        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }

        tokio::select! {
            result = self.inner.accept_rx.recv_async() => {
                result.map_err(|_| MuxError::SessionClosed)
            }
            _ = &mut closed => Err(MuxError::SessionClosed),
        }
    }

    /// Shut the session down.
    ///
    /// Idempotent. Both internal tasks exit, the transport is closed, every
    /// endpoint is sealed, and pending `dial`/`accept` calls return
    /// `SessionClosed`.
    pub async fn close(&self) -> Result<()> {
        self.inner.state.close();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }
}

impl<T> SessionInner<T> {
    /// Create an endpoint, insert its registry entry and hand back the
    /// user-facing channel.
    fn register_endpoint(&self, id: u32) -> Channel {
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let local_closed = Arc::new(AtomicBool::new(false));
        let remote_closed = Arc::new(AtomicBool::new(false));

        self.endpoints.insert(
            id,
            EndpointState {
                data_tx,
                local_closed: Arc::clone(&local_closed),
                remote_closed: Arc::clone(&remote_closed),
            },
        );

        Channel::new(
            id,
            self.frame_tx.clone(),
            data_rx,
            local_closed,
            remote_closed,
            self.state.clone(),
            Arc::clone(&self.config),
        )
    }
}

/// Demux reader: the only task that reads the transport. Routes each frame
/// to its channel, creating endpoints for peer-initiated ids.
async fn recv_loop<T>(mut stream: SplitStream<Framed<T, Codec>>, inner: Arc<SessionInner<T>>)
where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    let close_notifier = inner.state.close_notifier();
    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(frame)) => handle_frame(frame, &inner),
                    Some(Err(e)) => {
                        // Transport failure or peer protocol violation;
                        // both are fatal to the session.
                        tracing::error!("frame decode failed: {e}");
                        break;
                    }
                    None => {
                        tracing::debug!("transport closed by peer");
                        break;
                    }
                }
            }
            _ = close_notifier.notified() => break,
        }
    }

    shutdown_endpoints(&inner);
}

/// Egress serializer: the only task that writes the transport. Drains the
/// frame FIFO shared by all channels, one frame at a time.
async fn send_loop<T>(
    mut sink: SplitSink<Framed<T, Codec>, Frame>,
    frame_rx: flume::Receiver<Frame>,
    inner: Arc<SessionInner<T>>,
) where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    let close_notifier = inner.state.close_notifier();
    loop {
        tokio::select! {
            frame = frame_rx.recv_async() => {
                match frame {
                    Ok(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            tracing::error!("transport write failed: {e}");
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            _ = close_notifier.notified() => break,
        }
    }

    // Flush and close the write half; best effort during teardown.
    let _ = sink.close().await;
    inner.state.close();
}

fn handle_frame<T>(frame: Frame, inner: &SessionInner<T>) {
    match frame.flags {
        // SYN is a data frame that may be empty: any first frame on an
        // unknown peer-parity id opens the channel.
        Flags::Syn | Flags::Data => handle_payload(frame, inner),
        Flags::Rst => handle_reset(frame.channel_id, inner),
    }
}

fn handle_payload<T>(frame: Frame, inner: &SessionInner<T>) {
    let id = frame.channel_id;

    if let Some(entry) = inner.endpoints.get(&id) {
        let delivered = deliver(&entry, frame.payload);
        drop(entry);
        if !delivered {
            // The endpoint was dropped by the user; release the entry.
            inner.endpoints.remove(&id);
        }
        return;
    }

    // Unknown id: only the peer's half of the namespace may open a channel
    // implicitly. Anything else is a peer bug; drop the frame and carry on.
    if let Err(e) = inner.id_alloc.validate_peer_id(id) {
        tracing::debug!("dropping frame with {e}");
        return;
    }

    accept_remote(inner, id, frame.payload);
}

/// Route one payload to an endpoint. Returns false when the endpoint's
/// receiver is gone and the registry entry should be released.
fn deliver(entry: &EndpointState, payload: Bytes) -> bool {
    if payload.is_empty() {
        return true;
    }
    // Bytes arriving after a local close can never be read; drop them.
    if entry.local_closed.load(Ordering::Acquire) {
        return true;
    }
    entry.data_tx.send(payload).is_ok()
}

/// Create an endpoint for a peer-initiated channel and queue it for
/// `accept`, then append any payload the opening frame carried.
fn accept_remote<T>(inner: &SessionInner<T>, id: u32, payload: Bytes) {
    let channel = inner.register_endpoint(id);

    if inner.accept_tx.send(channel).is_err() {
        // Session is tearing down; nobody will accept this channel.
        inner.endpoints.remove(&id);
        return;
    }

    if !payload.is_empty() {
        if let Some(entry) = inner.endpoints.get(&id) {
            let _ = entry.data_tx.send(payload);
        }
    }
}

fn handle_reset<T>(id: u32, inner: &SessionInner<T>) {
    // Unknown ids are ignored: the peer closed a channel we have already
    // released.
    if let Some((_, entry)) = inner.endpoints.remove(&id) {
        entry.remote_closed.store(true, Ordering::Release);
        // Dropping the entry drops its data sender, waking any blocked
        // reader into drain-then-end-of-stream.
    }
}

/// Seal every endpoint, clear the registry and drain the accept queue.
/// Runs once when the demux reader exits, whether through user close,
/// transport EOF or a fatal decode error.
fn shutdown_endpoints<T>(inner: &SessionInner<T>) {
    inner.state.close();
    inner.endpoints.retain(|_, entry| {
        entry.remote_closed.store(true, Ordering::Release);
        false
    });
    // Dispose of peer-opened channels nobody accepted.
    while inner.accept_rx.try_recv().is_ok() {}
}
