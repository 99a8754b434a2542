//! Core session management.
//!
//! A [`Session`] owns one connected byte stream and runs two Tokio tasks over
//! it: a read loop that decodes inbound messages and hands them to the read
//! callback, and a write loop that drains the outbound queue in FIFO order.
//! Either loop, or the owner, may close the session; the close protocol runs
//! exactly once no matter how many of them race.

use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use peerlink_wire::MessageCodec;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{CallbackError, SessionError};

/// Upper bound on the write-side shutdown issued when a session closes
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Invoked once per decoded inbound message, on the read loop
pub type ReadCallback<C> = Arc<
    dyn Fn(&Session<C>, <C as MessageCodec>::Message) -> anyhow::Result<()> + Send + Sync,
>;

/// Invoked exactly once when the session transitions to closed
pub type CloseCallback<C> = Arc<dyn Fn(&Session<C>) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`ReadCallback`]
pub fn on_message<C, F>(callback: F) -> ReadCallback<C>
where
    C: MessageCodec,
    F: Fn(&Session<C>, C::Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Wrap a closure as a [`CloseCallback`]
pub fn on_close<C, F>(callback: F) -> CloseCallback<C>
where
    C: MessageCodec,
    F: Fn(&Session<C>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Statistics for a session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages decoded by the read loop
    pub messages_in: u64,
    /// Messages fully written by the write loop
    pub messages_out: u64,
    /// Read or close callback invocations that failed or panicked
    pub callback_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    callback_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }
}

/// State guarded by the session lock
struct SessionState<M> {
    /// Flips to false exactly once
    active: bool,
    /// Outbound queue; `None` once closed
    outbound: Option<mpsc::UnboundedSender<M>>,
}

struct Inner<C: MessageCodec> {
    id: u64,
    remote_addr: SocketAddr,
    state: Mutex<SessionState<C::Message>>,
    /// Tells both loops to stop touching the socket
    shutdown: CancellationToken,
    /// Cancelled after the close protocol, callback included, has run
    closed: CancellationToken,
    tasks: TaskTracker,
    read_callback: ReadCallback<C>,
    close_callback: Option<CloseCallback<C>>,
    stats: StatsCounters,
}

/// Handle to one connection.
///
/// Cloning is cheap; all clones refer to the same session. The session never
/// removes itself from any owner-side collection: owners learn about closure
/// through the close callback or through [`SessionError::Closed`].
pub struct Session<C: MessageCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: MessageCodec> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: MessageCodec> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<C: MessageCodec> Session<C> {
    /// Start a session over an already-connected stream.
    ///
    /// Spawns the read and write loops on the current Tokio runtime and
    /// returns without waiting on any I/O. Must be called from within a
    /// runtime.
    pub fn spawn<S>(
        stream: S,
        remote_addr: SocketAddr,
        codec: C,
        read_callback: ReadCallback<C>,
        close_callback: Option<CloseCallback<C>>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let session = Self {
            inner: Arc::new(Inner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                remote_addr,
                state: Mutex::new(SessionState {
                    active: true,
                    outbound: Some(outbound_tx),
                }),
                shutdown: CancellationToken::new(),
                closed: CancellationToken::new(),
                tasks: TaskTracker::new(),
                read_callback,
                close_callback,
                stats: StatsCounters::default(),
            }),
        };

        debug!("Starting session {} with {}", session.id(), remote_addr);

        let tasks = &session.inner.tasks;
        tasks.spawn(session.clone().read_loop(reader, codec.clone()));
        tasks.spawn(session.clone().write_loop(writer, codec, outbound_rx));
        tasks.close();

        session
    }

    /// Process-unique session id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Peer this session is connected to
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Whether the session still accepts messages.
    ///
    /// Only a snapshot: the session may close right after this returns, so
    /// senders must handle [`SessionError::Closed`] from
    /// [`Session::write_message`] instead of checking first.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Current counters
    pub fn stats(&self) -> SessionStats {
        self.inner.stats.snapshot()
    }

    /// Queue a message for the write loop.
    ///
    /// Returns as soon as the message is queued; delivery is best-effort and
    /// not confirmed. Fails with [`SessionError::Closed`] once the session
    /// has closed, in which case the message is dropped.
    pub fn write_message(&self, message: C::Message) -> Result<(), SessionError> {
        let state = self.inner.state.lock();
        match &state.outbound {
            Some(outbound) if state.active => outbound
                .send(message)
                .map_err(|_| self.closed_error()),
            _ => Err(self.closed_error()),
        }
    }

    /// Close the session.
    ///
    /// Idempotent and safe to call from any thread, including from inside
    /// either callback. Only the first call does anything: it marks the
    /// session inactive, signals both loops to shut the socket down, and runs
    /// the close callback. The write loop shuts down the outgoing direction
    /// and the read loop stops reading and drops the incoming one; the
    /// socket is freed once both halves are gone. The loops are not awaited;
    /// use [`Session::join`] for that.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            // Dropping the sender wakes the write loop if it is idle
            state.outbound = None;
        }

        let peer = self.inner.remote_addr;
        info!("Closing session {} with {}", self.inner.id, peer);

        self.inner.shutdown.cancel();

        if let Some(callback) = &self.inner.close_callback {
            if let Err(e) = run_callback(|| callback(self)) {
                self.inner.stats.callback_failures.fetch_add(1, Ordering::Relaxed);
                error!("Close callback for {} failed: {}", peer, e);
            }
        }

        self.inner.closed.cancel();
    }

    /// Resolves once the session has closed and its close callback returned
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Resolves once both the read and the write loop have exited
    pub async fn join(&self) {
        self.inner.tasks.wait().await
    }

    fn closed_error(&self) -> SessionError {
        SessionError::Closed {
            remote_addr: self.inner.remote_addr,
        }
    }

    async fn read_loop<S>(self, mut reader: ReadHalf<S>, mut codec: C)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = self.inner.remote_addr;
        let shutdown = self.inner.shutdown.clone();
        debug!("Read loop started for {}", peer);

        loop {
            let result = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                result = codec.decode_next(&mut reader) => result,
            };

            match result {
                Ok(message) => {
                    self.inner.stats.messages_in.fetch_add(1, Ordering::Relaxed);
                    self.deliver(message);
                }
                Err(e) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    if e.is_disconnect() {
                        info!("{} disconnected: {}", peer, e);
                    } else {
                        warn!("{} disconnected with error in read: {}", peer, e);
                    }
                    self.close();
                    break;
                }
            }
        }

        // Incoming direction is done with
        drop(reader);
        debug!("Read loop stopped for {}", peer);
    }

    /// Hand one message to the read callback; failures never leave this function
    fn deliver(&self, message: C::Message) {
        let callback = &self.inner.read_callback;
        if let Err(e) = run_callback(|| callback(self, message)) {
            self.inner.stats.callback_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Read callback for {} failed: {}", self.inner.remote_addr, e);
        }
    }

    async fn write_loop<S>(
        self,
        mut writer: WriteHalf<S>,
        mut codec: C,
        mut outbound: mpsc::UnboundedReceiver<C::Message>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = self.inner.remote_addr;
        let shutdown = self.inner.shutdown.clone();
        debug!("Write loop started for {}", peer);

        loop {
            let message = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                message = outbound.recv() => match message {
                    Some(message) => message,
                    // Sender only goes away in close()
                    None => break,
                },
            };

            let result = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                result = codec.encode_and_send(&mut writer, &message) => result,
            };

            if let Err(e) = result {
                warn!("{} disconnected with error in write: {}", peer, e);
                self.close();
                break;
            }
            self.inner.stats.messages_out.fetch_add(1, Ordering::Relaxed);
        }

        // Queued messages are dropped with the receiver
        drop(outbound);

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
            Ok(Ok(())) => debug!("Shut down socket for {}", peer),
            Ok(Err(e)) => warn!("Failed to shut down socket for {}: {}", peer, e),
            Err(_) => warn!("Timed out shutting down socket for {}", peer),
        }

        debug!("Write loop stopped for {}", peer);
    }
}

/// Run a caller-supplied callback, capturing both returned errors and panics
fn run_callback<F>(callback: F) -> Result<(), CallbackError>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CallbackError::Failed(e)),
        Err(panic) => Err(CallbackError::from_panic(panic)),
    }
}
