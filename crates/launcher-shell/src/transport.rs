//! Duplex channel to the back process.
//!
//! One reader task and one writer task per connection.  Requests carry a
//! correlation id and park a `oneshot` in the pending table; the reader
//! completes it when the matching `Envelope::Response` arrives.  Push events
//! are fanned out to every registered handler, in registration order, on the
//! reader task.
//!
//! There are no timeouts.  When the connection closes every parked request
//! resolves to `TransportError::Closed` and later calls fail fast.  A response
//! frame that arrives but cannot be decoded fails its request with
//! `TransportError::Frame`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use launcher_proto::protocol::{Envelope, FrameError, PushEvent, Request, RequestId, Response};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to the back is closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("back reported an error: {0}")]
    Remote(String),
}

type PushHandler = Arc<dyn Fn(&PushEvent) + Send + Sync>;
type Waiter = oneshot::Sender<Result<Response, TransportError>>;

#[derive(Default)]
struct Pending {
    waiters: HashMap<RequestId, Waiter>,
    closed: bool,
}

struct Shared {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<Pending>,
    handlers: RwLock<Vec<PushHandler>>,
    next_id: AtomicU64,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark closed and drop every parked sender so their receivers wake.
    fn close(&self) {
        let mut pending = self.pending();
        if !pending.closed {
            pending.closed = true;
            let dropped = pending.waiters.len();
            pending.waiters.clear();
            if dropped > 0 {
                warn!("Transport closed with {} request(s) outstanding", dropped);
            }
        }
    }
}

/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    pub async fn connect(address: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        info!("Connected to back at {}", address);
        Ok(Self::spawn(stream))
    }

    /// Try `connect` up to `attempts` times, sleeping `delay` in between.
    /// The back is often still starting when the shell comes up.
    pub async fn connect_with_retry(
        address: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, TransportError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::connect(address).await {
                Ok(t) => return Ok(t),
                Err(e) if attempt < attempts => {
                    debug!(
                        "Connect to {} failed (attempt {}/{}): {}",
                        address, attempt, attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Giving up on {} after {} attempts: {}", address, attempts, e);
                    return Err(e);
                }
            }
        }
    }

    /// Start the reader/writer tasks over an already-open stream.
    pub fn spawn<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let shared = Arc::new(Shared {
            outbound: outbound_tx,
            pending: Mutex::new(Pending::default()),
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        });

        tokio::spawn(write_loop(write_half, outbound_rx));
        tokio::spawn(read_loop(read_half, Arc::clone(&shared)));

        Self { shared }
    }

    /// Fire-and-forget.  No response is expected or awaited.
    pub fn send(&self, request: Request) -> Result<(), TransportError> {
        if self.shared.pending().closed {
            return Err(TransportError::Closed);
        }
        let encoded = Envelope::Request { id: None, request }.encode()?;
        self.shared
            .outbound
            .send(encoded)
            .map_err(|_| TransportError::Closed)
    }

    /// Send `request` and wait for the response carrying the same id.
    pub async fn request(&self, request: Request) -> Result<Response, TransportError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let encoded = Envelope::Request {
            id: Some(id),
            request,
        }
        .encode()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending();
            if pending.closed {
                return Err(TransportError::Closed);
            }
            pending.waiters.insert(id, tx);
        }

        if self.shared.outbound.send(encoded).is_err() {
            self.shared.pending().waiters.remove(&id);
            return Err(TransportError::Closed);
        }

        match rx.await {
            Ok(Ok(Response::Error { message })) => Err(TransportError::Remote(message)),
            Ok(result) => result,
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Subscribe to push events.  Handlers run on the reader task, so they
    /// must not block.
    pub fn on_push<F>(&self, handler: F)
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending().closed
    }

    /// Number of requests still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.shared.pending().waiters.len()
    }
}

async fn write_loop<W>(mut writer: W, mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            error!("Write to back failed: {}", e);
            break;
        }
    }
    debug!("Transport writer finished");
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut tmp = [0u8; 8192];
    let mut read_buf: Vec<u8> = Vec::new();

    'conn: loop {
        match reader.read(&mut tmp).await {
            Ok(0) => {
                info!("Back closed the connection");
                break;
            }
            Ok(n) => {
                read_buf.extend_from_slice(&tmp[..n]);

                loop {
                    let len = match Envelope::frame_len(&read_buf) {
                        Ok(Some(len)) => len,
                        Ok(None) => break,
                        Err(e) => {
                            error!("Dropping connection: {}", e);
                            break 'conn;
                        }
                    };
                    let frame: Vec<u8> = read_buf.drain(..len).collect();
                    match Envelope::decode(&frame) {
                        Ok(Some((envelope, _))) => dispatch(&shared, envelope),
                        Ok(None) => {}
                        Err(e) => fail_undecodable(&shared, &frame, e),
                    }
                }
            }
            Err(e) => {
                error!("Read error from back: {}", e);
                break;
            }
        }
    }

    shared.close();
}

/// Skip a frame that didn't decode.  If it still names a pending request, fail
/// that request with the decode error.
fn fail_undecodable(shared: &Shared, frame: &[u8], error: FrameError) {
    let waiter = Envelope::response_id(frame)
        .and_then(|id| shared.pending().waiters.remove(&id).map(|tx| (id, tx)));
    match waiter {
        Some((id, tx)) => {
            warn!("Malformed response to request {}: {}", id, error);
            let _ = tx.send(Err(TransportError::Frame(error)));
        }
        None => warn!("Skipping malformed frame: {}", error),
    }
}

fn dispatch(shared: &Shared, envelope: Envelope) {
    match envelope {
        Envelope::Response { id, response } => {
            let waiter = shared.pending().waiters.remove(&id);
            match waiter {
                Some(tx) => {
                    // Receiver may have been dropped by a caller that stopped
                    // caring; that's fine.
                    let _ = tx.send(Ok(response));
                }
                None => debug!("Response for unknown request id {}", id),
            }
        }
        Envelope::Push { event } => {
            if matches!(event, PushEvent::Unknown) {
                debug!("Ignoring unrecognised push event");
                return;
            }
            let handlers: Vec<PushHandler> = shared
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for handler in &handlers {
                handler(&event);
            }
        }
        Envelope::Request { request, .. } => {
            warn!("Unexpected request from back: {:?}", request);
        }
    }
}
