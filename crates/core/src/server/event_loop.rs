use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use thiserror::Error;

use crate::request::process_request_use_case::ProcessRequestUseCase;
use crate::request::response::error_bytes;

use super::connection_registry::{Connection, ConnectionRegistry, ReadOutcome};
use super::framing::{Inbound, RequestFramer};
use super::server_config::{ConfigError, ServerConfig};
use super::worker_pool::{execute_guarded, Job, SubmitError, WorkerPool};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
    #[error("failed to register listener: {0}")]
    Register(#[source] io::Error),
    #[error("failed to create waker: {0}")]
    Waker(#[source] io::Error),
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(#[source] io::Error),
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            log::warn!("Failed to wake event loop for shutdown: {e}");
        }
    }
}

/// Live count of open client connections, readable from any thread.
#[derive(Clone, Debug, Default)]
pub struct OpenConnections(Arc<AtomicUsize>);

impl OpenConnections {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, count: usize) {
        self.0.store(count, Ordering::SeqCst);
    }
}

/// Where requests are executed.
enum Dispatcher {
    /// On the event-loop thread, synchronously.
    Inline(ProcessRequestUseCase),
    Pool(WorkerPool),
}

/// Single-threaded readiness-polling TCP server.
///
/// One `mio::Poll` watches the listener, every connection and the waker.
/// Requests are framed per connection and handed to the dispatcher;
/// responses go back in request order through each connection's
/// outbound queue.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    config: ServerConfig,
    connections: ConnectionRegistry,
    open_connections: OpenConnections,
    dispatcher: Dispatcher,
    read_buffer: Vec<u8>,
}

impl Server {
    /// Validates `config`, binds the listener and starts the workers.
    ///
    /// `make_processor` is called once per worker with the worker index,
    /// or once with `0` when `workers == 0`.
    pub fn bind(
        config: ServerConfig,
        mut make_processor: impl FnMut(usize) -> ProcessRequestUseCase,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.address();
        let bind_err = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                ))
            })?;
        let mut listener = TcpListener::bind(socket_addr).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let poll = Poll::new().map_err(ServerError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Register)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER).map_err(ServerError::Waker)?);

        let dispatcher = if config.workers == 0 {
            Dispatcher::Inline(make_processor(0))
        } else {
            let processors = (0..config.workers).map(&mut make_processor).collect();
            let pool = WorkerPool::start(processors, config.queue_capacity, waker.clone())
                .map_err(ServerError::WorkerSpawn)?;
            Dispatcher::Pool(pool)
        };

        Ok(Self {
            poll,
            listener,
            local_addr,
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            read_buffer: vec![0; config.read_buffer_size],
            connections: ConnectionRegistry::new(),
            open_connections: OpenConnections::default(),
            dispatcher,
            config,
        })
    }

    /// The bound address. Useful when binding port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            requested: self.shutdown.clone(),
            waker: self.waker.clone(),
        }
    }

    pub fn open_connections(&self) -> OpenConnections {
        self.open_connections.clone()
    }

    /// Runs the event loop until a [`ShutdownHandle`] fires or polling
    /// fails.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(self.config.events_capacity);
        log::info!(
            "Listening on {} ({:?} framing, {} worker(s))",
            self.local_addr,
            self.config.framing,
            self.config.workers
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            let timeout = self.poll_timeout();
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("Poll failed: {e}");
                return Err(ServerError::Poll(e));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_connections(),
                    // Completions are drained below on every iteration.
                    WAKER => {}
                    token => self.handle_connection_event(token, event),
                }
            }

            self.drain_completions();
            self.expire_requests(Instant::now());
        }

        log::info!(
            "Shutting down with {} open connection(s)",
            self.connections.len()
        );
        Ok(())
    }

    /// Time until the earliest in-flight deadline, or `None` to block.
    fn poll_timeout(&self) -> Option<Duration> {
        self.connections
            .earliest_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    // -----------------------------------------------------------------------
    // Readiness handling
    // -----------------------------------------------------------------------

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let framer =
                        RequestFramer::new(self.config.framing, self.config.max_request_bytes);
                    match self
                        .connections
                        .insert(self.poll.registry(), stream, peer, framer)
                    {
                        Ok(token) => log::info!("Accepted {peer} as {token:?}"),
                        Err(e) => log::warn!("Failed to register {peer}: {e}"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("Accept failed: {e}");
                    break;
                }
            }
        }
        self.open_connections.set(self.connections.len());
    }

    /// Readable, then writable, then error / hang-up.
    fn handle_connection_event(&mut self, token: Token, event: &Event) {
        if event.is_readable() && !self.read_connection(token) {
            return;
        }
        if event.is_writable() && !self.write_connection(token) {
            return;
        }
        if event.is_error() || (event.is_read_closed() && event.is_write_closed()) {
            self.tear_down(token, "error or hang-up");
        }
    }

    /// Returns `false` if the connection was torn down.
    fn read_connection(&mut self, token: Token) -> bool {
        let Some(conn) = self.connections.get_mut(token) else {
            return false;
        };
        let inbound = match conn.read_available(&mut self.read_buffer) {
            Ok(ReadOutcome::Open(inbound)) => inbound,
            Ok(ReadOutcome::Closed) => {
                self.tear_down(token, "peer closed");
                return false;
            }
            Err(e) => {
                log::warn!("Read from {} failed: {e}", conn.peer());
                self.tear_down(token, "read error");
                return false;
            }
        };

        let deadline = Instant::now() + self.config.request_timeout();
        for item in inbound {
            dispatch(&mut self.dispatcher, conn, token, item, deadline);
        }
        self.release(token)
    }

    /// Returns `false` if the connection was torn down.
    fn write_connection(&mut self, token: Token) -> bool {
        let Some(conn) = self.connections.get_mut(token) else {
            return false;
        };
        let flushed = conn
            .flush()
            .and_then(|()| conn.update_interest(self.poll.registry(), token));
        if let Err(e) = flushed {
            log::warn!("Write to {} failed: {e}", conn.peer());
            self.tear_down(token, "write error");
            return false;
        }
        true
    }

    /// Queues every releasable response and adds write-interest if needed.
    /// Returns `false` if the connection was torn down.
    fn release(&mut self, token: Token) -> bool {
        let Some(conn) = self.connections.get_mut(token) else {
            return false;
        };
        conn.release();
        if let Err(e) = conn.update_interest(self.poll.registry(), token) {
            log::warn!("Failed to update interest for {}: {e}", conn.peer());
            self.tear_down(token, "reregister error");
            return false;
        }
        true
    }

    fn tear_down(&mut self, token: Token, reason: &str) {
        if let Some(conn) = self.connections.remove(self.poll.registry(), token) {
            log::info!(
                "Closed {} ({token:?}, {reason}, {} response(s) discarded)",
                conn.peer(),
                conn.sequencer().outstanding() as usize + conn.pending_outbound()
            );
        }
        self.open_connections.set(self.connections.len());
    }

    // -----------------------------------------------------------------------
    // Worker completions and deadlines
    // -----------------------------------------------------------------------

    fn drain_completions(&mut self) {
        let Dispatcher::Pool(pool) = &self.dispatcher else {
            return;
        };

        let mut touched = Vec::new();
        for completion in pool.try_completions() {
            let Some(conn) = self.connections.get_mut(completion.token) else {
                log::debug!(
                    "Dropping response for closed connection {:?}",
                    completion.token
                );
                continue;
            };
            if conn.sequencer_mut().complete(completion.sequence, completion.response) {
                touched.push(completion.token);
            } else {
                log::debug!(
                    "Dropping late response #{} for {}",
                    completion.sequence,
                    conn.peer()
                );
            }
        }

        touched.dedup();
        for token in touched {
            self.release(token);
        }
    }

    fn expire_requests(&mut self, now: Instant) {
        let due = self
            .connections
            .earliest_deadline()
            .is_some_and(|deadline| deadline <= now);
        if !due {
            return;
        }
        for (token, expired) in self.connections.expire(now) {
            log::warn!(
                "{expired} request(s) on {token:?} timed out after {}ms",
                self.config.request_timeout_ms
            );
            self.release(token);
        }
    }
}

/// Assigns `item` the connection's next sequence and either completes it
/// on the spot or hands it to the worker pool.
fn dispatch(
    dispatcher: &mut Dispatcher,
    conn: &mut Connection,
    token: Token,
    item: Inbound,
    deadline: Instant,
) {
    let request = match item {
        Inbound::Request(request) => request,
        Inbound::Oversized => {
            log::warn!("Request from {} exceeds size limit", conn.peer());
            let sequence = conn.sequencer_mut().submit(None);
            conn.sequencer_mut().complete(sequence, error_bytes());
            return;
        }
    };

    match dispatcher {
        Dispatcher::Inline(processor) => {
            let sequence = conn.sequencer_mut().submit(None);
            let response = execute_guarded(processor, &request);
            conn.sequencer_mut().complete(sequence, response);
        }
        Dispatcher::Pool(pool) => {
            let sequence = conn.sequencer_mut().submit(Some(deadline));
            let job = Job {
                token,
                sequence,
                request,
            };
            match pool.try_submit(job) {
                Ok(()) => {}
                Err(SubmitError::Full(_)) => {
                    log::warn!(
                        "Worker queue full ({} queued), rejecting request from {}",
                        pool.queue_depth(),
                        conn.peer()
                    );
                    conn.sequencer_mut().complete(sequence, error_bytes());
                }
                Err(SubmitError::Disconnected(_)) => {
                    log::error!("Worker pool is gone, rejecting request from {}", conn.peer());
                    conn.sequencer_mut().complete(sequence, error_bytes());
                }
            }
        }
    }
}
