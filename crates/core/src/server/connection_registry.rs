use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use super::framing::{Inbound, RequestFramer};
use super::response_sequencer::ResponseSequencer;

/// Tokens below this are reserved for the listener and the waker.
pub const FIRST_CONNECTION_TOKEN: usize = 2;

/// Result of draining a readable connection.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Still open; carries the requests framed from what was read.
    Open(Vec<Inbound>),
    /// The peer closed its side (zero-byte read).
    Closed,
}

/// State of one accepted client.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    framer: RequestFramer,
    sequencer: ResponseSequencer,
    outbound: VecDeque<Vec<u8>>,
    /// Bytes of the front outbound message already written.
    write_offset: usize,
    write_interest: bool,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, framer: RequestFramer) -> Self {
        Self {
            stream,
            peer,
            framer,
            sequencer: ResponseSequencer::new(),
            outbound: VecDeque::new(),
            write_offset: 0,
            write_interest: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn sequencer_mut(&mut self) -> &mut ResponseSequencer {
        &mut self.sequencer
    }

    pub fn sequencer(&self) -> &ResponseSequencer {
        &self.sequencer
    }

    /// Reads until the socket would block, framing as it goes.
    ///
    /// Each successful read is pushed to the framer separately so that
    /// read-mode framing sees one request per read.
    pub fn read_available(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut inbound = Vec::new();
        loop {
            match self.stream.read(buf) {
                Ok(0) => {
                    if !inbound.is_empty() {
                        log::debug!(
                            "{} closed with {} unanswered request(s) in the same read",
                            self.peer,
                            inbound.len()
                        );
                    }
                    return Ok(ReadOutcome::Closed);
                }
                Ok(n) => inbound.extend(self.framer.push(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ReadOutcome::Open(inbound))
    }

    /// Moves every releasable response onto the outbound queue, adding
    /// the framing terminator. Returns how many were queued.
    pub fn release(&mut self) -> usize {
        let ready = self.sequencer.drain_ready();
        let count = ready.len();
        for mut response in ready {
            response.extend_from_slice(self.framer.terminator());
            self.outbound.push_back(response);
        }
        count
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Writes queued messages until the queue is empty or the socket
    /// would block. Partial writes resume from where they stopped.
    pub fn flush(&mut self) -> io::Result<()> {
        while let Some(front) = self.outbound.front() {
            match self.stream.write(&front[self.write_offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset == front.len() {
                        self.outbound.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Holds write-interest exactly while the outbound queue is non-empty.
    pub fn update_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let wants_write = !self.outbound.is_empty();
        if wants_write == self.write_interest {
            return Ok(());
        }
        let interest = if wants_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        registry.reregister(&mut self.stream, token, interest)?;
        self.write_interest = wants_write;
        Ok(())
    }

    pub fn has_write_interest(&self) -> bool {
        self.write_interest
    }
}

/// Every open connection, keyed by its poll token.
///
/// Tokens are never reused, so a late worker completion addressed to a
/// closed connection cannot reach a newer one.
pub struct ConnectionRegistry {
    connections: HashMap<Token, Connection>,
    next_token: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
        }
    }

    /// Registers `stream` for read-interest and starts tracking it.
    pub fn insert(
        &mut self,
        registry: &Registry,
        mut stream: TcpStream,
        peer: SocketAddr,
        framer: RequestFramer,
    ) -> io::Result<Token> {
        let token = Token(self.next_token);
        registry.register(&mut stream, token, Interest::READABLE)?;
        self.next_token += 1;
        self.connections
            .insert(token, Connection::new(stream, peer, framer));
        Ok(token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.connections.get_mut(&token)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.connections.contains_key(&token)
    }

    /// Deregisters and drops the connection, closing its socket and
    /// discarding everything queued for it.
    pub fn remove(&mut self, registry: &Registry, token: Token) -> Option<Connection> {
        let mut connection = self.connections.remove(&token)?;
        if let Err(e) = registry.deregister(&mut connection.stream) {
            log::debug!("Deregister of {token:?} failed: {e}");
        }
        Some(connection)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .filter_map(|c| c.sequencer.earliest_deadline())
            .min()
    }

    /// Expires overdue requests on every connection. Returns the tokens
    /// that now have an `ERROR` ready to release, with the expired count.
    pub fn expire(&mut self, now: Instant) -> Vec<(Token, usize)> {
        self.connections
            .iter_mut()
            .filter_map(|(token, c)| {
                let expired = c.sequencer.expire(now).len();
                (expired > 0).then_some((*token, expired))
            })
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
