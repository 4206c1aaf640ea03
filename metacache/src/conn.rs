//! The connection engine: a single task that owns the transport, drains the
//! request queue into the socket, and pairs framed responses with their
//! callers in first-in-first-out order.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, BytesMut};
use protocol_meta::{ParseError, Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::Error;

/// Stop coalescing queued requests into one write once the outbound buffer
/// holds this many bytes.
const WRITE_COALESCE_BYTES: usize = 64 * 1024;

/// Initial capacity of the inbound buffer.
const READ_BUFFER_CAPACITY: usize = 16 * 1024;

/// The command a request was built for. Carried through the pending FIFO so
/// completions can be attributed to a command when tracing, and reported in
/// [`CommandResult`](crate::CommandResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Get,
    Delete,
    Touch,
    Increment,
    Decrement,
}

pub(crate) type Completion = oneshot::Sender<Result<Response, Error>>;

/// A queued request together with its caller's completion handle.
pub(crate) struct Command {
    pub(crate) kind: CommandKind,
    pub(crate) request: Request,
    pub(crate) done: Completion,
}

/// One in-flight request awaiting its response.
struct Pending {
    kind: CommandKind,
    done: Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Running,
    Terminated,
}

/// The connection engine for one endpoint.
///
/// Created together with a [`Client`](crate::Client) by
/// [`Client::connect`](crate::Client::connect) or
/// [`Client::pair`](crate::Client::pair). [`run`](Connection::run) drives the
/// connection until every client handle is dropped, the transport fails, or
/// the task is cancelled; on termination every outstanding caller is failed
/// with [`Error::ConnectionShutdown`].
pub struct Connection<T> {
    transport: T,
    queue: mpsc::Receiver<Command>,
    pending: VecDeque<Pending>,
    rbuf: BytesMut,
    wbuf: Vec<u8>,
    state: State,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    pub(crate) fn new(transport: T, queue: mpsc::Receiver<Command>) -> Self {
        Self {
            transport,
            queue,
            pending: VecDeque::new(),
            rbuf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            wbuf: Vec::new(),
            state: State::Initial,
        }
    }

    /// Drive the connection until shutdown.
    ///
    /// Returns `Ok(())` when all client handles have been dropped and every
    /// in-flight request has been answered. May be called exactly once.
    pub async fn run(&mut self) -> Result<(), Error> {
        match self.state {
            State::Initial => self.state = State::Running,
            State::Running | State::Terminated => return Err(Error::AlreadyRunning),
        }

        let result = self.drive().await;
        self.state = State::Terminated;

        let cause = match &result {
            Ok(()) => "connection shut down".to_string(),
            Err(e) => e.to_string(),
        };
        self.fail_outstanding(&cause);

        match &result {
            Ok(()) => tracing::debug!("connection closed"),
            Err(e) => tracing::debug!(error = %e, "connection terminated"),
        }
        result
    }

    async fn drive(&mut self) -> Result<(), Error> {
        let mut inbound_open = true;
        loop {
            tokio::select! {
                command = self.queue.recv(), if inbound_open => {
                    match command {
                        Some(command) => self.submit(command).await?,
                        None => {
                            // All client handles dropped. Keep reading until
                            // the in-flight requests are answered.
                            inbound_open = false;
                            if self.pending.is_empty() {
                                return Ok(());
                            }
                        }
                    }
                }
                read = self.transport.read_buf(&mut self.rbuf) => {
                    if read? == 0 {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "server closed the connection",
                        )));
                    }
                    self.drain_frames()?;
                    if !inbound_open && self.pending.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Encode `command` - plus any further requests already sitting in the
    /// queue - into the outbound buffer and flush it. Pending entries are
    /// appended in write order, which is what keeps responses pairable by
    /// position alone.
    async fn submit(&mut self, command: Command) -> Result<(), Error> {
        self.wbuf.clear();

        command.request.encode(&mut self.wbuf);
        self.pending.push_back(Pending {
            kind: command.kind,
            done: command.done,
        });
        let mut requests = 1;

        while self.wbuf.len() < WRITE_COALESCE_BYTES {
            match self.queue.try_recv() {
                Ok(next) => {
                    next.request.encode(&mut self.wbuf);
                    self.pending.push_back(Pending {
                        kind: next.kind,
                        done: next.done,
                    });
                    requests += 1;
                }
                Err(_) => break,
            }
        }

        self.transport.write_all(&self.wbuf).await?;
        self.transport.flush().await?;
        tracing::trace!(requests, bytes = self.wbuf.len(), "requests flushed");
        Ok(())
    }

    /// Parse every complete frame out of the inbound buffer, completing the
    /// pending FIFO head for each.
    fn drain_frames(&mut self) -> Result<(), Error> {
        loop {
            match Response::parse(&self.rbuf) {
                Ok((response, consumed)) => {
                    self.rbuf.advance(consumed);
                    let entry = match self.pending.pop_front() {
                        Some(entry) => entry,
                        None => {
                            return Err(Error::Protocol(ParseError::Protocol(
                                "response with no request in flight",
                            )));
                        }
                    };
                    tracing::trace!(kind = ?entry.kind, code = %response.code, "response");
                    // The caller may have been cancelled; an undeliverable
                    // response is simply dropped.
                    let _ = entry.done.send(Ok(response));
                }
                Err(e) if e.is_incomplete() => return Ok(()),
                Err(e) => return Err(Error::Protocol(e)),
            }
        }
    }

    /// Fail every in-flight and still-queued request with the terminal cause,
    /// and reject future enqueues.
    fn fail_outstanding(&mut self, cause: &str) {
        let in_flight = self.pending.len();
        while let Some(entry) = self.pending.pop_front() {
            let _ = entry.done.send(Err(Error::ConnectionShutdown(cause.to_string())));
        }

        self.queue.close();
        let mut queued = 0;
        while let Ok(command) = self.queue.try_recv() {
            let _ = command.done.send(Err(Error::ConnectionShutdown(cause.to_string())));
            queued += 1;
        }

        if in_flight > 0 || queued > 0 {
            tracing::debug!(in_flight, queued, cause, "failed outstanding requests");
        }
    }
}
