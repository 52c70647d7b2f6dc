//! Connection returned by [`DetourDialer`](super::DetourDialer).
//!
//! A direct connection starts out probing: request bytes are forwarded and
//! kept for replay while the first response bytes are awaited under the
//! deadline. A good first read settles the connection on the direct path. A
//! failed one swaps the direct connection for a detour connection, replays
//! the request, and carries on.

use std::future::Future;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

use crate::error::DetourError;
use crate::outbound::{AsyncTcpConn, BoxedConn};
use crate::types::{DialOutcome, Route};

use super::{Attempt, FIRST_READ_BUFFER_SIZE};

/// Methods that change server state and must not be sent twice.
const NON_IDEMPOTENT_PREFIXES: [&[u8]; 2] = [b"POST ", b"PATCH "];

type Fallback = Pin<Box<dyn Future<Output = io::Result<Established>> + Send>>;

/// Request bytes written to the direct connection before the first response.
#[derive(Debug, Default)]
struct ReplayBuffer {
    data: Vec<u8>,
    limit: usize,
    overflowed: bool,
    shutdown_requested: bool,
}

impl ReplayBuffer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    fn record(&mut self, bytes: &[u8]) {
        if self.overflowed {
            return;
        }
        if self.data.len() + bytes.len() > self.limit {
            self.overflowed = true;
            self.data = Vec::new();
            return;
        }
        self.data.extend_from_slice(bytes);
    }

    /// Whether the request may be sent again on another path.
    fn is_replayable(&self) -> bool {
        !self.overflowed
            && !NON_IDEMPOTENT_PREFIXES
                .iter()
                .any(|prefix| self.data.starts_with(prefix))
    }
}

struct Probe {
    conn: BoxedConn,
    timer: Pin<Box<Sleep>>,
    replay: ReplayBuffer,
    buf: Vec<u8>,
}

impl Probe {
    /// Wait for the first response bytes or the deadline.
    fn poll_first_read(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Vec<u8>, (DialOutcome, io::Error)>> {
        let mut read_buf = ReadBuf::new(&mut self.buf);
        match Pin::new(&mut self.conn).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) if read_buf.filled().is_empty() => Poll::Ready(Err((
                DialOutcome::ReadFailed,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before any response",
                ),
            ))),
            Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().to_vec())),
            Poll::Ready(Err(e)) => Poll::Ready(Err((DialOutcome::ReadFailed, e))),
            Poll::Pending => {
                ready!(self.timer.as_mut().poll(cx));
                Poll::Ready(Err((
                    DialOutcome::ReadTimedOut,
                    io::Error::new(io::ErrorKind::TimedOut, "no response before deadline"),
                )))
            }
        }
    }
}

struct Established {
    conn: BoxedConn,
    route: Route,
    /// First response bytes consumed while probing, served before `conn`
    prefix: Vec<u8>,
    pos: usize,
}

impl Established {
    fn new(conn: BoxedConn, route: Route, prefix: Vec<u8>) -> Self {
        Self {
            conn,
            route,
            prefix,
            pos: 0,
        }
    }

    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.pos < self.prefix.len() {
            let n = buf.remaining().min(self.prefix.len() - self.pos);
            buf.put_slice(&self.prefix[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.prefix.len() {
                self.prefix = Vec::new();
                self.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.conn).poll_read(cx, buf)
    }
}

enum State {
    Probing(Probe),
    Resolving(Fallback),
    Established(Established),
    Closed,
}

/// Connection that may move from the direct path to the detour path while
/// its request is still unanswered.
///
/// Dropping it cancels any fallback in flight.
pub struct DetourConn {
    attempt: Arc<Attempt>,
    state: State,
}

impl DetourConn {
    pub(super) fn established(attempt: Arc<Attempt>, conn: BoxedConn, route: Route) -> Self {
        Self {
            attempt,
            state: State::Established(Established::new(conn, route, Vec::new())),
        }
    }

    pub(super) fn probing(attempt: Arc<Attempt>, conn: BoxedConn, deadline: Instant) -> Self {
        let limit = attempt.shared.options.max_replay_buffer;
        Self {
            attempt,
            state: State::Probing(Probe {
                conn,
                timer: Box::pin(tokio::time::sleep_until(deadline)),
                replay: ReplayBuffer::new(limit),
                buf: vec![0; FIRST_READ_BUFFER_SIZE],
            }),
        }
    }

    /// Host this connection was dialed for.
    pub fn host(&self) -> &str {
        &self.attempt.host
    }

    /// Path the connection settled on, `None` while still undecided.
    pub fn route(&self) -> Option<Route> {
        match &self.state {
            State::Established(est) => Some(est.route),
            _ => None,
        }
    }

    fn current_conn(&self) -> io::Result<&BoxedConn> {
        match &self.state {
            State::Probing(probe) => Ok(&probe.conn),
            State::Established(est) => Ok(&est.conn),
            State::Resolving(_) | State::Closed => Err(not_connected()),
        }
    }

    /// Settle the probe on the direct path or start falling back.
    fn finish_probe(&mut self, first_read: Result<Vec<u8>, (DialOutcome, io::Error)>) {
        let (outcome, err) = match first_read {
            Ok(bytes) if self.attempt.shared.detector.classify_response(&bytes) => {
                info!(host = %self.attempt.host, "Content hijacked on direct path");
                (
                    DialOutcome::ContentHijacked,
                    io::Error::new(io::ErrorKind::Other, "forged response"),
                )
            }
            Ok(bytes) => {
                if let State::Probing(probe) = mem::replace(&mut self.state, State::Closed) {
                    self.state = State::Established(Established::new(probe.conn, Route::Direct, bytes));
                }
                return;
            }
            Err(failure) => failure,
        };
        self.start_fallback(outcome, err);
    }

    /// Drop the direct connection and switch to the detour path.
    fn start_fallback(&mut self, outcome: DialOutcome, err: io::Error) {
        if let State::Probing(probe) = mem::replace(&mut self.state, State::Closed) {
            debug!(host = %self.attempt.host, %outcome, error = %err, "Direct connection failed");
            self.state = State::Resolving(Box::pin(fall_back(
                self.attempt.clone(),
                outcome,
                err,
                probe.replay,
            )));
        }
    }

    /// Drive a pending fallback to completion.
    fn poll_resolve(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let State::Resolving(fut) = &mut self.state {
            let result = ready!(fut.as_mut().poll(cx));
            match result {
                Ok(est) => self.state = State::Established(est),
                Err(e) => {
                    self.state = State::Closed;
                    return Poll::Ready(Err(e));
                }
            }
        }
        Poll::Ready(Ok(()))
    }

    fn on_detour_write_error(&self, route: Route, err: &io::Error) {
        if route == Route::Detour {
            self.attempt.on_stream_error(route, err);
        }
    }
}

/// Learn the host and continue the request over the detour path.
async fn fall_back(
    attempt: Arc<Attempt>,
    outcome: DialOutcome,
    cause: io::Error,
    replay: ReplayBuffer,
) -> io::Result<Established> {
    attempt.learn(outcome);

    if !replay.is_replayable() {
        warn!(host = %attempt.host, %outcome, "Direct request failed and cannot be replayed");
        return Err(DetourError::NotRetryable {
            host: attempt.host.clone(),
            outcome,
            source: cause,
        }
        .into());
    }

    let mut conn = attempt.dial_detour().await?;
    if !replay.data.is_empty() {
        if let Err(e) = conn.write_all(&replay.data).await {
            attempt.on_stream_error(Route::Detour, &e);
            return Err(e);
        }
    }
    if replay.shutdown_requested {
        if let Err(e) = conn.shutdown().await {
            attempt.on_stream_error(Route::Detour, &e);
            return Err(e);
        }
    }

    debug!(host = %attempt.host, replayed = replay.data.len(), "Switched to detour");
    Ok(Established::new(conn, Route::Detour, Vec::new()))
}

/// The direct peer stopped accepting the request before the deadline.
fn write_timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "request not accepted before deadline")
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

impl AsyncRead for DetourConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            ready!(this.poll_resolve(cx))?;
            match &mut this.state {
                State::Probing(probe) => {
                    let first_read = ready!(probe.poll_first_read(cx));
                    this.finish_probe(first_read);
                }
                State::Established(est) => {
                    let result = ready!(est.poll_read(cx, buf));
                    if let Err(e) = &result {
                        this.attempt.on_stream_error(est.route, e);
                    }
                    return Poll::Ready(result);
                }
                State::Resolving(_) | State::Closed => return Poll::Ready(Err(not_connected())),
            }
        }
    }
}

impl AsyncWrite for DetourConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_resolve(cx))?;
            match &mut this.state {
                State::Probing(probe) => match Pin::new(&mut probe.conn).poll_write(cx, buf) {
                    Poll::Ready(Ok(n)) => {
                        probe.replay.record(&buf[..n]);
                        return Poll::Ready(Ok(n));
                    }
                    Poll::Ready(Err(e)) => this.start_fallback(DialOutcome::WriteFailed, e),
                    Poll::Pending => {
                        ready!(probe.timer.as_mut().poll(cx));
                        this.start_fallback(DialOutcome::WriteFailed, write_timed_out());
                    }
                },
                State::Established(est) => {
                    let result = ready!(Pin::new(&mut est.conn).poll_write(cx, buf));
                    if let Err(e) = &result {
                        let route = est.route;
                        this.on_detour_write_error(route, e);
                    }
                    return Poll::Ready(result);
                }
                State::Resolving(_) | State::Closed => return Poll::Ready(Err(not_connected())),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_resolve(cx))?;
            match &mut this.state {
                State::Probing(probe) => match Pin::new(&mut probe.conn).poll_flush(cx) {
                    Poll::Ready(Ok(())) => return Poll::Ready(Ok(())),
                    Poll::Ready(Err(e)) => this.start_fallback(DialOutcome::WriteFailed, e),
                    Poll::Pending => {
                        ready!(probe.timer.as_mut().poll(cx));
                        this.start_fallback(DialOutcome::WriteFailed, write_timed_out());
                    }
                },
                State::Established(est) => {
                    let result = ready!(Pin::new(&mut est.conn).poll_flush(cx));
                    if let Err(e) = &result {
                        let route = est.route;
                        this.on_detour_write_error(route, e);
                    }
                    return Poll::Ready(result);
                }
                State::Resolving(_) | State::Closed => return Poll::Ready(Err(not_connected())),
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_resolve(cx))?;
            match &mut this.state {
                State::Probing(probe) => {
                    match ready!(Pin::new(&mut probe.conn).poll_shutdown(cx)) {
                        Ok(()) => {
                            probe.replay.shutdown_requested = true;
                            return Poll::Ready(Ok(()));
                        }
                        Err(e) => this.start_fallback(DialOutcome::WriteFailed, e),
                    }
                }
                State::Established(est) => return Pin::new(&mut est.conn).poll_shutdown(cx),
                State::Resolving(_) | State::Closed => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncTcpConn for DetourConn {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.current_conn()?.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.current_conn()?.peer_addr()
    }
}
