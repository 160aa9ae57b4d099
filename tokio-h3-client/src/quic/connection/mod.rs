// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

mod alarm;
mod driver;
mod map;

pub use self::map::StreamEvent;
pub use self::map::StreamHandler;

use datagram_socket::AsSocketStats;
use datagram_socket::BoxedSocket;
use datagram_socket::SocketStats;
use futures::future::poll_fn;
use futures::task::noop_waker_ref;
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::task::Context;
use tokio::sync::mpsc;
use tokio_util::task::AbortOnDropHandle;

use self::driver::ConnectionDriver;
use crate::engine::Engines;
use crate::engine::Header;
use crate::error::ClientResult;
use crate::error::Error;
use crate::key::DestinationIdentity;
use crate::key::HostPortPair;
use crate::settings::ClientSettings;
use crate::socket::SocketAdapter;

/// Process-wide unique identifier of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sent to the pool when a connection's worker stops.
#[derive(Debug)]
pub(crate) struct ClosedConnection {
    pub(crate) key: DestinationIdentity,
    pub(crate) id: ConnectionId,
}

/// Fixed properties of a connection.
#[derive(Debug)]
struct ConnectionInfo {
    id: ConnectionId,
    key: DestinationIdentity,
    destination: HostPortPair,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    application_protocol: Vec<u8>,
}

struct Shared {
    info: Arc<ConnectionInfo>,
    driver: Mutex<ConnectionDriver>,
    waker: AtomicWaker,
}

/// A QUIC connection carrying HTTP requests to one destination.
///
/// A [`Connection`] owns its socket and protocol engines. After
/// [`start`](Self::start), a spawned worker task pumps data between them
/// whenever the socket, an alarm, or a stream needs attention. Streams
/// reach the connection through [`ConnectionHandle`]s, which don't keep it
/// alive: dropping the [`Connection`] stops the worker and fails every
/// stream still registered.
pub struct Connection {
    shared: Arc<Shared>,
    worker: Option<AbortOnDropHandle<()>>,
    closed_tx: Option<mpsc::UnboundedSender<ClosedConnection>>,
}

impl Connection {
    /// Wraps a connected socket and a pair of engines. No I/O happens until
    /// [`start`](Self::start).
    pub fn new(
        key: DestinationIdentity, destination: HostPortPair, socket: BoxedSocket,
        engines: Engines, settings: &ClientSettings,
    ) -> Self {
        let id = ConnectionId::next();
        let socket = SocketAdapter::new(
            socket,
            settings.max_recv_udp_payload_size,
            settings.recv_batch_size,
        );

        let info = Arc::new(ConnectionInfo {
            id,
            key,
            destination,
            local_addr: socket.local_addr(),
            peer_addr: socket.peer_addr(),
            application_protocol: engines.quic.application_protocol().to_vec(),
        });

        Self {
            shared: Arc::new(Shared {
                info,
                driver: Mutex::new(ConnectionDriver::new(id, socket, engines)),
                waker: AtomicWaker::new(),
            }),
            worker: None,
            closed_tx: None,
        }
    }

    /// Reports to `tx` once the worker stops.
    pub(crate) fn notify_closed(
        &mut self, tx: mpsc::UnboundedSender<ClosedConnection>,
    ) {
        self.closed_tx = Some(tx);
    }

    /// Arms the alarms, runs both pumps once and spawns the worker task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns the error that stopped the first pump. The connection is
    /// closed in that case.
    pub fn start(&mut self) -> ClientResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        {
            // The worker polls again with its own waker before it parks, so
            // nothing registered here needs to wake anyone.
            let mut cx = Context::from_waker(noop_waker_ref());
            let mut driver = self.shared.driver.lock();

            if let Err(e) = driver.start(&mut cx) {
                driver.terminate(e.clone());
                return Err(e);
            }
        }

        let info = &self.shared.info;
        log::info!(
            "connection {} to {} ({:?}) started",
            info.id,
            info.destination,
            info.peer_addr
        );

        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.shared),
            self.closed_tx.take(),
        ));
        self.worker = Some(AbortOnDropHandle::new(worker));

        Ok(())
    }

    /// Returns a non-owning handle for streams to use.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            info: Arc::clone(&self.shared.info),
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.info.id
    }

    pub fn key(&self) -> &DestinationIdentity {
        &self.shared.info.key
    }

    pub fn destination(&self) -> &HostPortPair {
        &self.shared.info.destination
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.info.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.info.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.shared.driver.lock().is_closed()
    }

    pub fn close_reason(&self) -> Option<Error> {
        self.shared.driver.lock().close_reason().cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.shared.driver.lock().stream_count()
    }

    pub fn stats(&self) -> SocketStats {
        self.shared.driver.lock().socket().as_socket_stats()
    }

    /// Closes the connection, failing every registered stream with `err`.
    pub fn close(&self, err: Error) {
        self.shared.driver.lock().terminate(err);
        self.shared.waker.wake();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close(Error::ConnectionClosed);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.shared.info)
            .field("started", &self.worker.is_some())
            .finish()
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    closed_tx: Option<mpsc::UnboundedSender<ClosedConnection>>,
) {
    poll_fn(|cx| {
        // Register before locking: a stream that queued work and woke us
        // after we registered is seen once we hold the lock.
        shared.waker.register(cx.waker());
        shared.driver.lock().poll_drive(cx)
    })
    .await;

    log::debug!("connection {} worker stopped", shared.info.id);

    if let Some(tx) = closed_tx {
        let _ = tx.send(ClosedConnection {
            key: shared.info.key.clone(),
            id: shared.info.id,
        });
    }
}

/// A non-owning reference to a [`Connection`].
///
/// Every operation that needs the connection fails with
/// [`Error::ConnectionClosed`] once it has been dropped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    info: Arc<ConnectionInfo>,
    shared: Weak<Shared>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn key(&self) -> &DestinationIdentity {
        &self.info.key
    }

    /// The host and port the connection was established for.
    pub fn destination(&self) -> &HostPortPair {
        &self.info.destination
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.info.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.info.peer_addr
    }

    pub fn application_protocol(&self) -> &[u8] {
        &self.info.application_protocol
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(true, |shared| shared.driver.lock().is_closed())
    }

    /// Why the connection closed, if it did and is still around.
    pub fn close_reason(&self) -> Option<Error> {
        let shared = self.shared.upgrade()?;
        let driver = shared.driver.lock();
        driver.close_reason().cloned()
    }

    /// The number of streams with a registered handler.
    pub fn stream_count(&self) -> usize {
        self.shared
            .upgrade()
            .map_or(0, |shared| shared.driver.lock().stream_count())
    }

    pub fn stats(&self) -> Option<SocketStats> {
        let shared = self.shared.upgrade()?;
        let driver = shared.driver.lock();
        Some(driver.socket().as_socket_stats())
    }

    /// Allocates a new stream and registers `handler` for its events.
    ///
    /// # Errors
    /// [`Error::StreamLimit`] if the peer doesn't allow another stream, and
    /// [`Error::ConnectionClosed`] if the connection is gone.
    pub fn request(&self, handler: StreamHandler) -> ClientResult<RequestHandle> {
        let id = self.with_driver(|driver| driver.request(handler))?;

        Ok(RequestHandle {
            id,
            conn: self.clone(),
        })
    }

    /// Stops dispatching events for `request`. Removing a stream twice, or
    /// after the connection closed, does nothing.
    pub fn remove(&self, request: &RequestHandle) {
        if let Some(shared) = self.shared.upgrade() {
            shared.driver.lock().remove(request.id);
        }
    }

    /// Schedules the send pump to run.
    pub fn wake(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.waker.wake();
        }
    }

    fn with_driver<T>(
        &self, f: impl FnOnce(&mut ConnectionDriver) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let shared = self.shared.upgrade().ok_or(Error::ConnectionClosed)?;
        let mut driver = shared.driver.lock();
        f(&mut driver)
    }
}

/// One request stream on a connection.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: u64,
    conn: ConnectionHandle,
}

impl RequestHandle {
    /// The stream id assigned by the HTTP engine.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    /// Appends a field to the request headers.
    pub fn header(&self, header: Header) -> ClientResult<()> {
        self.conn.with_driver(|driver| driver.header(self.id, header))
    }

    /// Commits the request headers.
    pub fn start(&self) -> ClientResult<()> {
        self.conn.with_driver(|driver| driver.start_request(self.id))
    }

    /// Ends the request body.
    pub fn fin(&self) -> ClientResult<()> {
        self.conn.with_driver(|driver| driver.fin(self.id))
    }
}
