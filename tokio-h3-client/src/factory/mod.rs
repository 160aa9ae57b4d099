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

//! Connection pooling and establishment.
//!
//! A [`StreamFactory`] hands out connections to [`StreamRequest`]s. It
//! reuses a pooled connection when one exists for the request's
//! [`DestinationIdentity`], or, with coalescing enabled, one to the same
//! destination whose identity may be shared. Otherwise it starts a
//! [`Job`](job::Job) that resolves the host and connects. Concurrent
//! requests for the same identity wait on the same job.

mod job;
mod request;

pub use self::request::StreamRequest;

use futures::task::noop_waker_ref;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::task::AbortOnDropHandle;

use self::job::Job;
use self::job::JobId;
use self::job::JobResult;
use self::job::JobRunner;
use self::job::WaiterId;
use crate::engine::EngineFactory;
use crate::error::ClientResult;
use crate::error::Error;
use crate::key::DestinationIdentity;
use crate::key::HostPortPair;
use crate::quic::connection::ClosedConnection;
use crate::quic::Connection;
use crate::quic::ConnectionHandle;
use crate::resolver::HostResolver;
use crate::resolver::SystemResolver;
use crate::settings::ClientSettings;
use crate::socket::SocketFactory;
use crate::socket::UdpSocketFactory;

/// Creates and pools HTTP/3 connections.
///
/// Cloning is cheap; clones share the pool. Dropping the last clone closes
/// every pooled connection and cancels every job.
#[derive(Clone)]
pub struct StreamFactory {
    inner: Arc<FactoryInner>,
}

impl StreamFactory {
    pub fn new(
        settings: ClientSettings, resolver: impl HostResolver,
        sockets: impl SocketFactory, engines: impl EngineFactory,
    ) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        let dialer = Dialer {
            settings,
            resolver: Arc::new(resolver),
            sockets: Arc::new(sockets),
            engines: Arc::new(engines),
            closed_tx,
        };

        Self {
            inner: Arc::new(FactoryInner {
                dialer: Arc::new(dialer),
                state: Mutex::new(FactoryState {
                    jobs: HashMap::new(),
                    active: HashMap::new(),
                    closed_rx,
                    next_job_id: 0,
                    next_waiter_id: 0,
                }),
            }),
        }
    }

    /// A factory using the system resolver and plain UDP sockets.
    pub fn with_engines(
        settings: ClientSettings, engines: impl EngineFactory,
    ) -> Self {
        Self::new(settings, SystemResolver, UdpSocketFactory, engines)
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.dialer.settings
    }

    /// Closes every pooled connection with `err` and fails every pending
    /// request with it.
    pub fn close_all_connections(&self, err: Error) {
        self.inner.close_all(err);
    }

    /// Returns the pooled connection for `key`, if it is still open.
    pub fn find_connection(
        &self, key: &DestinationIdentity,
    ) -> Option<ConnectionHandle> {
        let mut state = self.inner.state.lock();
        state.reap_closed();

        state.active.get(key).map(Connection::handle)
    }

    pub fn active_connection_count(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.reap_closed();

        state.active.len()
    }

    /// The number of connection attempts in flight.
    pub fn job_count(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<FactoryInner> {
        Arc::downgrade(&self.inner)
    }
}

impl std::fmt::Debug for StreamFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();

        f.debug_struct("StreamFactory")
            .field("settings", &self.inner.dialer.settings)
            .field("jobs", &state.jobs.len())
            .field("active", &state.active.len())
            .finish()
    }
}

/// The collaborators a job needs to establish a connection.
///
/// Jobs hold this instead of the factory so that a slow lookup or connect
/// doesn't keep a dropped factory alive.
pub(crate) struct Dialer {
    pub(crate) settings: ClientSettings,
    resolver: Arc<dyn HostResolver>,
    sockets: Arc<dyn SocketFactory>,
    engines: Arc<dyn EngineFactory>,
    closed_tx: mpsc::UnboundedSender<ClosedConnection>,
}

impl Dialer {
    pub(crate) async fn resolve(
        &self, destination: &HostPortPair,
    ) -> io::Result<Vec<SocketAddr>> {
        self.resolver.resolve(destination).await
    }

    /// Opens a socket to `peer` and wraps it in a new, unstarted
    /// [`Connection`].
    pub(crate) async fn connect(
        &self, key: DestinationIdentity, destination: HostPortPair,
        peer: SocketAddr,
    ) -> ClientResult<Connection> {
        let socket = self
            .sockets
            .connect(peer)
            .await
            .map_err(|e| Error::Connect(Arc::new(e)))?;

        let local = socket
            .local_addr()
            .unwrap_or_else(|| (Ipv4Addr::UNSPECIFIED, 0).into());

        let server_name = key.host_port.host();
        let engines = self
            .engines
            .new_engines(server_name, local, peer, &self.settings.transport)
            .map_err(Error::Quic)?;

        let mut conn =
            Connection::new(key, destination, socket, engines, &self.settings);
        conn.notify_closed(self.closed_tx.clone());

        Ok(conn)
    }
}

/// How [`FactoryInner::create`] satisfied a request.
pub(crate) enum Attached {
    Connection(ConnectionHandle),
    Job {
        job: JobId,
        waiter: WaiterId,
        rx: oneshot::Receiver<JobResult>,
    },
}

struct FactoryState {
    jobs: HashMap<DestinationIdentity, Job>,
    active: HashMap<DestinationIdentity, Connection>,
    closed_rx: mpsc::UnboundedReceiver<ClosedConnection>,
    next_job_id: u64,
    next_waiter_id: u64,
}

impl FactoryState {
    /// Drops pooled connections whose worker has stopped.
    fn reap_closed(&mut self) {
        while let Ok(ClosedConnection { key, id }) = self.closed_rx.try_recv() {
            if let Entry::Occupied(entry) = self.active.entry(key) {
                if entry.get().id() == id {
                    log::debug!("removing closed connection {id} from the pool");
                    entry.remove();
                }
            }
        }

        // The worker reports only once it has unwound, so a connection can
        // be closed before its report arrives.
        self.active.retain(|_, conn| !conn.is_closed());
    }

    fn next_waiter(&mut self) -> WaiterId {
        self.next_waiter_id += 1;
        WaiterId(self.next_waiter_id)
    }
}

pub(crate) struct FactoryInner {
    dialer: Arc<Dialer>,
    state: Mutex<FactoryState>,
}

impl FactoryInner {
    /// Finds or starts a connection for `key`, routed to `destination`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn create(
        self: &Arc<Self>, key: DestinationIdentity, destination: HostPortPair,
    ) -> Attached {
        let mut state = self.state.lock();
        state.reap_closed();

        if let Some(conn) = state.active.get(&key) {
            return Attached::Connection(conn.handle());
        }

        let waiter = state.next_waiter();

        if let Some(job) = state.jobs.get_mut(&key) {
            log::debug!("request for {key} joined job {}", job.id);
            let rx = job.add_waiter(waiter);

            return Attached::Job {
                job: job.id,
                waiter,
                rx,
            };
        }

        if self.dialer.settings.enable_connection_coalescing {
            let shared = state.active.values().find(|conn| {
                conn.destination() == &destination &&
                    conn.key().can_share_with(&key)
            });

            if let Some(conn) = shared {
                log::debug!(
                    "request for {key} coalesced onto connection {}",
                    conn.id()
                );
                return Attached::Connection(conn.handle());
            }
        }

        state.next_job_id += 1;
        let id = JobId(state.next_job_id);

        let mut job = Job::new(id);
        let rx = job.add_waiter(waiter);
        state.jobs.insert(key.clone(), job);

        // The job may finish without suspending, and finishing takes the lock.
        drop(state);

        self.run_job(id, key, destination);

        Attached::Job {
            job: id,
            waiter,
            rx,
        }
    }

    /// Runs the job until it first suspends, then hands it to a task.
    fn run_job(
        self: &Arc<Self>, id: JobId, key: DestinationIdentity,
        destination: HostPortPair,
    ) {
        let runner = JobRunner {
            id,
            key: key.clone(),
            destination,
            dialer: Arc::clone(&self.dialer),
            factory: Arc::downgrade(self),
        };

        let mut fut = Box::pin(runner.run());
        let mut cx = Context::from_waker(noop_waker_ref());

        if let Poll::Ready(result) = fut.as_mut().poll(&mut cx) {
            self.on_job_complete(&key, id, result);
            return;
        }

        let factory = Arc::downgrade(self);
        let task_key = key.clone();

        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            let result = fut.await;

            if let Some(factory) = factory.upgrade() {
                factory.on_job_complete(&task_key, id, result);
            }
        }));

        let mut state = self.state.lock();

        match state.jobs.get_mut(&key) {
            Some(job) if job.id == id => job.set_task(task),
            // Every waiter cancelled while we were polling. Dropping the
            // handle aborts the task.
            _ => drop(task),
        }
    }

    fn on_job_complete(
        &self, key: &DestinationIdentity, id: JobId, result: JobResult,
    ) {
        let job = {
            let mut state = self.state.lock();

            match state.jobs.entry(key.clone()) {
                Entry::Occupied(entry) if entry.get().id == id => entry.remove(),
                _ => return,
            }
        };

        job.complete(&result);
    }

    /// Adds a started connection to the pool.
    pub(crate) fn activate(&self, conn: Connection) -> ConnectionHandle {
        let handle = conn.handle();
        let mut state = self.state.lock();

        log::debug!("pooling connection {} for {}", conn.id(), conn.key());

        if let Some(old) = state.active.insert(conn.key().clone(), conn) {
            log::debug!("replaced pooled connection {}", old.id());
        }

        handle
    }

    /// Stops `waiter` from waiting on job `id`. A job left without waiters
    /// is dropped, which cancels it.
    pub(crate) fn cancel_request(
        &self, key: &DestinationIdentity, id: JobId, waiter: WaiterId,
    ) {
        let mut state = self.state.lock();

        let Entry::Occupied(mut entry) = state.jobs.entry(key.clone()) else {
            return;
        };

        if entry.get().id != id || !entry.get_mut().remove_waiter(waiter) {
            return;
        }

        if !entry.get().has_waiters() {
            log::debug!("job {id} for {key} cancelled");
            entry.remove();
        }
    }

    fn close_all(&self, err: Error) {
        let (jobs, active) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.jobs),
                std::mem::take(&mut state.active),
            )
        };

        if !jobs.is_empty() || !active.is_empty() {
            log::info!(
                "closing {} connections and {} jobs: {err}",
                active.len(),
                jobs.len()
            );
        }

        let result: JobResult = Err(err.clone());
        for job in jobs.into_values() {
            job.complete(&result);
        }

        for conn in active.into_values() {
            conn.close(err.clone());
        }
    }
}

impl Drop for FactoryInner {
    fn drop(&mut self) {
        self.close_all(Error::Aborted);
    }
}
