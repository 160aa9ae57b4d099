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

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::oneshot;
use tokio_util::task::AbortOnDropHandle;

use super::Dialer;
use super::FactoryInner;
use crate::error::ClientResult;
use crate::error::Error;
use crate::key::DestinationIdentity;
use crate::key::HostPortPair;
use crate::quic::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(pub(crate) u64);

pub(crate) type JobResult = ClientResult<ConnectionHandle>;

/// An in-flight attempt to establish a connection for one
/// [`DestinationIdentity`], and the requests waiting for it.
///
/// The job's work runs in [`JobRunner::run`]. The [`Job`] itself only
/// tracks who is waiting, and keeps the spawned runner alive: dropping the
/// job cancels resolution and connection setup.
pub(crate) struct Job {
    pub(crate) id: JobId,
    waiters: HashMap<WaiterId, oneshot::Sender<JobResult>>,
    task: Option<AbortOnDropHandle<()>>,
}

impl Job {
    pub(crate) fn new(id: JobId) -> Self {
        Self {
            id,
            waiters: HashMap::new(),
            task: None,
        }
    }

    pub(crate) fn add_waiter(
        &mut self, waiter: WaiterId,
    ) -> oneshot::Receiver<JobResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(waiter, tx);
        rx
    }

    /// Returns whether `waiter` was still waiting.
    pub(crate) fn remove_waiter(&mut self, waiter: WaiterId) -> bool {
        self.waiters.remove(&waiter).is_some()
    }

    pub(crate) fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    pub(crate) fn set_task(&mut self, task: AbortOnDropHandle<()>) {
        self.task = Some(task);
    }

    /// Hands `result` to every waiter.
    pub(crate) fn complete(self, result: &JobResult) {
        for (_, tx) in self.waiters {
            // The receiver is gone if the request was dropped mid-flight.
            let _ = tx.send(result.clone());
        }
    }
}

enum JobState {
    ResolveHost,
    ResolveHostComplete(io::Result<Vec<SocketAddr>>),
}

/// Resolves the destination, then creates, starts, and activates a
/// connection.
pub(crate) struct JobRunner {
    pub(crate) id: JobId,
    pub(crate) key: DestinationIdentity,
    pub(crate) destination: HostPortPair,
    pub(crate) dialer: Arc<Dialer>,
    pub(crate) factory: Weak<FactoryInner>,
}

impl JobRunner {
    pub(crate) async fn run(self) -> JobResult {
        log::debug!("job {} for {}: started", self.id, self.key);

        let mut state = JobState::ResolveHost;

        let result = loop {
            state = match state {
                JobState::ResolveHost => JobState::ResolveHostComplete(
                    self.dialer.resolve(&self.destination).await,
                ),
                JobState::ResolveHostComplete(resolved) =>
                    break self.do_resolve_host_complete(resolved).await,
            };
        };

        match &result {
            Ok(conn) => log::debug!(
                "job {} for {}: connection {} ready",
                self.id,
                self.key,
                conn.id()
            ),
            Err(e) => log::warn!("job {} for {}: {e}", self.id, self.key),
        }

        result
    }

    async fn do_resolve_host_complete(
        &self, resolved: io::Result<Vec<SocketAddr>>,
    ) -> JobResult {
        let addrs = resolved.map_err(|e| Error::Resolve(Arc::new(e)))?;

        let peer = select_address(&addrs, self.dialer.settings.allow_ipv6)
            .ok_or_else(|| Error::NoUsableAddress(self.destination.to_string()))?;

        let mut conn = self
            .dialer
            .connect(self.key.clone(), self.destination.clone(), peer)
            .await?;

        conn.start()?;

        let factory = self.factory.upgrade().ok_or(Error::Aborted)?;
        Ok(factory.activate(conn))
    }
}

/// Picks the first address of a family we are allowed to dial.
fn select_address(addrs: &[SocketAddr], allow_ipv6: bool) -> Option<SocketAddr> {
    addrs
        .iter()
        .copied()
        .find(|addr| addr.is_ipv4() || allow_ipv6)
}
