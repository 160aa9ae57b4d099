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

use futures::future::poll_fn;
use futures::task::noop_waker_ref;
use futures_util::ready;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::Context;
use std::task::Poll;
use tokio::sync::oneshot;
use url::Url;

use super::job::JobId;
use super::job::JobResult;
use super::job::WaiterId;
use super::Attached;
use super::FactoryInner;
use super::StreamFactory;
use crate::error::ClientResult;
use crate::error::Error;
use crate::key::DestinationIdentity;
use crate::key::HostPortPair;
use crate::key::PrivacyMode;
use crate::key::SocketTag;
use crate::quic::ConnectionHandle;

enum RequestState {
    Idle,
    Pending {
        key: DestinationIdentity,
        job: JobId,
        waiter: WaiterId,
        rx: oneshot::Receiver<JobResult>,
    },
    Resolved(ConnectionHandle),
}

/// A caller's pending ask for a connection.
///
/// ```no_run
/// # async fn demo(
/// #     factory: tokio_h3_client::StreamFactory, url: url::Url,
/// # ) -> tokio_h3_client::ClientResult<()> {
/// use tokio_h3_client::*;
///
/// let mut request = StreamRequest::new(&factory);
/// let destination = HostPortPair::from_url(&url)?;
///
/// if request
///     .request(destination, PrivacyMode::Disabled, SocketTag::default(), &url)
///     .is_pending()
/// {
///     request.wait_for_connection().await?;
/// }
///
/// let conn = request.release_connection().expect("resolved");
/// # let _ = conn;
/// # Ok(())
/// # }
/// ```
///
/// Dropping a pending request withdraws it from its job.
pub struct StreamRequest {
    factory: Weak<FactoryInner>,
    state: RequestState,
}

impl StreamRequest {
    pub fn new(factory: &StreamFactory) -> Self {
        Self {
            factory: factory.downgrade(),
            state: RequestState::Idle,
        }
    }

    /// Asks for a connection to the origin of `url`, routed to
    /// `destination`.
    ///
    /// Returns [`Poll::Ready`] if a pooled connection was found or a new one
    /// could be established without waiting. Otherwise the outcome arrives
    /// through [`poll_complete`](Self::poll_complete). A request still
    /// pending from an earlier call is cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request(
        &mut self, destination: HostPortPair, privacy_mode: PrivacyMode,
        socket_tag: SocketTag, url: &Url,
    ) -> Poll<ClientResult<()>> {
        self.cancel();

        let Some(factory) = self.factory.upgrade() else {
            return Poll::Ready(Err(Error::Aborted));
        };

        let origin = match HostPortPair::from_url(url) {
            Ok(origin) => origin,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let key = DestinationIdentity::new(origin, privacy_mode, socket_tag);

        match factory.create(key.clone(), destination) {
            Attached::Connection(conn) => {
                log::trace!("request for {key} reused connection {}", conn.id());
                self.state = RequestState::Resolved(conn);
                return Poll::Ready(Ok(()));
            },
            Attached::Job { job, waiter, rx } => {
                self.state = RequestState::Pending {
                    key,
                    job,
                    waiter,
                    rx,
                };
            },
        }

        // The job may already have finished without suspending.
        self.poll_complete(&mut Context::from_waker(noop_waker_ref()))
    }

    /// Polls for the outcome of a pending request.
    ///
    /// On failure the request returns to having no connection.
    pub fn poll_complete(
        &mut self, cx: &mut Context<'_>,
    ) -> Poll<ClientResult<()>> {
        let rx = match &mut self.state {
            RequestState::Idle => return Poll::Ready(Err(Error::Cancelled)),
            RequestState::Resolved(_) => return Poll::Ready(Ok(())),
            RequestState::Pending { rx, .. } => rx,
        };

        // A dropped sender means the job was torn down with the factory.
        let result = ready!(Pin::new(rx).poll(cx)).unwrap_or(Err(Error::Aborted));

        Poll::Ready(match result {
            Ok(conn) => {
                self.state = RequestState::Resolved(conn);
                Ok(())
            },
            Err(e) => {
                self.state = RequestState::Idle;
                Err(e)
            },
        })
    }

    /// Waits for the outcome of a pending request.
    pub async fn wait_for_connection(&mut self) -> ClientResult<()> {
        poll_fn(|cx| self.poll_complete(cx)).await
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, RequestState::Pending { .. })
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        match &self.state {
            RequestState::Resolved(conn) => Some(conn),
            _ => None,
        }
    }

    /// Takes the connection out of a resolved request.
    pub fn release_connection(&mut self) -> Option<ConnectionHandle> {
        match std::mem::replace(&mut self.state, RequestState::Idle) {
            RequestState::Resolved(conn) => Some(conn),
            other => {
                self.state = other;
                None
            },
        }
    }

    /// Withdraws a pending request from its job. A job left with no
    /// requests is cancelled.
    pub fn cancel(&mut self) {
        let RequestState::Pending {
            key, job, waiter, ..
        } = std::mem::replace(&mut self.state, RequestState::Idle)
        else {
            return;
        };

        if let Some(factory) = self.factory.upgrade() {
            factory.cancel_request(&key, job, waiter);
        }
    }
}

impl Drop for StreamRequest {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            RequestState::Idle => "idle",
            RequestState::Pending { .. } => "pending",
            RequestState::Resolved(_) => "resolved",
        };

        f.debug_struct("StreamRequest").field("state", &state).finish()
    }
}
