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

//! The seam between this crate and the protocol implementations it drives.
//!
//! A [`Connection`](crate::Connection) never looks inside packets or frames.
//! It moves datagrams between its socket and a [`QuicEngine`], moves
//! [`QuicEvent`]s between the [`QuicEngine`] and an [`HttpEngine`], and hands
//! [`HttpEvent`]s to the stream that owns them. Both engines are sans-io
//! state machines: they never block and never perform I/O themselves.
//!
//! Every engine method that produces work returns `Ok(None)` once it has
//! nothing left. That is not an error, and it is distinct from a socket that
//! would block, which the connection sees as `Poll::Pending`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::error::EngineError;
use crate::settings::TransportParams;

/// Result type returned by engine methods.
pub type EngineResult<T> = Result<T, EngineError>;

/// A single HTTP field, in wire (lowercase) form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Header {
    name: Vec<u8>,
    value: Vec<u8>,
}

impl Header {
    pub fn new(name: &[u8], value: &[u8]) -> Self {
        Self {
            name: name.to_vec(),
            value: value.to_vec(),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {:?}",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// Application data exchanged between the QUIC and HTTP engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuicEvent {
    /// Bytes on a stream. `fin` marks the end of the stream in that
    /// direction.
    Stream { id: u64, data: Vec<u8>, fin: bool },
    /// The stream was reset.
    Reset { id: u64, error_code: u64 },
}

/// Request/response progress reported by the HTTP engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpEvent {
    /// The peer's SETTINGS frame was received.
    Settings(Vec<(u64, u64)>),
    /// One response field. `fin` is set on the last field of the header block.
    Header { id: u64, header: Header, fin: bool },
    /// Response body bytes. `fin` marks the end of the body.
    Body { id: u64, data: Vec<u8>, fin: bool },
    /// The peer reset the stream.
    Reset { id: u64, error_code: u64 },
}

impl HttpEvent {
    /// The stream this event belongs to, or `None` for connection-wide
    /// events.
    pub fn stream_id(&self) -> Option<u64> {
        match self {
            Self::Settings(_) => None,
            Self::Header { id, .. } |
            Self::Body { id, .. } |
            Self::Reset { id, .. } => Some(*id),
        }
    }
}

/// A QUIC protocol state machine.
pub trait QuicEngine: Send + 'static {
    /// Produces the next packet to put on the wire, or `None` when nothing is
    /// ready.
    fn send(&mut self) -> EngineResult<Option<Vec<u8>>>;

    /// Processes one received datagram, passing every resulting application
    /// event to `sink`.
    ///
    /// # Errors
    /// Errors from `sink` must be returned unchanged.
    fn recv(
        &mut self, packet: &[u8],
        sink: &mut dyn FnMut(QuicEvent) -> EngineResult<()>,
    ) -> EngineResult<()>;

    /// Queues application data for transmission.
    fn add(&mut self, event: QuicEvent) -> EngineResult<()>;

    /// Runs loss recovery. Called when the deadline reported by
    /// [`expiry`](Self::expiry) passes.
    fn expire(&mut self) -> EngineResult<()>;

    /// Notifies the engine that the deadline reported by
    /// [`timeout`](Self::timeout) passed.
    fn on_timeout(&mut self) {}

    /// When loss recovery needs to run next.
    fn expiry(&self) -> Option<Instant>;

    /// When the connection becomes idle.
    fn timeout(&self) -> Option<Instant>;

    /// The negotiated application protocol.
    fn application_protocol(&self) -> &[u8] {
        b"h3"
    }
}

/// An HTTP framing state machine running on top of a [`QuicEngine`].
pub trait HttpEngine: Send + 'static {
    /// Allocates a new request stream and returns its id.
    ///
    /// # Errors
    /// [`EngineError::StreamLimit`] if the peer doesn't allow another stream.
    fn request(&mut self) -> EngineResult<u64>;

    /// Appends a field to the request's header block.
    fn header(&mut self, id: u64, header: Header) -> EngineResult<()>;

    /// Commits the header block of `id`.
    fn start(&mut self, id: u64) -> EngineResult<()>;

    /// Marks the end of the request body of `id`.
    fn fin(&mut self, id: u64) -> EngineResult<()>;

    /// Produces the next event for the QUIC engine, or `None` when nothing
    /// is ready.
    fn send(&mut self) -> EngineResult<Option<QuicEvent>>;

    /// Processes one event from the QUIC engine, passing every resulting
    /// HTTP event to `sink`.
    fn recv(
        &mut self, event: QuicEvent, sink: &mut dyn FnMut(HttpEvent),
    ) -> EngineResult<()>;
}

/// The engines driving a single connection.
pub struct Engines {
    pub quic: Box<dyn QuicEngine>,
    pub http: Box<dyn HttpEngine>,
}

/// Creates a pair of engines for every new connection.
pub trait EngineFactory: Send + Sync + 'static {
    /// `server_name` is the origin host, used for TLS SNI and certificate
    /// verification.
    fn new_engines(
        &self, server_name: &str, local: SocketAddr, peer: SocketAddr,
        params: &TransportParams,
    ) -> EngineResult<Engines>;
}
