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

use std::io;
use std::sync::Arc;

/// Result type used throughout this crate.
pub type ClientResult<T> = Result<T, Error>;

/// Errors reported by the opaque QUIC and HTTP engines.
///
/// "Nothing to do" is not an error: engines report it as `Ok(None)`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// No more streams can be opened until the peer raises its limit.
    #[error("stream limit reached")]
    StreamLimit,
    /// The stream id is not known to the engine.
    #[error("unknown stream {0}")]
    UnknownStream(u64),
    /// The peer violated the protocol, or the engine's state is invalid.
    #[error("protocol error (code {0:#x})")]
    Protocol(u64),
    /// The connection is closed and cannot be used anymore.
    #[error("connection closed")]
    Closed,
}

/// Everything that can go wrong while resolving, connecting, and exchanging
/// requests.
///
/// The type is cheap to clone, so a single connection failure can be
/// delivered to every stream and every waiting request.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The host resolver failed.
    #[error("host resolution failed: {0}")]
    Resolve(#[source] Arc<io::Error>),
    /// Resolution succeeded but returned no address we are allowed to dial.
    #[error("no usable address for {0}")]
    NoUsableAddress(String),
    /// Creating or connecting the datagram socket failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] Arc<io::Error>),
    /// The QUIC engine reported an error.
    #[error("quic: {0}")]
    Quic(#[source] EngineError),
    /// The HTTP engine reported an error.
    #[error("http: {0}")]
    Http(#[source] EngineError),
    /// Reading from or writing to the socket failed.
    #[error("socket i/o: {0}")]
    Io(#[source] Arc<io::Error>),
    /// The connection can't open another stream.
    #[error("no stream available on this connection")]
    StreamLimit,
    /// The peer sent a response that violates HTTP semantics.
    #[error("malformed response on stream {id}: {reason}")]
    MalformedResponse { id: u64, reason: &'static str },
    /// The peer reset the stream.
    #[error("stream {id} reset by peer (code {error_code:#x})")]
    StreamReset { id: u64, error_code: u64 },
    /// The connection went away before the operation completed.
    #[error("connection closed")]
    ConnectionClosed,
    /// The factory aborted all pending work.
    #[error("aborted")]
    Aborted,
    /// The request was cancelled by its owner.
    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }

    /// Maps an engine error raised while allocating a stream.
    pub(crate) fn from_request_error(err: EngineError) -> Self {
        match err {
            EngineError::StreamLimit => Self::StreamLimit,
            EngineError::Closed => Self::ConnectionClosed,
            other => Self::Http(other),
        }
    }

    /// Whether the error only affects a single stream.
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse { .. } | Self::StreamReset { .. }
        )
    }
}

// Best-effort mapping so callers that speak `io::Error` keep a useful kind.
impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Resolve(e) | Error::Connect(e) | Error::Io(e) => e.kind(),
            Error::NoUsableAddress(_) => io::ErrorKind::AddrNotAvailable,
            Error::MalformedResponse { .. } => io::ErrorKind::InvalidData,
            Error::StreamReset { .. } => io::ErrorKind::ConnectionReset,
            Error::ConnectionClosed | Error::Quic(EngineError::Closed) =>
                io::ErrorKind::NotConnected,
            Error::Aborted | Error::Cancelled => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };

        Self::new(kind, err)
    }
}
