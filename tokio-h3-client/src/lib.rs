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

//! A pooled HTTP/3 client transport on [tokio].
//!
//! tokio-h3-client runs HTTP/3 requests over QUIC connections that it
//! establishes, pools and shares between callers. The QUIC and HTTP/3
//! protocol state machines themselves are pluggable: an [`EngineFactory`]
//! creates a [`QuicEngine`] and an [`HttpEngine`] for each connection, and
//! this crate pumps datagrams, timers and stream events between them and a
//! [`DatagramSocket`](datagram_socket::DatagramSocket).
//!
//! # Making a Request
//!
//! A [`StreamRequest`] asks the [`StreamFactory`] for a connection to an
//! origin. Requests for the same origin share both the pooled connection
//! and any connection attempt in flight. An [`HttpStream`] then carries a
//! single request/response exchange over that connection.
//!
//! ```no_run
//! use tokio_h3_client::*;
//!
//! # async fn example(engines: impl EngineFactory) -> ClientResult<()> {
//! let factory = StreamFactory::with_engines(ClientSettings::default(), engines);
//!
//! let url = url::Url::parse("https://example.com/index.html").unwrap();
//! let mut request = StreamRequest::new(&factory);
//! let destination = HostPortPair::from_url(&url)?;
//!
//! if request
//!     .request(destination, PrivacyMode::Disabled, SocketTag::default(), &url)
//!     .is_pending()
//! {
//!     request.wait_for_connection().await?;
//! }
//!
//! let conn = request.release_connection().unwrap();
//! let info = RequestInfo::get(url);
//!
//! let mut stream = HttpStream::initialize_stream(&conn, &info)?;
//! stream.send_request(&[Header::new(b"user-agent", b"tokio-h3-client")])?;
//!
//! let response = stream.read_response_headers().await?;
//! println!("status: {:?}", response.status);
//!
//! let mut buf = [0; 4096];
//! while stream.read_response_body(&mut buf).await? > 0 {}
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! The crate logs through the [log] facade. Connection lifecycle events are
//! logged at `info`, pooling decisions at `debug` and per-packet activity at
//! `trace`.

pub mod engine;
mod error;
mod factory;
pub mod http3;
mod key;
pub mod quic;
mod resolver;
pub mod settings;
pub mod socket;

pub use datagram_socket;

pub use crate::engine::EngineFactory;
pub use crate::engine::Engines;
pub use crate::engine::Header;
pub use crate::engine::HttpEngine;
pub use crate::engine::QuicEngine;
pub use crate::error::ClientResult;
pub use crate::error::EngineError;
pub use crate::error::Error;
pub use crate::factory::StreamFactory;
pub use crate::factory::StreamRequest;
pub use crate::http3::HttpStream;
pub use crate::http3::RequestInfo;
pub use crate::http3::ResponseInfo;
pub use crate::key::DestinationIdentity;
pub use crate::key::HostPortPair;
pub use crate::key::PrivacyMode;
pub use crate::key::SocketTag;
pub use crate::quic::Connection;
pub use crate::quic::ConnectionHandle;
pub use crate::resolver::HostResolver;
pub use crate::resolver::SystemResolver;
pub use crate::settings::ClientSettings;
pub use crate::settings::TransportParams;
pub use crate::socket::SocketFactory;
pub use crate::socket::UdpSocketFactory;
