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

use datagram_socket::MAX_UDP_PAYLOAD_SIZE;
use serde::Deserialize;
use serde::Serialize;

use super::TransportParams;

/// Settings shared by every connection a
/// [`StreamFactory`](crate::StreamFactory) creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ClientSettings {
    /// Transport parameters passed to each new QUIC engine.
    #[serde(default)]
    pub transport: TransportParams,

    /// Size of the buffer each datagram is received into.
    ///
    /// Defaults to 65507 bytes, the largest UDP payload.
    #[serde(default = "ClientSettings::default_max_recv_udp_payload_size")]
    pub max_recv_udp_payload_size: usize,

    /// How many datagrams are read from the socket in one go.
    ///
    /// Defaults to 16.
    #[serde(default = "ClientSettings::default_recv_batch_size")]
    pub recv_batch_size: usize,

    /// Whether IPv6 addresses may be dialed. When `false`, the first IPv4
    /// address returned by the resolver is used.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub allow_ipv6: bool,

    /// Whether a request may reuse a connection established for a different
    /// origin when both resolve to the same destination.
    ///
    /// Defaults to `true`.
    #[serde(default = "ClientSettings::default_enable_connection_coalescing")]
    pub enable_connection_coalescing: bool,
}

impl ClientSettings {
    #[inline]
    fn default_max_recv_udp_payload_size() -> usize {
        MAX_UDP_PAYLOAD_SIZE
    }

    #[inline]
    fn default_recv_batch_size() -> usize {
        16
    }

    #[inline]
    fn default_enable_connection_coalescing() -> bool {
        true
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            transport: TransportParams::default(),
            max_recv_udp_payload_size: Self::default_max_recv_udp_payload_size(),
            recv_batch_size: Self::default_recv_batch_size(),
            allow_ipv6: false,
            enable_connection_coalescing:
                Self::default_enable_connection_coalescing(),
        }
    }
}
