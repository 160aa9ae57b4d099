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

use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;
use std::time::Duration;

/// QUIC transport parameters advertised by every client connection.
///
/// These are handed to the [`EngineFactory`](crate::EngineFactory) when a
/// connection is created; this crate doesn't interpret them itself.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TransportParams {
    /// Sets the `initial_max_data` transport parameter.
    ///
    /// Defaults to 1 MiB.
    #[serde(default = "TransportParams::default_initial_max_data")]
    pub initial_max_data: u64,

    /// Sets the `initial_max_stream_data_bidi_local` transport parameter.
    ///
    /// Defaults to 256 KiB.
    #[serde(default = "TransportParams::default_initial_max_stream_data")]
    pub initial_max_stream_data_bidi_local: u64,

    /// Sets the `initial_max_stream_data_bidi_remote` transport parameter.
    ///
    /// Defaults to 256 KiB.
    #[serde(default = "TransportParams::default_initial_max_stream_data")]
    pub initial_max_stream_data_bidi_remote: u64,

    /// Sets the `initial_max_stream_data_uni` transport parameter.
    ///
    /// Defaults to 256 KiB.
    #[serde(default = "TransportParams::default_initial_max_stream_data")]
    pub initial_max_stream_data_uni: u64,

    /// Sets the `initial_max_streams_bidi` transport parameter.
    ///
    /// Defaults to `1`.
    #[serde(default = "TransportParams::default_initial_max_streams_bidi")]
    pub initial_max_streams_bidi: u64,

    /// Sets the `initial_max_streams_uni` transport parameter. HTTP/3 needs
    /// three: control, QPACK encoder and QPACK decoder.
    ///
    /// Defaults to `3`.
    #[serde(default = "TransportParams::default_initial_max_streams_uni")]
    pub initial_max_streams_uni: u64,

    /// Configures the max idle timeout of the connection in milliseconds.
    ///
    /// Defaults to 30 seconds.
    #[serde(
        rename = "max_idle_timeout_ms",
        default = "TransportParams::default_max_idle_timeout"
    )]
    #[serde_as(as = "Option<DurationMilliSeconds>")]
    pub max_idle_timeout: Option<Duration>,
}

impl TransportParams {
    #[inline]
    fn default_initial_max_data() -> u64 {
        1024 * 1024
    }

    #[inline]
    fn default_initial_max_stream_data() -> u64 {
        256 * 1024
    }

    #[inline]
    fn default_initial_max_streams_bidi() -> u64 {
        1
    }

    #[inline]
    fn default_initial_max_streams_uni() -> u64 {
        3
    }

    #[inline]
    fn default_max_idle_timeout() -> Option<Duration> {
        Some(Duration::from_secs(30))
    }
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            initial_max_data: Self::default_initial_max_data(),
            initial_max_stream_data_bidi_local:
                Self::default_initial_max_stream_data(),
            initial_max_stream_data_bidi_remote:
                Self::default_initial_max_stream_data(),
            initial_max_stream_data_uni: Self::default_initial_max_stream_data(),
            initial_max_streams_bidi: Self::default_initial_max_streams_bidi(),
            initial_max_streams_uni: Self::default_initial_max_streams_uni(),
            max_idle_timeout: Self::default_max_idle_timeout(),
        }
    }
}
