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

use std::fmt;
use url::Url;

use crate::error::ClientResult;
use crate::error::Error;

/// A host name (or IP literal) and a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPortPair {
    host: String,
    port: u16,
}

impl HostPortPair {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Extracts the origin host and port of `url`, using the scheme's default
    /// port when none is given.
    pub fn from_url(url: &Url) -> ClientResult<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::NoUsableAddress(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::NoUsableAddress(url.to_string()))?;

        // IPv6 literals come back bracketed; the resolver wants them bare.
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostPortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Whether a request may share state (cookies, credentials, connections)
/// with ordinary requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrivacyMode {
    #[default]
    Disabled,
    Enabled,
}

/// Tags sockets so traffic can be attributed to an owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketTag {
    pub uid: Option<u32>,
    pub tag: Option<u32>,
}

/// The key connections are pooled and deduplicated by.
///
/// Two requests with equal identities may share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationIdentity {
    pub host_port: HostPortPair,
    pub privacy_mode: PrivacyMode,
    pub socket_tag: SocketTag,
}

impl DestinationIdentity {
    pub fn new(
        host_port: HostPortPair, privacy_mode: PrivacyMode, socket_tag: SocketTag,
    ) -> Self {
        Self {
            host_port,
            privacy_mode,
            socket_tag,
        }
    }

    /// Whether a connection keyed by `self` may also carry requests for
    /// `other`, assuming both reach the same destination.
    pub(crate) fn can_share_with(&self, other: &Self) -> bool {
        self.privacy_mode == other.privacy_mode &&
            self.socket_tag == other.socket_tag
    }
}

impl fmt::Display for DestinationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host_port)?;

        if self.privacy_mode == PrivacyMode::Enabled {
            write!(f, " (private)")?;
        }

        Ok(())
    }
}
