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

use std::net::SocketAddr;
use std::time::SystemTime;
use url::Position;
use url::Url;

use crate::engine::Header;

/// What to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub url: Url,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// `host[:port]`, with the port only present when it isn't the scheme's
    /// default.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();

        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    /// The path and query to put in `:path`.
    pub fn path(&self) -> &str {
        match &self.url[Position::BeforePath..Position::AfterQuery] {
            "" => "/",
            path => path,
        }
    }

    /// The pseudo-headers that open every request.
    pub(crate) fn pseudo_headers(&self) -> [Header; 4] {
        [
            Header::new(b":method", self.method.as_bytes()),
            Header::new(b":scheme", self.url.scheme().as_bytes()),
            Header::new(b":authority", self.authority().as_bytes()),
            Header::new(b":path", self.path().as_bytes()),
        ]
    }
}

/// What came back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    /// The value of the `:status` pseudo-header.
    pub status: Option<u16>,
    /// Regular response fields, in the order they were received.
    pub headers: Vec<Header>,
    /// The address the response came from.
    pub remote_endpoint: Option<SocketAddr>,
    /// The negotiated application protocol, such as `h3`.
    pub application_protocol: Vec<u8>,
    /// When the request was handed to the connection.
    pub request_time: Option<SystemTime>,
    /// When the response header block completed.
    pub response_time: Option<SystemTime>,
}

impl ResponseInfo {
    /// Returns the value of the first field called `name`.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name().eq_ignore_ascii_case(name.as_bytes()))
            .map(Header::value)
    }
}
