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

use futures::future::BoxFuture;
use futures::FutureExt;
use std::io;
use std::net::SocketAddr;

use crate::key::HostPortPair;

/// Turns a host name into socket addresses.
///
/// Dropping the returned future cancels the lookup.
pub trait HostResolver: Send + Sync + 'static {
    fn resolve(
        &self, destination: &HostPortPair,
    ) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>>;
}

/// Resolves through the operating system with [`tokio::net::lookup_host`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(
        &self, destination: &HostPortPair,
    ) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>> {
        let host = destination.host().to_owned();
        let port = destination.port();

        async move {
            let found = tokio::net::lookup_host((host.as_str(), port)).await?;
            let addrs = dedup_addresses(found);

            if addrs.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {host}"),
                ));
            }

            log::debug!("resolved {host}:{port} to {addrs:?}");
            Ok(addrs)
        }
        .boxed()
    }
}

/// Removes repeated addresses, keeping the first occurrence of each.
///
/// `getaddrinfo` reports one entry per socket type, so the same address
/// commonly shows up more than once.
pub(crate) fn dedup_addresses(
    addrs: impl IntoIterator<Item = SocketAddr>,
) -> Vec<SocketAddr> {
    let mut unique = Vec::new();

    for addr in addrs {
        if !unique.contains(&addr) {
            unique.push(addr);
        }
    }

    unique
}
