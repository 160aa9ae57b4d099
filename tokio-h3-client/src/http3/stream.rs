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
use futures_util::ready;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::task::Context;
use std::task::Poll;
use std::time::SystemTime;
use tokio::sync::mpsc;

use super::RequestInfo;
use super::ResponseInfo;
use crate::engine::Header;
use crate::engine::HttpEvent;
use crate::error::ClientResult;
use crate::error::Error;
use crate::quic::ConnectionHandle;
use crate::quic::RequestHandle;
use crate::quic::StreamEvent;

/// Fields that describe the connection rather than the message. HTTP/3
/// encodes all of them structurally or forbids them.
const CONNECTION_SPECIFIC_HEADERS: &[&[u8]] = &[
    b"connection",
    b"host",
    b"keep-alive",
    b"proxy-connection",
    b"transfer-encoding",
    b"upgrade",
];

/// Where a stream is in its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Waiting for the response header block.
    Headers,
    /// Headers are complete; body data may still arrive.
    Body,
    /// The whole response was received.
    Finished,
}

/// One request/response exchange on a connection.
///
/// An [`HttpStream`] registers itself with the connection when it is
/// created and deregisters when it is closed or dropped. Events for it are
/// queued by the connection's worker and applied whenever the stream is
/// polled, so every read completes exactly once: with data, with the end of
/// the body, or with an error.
pub struct HttpStream {
    conn: ConnectionHandle,
    request: RequestHandle,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    state: StreamState,
    response: ResponseInfo,
    body: VecDeque<Vec<u8>>,
    received_bytes: u64,
    error: Option<Error>,
    closed: bool,
}

impl HttpStream {
    /// Opens a stream on `conn` and writes the request's pseudo-headers.
    ///
    /// # Errors
    /// Fails if the connection can't allocate another stream or is gone.
    pub fn initialize_stream(
        conn: &ConnectionHandle, request: &RequestInfo,
    ) -> ClientResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = conn.request(tx)?;

        for header in request.pseudo_headers() {
            if let Err(e) = handle.header(header) {
                conn.remove(&handle);
                return Err(e);
            }
        }

        log::debug!(
            "stream {} on connection {}: {} {}",
            handle.id(),
            conn.id(),
            request.method,
            request.url
        );

        Ok(Self {
            conn: conn.clone(),
            request: handle,
            events: Some(rx),
            state: StreamState::Headers,
            response: ResponseInfo::default(),
            body: VecDeque::new(),
            received_bytes: 0,
            error: None,
            closed: false,
        })
    }

    /// Adds `headers` to the request, ends it, and wakes the connection.
    ///
    /// Names are lowercased. Pseudo-headers and connection-specific fields
    /// are skipped.
    ///
    /// This only queues the request: it returns as soon as the headers are
    /// handed to the HTTP engine. The connection's worker writes them out,
    /// and the exchange completes through
    /// [`read_response_headers`](Self::read_response_headers).
    ///
    /// # Errors
    /// If the connection already failed, returns the error it failed with.
    pub fn send_request(&mut self, headers: &[Header]) -> ClientResult<()> {
        if self.closed {
            return Err(Error::Cancelled);
        }

        self.apply_queued_events();
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        self.response.request_time = Some(SystemTime::now());

        for header in headers {
            let name = header.name().to_ascii_lowercase();

            if !is_forwardable(&name) {
                log::trace!("skipping request header {header:?}");
                continue;
            }

            self.request.header(Header::new(&name, header.value()))?;
        }

        self.request.start()?;
        self.request.fin()?;
        self.conn.wake();

        Ok(())
    }

    /// Waits for the response header block.
    pub async fn read_response_headers(&mut self) -> ClientResult<&ResponseInfo> {
        poll_fn(|cx| self.poll_read_response_headers(cx)).await?;
        Ok(&self.response)
    }

    pub fn poll_read_response_headers(
        &mut self, cx: &mut Context<'_>,
    ) -> Poll<ClientResult<()>> {
        loop {
            if self.closed {
                return Poll::Ready(Err(Error::Cancelled));
            }
            if self.state != StreamState::Headers {
                return Poll::Ready(Ok(()));
            }
            if let Some(err) = &self.error {
                return Poll::Ready(Err(err.clone()));
            }

            ready!(self.poll_event(cx));
        }
    }

    /// Reads response body bytes into `buf`, returning how many were read.
    /// `Ok(0)` marks the end of the body.
    ///
    /// An empty `buf` returns `Ok(0)` right away without consuming anything,
    /// so it can't be used to detect the end of the body. Use
    /// [`is_response_body_complete`](Self::is_response_body_complete) for
    /// that.
    pub async fn read_response_body(
        &mut self, buf: &mut [u8],
    ) -> ClientResult<usize> {
        poll_fn(|cx| self.poll_read_response_body(cx, buf)).await
    }

    pub fn poll_read_response_body(
        &mut self, cx: &mut Context<'_>, buf: &mut [u8],
    ) -> Poll<ClientResult<usize>> {
        if buf.is_empty() && !self.closed {
            return Poll::Ready(Ok(0));
        }

        loop {
            if self.closed {
                return Poll::Ready(Err(Error::Cancelled));
            }
            if !self.body.is_empty() {
                return Poll::Ready(Ok(self.copy_body(buf)));
            }
            if self.state == StreamState::Finished {
                return Poll::Ready(Ok(0));
            }
            if let Some(err) = &self.error {
                return Poll::Ready(Err(err.clone()));
            }

            ready!(self.poll_event(cx));
        }
    }

    /// Deregisters from the connection. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.events = None;
        self.body.clear();
        self.conn.remove(&self.request);
    }

    pub fn stream_id(&self) -> u64 {
        self.request.id()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn response_info(&self) -> &ResponseInfo {
        &self.response
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.response.remote_endpoint
    }

    pub fn is_response_body_complete(&self) -> bool {
        self.state == StreamState::Finished
    }

    /// Response body bytes received so far, read or not.
    pub fn total_received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Applies every event the connection has already delivered.
    fn apply_queued_events(&mut self) {
        while let Some(events) = self.events.as_mut() {
            match events.try_recv() {
                Ok(event) => self.on_event(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.fail(Error::ConnectionClosed);
                    break;
                },
            }
        }
    }

    /// Applies the next queued event. `Ready` means something may have
    /// changed.
    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let event = match self.events.as_mut() {
            Some(events) => ready!(events.poll_recv(cx)),
            None => None,
        };

        match event {
            Some(event) => self.on_event(event),
            // The connection dropped our handler without failing us first.
            None => self.fail(Error::ConnectionClosed),
        }

        Poll::Ready(())
    }

    fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Http(HttpEvent::Header { header, fin, .. }) =>
                self.on_header(header, fin),
            StreamEvent::Http(HttpEvent::Body { data, fin, .. }) =>
                self.on_body(data, fin),
            StreamEvent::Http(HttpEvent::Reset { id, error_code }) =>
                self.fail(Error::StreamReset { id, error_code }),
            StreamEvent::Http(HttpEvent::Settings(_)) => {},
            StreamEvent::Failed(err) => self.fail(err),
        }
    }

    fn on_header(&mut self, header: Header, fin: bool) {
        match self.state {
            StreamState::Headers => {},
            StreamState::Body => {
                // Trailers. Only their end matters to us.
                if fin {
                    self.state = StreamState::Finished;
                }
                return;
            },
            StreamState::Finished => return,
        }

        if header.name() == b":status" {
            match parse_status(header.value()) {
                Some(status) => self.response.status = Some(status),
                None => return self.malformed("invalid :status"),
            }
        } else if header.is_pseudo() {
            return self.malformed("unexpected pseudo-header");
        } else {
            self.response.headers.push(header);
        }

        if fin {
            self.on_header_block_end();
        }
    }

    fn on_header_block_end(&mut self) {
        let Some(status) = self.response.status else {
            return self.malformed("missing :status");
        };

        // Interim responses are followed by another header block.
        if (100..200).contains(&status) {
            self.response.status = None;
            self.response.headers.clear();
            return;
        }

        self.response.remote_endpoint = self.conn.peer_addr();
        self.response.application_protocol =
            self.conn.application_protocol().to_vec();
        self.response.response_time = Some(SystemTime::now());
        self.state = StreamState::Body;
    }

    fn on_body(&mut self, data: Vec<u8>, fin: bool) {
        match self.state {
            StreamState::Headers =>
                return self.malformed("body before response headers"),
            StreamState::Body => {},
            StreamState::Finished => return,
        }

        if !data.is_empty() {
            self.received_bytes += data.len() as u64;
            self.body.push_back(data);
        }

        if fin {
            self.state = StreamState::Finished;
        }
    }

    fn malformed(&mut self, reason: &'static str) {
        let id = self.request.id();
        log::warn!("stream {id}: malformed response: {reason}");
        self.fail(Error::MalformedResponse { id, reason });
    }

    /// Records the first failure. Data that already arrived stays readable.
    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn copy_body(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < buf.len() {
            let Some(front) = self.body.front_mut() else {
                break;
            };

            let n = front.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            copied += n;

            if n == front.len() {
                self.body.pop_front();
            } else {
                front.drain(..n);
            }
        }

        copied
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_forwardable(name: &[u8]) -> bool {
    !name.is_empty() &&
        name[0] != b':' &&
        !CONNECTION_SPECIFIC_HEADERS.contains(&name)
}

fn parse_status(value: &[u8]) -> Option<u16> {
    if value.len() != 3 {
        return None;
    }

    std::str::from_utf8(value)
        .ok()?
        .parse()
        .ok()
        .filter(|status| (100..600).contains(status))
}
