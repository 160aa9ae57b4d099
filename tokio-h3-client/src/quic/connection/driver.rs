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

use std::task::Context;
use std::task::Poll;

use super::alarm::Alarm;
use super::map::StreamHandler;
use super::map::StreamMap;
use super::ConnectionId;
use crate::engine::Engines;
use crate::engine::Header;
use crate::engine::HttpEngine;
use crate::engine::QuicEngine;
use crate::error::ClientResult;
use crate::error::EngineError;
use crate::error::Error;
use crate::socket::SocketAdapter;

/// The mutable state of one connection, and the pumps that move data
/// through it.
///
/// All methods are synchronous and non-blocking. Socket operations that
/// can't complete right away register the waker of `cx`, so the task
/// polling the driver is woken once the socket can make progress.
pub(crate) struct ConnectionDriver {
    id: ConnectionId,
    socket: SocketAdapter,
    quic: Box<dyn QuicEngine>,
    http: Box<dyn HttpEngine>,
    streams: StreamMap,
    retransmit_alarm: Alarm,
    idle_alarm: Alarm,
    closed: Option<Error>,
}

impl ConnectionDriver {
    pub(crate) fn new(
        id: ConnectionId, socket: SocketAdapter, engines: Engines,
    ) -> Self {
        Self {
            id,
            socket,
            quic: engines.quic,
            http: engines.http,
            streams: StreamMap::default(),
            retransmit_alarm: Alarm::default(),
            idle_alarm: Alarm::default(),
            closed: None,
        }
    }

    pub(crate) fn socket(&self) -> &SocketAdapter {
        &self.socket
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub(crate) fn close_reason(&self) -> Option<&Error> {
        self.closed.as_ref()
    }

    /// Arms both alarms and runs both pumps once.
    pub(crate) fn start(&mut self, cx: &mut Context<'_>) -> ClientResult<()> {
        self.rearm_alarms();
        self.send(cx)?;
        self.receive(cx)
    }

    /// Runs the pumps and alarms until nothing can progress without I/O.
    ///
    /// Returns `Poll::Ready` once the connection is closed.
    pub(crate) fn poll_drive(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_closed() {
            return Poll::Ready(());
        }

        match self.drive(cx) {
            Ok(()) => Poll::Pending,
            Err(e) => {
                self.terminate(e);
                Poll::Ready(())
            },
        }
    }

    fn drive(&mut self, cx: &mut Context<'_>) -> ClientResult<()> {
        loop {
            self.receive(cx)?;

            let retransmit = self.retransmit_alarm.poll_fire(cx).is_ready();
            let idle = self.idle_alarm.poll_fire(cx).is_ready();

            if retransmit {
                log::trace!("connection {}: retransmission alarm", self.id);
                self.quic.expire().map_err(Error::Quic)?;
            }

            if idle {
                log::debug!("connection {}: idle timeout", self.id);
                self.quic.on_timeout();
            }

            if !retransmit && !idle {
                return Ok(());
            }
        }
    }

    /// Moves outbound data towards the socket until every source is idle or
    /// the socket would block.
    pub(crate) fn send(&mut self, cx: &mut Context<'_>) -> ClientResult<()> {
        while self.send_once(cx)? {}

        self.rearm_alarms();
        Ok(())
    }

    /// Makes one unit of progress, in priority order: flush the socket queue,
    /// then pull a packet from the QUIC engine, then pull an event from the
    /// HTTP engine. Returns `false` when there is nothing left to do.
    fn send_once(&mut self, cx: &mut Context<'_>) -> ClientResult<bool> {
        match self.socket.poll_send(cx) {
            Poll::Ready(Ok(true)) => return Ok(true),
            Poll::Ready(Ok(false)) => {},
            Poll::Ready(Err(e)) => return Err(Error::io(e)),
            // The socket will wake us once it is writable again.
            Poll::Pending => return Ok(false),
        }

        if let Some(packet) = self.quic.send().map_err(Error::Quic)? {
            self.socket.enqueue(packet);
            return Ok(true);
        }

        if let Some(event) = self.http.send().map_err(Error::Http)? {
            self.quic.add(event).map_err(Error::Quic)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Feeds received datagrams through both engines until the socket would
    /// block, then flushes whatever that produced.
    pub(crate) fn receive(&mut self, cx: &mut Context<'_>) -> ClientResult<()> {
        loop {
            let datagram = match self.socket.poll_recv(cx) {
                Poll::Ready(Ok(datagram)) => datagram,
                Poll::Ready(Err(e)) => return Err(Error::io(e)),
                Poll::Pending => break,
            };

            self.process_datagram(&datagram)?;
        }

        self.rearm_alarms();
        self.send(cx)
    }

    fn process_datagram(&mut self, datagram: &[u8]) -> ClientResult<()> {
        let Self {
            quic,
            http,
            streams,
            ..
        } = self;

        // Errors from the HTTP engine travel back through the QUIC engine's
        // sink, so remember which layer raised them.
        let mut http_err = None;

        let res = quic.recv(datagram, &mut |event| {
            http.recv(event, &mut |event| streams.dispatch(event))
                .inspect_err(|e| http_err = Some(e.clone()))
        });

        match (res, http_err) {
            (Ok(()), _) => Ok(()),
            (Err(_), Some(e)) => Err(Error::Http(e)),
            (Err(e), None) => Err(Error::Quic(e)),
        }
    }

    fn rearm_alarms(&mut self) {
        self.retransmit_alarm.set(self.quic.expiry());
        self.idle_alarm.set(self.quic.timeout());
    }

    /// Allocates a stream and registers `handler` for its events.
    pub(crate) fn request(
        &mut self, handler: StreamHandler,
    ) -> ClientResult<u64> {
        self.ensure_open()?;

        let id = self.http.request().map_err(Error::from_request_error)?;
        self.streams.insert(id, handler);

        log::debug!("connection {}: opened stream {id}", self.id);
        Ok(id)
    }

    /// Stops dispatching events for stream `id`.
    pub(crate) fn remove(&mut self, id: u64) {
        if self.streams.remove(id) {
            log::debug!("connection {}: removed stream {id}", self.id);
        }
    }

    pub(crate) fn header(&mut self, id: u64, header: Header) -> ClientResult<()> {
        self.with_http(|http| http.header(id, header))
    }

    pub(crate) fn start_request(&mut self, id: u64) -> ClientResult<()> {
        self.with_http(|http| http.start(id))
    }

    pub(crate) fn fin(&mut self, id: u64) -> ClientResult<()> {
        self.with_http(|http| http.fin(id))
    }

    fn with_http<T>(
        &mut self, f: impl FnOnce(&mut dyn HttpEngine) -> Result<T, EngineError>,
    ) -> ClientResult<T> {
        self.ensure_open()?;
        f(self.http.as_mut()).map_err(Error::Http)
    }

    fn ensure_open(&self) -> ClientResult<()> {
        match self.closed {
            Some(_) => Err(Error::ConnectionClosed),
            None => Ok(()),
        }
    }

    /// Stops all pumping for good and fails every registered stream.
    pub(crate) fn terminate(&mut self, err: Error) {
        if self.closed.is_some() {
            return;
        }

        if matches!(err, Error::ConnectionClosed | Error::Aborted) {
            log::info!("connection {} closed: {err}", self.id);
        } else {
            log::error!("connection {} failed: {err}", self.id);
        }

        self.retransmit_alarm.set(None);
        self.idle_alarm.set(None);
        self.streams.fail_all(&err);
        self.closed = Some(err);
    }
}
