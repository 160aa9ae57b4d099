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

//! A synthetic QUIC and HTTP engine pair. Packets and frames are JSON; the
//! point is to drive the transport, not to speak a real protocol.

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio_h3_client::engine::EngineResult;
use tokio_h3_client::engine::HttpEvent;
use tokio_h3_client::engine::QuicEvent;
use tokio_h3_client::EngineError;
use tokio_h3_client::EngineFactory;
use tokio_h3_client::Engines;
use tokio_h3_client::Header;
use tokio_h3_client::HttpEngine;
use tokio_h3_client::QuicEngine;
use tokio_h3_client::TransportParams;

/// One packet on the mock wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Hello,
    Ack,
    /// Sent by loss recovery to elicit an acknowledgement.
    Ping,
    Stream { id: u64, data: Vec<u8>, fin: bool },
    Reset { id: u64, code: u64 },
    Close { code: u64 },
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    pub fn decode(packet: &[u8]) -> Self {
        serde_json::from_slice(packet).unwrap()
    }
}

/// HTTP framing carried in stream data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Headers(Vec<(String, String)>),
    Data(Vec<u8>),
    Settings(Vec<(u64, u64)>),
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub first_stream_id: u64,
    pub stream_id_step: u64,
    /// How many requests each connection may open.
    pub max_streams: Option<usize>,
    /// Loss recovery is due this long after the engine is created.
    pub retransmit_after: Option<Duration>,
    /// The idle deadline, pushed back by every received packet.
    pub idle_timeout: Option<Duration>,
    /// Loss recovery fails with this protocol error code.
    pub expire_error: Option<u64>,
    pub fail_new_engines: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            first_stream_id: 0,
            stream_id_step: 4,
            max_streams: None,
            retransmit_after: None,
            idle_timeout: None,
            expire_error: None,
            fail_new_engines: false,
        }
    }
}

/// Counters shared by every engine a factory creates.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub engines_created: AtomicUsize,
    pub expirations: AtomicUsize,
    pub idle_timeouts: AtomicUsize,
    pub server_names: parking_lot::Mutex<Vec<String>>,
}

impl EngineStats {
    pub fn expirations(&self) -> usize {
        self.expirations.load(Ordering::SeqCst)
    }

    pub fn idle_timeouts(&self) -> usize {
        self.idle_timeouts.load(Ordering::SeqCst)
    }

    pub fn engines_created(&self) -> usize {
        self.engines_created.load(Ordering::SeqCst)
    }
}

fn now() -> Instant {
    // Follows tokio's clock so paused-time tests can drive the alarms.
    tokio::time::Instant::now().into_std()
}

pub struct FakeQuic {
    outbound: VecDeque<Frame>,
    closed: bool,
    expiry: Option<Instant>,
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
    expire_error: Option<u64>,
    stats: Arc<EngineStats>,
}

impl QuicEngine for FakeQuic {
    fn send(&mut self) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.outbound.pop_front().map(|frame| frame.encode()))
    }

    fn recv(
        &mut self, packet: &[u8],
        sink: &mut dyn FnMut(QuicEvent) -> EngineResult<()>,
    ) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::Closed);
        }

        self.idle_deadline = self.idle_timeout.map(|t| now() + t);

        match Frame::decode(packet) {
            Frame::Hello | Frame::Ack | Frame::Ping => return Ok(()),
            Frame::Stream { id, data, fin } =>
                sink(QuicEvent::Stream { id, data, fin })?,
            Frame::Reset { id, code } => sink(QuicEvent::Reset {
                id,
                error_code: code,
            })?,
            Frame::Close { code } => {
                self.closed = true;
                return Err(EngineError::Protocol(code));
            },
        }

        self.outbound.push_back(Frame::Ack);
        Ok(())
    }

    fn add(&mut self, event: QuicEvent) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::Closed);
        }

        self.outbound.push_back(match event {
            QuicEvent::Stream { id, data, fin } => Frame::Stream { id, data, fin },
            QuicEvent::Reset { id, error_code } => Frame::Reset {
                id,
                code: error_code,
            },
        });

        Ok(())
    }

    fn expire(&mut self) -> EngineResult<()> {
        self.stats.expirations.fetch_add(1, Ordering::SeqCst);
        self.expiry = None;

        if let Some(code) = self.expire_error {
            self.closed = true;
            return Err(EngineError::Protocol(code));
        }

        self.outbound.push_back(Frame::Ping);
        Ok(())
    }

    fn on_timeout(&mut self) {
        self.stats.idle_timeouts.fetch_add(1, Ordering::SeqCst);
        self.idle_deadline = None;
    }

    fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    fn timeout(&self) -> Option<Instant> {
        self.idle_deadline
    }
}

pub struct FakeHttp {
    next_id: u64,
    step: u64,
    remaining: Option<usize>,
    requests: HashMap<u64, Vec<(String, String)>>,
    outbound: VecDeque<QuicEvent>,
}

impl FakeHttp {
    fn pending(&mut self, id: u64) -> EngineResult<&mut Vec<(String, String)>> {
        self.requests
            .get_mut(&id)
            .ok_or(EngineError::UnknownStream(id))
    }
}

impl HttpEngine for FakeHttp {
    fn request(&mut self) -> EngineResult<u64> {
        match &mut self.remaining {
            Some(0) => return Err(EngineError::StreamLimit),
            Some(n) => *n -= 1,
            None => {},
        }

        let id = self.next_id;
        self.next_id += self.step;
        self.requests.insert(id, vec![]);

        Ok(id)
    }

    fn header(&mut self, id: u64, header: Header) -> EngineResult<()> {
        let name = String::from_utf8_lossy(header.name()).into_owned();
        let value = String::from_utf8_lossy(header.value()).into_owned();
        self.pending(id)?.push((name, value));

        Ok(())
    }

    fn start(&mut self, id: u64) -> EngineResult<()> {
        let headers = std::mem::take(self.pending(id)?);

        self.outbound.push_back(QuicEvent::Stream {
            id,
            data: Message::Headers(headers).encode(),
            fin: false,
        });

        Ok(())
    }

    fn fin(&mut self, id: u64) -> EngineResult<()> {
        self.requests
            .remove(&id)
            .ok_or(EngineError::UnknownStream(id))?;

        self.outbound.push_back(QuicEvent::Stream {
            id,
            data: vec![],
            fin: true,
        });

        Ok(())
    }

    fn send(&mut self) -> EngineResult<Option<QuicEvent>> {
        Ok(self.outbound.pop_front())
    }

    fn recv(
        &mut self, event: QuicEvent, sink: &mut dyn FnMut(HttpEvent),
    ) -> EngineResult<()> {
        let (id, data, fin) = match event {
            QuicEvent::Stream { id, data, fin } => (id, data, fin),
            QuicEvent::Reset { id, error_code } => {
                sink(HttpEvent::Reset { id, error_code });
                return Ok(());
            },
        };

        if data.is_empty() {
            if fin {
                sink(HttpEvent::Body {
                    id,
                    data: vec![],
                    fin,
                });
            }
            return Ok(());
        }

        match Message::decode(&data).ok_or(EngineError::Protocol(0x101))? {
            Message::Headers(headers) => {
                let last = headers.len().saturating_sub(1);

                for (i, (name, value)) in headers.into_iter().enumerate() {
                    sink(HttpEvent::Header {
                        id,
                        header: Header::new(name.as_bytes(), value.as_bytes()),
                        fin: i == last,
                    });
                }

                if fin {
                    sink(HttpEvent::Body {
                        id,
                        data: vec![],
                        fin,
                    });
                }
            },
            Message::Data(data) => sink(HttpEvent::Body { id, data, fin }),
            Message::Settings(settings) => sink(HttpEvent::Settings(settings)),
        }

        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeEngineFactory {
    pub config: EngineConfig,
    pub stats: Arc<EngineStats>,
}

impl FakeEngineFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            stats: Default::default(),
        }
    }
}

impl EngineFactory for FakeEngineFactory {
    fn new_engines(
        &self, server_name: &str, _local: SocketAddr, _peer: SocketAddr,
        _params: &TransportParams,
    ) -> EngineResult<Engines> {
        if self.config.fail_new_engines {
            return Err(EngineError::Protocol(0x100));
        }

        self.stats.engines_created.fetch_add(1, Ordering::SeqCst);
        self.stats.server_names.lock().push(server_name.to_owned());

        let quic = FakeQuic {
            outbound: VecDeque::from([Frame::Hello]),
            closed: false,
            expiry: self.config.retransmit_after.map(|d| now() + d),
            idle_timeout: self.config.idle_timeout,
            idle_deadline: self.config.idle_timeout.map(|d| now() + d),
            expire_error: self.config.expire_error,
            stats: Arc::clone(&self.stats),
        };

        let http = FakeHttp {
            next_id: self.config.first_stream_id,
            step: self.config.stream_id_step,
            remaining: self.config.max_streams,
            requests: HashMap::new(),
            outbound: VecDeque::new(),
        };

        Ok(Engines {
            quic: Box::new(quic),
            http: Box::new(http),
        })
    }
}
