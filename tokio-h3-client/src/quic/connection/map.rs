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

use smallvec::SmallVec;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::engine::HttpEvent;
use crate::error::Error;

/// Delivered to the handler registered for a stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The HTTP engine produced an event for this stream.
    Http(HttpEvent),
    /// The connection failed. No further events follow.
    Failed(Error),
}

/// Receives the events of one stream.
///
/// Sending never calls back into the connection, so a handler can't re-enter
/// the pump that dispatches to it.
pub type StreamHandler = mpsc::UnboundedSender<StreamEvent>;

/// Maps stream ids to the handlers registered for them.
#[derive(Default)]
pub(crate) struct StreamMap {
    handlers: HashMap<u64, StreamHandler>,
}

impl StreamMap {
    pub(crate) fn insert(&mut self, id: u64, handler: StreamHandler) {
        if self.handlers.insert(id, handler).is_some() {
            log::warn!("stream {id} was registered twice; replacing its handler");
        }
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Hands `event` to the handler of the stream it belongs to.
    pub(crate) fn dispatch(&mut self, event: HttpEvent) {
        let Some(id) = event.stream_id() else {
            log::trace!("ignoring connection-level event {event:?}");
            return;
        };

        let Some(handler) = self.handlers.get(&id) else {
            // The stream was removed while the peer still had data in
            // flight for it.
            log::debug!("dropping event for unregistered stream {id}");
            return;
        };

        log::trace!("stream {id}: {event:?}");

        if handler.send(StreamEvent::Http(event)).is_err() {
            log::debug!("stream {id} went away without deregistering");
            self.handlers.remove(&id);
        }
    }

    /// Fails every registered stream with `err` and empties the map.
    pub(crate) fn fail_all(&mut self, err: &Error) {
        let ids: SmallVec<[u64; 8]> = self.handlers.keys().copied().collect();

        for id in ids {
            if let Some(handler) = self.handlers.remove(&id) {
                let _ = handler.send(StreamEvent::Failed(err.clone()));
            }
        }
    }
}
