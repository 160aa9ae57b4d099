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

use datagram_socket::AsSocketStats;
use datagram_socket::BoxedSocket;
use datagram_socket::SocketStats;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::task::Context;
use std::task::Poll;
use tokio::io::ReadBuf;

/// Queues datagrams in front of a connected socket.
///
/// Both directions are non-blocking. `poll_send` and `poll_recv` return
/// `Poll::Pending` only after the socket registered the task's waker, so the
/// owning task is polled again when the operation can make progress. Since
/// the head of the send queue is only popped once the socket accepted it,
/// at most one write and one read are ever outstanding.
pub(crate) struct SocketAdapter {
    socket: BoxedSocket,
    send_queue: VecDeque<Vec<u8>>,
    recv_queue: VecDeque<Vec<u8>>,
    recv_bufs: Vec<Box<[u8]>>,
    stats: SocketStats,
}

impl SocketAdapter {
    pub(crate) fn new(
        socket: BoxedSocket, max_recv_payload: usize, recv_batch_size: usize,
    ) -> Self {
        Self {
            socket,
            send_queue: VecDeque::new(),
            recv_queue: VecDeque::new(),
            recv_bufs: (0..recv_batch_size.max(1))
                .map(|_| vec![0; max_recv_payload].into_boxed_slice())
                .collect(),
            stats: SocketStats::default(),
        }
    }

    /// Appends a datagram to the send queue without writing it.
    pub(crate) fn enqueue(&mut self, datagram: Vec<u8>) {
        self.send_queue.push_back(datagram);
    }

    /// Writes the datagram at the head of the send queue.
    ///
    /// Returns `Ready(Ok(true))` if a datagram was written and
    /// `Ready(Ok(false))` if the queue is empty.
    pub(crate) fn poll_send(
        &mut self, cx: &mut Context<'_>,
    ) -> Poll<io::Result<bool>> {
        let Some(head) = self.send_queue.front() else {
            return Poll::Ready(Ok(false));
        };

        match self.socket.poll_send(cx, head) {
            Poll::Ready(Ok(written)) => {
                self.stats.on_send(written);
                self.send_queue.pop_front();
                Poll::Ready(Ok(true))
            },
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Returns the next received datagram.
    ///
    /// When nothing is buffered, up to `recv_batch_size` datagrams are read
    /// from the socket in one go.
    pub(crate) fn poll_recv(
        &mut self, cx: &mut Context<'_>,
    ) -> Poll<io::Result<Vec<u8>>> {
        if self.recv_queue.is_empty() {
            let mut bufs: SmallVec<[ReadBuf<'_>; 16]> = self
                .recv_bufs
                .iter_mut()
                .map(|buf| ReadBuf::new(&mut buf[..]))
                .collect();

            let read = match self.socket.poll_recv_many(cx, &mut bufs) {
                Poll::Ready(Ok(read)) => read,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };

            for buf in &bufs[..read] {
                let datagram = buf.filled().to_vec();
                self.stats.on_recv(datagram.len());
                self.recv_queue.push_back(datagram);
            }
        }

        match self.recv_queue.pop_front() {
            Some(datagram) => Poll::Ready(Ok(datagram)),
            None => Poll::Pending,
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_sends(&self) -> usize {
        self.send_queue.len()
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl AsSocketStats for SocketAdapter {
    fn as_socket_stats(&self) -> SocketStats {
        self.stats
    }
}
