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

use std::io;
use std::net::SocketAddr;
use std::task::Context;
use std::task::Poll;
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;

/// The largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD_SIZE: usize = 65507;

/// A type-erased connected datagram socket.
pub type BoxedSocket = Box<dyn DatagramSocket>;

/// Describes an implementation of a connected datagram socket.
///
/// Datagram sockets purposely don't implement `AsyncRead`/`AsyncWrite`: those
/// traits have stream semantics, while every read and write here moves exactly
/// one datagram.
pub trait DatagramSocket:
    DatagramSocketSend + DatagramSocketRecv + 'static
{
    /// Returns the local address this socket is bound to.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Describes the send half of a connected datagram socket.
pub trait DatagramSocketSend: Send + Sync {
    /// Attempts to send data on the socket to the remote address to which it
    /// was previously connected.
    ///
    /// Note that on multiple calls to a `poll_*` method in the send direction,
    /// only the `Waker` from the `Context` passed to the most recent call will
    /// be scheduled to receive a wakeup.
    ///
    /// # Return value
    ///
    /// The function returns:
    ///
    /// * `Poll::Pending` if the socket is not available to write
    /// * `Poll::Ready(Ok(n))` `n` is the number of bytes sent
    /// * `Poll::Ready(Err(e))` if an error is encountered.
    ///
    /// # Errors
    ///
    /// This function may encounter any standard I/O error except `WouldBlock`.
    fn poll_send(&self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>>;

    /// Returns the socket address of the remote peer this socket was connected
    /// to.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Describes the receive half of a connected datagram socket.
pub trait DatagramSocketRecv: Send {
    /// Attempts to receive a single datagram message on the socket from the
    /// remote address to which it is `connect`ed.
    ///
    /// Note that on multiple calls to a `poll_*` method in the `recv`
    /// direction, only the `Waker` from the `Context` passed to the most
    /// recent call will be scheduled to receive a wakeup.
    ///
    /// # Errors
    ///
    /// This function may encounter any standard I/O error except `WouldBlock`.
    fn poll_recv(
        &mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>>;

    /// Attempts to receive multiple datagrams. Returns the number of buffers
    /// filled, and only returns `Poll::Pending` if none were.
    fn poll_recv_many(
        &mut self, cx: &mut Context<'_>, bufs: &mut [ReadBuf<'_>],
    ) -> Poll<io::Result<usize>> {
        let mut read = 0;

        for buf in bufs {
            match self.poll_recv(cx, buf) {
                Poll::Ready(Ok(())) => read += 1,

                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),

                Poll::Pending if read == 0 => return Poll::Pending,
                Poll::Pending => break,
            }
        }

        Poll::Ready(Ok(read))
    }
}

impl DatagramSocket for UdpSocket {
    fn local_addr(&self) -> Option<SocketAddr> {
        UdpSocket::local_addr(self).ok()
    }
}

impl DatagramSocketSend for UdpSocket {
    #[inline]
    fn poll_send(&self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        UdpSocket::poll_send(self, cx, buf)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        UdpSocket::peer_addr(self).ok()
    }
}

impl DatagramSocketRecv for UdpSocket {
    #[inline]
    fn poll_recv(
        &mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        UdpSocket::poll_recv(self, cx, buf)
    }
}
