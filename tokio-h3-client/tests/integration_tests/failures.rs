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

use crate::fixtures::*;

use rstest::rstest;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio_h3_client::ClientSettings;
use tokio_h3_client::EngineError;
use tokio_h3_client::Error;
use tokio_h3_client::HttpStream;
use tokio_h3_client::RequestInfo;

/// Waits until the peer has seen `n` complete requests.
async fn wait_for_requests(socket: &MockSocketHandle, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while socket.requests().len() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("requests never reached the peer");
}

#[tokio::test]
async fn write_error_fails_every_stream() -> anyhow::Result<()> {
    let config = EngineConfig {
        first_stream_id: 1,
        stream_id_step: 2,
        ..Default::default()
    };
    let env = TestEnv::build(
        ClientSettings::default(),
        MockResolver::immediate(),
        silent(),
        config,
    );
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut first = open_stream(&conn, &url, &[])?;
    let mut second = open_stream(&conn, &url, &[])?;
    assert_eq!((first.stream_id(), second.stream_id()), (1, 3));

    let socket = env.sockets.last();
    wait_for_requests(&socket, 2).await;

    // Anything the peer sends now makes the client acknowledge it, and that
    // write fails.
    socket.fail_writes(io::ErrorKind::BrokenPipe);
    socket.inject(Frame::Stream {
        id: CONTROL_STREAM_ID,
        data: Message::Settings(vec![]).encode(),
        fin: false,
    });

    for stream in [&mut first, &mut second] {
        match stream.read_response_headers().await.map(|_| ()) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    assert!(conn.is_closed());
    assert_eq!(conn.stream_count(), 0);

    // Nothing is dispatched to the failed streams anymore.
    socket.inject(Frame::Stream {
        id: 1,
        data: Message::Headers(vec![(":status".into(), "200".into())]).encode(),
        fin: true,
    });
    tokio::task::yield_now().await;
    assert!(matches!(first.read_response_headers().await, Err(Error::Io(_))));

    let refused = HttpStream::initialize_stream(&conn, &RequestInfo::get(url));
    assert!(matches!(refused, Err(Error::ConnectionClosed)));

    Ok(())
}

#[tokio::test]
async fn unsent_request_reports_the_failure_cause() -> anyhow::Result<()> {
    let env = TestEnv::new(routed([("/close", Reply::Close(0x42))], silent()));
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let info = RequestInfo::get(url.clone());
    let mut unsent = HttpStream::initialize_stream(&conn, &info)?;

    let res = fetch(&conn, &url.join("/close")?).await;
    assert!(matches!(res, Err(Error::Quic(EngineError::Protocol(0x42)))));
    assert!(conn.is_closed());

    let res = unsent.send_request(&[]);
    assert!(matches!(res, Err(Error::Quic(EngineError::Protocol(0x42)))));

    Ok(())
}

#[tokio::test]
async fn peer_close_fails_every_stream() -> anyhow::Result<()> {
    let env = TestEnv::new(routed([("/close", Reply::Close(0x42))], silent()));
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut waiting = open_stream(&conn, &url, &[])?;
    let mut closing = open_stream(&conn, &url.join("/close")?, &[])?;

    for stream in [&mut closing, &mut waiting] {
        let res = stream.read_response_headers().await.map(|_| ());
        assert!(matches!(
            res,
            Err(Error::Quic(EngineError::Protocol(0x42)))
        ));
    }

    assert!(matches!(
        conn.close_reason(),
        None | Some(Error::Quic(EngineError::Protocol(0x42)))
    ));

    Ok(())
}

#[tokio::test]
async fn resolution_failure_reaches_every_waiter() -> anyhow::Result<()> {
    let env = TestEnv::build(
        ClientSettings::default(),
        MockResolver::gated(),
        echo(),
        EngineConfig::default(),
    );
    env.resolver.fail("example.com", io::ErrorKind::NotFound);
    let url = url("https://example.com/");

    let (mut first, _) = env.request(&url);
    let (mut second, _) = env.request(&url);
    env.resolver.open();

    for request in [&mut first, &mut second] {
        match request.wait_for_connection().await {
            Err(Error::Resolve(e)) =>
                assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(request.connection().is_none());
    }

    assert_eq!(env.resolver.calls(), 1);
    assert_eq!(env.factory.job_count(), 0);
    assert!(env.sockets.sockets().is_empty());

    // Failures aren't cached.
    let res = env.connect(&url).await;
    assert!(matches!(res, Err(Error::Resolve(_))));
    assert_eq!(env.resolver.calls(), 2);

    Ok(())
}

#[rstest]
#[case::ipv4_only(false, None)]
#[case::ipv6_allowed(true, Some("[2001:db8::1]:443"))]
#[tokio::test]
async fn address_family_selection(
    #[case] allow_ipv6: bool, #[case] dialed: Option<&str>,
) -> anyhow::Result<()> {
    let mut settings = ClientSettings::default();
    settings.allow_ipv6 = allow_ipv6;

    let env = TestEnv::build(
        settings,
        MockResolver::immediate(),
        echo(),
        EngineConfig::default(),
    );
    env.resolver.set("v6.example", &["[2001:db8::1]:443"]);

    let res = env.connect(&url("https://v6.example/")).await;

    match dialed {
        Some(addr) => {
            let conn = res?;
            let addr: SocketAddr = addr.parse()?;
            assert_eq!(conn.peer_addr(), Some(addr));
            assert_eq!(env.sockets.last().peer, addr);
        },
        None => {
            assert!(matches!(res, Err(Error::NoUsableAddress(_))));
            assert!(env.sockets.sockets().is_empty());
        },
    }

    Ok(())
}

#[tokio::test]
async fn first_usable_address_is_dialed() -> anyhow::Result<()> {
    let env = TestEnv::new(echo());
    env.resolver.set("multi.example", &[
        "[2001:db8::1]:443",
        "198.51.100.7:443",
        "198.51.100.8:443",
    ]);

    let conn = env.connect(&url("https://multi.example/")).await?;
    assert_eq!(conn.peer_addr(), Some("198.51.100.7:443".parse::<SocketAddr>()?));

    Ok(())
}

#[tokio::test]
async fn connect_failure_is_reported() -> anyhow::Result<()> {
    let env = TestEnv::new(echo());
    env.sockets.fail_connects(io::ErrorKind::ConnectionRefused);

    match env.connect(&url("https://example.com/")).await {
        Err(Error::Connect(e)) =>
            assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(env.factory.active_connection_count(), 0);
    assert_eq!(env.factory.job_count(), 0);

    Ok(())
}

#[tokio::test]
async fn engine_failure_is_reported() -> anyhow::Result<()> {
    let config = EngineConfig {
        fail_new_engines: true,
        ..Default::default()
    };
    let env = TestEnv::build(
        ClientSettings::default(),
        MockResolver::immediate(),
        echo(),
        config,
    );

    let res = env.connect(&url("https://example.com/")).await;
    assert!(matches!(res, Err(Error::Quic(EngineError::Protocol(0x100)))));
    assert_eq!(env.factory.active_connection_count(), 0);

    Ok(())
}

#[tokio::test]
async fn broken_connection_is_not_handed_out() -> anyhow::Result<()> {
    let env = TestEnv::new(echo());
    let url = url("https://example.com/");

    // Break the first connection once it is up.
    let conn = env.connect(&url).await?;
    env.sockets.last().fail_writes(io::ErrorKind::ConnectionReset);
    let _stream = open_stream(&conn, &url, &[])?;

    tokio::time::timeout(Duration::from_secs(5), async {
        while !conn.is_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    let fresh = env.connect(&url).await?;
    assert_ne!(fresh.id(), conn.id());
    assert!(!fresh.is_closed());

    Ok(())
}
