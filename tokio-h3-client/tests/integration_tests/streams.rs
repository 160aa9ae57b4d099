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

use futures::FutureExt;
use rstest::rstest;
use std::time::Duration;

use tokio_h3_client::ClientSettings;
use tokio_h3_client::Error;
use tokio_h3_client::Header;
use tokio_h3_client::HttpStream;
use tokio_h3_client::RequestInfo;
use tokio_h3_client::http3::StreamState;

fn h(name: &str, value: &str) -> (String, String) {
    (name.to_owned(), value.to_owned())
}

#[tokio::test]
async fn handler_count_tracks_open_streams() -> anyhow::Result<()> {
    let env = TestEnv::new(silent());
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut first = open_stream(&conn, &url, &[])?;
    let second = open_stream(&conn, &url, &[])?;
    let info = RequestInfo::get(url.clone());
    let third = HttpStream::initialize_stream(&conn, &info)?;
    assert_eq!(conn.stream_count(), 3);

    first.close();
    assert_eq!(conn.stream_count(), 2);

    first.close();
    assert_eq!(conn.stream_count(), 2);

    drop(second);
    assert_eq!(conn.stream_count(), 1);

    let fourth = open_stream(&conn, &url, &[])?;
    assert_eq!(conn.stream_count(), 2);

    drop(first);
    drop(third);
    drop(fourth);
    assert_eq!(conn.stream_count(), 0);

    Ok(())
}

#[tokio::test]
async fn closed_stream_reports_cancellation() -> anyhow::Result<()> {
    let env = TestEnv::new(fixed("hello"));
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut stream = open_stream(&conn, &url, &[])?;
    stream.read_response_headers().await?;
    assert_eq!(stream.state(), StreamState::Body);

    stream.close();
    stream.close();

    let mut buf = [0; 8];
    let read = stream.read_response_body(&mut buf).now_or_never();
    assert!(matches!(read, Some(Err(Error::Cancelled))));
    assert!(matches!(stream.send_request(&[]), Err(Error::Cancelled)));

    // The connection is unaffected.
    let (status, body) = fetch(&conn, &url).await?;
    assert_eq!(status, Some(200));
    assert_eq!(body, b"hello");

    Ok(())
}

#[rstest]
#[case::missing_status(Reply::RawHeaders(vec![h("content-type", "text/plain")]))]
#[case::invalid_status(Reply::RawHeaders(vec![h(":status", "2000")]))]
#[case::request_pseudo_header(Reply::RawHeaders(vec![
    h(":status", "200"),
    h(":path", "/"),
]))]
#[case::body_before_headers(Reply::BodyFirst(b"oops".to_vec()))]
#[tokio::test]
async fn malformed_response_fails_only_its_stream(
    #[case] reply: Reply,
) -> anyhow::Result<()> {
    let env = TestEnv::new(routed([("/bad", reply)], fixed("fine")));
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut good = open_stream(&conn, &url, &[])?;
    let mut bad = open_stream(&conn, &url.join("/bad")?, &[])?;

    let res = bad.read_response_headers().await.map(|_| ());
    match res {
        Err(Error::MalformedResponse { id, .. }) =>
            assert_eq!(id, bad.stream_id()),
        other => panic!("unexpected result: {other:?}"),
    }

    good.read_response_headers().await?;
    assert_eq!(read_body(&mut good).await?, b"fine");
    assert!(!conn.is_closed());

    Ok(())
}

#[tokio::test]
async fn interim_response_is_skipped() -> anyhow::Result<()> {
    let reply = Reply::Interim {
        interim: vec![h(":status", "103"), h("link", "</style.css>")],
        status: "200",
        body: b"hi".to_vec(),
    };
    let env = TestEnv::new(routed([("/early", reply)], echo()));
    let url = url("https://example.com/early");
    let conn = env.connect(&url).await?;

    let mut stream = open_stream(&conn, &url, &[])?;
    let response = stream.read_response_headers().await?;

    assert_eq!(response.status, Some(200));
    assert_eq!(response.header("link"), None);
    assert_eq!(stream.state(), StreamState::Body);
    assert_eq!(read_body(&mut stream).await?, b"hi");

    Ok(())
}

#[tokio::test]
async fn trailers_finish_the_body() -> anyhow::Result<()> {
    let reply = Reply::Trailers {
        body: b"payload".to_vec(),
        trailers: vec![h("x-checksum", "abc")],
    };
    let env = TestEnv::new(routed([("/trailers", reply)], echo()));
    let url = url("https://example.com/trailers");
    let conn = env.connect(&url).await?;

    let mut stream = open_stream(&conn, &url, &[])?;
    stream.read_response_headers().await?;

    assert_eq!(read_body(&mut stream).await?, b"payload");
    assert!(stream.is_response_body_complete());
    assert_eq!(stream.response_info().header("x-checksum"), None);
    assert!(!conn.is_closed());

    Ok(())
}

#[tokio::test]
async fn reset_fails_only_its_stream() -> anyhow::Result<()> {
    let env = TestEnv::new(routed([("/reset", Reply::Reset(0x10c))], echo()));
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut reset = open_stream(&conn, &url.join("/reset")?, &[])?;
    let res = reset.read_response_headers().await.map(|_| ());

    match res {
        Err(e @ Error::StreamReset { .. }) => {
            assert!(e.is_stream_error());
            assert!(matches!(e, Error::StreamReset { error_code: 0x10c, .. }));
        },
        other => panic!("unexpected result: {other:?}"),
    }

    let (status, body) = fetch(&conn, &url.join("/after")?).await?;
    assert_eq!(status, Some(200));
    assert_eq!(body, b"/after");

    Ok(())
}

#[tokio::test]
async fn body_reads_span_and_split_chunks() -> anyhow::Result<()> {
    let env = TestEnv::new(echo());
    let url = url("https://example.com/a-path-longer-than-one-read");
    let conn = env.connect(&url).await?;

    let mut stream = open_stream(&conn, &url, &[])?;
    stream.read_response_headers().await?;

    let mut buf = [0; 4];
    let n = stream.read_response_body(&mut buf).await?;
    assert_eq!(&buf[..n], b"/a-p");

    let rest = read_body(&mut stream).await?;
    assert_eq!(rest, b"ath-longer-than-one-read");
    assert_eq!(stream.total_received_bytes(), 28);

    Ok(())
}

#[tokio::test]
async fn empty_read_leaves_the_body_intact() -> anyhow::Result<()> {
    let env = TestEnv::new(fixed("hello"));
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut stream = open_stream(&conn, &url, &[])?;
    stream.read_response_headers().await?;

    assert_eq!(stream.read_response_body(&mut []).await?, 0);
    assert_eq!(read_body(&mut stream).await?, b"hello");
    assert!(stream.is_response_body_complete());

    Ok(())
}

#[tokio::test]
async fn stream_limit_refuses_new_streams() -> anyhow::Result<()> {
    let config = EngineConfig {
        max_streams: Some(1),
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

    let _open = open_stream(&conn, &url, &[])?;
    let info = RequestInfo::get(url.clone());
    let refused = HttpStream::initialize_stream(&conn, &info);

    assert!(matches!(refused, Err(Error::StreamLimit)));
    assert_eq!(conn.stream_count(), 1);
    assert!(!conn.is_closed());

    Ok(())
}

#[tokio::test]
async fn connection_specific_headers_are_not_sent() -> anyhow::Result<()> {
    let env = TestEnv::new(echo());
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let mut stream = open_stream(&conn, &url, &[
        Header::new(b"X-Mixed-Case", b"1"),
        Header::new(b"Connection", b"keep-alive"),
        Header::new(b"Keep-Alive", b"timeout=5"),
        Header::new(b"Proxy-Connection", b"close"),
        Header::new(b"Transfer-Encoding", b"chunked"),
        Header::new(b"Upgrade", b"websocket"),
        Header::new(b"Host", b"elsewhere.example"),
        Header::new(b":path", b"/override"),
        Header::new(b"", b"nameless"),
    ])?;
    stream.read_response_headers().await?;
    assert_eq!(read_body(&mut stream).await?, b"/");

    let requests = env.sockets.last().requests();
    let names: Vec<_> = requests[0]
        .headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();

    assert_eq!(names, [
        ":method",
        ":scheme",
        ":authority",
        ":path",
        "x-mixed-case"
    ]);

    Ok(())
}

#[tokio::test]
async fn blocked_socket_delays_the_request() -> anyhow::Result<()> {
    let env = TestEnv::new(fixed("late"));
    let url = url("https://example.com/");
    let conn = env.connect(&url).await?;

    let socket = env.sockets.last();
    socket.block_writes();
    let sent = socket.datagrams_sent();

    let mut stream = open_stream(&conn, &url, &[])?;
    for _ in 0..10 {
        tokio::task::yield_now().await;
        assert!(stream.read_response_headers().now_or_never().is_none());
    }
    assert_eq!(socket.datagrams_sent(), sent);

    socket.unblock_writes();

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        stream.read_response_headers(),
    )
    .await??;
    assert_eq!(response.status, Some(200));
    assert_eq!(read_body(&mut stream).await?, b"late");
    assert!(socket.datagrams_sent() > sent);

    Ok(())
}
