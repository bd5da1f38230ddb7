// Copyright 2026 the corral developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Liveness probing
//!
//! A probe is a single PING/PONG exchange against a worker endpoint:
//!   - connect to the unix socket, or to localhost on the assigned port
//!   - send the probe token, await exactly one reply within the timeout
//!   - classify the reply as alive, unexpected, or unreachable
//!
//! The connection is dropped on every exit path; probing is safe to repeat
//! and carries no state between calls.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::time;

const PING: &[u8] = b"PING\r\n";
const PONG: &str = "+PONG";

/// Where a worker can be reached. Exactly one of the two must be usable:
/// a configured socket path, or a non-zero TCP port on localhost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub socket: Option<PathBuf>,
    pub port: u16,
}

/// Outcome of a single probe, consumed within one poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Alive,
    UnexpectedReply(String),
    Unreachable(Cause),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    /// Neither a socket path nor a usable port was supplied.
    InvalidEndpoint,
    Connect(String),
    Io(String),
    Timeout,
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Alive => f.write_str("alive"),
            ProbeResult::UnexpectedReply(reply) => write!(f, "unexpected reply {reply:?}"),
            ProbeResult::Unreachable(cause) => write!(f, "unreachable: {cause}"),
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::InvalidEndpoint => f.write_str("neither unix socket nor tcp port configured"),
            Cause::Connect(err) => write!(f, "connect failed: {err}"),
            Cause::Io(err) => f.write_str(err),
            Cause::Timeout => f.write_str("timed out awaiting reply"),
        }
    }
}

/// Probe the endpoint once. The whole exchange, connect included, is bounded
/// by `timeout`. An endpoint with neither socket nor port is rejected without
/// any connection attempt.
pub async fn probe(endpoint: &Endpoint, timeout: Duration) -> ProbeResult {
    let attempt = async {
        match (endpoint.socket.as_deref(), endpoint.port) {
            (Some(path), _) => match UnixStream::connect(path).await {
                Ok(stream) => exchange(stream).await,
                Err(err) => ProbeResult::Unreachable(Cause::Connect(err.to_string())),
            },
            (None, port) if port != 0 => match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => exchange(stream).await,
                Err(err) => ProbeResult::Unreachable(Cause::Connect(err.to_string())),
            },
            _ => ProbeResult::Unreachable(Cause::InvalidEndpoint),
        }
    };

    match time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => ProbeResult::Unreachable(Cause::Timeout),
    }
}

/// Probe with bounded retry and doubling backoff, for spawn readiness: a
/// freshly launched worker needs a moment to bind its listener. Returns the
/// first `Alive`, or the final result once the attempts are exhausted. An
/// invalid endpoint is never retried.
pub async fn wait_ready(
    endpoint: &Endpoint,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
) -> ProbeResult {
    let mut delay = backoff;
    let mut last = probe(endpoint, timeout).await;
    for _ in 1..attempts {
        match last {
            ProbeResult::Alive => return last,
            ProbeResult::Unreachable(Cause::InvalidEndpoint) => return last,
            _ => {}
        }
        time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(1));
        last = probe(endpoint, timeout).await;
    }
    last
}

async fn exchange<S>(mut stream: S) -> ProbeResult
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(err) = stream.write_all(PING).await {
        return ProbeResult::Unreachable(Cause::Io(err.to_string()));
    }

    let mut buf = [0u8; 256];
    match stream.read(&mut buf).await {
        Ok(0) => ProbeResult::Unreachable(Cause::Io("connection closed before reply".to_owned())),
        Ok(n) => {
            let reply = String::from_utf8_lossy(&buf[..n]);
            let reply = reply.trim_end_matches(['\r', '\n']);
            if reply == PONG {
                ProbeResult::Alive
            } else {
                ProbeResult::UnexpectedReply(reply.to_owned())
            }
        }
        Err(err) => ProbeResult::Unreachable(Cause::Io(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tokio::net::{TcpListener, UnixListener};
    use tokio::task::JoinHandle;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn unix_endpoint(path: &Path) -> Endpoint {
        Endpoint {
            socket: Some(path.to_path_buf()),
            port: 0,
        }
    }

    fn reply_once(listener: UnixListener, reply: &'static [u8]) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], PING);
            stream.write_all(reply).await.unwrap();
        })
    }

    #[tokio::test]
    async fn invalid_endpoint_short_circuits() {
        let endpoint = Endpoint {
            socket: None,
            port: 0,
        };
        assert_eq!(
            probe(&endpoint, TIMEOUT).await,
            ProbeResult::Unreachable(Cause::InvalidEndpoint)
        );
    }

    #[tokio::test]
    async fn classifies_pong_as_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_0.sock");
        let server = reply_once(UnixListener::bind(&path).unwrap(), b"+PONG\r\n");

        assert_eq!(probe(&unix_endpoint(&path), TIMEOUT).await, ProbeResult::Alive);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn classifies_other_payload_as_unexpected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_0.sock");
        let server = reply_once(UnixListener::bind(&path).unwrap(), b"+PONGX\r\n");

        assert_eq!(
            probe(&unix_endpoint(&path), TIMEOUT).await,
            ProbeResult::UnexpectedReply("+PONGX".to_owned())
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_when_nobody_listens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_0.sock");
        assert!(matches!(
            probe(&unix_endpoint(&path), TIMEOUT).await,
            ProbeResult::Unreachable(Cause::Connect(_))
        ));
    }

    #[tokio::test]
    async fn probes_tcp_when_no_socket_is_configured() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], PING);
            stream.write_all(b"+PONG\r\n").await.unwrap();
        });

        let endpoint = Endpoint { socket: None, port };
        assert_eq!(probe(&endpoint, TIMEOUT).await, ProbeResult::Alive);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn wait_ready_retries_until_listener_binds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_0.sock");
        let bind_path = path.clone();
        let server = tokio::spawn(async move {
            time::sleep(Duration::from_millis(150)).await;
            let listener = UnixListener::bind(&bind_path).unwrap();
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            stream.read(&mut buf).await.unwrap();
            stream.write_all(b"+PONG\r\n").await.unwrap();
        });

        let result = wait_ready(
            &unix_endpoint(&path),
            TIMEOUT,
            10,
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(result, ProbeResult::Alive);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn wait_ready_gives_up_on_invalid_endpoint() {
        let endpoint = Endpoint {
            socket: None,
            port: 0,
        };
        let result = wait_ready(&endpoint, TIMEOUT, 10, Duration::from_millis(1)).await;
        assert_eq!(result, ProbeResult::Unreachable(Cause::InvalidEndpoint));
    }
}
