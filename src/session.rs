//! OpenOCD TCL RPC session
//!
//! Talks to OpenOCD's TCL server (default port 6666).
//! Protocol: send command as UTF-8, terminated by 0x1a (SUB character).
//! Response: UTF-8 text terminated by 0x1a. There is no length prefix and no
//! escaping, so a command must never contain the terminator itself.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, RpcError};

/// TCL protocol terminator byte (ASCII SUB / Ctrl-Z)
pub const COMMAND_TOKEN: u8 = 0x1a;

/// Command sent before the socket is closed
const EXIT_COMMAND: &str = "exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    /// A transport error left the stream mid-message
    Broken,
    Closed,
}

/// One live connection to an OpenOCD TCL server.
///
/// Exchanges take `&mut self`, so only one command is ever in flight and
/// responses come back in the order commands were sent.
pub struct RpcSession<S = TcpStream> {
    stream: S,
    chunk_size: usize,
    verbose: bool,
    io_timeout: Option<Duration>,
    /// Bytes received beyond the last frame boundary
    pending: Vec<u8>,
    state: State,
}

impl RpcSession<TcpStream> {
    /// Connect to `host:port` with default chunk size and no deadline.
    pub async fn open(host: &str, port: u16, verbose: bool) -> Result<Self> {
        let config = Config {
            host: host.to_string(),
            port,
            verbose,
            ..Config::default()
        };
        Self::connect(&config).await
    }

    /// Connect using a full configuration. No retry is attempted.
    pub async fn connect(config: &Config) -> Result<Self> {
        let address = config.address();
        let stream = with_deadline(config.io_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                RpcError::ConnectionFailed(format!("Timed out connecting to {}", address))
            })?
            .map_err(|e| RpcError::ConnectionFailed(format!("{}: {}", address, e)))?;

        info!("Connected to OpenOCD TCL RPC at {}", address);
        Self::with_stream(stream, config)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RpcSession<S> {
    /// Wrap an already connected stream.
    pub fn with_stream(stream: S, config: &Config) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(RpcError::InvalidArgument(
                "chunk size must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            stream,
            chunk_size: config.chunk_size,
            verbose: config.verbose,
            io_timeout: config.io_timeout,
            pending: Vec::new(),
            state: State::Ready,
        })
    }

    /// Whether the session still accepts commands
    pub fn is_open(&self) -> bool {
        self.state == State::Ready
    }

    /// Send a TCL command and wait for its framed response.
    ///
    /// Any transport error is fatal to the session: later calls fail with
    /// [`RpcError::SessionClosed`].
    pub async fn send(&mut self, command: &str) -> Result<String> {
        if self.state != State::Ready {
            return Err(RpcError::SessionClosed);
        }

        let result = self.exchange(command).await;
        if let Err(e) = &result {
            if e.desynchronizes() {
                warn!("Session unusable after transport error: {}", e);
                self.state = State::Broken;
            }
        }
        result
    }

    async fn exchange(&mut self, command: &str) -> Result<String> {
        debug!("OpenOCD TCL command: {}", command);

        self.write_command(command).await?;
        let frame = self.read_frame().await?;

        let response = String::from_utf8(frame).map_err(|e| {
            RpcError::DecodeFailed(format!("Invalid UTF-8 in response: {}", e))
        })?;

        debug!("OpenOCD TCL response: {}", response);
        Ok(response)
    }

    async fn write_command(&mut self, command: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(command.len() + 1);
        payload.extend_from_slice(command.as_bytes());
        payload.push(COMMAND_TOKEN);

        if self.verbose {
            info!("<- {}", payload.escape_ascii());
        }

        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(&payload).await?;
            stream.flush().await
        };

        with_deadline(self.io_timeout, write)
            .await?
            .map_err(|e| RpcError::WriteFailed(e.to_string()))
    }

    /// Read until a terminator shows up, returning the bytes before it.
    ///
    /// Only freshly read bytes are scanned; anything already buffered was
    /// scanned when it arrived. Whitespace after a terminator is dropped only
    /// when it arrives in the same read; a tail delivered by a later read
    /// becomes the start of the next response.
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        if let Some(pos) = find_token(&self.pending) {
            return Ok(self.take_frame(pos));
        }

        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            let n = with_deadline(self.io_timeout, self.stream.read(&mut chunk))
                .await?
                .map_err(|e| RpcError::ReadFailed(e.to_string()))?;

            if n == 0 {
                return Err(RpcError::ConnectionClosed);
            }

            let received = &chunk[..n];
            if self.verbose {
                info!("-> {}", received.escape_ascii());
            }

            let start = self.pending.len();
            self.pending.extend_from_slice(received);

            if let Some(pos) = find_token(received) {
                return Ok(self.take_frame(start + pos));
            }
        }
    }

    /// Split the buffer at the terminator at `pos`, keeping what follows it.
    fn take_frame(&mut self, pos: usize) -> Vec<u8> {
        let rest = self.pending.split_off(pos + 1);
        let mut frame = std::mem::replace(&mut self.pending, rest);
        frame.pop();

        // Trailing separators after a response are not part of the next one
        if self.pending.iter().all(u8::is_ascii_whitespace) {
            self.pending.clear();
        }
        frame
    }

    /// Send `exit` if possible, then shut the stream down.
    ///
    /// Never fails; calling it twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }

        info!("Closing OpenOCD TCL RPC session");

        // Attempted even on a broken session
        if let Err(e) = self.write_command(EXIT_COMMAND).await {
            warn!("Sending '{}' failed (non-fatal): {}", EXIT_COMMAND, e);
        }
        self.state = State::Closed;
        self.pending.clear();

        match with_deadline(self.io_timeout, self.stream.shutdown()).await {
            Ok(Err(e)) => debug!("Socket shutdown: {}", e),
            Err(e) => debug!("Socket shutdown: {}", e),
            Ok(Ok(())) => {}
        }
    }
}

fn find_token(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == COMMAND_TOKEN)
}

/// Apply an optional deadline to an I/O future.
async fn with_deadline<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RpcError::Timeout),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    fn config(chunk_size: usize) -> Config {
        Config {
            chunk_size,
            ..Config::default()
        }
    }

    /// Fake server: reads one command per reply, answers with the raw reply bytes.
    /// Returns every command it received, terminator included.
    fn fake_server(server: DuplexStream, replies: &[&str]) -> JoinHandle<Vec<Vec<u8>>> {
        let replies: Vec<Vec<u8>> = replies.iter().map(|r| r.as_bytes().to_vec()).collect();
        tokio::spawn(async move {
            let mut reader = BufReader::new(server);
            let mut received = Vec::new();
            for reply in replies {
                let mut command = Vec::new();
                if reader.read_until(COMMAND_TOKEN, &mut command).await.unwrap() == 0 {
                    break;
                }
                received.push(command);
                reader.get_mut().write_all(&reply).await.unwrap();
            }
            received
        })
    }

    #[tokio::test]
    async fn test_send_appends_single_terminator() {
        let (client, server) = duplex(64);
        let server = fake_server(server, &["halted\x1a"]);
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        let response = session.send("targets").await.unwrap();
        assert_eq!(response, "halted");

        let received = server.await.unwrap();
        assert_eq!(received, vec![b"targets\x1a".to_vec()]);
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let (client, server) = duplex(64);
        let _server = fake_server(server, &["0x10000000: deadc0de \x1a"]);
        let mut session = RpcSession::with_stream(client, &config(3)).unwrap();

        let response = session.send("mdw 0x10000000").await.unwrap();
        assert_eq!(response, "0x10000000: deadc0de ");
    }

    #[tokio::test]
    async fn test_terminator_alone_in_later_read() {
        let (client, server) = duplex(64);
        let _server = fake_server(server, &["hello\x1a"]);
        let mut session = RpcSession::with_stream(client, &config(5)).unwrap();

        assert_eq!(session.send("echo hello").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_multiline_response_kept_verbatim() {
        let (client, server) = duplex(64);
        let _server = fake_server(server, &["line one\nline two\n\x1a"]);
        let mut session = RpcSession::with_stream(client, &config(4)).unwrap();

        assert_eq!(session.send("dump").await.unwrap(), "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_empty_response() {
        let (client, server) = duplex(64);
        let _server = fake_server(server, &["\x1a"]);
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        assert_eq!(session.send("resume").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_trailing_whitespace_after_terminator_dropped() {
        let (client, server) = duplex(64);
        let _server = fake_server(server, &["first\x1a\r\n", "second\x1a"]);
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        assert_eq!(session.send("a").await.unwrap(), "first");
        assert_eq!(session.send("b").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_bytes_past_terminator_start_next_response() {
        let (client, server) = duplex(64);
        let server = fake_server(server, &["one\x1atwo\x1a", ""]);
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        assert_eq!(session.send("a").await.unwrap(), "one");
        assert_eq!(session.send("b").await.unwrap(), "two");

        let received = server.await.unwrap();
        assert_eq!(received, vec![b"a\x1a".to_vec(), b"b\x1a".to_vec()]);
    }

    #[tokio::test]
    async fn test_remote_close_mid_receive() {
        let (client, server) = duplex(64);
        let server = tokio::spawn(async move {
            let mut reader = BufReader::new(server);
            let mut command = Vec::new();
            reader.read_until(COMMAND_TOKEN, &mut command).await.unwrap();
            reader.get_mut().write_all(b"partial").await.unwrap();
        });
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        let err = session.send("targets").await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
        assert!(!session.is_open());

        let err = session.send("targets").await.unwrap_err();
        assert!(matches!(err, RpcError::SessionClosed));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_session_usable() {
        let (client, server) = duplex(64);
        let _server = tokio::spawn(async move {
            let mut reader = BufReader::new(server);
            for reply in [&b"\xff\xfe\x1a"[..], &b"fine\x1a"[..]] {
                let mut command = Vec::new();
                reader.read_until(COMMAND_TOKEN, &mut command).await.unwrap();
                reader.get_mut().write_all(reply).await.unwrap();
            }
        });
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        let err = session.send("a").await.unwrap_err();
        assert!(matches!(err, RpcError::DecodeFailed(_)));
        assert!(session.is_open());
        assert_eq!(session.send("b").await.unwrap(), "fine");
    }

    #[tokio::test]
    async fn test_read_timeout_breaks_session() {
        let (client, _server) = duplex(64);
        let config = Config {
            io_timeout: Some(Duration::from_millis(50)),
            ..Config::default()
        };
        let mut session = RpcSession::with_stream(client, &config).unwrap();

        let err = session.send("halt").await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_close_sends_exit_and_blocks_further_sends() {
        let (client, server) = duplex(64);
        let server = tokio::spawn(async move {
            let mut reader = BufReader::new(server);
            let mut command = Vec::new();
            reader.read_until(COMMAND_TOKEN, &mut command).await.unwrap();
            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).await.unwrap();
            command
        });
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        session.close().await;
        session.close().await;
        assert!(!session.is_open());
        assert!(matches!(session.send("halt").await, Err(RpcError::SessionClosed)));

        assert_eq!(server.await.unwrap(), b"exit\x1a".to_vec());
    }

    #[tokio::test]
    async fn test_close_after_timeout_still_sends_exit() {
        let (client, server) = duplex(64);
        let server = tokio::spawn(async move {
            let mut received = Vec::new();
            let mut server = server;
            server.read_to_end(&mut received).await.unwrap();
            received
        });
        let config = Config {
            io_timeout: Some(Duration::from_millis(30)),
            ..Config::default()
        };
        let mut session = RpcSession::with_stream(client, &config).unwrap();

        assert!(matches!(session.send("halt").await, Err(RpcError::Timeout)));
        session.close().await;

        assert_eq!(server.await.unwrap(), b"halt\x1aexit\x1a".to_vec());
    }

    #[tokio::test]
    async fn test_whitespace_tail_in_later_read_prefixes_next_response() {
        let (client, server) = duplex(64);
        let _server = fake_server(server, &["first\x1a", "\r\nsecond\x1a"]);
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        assert_eq!(session.send("a").await.unwrap(), "first");
        assert_eq!(session.send("b").await.unwrap(), "\r\nsecond");
    }

    #[tokio::test]
    async fn test_close_after_remote_hangup_does_not_fail() {
        let (client, server) = duplex(64);
        drop(server);
        let mut session = RpcSession::with_stream(client, &config(4096)).unwrap();

        session.close().await;
        assert!(!session.is_open());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let (client, _server) = duplex(64);
        let result = RpcSession::with_stream(client, &config(0));
        assert!(matches!(result, Err(RpcError::InvalidArgument(_))));
    }

    #[test]
    fn test_terminator_value() {
        // ASCII SUB (0x1a = 26)
        assert_eq!(COMMAND_TOKEN, 0x1a);
        assert_eq!(COMMAND_TOKEN, 26);
    }
}
