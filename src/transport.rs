//! Framed transports
//!
//! The device link exchanges newline-delimited JSON frames over a
//! [`Transport`]. [`TcpTransport`] is the real client socket with an
//! explicit connect timeout and non-blocking reads; [`MemoryTransport`]
//! is an in-process double for tests, with scriptable connection
//! behavior.
//!
//! `poll_frame` never blocks. A transport signals a lost peer by
//! turning `is_connected` false; the link notices on its next poll.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::warn;

use crate::error::{Result, TransportError};

/// Byte-stream transport carrying one JSON text per frame.
pub trait Transport {
    /// Open a connection, failing after `timeout_ms`
    fn connect(&mut self, host: &str, port: u16, timeout_ms: u64) -> Result<()>;

    /// Close the connection, a no-op when already closed
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Send one frame
    fn send(&mut self, frame: &str) -> Result<()>;

    /// Take the next complete received frame, without blocking
    fn poll_frame(&mut self) -> Result<Option<String>>;
}

/// In-process transport double.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    connected: bool,
    refuse: bool,
    inbound: VecDeque<String>,
    sent: Vec<String>,
    connect_attempts: u32,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connect attempts fail
    pub fn refuse_connections(&mut self, refuse: bool) {
        self.refuse = refuse;
    }

    /// Queue a frame for the device to receive
    pub fn push_inbound(&mut self, frame: &str) {
        self.inbound.push_back(frame.to_string());
    }

    /// Frames the device has sent, oldest first
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Drain the sent frames
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// How many times connect was attempted
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Simulate the peer closing the connection
    pub fn drop_connection(&mut self) {
        self.connected = false;
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, _host: &str, _port: u16, _timeout_ms: u64) -> Result<()> {
        self.connect_attempts += 1;
        if self.refuse {
            return Err(TransportError::ConnectFailed {
                reason: "connection refused".to_string(),
            }
            .into());
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, frame: &str) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected.into());
        }
        self.sent.push(frame.to_string());
        Ok(())
    }

    fn poll_frame(&mut self) -> Result<Option<String>> {
        if !self.connected {
            return Ok(None);
        }
        Ok(self.inbound.pop_front())
    }
}

/// Non-blocking TCP client with newline framing.
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    rx: Vec<u8>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16, timeout_ms: u64) -> Result<()> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectFailed {
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| TransportError::ConnectFailed {
                reason: format!("no address for {}", host),
            })?;

        let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(timeout_ms))
            .map_err(|e| TransportError::ConnectFailed {
                reason: e.to_string(),
            })?;
        stream
            .set_nonblocking(true)
            .map_err(|e| TransportError::ConnectFailed {
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);

        self.stream = Some(stream);
        self.rx.clear();
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.rx.clear();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, frame: &str) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::NotConnected.into());
        };
        let write = stream
            .write_all(frame.as_bytes())
            .and_then(|_| stream.write_all(b"\n"));
        if let Err(e) = write {
            self.stream = None;
            return Err(TransportError::SendFailed {
                reason: e.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn poll_frame(&mut self) -> Result<Option<String>> {
        if let Some(stream) = self.stream.as_mut() {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        // orderly shutdown by the peer
                        self.stream = None;
                        break;
                    }
                    Ok(n) => self.rx.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("receive failed: {}", e);
                        self.stream = None;
                        break;
                    }
                }
            }
        }

        if let Some(pos) = self.rx.iter().position(|&b| b == b'\n') {
            let mut frame: Vec<u8> = self.rx.drain(..=pos).collect();
            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
            return Ok(Some(String::from_utf8_lossy(&frame).into_owned()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_memory_send_requires_connection() {
        let mut t = MemoryTransport::new();
        assert!(t.send("{}").is_err());

        t.connect("server", 8003, 1000).unwrap();
        assert!(t.is_connected());
        t.send(r#"{"t":"hb"}"#).unwrap();
        assert_eq!(t.sent(), [r#"{"t":"hb"}"#.to_string()]);
    }

    #[test]
    fn test_memory_refused_connect() {
        let mut t = MemoryTransport::new();
        t.refuse_connections(true);
        assert!(t.connect("server", 8003, 1000).is_err());
        assert!(!t.is_connected());
        assert_eq!(t.connect_attempts(), 1);

        t.refuse_connections(false);
        t.connect("server", 8003, 1000).unwrap();
        assert_eq!(t.connect_attempts(), 2);
    }

    #[test]
    fn test_memory_inbound_is_fifo() {
        let mut t = MemoryTransport::new();
        t.push_inbound("first");
        t.push_inbound("second");

        // nothing is delivered while disconnected
        assert_eq!(t.poll_frame().unwrap(), None);

        t.connect("server", 8003, 1000).unwrap();
        assert_eq!(t.poll_frame().unwrap().as_deref(), Some("first"));
        assert_eq!(t.poll_frame().unwrap().as_deref(), Some("second"));
        assert_eq!(t.poll_frame().unwrap(), None);
    }

    #[test]
    fn test_memory_drop_connection() {
        let mut t = MemoryTransport::new();
        t.connect("server", 8003, 1000).unwrap();
        t.drop_connection();
        assert!(!t.is_connected());
        assert!(t.send("{}").is_err());
    }

    #[test]
    fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(sock.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            sock.write_all(b"{\"t\":\"ack\"}\n").unwrap();
            line
        });

        let mut t = TcpTransport::new();
        t.connect(&addr.ip().to_string(), addr.port(), 2000).unwrap();
        t.send(r#"{"t":"hb"}"#).unwrap();

        let mut got = None;
        for _ in 0..200 {
            if let Some(frame) = t.poll_frame().unwrap() {
                got = Some(frame);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got.as_deref(), Some(r#"{"t":"ack"}"#));
        assert_eq!(server.join().unwrap().trim(), r#"{"t":"hb"}"#);
    }

    #[test]
    fn test_tcp_connect_refused() {
        // bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut t = TcpTransport::new();
        assert!(t.connect(&addr.ip().to_string(), addr.port(), 500).is_err());
        assert!(!t.is_connected());
    }

    #[test]
    fn test_tcp_peer_close_turns_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut t = TcpTransport::new();
        t.connect(&addr.ip().to_string(), addr.port(), 2000).unwrap();
        let (sock, _) = listener.accept().unwrap();
        drop(sock);

        let mut attempts = 0;
        while t.is_connected() && attempts < 200 {
            let _ = t.poll_frame().unwrap();
            thread::sleep(Duration::from_millis(5));
            attempts += 1;
        }
        assert!(!t.is_connected());
    }
}
