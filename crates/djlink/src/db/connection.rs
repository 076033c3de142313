// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sticky query connections.
//!
//! Each device gets at most one TCP connection, created on first use and
//! kept for later requests. The query server's port is resolved once per
//! device through the directory probe and cached for the device's lifetime.
//!
//! Replies carry no length framing, so receive loops accumulate bytes and
//! reparse until a whole message decodes, bounded by a retry budget. Read
//! timeouts count against the same budget.
//!
//! Connection lifecycle: absent -> resolving -> handshaking -> ready ->
//! closing -> absent. A failure at any step leaves the slot absent so a
//! later request retries establishment.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    build_port_query, parse_port_reply, Field, Message, MessageType, ParseError,
    SETUP_TRANSACTION_ID,
};

/// Read chunk size for reply accumulation.
const RECV_CHUNK: usize = 4096;

/// One established query connection.
pub struct Connection {
    stream: TcpStream,
    /// Idle sweeps left before the connection is closed.
    ttl: u32,
    next_transaction_id: u32,
}

impl Connection {
    /// Fresh transaction id, strictly increasing per connection.
    pub fn next_transaction_id(&mut self) -> u32 {
        let id = self.next_transaction_id;
        self.next_transaction_id += 1;
        id
    }

    /// Send one message.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        let bytes = message.build()?;
        self.stream.write_all(&bytes)?;
        Ok(())
    }

    /// Receive one message, accumulating bytes until it parses.
    pub fn receive_message(&mut self, max_tries: u32) -> Result<Message> {
        let mut buf = Vec::new();
        let mut tries = 0;
        while tries < max_tries {
            if self.read_chunk(&mut buf)? {
                match Message::parse(&buf) {
                    Ok((message, _)) => return Ok(message),
                    Err(ParseError::Incomplete) => {
                        log::debug!(
                            "db: received {} bytes but parsing failed, trying to receive more",
                            buf.len()
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            tries += 1;
        }
        Err(Error::ReceiveTimeout { tries })
    }

    /// Receive a render reply stream. Terminates only once the whole buffer
    /// parses as messages *and* the last of them is a `menu_footer`; either
    /// condition failing costs one try.
    pub fn receive_render_stream(&mut self, max_tries: u32) -> Result<Vec<Message>> {
        let mut buf = Vec::new();
        let mut tries = 0;
        while tries < max_tries {
            if self.read_chunk(&mut buf)? {
                match Message::parse_sequence(&buf) {
                    Ok(messages) => {
                        if messages.last().map(|m| m.kind) == Some(MessageType::MenuFooter) {
                            return Ok(messages);
                        }
                        log::debug!(
                            "db: render stream without menu_footer @ {} bytes, trying to receive more",
                            buf.len()
                        );
                    }
                    Err(ParseError::Incomplete) => {
                        log::debug!(
                            "db: failed to parse render reply ({} bytes), trying to receive more",
                            buf.len()
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            tries += 1;
        }
        Err(Error::ReceiveTimeout { tries })
    }

    /// One read into `buf`. Returns whether new bytes arrived; a read
    /// timeout yields `false` so the caller can charge its budget.
    fn read_chunk(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        let mut chunk = [0u8; RECV_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Per-device connection table, used only by the worker.
pub struct ConnectionPool {
    config: ClientConfig,
    /// Resolved query server addresses, cached per device lifetime.
    ports: HashMap<u8, SocketAddr>,
    connections: HashMap<u8, Connection>,
}

impl ConnectionPool {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            ports: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    /// Existing connection for `device`, or a freshly established one. Use
    /// refreshes the idle TTL.
    pub fn checkout(&mut self, device: u8, ip: Ipv4Addr) -> Result<&mut Connection> {
        if !self.connections.contains_key(&device) {
            let addr = self.resolve_port(device, ip)?;
            let connection = establish(&self.config, device, addr)?;
            self.connections.insert(device, connection);
        }

        let ttl = self.config.connection_ttl_ticks;
        let connection = self
            .connections
            .get_mut(&device)
            .ok_or_else(|| Error::ConnectionFailed("connection table desynchronized".into()))?;
        connection.ttl = ttl;
        Ok(connection)
    }

    /// Drop the connection of `device` after a failed exchange; the next
    /// request re-establishes it.
    pub fn invalidate(&mut self, device: u8) {
        if self.connections.remove(&device).is_some() {
            log::info!("db: dropping connection to device {} after failure", device);
        }
    }

    /// Idle sweep: connections untouched for the whole TTL window close.
    pub fn sweep(&mut self) {
        self.connections.retain(|device, connection| {
            if connection.ttl == 0 {
                log::info!("db: closing idle connection to device {}", device);
                false
            } else {
                connection.ttl -= 1;
                true
            }
        });
    }

    /// Ask the directory service on the device for its query server port.
    fn resolve_port(&mut self, device: u8, ip: Ipv4Addr) -> Result<SocketAddr> {
        if let Some(addr) = self.ports.get(&device) {
            return Ok(*addr);
        }

        let service = SocketAddr::V4(SocketAddrV4::new(ip, self.config.query_port_service));
        let mut stream = TcpStream::connect_timeout(&service, self.config.connect_timeout)
            .map_err(|e| Error::ConnectionFailed(format!("port probe to {}: {}", service, e)))?;
        stream.set_read_timeout(Some(self.config.read_timeout)).ok();

        stream.write_all(&build_port_query())?;
        let mut reply = [0u8; 2];
        stream
            .read_exact(&mut reply)
            .map_err(|e| Error::ConnectionFailed(format!("port probe reply: {}", e)))?;
        let port = parse_port_reply(&reply)?;

        let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
        log::info!("db: query server of device {} at {}", device, addr);
        self.ports.insert(device, addr);
        Ok(addr)
    }
}

/// Connect to the query server and run the two-step handshake.
fn establish(config: &ClientConfig, device: u8, addr: SocketAddr) -> Result<Connection> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_recv_buffer_size(config.recv_buffer_size)?;
    socket
        .connect_timeout(&addr.into(), config.connect_timeout)
        .map_err(|e| Error::ConnectionFailed(format!("connect to {}: {}", addr, e)))?;

    let stream: TcpStream = socket.into();
    stream.set_read_timeout(Some(config.read_timeout))?;
    stream.set_nodelay(true).ok();

    let mut connection = Connection {
        stream,
        ttl: config.connection_ttl_ticks,
        next_transaction_id: 1,
    };

    // Bare int32 greeting; the 16-byte reply is parsed on a best-effort
    // basis only.
    connection.stream.write_all(&Field::Int32(1).build())?;
    let mut reply = [0u8; 16];
    let n = connection.stream.read(&mut reply)?;
    match Field::parse(&reply[..n]) {
        Ok((field, _)) => log::debug!("db: initial packet reply {:?}", field),
        Err(_) => log::warn!("db: failed to parse initial packet reply, ignoring"),
    }

    // Setup query under the reserved transaction id.
    let setup = Message::new(
        SETUP_TRANSACTION_ID,
        MessageType::Setup,
        vec![Field::Int32(u32::from(config.own_device_number))],
    );
    connection.send(&setup)?;
    let mut reply = [0u8; 48];
    let n = connection.stream.read(&mut reply)?;
    if n == 0 {
        return Err(Error::ConnectionFailed(format!(
            "device {} closed the setup exchange",
            device
        )));
    }
    match Message::parse(&reply[..n]) {
        Ok((message, _)) => log::info!(
            "db: connected to device {}",
            message.arg_u32(1).unwrap_or(u32::from(device))
        ),
        Err(e) => log::debug!("db: setup reply not parseable: {}", e),
    }

    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        (client, server)
    }

    fn test_connection(stream: TcpStream, read_timeout: Duration) -> Connection {
        stream.set_read_timeout(Some(read_timeout)).expect("timeout");
        Connection {
            stream,
            ttl: 30,
            next_transaction_id: 1,
        }
    }

    #[test]
    fn test_transaction_ids_are_monotonic() {
        let (client, _server) = stream_pair();
        let mut connection = test_connection(client, Duration::from_millis(10));
        assert_eq!(connection.next_transaction_id(), 1);
        assert_eq!(connection.next_transaction_id(), 2);
        assert_eq!(connection.next_transaction_id(), 3);
    }

    #[test]
    fn test_receive_message_across_split_writes() {
        let (client, mut server) = stream_pair();
        let mut connection = test_connection(client, Duration::from_millis(50));

        let message = Message::new(7, MessageType::Success, vec![Field::Int32(0), Field::Int32(3)]);
        let bytes = message.build().expect("build");
        let split = bytes.len() / 2;

        let (head, tail) = (bytes[..split].to_vec(), bytes[split..].to_vec());
        let writer = thread::spawn(move || {
            server.write_all(&head).expect("write head");
            thread::sleep(Duration::from_millis(30));
            server.write_all(&tail).expect("write tail");
        });

        let received = connection.receive_message(30).expect("receive");
        assert_eq!(received, message);
        writer.join().expect("join");
    }

    #[test]
    fn test_receive_message_budget_exhaustion() {
        let (client, mut server) = stream_pair();
        let mut connection = test_connection(client, Duration::from_millis(10));

        // A partial frame and then silence.
        server.write_all(&[0x11, 0x87]).expect("write");

        match connection.receive_message(5) {
            Err(Error::ReceiveTimeout { tries: 5 }) => {}
            other => panic!("expected ReceiveTimeout, got {:?}", other.map(|m| m.kind)),
        }
    }

    #[test]
    fn test_receive_message_eof() {
        let (client, server) = stream_pair();
        let mut connection = test_connection(client, Duration::from_millis(50));
        drop(server);

        match connection.receive_message(5) {
            Err(Error::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {:?}", other.map(|m| m.kind)),
        }
    }

    #[test]
    fn test_render_stream_requires_footer() {
        let (client, mut server) = stream_pair();
        let mut connection = test_connection(client, Duration::from_millis(10));

        // A complete header message, but no footer ever follows.
        let header = Message::new(1, MessageType::MenuHeader, vec![]);
        server.write_all(&header.build().expect("build")).expect("write");

        match connection.receive_render_stream(4) {
            Err(Error::ReceiveTimeout { tries: 4 }) => {}
            other => panic!("expected ReceiveTimeout, got {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn test_render_stream_terminates_on_footer() {
        let (client, mut server) = stream_pair();
        let mut connection = test_connection(client, Duration::from_millis(50));

        let mut bytes = Vec::new();
        bytes.extend(Message::new(1, MessageType::MenuHeader, vec![]).build().expect("build"));
        bytes.extend(Message::new(2, MessageType::MenuFooter, vec![]).build().expect("build"));
        server.write_all(&bytes).expect("write");

        let messages = connection.receive_render_stream(10).expect("receive");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].kind, MessageType::MenuFooter);
    }

    #[test]
    fn test_pool_sweep_closes_idle_connections() {
        let mut pool = ConnectionPool::new(ClientConfig {
            connection_ttl_ticks: 2,
            ..Default::default()
        });
        let (client, _server) = stream_pair();
        pool.connections.insert(
            1,
            Connection {
                stream: client,
                ttl: 2,
                next_transaction_id: 1,
            },
        );

        pool.sweep();
        pool.sweep();
        assert_eq!(pool.connections.len(), 1);
        pool.sweep();
        assert!(pool.connections.is_empty());
    }

    #[test]
    fn test_pool_invalidate() {
        let mut pool = ConnectionPool::new(ClientConfig::default());
        let (client, _server) = stream_pair();
        pool.connections.insert(
            2,
            Connection {
                stream: client,
                ttl: 30,
                next_transaction_id: 5,
            },
        );

        pool.invalidate(2);
        assert!(pool.connections.is_empty());
        // Idempotent on unknown devices.
        pool.invalidate(2);
    }
}
