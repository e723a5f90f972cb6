// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCPROS wire protocol: connection headers, payload framing and the
//! per-peer outbound queue.

pub mod frame;
mod header;
mod queue;

pub use header::{ConnectionHeader, HeaderError, MAX_HEADER_LEN};
pub use queue::OutboundQueue;

/// Handshake field names.
pub mod keys {
    pub const CALLER_ID: &str = "callerid";
    pub const TOPIC: &str = "topic";
    pub const SERVICE: &str = "service";
    pub const TYPE: &str = "type";
    pub const MD5SUM: &str = "md5sum";
    pub const MESSAGE_DEFINITION: &str = "message_definition";
    pub const TCP_NODELAY: &str = "tcp_nodelay";
    pub const PERSISTENT: &str = "persistent";
    pub const PROBE: &str = "probe";
    pub const ERROR: &str = "error";
}

/// Transport protocol name offered in `requestTopic`.
pub const PROTOCOL_NAME: &str = "TCPROS";

/// md5 value that matches any type (used by probes and introspection tools).
pub const ANY_MD5: &str = "*";

/// Bind a TCP listener on an ephemeral port of `ip`.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(ip: std::net::IpAddr) -> std::io::Result<tokio::net::TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let addr = std::net::SocketAddr::new(ip, 0);
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;

    let listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(listener)
}
