// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message type descriptors and the serialization trait.

use crate::error::{Error, Result};
use crate::tcpros::ConnectionHeader;
use md5::{Digest, Md5};
use std::time::SystemTime;

/// Name, md5 hash and definition text of a message type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType {
    name: String,
    md5sum: String,
    definition: String,
}

impl MessageType {
    pub fn new(
        name: impl Into<String>,
        md5sum: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            md5sum: md5sum.into(),
            definition: definition.into(),
        }
    }

    /// Build a type whose md5 is computed from `definition`.
    ///
    /// Only valid for definitions made of built-in field types; nested
    /// message fields need their own md5 substituted, which callers do by
    /// supplying the hash through [`MessageType::new`].
    pub fn from_definition(name: impl Into<String>, definition: impl Into<String>) -> Self {
        let definition = definition.into();
        Self {
            name: name.into(),
            md5sum: hex_md5(normalize_definition(&definition).as_bytes()),
            definition,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn md5sum(&self) -> &str {
        &self.md5sum
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }
}

/// Canonical text hashed for a definition: comments and blank lines removed,
/// whitespace collapsed, constants before fields.
pub fn normalize_definition(definition: &str) -> String {
    let mut constants = Vec::new();
    let mut fields = Vec::new();

    for line in definition.lines() {
        let line = line.trim();
        // String constants keep everything after '=' including '#'.
        let is_string_constant = line.starts_with("string ") && line.contains('=');
        let line = if is_string_constant {
            line
        } else {
            line.split('#').next().unwrap_or_default().trim()
        };
        if line.is_empty() {
            continue;
        }

        match line.split_once('=') {
            Some((decl, value)) => {
                let decl = decl.split_whitespace().collect::<Vec<_>>().join(" ");
                let value = if is_string_constant {
                    value.to_string()
                } else {
                    value.trim().to_string()
                };
                constants.push(format!("{}={}", decl, value));
            }
            None => fields.push(line.split_whitespace().collect::<Vec<_>>().join(" ")),
        }
    }

    constants.extend(fields);
    constants.join("\n")
}

pub(crate) fn hex_md5(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    let mut out = String::with_capacity(32);
    for b in digest.iter() {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// A message that can cross the wire.
pub trait RosMessage: Sized + Send + 'static {
    fn message_type() -> MessageType;

    /// Append the serialized form to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    fn decode(bytes: &[u8]) -> Result<Self>;

    /// Serialize into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Metadata delivered alongside a message to event-aware callbacks.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// `callerid` of the sending node, or its URI if the header lacked one.
    pub publisher_name: String,
    pub receipt_time: SystemTime,
    /// Header the publisher sent during the handshake.
    pub connection_header: ConnectionHeader,
}

/// Cursor over a little-endian ROS serialized buffer.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Decode(format!(
                "need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    /// u32 length followed by UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Fail if bytes remain.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(Error::Decode(format!(
                "{} trailing bytes",
                self.remaining()
            )))
        }
    }
}

pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}
