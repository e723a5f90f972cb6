// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCPROS connection header.
//!
//! ```text
//! +----------------+----------------+------------------+-----+
//! | total (4B LE)  | len (4B LE)    | "key=value" UTF-8| ... |
//! +----------------+----------------+------------------+-----+
//! ```

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on an incoming header block (anti-OOM).
pub const MAX_HEADER_LEN: usize = 1024 * 1024;

/// Errors decoding or exchanging a connection header.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("header block of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("header block truncated")]
    Truncated,

    #[error("header field without '=': {0:?}")]
    MissingSeparator(String),

    #[error("header field is not valid UTF-8")]
    InvalidUtf8,

    #[error("header lacks required field '{0}'")]
    MissingField(String),
}

/// Ordered `key=value` metadata exchanged at connection start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    fields: Vec<(String, String)>,
}

impl ConnectionHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key`, replacing an existing value in place.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Like [`get`](Self::get) but a missing key is an error.
    pub fn require(&self, key: &str) -> Result<&str, HeaderError> {
        self.get(key)
            .ok_or_else(|| HeaderError::MissingField(key.to_string()))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode including the leading total length.
    pub fn encode(&self) -> Vec<u8> {
        let body_len: usize = self
            .fields
            .iter()
            .map(|(k, v)| 4 + k.len() + 1 + v.len())
            .sum();

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        for (k, v) in &self.fields {
            let field_len = (k.len() + 1 + v.len()) as u32;
            buf.extend_from_slice(&field_len.to_le_bytes());
            buf.extend_from_slice(k.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(v.as_bytes());
        }
        buf
    }

    /// Decode a header body (the bytes after the total length).
    pub fn decode(mut body: &[u8]) -> Result<Self, HeaderError> {
        let mut header = Self::new();
        while !body.is_empty() {
            if body.len() < 4 {
                return Err(HeaderError::Truncated);
            }
            let field_len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
            body = &body[4..];
            if body.len() < field_len {
                return Err(HeaderError::Truncated);
            }
            let (field, rest) = body.split_at(field_len);
            body = rest;

            let field = std::str::from_utf8(field).map_err(|_| HeaderError::InvalidUtf8)?;
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| HeaderError::MissingSeparator(field.to_string()))?;
            header.insert(key, value);
        }
        Ok(header)
    }

    /// Read one header block from `reader`.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, HeaderError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len).await?;
        let total = u32::from_le_bytes(len) as usize;
        if total > MAX_HEADER_LEN {
            return Err(HeaderError::TooLarge(total));
        }

        let mut body = vec![0u8; total];
        reader.read_exact(&mut body).await?;
        Self::decode(&body)
    }

    /// Write this header to `writer` and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), HeaderError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectionHeader {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Self::new();
        for (k, v) in iter {
            let key: String = k.into();
            header.insert(&key, v);
        }
        header
    }
}
