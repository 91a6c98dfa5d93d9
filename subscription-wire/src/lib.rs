//! Codec for the subscription announcement wire format.
//!
//! One announcement per datagram, little-endian throughout:
//!
//! ```text
//! +--------+--------+--------+--------+ ... body ...
//! | mod1   | size_l | size_h | mod2   |
//! +--------+--------+--------+--------+
//! ```
//!
//! The 4-byte header is the surrounding transport's framing (the uwsgi
//! packet header this format was lifted from), not this crate's concern —
//! [`decode_body`]/[`encode_body`] only see the body, a sequence of
//! length-prefixed key/value pairs:
//!
//! ```text
//! +--------+--------+---- key ----+--------+--------+---- value ----+
//! | klen_l | klen_h |   (klen)    | vlen_l | vlen_h |     (vlen)    |
//! +--------+--------+-------------+--------+--------+----------------+
//! ```
//!
//! Recognized keys are `key`, `address`, and the optional `modifier1`;
//! anything else is ignored. [`decode_datagram`]/[`encode_datagram`] add
//! the 4-byte header back in, for callers (like `subscription-proxy`) that
//! own whole UDP datagrams rather than pre-framed bodies.

use bytes::{Buf, BufMut, BytesMut};

const HEADER_LEN: usize = 4;

/// A decoded subscription announcement, ready to hand to
/// `subscription_core::Registry::announce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub key: Vec<u8>,
    pub address: Vec<u8>,
    pub modifier1: u16,
}

/// The transport-level framing byte pair. `modifier1`/`modifier2` here are
/// the protocol's routing bytes (e.g. a command opcode), distinct from the
/// `modifier1` key/value pair carried inside the announcement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub modifier1: u8,
    pub modifier2: u8,
    pub body_len: u16,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram is shorter than the 4-byte frame header")]
    TruncatedHeader,

    #[error("frame header declares {declared} body bytes but only {available} were received")]
    BodyLengthMismatch { declared: u16, available: usize },

    #[error("key/value pair length prefix extends past the end of the body")]
    Truncated,

    #[error("announcement body is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Decodes a full datagram: header plus body.
pub fn decode_datagram(buf: &[u8]) -> Result<(Header, Announcement), WireError> {
    if buf.len() < HEADER_LEN {
        return Err(WireError::TruncatedHeader);
    }
    let mut header_buf = &buf[..HEADER_LEN];
    let modifier1 = header_buf.get_u8();
    let body_len = header_buf.get_u16_le();
    let modifier2 = header_buf.get_u8();

    let body = &buf[HEADER_LEN..];
    if body.len() < body_len as usize {
        return Err(WireError::BodyLengthMismatch {
            declared: body_len,
            available: body.len(),
        });
    }

    let announcement = decode_body(&body[..body_len as usize])?;
    Ok((Header { modifier1, modifier2, body_len }, announcement))
}

/// Encodes a full datagram: header plus body.
pub fn encode_datagram(modifier1: u8, modifier2: u8, announcement: &Announcement) -> Vec<u8> {
    let body = encode_body(announcement);
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u8(modifier1);
    out.put_u16_le(body.len() as u16);
    out.put_u8(modifier2);
    out.extend_from_slice(&body);
    out.to_vec()
}

/// Decodes just the key/value body of an announcement.
pub fn decode_body(mut body: &[u8]) -> Result<Announcement, WireError> {
    let mut key: Option<Vec<u8>> = None;
    let mut address: Option<Vec<u8>> = None;
    let mut modifier1: u16 = 0;

    while !body.is_empty() {
        let name = read_chunk(&mut body)?;
        let value = read_chunk(&mut body)?;
        match name.as_slice() {
            b"key" => key = Some(value),
            b"address" => address = Some(value),
            b"modifier1" => {
                modifier1 = match value.as_slice() {
                    [] => 0,
                    [b0] => *b0 as u16,
                    [b0, b1, ..] => u16::from_le_bytes([*b0, *b1]),
                };
            }
            _ => {} // unrecognized keys are ignored per the wire format spec
        }
    }

    Ok(Announcement {
        key: key.ok_or(WireError::MissingField("key"))?,
        address: address.ok_or(WireError::MissingField("address"))?,
        modifier1,
    })
}

/// Encodes the key/value body of an announcement.
pub fn encode_body(announcement: &Announcement) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_pair(&mut out, b"key", &announcement.key);
    write_pair(&mut out, b"address", &announcement.address);
    if announcement.modifier1 != 0 {
        write_pair(&mut out, b"modifier1", &announcement.modifier1.to_le_bytes());
    }
    out.to_vec()
}

fn read_chunk(body: &mut &[u8]) -> Result<Vec<u8>, WireError> {
    if body.remaining() < 2 {
        return Err(WireError::Truncated);
    }
    let len = body.get_u16_le() as usize;
    if body.remaining() < len {
        return Err(WireError::Truncated);
    }
    let mut chunk = vec![0u8; len];
    body.copy_to_slice(&mut chunk);
    Ok(chunk)
}

fn write_pair(out: &mut BytesMut, name: &[u8], value: &[u8]) {
    out.put_u16_le(name.len() as u16);
    out.put_slice(name);
    out.put_u16_le(value.len() as u16);
    out.put_slice(value);
}
