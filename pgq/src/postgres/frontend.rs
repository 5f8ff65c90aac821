//! Frontend message assembly.
//!
//! Messages are framed as `kind(1) | length(4, big-endian, inclusive of
//! itself) | payload`; the startup message omits the kind byte.
use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;

/// Protocol version 3.0.
const PROTOCOL_VERSION: i32 = 196608;

pub(crate) const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Reusable frontend message buffer.
///
/// Append operations become no-ops once an error is captured; the first
/// error surfaces at [`finalize_message`](Self::finalize_message).
#[derive(Debug, Default)]
pub struct MessageBuilder {
    buf: BytesMut,
    length_offset: usize,
    first_error: Option<EncodeError>,
}

impl MessageBuilder {
    pub fn reset(&mut self) {
        self.first_error = None;
        self.buf.clear();
        self.length_offset = 0;
    }

    /// The assembled bytes, ready to be written to the socket.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn new_message(&mut self, kind: u8) {
        assert!(self.first_error.is_none(), "new message on a poisoned builder");
        self.buf.put_u8(kind);
        self.length_offset = self.buf.len();
        self.buf.put_i32(0); // message length, set later
    }

    fn new_message_length_only(&mut self) {
        assert!(self.first_error.is_none(), "new message on a poisoned builder");
        self.length_offset = self.buf.len();
        self.buf.put_i32(0); // message length, set later
    }

    fn append_u8(&mut self, byte: u8) {
        if self.first_error.is_some() {
            return;
        }
        self.buf.put_u8(byte);
    }

    fn append_i16(&mut self, n: i64) {
        if self.first_error.is_some() {
            return;
        }
        match i16::try_from(n) {
            Ok(n) => self.buf.put_i16(n),
            Err(_) => self.first_error = Some(EncodeError::IntOverflow),
        }
    }

    fn append_i32(&mut self, n: i64) {
        if self.first_error.is_some() {
            return;
        }
        match i32::try_from(n) {
            Ok(n) => self.buf.put_i32(n),
            Err(_) => self.first_error = Some(EncodeError::IntOverflow),
        }
    }

    /// Append `s` with a terminating nul. An embedded nul byte poisons
    /// the builder.
    fn append_str(&mut self, s: &str) {
        if self.first_error.is_some() {
            return;
        }
        if s.bytes().any(|b| b == 0) {
            self.first_error = Some(EncodeError::NulByte);
            return;
        }
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
    }

    /// Append `s` without a terminator (SASL payloads).
    fn append_raw_str(&mut self, s: &str) {
        if self.first_error.is_some() {
            return;
        }
        self.buf.put_slice(s.as_bytes());
    }

    /// Patch the length placeholder and surface any captured error.
    fn finalize_message(&mut self) -> Result<(), EncodeError> {
        if let Some(err) = self.first_error {
            return Err(err);
        }
        let length = match u32::try_from(self.buf.len() - self.length_offset) {
            Ok(length) => length,
            Err(_) => {
                self.first_error = Some(EncodeError::IntOverflow);
                return Err(EncodeError::IntOverflow);
            }
        };
        self.buf[self.length_offset..self.length_offset + 4].copy_from_slice(&length.to_be_bytes());
        Ok(())
    }

    pub fn startup(&mut self, user: &str, database: &str) -> Result<(), EncodeError> {
        self.new_message_length_only();

        self.append_i32(i64::from(PROTOCOL_VERSION));

        self.append_str("user");
        self.append_str(user);

        self.append_str("database");
        self.append_str(database);

        self.append_u8(0);

        self.finalize_message()
    }

    pub fn sasl_initial_response_scram_sha_256(&mut self, initial: &str) -> Result<(), EncodeError> {
        self.new_message(b'p');
        self.append_str(SCRAM_SHA_256);
        if initial.is_empty() {
            self.append_i32(-1);
        } else {
            self.append_i32(initial.len() as i64);
        }
        self.append_raw_str(initial);
        self.finalize_message()
    }

    pub fn sasl_response(&mut self, data: &str) -> Result<(), EncodeError> {
        self.new_message(b'p');
        self.append_raw_str(data);
        self.finalize_message()
    }

    pub fn parse(&mut self, statement: &str, query: &str) -> Result<(), EncodeError> {
        self.new_message(b'P');
        self.append_str(statement);
        self.append_str(query);
        self.append_i16(0); // no parameter type hints
        self.finalize_message()
    }

    pub fn describe_statement(&mut self, statement: &str) -> Result<(), EncodeError> {
        self.new_message(b'D');
        self.append_u8(b'S');
        self.append_str(statement);
        self.finalize_message()
    }

    pub fn sync(&mut self) -> Result<(), EncodeError> {
        self.new_message(b'S');
        self.finalize_message()
    }

    pub fn terminate(&mut self) -> Result<(), EncodeError> {
        self.new_message(b'X');
        self.finalize_message()
    }

    pub fn query(&mut self, sql: &str) -> Result<(), EncodeError> {
        self.new_message(b'Q');
        self.append_str(sql);
        self.finalize_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_message_layout() {
        let mut b = MessageBuilder::default();
        b.startup("u", "d").unwrap();

        // 4 length + 4 version + 19 bytes of nul-terminated pairs
        let mut expected = Vec::new();
        expected.extend_from_slice(&27i32.to_be_bytes());
        expected.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        expected.extend_from_slice(b"user\0u\0database\0d\0\0");
        assert_eq!(b.as_bytes(), expected);
    }

    #[test]
    fn length_is_inclusive_and_excludes_the_kind_byte() {
        let mut b = MessageBuilder::default();
        b.query("select 1").unwrap();

        let bytes = b.as_bytes();
        assert_eq!(bytes[0], b'Q');
        let length = i32::from_be_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(length as usize, bytes.len() - 1);
    }

    #[test]
    fn nul_byte_poisons_the_message() {
        let mut b = MessageBuilder::default();
        assert_eq!(b.query("select '\0'"), Err(EncodeError::NulByte));

        // later appends are no-ops and the error sticks
        assert_eq!(b.finalize_message(), Err(EncodeError::NulByte));
    }

    #[test]
    fn width_overflow_is_a_narrowing_error() {
        let mut b = MessageBuilder::default();
        b.new_message(b'P');
        b.append_i16(i64::from(i16::MAX) + 1);
        assert_eq!(b.finalize_message(), Err(EncodeError::IntOverflow));

        b.reset();
        b.new_message(b'P');
        b.append_i32(i64::from(i32::MAX) + 1);
        assert_eq!(b.finalize_message(), Err(EncodeError::IntOverflow));
    }

    #[test]
    fn sasl_initial_response_empty_payload_has_length_minus_one() {
        let mut b = MessageBuilder::default();
        b.sasl_initial_response_scram_sha_256("").unwrap();

        let bytes = b.as_bytes();
        let tail = &bytes[bytes.len() - 4..];
        assert_eq!(i32::from_be_bytes(tail.try_into().unwrap()), -1);
    }

    #[test]
    fn batched_messages_share_the_buffer() {
        let mut b = MessageBuilder::default();
        b.parse("", "select 1").unwrap();
        b.describe_statement("").unwrap();
        b.sync().unwrap();

        let bytes = b.as_bytes();
        assert_eq!(bytes[0], b'P');
        assert_eq!(bytes[bytes.len() - 5], b'S');
    }
}
