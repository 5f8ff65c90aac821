//! Framed message reading.
//!
//! The server stream is consumed one message at a time, framed as
//! `kind(1) | length(4, big-endian, inclusive of itself) | payload`. The
//! current message is held at the front of the read buffer and the field
//! decoders advance a cursor over it; borrowed field bytes stay valid
//! until the next [`read_message`](MessageReader::read_message).
use std::collections::HashMap;
use std::io::Read;
use std::ops::Range;

use bytes::{Buf, BytesMut};

use crate::cursor::{DataField, Field, ResultCursor};
use crate::error::{Error, ProtocolError, Result};
use crate::postgres::diagnostics::{DiagnosticFields, Notice, NoticeSink, PgError};
use crate::postgres::frontend::SCRAM_SHA_256;
use crate::postgres::tag::parse_command_tag;

/// Initial read buffer capacity, sized for large row descriptions.
const READ_BUFFER_SIZE: usize = 80 * 1024;

/// Session state the reader updates while filtering asynchronous
/// messages.
#[derive(Default)]
pub(crate) struct SessionShared {
    pub parameter_statuses: HashMap<String, String>,
    pub notice_sink: Option<NoticeSink>,
}

impl SessionShared {
    fn notice(&mut self, notice: Notice) {
        match &mut self.notice_sink {
            Some(sink) => sink(notice),
            None => log::warn!("{notice}"),
        }
    }
}

/// The SASL mechanism selected by [`MessageReader::authentication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaslMechanism {
    /// AuthenticationOk without a SASL conversation.
    None,
    ScramSha256,
}

/// Cancellation key data, retained for a future `CancelRequest`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BackendKeyData {
    pub process_id: u32,
    pub secret_key: u32,
}

pub(crate) struct MessageReader<R> {
    inner: R,
    buf: BytesMut,
    /// Length of the current message at the front of `buf`.
    frame: usize,
    /// Field cursor within the current message.
    pos: usize,
}

impl<R> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buf: BytesMut::with_capacity(READ_BUFFER_SIZE), frame: 0, pos: 0 }
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// The bytes of the current message.
    pub fn frame_bytes(&self) -> &[u8] {
        &self.buf[..self.frame]
    }
}

impl<R: Read> MessageReader<R> {
    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; 8192];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    fn buffer_at_least(&mut self, n: usize) -> Result<()> {
        while self.buf.len() < n {
            self.fill()?;
        }
        Ok(())
    }

    /// Advance to the next server message.
    ///
    /// `ParameterStatus` and `NoticeResponse` messages are absorbed here;
    /// an `ErrorResponse` is decoded and returned as the failure. A
    /// length-4 `S` message (portal suspended) is returned as-is.
    pub fn read_message(&mut self, shared: &mut SessionShared) -> Result<()> {
        loop {
            // discard the previous message
            self.buf.advance(self.frame);
            self.frame = 0;
            self.pos = 0;

            self.buffer_at_least(5)?;
            let kind = self.buf[0];
            let length =
                u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
            let total = usize::try_from(u64::from(length) + 1)
                .map_err(|_| ProtocolError::IntConversion)?;
            self.buffer_at_least(total)?;
            self.frame = total;

            log::trace!("(B) {} length {length}", kind.escape_ascii());

            match kind {
                b'E' => {
                    let err = self.error_response()?;
                    return Err(Error::Database(Box::new(err)));
                }
                b'S' if length > 4 => self.parameter_status(shared)?,
                b'S' => return Ok(()),
                b'N' => {
                    let notice = self.notice_response()?;
                    shared.notice(notice);
                }
                b'A' => return Err(ProtocolError::NotificationUnsupported.into()),
                _ => return Ok(()),
            }
        }
    }

    /// The kind byte of the current message.
    ///
    /// Panics when a field was already read; only valid on a fresh
    /// message.
    pub fn peek_kind(&self) -> Result<u8> {
        assert_eq!(self.pos, 0, "peek_kind called after reading fields");
        if self.frame == 0 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        Ok(self.buf[0])
    }

    pub fn expect_kind(&mut self, expected: u8) -> Result<()> {
        let got = self.read_u8()?;
        if got != expected {
            return Err(ProtocolError::UnexpectedKind { expected, got }.into());
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.frame - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        if self.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        let n = i16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(n)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        if self.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        let n = i32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(n)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_i32().map(|n| n as u32)
    }

    /// The nul-terminated string at the cursor, as a range into the
    /// current message.
    fn read_string(&mut self) -> Result<Range<usize>> {
        let len = self.buf[self.pos..self.frame]
            .iter()
            .position(|b| *b == 0)
            .ok_or(ProtocolError::MissingNulTerminator)?;
        let range = self.pos..self.pos + len;
        self.pos += len + 1;
        Ok(range)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Range<usize>> {
        if self.remaining() < n {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        let range = self.pos..self.pos + n;
        self.pos += n;
        Ok(range)
    }

    /// Everything left in the current message.
    fn read_remaining(&mut self) -> Range<usize> {
        let range = self.pos..self.frame;
        self.pos = self.frame;
        range
    }

    pub fn parse_complete(&mut self) -> Result<()> {
        self.expect_kind(b'1')
    }

    pub fn no_data(&mut self) -> Result<()> {
        self.expect_kind(b'n')
    }

    /// Dispatch an authentication request.
    pub fn authentication(&mut self) -> Result<SaslMechanism> {
        self.expect_kind(b'R')?;
        self.read_i32()?;
        let code = self.read_i32()?;
        match code {
            // AuthenticationOk
            0 => Ok(SaslMechanism::None),
            // AuthenticationSASL
            10 => self.authentication_sasl(),
            code => Err(ProtocolError::UnknownAuthMethod(code).into()),
        }
    }

    fn authentication_sasl(&mut self) -> Result<SaslMechanism> {
        loop {
            let mechanism = self.read_string()?;
            let mechanism = &self.buf[mechanism];
            if mechanism.is_empty() {
                // the terminating empty string: nothing we support was offered
                return Err(ProtocolError::UnsupportedSaslMechanism.into());
            }
            if mechanism == SCRAM_SHA_256.as_bytes() {
                // SCRAM-SHA-256-PLUS is ignored
                return Ok(SaslMechanism::ScramSha256);
            }
        }
    }

    pub fn authentication_sasl_continue(&mut self) -> Result<Range<usize>> {
        self.authentication_sasl_data(11)
    }

    pub fn authentication_sasl_final(&mut self) -> Result<Range<usize>> {
        self.authentication_sasl_data(12)
    }

    fn authentication_sasl_data(&mut self, expected: i32) -> Result<Range<usize>> {
        self.expect_kind(b'R')?;
        self.read_i32()?;
        let code = self.read_i32()?;
        if code != expected {
            return Err(ProtocolError::UnexpectedAuthCode { expected, got: code }.into());
        }
        Ok(self.read_remaining())
    }

    pub fn backend_key_data(&mut self) -> Result<BackendKeyData> {
        self.expect_kind(b'K')?;
        self.read_i32()?;
        Ok(BackendKeyData { process_id: self.read_u32()?, secret_key: self.read_u32()? })
    }

    /// Returns the transaction status byte.
    pub fn ready_for_query(&mut self) -> Result<u8> {
        self.expect_kind(b'Z')?;
        self.read_i32()?;
        self.read_u8()
    }

    fn parameter_status(&mut self, shared: &mut SessionShared) -> Result<()> {
        self.expect_kind(b'S')?;
        self.read_i32()?;
        let name = self.read_string()?;
        let name = String::from_utf8_lossy(&self.buf[name]).into_owned();
        let value = self.read_string()?;
        let value = String::from_utf8_lossy(&self.buf[value]).into_owned();
        shared.parameter_statuses.insert(name, value);
        Ok(())
    }

    fn diagnostic_fields(&mut self) -> Result<DiagnosticFields> {
        self.read_i32()?;
        let mut fields = DiagnosticFields::default();
        loop {
            let id = self.read_u8()?;
            if id == 0 {
                return Ok(fields);
            }
            let value = self.read_string()?;
            let value = String::from_utf8_lossy(&self.buf[value]).into_owned();
            fields.assign(id, value);
        }
    }

    pub fn error_response(&mut self) -> Result<PgError> {
        self.expect_kind(b'E')?;
        Ok(PgError { fields: self.diagnostic_fields()? })
    }

    pub fn notice_response(&mut self) -> Result<Notice> {
        self.expect_kind(b'N')?;
        Ok(Notice { fields: self.diagnostic_fields()? })
    }

    pub fn parameter_description(&mut self, cursor: &mut ResultCursor) -> Result<()> {
        self.expect_kind(b't')?;
        self.read_i32()?;
        let count = self.read_i16()?;

        cursor.parameter_oids.clear();
        for _ in 0..count {
            let oid = self.read_u32()?;
            cursor.parameter_oids.push(oid);
        }
        Ok(())
    }

    pub fn row_description(&mut self, cursor: &mut ResultCursor) -> Result<()> {
        self.expect_kind(b'T')?;
        self.read_i32()?;
        let count = self.read_i16()?;

        cursor.clear_fields();
        for _ in 0..count {
            let name = self.read_string()?;
            let name = cursor.store_name(&self.buf[name]);
            let field = Field {
                name,
                table_oid: self.read_u32()?,
                column_attnum: self.read_i16()?,
                type_oid: self.read_u32()?,
                type_size: self.read_i16()?,
                type_modifier: self.read_i32()?,
                format_code: self.read_i16()?,
            };
            cursor.fields.push(field);
        }

        cursor.data_fields.clear();
        cursor.data_fields.resize(cursor.fields.len(), DataField::default());
        Ok(())
    }

    pub fn data_row(&mut self, cursor: &mut ResultCursor) -> Result<()> {
        self.expect_kind(b'D')?;
        self.read_i32()?;
        let count = self.read_i16()?;
        let expected = cursor.data_fields.len();
        if count < 0 || count as usize != expected {
            return Err(ProtocolError::ColumnCountMismatch { expected, got: count }.into());
        }

        for i in 0..expected {
            let length = self.read_i32()?;
            if length < 0 {
                cursor.data_fields[i] = DataField { is_null: true, value: 0..0 };
            } else {
                let length =
                    usize::try_from(length).map_err(|_| ProtocolError::IntConversion)?;
                let value = self.read_bytes(length)?;
                cursor.data_fields[i] = DataField { is_null: false, value };
            }
        }
        Ok(())
    }

    pub fn command_complete(&mut self, cursor: &mut ResultCursor) -> Result<()> {
        self.expect_kind(b'C')?;
        self.read_i32()?;
        let tag = self.read_string()?;
        let (command, rows) = parse_command_tag(&self.buf[tag])?;
        cursor.last_command = command;
        cursor.last_row_count = rows;
        Ok(())
    }
}
