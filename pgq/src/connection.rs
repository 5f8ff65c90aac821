//! The session state machine.
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use crate::config::Config;
use crate::cursor::{Field, ResultCursor};
use crate::error::{Error, ProtocolError, Result};
use crate::ext::parse_i64;
use crate::postgres::Oid;
use crate::postgres::diagnostics::NoticeSink;
use crate::postgres::frontend::MessageBuilder;
use crate::postgres::reader::{BackendKeyData, MessageReader, SaslMechanism, SessionShared};
use crate::postgres::sasl::ScramClient;
use crate::postgres::tag::Command;

/// A blocking transport the session can run over.
///
/// Beyond `Read + Write` this only adds teardown, so tests can drive the
/// session with scripted in-memory streams.
pub trait Stream: Read + Write {
    /// Close both directions, releasing server resources promptly.
    fn shutdown(&mut self) {}
}

impl Stream for TcpStream {
    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

/// A live PostgreSQL session.
///
/// Strictly serial: at most one query is in flight, every operation is a
/// blocking request/response, and the session must not be shared across
/// threads. Callers needing concurrency open more sessions.
pub struct Connection<S = TcpStream> {
    reader: MessageReader<S>,
    builder: MessageBuilder,
    shared: SessionShared,

    key_data: BackendKeyData,
    tx_status: u8,
    /// An extended-query batch was sent since the last `ReadyForQuery`.
    needs_sync: bool,
    /// Set on transport or protocol failure while syncing, and on close.
    fatal: Option<String>,

    cursor: ResultCursor,

    #[cfg(test)]
    scram_nonce: Option<String>,
}

impl Connection<TcpStream> {
    /// Connect over TCP and complete the startup handshake.
    pub fn connect(config: &Config) -> Result<Self> {
        let addr = config.addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        })?;
        let stream = TcpStream::connect_timeout(&addr, config.timeout)?;
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(config.timeout))?;
        stream.set_write_timeout(Some(config.timeout))?;

        Self::establish(stream, &config.user, &config.password, &config.database)
    }
}

impl<S: Stream> Connection<S> {
    /// Run the startup handshake over an established stream.
    pub fn establish(stream: S, user: &str, password: &str, database: &str) -> Result<Self> {
        let mut conn = Self::new(stream);
        if let Err(err) = conn.startup(user, password, database) {
            let _ = conn.close();
            return Err(err);
        }
        Ok(conn)
    }

    fn new(stream: S) -> Self {
        Self {
            reader: MessageReader::new(stream),
            builder: MessageBuilder::default(),
            shared: SessionShared::default(),
            key_data: BackendKeyData::default(),
            tx_status: 0,
            needs_sync: false,
            fatal: None,
            cursor: ResultCursor::default(),
            #[cfg(test)]
            scram_nonce: None,
        }
    }

    fn read(&mut self) -> Result<()> {
        self.reader.read_message(&mut self.shared)
    }

    fn write_message(&mut self) -> Result<()> {
        log::trace!("(F) writing {} bytes", self.builder.as_bytes().len());
        let stream = self.reader.inner_mut();
        stream.write_all(self.builder.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn startup(&mut self, user: &str, password: &str, database: &str) -> Result<()> {
        self.builder.reset();
        self.builder.startup(user, database)?;
        self.write_message()?;

        self.read()?;
        match self.reader.authentication()? {
            SaslMechanism::None => {}
            SaslMechanism::ScramSha256 => self.sasl_auth_scram_sha_256(user, password)?,
        }

        self.read()?;
        self.key_data = self.reader.backend_key_data()?;

        self.read()?;
        self.tx_status = self.reader.ready_for_query()?;
        Ok(())
    }

    fn sasl_auth_scram_sha_256(&mut self, user: &str, password: &str) -> Result<()> {
        let mut client = ScramClient::new(user, password);
        #[cfg(test)]
        if let Some(nonce) = &self.scram_nonce {
            client = ScramClient::with_nonce(user, password, nonce.clone());
        }

        self.builder.reset();
        self.builder.sasl_initial_response_scram_sha_256(&client.client_first())?;
        self.write_message()?;

        self.read()?;
        let server_first = self.reader.authentication_sasl_continue()?;
        let reply = client.server_first(&self.reader.frame_bytes()[server_first])?;

        self.builder.reset();
        self.builder.sasl_response(&reply)?;
        self.write_message()?;

        self.read()?;
        let server_final = self.reader.authentication_sasl_final()?;
        client.server_final(&self.reader.frame_bytes()[server_final])?;

        self.read()?;
        self.reader.authentication()?;
        Ok(())
    }

    /// Send `Terminate` best-effort and tear the stream down. Subsequent
    /// calls fail with the stored fatal error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(msg) = &self.fatal {
            return Err(Error::Fatal(msg.clone()));
        }
        self.fatal = Some("connection closed".to_owned());

        self.builder.reset();
        let write_result = match self.builder.terminate() {
            Ok(()) => self.write_message(),
            Err(err) => Err(err.into()),
        };
        self.reader.inner_mut().shutdown();
        write_result
    }

    fn check_usable(&self) -> Result<()> {
        match &self.fatal {
            Some(msg) => Err(Error::Fatal(msg.clone())),
            None => Ok(()),
        }
    }

    fn set_fatal(&mut self, err: &Error) {
        self.fatal = Some(err.to_string());
        self.reader.inner_mut().shutdown();
    }

    /// Drain to the next `ReadyForQuery` if the stream is mid-batch.
    ///
    /// Server errors from a previous failed extended-query batch are
    /// absorbed; anything else poisons the session.
    fn sync(&mut self) -> Result<()> {
        self.check_usable()?;
        if !self.needs_sync {
            return Ok(());
        }
        loop {
            match self.consume_sync() {
                Ok(()) => {
                    self.needs_sync = false;
                    return Ok(());
                }
                Err(err) if err.is_database() => continue,
                Err(err) => {
                    self.set_fatal(&err);
                    return Err(err);
                }
            }
        }
    }

    fn consume_sync(&mut self) -> Result<()> {
        loop {
            self.read()?;
            if self.reader.peek_kind()? != b'Z' {
                continue;
            }
            self.tx_status = self.reader.ready_for_query()?;
            return Ok(());
        }
    }

    /// Ask the server for parameter and result metadata without
    /// executing, via `Parse` + `Describe` + `Sync` on the unnamed
    /// statement.
    ///
    /// Returns whether the statement produces a row description (false
    /// for DDL/DML). The cursor's parameter oids and fields are
    /// overwritten.
    pub fn get_query_metadata(&mut self, query: &str) -> Result<bool> {
        self.sync()?;

        self.builder.reset();
        self.builder.parse("", query)?;
        self.builder.describe_statement("")?;
        self.builder.sync()?;
        self.write_message()?;
        self.needs_sync = true;

        self.read()?;
        self.reader.parse_complete()?;

        self.read()?;
        self.reader.parameter_description(&mut self.cursor)?;

        self.read()?;
        let has_row_description = if self.reader.peek_kind()? == b'n' {
            self.reader.no_data()?;
            self.cursor.clear_fields();
            false
        } else {
            self.reader.row_description(&mut self.cursor)?;
            true
        };

        self.sync()?;
        Ok(has_row_description)
    }

    fn query_base(&mut self, query: &str) -> Result<()> {
        self.sync()?;

        self.cursor.row_iteration_done = false;
        self.cursor.last_row_error = None;
        self.cursor.last_command = Command::Unknown;
        self.cursor.last_row_count = 0;

        if query.trim().is_empty() {
            return Err(Error::BlankQuery);
        }

        self.builder.reset();
        self.builder.query(query)?;
        self.write_message()?;
        self.needs_sync = true;
        Ok(())
    }

    /// Run a statement for its side effects via the simple protocol.
    pub fn execute(&mut self, query: &str) -> Result<()> {
        self.query_base(query)?;
        self.read()?;
        self.reader.command_complete(&mut self.cursor)?;
        self.sync()
    }

    /// Run a row-returning statement via the simple protocol. Rows are
    /// visited with [`next_row`](Self::next_row) and the iteration is
    /// finished by [`close_query`](Self::close_query).
    pub fn run_query(&mut self, query: &str) -> Result<()> {
        self.query_base(query)?;
        self.read()?;
        // text format is assumed for all decoding
        self.reader.row_description(&mut self.cursor)
    }

    /// Advance to the next data row, decoding its columns into the
    /// cursor. Returns false once the iteration is done or failed.
    pub fn next_row(&mut self) -> bool {
        if self.fatal.is_some()
            || self.cursor.row_iteration_done
            || self.cursor.last_row_error.is_some()
        {
            return false;
        }

        if let Err(err) = self.read() {
            self.cursor.last_row_error = Some(err);
            return false;
        }
        let kind = match self.reader.peek_kind() {
            Ok(kind) => kind,
            Err(err) => {
                self.cursor.last_row_error = Some(err);
                return false;
            }
        };
        if kind == b'C' {
            self.cursor.row_iteration_done = true;
            return false;
        }
        if let Err(err) = self.reader.data_row(&mut self.cursor) {
            self.cursor.last_row_error = Some(err);
            return false;
        }
        true
    }

    /// Drain any remaining rows, read the command tag and sync.
    pub fn close_query(&mut self) -> Result<()> {
        self.check_usable()?;
        if let Some(err) = self.cursor.last_row_error.take() {
            return Err(err);
        }
        if !self.cursor.row_iteration_done {
            while self.next_row() {}
            if let Some(err) = self.cursor.last_row_error.take() {
                return Err(err);
            }
        }

        self.reader.command_complete(&mut self.cursor)?;
        self.sync()
    }

    // result cursor access

    pub fn parameter_oids(&self) -> &[Oid] {
        &self.cursor.parameter_oids
    }

    pub fn fields(&self) -> &[Field] {
        &self.cursor.fields
    }

    pub fn fields_len(&self) -> usize {
        self.cursor.fields.len()
    }

    /// Name bytes of result column `index`.
    pub fn field_name(&self, index: usize) -> &[u8] {
        self.cursor.field_name(index)
    }

    pub fn last_command(&self) -> Command {
        self.cursor.last_command
    }

    pub fn last_row_count(&self) -> i64 {
        self.cursor.last_row_count
    }

    /// Whether result column `index` of the current row is null.
    ///
    /// Panics when `index` is out of range.
    pub fn field_is_null(&self, index: usize) -> bool {
        assert!(index < self.cursor.data_fields.len(), "result column index out of range");
        self.cursor.data_fields[index].is_null
    }

    /// Borrow the raw bytes of result column `index`.
    ///
    /// The slice aliases the read buffer and is invalidated by the next
    /// message read. Panics on an out-of-range index or a null field.
    pub fn field_raw_bytes(&self, index: usize) -> &[u8] {
        assert!(index < self.cursor.data_fields.len(), "result column index out of range");
        let field = &self.cursor.data_fields[index];
        assert!(!field.is_null, "null value");
        &self.reader.frame_bytes()[field.value.clone()]
    }

    /// Decode result column `index` as a signed 64-bit integer from its
    /// text representation.
    pub fn field_i64(&self, index: usize) -> Result<i64> {
        Ok(parse_i64(self.field_raw_bytes(index)).map_err(ProtocolError::from)?)
    }

    /// Decode result column `index` as a boolean. Exactly `t` or `f`.
    pub fn field_bool(&self, index: usize) -> Result<bool> {
        match self.field_raw_bytes(index) {
            [b't'] => Ok(true),
            [b'f'] => Ok(false),
            _ => Err(ProtocolError::InvalidColumnType.into()),
        }
    }

    // session surface

    pub fn process_id(&self) -> u32 {
        self.key_data.process_id
    }

    pub fn secret_key(&self) -> u32 {
        self.key_data.secret_key
    }

    /// Last transaction status reported by `ReadyForQuery`: `I`, `T` or
    /// `E`.
    pub fn tx_status(&self) -> u8 {
        self.tx_status
    }

    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.shared.parameter_statuses.get(name).map(String::as_str)
    }

    /// All run-time parameter reports seen so far, last writer wins.
    pub fn parameter_statuses(&self) -> &HashMap<String, String> {
        &self.shared.parameter_statuses
    }

    /// Replace the sink receiving asynchronous notices. The default
    /// logs them at warn level.
    pub fn set_notice_sink(&mut self, sink: NoticeSink) {
        self.shared.notice_sink = Some(sink);
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("process_id", &self.key_data.process_id)
            .field("tx_status", &char::from(self.tx_status))
            .field("needs_sync", &self.needs_sync)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays scripted server bytes and records everything written.
    struct ScriptedStream {
        input: io::Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(input: Vec<u8>) -> Self {
            Self { input: io::Cursor::new(input), written: Vec::new() }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Stream for ScriptedStream {}

    fn msg(kind: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.push(0);
        out
    }

    fn parameter_status(name: &str, value: &str) -> Vec<u8> {
        let mut body = cstr(name);
        body.extend(cstr(value));
        msg(b'S', &body)
    }

    fn row_field(name: &str, table_oid: u32, attnum: i16, type_oid: u32) -> Vec<u8> {
        let mut out = cstr(name);
        out.extend_from_slice(&table_oid.to_be_bytes());
        out.extend_from_slice(&attnum.to_be_bytes());
        out.extend_from_slice(&type_oid.to_be_bytes());
        out.extend_from_slice(&(-1i16).to_be_bytes()); // typlen
        out.extend_from_slice(&(-1i32).to_be_bytes()); // typmod
        out.extend_from_slice(&0i16.to_be_bytes()); // text format
        out
    }

    fn row_description(fields: &[Vec<u8>]) -> Vec<u8> {
        let mut body = (fields.len() as i16).to_be_bytes().to_vec();
        for field in fields {
            body.extend_from_slice(field);
        }
        msg(b'T', &body)
    }

    fn data_row(values: &[Option<&str>]) -> Vec<u8> {
        let mut body = (values.len() as i16).to_be_bytes().to_vec();
        for value in values {
            match value {
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
                Some(v) => {
                    body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    body.extend_from_slice(v.as_bytes());
                }
            }
        }
        msg(b'D', &body)
    }

    fn error_response(severity: &str, sqlstate: &str, message: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(b'V');
        body.extend(cstr(severity));
        body.push(b'C');
        body.extend(cstr(sqlstate));
        body.push(b'M');
        body.extend(cstr(message));
        body.push(0);
        msg(b'E', &body)
    }

    fn trust_handshake() -> Vec<u8> {
        let mut input = msg(b'R', &0i32.to_be_bytes());
        input.extend(parameter_status("server_version", "15.0"));
        input.extend(parameter_status("TimeZone", "UTC"));
        let mut key = 42u32.to_be_bytes().to_vec();
        key.extend_from_slice(&0xdead_beefu32.to_be_bytes());
        input.extend(msg(b'K', &key));
        input.extend(msg(b'Z', b"I"));
        input
    }

    fn connected(extra: Vec<u8>) -> Connection<ScriptedStream> {
        let mut input = trust_handshake();
        input.extend(extra);
        Connection::establish(ScriptedStream::new(input), "u", "p", "d").unwrap()
    }

    #[test]
    fn trust_handshake_populates_the_session() {
        let mut conn = connected(Vec::new());

        assert_eq!(conn.process_id(), 42);
        assert_eq!(conn.secret_key(), 0xdead_beef);
        assert_eq!(conn.tx_status(), b'I');
        assert!(!conn.needs_sync);
        assert_eq!(conn.parameter_status("server_version"), Some("15.0"));
        assert_eq!(conn.parameter_status("TimeZone"), Some("UTC"));

        // the startup message went out first, without a kind byte
        let written = conn.reader_written();
        assert_eq!(&written[8..13], b"user\0");
    }

    #[test]
    fn scram_sha_256_conversation() {
        // the RFC 7677 section 3 example conversation
        const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
        const SERVER_FIRST: &str = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                                    s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                                    p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
        const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

        let mut sasl_body = 10i32.to_be_bytes().to_vec();
        sasl_body.extend(cstr("SCRAM-SHA-256"));
        sasl_body.push(0);
        let mut input = msg(b'R', &sasl_body);

        let mut cont = 11i32.to_be_bytes().to_vec();
        cont.extend_from_slice(SERVER_FIRST.as_bytes());
        input.extend(msg(b'R', &cont));

        let mut fin = 12i32.to_be_bytes().to_vec();
        fin.extend_from_slice(SERVER_FINAL.as_bytes());
        input.extend(msg(b'R', &fin));

        input.extend(msg(b'R', &0i32.to_be_bytes()));
        let mut key = 99u32.to_be_bytes().to_vec();
        key.extend_from_slice(&7u32.to_be_bytes());
        input.extend(msg(b'K', &key));
        input.extend(msg(b'Z', b"I"));

        let mut conn = Connection::new(ScriptedStream::new(input));
        conn.scram_nonce = Some(CLIENT_NONCE.to_owned());
        conn.startup("user", "pencil", "d").unwrap();

        assert_eq!(conn.process_id(), 99);
        assert_eq!(conn.tx_status(), b'I');

        let written = conn.reader_written();
        let client_final = CLIENT_FINAL.as_bytes();
        assert!(
            written.windows(client_final.len()).any(|w| w == client_final),
            "client-final message not sent",
        );
    }

    #[test]
    fn scram_plus_only_offer_is_rejected() {
        let mut sasl_body = 10i32.to_be_bytes().to_vec();
        sasl_body.extend(cstr("SCRAM-SHA-256-PLUS"));
        sasl_body.push(0);
        let input = msg(b'R', &sasl_body);

        let err = Connection::establish(ScriptedStream::new(input), "u", "p", "d").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnsupportedSaslMechanism),
        ));
    }

    #[test]
    fn metadata_for_select() {
        let mut extra = msg(b'1', b"");
        let mut params = 1i16.to_be_bytes().to_vec();
        params.extend_from_slice(&23u32.to_be_bytes());
        extra.extend(msg(b't', &params));
        extra.extend(row_description(&[
            row_field("id", 16402, 1, 20),
            row_field("action", 16402, 2, 25),
        ]));
        extra.extend(msg(b'Z', b"I"));

        let mut conn = connected(extra);
        let has_rows = conn
            .get_query_metadata("select id, action from events where tenant = $1")
            .unwrap();

        assert!(has_rows);
        assert_eq!(conn.parameter_oids(), &[23]);
        assert_eq!(conn.fields_len(), 2);
        assert_eq!(conn.field_name(0), b"id");
        assert_eq!(conn.field_name(1), b"action");
        assert_eq!(conn.fields()[0].type_oid, 20);
        assert_eq!(conn.fields()[1].type_oid, 25);
        assert_eq!(conn.fields()[0].column_attnum, 1);
        assert!(!conn.needs_sync);
    }

    #[test]
    fn metadata_for_ddl_clears_the_fields() {
        // leave stale fields around first
        let mut extra = msg(b'1', b"");
        let mut params = 1i16.to_be_bytes().to_vec();
        params.extend_from_slice(&23u32.to_be_bytes());
        extra.extend(msg(b't', &params));
        extra.extend(row_description(&[row_field("id", 0, 0, 20)]));
        extra.extend(msg(b'Z', b"I"));

        extra.extend(msg(b'1', b""));
        extra.extend(msg(b't', &0i16.to_be_bytes()));
        extra.extend(msg(b'n', b""));
        extra.extend(msg(b'Z', b"I"));

        let mut conn = connected(extra);
        assert!(conn.get_query_metadata("select id from events").unwrap());
        assert!(!conn.get_query_metadata("create table t(x int)").unwrap());
        assert!(conn.parameter_oids().is_empty());
        assert_eq!(conn.fields_len(), 0);
    }

    #[test]
    fn row_iteration() {
        let mut extra = row_description(&[
            row_field("attrelid", 1249, 1, 26),
            row_field("attnum", 1249, 2, 21),
            row_field("attname", 1249, 3, 19),
            row_field("attnotnull", 1249, 4, 16),
        ]);
        extra.extend(data_row(&[Some("1259"), Some("1"), Some("relname"), Some("t")]));
        extra.extend(data_row(&[Some("1259"), Some("2"), Some("relnamespace"), Some("f")]));
        extra.extend(msg(b'C', &cstr("SELECT 2")));
        extra.extend(msg(b'Z', b"I"));

        let mut conn = connected(extra);
        conn.run_query("select attrelid, attnum, attname, attnotnull from pg_attribute").unwrap();

        assert!(conn.next_row());
        assert_eq!(conn.field_i64(0).unwrap(), 1259);
        assert_eq!(conn.field_i64(1).unwrap(), 1);
        assert_eq!(conn.field_raw_bytes(2), b"relname");
        assert!(conn.field_bool(3).unwrap());
        assert!(!conn.field_is_null(3));

        assert!(conn.next_row());
        assert_eq!(conn.field_raw_bytes(2), b"relnamespace");
        assert!(!conn.field_bool(3).unwrap());

        assert!(!conn.next_row());
        conn.close_query().unwrap();
        assert_eq!(conn.last_command(), Command::Select);
        assert_eq!(conn.last_row_count(), 2);
        assert_eq!(conn.tx_status(), b'I');
        assert!(!conn.needs_sync);
    }

    #[test]
    fn close_query_drains_unvisited_rows() {
        let mut extra = row_description(&[row_field("n", 0, 0, 23)]);
        extra.extend(data_row(&[Some("1")]));
        extra.extend(data_row(&[Some("2")]));
        extra.extend(msg(b'C', &cstr("SELECT 2")));
        extra.extend(msg(b'Z', b"T"));

        let mut conn = connected(extra);
        conn.run_query("select n from numbers").unwrap();
        conn.close_query().unwrap();
        assert_eq!(conn.last_row_count(), 2);
        assert_eq!(conn.tx_status(), b'T');
    }

    #[test]
    fn null_fields_are_flagged() {
        let mut extra = row_description(&[row_field("a", 0, 0, 25)]);
        extra.extend(data_row(&[None]));
        extra.extend(msg(b'C', &cstr("SELECT 1")));
        extra.extend(msg(b'Z', b"I"));

        let mut conn = connected(extra);
        conn.run_query("select a from t").unwrap();
        assert!(conn.next_row());
        assert!(conn.field_is_null(0));
        conn.close_query().unwrap();
    }

    #[test]
    fn execute_parses_the_insert_tag() {
        let mut extra = msg(b'C', &cstr("INSERT 0 17"));
        extra.extend(msg(b'Z', b"I"));

        let mut conn = connected(extra);
        conn.execute("insert into t select generate_series(1, 17)").unwrap();
        assert_eq!(conn.last_command(), Command::Insert);
        assert_eq!(conn.last_row_count(), 17);
    }

    #[test]
    fn server_error_is_recoverable_through_sync() {
        let mut extra = error_response("ERROR", "42601", "syntax error at or near \"invalid\"");
        extra.extend(msg(b'Z', b"I"));
        // the retry
        extra.extend(msg(b'1', b""));
        extra.extend(msg(b't', &0i16.to_be_bytes()));
        extra.extend(row_description(&[row_field("?column?", 0, 0, 23)]));
        extra.extend(msg(b'Z', b"I"));

        let mut conn = connected(extra);

        let err = conn.get_query_metadata("invalid query").unwrap_err();
        let db = err.as_database().expect("server diagnostic");
        assert_eq!(db.fields.severity, "ERROR");
        assert_eq!(db.fields.sqlstate, "42601");
        assert!(conn.needs_sync);

        // the next request drains the failed batch and succeeds
        assert!(conn.get_query_metadata("select 1").unwrap());
        assert_eq!(conn.fields_len(), 1);
    }

    #[test]
    fn blank_queries_are_rejected() {
        let mut conn = connected(Vec::new());
        assert!(matches!(conn.run_query(" \n \t "), Err(Error::BlankQuery)));
        assert!(matches!(conn.execute(""), Err(Error::BlankQuery)));
    }

    #[test]
    fn transport_failure_while_syncing_poisons_the_session() {
        let mut conn = connected(Vec::new());
        conn.needs_sync = true; // pretend a batch is outstanding, with no input left

        let err = conn.execute("select 1").unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnexpectedEof)));

        // every later operation fails with the stored fatal error
        assert!(matches!(conn.execute("select 1"), Err(Error::Fatal(_))));
        assert!(matches!(conn.get_query_metadata("select 1"), Err(Error::Fatal(_))));
        assert!(!conn.next_row());
        assert!(matches!(conn.close_query(), Err(Error::Fatal(_))));
    }

    #[test]
    fn close_is_idempotent_and_sends_terminate() {
        let mut conn = connected(Vec::new());
        conn.close().unwrap();

        let written = conn.reader_written();
        let terminate: &[u8] = &[b'X', 0, 0, 0, 4];
        assert!(written.windows(5).any(|w| w == terminate));

        assert!(matches!(conn.close(), Err(Error::Fatal(_))));
        assert!(matches!(conn.execute("select 1"), Err(Error::Fatal(_))));
    }

    impl Connection<ScriptedStream> {
        fn reader_written(&mut self) -> Vec<u8> {
            self.reader.inner_mut().written.clone()
        }
    }
}
