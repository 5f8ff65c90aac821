//! Synchronous PostgreSQL wire protocol client.
//!
//! Built for tooling that interrogates the server about queries: the
//! session speaks the 3.0 frontend/backend protocol over a single TCP
//! connection, authenticates with trust or SCRAM-SHA-256, extracts
//! parameter and result metadata through the extended query protocol,
//! and iterates text-format rows with zero-copy field access.
//!
//! # Examples
//!
//! ```no_run
//! use pgq::{Config, Connection};
//!
//! fn app() -> pgq::Result<()> {
//!     let config = Config::new("localhost:5432", "postgres", "secret", "postgres");
//!     let mut conn = Connection::connect(&config)?;
//!
//!     let has_rows = conn.get_query_metadata("select id, action from events where tenant = $1")?;
//!     assert!(has_rows);
//!     println!("{:?} -> {} columns", conn.parameter_oids(), conn.fields_len());
//!
//!     conn.run_query("select attname, attnotnull from pg_attribute")?;
//!     while conn.next_row() {
//!         let name = conn.field_raw_bytes(0).to_vec();
//!         let not_null = conn.field_bool(1)?;
//!         println!("{} (notnull? {not_null})", String::from_utf8_lossy(&name));
//!     }
//!     conn.close_query()?;
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```
//!
//! A session is strictly serial: one query in flight, blocking reads and
//! writes bounded by a per-call deadline, no sharing across threads.

pub mod config;
pub mod connection;
pub mod cursor;
mod error;
mod ext;

// Protocol
pub mod postgres;

#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use connection::{Connection, Stream};
#[doc(inline)]
pub use cursor::Field;
pub use error::{EncodeError, Error, ProtocolError, Result};
pub use ext::{NumberError, parse_i64};
#[doc(inline)]
pub use postgres::Oid;
#[doc(inline)]
pub use postgres::diagnostics::{DiagnosticFields, Notice, NoticeSink, PgError};
#[doc(inline)]
pub use postgres::tag::Command;
