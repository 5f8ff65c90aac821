//! System catalogue lookups used to enrich field metadata.
use std::collections::HashMap;

use anyhow::{Context, Result};
use pgq::{Connection, Oid, Stream};

/// One `pg_attribute` row.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub not_null: bool,
}

/// Cached `pg_class` and `pg_attribute` contents.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<Oid, String>,
    attributes: HashMap<(Oid, i16), Attribute>,
}

impl Catalog {
    /// Load the catalogue once for the session.
    pub fn load<S: Stream>(conn: &mut Connection<S>) -> Result<Self> {
        let mut catalog = Self::default();

        conn.run_query("select oid, relname from pg_class")?;
        while conn.next_row() {
            let oid = field_oid(conn, 0)?;
            let relname = String::from_utf8_lossy(conn.field_raw_bytes(1)).into_owned();
            catalog.tables.insert(oid, relname);
        }
        conn.close_query().context("loading pg_class")?;

        conn.run_query("select attrelid, attnum, attname, attnotnull from pg_attribute")?;
        while conn.next_row() {
            let attrelid = field_oid(conn, 0)?;
            let attnum = i16::try_from(conn.field_i64(1)?).context("attnum out of range")?;
            let name = String::from_utf8_lossy(conn.field_raw_bytes(2)).into_owned();
            let not_null = conn.field_bool(3)?;
            catalog.attributes.insert((attrelid, attnum), Attribute { name, not_null });
        }
        conn.close_query().context("loading pg_attribute")?;

        log::debug!(
            "catalogue loaded: {} tables, {} attributes",
            catalog.tables.len(),
            catalog.attributes.len(),
        );
        Ok(catalog)
    }

    pub fn table_name(&self, oid: Oid) -> Option<&str> {
        self.tables.get(&oid).map(String::as_str)
    }

    pub fn attribute(&self, table_oid: Oid, attnum: i16) -> Option<&Attribute> {
        self.attributes.get(&(table_oid, attnum))
    }
}

fn field_oid<S: Stream>(conn: &Connection<S>, index: usize) -> Result<Oid> {
    let n = conn.field_i64(index)?;
    Oid::try_from(n).context("oid out of range")
}
