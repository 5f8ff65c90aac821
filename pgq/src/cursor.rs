//! Query result state, reused across queries.
use std::ops::Range;

use crate::error::Error;
use crate::postgres::Oid;
use crate::postgres::tag::Command;

/// One column of the current row description.
#[derive(Debug, Clone, Default)]
pub struct Field {
    /// Range into the cursor's shared names buffer.
    pub(crate) name: Range<usize>,

    /// Table the column came from, 0 if none.
    pub table_oid: Oid,
    /// `pg_attribute.attnum` of the column, 0 if none.
    pub column_attnum: i16,

    pub type_oid: Oid,
    /// `pg_type.typlen`
    pub type_size: i16,
    /// `pg_attribute.atttypmod`
    pub type_modifier: i32,

    /// Text (0) or binary (1). Captured, but text is assumed everywhere.
    pub format_code: i16,
}

/// One column of the current data row. The value range borrows the
/// reader's current message and is only valid until the next read.
#[derive(Debug, Clone, Default)]
pub(crate) struct DataField {
    pub is_null: bool,
    pub value: Range<usize>,
}

/// Result state attached to the session, overwritten by each request.
#[derive(Debug, Default)]
pub struct ResultCursor {
    pub(crate) parameter_oids: Vec<Oid>,

    pub(crate) fields: Vec<Field>,
    /// Backing storage for field names; cleared with the fields and only
    /// appended to while they are built, so the name ranges stay valid.
    names: Vec<u8>,

    pub(crate) data_fields: Vec<DataField>,
    pub(crate) row_iteration_done: bool,
    pub(crate) last_row_error: Option<Error>,
    pub(crate) last_command: Command,
    pub(crate) last_row_count: i64,
}

impl ResultCursor {
    pub(crate) fn clear_fields(&mut self) {
        self.fields.clear();
        self.names.clear();
        self.data_fields.clear();
    }

    /// Copy a field name into the shared buffer, returning its range.
    pub(crate) fn store_name(&mut self, name: &[u8]) -> Range<usize> {
        let start = self.names.len();
        self.names.extend_from_slice(name);
        start..self.names.len()
    }

    /// Name bytes of result column `index`.
    ///
    /// Panics when `index` is out of range.
    pub fn field_name(&self, index: usize) -> &[u8] {
        &self.names[self.fields[index].name.clone()]
    }
}
