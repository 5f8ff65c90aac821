//! Decoded `ErrorResponse` and `NoticeResponse` diagnostics.
use std::fmt;

/// A diagnostic field the client does not know by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalField {
    pub id: u8,
    pub value: String,
}

/// The fields of an `ErrorResponse` or `NoticeResponse`.
///
/// See <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticFields {
    pub severity_localized: String,
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
    pub message_detail: String,
    pub hint: String,
    /// 1-based character index into the original query, as sent.
    pub position: String,
    pub internal_position: String,
    pub internal_query: String,
    pub where_context: String,
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub type_name: String,
    pub constraint_name: String,
    pub file: String,
    pub line: String,
    pub routine: String,

    /// Unrecognized fields, preserved verbatim.
    pub additional: Vec<AdditionalField>,
}

impl DiagnosticFields {
    pub(crate) fn assign(&mut self, id: u8, value: String) {
        match id {
            b'S' => self.severity_localized = value,
            b'V' => self.severity = value,
            b'C' => self.sqlstate = value,
            b'M' => self.message = value,
            b'D' => self.message_detail = value,
            b'H' => self.hint = value,
            b'P' => self.position = value,
            b'p' => self.internal_position = value,
            b'q' => self.internal_query = value,
            b'W' => self.where_context = value,
            b's' => self.schema_name = value,
            b't' => self.table_name = value,
            b'c' => self.column_name = value,
            b'd' => self.type_name = value,
            b'n' => self.constraint_name = value,
            b'F' => self.file = value,
            b'L' => self.line = value,
            b'R' => self.routine = value,
            _ => self.additional.push(AdditionalField { id, value }),
        }
    }
}

impl fmt::Display for DiagnosticFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = [
            ("Localized Severity", &self.severity_localized),
            ("Severity", &self.severity),
            ("SQL State Code", &self.sqlstate),
            ("Message", &self.message),
            ("Message Detail", &self.message_detail),
            ("Hint", &self.hint),
            ("Position", &self.position),
            ("Internal Position", &self.internal_position),
            ("Internal Query", &self.internal_query),
            ("Where", &self.where_context),
            ("Schema Name", &self.schema_name),
            ("Table Name", &self.table_name),
            ("Column Name", &self.column_name),
            ("Type Name", &self.type_name),
            ("Constraint Name", &self.constraint_name),
            ("File", &self.file),
            ("Line", &self.line),
            ("Routine", &self.routine),
        ];

        let mut sep = "";
        for (name, value) in named {
            if !value.is_empty() {
                write!(f, "{sep}{name}: {value}")?;
                sep = ", ";
            }
        }
        for field in &self.additional {
            write!(f, "{sep}{}: {}", char::from(field.id), field.value)?;
            sep = ", ";
        }
        Ok(())
    }
}

/// A structured error sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgError {
    pub fields: DiagnosticFields,
}

impl PgError {
    /// The 1-based character position into the offending query, if the
    /// server reported one. Enables rendering an error pointer into the
    /// original SQL.
    pub fn position(&self) -> Option<usize> {
        self.fields.position.parse().ok()
    }
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fields.fmt(f)
    }
}

impl std::error::Error for PgError {}

/// An asynchronous warning from the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notice {
    pub fields: DiagnosticFields,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fields.fmt(f)
    }
}

/// Callback receiving asynchronous `NoticeResponse` messages.
///
/// The default sink logs at warn level.
pub type NoticeSink = Box<dyn FnMut(Notice) + Send>;
