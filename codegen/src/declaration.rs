//! Declaration headers and their hand-written grammar.
//!
//! A header names the generated function and/or struct and annotates the
//! result shape:
//!
//! ```text
//! funcName -> StructName+ {action: notnull, 2: null}
//! !execOnly
//! #pickOne?
//! ```
use std::fmt;

use anyhow::{Context, Result, bail, ensure};

use crate::parser::{Block, SqlFile};

/// What the generated code returns per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Statement returns exactly zero rows (`!`).
    None,
    /// A struct is generated or referenced as the return value.
    Struct,
    /// Columns are mapped to multiple return values (`#`). With
    /// [`ResultCount::Many`], only single-column queries are supported.
    Direct,
}

/// How many rows the statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCount {
    /// No rows at all; only legal with [`ResultKind::None`].
    None,
    /// Exactly zero or one row (`?`).
    Option,
    /// Exactly one row.
    One,
    /// 0..n rows (`+`).
    Many,
}

/// Which result column a [`ColumnOption`] targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// 1-based result column index.
    Index(usize),
    /// Column or field name, optionally qualified by a table name.
    Name { table: Option<String>, column: String },
}

/// A per-column nullability override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOption {
    pub selector: Selector,
    pub nullable: bool,
}

/// One annotated SQL block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub start_line: usize,
    /// The blank line ending the block, or the last line of the file.
    pub end_line: usize,
    /// The raw header text after the `--- ` prefix.
    pub header: String,

    pub result_kind: ResultKind,
    pub result_count: ResultCount,
    /// Two-name form: the struct result also names the function.
    pub struct_has_func_name: bool,

    /// Empty when `result_kind` is struct without the two-name form.
    pub func_name: String,
    /// Only set when `result_kind` is struct.
    pub struct_name: String,
    pub column_options: Vec<ColumnOption>,

    /// The trimmed SQL text, trailing `;` stripped.
    pub body: String,
}

impl Declaration {
    pub(crate) fn from_block(block: Block, file: &SqlFile) -> Result<Self> {
        let parsed = parse_header(&block.header)
            .with_context(|| format!("line {}: declaration header `{}`", block.start_line + 1, block.header))?;

        ensure!(
            block.start_line + 1 < block.end_line,
            "line {}: body of declared block is empty",
            block.start_line + 1,
        );
        let body = file.line_slice(block.start_line + 1, block.end_line).trim();
        // stripping a trailing `;` this way ignores trailing comments
        let body = body.strip_suffix(';').unwrap_or(body);

        Ok(Self {
            start_line: block.start_line,
            end_line: block.end_line,
            header: block.header,
            result_kind: parsed.result_kind,
            result_count: parsed.result_count,
            struct_has_func_name: parsed.struct_has_func_name,
            func_name: parsed.func_name,
            struct_name: parsed.struct_name,
            column_options: parsed.column_options,
            body: body.to_owned(),
        })
    }
}

impl fmt::Display for Declaration {
    /// The canonical header form; parsing it yields the same record.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result_kind {
            ResultKind::None => write!(f, "!{}", self.func_name)?,
            ResultKind::Direct => write!(f, "#{}", self.func_name)?,
            ResultKind::Struct => {
                if self.struct_has_func_name {
                    write!(f, "{} -> ", self.func_name)?;
                }
                f.write_str(&self.struct_name)?;
            }
        }
        match self.result_count {
            ResultCount::Option => f.write_str("?")?,
            ResultCount::Many => f.write_str("+")?,
            ResultCount::One | ResultCount::None => {}
        }

        if !self.column_options.is_empty() {
            f.write_str(" {")?;
            for (i, option) in self.column_options.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                match &option.selector {
                    Selector::Index(index) => write!(f, "{index}")?,
                    Selector::Name { table: Some(table), column } => {
                        write!(f, "{table}.{column}")?
                    }
                    Selector::Name { table: None, column } => f.write_str(column)?,
                }
                write!(f, ": {}", if option.nullable { "null" } else { "notnull" })?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

/// The semantic content of a declaration header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub result_kind: ResultKind,
    pub result_count: ResultCount,
    pub struct_has_func_name: bool,
    pub func_name: String,
    pub struct_name: String,
    pub column_options: Vec<ColumnOption>,
}

/// `\pL+[\pL\pN]*`: a Unicode letter followed by letters and numbers.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(char::is_alphanumeric)
}

fn parse_header(header: &str) -> Result<ParsedHeader> {
    // optional trailing ` {column options}`
    let (names, options_raw) = match header.find(" {") {
        Some(i) => {
            let options = header[i + 2..]
                .strip_suffix('}')
                .context("declaration header is invalid")?;
            (&header[..i], Some(options))
        }
        None => (header, None),
    };

    // optional two-name form `funcName -> Name`
    let (two_name_func, edged) = match names.split_once(" -> ") {
        Some((left, right)) => {
            ensure!(is_identifier(left), "declaration header is invalid");
            (Some(left), right)
        }
        None => (None, names),
    };

    // prefix? Identifier suffix?
    let mut name = edged;
    let prefix = if let Some(rest) = name.strip_prefix('!') {
        name = rest;
        Some('!')
    } else if let Some(rest) = name.strip_prefix('#') {
        name = rest;
        Some('#')
    } else {
        None
    };
    let suffix = if let Some(rest) = name.strip_suffix('?') {
        name = rest;
        Some('?')
    } else if let Some(rest) = name.strip_suffix('+') {
        name = rest;
        Some('+')
    } else {
        None
    };
    ensure!(is_identifier(name), "declaration header is invalid");

    let mut parsed = ParsedHeader {
        result_kind: ResultKind::Struct,
        result_count: ResultCount::One,
        struct_has_func_name: false,
        func_name: String::new(),
        struct_name: String::new(),
        column_options: Vec::new(),
    };

    match prefix {
        Some('!') => {
            ensure!(
                two_name_func.is_none(),
                "specified result kind as none with `!`, but used `->` (two names)",
            );
            parsed.result_kind = ResultKind::None;
            parsed.func_name = name.to_owned();
        }
        Some('#') => {
            ensure!(
                two_name_func.is_none(),
                "specified result kind as direct with `#`, but used `->` (two names)",
            );
            parsed.result_kind = ResultKind::Direct;
            parsed.func_name = name.to_owned();
        }
        None => {
            parsed.result_kind = ResultKind::Struct;
            parsed.struct_name = name.to_owned();
            if let Some(func) = two_name_func {
                parsed.struct_has_func_name = true;
                parsed.func_name = func.to_owned();
            }
        }
        _ => unreachable!(),
    }

    match suffix {
        Some('?') => {
            ensure!(
                parsed.result_kind != ResultKind::None,
                "specified result kind as none with `!`, but used `?` (optional)",
            );
            parsed.result_count = ResultCount::Option;
        }
        Some('+') => {
            ensure!(
                parsed.result_kind != ResultKind::None,
                "specified result kind as none with `!`, but used `+` (many)",
            );
            parsed.result_count = ResultCount::Many;
        }
        None => {
            parsed.result_count = if parsed.result_kind == ResultKind::None {
                ResultCount::None
            } else {
                ResultCount::One
            };
        }
        _ => unreachable!(),
    }

    if let Some(raw) = options_raw {
        parsed.column_options = parse_column_options(raw)?;
    }
    ensure!(
        !(parsed.result_kind == ResultKind::None && !parsed.column_options.is_empty()),
        "column options not allowed with result kind none (`!`)",
    );

    Ok(parsed)
}

fn parse_column_options(raw: &str) -> Result<Vec<ColumnOption>> {
    let mut options = Vec::new();
    for part in raw.split(',') {
        let (selector, nullable) =
            part.split_once(':').context("declaration header is invalid")?;
        ensure!(!nullable.contains(':'), "declaration header is invalid");

        let nullable = match nullable.trim() {
            "null" => true,
            "notnull" => false,
            _ => bail!("declaration header is invalid"),
        };

        options.push(ColumnOption { selector: parse_selector(selector.trim())?, nullable });
    }
    Ok(options)
}

fn parse_selector(s: &str) -> Result<Selector> {
    match pgq::parse_i64(s.as_bytes()) {
        Ok(index) => {
            let index = usize::try_from(index)
                .ok()
                .filter(|index| *index >= 1)
                .context("column index is too small (less than 1)")?;
            Ok(Selector::Index(index))
        }
        Err(pgq::NumberError::Overflow) => bail!("column index is too large"),
        Err(pgq::NumberError::Invalid) => match s.split_once('.') {
            Some((table, column)) => Ok(Selector::Name {
                table: Some(table.trim().to_owned()),
                column: column.trim().to_owned(),
            }),
            None => Ok(Selector::Name { table: None, column: s.to_owned() }),
        },
    }
}
