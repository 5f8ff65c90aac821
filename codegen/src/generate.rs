//! Declaration checking and Rust code emission.
use std::collections::HashSet;
use std::fmt::Write as _;

use anyhow::{Context, Result, ensure};
use pgq::{Connection, Stream};

use crate::catalog::Catalog;
use crate::config::{Config, TypeMapping};
use crate::declaration::{ColumnOption, Declaration, ResultCount, ResultKind, Selector};

/// A result column with its resolved name, type and nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedColumn {
    /// The result field name, which may be an alias.
    pub name: String,
    /// Table the column belongs to, resolved through `pg_class`.
    pub table: Option<String>,
    /// The underlying column name, resolved through `pg_attribute`.
    pub table_column: Option<String>,
    pub rust_type: String,
    pub nullable: bool,
}

/// Run every declaration through the session and append the generated
/// code to `out`.
pub fn generate<S: Stream>(
    conn: &mut Connection<S>,
    catalog: &Catalog,
    config: &Config,
    declarations: &[Declaration],
    out: &mut String,
) -> Result<()> {
    for declaration in declarations {
        generate_declaration(conn, catalog, config, declaration, out)
            .with_context(|| format!("declaration `{}`", declaration.header))?;
    }
    Ok(())
}

fn generate_declaration<S: Stream>(
    conn: &mut Connection<S>,
    catalog: &Catalog,
    config: &Config,
    declaration: &Declaration,
    out: &mut String,
) -> Result<()> {
    let has_row_description = conn.get_query_metadata(&declaration.body)?;

    match declaration.result_kind {
        ResultKind::None => {
            ensure!(!has_row_description, "statement declared with `!` returns rows");
        }
        ResultKind::Direct => {
            ensure!(has_row_description, "statement returns no rows; declare it with `!`");
            if declaration.result_count == ResultCount::Many {
                ensure!(
                    conn.fields_len() == 1,
                    "`#` with `+` requires exactly one result column, got {}",
                    conn.fields_len(),
                );
            }
        }
        ResultKind::Struct => {
            ensure!(has_row_description, "statement returns no rows; declare it with `!`");
        }
    }

    let params = resolve_parameters(conn, config)?;
    let mut columns = resolve_columns(conn, catalog, config)?;
    apply_column_options(&declaration.column_options, &mut columns)?;

    emit(declaration, &params, &columns, out)?;
    Ok(())
}

fn resolve_parameters<S: Stream>(
    conn: &Connection<S>,
    config: &Config,
) -> Result<Vec<TypeMapping>> {
    conn.parameter_oids()
        .iter()
        .enumerate()
        .map(|(i, oid)| {
            let mapping = config
                .types
                .get(oid)
                .with_context(|| format!("no type mapping for oid {oid} (parameter ${})", i + 1))?;
            Ok(mapping.clone())
        })
        .collect()
}

fn resolve_columns<S: Stream>(
    conn: &Connection<S>,
    catalog: &Catalog,
    config: &Config,
) -> Result<Vec<ResolvedColumn>> {
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(conn.fields_len());

    for (i, field) in conn.fields().iter().enumerate() {
        let name = String::from_utf8_lossy(conn.field_name(i)).into_owned();
        ensure!(!name.trim().is_empty(), "column {} has a blank name", i + 1);
        ensure!(seen.insert(name.clone()), "duplicate field name {name:?}");

        let mapping = config
            .types
            .get(&field.type_oid)
            .with_context(|| format!("no type mapping for oid {} (column {name:?})", field.type_oid))?;

        // columns without a backing table are nullable unless overridden
        let mut table = None;
        let mut table_column = None;
        let mut nullable = true;
        if field.table_oid != 0 {
            table = catalog.table_name(field.table_oid).map(str::to_owned);
            if let Some(attribute) = catalog.attribute(field.table_oid, field.column_attnum) {
                table_column = Some(attribute.name.clone());
                nullable = !attribute.not_null;
            }
        }

        columns.push(ResolvedColumn {
            name,
            table,
            table_column,
            rust_type: mapping.rust.clone(),
            nullable,
        });
    }
    Ok(columns)
}

/// Resolve each option to a column and apply the override. Duplicate
/// targets, out-of-range indices and unknown names are errors.
pub(crate) fn apply_column_options(
    options: &[ColumnOption],
    columns: &mut [ResolvedColumn],
) -> Result<()> {
    let mut targeted = HashSet::new();
    for option in options {
        let index = match &option.selector {
            Selector::Index(index) => {
                ensure!(
                    (1..=columns.len()).contains(index),
                    "column index {index} out of range (1..={})",
                    columns.len(),
                );
                index - 1
            }
            Selector::Name { table: None, column } => columns
                .iter()
                .position(|c| c.name == *column)
                .with_context(|| format!("unknown column {column:?}"))?,
            // a qualified selector matches the underlying column or the
            // result field name
            Selector::Name { table: Some(table), column } => columns
                .iter()
                .position(|c| {
                    c.table.as_deref() == Some(table.as_str())
                        && (c.name == *column || c.table_column.as_deref() == Some(column.as_str()))
                })
                .with_context(|| format!("unknown column {table:?}.{column:?}"))?,
        };
        ensure!(
            targeted.insert(index),
            "duplicate column option for column {} ({:?})",
            index + 1,
            columns[index].name,
        );
        columns[index].nullable = option.nullable;
    }
    Ok(())
}

fn emit(
    declaration: &Declaration,
    params: &[TypeMapping],
    columns: &[ResolvedColumn],
    out: &mut String,
) -> Result<()> {
    let name = if declaration.func_name.is_empty() {
        &declaration.struct_name
    } else {
        &declaration.func_name
    };

    writeln!(out)?;
    writeln!(out, "/// `{declaration}`")?;
    for (i, param) in params.iter().enumerate() {
        writeln!(out, "/// * `${}`: `{}` ({})", i + 1, param.rust, param.postgres)?;
    }
    writeln!(out, "pub const {}_QUERY: &str = {:?};", upper_snake(name), declaration.body)?;

    match declaration.result_kind {
        ResultKind::None => {}
        ResultKind::Direct => {
            let mut tuple = String::new();
            for column in columns {
                if !tuple.is_empty() {
                    tuple.push_str(", ");
                }
                tuple.push_str(&column_type(column));
            }
            let row = if columns.len() == 1 { tuple } else { format!("({tuple})") };
            writeln!(out, "pub type {}Row = {row};", pascal(name))?;
        }
        ResultKind::Struct => {
            writeln!(out, "#[derive(Debug, Clone)]")?;
            writeln!(out, "pub struct {} {{", declaration.struct_name)?;
            for column in columns {
                writeln!(out, "    pub {}: {},", column.name, column_type(column))?;
            }
            writeln!(out, "}}")?;
        }
    }
    Ok(())
}

fn column_type(column: &ResolvedColumn) -> String {
    if column.nullable {
        format!("Option<{}>", column.rust_type)
    } else {
        column.rust_type.clone()
    }
}

/// `listEvents` to `LIST_EVENTS`.
fn upper_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.extend(c.to_uppercase());
    }
    out
}

/// `listEvents` to `ListEvents`.
fn pascal(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ResolvedColumn> {
        vec![
            ResolvedColumn {
                name: "id".to_owned(),
                table: Some("events".to_owned()),
                table_column: Some("id".to_owned()),
                rust_type: "i64".to_owned(),
                nullable: false,
            },
            ResolvedColumn {
                name: "action".to_owned(),
                table: Some("events".to_owned()),
                table_column: Some("action_kind".to_owned()),
                rust_type: "String".to_owned(),
                nullable: true,
            },
        ]
    }

    fn option(selector: Selector, nullable: bool) -> ColumnOption {
        ColumnOption { selector, nullable }
    }

    #[test]
    fn overrides_by_index_name_and_qualified_name() {
        let mut cols = columns();
        apply_column_options(
            &[
                option(Selector::Index(1), true),
                option(
                    Selector::Name { table: Some("events".to_owned()), column: "action".to_owned() },
                    false,
                ),
            ],
            &mut cols,
        )
        .unwrap();
        assert!(cols[0].nullable);
        assert!(!cols[1].nullable);
    }

    #[test]
    fn qualified_selector_matches_the_underlying_column_name() {
        // the field is aliased `action`, the table column is `action_kind`
        let mut cols = columns();
        apply_column_options(
            &[option(
                Selector::Name {
                    table: Some("events".to_owned()),
                    column: "action_kind".to_owned(),
                },
                false,
            )],
            &mut cols,
        )
        .unwrap();
        assert!(!cols[1].nullable);
    }

    #[test]
    fn rejects_out_of_range_unknown_and_duplicate_targets() {
        let mut cols = columns();
        let err = apply_column_options(&[option(Selector::Index(3), true)], &mut cols)
            .unwrap_err()
            .to_string();
        assert!(err.contains("out of range"), "{err}");

        let err = apply_column_options(
            &[option(Selector::Name { table: None, column: "nope".to_owned() }, true)],
            &mut cols,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("unknown column"), "{err}");

        // an index and a name can target the same column
        let err = apply_column_options(
            &[
                option(Selector::Index(2), true),
                option(Selector::Name { table: None, column: "action".to_owned() }, false),
            ],
            &mut cols,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("duplicate column option"), "{err}");
    }

    #[test]
    fn name_casing_helpers() {
        assert_eq!(upper_snake("listEvents"), "LIST_EVENTS");
        assert_eq!(upper_snake("Event"), "EVENT");
        assert_eq!(pascal("countEvents"), "CountEvents");
    }
}
