//! JSON configuration for a code generation run.
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pgq::Oid;
use serde::Deserialize;

/// How one PostgreSQL type is spelled in generated code.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeMapping {
    /// The PostgreSQL type name, for diagnostics.
    pub postgres: String,
    /// The Rust type written into generated code.
    pub rust: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub address: String,
    pub user: String,
    pub password: String,
    pub database: String,
    /// SQL files holding `--- ` declarations.
    pub files: Vec<PathBuf>,
    /// Type OID to generated-type mapping.
    pub types: HashMap<Oid, TypeMapping>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open config {}", path.display()))?;
        serde_json::from_reader(file).with_context(|| format!("parse config {}", path.display()))
    }
}
