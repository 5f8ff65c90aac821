use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use pgq::Connection;

mod catalog;
mod config;
mod declaration;
mod generate;
mod parser;

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args_os().skip(1);
    let config_path = args.next().context("usage: pgq-codegen <config.json> [output.rs]")?;
    let output_path = args.next().map(PathBuf::from);

    let config = config::Config::load(Path::new(&config_path))?;

    let pg = pgq::Config::new(&config.address, &config.user, &config.password, &config.database);
    let mut conn = Connection::connect(&pg)?;

    let catalog = catalog::Catalog::load(&mut conn)?;

    let mut out = String::from("// Generated by pgq-codegen. Do not edit.\n");
    for path in &config.files {
        let file = parser::SqlFile::read(path)?;
        let declarations =
            parser::parse_declarations(&file).with_context(|| path.display().to_string())?;
        log::info!("{}: {} declarations", path.display(), declarations.len());
        generate::generate(&mut conn, &catalog, &config, &declarations, &mut out)
            .with_context(|| path.display().to_string())?;
    }

    conn.close()?;

    match output_path {
        Some(path) => {
            std::fs::write(&path, out).with_context(|| format!("write {}", path.display()))?;
        }
        None => print!("{out}"),
    }
    Ok(())
}
