//! SQL source indexing and declaration block scanning.
//!
//! Comments and strings are handled in a database-general way. Double
//! and single quotes can span multiple lines; repetition escapes them.
//! Block comments can not be nested, but may textually contain line
//! comments. Whatever marker comes first takes precedence over the rest.
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::declaration::Declaration;

const HEADER_PREFIX: &str = "--- ";

/// A SQL source file with a newline index.
///
/// Lines are inclusive slices between newline bytes; the trailing
/// newline belongs to its line.
pub struct SqlFile {
    contents: String,
    newline_offsets: Vec<usize>,
}

impl SqlFile {
    pub fn new(contents: String) -> Self {
        let newline_offsets = contents
            .bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(i, _)| i)
            .collect();
        Self { contents, newline_offsets }
    }

    /// Read and index a file. Invalid UTF-8 is rejected.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Ok(Self::new(contents))
    }

    pub fn line_count(&self) -> usize {
        self.newline_offsets.len() + 1
    }

    /// The line at `index`, including its trailing newline.
    ///
    /// Panics when `index` is out of bounds.
    pub fn line_at(&self, index: usize) -> &str {
        let (from, to) = self.line_range(index);
        &self.contents[from..to]
    }

    /// The slice spanning lines `from..=to_inclusive`.
    pub fn line_slice(&self, from: usize, to_inclusive: usize) -> &str {
        let (slice_from, _) = self.line_range(from);
        let (_, slice_to) = self.line_range(to_inclusive);
        &self.contents[slice_from..slice_to]
    }

    fn line_range(&self, index: usize) -> (usize, usize) {
        assert!(index < self.line_count(), "line index out of bounds");
        let from = if index == 0 { 0 } else { self.newline_offsets[index - 1] + 1 };
        let to = match self.newline_offsets.get(index) {
            Some(offset) => offset + 1,
            None => self.contents.len(),
        };
        (from, to)
    }
}

/// A raw declaration block: the header line plus everything up to the
/// next blank line.
pub(crate) struct Block {
    pub start_line: usize,
    /// The blank line ending the block, or the last line of the file.
    pub end_line: usize,
    pub header: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

fn first_marker(s: &str) -> Option<(Marker, usize)> {
    let candidates = [
        (Marker::SingleQuote, s.find('\'')),
        (Marker::DoubleQuote, s.find('"')),
        (Marker::LineComment, s.find("--")),
        (Marker::BlockComment, s.find("\\*")),
    ];
    candidates
        .into_iter()
        .filter_map(|(marker, pos)| pos.map(|pos| (marker, pos)))
        .min_by_key(|(_, pos)| *pos)
}

fn next_quoted(s: &str, quote: char) -> (&str, bool) {
    match s.find(quote) {
        None => ("", false),
        Some(i) => {
            let after = &s[i + 1..];
            if after.is_empty() {
                return ("", true);
            }
            // a doubled quote stays inside the string
            if after.starts_with(quote) { (&after[1..], false) } else { (after, true) }
        }
    }
}

/// Slice the file into raw declaration blocks, honoring SQL string and
/// comment lexical rules.
pub(crate) fn scan_blocks(file: &SqlFile) -> Result<Vec<Block>> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut inside_block = false;
    let mut state = Marker::None;
    let mut last_marker_line = 0usize; // for error reporting

    for line_index in 0..file.line_count() {
        let line = file.line_at(line_index);
        let trimmed = line.trim();

        if inside_block && trimmed.is_empty() {
            if let Some(block) = blocks.last_mut() {
                block.end_line = line_index;
            }
            inside_block = false;
            continue;
        }

        let mut remainder = line;
        loop {
            if remainder.is_empty() {
                break;
            }

            match state {
                Marker::None => match first_marker(remainder) {
                    None => remainder = "",
                    Some((marker, pos)) => {
                        state = marker;
                        remainder = &remainder[pos + 1..];
                        last_marker_line = line_index;
                    }
                },
                Marker::SingleQuote => {
                    let (rest, closed) = next_quoted(remainder, '\'');
                    remainder = rest;
                    if closed {
                        state = Marker::None;
                    }
                }
                Marker::DoubleQuote => {
                    let (rest, closed) = next_quoted(remainder, '"');
                    remainder = rest;
                    if closed {
                        state = Marker::None;
                    }
                }
                Marker::LineComment => {
                    if let Some(header) = trimmed.strip_prefix(HEADER_PREFIX) {
                        if inside_block {
                            bail!(
                                "line {}: declaration blocks must be separated by a blank line",
                                line_index + 1,
                            );
                        }
                        blocks.push(Block {
                            start_line: line_index,
                            end_line: file.line_count() - 1,
                            header: header.trim().to_owned(),
                        });
                        inside_block = true;
                    }
                    state = Marker::None;
                    remainder = "";
                }
                Marker::BlockComment => match remainder.find("*\\") {
                    None => remainder = "",
                    Some(end) => {
                        state = Marker::None;
                        remainder = &remainder[end + 2..];
                    }
                },
            }
        }
    }

    match state {
        Marker::None => Ok(blocks),
        Marker::SingleQuote => {
            bail!("line {}: unterminated single quote `'`", last_marker_line + 1)
        }
        Marker::DoubleQuote => {
            bail!("line {}: unterminated double quote `\"`", last_marker_line + 1)
        }
        Marker::BlockComment => {
            bail!("line {}: unterminated block comment `\\*`", last_marker_line + 1)
        }
        Marker::LineComment => unreachable!(),
    }
}

/// Parse every declaration block in the file.
pub fn parse_declarations(file: &SqlFile) -> Result<Vec<Declaration>> {
    scan_blocks(file)?
        .into_iter()
        .map(|block| Declaration::from_block(block, file))
        .collect()
}
