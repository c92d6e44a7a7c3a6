//! Profile file format
//!
//! Line-oriented text, one record per line, fields colon-separated:
//!
//! ```text
//! TYPE:METHOD:BCI:INDEX
//! MID:Foo.bar(I)V:3:0x10
//! NID:Foo.baz()V:7:0x20
//! ```
//!
//! `MID` records name invocation sites, `NID` records allocation sites.
//! `BCI` is decimal, `INDEX` is a hexadecimal 16-bit index with an optional
//! `0x` prefix. Empty fields are skipped, so `::` acts as a single separator.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::context::hash::name_key;
use crate::context::ContextKind;
use crate::error::ProfileError;

/// One line of a profile file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub kind: ContextKind,
    pub method: String,
    pub bci: u32,
    pub index: u16,
}

impl ProfileRecord {
    /// Table key this record is stored under.
    pub fn key(&self) -> u32 {
        name_key(&self.method, self.bci)
    }
}

impl fmt::Display for ProfileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{:#06x}",
            self.kind.tag(),
            self.method,
            self.bci,
            self.index
        )
    }
}

/// Parse one line. Blank lines yield `None`.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<ProfileRecord>, ProfileError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let mut fields = line.split(':').filter(|field| !field.is_empty());
    let mut next = |field: &'static str| {
        fields
            .next()
            .ok_or(ProfileError::MalformedRecord { line: line_no, field })
    };

    let tag = next("type")?;
    let method = next("method")?;
    let bci = next("bci")?;
    let index = next("index")?;

    let kind = ContextKind::from_tag(tag).ok_or_else(|| ProfileError::UnknownRecordType {
        line: line_no,
        tag: tag.to_string(),
    })?;

    let bci = bci
        .trim()
        .parse::<u32>()
        .map_err(|_| ProfileError::InvalidNumber {
            line: line_no,
            field: "bci",
            value: bci.to_string(),
        })?;

    let index = parse_index(index).ok_or_else(|| ProfileError::InvalidNumber {
        line: line_no,
        field: "index",
        value: index.to_string(),
    })?;

    Ok(Some(ProfileRecord {
        kind,
        method: method.to_string(),
        bci,
        index,
    }))
}

/// Hexadecimal index, truncated to 16 bits.
fn parse_index(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    let value = u32::from_str_radix(digits, 16).ok()?;
    if value > u16::MAX as u32 {
        log::warn!("profile index {:#x} truncated to 16 bits", value);
    }
    Some(value as u16)
}

/// Parse every record from `reader`. The first bad line aborts the load.
pub fn parse_profile<R: BufRead>(reader: R) -> Result<Vec<ProfileRecord>, ProfileError> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ProfileError::Io {
            path: "<reader>".into(),
            source,
        })?;
        if let Some(record) = parse_line(i + 1, &line)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Read and parse a profile file.
pub fn read_profile(path: &Path) -> Result<Vec<ProfileRecord>, ProfileError> {
    let file = File::open(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_profile(BufReader::new(file)).map_err(|err| match err {
        ProfileError::Io { source, .. } => ProfileError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Write records, one per line.
pub fn write_profile<'a, W, I>(mut writer: W, records: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a ProfileRecord>,
{
    for record in records {
        writeln!(writer, "{}", record)?;
    }
    writer.flush()
}
