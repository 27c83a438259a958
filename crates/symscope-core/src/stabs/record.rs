//! # Record Demultiplexer
//!
//! Decodes the raw `.stab` record array and resolves each record's string in
//! the companion `.stabstr` section.
//!
//! ## Record layout (12 bytes, image byte order)
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0 | 4 | string-table offset |
//! | 4 | 1 | record kind |
//! | 5 | 1 | auxiliary byte |
//! | 6 | 2 | signed descriptor |
//! | 8 | 4 | value |
//!
//! String offsets are relative to the current string-table partition. Each
//! object file linked into the image contributes one partition, announced by
//! an `N_UNDF` record whose value is the partition size.
//!
//! A string ending in `\` continues in the next record's string. The reader
//! accumulates such pieces and yields one [`StabEntry`] carrying the joined
//! text and the fields of the record that completed it.

use gimli::{EndianSlice, Reader, RunTimeEndian};
use tracing::warn;

use super::N_UNDF;
use crate::symbols::{Diagnostic, DiagnosticKind};

/// Size in bytes of one stab record.
pub const STAB_RECORD_SIZE: usize = 12;

/// A record exactly as stored in the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStab
{
    pub strx: u32,
    pub kind: u8,
    pub other: u8,
    pub desc: i16,
    pub value: u32,
}

impl RawStab
{
    /// Decode one record from exactly [`STAB_RECORD_SIZE`] bytes.
    ///
    /// ## Errors
    ///
    /// Returns a `gimli::Error` if `bytes` is shorter than a record.
    pub fn decode(bytes: &[u8], endian: RunTimeEndian) -> gimli::Result<Self>
    {
        let mut reader = EndianSlice::new(bytes, endian);
        Ok(Self {
            strx: reader.read_u32()?,
            kind: reader.read_u8()?,
            other: reader.read_u8()?,
            desc: reader.read_i16()?,
            value: reader.read_u32()?,
        })
    }
}

/// A record with its string resolved and continuations joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabEntry
{
    pub kind: u8,
    pub other: u8,
    pub desc: i16,
    pub value: u32,
    pub text: String,
}

/// Streaming reader over a `.stab` section.
pub struct StabReader<'data>
{
    stabs: &'data [u8],
    strings: &'data [u8],
    endian: RunTimeEndian,
    position: usize,
    string_base: usize,
    pending_partition: usize,
    continued: String,
}

impl<'data> StabReader<'data>
{
    pub fn new(stabs: &'data [u8], strings: &'data [u8], endian: RunTimeEndian) -> Self
    {
        Self {
            stabs,
            strings,
            endian,
            position: 0,
            string_base: 0,
            pending_partition: 0,
            continued: String::new(),
        }
    }

    /// Number of whole records in the section.
    pub fn record_count(&self) -> usize
    {
        self.stabs.len() / STAB_RECORD_SIZE
    }

    /// Next dispatchable entry, or `None` at the end of the section.
    ///
    /// Format problems (bad string offsets, a truncated trailing record, a
    /// dangling continuation) are appended to `diagnostics` and do not stop
    /// the stream.
    pub fn next_entry(&mut self, diagnostics: &mut Vec<Diagnostic>) -> Option<StabEntry>
    {
        loop {
            let Some(chunk) = self.stabs.get(self.position..self.position + STAB_RECORD_SIZE) else {
                return self.finish(diagnostics);
            };
            let offset = self.position;
            self.position += STAB_RECORD_SIZE;

            let raw = match RawStab::decode(chunk, self.endian) {
                Ok(raw) => raw,
                Err(err) => {
                    report(diagnostics, DiagnosticKind::Format, format!("record at offset {offset}: {err}"));
                    continue;
                }
            };

            if raw.kind == N_UNDF {
                self.string_base += self.pending_partition;
                self.pending_partition = raw.value as usize;
            }

            let piece = self.resolve_string(raw.strx, diagnostics);
            if let Some(stripped) = piece.strip_suffix('\\') {
                self.continued.push_str(stripped);
                continue;
            }

            let text = if self.continued.is_empty() {
                piece
            } else {
                let mut joined = std::mem::take(&mut self.continued);
                joined.push_str(&piece);
                joined
            };

            return Some(StabEntry {
                kind: raw.kind,
                other: raw.other,
                desc: raw.desc,
                value: raw.value,
                text,
            });
        }
    }

    fn finish(&mut self, diagnostics: &mut Vec<Diagnostic>) -> Option<StabEntry>
    {
        let trailing = self.stabs.len().saturating_sub(self.position);
        if trailing > 0 {
            report(
                diagnostics,
                DiagnosticKind::Format,
                format!("{trailing} trailing bytes after the last stab record"),
            );
            self.position = self.stabs.len();
        }
        if !self.continued.is_empty() {
            let text = std::mem::take(&mut self.continued);
            report(
                diagnostics,
                DiagnosticKind::Format,
                format!("stab string continued past the end of the section: {text}"),
            );
        }
        None
    }

    fn resolve_string(&self, strx: u32, diagnostics: &mut Vec<Diagnostic>) -> String
    {
        let start = self.string_base + strx as usize;
        let Some(tail) = self.strings.get(start..) else {
            report(
                diagnostics,
                DiagnosticKind::Format,
                format!("string offset {start} is outside the string table ({} bytes)", self.strings.len()),
            );
            return String::new();
        };
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    }
}

fn report(diagnostics: &mut Vec<Diagnostic>, kind: DiagnosticKind, message: String)
{
    warn!(?kind, "{message}");
    diagnostics.push(Diagnostic::new(kind, message));
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::stabs::{N_FUN, N_SO};

    fn record(strx: u32, kind: u8, desc: i16, value: u32) -> Vec<u8>
    {
        let mut bytes = Vec::with_capacity(STAB_RECORD_SIZE);
        bytes.extend_from_slice(&strx.to_le_bytes());
        bytes.push(kind);
        bytes.push(0);
        bytes.extend_from_slice(&desc.to_le_bytes());
        bytes.extend_from_slice(&value.to_le_bytes());
        bytes
    }

    #[test]
    fn test_decode_little_and_big_endian()
    {
        let le = record(7, N_FUN, -2, 0x1000);
        let raw = RawStab::decode(&le, RunTimeEndian::Little).unwrap();
        assert_eq!(raw, RawStab { strx: 7, kind: N_FUN, other: 0, desc: -2, value: 0x1000 });

        let be = [0, 0, 0, 7, N_FUN, 0, 0xff, 0xfe, 0, 0, 0x10, 0];
        let raw = RawStab::decode(&be, RunTimeEndian::Big).unwrap();
        assert_eq!(raw, RawStab { strx: 7, kind: N_FUN, other: 0, desc: -2, value: 0x1000 });
    }

    #[test]
    fn test_partition_base_moves_on_undf()
    {
        // Two partitions: "\0a.c\0" and "\0b.c\0".
        let strings = b"\0a.c\0\0b.c\0";
        let mut stabs = Vec::new();
        stabs.extend(record(0, N_UNDF, 0, 5));
        stabs.extend(record(1, N_SO, 0, 0));
        stabs.extend(record(0, N_UNDF, 0, 5));
        stabs.extend(record(1, N_SO, 0, 0));

        let mut reader = StabReader::new(&stabs, strings, RunTimeEndian::Little);
        let mut diagnostics = Vec::new();
        let texts: Vec<String> = std::iter::from_fn(|| reader.next_entry(&mut diagnostics))
            .filter(|entry| entry.kind == N_SO)
            .map(|entry| entry.text)
            .collect();

        assert_eq!(texts, vec!["a.c", "b.c"]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_bad_string_offset_is_reported()
    {
        let stabs = record(99, N_SO, 0, 0);
        let mut reader = StabReader::new(&stabs, b"\0", RunTimeEndian::Little);
        let mut diagnostics = Vec::new();
        let entry = reader.next_entry(&mut diagnostics).unwrap();
        assert_eq!(entry.text, "");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Format);
    }
}
