//! Trace decoder (spec section 4.1 / 6.1).
//!
//! Decodes one ASCII record at a time into an [`Event`]. File names are
//! interned through [`FileTable`] so the hot path never allocates once a
//! file has been seen once.

use crate::error::{Result, SimError};
use std::io::BufRead;

/// Interned file id. Resolved back to a string only when a report is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

#[derive(Debug, Default)]
pub struct FileTable {
    names: Vec<String>,
    index: std::collections::HashMap<String, FileId>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> FileId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = FileId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn resolve(&self, id: FileId) -> &str {
        &self.names[id.0 as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Load,
    Store,
    InstructionFetch,
}

/// A single decoded trace record.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: AccessKind,
    pub addr: u64,
    /// Size in bytes (load/store size, or instruction basic-block size).
    pub size: u32,
    pub file: FileId,
    pub line_no: u32,
    pub thread: u32,
}

/// Streaming decoder over any buffered byte source. Yields one event at a
/// time; empty lines are skipped, any other malformed line aborts the run.
pub struct TraceDecoder<R> {
    reader: R,
    line_no: usize,
    buf: String,
    done: bool,
}

impl<R: BufRead> TraceDecoder<R> {
    pub fn new(reader: R) -> Self {
        TraceDecoder {
            reader,
            line_no: 0,
            buf: String::new(),
            done: false,
        }
    }

    /// Parses the next non-empty line, returning `None` at EOF. The
    /// streaming half of the decoder; the engine drives this directly so it
    /// can poll cancellation and apply sampling between records.
    pub fn next_record(&mut self, files: &mut FileTable) -> Option<Result<Event>> {
        loop {
            self.buf.clear();
            let n = match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(SimError::MalformedTrace {
                        line: self.line_no + 1,
                        reason: format!("I/O error: {e}"),
                    }));
                }
            };
            let _ = n;
            self.line_no += 1;
            let line = self.buf.trim_end_matches(['\r', '\n']);
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_record(line, self.line_no, files));
        }
    }

    /// Decodes the whole remaining stream into a `Vec<Event>`, interning
    /// file names into `files` as it goes. Convenience for tests and the
    /// CLI's non-streaming paths; the engine itself pulls events one at a
    /// time via `for_each`.
    pub fn for_each<F>(mut self, files: &mut FileTable, mut f: F) -> Result<()>
    where
        F: FnMut(Event) -> Result<()>,
    {
        if self.done {
            return Ok(());
        }
        while let Some(record) = self.next_record(files) {
            f(record?)?;
        }
        Ok(())
    }
}

fn parse_record(line: &str, line_no: usize, files: &mut FileTable) -> Result<Event> {
    let mut parts = line.split_whitespace();
    let kind_tok = parts.next().ok_or_else(|| malformed(line_no, "empty record"))?;
    let kind = match kind_tok {
        "L" => AccessKind::Load,
        "S" => AccessKind::Store,
        "I" => AccessKind::InstructionFetch,
        other => {
            return Err(malformed(
                line_no,
                &format!("unknown record kind {other:?}"),
            ))
        }
    };

    let addr_tok = parts
        .next()
        .ok_or_else(|| malformed(line_no, "missing address field"))?;
    let addr_hex = addr_tok.strip_prefix("0x").unwrap_or(addr_tok);
    let addr = u64::from_str_radix(addr_hex, 16)
        .map_err(|_| malformed(line_no, &format!("invalid hex address {addr_tok:?}")))?;

    let size_tok = parts
        .next()
        .ok_or_else(|| malformed(line_no, "missing size field"))?;
    let size: u32 = size_tok
        .parse()
        .map_err(|_| malformed(line_no, &format!("invalid size {size_tok:?}")))?;

    let src_tok = parts
        .next()
        .ok_or_else(|| malformed(line_no, "missing file:line field"))?;
    let (file, src_line) = src_tok
        .rsplit_once(':')
        .ok_or_else(|| malformed(line_no, &format!("malformed file:line {src_tok:?}")))?;
    if file.is_empty() {
        return Err(malformed(line_no, "empty file name"));
    }
    let line_no_field: u32 = src_line
        .parse()
        .map_err(|_| malformed(line_no, &format!("invalid source line {src_line:?}")))?;

    let mut thread = 0u32;
    if let Some(tid_tok) = parts.next() {
        if let Some(digits) = tid_tok.strip_prefix('T') {
            thread = digits
                .parse()
                .map_err(|_| malformed(line_no, &format!("invalid thread id {tid_tok:?}")))?;
        }
        // Unknown trailing fields are ignored per spec section 6.1.
    }

    Ok(Event {
        kind,
        addr,
        size,
        file: files.intern(file),
        line_no: line_no_field,
        thread,
    })
}

fn malformed(line: usize, reason: &str) -> SimError {
    SimError::MalformedTrace {
        line,
        reason: reason.to_string(),
    }
}
