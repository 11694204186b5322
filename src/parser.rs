//! Forward-only dump reader.
//!
//! The byte stream is framed into `<page>`…`</page>` fragments without ever
//! holding more than one record in memory. Each fragment is then tokenized
//! with quick-xml into field events. A fragment that cannot be framed or
//! parsed turns into a single [`DumpEvent::ParseError`] and reading carries
//! on with the next record.

use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use memchr::memmem;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info};

const PAGE_OPEN: &[u8] = b"<page";
const PAGE_CLOSE: &[u8] = b"</page>";
const READ_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldName {
    Title,
    Namespace,
    Id,
    Text,
    /// `title` attribute of `<redirect/>`
    RedirectTitle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpEvent {
    RecordStart { offset: u64 },
    Field { name: FieldName, value: String },
    RecordEnd { end_offset: u64 },
    /// One record could not be read; scanning resumed at `next_offset`.
    ParseError {
        offset: u64,
        next_offset: u64,
        message: String,
    },
}

/// A framed record, not yet tokenized
struct Fragment {
    offset: u64,
    end_offset: u64,
    bytes: Vec<u8>,
}

enum Framed {
    Fragment(Fragment),
    Broken {
        offset: u64,
        next_offset: u64,
        message: String,
    },
}

pub struct WikiReader {
    input: Box<dyn BufRead + Send>,
    /// Decompressed bytes consumed from `input`, including the resume offset
    position: u64,
    /// Unprocessed bytes and the stream offset of their first byte
    carry: Vec<u8>,
    carry_offset: u64,
    /// In-flight record: start offset and bytes seen so far
    record: Option<(u64, Vec<u8>)>,
    pending: VecDeque<DumpEvent>,
    done: bool,
}

impl WikiReader {
    /// Opens a plain or `.bz2` dump, positioned at `start_offset` of the decompressed stream.
    ///
    /// Compressed dumps may hold several concatenated bz2 streams; all of them are read.
    pub fn open(path: &str, start_offset: u64) -> Result<Self> {
        let mut file = File::open(path).with_context(|| format!("Failed to open dump: {}", path))?;

        let is_bz2 = Path::new(path)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bz2"));

        let input: Box<dyn BufRead + Send> = if is_bz2 {
            let mut reader = BufReader::with_capacity(READ_BUFFER, MultiBzDecoder::new(file));
            if start_offset > 0 {
                info!(offset = start_offset, "Skipping compressed input to resume offset");
                let skipped = io::copy(&mut (&mut reader).take(start_offset), &mut io::sink())
                    .context("Failed to skip to resume offset")?;
                if skipped < start_offset {
                    anyhow::bail!(
                        "Resume offset {start_offset} is past the end of the dump ({skipped} bytes)"
                    );
                }
            }
            Box::new(reader)
        } else {
            if start_offset > 0 {
                file.seek(SeekFrom::Start(start_offset))
                    .with_context(|| format!("Failed to seek to offset {start_offset}"))?;
            }
            Box::new(BufReader::with_capacity(READ_BUFFER, file))
        };

        Ok(Self::from_reader(input, start_offset))
    }

    /// Reads from any buffered source whose first byte sits at `base_offset`.
    pub fn from_reader(input: Box<dyn BufRead + Send>, base_offset: u64) -> Self {
        Self {
            input,
            position: base_offset,
            carry: Vec::new(),
            carry_offset: base_offset,
            record: None,
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn next_framed(&mut self) -> Result<Option<Framed>> {
        loop {
            if self.carry.is_empty() {
                let read = self
                    .input
                    .read_until(b'\n', &mut self.carry)
                    .context("Failed to read from dump")?;
                if read == 0 {
                    return Ok(self.record.take().map(|(offset, _)| Framed::Broken {
                        offset,
                        next_offset: self.position,
                        message: "record truncated by end of input".to_string(),
                    }));
                }
                self.carry_offset = self.position;
                self.position += read as u64;
            }

            let chunk = std::mem::take(&mut self.carry);
            let chunk_offset = self.carry_offset;

            match self.record.take() {
                None => {
                    if let Some(start) = find_page_open(&chunk) {
                        self.record = Some((chunk_offset + start as u64, PAGE_OPEN.to_vec()));
                        self.keep_tail(chunk, start + PAGE_OPEN.len(), chunk_offset);
                    }
                    // No record start on this line: it is preamble or inter-record noise.
                }
                Some((offset, mut bytes)) => {
                    let close = memmem::find(&chunk, PAGE_CLOSE);
                    let reopen = find_page_open(&chunk);

                    match (close, reopen) {
                        (_, Some(open)) if close.is_none_or(|c| open < c) => {
                            self.keep_tail(chunk, open, chunk_offset);
                            return Ok(Some(Framed::Broken {
                                offset,
                                next_offset: chunk_offset + open as u64,
                                message: "record not closed before the next <page>".to_string(),
                            }));
                        }
                        (Some(close), _) => {
                            let end = close + PAGE_CLOSE.len();
                            bytes.extend_from_slice(&chunk[..end]);
                            let end_offset = chunk_offset + end as u64;
                            self.keep_tail(chunk, end, chunk_offset);
                            return Ok(Some(Framed::Fragment(Fragment {
                                offset,
                                end_offset,
                                bytes,
                            })));
                        }
                        _ => {
                            bytes.extend_from_slice(&chunk);
                            self.record = Some((offset, bytes));
                        }
                    }
                }
            }
        }
    }

    fn keep_tail(&mut self, mut chunk: Vec<u8>, from: usize, chunk_offset: u64) {
        chunk.drain(..from);
        self.carry = chunk;
        self.carry_offset = chunk_offset + from as u64;
    }
}

/// Finds `<page>` / `<page attr=..>` but not `<pages` or similar.
fn find_page_open(haystack: &[u8]) -> Option<usize> {
    memmem::find_iter(haystack, PAGE_OPEN).find(|&pos| {
        matches!(
            haystack.get(pos + PAGE_OPEN.len()),
            Some(b'>' | b' ' | b'\t' | b'\r' | b'\n' | b'/')
        )
    })
}

/// Tokenizes one framed record into start/field/end events.
fn tokenize(fragment: &Fragment) -> Vec<DumpEvent> {
    match collect_fields(&fragment.bytes) {
        Ok(fields) => {
            let mut events = Vec::with_capacity(fields.len() + 2);
            events.push(DumpEvent::RecordStart {
                offset: fragment.offset,
            });
            events.extend(
                fields
                    .into_iter()
                    .map(|(name, value)| DumpEvent::Field { name, value }),
            );
            events.push(DumpEvent::RecordEnd {
                end_offset: fragment.end_offset,
            });
            events
        }
        Err(message) => vec![DumpEvent::ParseError {
            offset: fragment.offset,
            next_offset: fragment.end_offset,
            message,
        }],
    }
}

fn field_for_path(path: &[Vec<u8>]) -> Option<FieldName> {
    match path {
        [page, field] if page == b"page" => match field.as_slice() {
            b"title" => Some(FieldName::Title),
            b"ns" => Some(FieldName::Namespace),
            b"id" => Some(FieldName::Id),
            _ => None,
        },
        [page, revision, text] if page == b"page" && revision == b"revision" && text == b"text" => {
            Some(FieldName::Text)
        }
        _ => None,
    }
}

fn collect_fields(bytes: &[u8]) -> std::result::Result<Vec<(FieldName, String)>, String> {
    let mut reader = Reader::from_reader(bytes);
    reader.check_end_names(true);

    let mut buf = Vec::with_capacity(8192);
    let mut path: Vec<Vec<u8>> = Vec::with_capacity(8);
    let mut fields = Vec::with_capacity(5);
    let mut capturing: Option<(FieldName, String)> = None;
    let mut closed = false;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| format!("XML error at byte {}: {e}", reader.buffer_position()))?
        {
            Event::Start(ref e) => {
                if closed {
                    return Err("content after </page>".to_string());
                }
                path.push(e.name().as_ref().to_vec());
                if let Some(name) = field_for_path(&path) {
                    capturing = Some((name, String::new()));
                }
            }
            Event::Empty(ref e) => {
                let name = e.name();
                if path.len() == 1 && name.as_ref() == b"redirect" {
                    if let Ok(Some(attr)) = e.try_get_attribute("title") {
                        let value = attr
                            .unescape_value()
                            .map_err(|e| format!("bad redirect attribute: {e}"))?;
                        fields.push((FieldName::RedirectTitle, value.into_owned()));
                    }
                } else {
                    path.push(name.as_ref().to_vec());
                    if let Some(field) = field_for_path(&path) {
                        fields.push((field, String::new()));
                    }
                    path.pop();
                }
            }
            Event::Text(ref e) => {
                if let Some((_, ref mut value)) = capturing {
                    let text = e.unescape().map_err(|e| format!("bad text: {e}"))?;
                    value.push_str(&text);
                }
            }
            Event::CData(ref e) => {
                if let Some((_, ref mut value)) = capturing {
                    value.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::End(_) => {
                if let Some(field) = capturing.take() {
                    fields.push(field);
                }
                path.pop();
                if path.is_empty() {
                    closed = true;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !closed {
        return Err("unbalanced elements in record".to_string());
    }
    Ok(fields)
}

impl Iterator for WikiReader {
    type Item = Result<DumpEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            match self.next_framed() {
                Ok(Some(Framed::Fragment(fragment))) => {
                    self.pending.extend(tokenize(&fragment));
                }
                Ok(Some(Framed::Broken {
                    offset,
                    next_offset,
                    message,
                })) => {
                    debug!(offset, next_offset, %message, "Structural parse error");
                    self.pending.push_back(DumpEvent::ParseError {
                        offset,
                        next_offset,
                        message,
                    });
                }
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
