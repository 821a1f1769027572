//! Append-only source buffers and the fragment map built on top of them.
//!
//! Every piece of text the front end sees (interactive inputs, scaffold
//! functions, rewritten wrappers, included files) is appended to a
//! [`SourceBuffer`] and described by a [`SourceFragment`]. Buffers never
//! shrink, so a span issued for committed text stays readable for the whole
//! session.

use std::ops::Range;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error};

use crate::compiler::tokens::Span;

/// Growth granularity of a buffer's backing storage.
pub const GROWTH_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("source buffer '{identifier}' must grow to {needed} bytes after its start address was registered")]
    ReallocAfterRegistration { identifier: String, needed: usize },
    #[error("unknown source file id {0}")]
    UnknownFile(u32),
}

/// A NUL-terminated, append-only byte buffer with a stable start address
/// between reallocations.
#[derive(Debug)]
pub struct SourceBuffer {
    identifier: String,
    data: Vec<u8>,
    registered: bool,
}

fn round_to_chunk(bytes: usize) -> usize {
    bytes.div_ceil(GROWTH_CHUNK).max(1) * GROWTH_CHUNK
}

impl SourceBuffer {
    pub fn new(initial: &str, identifier: &str) -> Self {
        let mut data = Vec::with_capacity(round_to_chunk(initial.len() + 1));
        data.extend_from_slice(initial.as_bytes());
        data.push(0);
        Self { identifier: identifier.to_string(), data, registered: false }
    }

    /// Empty buffer able to take `bytes` without growing.
    pub fn with_capacity(identifier: &str, bytes: usize) -> Self {
        let mut data = Vec::with_capacity(round_to_chunk(bytes + 1));
        data.push(0);
        Self { identifier: identifier.to_string(), data, registered: false }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Logical length, excluding the terminator.
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn start_address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Marks the start address as handed out for location tracking. From now
    /// on the buffer may only grow in place.
    pub fn register(&mut self) {
        self.registered = true;
    }

    /// True if `extra` more bytes fit without moving the storage.
    pub fn fits(&self, extra: usize) -> bool {
        self.data.len() + extra <= self.data.capacity()
    }

    /// Appends `text` after the logical end and returns the byte range it
    /// occupies.
    pub fn append(&mut self, text: &str) -> Result<Range<usize>, BufferError> {
        let start = self.len();
        let needed = self.data.len() + text.len();
        if needed > self.data.capacity() {
            if self.registered {
                error!(
                    buffer = %self.identifier,
                    needed,
                    "refusing to move a registered source buffer"
                );
                return Err(BufferError::ReallocAfterRegistration {
                    identifier: self.identifier.clone(),
                    needed,
                });
            }
            let target = round_to_chunk(needed);
            debug!(
                buffer = %self.identifier,
                from = self.data.capacity(),
                to = target,
                "growing source buffer"
            );
            self.data.reserve_exact(target - self.data.len());
        }
        self.data.pop();
        self.data.extend_from_slice(text.as_bytes());
        self.data.push(0);
        Ok(start..start + text.len())
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.data[..self.len()]).unwrap_or("")
    }

    pub fn text(&self, range: Range<usize>) -> Option<&str> {
        if range.end > self.len() || range.start > range.end {
            return None;
        }
        std::str::from_utf8(&self.data[range]).ok()
    }

    /// Raw bytes including the NUL terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.data
    }
}

// ── Fragments ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub u32);

/// One logical chunk of input and where it lives.
#[derive(Debug, Clone)]
pub struct SourceFragment {
    pub name: String,
    pub file: u32,
    pub range: Range<usize>,
    /// Set for fragments read from disk.
    pub path: Option<PathBuf>,
}

/// Owns the chain of buffers. A new buffer (and file id) is opened whenever
/// the current one cannot take a fragment in place.
#[derive(Debug, Default)]
pub struct SourceManager {
    buffers: Vec<SourceBuffer>,
    fragments: Vec<SourceFragment>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fragment(&mut self, name: &str, text: &str) -> Result<FragmentId, BufferError> {
        self.add_fragment_with_path(name, text, None)
    }

    pub fn add_fragment_with_path(
        &mut self,
        name: &str,
        text: &str,
        path: Option<PathBuf>,
    ) -> Result<FragmentId, BufferError> {
        let reuse = self.buffers.last().map(|b| b.fits(text.len())).unwrap_or(false);
        if !reuse {
            let identifier = format!("cinder_buffer_{}", self.buffers.len());
            // Sized before registration so the first append stays in place.
            let mut buffer = SourceBuffer::with_capacity(&identifier, text.len());
            buffer.register();
            self.buffers.push(buffer);
        }
        let file = (self.buffers.len() - 1) as u32;
        let buffer = self.buffers.last_mut().ok_or(BufferError::UnknownFile(file))?;
        let range = buffer.append(text)?;
        let id = FragmentId(self.fragments.len() as u32);
        self.fragments.push(SourceFragment { name: name.to_string(), file, range, path });
        Ok(id)
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&SourceFragment> {
        self.fragments.get(id.0 as usize)
    }

    pub fn fragments(&self) -> &[SourceFragment] {
        &self.fragments
    }

    pub fn buffer(&self, file: u32) -> Option<&SourceBuffer> {
        self.buffers.get(file as usize)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn fragment_text(&self, id: FragmentId) -> Option<&str> {
        let frag = self.fragment(id)?;
        self.buffer(frag.file)?.text(frag.range.clone())
    }

    /// Fragment containing the start of `span`.
    pub fn fragment_at(&self, span: Span) -> Option<&SourceFragment> {
        self.fragments
            .iter()
            .rev()
            .find(|f| {
                f.file == span.file && f.range.start <= span.start && span.start <= f.range.end
            })
    }

    /// Text covered by `span`.
    pub fn slice(&self, span: Span) -> Option<&str> {
        self.buffer(span.file)?.text(span.start..span.end)
    }

    /// Full source line holding the start of `span`, without the newline.
    pub fn line_text(&self, span: Span) -> Option<&str> {
        let frag = self.fragment_at(span)?;
        let text = self.buffer(frag.file)?.text(frag.range.clone())?;
        let rel = span.start.saturating_sub(frag.range.start).min(text.len());
        let line_start = text[..rel].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = text[rel..].find('\n').map(|i| rel + i).unwrap_or(text.len());
        Some(&text[line_start..line_end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_terminator_and_content() {
        let mut buf = SourceBuffer::new("//seed\n", "test");
        let r1 = buf.append("int a;").unwrap();
        let r2 = buf.append("int b;").unwrap();
        assert_eq!(buf.as_str(), "//seed\nint a;int b;");
        assert_eq!(buf.text(r1).unwrap(), "int a;");
        assert_eq!(buf.text(r2).unwrap(), "int b;");
        assert_eq!(*buf.as_bytes_with_nul().last().unwrap(), 0);
    }

    #[test]
    fn growth_is_chunked() {
        let mut buf = SourceBuffer::new("", "grow");
        assert!(buf.capacity() >= GROWTH_CHUNK);
        let big = "x".repeat(GROWTH_CHUNK + 10);
        buf.append(&big).unwrap();
        assert!(buf.capacity() >= 2 * GROWTH_CHUNK);
        assert_eq!(buf.len(), GROWTH_CHUNK + 10);
    }

    #[test]
    fn registered_buffer_refuses_to_move() {
        let mut buf = SourceBuffer::new("", "pinned");
        buf.register();
        let start = buf.start_address();
        buf.append("small").unwrap();
        assert_eq!(buf.start_address(), start);
        let err = buf.append(&"y".repeat(GROWTH_CHUNK)).unwrap_err();
        assert!(matches!(err, BufferError::ReallocAfterRegistration { .. }));
        assert_eq!(buf.as_str(), "small");
    }

    #[test]
    fn manager_opens_new_file_when_full() {
        let mut sm = SourceManager::new();
        let a = sm.add_fragment("input_line_0", "int a = 1;").unwrap();
        let start = sm.buffer(0).unwrap().start_address();
        let big = " ".repeat(GROWTH_CHUNK);
        let b = sm.add_fragment("input_line_1", &big).unwrap();
        assert_eq!(sm.buffer_count(), 2);
        assert_eq!(sm.buffer(0).unwrap().start_address(), start);
        assert_eq!(sm.fragment(b).unwrap().file, 1);
        assert_eq!(sm.fragment_text(a).unwrap(), "int a = 1;");
    }

    #[test]
    fn line_text_finds_enclosing_line() {
        let mut sm = SourceManager::new();
        let id = sm.add_fragment("f", "int a;\nint b = x;\n").unwrap();
        let frag = sm.fragment(id).unwrap().clone();
        let off = frag.range.start + 11;
        let span = Span { file: frag.file, start: off, end: off + 1, line: 2, col: 5 };
        assert_eq!(sm.line_text(span).unwrap(), "int b = x;");
        assert_eq!(sm.slice(span).unwrap(), "b");
    }
}
