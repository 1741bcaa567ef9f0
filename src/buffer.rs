use std::io;
use std::mem;

use memchr::memchr2;

use crate::concurrent::BackgroundReader;
use crate::error::Result;

/// Where raw chunks come from: a plain reader drained on the parsing
/// thread, or a background prefetch ring.
enum Source {
    Reader { rdr: Box<dyn io::Read + Send>, chunk_size: usize },
    Background { rdr: BackgroundReader, spare: Vec<u8> },
}

/// The buffered character source feeding both tokenizers.
///
/// Owns the underlying input for the duration of one parse run; dropping
/// the buffer releases (closes) the resource. All line endings (`\r`, `\n`,
/// `\r\n`) are collapsed into one normalized newline character at this
/// layer, so everything upstream treats a line ending as a single code
/// point. Raw bytes stay available through `lookahead` for delimiter
/// matching, fixed-width prefix switching and format detection.
pub(crate) struct InputBuffer {
    source: Source,
    chunk: Vec<u8>,
    pos: usize,
    eof: bool,
    newline: u8,
    line: u64,
    column: u64,
    line_dirty: bool,
    record_buf: Vec<u8>,
    record_open: bool,
}

impl InputBuffer {
    pub(crate) fn new<R>(
        rdr: R,
        chunk_size: usize,
        newline: u8,
        background: bool,
    ) -> InputBuffer
    where
        R: io::Read + Send + 'static,
    {
        let source = if background {
            Source::Background {
                rdr: BackgroundReader::spawn(rdr, chunk_size),
                spare: Vec::new(),
            }
        } else {
            Source::Reader { rdr: Box::new(rdr), chunk_size }
        };
        InputBuffer {
            source,
            chunk: Vec::new(),
            pos: 0,
            eof: false,
            newline,
            line: 0,
            column: 0,
            line_dirty: false,
            record_buf: Vec::new(),
            record_open: false,
        }
    }

    /// Pull more data so that at least `n` unread bytes are buffered, or
    /// fewer if the source ends first.
    fn ensure(&mut self, n: usize) -> Result<()> {
        while self.chunk.len() - self.pos < n && !self.eof {
            self.refill()?;
        }
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        if self.pos == self.chunk.len() {
            self.chunk.clear();
            self.pos = 0;
        } else if self.pos > 0 {
            self.chunk.drain(..self.pos);
            self.pos = 0;
        }
        match self.source {
            Source::Reader { ref mut rdr, chunk_size } => {
                let start = self.chunk.len();
                self.chunk.resize(start + chunk_size, 0);
                let n = loop {
                    match rdr.read(&mut self.chunk[start..]) {
                        Ok(n) => break n,
                        Err(ref err)
                            if err.kind() == io::ErrorKind::Interrupted => {}
                        Err(err) => {
                            self.chunk.truncate(start);
                            return Err(err.into());
                        }
                    }
                };
                self.chunk.truncate(start + n);
                if n == 0 {
                    self.eof = true;
                }
            }
            Source::Background { ref mut rdr, ref mut spare } => {
                if self.chunk.is_empty() {
                    // Fully drained: swap chunks without copying.
                    let drained = mem::take(&mut self.chunk);
                    self.chunk = rdr.next_chunk(drained)?;
                    if self.chunk.is_empty() {
                        self.eof = true;
                    }
                } else {
                    // A lookahead spans the chunk boundary; append.
                    let received = rdr.next_chunk(mem::take(spare))?;
                    if received.is_empty() {
                        self.eof = true;
                    } else {
                        self.chunk.extend_from_slice(&received);
                    }
                    *spare = received;
                }
            }
        }
        Ok(())
    }

    /// The next up-to-`n` raw (unnormalized) bytes, without consuming them.
    /// Returns fewer than `n` bytes only at EOF.
    pub(crate) fn lookahead(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        let end = (self.pos + n).min(self.chunk.len());
        Ok(&self.chunk[self.pos..end])
    }

    /// True when the upcoming raw bytes equal `needle` exactly.
    pub(crate) fn starts_with(&mut self, needle: &[u8]) -> Result<bool> {
        Ok(self.lookahead(needle.len())? == needle)
    }

    fn peek_raw(&mut self) -> Result<Option<u8>> {
        self.ensure(1)?;
        Ok(self.chunk.get(self.pos).copied())
    }

    fn next_raw(&mut self) -> Result<Option<u8>> {
        self.ensure(1)?;
        match self.chunk.get(self.pos).copied() {
            Some(b) => {
                self.pos += 1;
                if self.record_open {
                    self.record_buf.push(b);
                }
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    /// The next normalized character, or `None` once every buffered byte
    /// has been served and the source is exhausted.
    pub(crate) fn next_char(&mut self) -> Result<Option<u8>> {
        let b = match self.next_raw()? {
            Some(b) => b,
            None => {
                // A final line without a terminator still counts.
                if self.line_dirty {
                    self.end_line();
                }
                return Ok(None);
            }
        };
        if b == b'\r' {
            // A lone \r is resolved as soon as the next byte (or EOF) is
            // available; it never waits for more than one byte.
            if self.peek_raw()? == Some(b'\n') {
                self.next_raw()?;
            }
            self.end_line();
            return Ok(Some(self.newline));
        }
        if b == b'\n' {
            self.end_line();
            return Ok(Some(self.newline));
        }
        self.column += 1;
        self.line_dirty = true;
        Ok(Some(b))
    }

    /// The next normalized character without consuming it.
    pub(crate) fn peek_char(&mut self) -> Result<Option<u8>> {
        self.ensure(1)?;
        match self.chunk.get(self.pos).copied() {
            None => Ok(None),
            Some(b'\r') | Some(b'\n') => Ok(Some(self.newline)),
            Some(b) => Ok(Some(b)),
        }
    }

    /// Consume `n` raw bytes known (via `lookahead`) to be buffered and to
    /// contain no line-ending characters.
    pub(crate) fn consume_known(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.chunk.len());
        if self.record_open {
            self.record_buf
                .extend_from_slice(&self.chunk[self.pos..self.pos + n]);
        }
        self.pos += n;
        self.column += n as u64;
        if n > 0 {
            self.line_dirty = true;
        }
    }

    /// Consume the rest of the current physical line, including its
    /// terminator. Stops at EOF.
    pub(crate) fn skip_to_newline(&mut self) -> Result<()> {
        loop {
            self.ensure(1)?;
            if self.pos >= self.chunk.len() {
                if self.line_dirty {
                    self.end_line();
                }
                return Ok(());
            }
            match memchr2(b'\r', b'\n', &self.chunk[self.pos..]) {
                Some(i) => {
                    self.consume_known(i);
                    self.next_char()?;
                    return Ok(());
                }
                None => {
                    let rest = self.chunk.len() - self.pos;
                    self.consume_known(rest);
                }
            }
        }
    }

    fn end_line(&mut self) {
        self.line += 1;
        self.column = 0;
        self.line_dirty = false;
    }

    /// Begin capturing the raw text of the record about to be parsed.
    pub(crate) fn mark_record_start(&mut self) {
        self.record_buf.clear();
        self.record_open = true;
    }

    /// The raw text consumed since the last mark, or `None` when no record
    /// is open.
    pub(crate) fn current_parsed_content(&self) -> Option<&[u8]> {
        if self.record_open {
            Some(&self.record_buf)
        } else {
            None
        }
    }

    /// Close the open record, if any.
    pub(crate) fn discard_record(&mut self) {
        self.record_open = false;
    }

    /// The number of newline-terminated physical lines consumed so far,
    /// counting an unterminated final line once it has been fully read.
    pub(crate) fn current_line(&self) -> u64 {
        self.line
    }

    /// The 1-based line an error at the current point belongs to.
    pub(crate) fn error_line(&self) -> u64 {
        self.line + u64::from(self.line_dirty)
    }

    /// True when nothing has been consumed from the current physical line.
    pub(crate) fn at_line_start(&self) -> bool {
        !self.line_dirty
    }

    /// The number of characters consumed on the current physical line.
    pub(crate) fn current_column(&self) -> u64 {
        self.column
    }

    /// Stop any background prefetch. Harmless when reading synchronously
    /// or when EOF was already reached.
    pub(crate) fn stop(&mut self) {
        if let Source::Background { ref mut rdr, .. } = self.source {
            rdr.stop();
        }
        self.eof = true;
    }
}
