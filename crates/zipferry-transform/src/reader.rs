//! Strict RFC 4180 record reader.
//!
//! Holds one record in memory at a time. Accepts `\n`, `\r\n` and bare `\r`
//! as record terminators, drops blank lines and a leading UTF-8 byte order
//! mark. A quote inside an unquoted field is kept literally; anything other
//! than a delimiter or terminator after a closing quote is an error.

use std::io::{self, BufRead};

use crate::error::ParseError;

const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

pub struct RecordReader<R> {
    inner: R,
    line: u64,
    started: bool,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            started: false,
        }
    }

    /// Lines consumed so far.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Next non-blank record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<Vec<String>>, ParseError> {
        if !self.started {
            self.started = true;
            self.skip_bom()?;
        }

        loop {
            let first_line = self.line + 1;
            let mut fields = Vec::new();
            let mut field = Vec::new();
            let mut state = State::FieldStart;
            let mut has_content = false;

            loop {
                let Some(byte) = self.read_byte()? else {
                    if state == State::Quoted {
                        return Err(ParseError::UnterminatedQuote { line: first_line });
                    }
                    if !has_content && fields.is_empty() {
                        return Ok(None);
                    }
                    break;
                };

                match (state, byte) {
                    (State::Quoted, b'"') => state = State::QuoteInQuoted,
                    (State::Quoted, b) => {
                        if b == b'\n' {
                            self.line += 1;
                        }
                        field.push(b);
                    }
                    (State::QuoteInQuoted, b'"') => {
                        field.push(b'"');
                        state = State::Quoted;
                    }
                    (_, b',') => {
                        has_content = true;
                        fields.push(self.finish_field(&mut field, first_line)?);
                        state = State::FieldStart;
                    }
                    (_, b'\n') => break,
                    (_, b'\r') => {
                        if self.peek_byte()? == Some(b'\n') {
                            self.inner.consume(1);
                        }
                        break;
                    }
                    (State::QuoteInQuoted, _) => {
                        return Err(ParseError::StrayQuote { line: self.line + 1 });
                    }
                    (State::FieldStart, b'"') => {
                        has_content = true;
                        state = State::Quoted;
                    }
                    (State::FieldStart | State::Unquoted, b) => {
                        has_content = true;
                        field.push(b);
                        state = State::Unquoted;
                    }
                }
            }

            self.line += 1;
            if !has_content {
                continue;
            }
            fields.push(self.finish_field(&mut field, first_line)?);
            return Ok(Some(fields));
        }
    }

    fn finish_field(&self, field: &mut Vec<u8>, line: u64) -> Result<String, ParseError> {
        String::from_utf8(std::mem::take(field)).map_err(|_| ParseError::InvalidUtf8 { line })
    }

    fn skip_bom(&mut self) -> Result<(), ParseError> {
        if self.fill()?.starts_with(BOM) {
            self.inner.consume(BOM.len());
        }
        Ok(())
    }

    fn fill(&mut self) -> io::Result<&[u8]> {
        loop {
            match self.inner.fill_buf() {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.inner.fill_buf()
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.fill()?.first().copied())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.inner.consume(1);
        }
        Ok(byte)
    }
}
