//! Streaming text decoding.
//!
//! Wraps a byte reader and yields UTF-8, so the csv reader can work on any
//! encoding encoding_rs knows without loading the whole file.

use encoding_rs::{Decoder, DecoderResult, Encoding};
use std::io::{self, Read};

const BUFFER_SIZE: usize = 8 * 1024;

/// A reader that decodes `inner` from `encoding` into UTF-8.
///
/// Malformed input is an [`io::ErrorKind::InvalidData`] error rather than
/// a replacement character. A leading BOM for the encoding is dropped.
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    start: usize,
    end: usize,
    output: Vec<u8>,
    out_pos: usize,
    eof: bool,
    finished: bool,
    malformed: bool,
    last_byte: Option<u8>,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder_with_bom_removal(),
            input: vec![0; BUFFER_SIZE],
            start: 0,
            end: 0,
            output: Vec::with_capacity(BUFFER_SIZE),
            out_pos: 0,
            eof: false,
            finished: false,
            malformed: false,
            last_byte: None,
        }
    }

    /// Whether the decoded text handed out so far ends with a line feed.
    pub fn ends_with_newline(&self) -> bool {
        self.last_byte == Some(b'\n')
    }

    fn fill_output(&mut self) -> io::Result<()> {
        if self.malformed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("input is not valid {}", self.decoder.encoding().name()),
            ));
        }
        if self.start == self.end && !self.eof {
            let n = self.inner.read(&mut self.input)?;
            self.start = 0;
            self.end = n;
            self.eof = n == 0;
        }

        self.output.clear();
        self.output.resize(BUFFER_SIZE, 0);
        self.out_pos = 0;

        let last = self.eof;
        let (result, read, written) = self.decoder.decode_to_utf8_without_replacement(
            &self.input[self.start..self.end],
            &mut self.output,
            last,
        );
        self.start += read;
        self.output.truncate(written);

        match result {
            DecoderResult::InputEmpty => {
                if last {
                    self.finished = true;
                }
                Ok(())
            }
            DecoderResult::OutputFull => Ok(()),
            // Text decoded before the bad bytes is still handed out.
            DecoderResult::Malformed(_, _) => {
                self.malformed = true;
                Ok(())
            }
        }
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.out_pos < self.output.len() {
                let available = &self.output[self.out_pos..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.out_pos += n;
                if n > 0 {
                    self.last_byte = Some(buf[n - 1]);
                }
                return Ok(n);
            }
            if self.finished || buf.is_empty() {
                return Ok(0);
            }
            self.fill_output()?;
        }
    }
}
