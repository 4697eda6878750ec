//! Streaming text encoding for output files.

use encoding_rs::{Encoder, EncoderResult, Encoding, UTF_8};
use std::io::{self, Write};

const BUFFER_SIZE: usize = 8 * 1024;

/// A writer that takes UTF-8 and writes it to `inner` in `encoding`.
///
/// UTF-8 passes straight through. For other encodings a character with no
/// mapping is an [`io::ErrorKind::InvalidData`] error. UTF-8 sequences split
/// across `write` calls are held back until complete.
pub struct EncodingWriter<W: Write> {
    inner: W,
    encoder: Option<Encoder>,
    pending: Vec<u8>,
    buffer: Vec<u8>,
}

impl<W: Write> EncodingWriter<W> {
    pub fn new(inner: W, encoding: &'static Encoding) -> Self {
        let encoder = (encoding != UTF_8).then(|| encoding.new_encoder());
        Self {
            inner,
            encoder,
            pending: Vec::new(),
            buffer: vec![0; BUFFER_SIZE],
        }
    }

    /// Flush encoder state and return the inner writer, flushed.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            return Err(invalid("output ends inside a UTF-8 sequence".to_string()));
        }
        self.encode_pending(0, true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Encode the first `len` bytes of `pending`, which must be valid UTF-8.
    fn encode_pending(&mut self, len: usize, last: bool) -> io::Result<()> {
        let Self {
            inner,
            encoder,
            pending,
            buffer,
        } = self;
        let Some(encoder) = encoder else {
            return Ok(());
        };
        let text = std::str::from_utf8(&pending[..len]).map_err(|e| invalid(e.to_string()))?;

        let mut consumed = 0;
        loop {
            let (result, read, written) =
                encoder.encode_from_utf8_without_replacement(&text[consumed..], buffer, last);
            inner.write_all(&buffer[..written])?;
            consumed += read;
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => continue,
                EncoderResult::Unmappable(c) => {
                    return Err(invalid(format!(
                        "character {:?} cannot be encoded as {}",
                        c,
                        encoder.encoding().name()
                    )))
                }
            }
        }
        pending.drain(..len);
        Ok(())
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl<W: Write> Write for EncodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.encoder.is_none() {
            return self.inner.write(buf);
        }

        self.pending.extend_from_slice(buf);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                self.pending.clear();
                return Err(invalid(e.to_string()));
            }
        };
        self.encode_pending(complete, false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
