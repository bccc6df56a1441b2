use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is kept. Comment lines and other fields are
/// skipped, and multiple `data` lines of one event are joined with a line
/// feed.
pub struct Sse {
    buf: String,
    // Bytes of a UTF-8 sequence split across chunks.
    pending_bytes: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            pending_bytes: vec![],
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain what is already buffered before reading more.
            if let Some(event) = self.try_parse_event() {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                // A trailing event without the final blank line is dropped.
                // A dangling partial UTF-8 sequence is not.
                if !self.pending_bytes.is_empty() {
                    return Err(Error::InvalidPayload);
                }
                return Ok(None);
            };
            self.push_bytes(&bytes)?;
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.pending_bytes.extend_from_slice(bytes);
        let valid_up_to = match str::from_utf8(&self.pending_bytes) {
            Ok(s) => s.len(),
            // `error_len` is `None` when the input ends in the middle of a
            // sequence, which the next chunk will complete.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return Err(Error::InvalidPayload),
        };
        let rest = self.pending_bytes.split_off(valid_up_to);
        let complete = std::mem::replace(&mut self.pending_bytes, rest);
        // Checked above.
        let s = String::from_utf8(complete).map_err(|_| Error::InvalidPayload)?;
        // Normalize `end-of-line = ( cr lf / cr / lf )` to a line feed.
        self.buf.push_str(&s.replace("\r\n", "\n").replace('\r', "\n"));
        Ok(())
    }

    fn try_parse_event(&mut self) -> Option<String> {
        // event         = *( comment / field ) end-of-line
        // comment       = colon *any-char end-of-line
        // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
        loop {
            let eol_idx = self.buf.find("\n\n")?;
            let block: String = self.buf.drain(0..eol_idx + 2).collect();

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (name, value) = match line.split_once(':') {
                    Some((name, value)) => {
                        (name, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                if name != "data" {
                    continue;
                }
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // Blocks without data (keep-alive comments, bare `event:` lines)
            // carry nothing for us.
            if let Some(data) = data {
                return Some(data);
            }
        }
    }
}
