//! Newline-delimited framing over byte streams.

use std::io::{self, BufRead, BufReader, Read, Write};

use tether_protocol::{MAX_LINE_BYTES, Message, encode_line};

use super::TransportError;

/// Reads newline-terminated lines, bounded by [`MAX_LINE_BYTES`].
///
/// Partial lines survive read timeouts, so a caller may poll with a short
/// read timeout without losing data. An oversized line is reported once and
/// then skipped up to its terminating newline.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    discarding: bool,
    limit: usize,
}

impl<R: Read> LineReader<R> {
    /// Wraps `reader` with the protocol line limit.
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_LINE_BYTES)
    }

    /// Wraps `reader` with a custom line limit.
    pub fn with_limit(reader: R, limit: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            pending: Vec::new(),
            discarding: false,
            limit,
        }
    }

    /// Returns the next line without its terminator, or `None` at end of
    /// stream. Invalid UTF-8 is replaced rather than rejected so that the
    /// JSON parser reports it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::LineTooLong`] for an oversized line and
    /// [`TransportError::Io`] for read failures, including timeouts.
    pub fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let available = match self.inner.fill_buf() {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };
            if available.is_empty() {
                return Ok(self.finish_at_eof());
            }

            let newline = available.iter().position(|byte| *byte == b'\n');
            let take = newline.map_or(available.len(), |index| index + 1);
            if !self.discarding {
                let body = newline.map_or(available, |index| &available[..index]);
                self.pending.extend_from_slice(body);
            }
            self.inner.consume(take);

            if newline.is_some() {
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                let line = std::mem::take(&mut self.pending);
                if line.len() > self.limit {
                    return Err(TransportError::LineTooLong { limit: self.limit });
                }
                return Ok(Some(decode(line)));
            }
            if !self.discarding && self.pending.len() > self.limit {
                self.pending.clear();
                self.discarding = true;
                return Err(TransportError::LineTooLong { limit: self.limit });
            }
        }
    }

    fn finish_at_eof(&mut self) -> Option<String> {
        self.discarding = false;
        if self.pending.is_empty() {
            return None;
        }
        Some(decode(std::mem::take(&mut self.pending)))
    }
}

fn decode(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .unwrap_or_else(|error| String::from_utf8_lossy(error.as_bytes()).into_owned())
}

/// Writes one encoded message per line and flushes after each.
#[derive(Debug)]
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: Write> MessageWriter<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Encodes and sends `message`.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be encoded or the write fails.
    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let line = encode_line(message)?;
        self.inner.write_all(&line)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Borrows the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use rstest::rstest;
    use tether_protocol::parse_message;

    fn lines(input: &[u8], limit: usize) -> Vec<Result<String, String>> {
        let mut reader = LineReader::with_limit(Cursor::new(input.to_vec()), limit);
        let mut out = Vec::new();
        loop {
            match reader.read_line() {
                Ok(Some(line)) => out.push(Ok(line)),
                Ok(None) => break,
                Err(error) => out.push(Err(error.to_string())),
            }
        }
        out
    }

    #[rstest]
    #[case(b"a\nb\n".as_slice(), vec![Ok("a".to_owned()), Ok("b".to_owned())])]
    #[case(b"a\r\nb".as_slice(), vec![Ok("a".to_owned()), Ok("b".to_owned())])]
    #[case(b"".as_slice(), vec![])]
    #[case(b"\n".as_slice(), vec![Ok(String::new())])]
    fn splits_lines(#[case] input: &[u8], #[case] expected: Vec<Result<String, String>>) {
        assert_eq!(lines(input, 64), expected);
    }

    #[test]
    fn oversized_line_is_reported_once_and_skipped() {
        let input = b"0123456789abcdef\nok\n";
        let result = lines(input, 8);
        assert_eq!(result.len(), 2);
        assert!(result[0].as_ref().is_err_and(|e| e.contains("exceeds 8 bytes")));
        assert_eq!(result[1], Ok("ok".to_owned()));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let result = lines(b"\xff{}\n", 64);
        assert_eq!(result, vec![Ok("\u{fffd}{}".to_owned())]);
    }

    #[test]
    fn writer_emits_parseable_lines() {
        let mut writer = MessageWriter::new(Vec::new());
        writer
            .send(&Message::heartbeat("client-1"))
            .expect("send heartbeat");
        writer
            .send(&Message::upgrade_abort("not newer"))
            .expect("send abort");

        let text = String::from_utf8(writer.get_ref().clone()).expect("utf-8 output");
        let parsed: Vec<_> = text
            .lines()
            .map(|line| parse_message(line).expect("valid line"))
            .collect();
        assert_eq!(parsed.len(), 2);
        assert!(text.ends_with('\n'));
    }
}
