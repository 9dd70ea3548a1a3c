use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest line accepted from a peer, terminator included
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One read from a line-delimited stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line ran past the size limit; the rest of it is skipped
    Oversized { len: usize },
    Closed,
}

/// Bounded line reader.
///
/// Bytes read so far live in `self`, so dropping `next_frame` mid-line (a
/// timed out call) loses nothing.
#[derive(Debug)]
pub struct LineReader {
    buffer: Vec<u8>,
    discarding: bool,
    max_len: usize,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl LineReader {
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            discarding: false,
            max_len: max_len.max(1),
        }
    }

    pub async fn next_frame<R>(&mut self, reader: &mut R) -> std::io::Result<Frame>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let room = self.max_len.saturating_sub(self.buffer.len()) as u64;
            let read = (&mut *reader)
                .take(room)
                .read_until(b'\n', &mut self.buffer)
                .await?;
            let complete = self.buffer.ends_with(b"\n");

            if self.discarding {
                self.buffer.clear();
                if read == 0 {
                    return Ok(Frame::Closed);
                }
                if complete {
                    self.discarding = false;
                }
                continue;
            }

            if read == 0 && self.buffer.is_empty() {
                return Ok(Frame::Closed);
            }

            if !complete && self.buffer.len() >= self.max_len {
                let len = self.buffer.len();
                self.buffer.clear();
                self.discarding = true;
                return Ok(Frame::Oversized { len });
            }

            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            return Ok(Frame::Line(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_lines_then_close() {
        let mut input = BufReader::new(&b"first\nsecond"[..]);
        let mut lines = LineReader::default();

        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Line("first\n".into()));
        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Line("second".into()));
        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Closed);
    }

    #[tokio::test]
    async fn test_long_line_is_skipped() {
        let mut input = BufReader::new(&b"0123456789abcdef\n{\"a\":1}\n"[..]);
        let mut lines = LineReader::new(8);

        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Oversized { len: 8 });
        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Line("{\"a\":1}\n".into()));
        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Closed);
    }

    #[tokio::test]
    async fn test_line_at_limit_is_kept() {
        let mut input = BufReader::new(&b"1234567\n"[..]);
        let mut lines = LineReader::new(8);

        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Line("1234567\n".into()));
    }

    #[tokio::test]
    async fn test_stream_ending_inside_long_line() {
        let mut input = BufReader::new(&b"0123456789abcdef"[..]);
        let mut lines = LineReader::new(4);

        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Oversized { len: 4 });
        assert_eq!(lines.next_frame(&mut input).await.unwrap(), Frame::Closed);
    }
}
