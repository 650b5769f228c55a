//! Splits the inbound byte stream of one connection into requests.

use super::server_config::FramingMode;

/// One unit produced by a framer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Raw request bytes, terminator removed.
    Request(Vec<u8>),
    /// A line exceeded the size limit. Answered with `ERROR`.
    Oversized,
}

/// Per-connection framing state.
#[derive(Debug)]
pub enum RequestFramer {
    Line(LineFramer),
    /// One read is one request.
    Read,
}

impl RequestFramer {
    pub fn new(mode: FramingMode, max_request_bytes: usize) -> Self {
        match mode {
            FramingMode::Line => RequestFramer::Line(LineFramer::new(max_request_bytes)),
            FramingMode::Read => RequestFramer::Read,
        }
    }

    /// Feeds one read's worth of bytes, returning every request completed
    /// by it in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Inbound> {
        match self {
            RequestFramer::Line(framer) => framer.push(chunk),
            RequestFramer::Read => vec![Inbound::Request(chunk.to_vec())],
        }
    }

    /// Bytes appended to every response sent on this connection.
    pub fn terminator(&self) -> &'static [u8] {
        match self {
            RequestFramer::Line(_) => b"\n",
            RequestFramer::Read => b"",
        }
    }
}

/// Newline framing with a per-line size limit.
///
/// A trailing `\r` is stripped. Once a line exceeds `max_bytes` it is
/// reported as [`Inbound::Oversized`] immediately and the rest of it is
/// discarded up to the next newline.
#[derive(Debug)]
pub struct LineFramer {
    max_bytes: usize,
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            buffer: Vec::new(),
            discarding: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Inbound> {
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.content_len(line) > self.max_bytes {
                self.buffer.clear();
                out.push(Inbound::Oversized);
                continue;
            }

            self.buffer.extend_from_slice(line);
            let mut request = std::mem::take(&mut self.buffer);
            if request.last() == Some(&b'\r') {
                request.pop();
            }
            out.push(Inbound::Request(request));
        }

        if !rest.is_empty() && !self.discarding {
            if self.content_len(rest) > self.max_bytes {
                self.buffer.clear();
                self.discarding = true;
                out.push(Inbound::Oversized);
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }

        out
    }

    /// Length of the buffered line extended by `tail`, not counting a
    /// trailing `\r`.
    fn content_len(&self, tail: &[u8]) -> usize {
        let total = self.buffer.len() + tail.len();
        match tail.last().or(self.buffer.last()) {
            Some(b'\r') => total - 1,
            _ => total,
        }
    }

    /// Bytes of an incomplete line waiting for its newline.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(s: &str) -> Inbound {
        Inbound::Request(s.as_bytes().to_vec())
    }

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new(64);
        assert_eq!(framer.push(b"/a.png\n"), vec![req("/a.png")]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_several_lines_in_one_read() {
        let mut framer = LineFramer::new(64);
        assert_eq!(
            framer.push(b"/a.png\n/b.png\r\n\n"),
            vec![req("/a.png"), req("/b.png"), req("")]
        );
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut framer = LineFramer::new(64);
        assert!(framer.push(b"/pho").is_empty());
        assert!(framer.push(b"tos/fa").is_empty());
        assert_eq!(framer.buffered(), 10);
        assert_eq!(framer.push(b"ce.jpg\n/next"), vec![req("/photos/face.jpg")]);
        assert_eq!(framer.push(b".jpg\n"), vec![req("/next.jpg")]);
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let mut framer = LineFramer::new(4);
        assert_eq!(framer.push(b"abcd\n"), vec![req("abcd")]);
    }

    #[test]
    fn test_crlf_line_at_limit_is_accepted() {
        let mut framer = LineFramer::new(4);
        assert_eq!(framer.push(b"abcd\r\n"), vec![req("abcd")]);
        assert!(framer.push(b"wxyz\r").is_empty());
        assert_eq!(framer.push(b"\n"), vec![req("wxyz")]);
        assert_eq!(framer.push(b"abcde\r\n"), vec![Inbound::Oversized]);
    }

    #[test]
    fn test_oversized_complete_line() {
        let mut framer = LineFramer::new(4);
        assert_eq!(
            framer.push(b"abcdef\nok\n"),
            vec![Inbound::Oversized, req("ok")]
        );
    }

    #[test]
    fn test_oversized_partial_line_is_discarded_until_newline() {
        let mut framer = LineFramer::new(4);
        assert!(framer.push(b"abc").is_empty());
        assert_eq!(framer.push(b"defgh"), vec![Inbound::Oversized]);
        assert!(framer.push(b"ijklmnop").is_empty());
        assert_eq!(framer.push(b"qrs\nok\n"), vec![req("ok")]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_read_mode_is_one_request_per_read() {
        let mut framer = RequestFramer::new(FramingMode::Read, 4);
        assert_eq!(
            framer.push(b"/a.png\n/b.png"),
            vec![req("/a.png\n/b.png")]
        );
        assert!(framer.terminator().is_empty());
    }

    #[test]
    fn test_line_mode_terminator() {
        let framer = RequestFramer::new(FramingMode::Line, 4);
        assert_eq!(framer.terminator(), b"\n");
    }
}
