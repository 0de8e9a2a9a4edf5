use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::serial::error::SerialPortError;

/// This codec splits a byte stream on a configurable delimiter byte
/// and yields each complete line as trimmed text.
///
/// Bytes which are not valid utf8 are replaced, never rejected.
/// Bytes after the last delimiter are held back until the delimiter arrives,
/// and are dropped if the stream ends first.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
        }
    }
}

impl Default for LinesCodec {
    /// Splits on `\n`.
    /// A `\r` before it is removed by trimming, so `\r\n` devices work too.
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = String;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            Ok(Some(String::from_utf8_lossy(&line).trim().to_owned()))
        } else {
            // We did not find a full frame.
            // The next time we are called the same buffer `src` will be provided to us (same starting point),
            // but possibly with more data.
            // Since our job is to find the delimiter, we don't need to re-read the bytes we have already looked at.
            self.cursor = read_to;

            // Indicate that we need more bytes to look at.
            Ok(None)
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if !src.is_empty() {
            debug!(bytes = src.len(), "Dropping partial line at end of stream");
            src.clear();
        }
        self.cursor = 0;

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn decode_all(codec: &mut LinesCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = vec![];
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn splits_and_trims() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from(&b"hello\r\n  CAPTCHA: abc \r\n\r\n"[..]);

        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec!["hello", "CAPTCHA: abc", ""]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_line_is_held_back() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from(&b"CAPT"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"CHA:xyz");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\nnext");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("CAPTCHA:xyz"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"next");
    }

    #[test]
    fn partial_line_dropped_at_eof() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from(&b"one\ntwo"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("one"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn bad_utf8_is_lossy() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from(&b"a\xffb\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some("a\u{FFFD}b".to_owned())
        );
    }

    #[test]
    fn custom_delimiter() {
        let mut codec = LinesCodec::new(b';');
        let mut buf = BytesMut::from(&b"a;b;"[..]);

        assert_eq!(decode_all(&mut codec, &mut buf), vec!["a", "b"]);
    }
}
