use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::FrameError;

/// One parsed request frame.
#[derive(Debug)]
pub struct Command {
    /// First array element, uppercased.
    pub name: String,
    /// Remaining elements, as raw byte strings.
    pub args: Vec<Bytes>,
    /// Exact number of wire bytes the frame occupied, CRLF terminators
    /// included. Replication offset accounting sums these.
    pub wire_len: u64,
}

/// Buffered RESP decoder over one half of a TCP connection.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Read one `*N` array-of-bulk-strings frame. `Ok(None)` means the
    /// peer closed the connection cleanly between frames.
    pub async fn read_command(&mut self) -> Result<Option<Command>, FrameError> {
        let mut consumed = 0u64;
        let header = match self.read_line(&mut consumed).await? {
            Some(line) => line,
            None => return Ok(None),
        };
        let count = match header.strip_prefix('*') {
            Some(digits) => parse_len(digits)?,
            None => return Err(FrameError::Malformed("expected array header")),
        };
        if count == 0 {
            return Err(FrameError::Malformed("empty command array"));
        }

        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            elements.push(self.read_bulk(&mut consumed).await?);
        }

        let name_raw = elements.remove(0);
        let name = std::str::from_utf8(&name_raw)
            .map_err(|_| FrameError::NonUtf8Command)?
            .to_ascii_uppercase();
        Ok(Some(Command {
            name,
            args: elements,
            wire_len: consumed,
        }))
    }

    /// One CRLF-terminated line. The replication handshake reads the
    /// leader's simple-string replies through this.
    pub async fn read_simple_line(&mut self) -> Result<String, FrameError> {
        let mut consumed = 0;
        self.read_line(&mut consumed)
            .await?
            .ok_or(FrameError::Malformed("stream ended waiting for a reply"))
    }

    /// The `$<len>` snapshot payload a leader sends after FULLRESYNC.
    /// Unlike a bulk string, the body carries no trailing CRLF.
    pub async fn read_snapshot_body(&mut self) -> Result<Vec<u8>, FrameError> {
        let mut consumed = 0;
        let header = self
            .read_line(&mut consumed)
            .await?
            .ok_or(FrameError::Malformed("stream ended before the snapshot"))?;
        let len = match header.strip_prefix('$') {
            Some(digits) => parse_len(digits)?,
            None => return Err(FrameError::Malformed("expected snapshot bulk header")),
        };
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        Ok(body)
    }

    async fn read_bulk(&mut self, consumed: &mut u64) -> Result<Bytes, FrameError> {
        let header = self
            .read_line(consumed)
            .await?
            .ok_or(FrameError::Malformed("stream ended inside a frame"))?;
        let len = match header.strip_prefix('$') {
            Some(digits) => parse_len(digits)?,
            None => return Err(FrameError::Malformed("expected bulk string header")),
        };
        let mut data = vec![0u8; len + 2];
        self.inner.read_exact(&mut data).await?;
        if &data[len..] != b"\r\n" {
            return Err(FrameError::Malformed("bulk string not CRLF-terminated"));
        }
        *consumed += len as u64 + 2;
        data.truncate(len);
        Ok(data.into())
    }

    async fn read_line(&mut self, consumed: &mut u64) -> Result<Option<String>, FrameError> {
        let mut raw = Vec::new();
        let n = self.inner.read_until(b'\n', &mut raw).await?;
        if n == 0 {
            return Ok(None);
        }
        *consumed += n as u64;
        if !raw.ends_with(b"\r\n") {
            return Err(FrameError::Malformed("line not CRLF-terminated"));
        }
        raw.truncate(raw.len() - 2);
        String::from_utf8(raw)
            .map(Some)
            .map_err(|_| FrameError::Malformed("header line is not valid UTF-8"))
    }
}

fn parse_len(digits: &str) -> Result<usize, FrameError> {
    digits
        .parse()
        .map_err(|_| FrameError::BadLength(digits.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(wire: &'static [u8]) -> Command {
        FrameReader::new(wire)
            .read_command()
            .await
            .unwrap()
            .expect("frame expected")
    }

    #[tokio::test]
    async fn test_decodes_command_and_counts_every_byte() {
        let wire = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let cmd = decode(wire).await;
        assert_eq!(cmd.name, "SET");
        assert_eq!(cmd.args, vec![Bytes::from_static(b"foo"), Bytes::from_static(b"bar")]);
        assert_eq!(cmd.wire_len, wire.len() as u64);
    }

    #[tokio::test]
    async fn test_command_name_is_uppercased() {
        let cmd = decode(b"*1\r\n$4\r\nping\r\n").await;
        assert_eq!(cmd.name, "PING");
        assert!(cmd.args.is_empty());
    }

    #[tokio::test]
    async fn test_clean_eof_between_frames_is_none() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_back_to_back_frames_count_independently() {
        let wire = b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
        let mut reader = FrameReader::new(&wire[..]);
        let first = reader.read_command().await.unwrap().unwrap();
        let second = reader.read_command().await.unwrap().unwrap();
        assert_eq!(first.wire_len, 14);
        assert_eq!(second.wire_len, wire.len() as u64 - 14);
    }

    #[tokio::test]
    async fn test_rejects_non_array_frame() {
        let mut reader = FrameReader::new(&b"+PING\r\n"[..]);
        assert!(matches!(
            reader.read_command().await,
            Err(FrameError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_bulk_without_crlf_terminator() {
        let mut reader = FrameReader::new(&b"*1\r\n$4\r\nPINGxx"[..]);
        assert!(matches!(
            reader.read_command().await,
            Err(FrameError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_length_prefix() {
        let mut reader = FrameReader::new(&b"*one\r\n"[..]);
        assert!(matches!(
            reader.read_command().await,
            Err(FrameError::BadLength(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_body_has_no_trailing_crlf() {
        // Body is raw bytes; the next frame starts immediately after it.
        let wire = b"$5\r\nREDIS*1\r\n$4\r\nPING\r\n";
        let mut reader = FrameReader::new(&wire[..]);
        assert_eq!(reader.read_snapshot_body().await.unwrap(), b"REDIS");
        let next = reader.read_command().await.unwrap().unwrap();
        assert_eq!(next.name, "PING");
    }

    #[tokio::test]
    async fn test_round_trip_through_encoder() {
        let frame = super::super::encode_command(
            "XADD",
            &[Bytes::from_static(b"s"), Bytes::from_static(b"1-1")],
        );
        let mut reader = FrameReader::new(&frame[..]);
        let cmd = reader.read_command().await.unwrap().unwrap();
        assert_eq!(cmd.name, "XADD");
        assert_eq!(cmd.wire_len, frame.len() as u64);
    }
}
