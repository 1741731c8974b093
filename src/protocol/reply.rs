use bytes::Bytes;

/// A RESP reply value, encoded just before the session writes it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// `$-1\r\n`, the nil bulk string.
    NullBulk,
    /// `*-1\r\n`, the nil array. Blocking stream reads that time out
    /// reply with this.
    NullArray,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    pub fn queued() -> Reply {
        Reply::Simple("QUEUED".to_string())
    }

    /// An error reply. The message is rendered after the `-ERR ` prefix.
    pub fn error(message: impl Into<String>) -> Reply {
        Reply::Error(message.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(data.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out.into()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => {
                out.push(b'+');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(message) => {
                out.extend_from_slice(b"-ERR ");
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                out.extend_from_slice(format!(":{value}\r\n").as_bytes());
            }
            Reply::Bulk(data) => push_bulk(out, data),
            Reply::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

/// Encode a command as an array of bulk strings: the framing used by
/// client requests, the replication handshake, and leader-to-follower
/// mirroring. The length of the returned buffer is exactly what both
/// sides of a replication link add to their offsets for this frame.
pub fn encode_command(name: &str, args: &[Bytes]) -> Bytes {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", args.len() + 1).as_bytes());
    push_bulk(&mut out, name.as_bytes());
    for arg in args {
        push_bulk(&mut out, arg);
    }
    out.into()
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Reply::ok(), b"+OK\r\n".as_slice())]
    #[case(Reply::Simple("PONG".into()), b"+PONG\r\n")]
    #[case(Reply::error("unknown command 'foo'"), b"-ERR unknown command 'foo'\r\n")]
    #[case(Reply::Integer(42), b":42\r\n")]
    #[case(Reply::Integer(-3), b":-3\r\n")]
    #[case(Reply::bulk("bar"), b"$3\r\nbar\r\n")]
    #[case(Reply::bulk(""), b"$0\r\n\r\n")]
    #[case(Reply::NullBulk, b"$-1\r\n")]
    #[case(Reply::NullArray, b"*-1\r\n")]
    fn test_scalar_encoding(#[case] reply: Reply, #[case] expected: &[u8]) {
        assert_eq!(reply.to_bytes(), Bytes::copy_from_slice(expected));
    }

    #[test]
    fn test_nested_array_encoding() {
        let reply = Reply::Array(vec![
            Reply::bulk("1-1"),
            Reply::Array(vec![Reply::bulk("field"), Reply::bulk("value")]),
        ]);
        assert_eq!(
            reply.to_bytes(),
            Bytes::from_static(b"*2\r\n$3\r\n1-1\r\n*2\r\n$5\r\nfield\r\n$5\r\nvalue\r\n")
        );
    }

    #[test]
    fn test_encode_command_matches_client_framing() {
        let frame = encode_command(
            "SET",
            &[Bytes::from_static(b"k"), Bytes::from_static(b"v")],
        );
        assert_eq!(&frame[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }
}
