use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const FIELD_SEP: &str = "\r\n";
const ARG_SEP: char = '%';
/// Frame bodies larger than this are refused rather than buffered without
/// bound; no message this protocol carries is legitimately bigger (the
/// largest payload, `response_manifest`, is a small JSON document).
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Raised while encoding, decoding, or transporting a framed message.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("message field {field:?} contains a reserved byte sequence ({reason})")]
    InvalidField { field: &'static str, reason: &'static str },
    #[error("frame body is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("frame body has {0} field(s), expected exactly 3 (sender_id, cmd, args)")]
    WrongFieldCount(usize),
    #[error("frame length {0} exceeds the maximum of {MAX_FRAME_LEN} bytes")]
    FrameTooLarge(u32),
    #[error("channel closed before a complete frame was read")]
    Closed,
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WireError> for crucible_errors::CoreError {
    fn from(e: WireError) -> Self {
        crucible_errors::CoreError::ChannelError(e.to_string())
    }
}

/// One decoded frame: `<sender_id>\r\n<cmd>\r\n<arg1>%<arg2>%...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: String,
    pub command: String,
    pub args: Vec<String>,
}

impl Message {
    pub fn new(sender_id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self { sender_id: sender_id.into(), command: command.into(), args }
    }

    fn check_field(field: &'static str, value: &str) -> Result<(), WireError> {
        if value.contains(FIELD_SEP) {
            return Err(WireError::InvalidField { field, reason: "contains \\r\\n" });
        }
        if value.contains(ARG_SEP) {
            return Err(WireError::InvalidField { field, reason: "contains '%'" });
        }
        Ok(())
    }

    /// Builds the UTF-8 frame body (without the 4-byte length prefix),
    /// rejecting any field that contains a reserved separator.
    pub fn encode_body(&self) -> Result<Vec<u8>, WireError> {
        Self::check_field("sender_id", &self.sender_id)?;
        Self::check_field("command", &self.command)?;
        for (i, arg) in self.args.iter().enumerate() {
            if arg.contains(FIELD_SEP) {
                return Err(WireError::InvalidField { field: "args", reason: "contains \\r\\n" });
            }
            if arg.contains(ARG_SEP) {
                return Err(WireError::InvalidField { field: "args", reason: "contains '%'" });
            }
            let _ = i;
        }
        let joined_args = self.args.join(&ARG_SEP.to_string());
        let body = format!("{}{FIELD_SEP}{}{FIELD_SEP}{}", self.sender_id, self.command, joined_args);
        Ok(body.into_bytes())
    }

    /// Prepends the 4-byte big-endian length prefix to [`Message::encode_body`].
    pub fn encode_frame(&self) -> Result<Vec<u8>, WireError> {
        let body = self.encode_body()?;
        let len: u32 = body.len().try_into().map_err(|_| WireError::FrameTooLarge(u32::MAX))?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parses a frame body (without its length prefix) back into a [`Message`].
    pub fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(body)?;
        let mut fields = text.splitn(3, FIELD_SEP);
        let sender_id = fields.next().ok_or(WireError::WrongFieldCount(0))?;
        let command = fields.next().ok_or(WireError::WrongFieldCount(1))?;
        let args_joined = fields.next().ok_or(WireError::WrongFieldCount(2))?;
        if fields.next().is_some() {
            return Err(WireError::WrongFieldCount(4));
        }
        let args = if args_joined.is_empty() {
            Vec::new()
        } else {
            args_joined.split(ARG_SEP).map(str::to_string).collect()
        };
        Ok(Self { sender_id: sender_id.to_string(), command: command.to_string(), args })
    }
}

/// Writes one framed message to `writer`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<(), WireError> {
    let frame = message.encode_frame()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message from `reader`. Returns [`WireError::Closed`] if
/// the stream ends before the length prefix is fully read (a clean
/// end-of-stream); any other truncation is an I/O error from the
/// underlying reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, WireError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Message::decode_body(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_and_decode() {
        let msg = Message::new("w1", "done", vec!["comp-xyz".to_string()]);
        let body = msg.encode_body().unwrap();
        let decoded = Message::decode_body(&body).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn no_args_round_trips_to_an_empty_vec() {
        let msg = Message::new("w1", "request_manifest", vec![]);
        let body = msg.encode_body().unwrap();
        let decoded = Message::decode_body(&body).unwrap();
        assert_eq!(decoded.args, Vec::<String>::new());
    }

    #[test]
    fn multiple_args_split_on_percent() {
        let msg = Message::new(
            "w1",
            "execute",
            vec!["comp-1".into(), "/tmp/work".into(), "NULL".into(), "python".into(), "train.py".into()],
        );
        let body = msg.encode_body().unwrap();
        let decoded = Message::decode_body(&body).unwrap();
        assert_eq!(decoded.args.len(), 5);
        assert_eq!(decoded.args[4], "train.py");
    }

    #[test]
    fn rejects_percent_in_an_argument_at_encode_time() {
        let msg = Message::new("w1", "execute", vec!["100%done".to_string()]);
        assert!(matches!(msg.encode_body(), Err(WireError::InvalidField { .. })));
    }

    #[test]
    fn rejects_crlf_in_sender_id_at_encode_time() {
        let msg = Message::new("w1\r\nevil", "done", vec![]);
        assert!(matches!(msg.encode_body(), Err(WireError::InvalidField { .. })));
    }

    #[test]
    fn frame_prefixes_a_big_endian_length() {
        let msg = Message::new("w1", "exit", vec![]);
        let frame = msg.encode_frame().unwrap();
        let body = msg.encode_body().unwrap();
        let len = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        assert_eq!(len as usize, body.len());
        assert_eq!(&frame[4..], &body[..]);
    }

    #[tokio::test]
    async fn write_then_read_frame_round_trips_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let msg = Message::new("worker-7", "done", vec!["comp-abc".to_string()]);
        write_frame(&mut client, &msg).await.unwrap();
        let decoded = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn read_frame_reports_closed_on_clean_eof() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::Closed));
    }
}
