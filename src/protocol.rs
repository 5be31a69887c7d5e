//! Length-prefixed framing for the message set:
//! 1-byte type + 2-byte big-endian length + JSON payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{RelaySimError, Result};
use crate::message::{Message, Reserved, Response};

pub const HEADER_SIZE: usize = 3;

pub fn encode(msg: &Message) -> Result<BytesMut> {
    let payload = match msg {
        Message::Request(r) => serde_json::to_vec(r)?,
        Message::Response(r) => serde_json::to_vec(r)?,
        Message::Heartbeat(r) | Message::ScaleUp(r) | Message::Shutdown(r) => {
            serde_json::to_vec(r)?
        }
    };

    if payload.len() > u16::MAX as usize {
        return Err(RelaySimError::Serialize(<serde_json::Error as serde::ser::Error>::custom(
            "payload exceeds 2-byte length prefix",
        )));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(msg.type_byte());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(&payload);
    Ok(buf)
}

pub fn decode(type_byte: u8, payload: &[u8]) -> Result<Message> {
    match type_byte {
        1 => Ok(Message::Request(serde_json::from_slice(payload)?)),
        2 => Ok(Message::Response(serde_json::from_slice(payload)?)),
        3 => Ok(Message::Heartbeat(parse_reserved(payload)?)),
        4 => Ok(Message::ScaleUp(parse_reserved(payload)?)),
        5 => Ok(Message::Shutdown(parse_reserved(payload)?)),
        other => Err(RelaySimError::UnknownMessageType(other)),
    }
}

fn parse_reserved(payload: &[u8]) -> Result<Reserved> {
    if payload.is_empty() {
        return Ok(Reserved {
            fields: Default::default(),
        });
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Read exactly one frame from an async reader, or `Ok(None)` on clean EOF.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Message>> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(RelaySimError::Io(e)),
    }

    let mut cursor = &header[..];
    let type_byte = cursor.get_u8();
    let len = cursor.get_u16() as usize;

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await?;
    }

    decode(type_byte, &payload).map(Some)
}

pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<()> {
    let buf = encode(msg)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Convenience for the common case of replying with a `Response`.
pub async fn write_response<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> Result<()> {
    write_frame(writer, &Message::Response(response.clone())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, RequestClass};

    #[tokio::test]
    async fn request_round_trips_field_by_field() {
        let req = Request::new(RequestClass::Z2, "K1", 100.0);
        let msg = Message::Request(req.clone());
        let encoded = encode(&msg).unwrap();

        let mut cursor = std::io::Cursor::new(encoded.to_vec());
        let decoded = read_frame(&mut cursor).await.unwrap().unwrap();

        match decoded {
            Message::Request(got) => {
                assert_eq!(got.request_id, req.request_id);
                assert_eq!(got.class, req.class);
                assert_eq!(got.client_id, req.client_id);
                assert_eq!(got.created_at, req.created_at);
            }
            _ => panic!("expected Request"),
        }
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = decode(99, b"{}").unwrap_err();
        matches!(err, RelaySimError::UnknownMessageType(99))
            .then_some(())
            .expect("expected UnknownMessageType");
    }
}
