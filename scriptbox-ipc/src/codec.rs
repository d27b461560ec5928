//! Length-prefixed field encoding
//!
//! Every integer is 4 bytes little-endian. Strings are a 4-byte length
//! followed by that many UTF-8 bytes; binary blobs use the same layout with
//! raw bytes.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::IpcError;
use crate::protocol::MAX_FRAME_LEN;

/// Append a 4-byte integer
pub fn put_i32(buf: &mut BytesMut, value: i32) {
    buf.put_i32_le(value);
}

/// Append a length-prefixed UTF-8 string
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Append length-prefixed raw bytes
pub fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.reserve(4 + value.len());
    buf.put_i32_le(value.len() as i32);
    buf.put_slice(value);
}

/// Read a 4-byte integer
pub async fn read_i32<R>(reader: &mut R) -> Result<i32, IpcError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(reader.read_i32_le().await?)
}

/// Read a length-prefixed UTF-8 string
pub async fn read_string<R>(reader: &mut R) -> Result<String, IpcError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let raw = read_bytes(reader).await?;
    String::from_utf8(raw).map_err(|e| IpcError::InvalidMessage(format!("invalid UTF-8: {}", e)))
}

/// Read length-prefixed raw bytes
pub async fn read_bytes<R>(reader: &mut R) -> Result<Vec<u8>, IpcError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_i32(reader).await?;
    let len = checked_len(len)?;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

fn checked_len(len: i32) -> Result<usize, IpcError> {
    if len < 0 {
        return Err(IpcError::InvalidMessage(format!(
            "negative field length {}",
            len
        )));
    }

    let len = len as usize;
    if len > MAX_FRAME_LEN {
        return Err(IpcError::InvalidMessage(format!(
            "field length {} exceeds limit of {} bytes",
            len, MAX_FRAME_LEN
        )));
    }

    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_layout() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "OK");
        assert_eq!(&buf[..], &[2, 0, 0, 0, b'O', b'K']);

        let mut reader = &buf[..];
        assert_eq!(read_string(&mut reader).await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_empty_bytes() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[]);
        assert_eq!(&buf[..], &[0, 0, 0, 0]);

        let mut reader = &buf[..];
        assert!(read_bytes(&mut reader).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_negative_length() {
        let mut buf = BytesMut::new();
        put_i32(&mut buf, -1);

        let mut reader = &buf[..];
        let err = read_bytes(&mut reader).await.unwrap_err();
        assert!(matches!(err, IpcError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_rejects_oversized_length() {
        let mut buf = BytesMut::new();
        put_i32(&mut buf, (MAX_FRAME_LEN + 1) as i32);

        let mut reader = &buf[..];
        let err = read_string(&mut reader).await.unwrap_err();
        assert!(matches!(err, IpcError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0xff, 0xfe]);

        let mut reader = &buf[..];
        let err = read_string(&mut reader).await.unwrap_err();
        assert!(matches!(err, IpcError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_truncated_input_is_connection_closed() {
        let mut buf = BytesMut::new();
        put_i32(&mut buf, 10);
        buf.put_slice(b"abc");

        let mut reader = &buf[..];
        let err = read_string(&mut reader).await.unwrap_err();
        assert!(matches!(err, IpcError::ConnectionClosed));
    }
}
