use eval_core::error::{EvalError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame's payload size. Guards against a
/// misbehaving or malicious peer claiming an unbounded length prefix.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Write one length-prefixed frame: a 4-byte big-endian length (excluding
/// the length word itself) followed by the raw payload bytes.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| EvalError::Protocol("frame payload exceeds u32::MAX bytes".to_string()))?;

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| EvalError::Transient(format!("failed to write frame length: {e}")))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| EvalError::Transient(format!("failed to write frame payload: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| EvalError::Transient(format!("failed to flush frame: {e}")))?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF before
/// any bytes of the next frame arrive (the peer disconnected); returns
/// `Err(EvalError::Protocol)` if the declared length exceeds
/// [`MAX_FRAME_BYTES`] or the stream ends mid-frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(EvalError::Transient(format!("failed to read frame length: {e}"))),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(EvalError::Protocol(format!(
            "frame length {len} exceeds maximum of {MAX_FRAME_BYTES} bytes"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| EvalError::Protocol(format!("stream ended mid-frame: {e}")))?;

    Ok(Some(payload))
}
