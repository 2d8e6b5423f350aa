use crate::data::EncryptedBatch;
use std::io::Read;
use thiserror::Error;

/// Acknowledgment sent by the server after a successful store, exactly
/// these 3 bytes. On any failure the connection is closed with nothing
/// sent.
pub const ACK: &[u8; 3] = b"ACK";

/// Frame terminator. The only frame boundary on the wire; ciphertexts
/// are hex-encoded so the terminator cannot appear inside a payload.
pub const FRAME_TERMINATOR: u8 = b'\n';

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("empty frame")]
    Empty,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serializes one batch as a newline-terminated JSON frame.
pub fn encode_frame(batch: &EncryptedBatch) -> Result<Vec<u8>, WireError> {
    let mut frame = serde_json::to_vec(batch)?;
    frame.push(FRAME_TERMINATOR);
    Ok(frame)
}

/// Parses the bytes of one frame (terminator optional) into a batch.
pub fn decode_frame(frame: &[u8]) -> Result<EncryptedBatch, WireError> {
    let line = match frame.iter().position(|&b| b == FRAME_TERMINATOR) {
        Some(pos) => &frame[..pos],
        None => frame,
    };
    if line.is_empty() {
        return Err(WireError::Empty);
    }
    Ok(serde_json::from_slice(line)?)
}

/// Reads chunks until the frame terminator is observed or the peer
/// closes. Bounded in time only by the reader's own timeout.
pub fn read_frame<R: Read>(reader: &mut R, chunk_size: usize) -> Result<Vec<u8>, WireError> {
    let mut frame = Vec::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        frame.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&FRAME_TERMINATOR) {
            break;
        }
    }
    Ok(frame)
}
