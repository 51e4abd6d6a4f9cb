//! Utility functions intended for use within the [`crate::message`] module.

use super::transport::{Envelope, Tag};
use std::io::prelude::*;
use std::io;

/// Largest payload a frame may announce. Anything longer means the stream
/// is corrupt or out of step.
pub const MAX_FRAME_LEN: u64 = 1 << 30;

/// Read a `u64` out of the given stream.
pub fn read_u64<R: Read>(stream: &mut R) -> io::Result<u64> {
    read_bytes_array(stream).map(u64::from_le_bytes)
}

/// Read the given number of bytes from a stream, into a `Vec<u8>`.
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Read the given (const) number of bytes from a stream, into an array.
pub fn read_bytes_array<R: Read, const SIZE: usize>(stream: &mut R) -> io::Result<[u8; SIZE]> {
    let mut buffer = [0; SIZE];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Write one frame: tag, source rank and payload length as little-endian
/// `u64`s, followed by the payload.
pub fn write_frame<W: Write>(stream: &mut W, source: usize, tag: Tag, payload: &[u8]) -> io::Result<()> {
    let mut header = [0; 24];
    header[0..8].copy_from_slice(&tag.0.to_le_bytes());
    header[8..16].copy_from_slice(&(source as u64).to_le_bytes());
    header[16..24].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    stream.write_all(&header)?;
    stream.write_all(payload)?;
    stream.flush()
}

/// Read one frame written by [`write_frame`].
pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Envelope> {
    let tag = Tag(read_u64(stream)?);
    let source = read_u64(stream)? as usize;
    let len = read_u64(stream)?;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame announces {} bytes, at most {} allowed", len, MAX_FRAME_LEN),
        ));
    }
    let payload = read_bytes_vec(stream, len as usize)?;
    Ok(Envelope {
        source,
        tag,
        payload,
    })
}
