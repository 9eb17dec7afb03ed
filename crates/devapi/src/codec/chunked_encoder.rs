use crate::buffer::{BufferError, DynBuf};

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Replaces the content of `buf` with one `<hex-length>\r\n<bytes>\r\n` chunk.
pub fn encode_chunk(buf: &mut DynBuf, data: &[u8]) -> Result<(), BufferError> {
    buf.free();
    buf.append(format!("{:X}\r\n", data.len()).as_bytes())?;
    buf.append(data)?;
    buf.append(b"\r\n")
}

/// Replaces the content of `buf` with the zero-length chunk ending the body.
pub fn encode_last_chunk(buf: &mut DynBuf) -> Result<(), BufferError> {
    buf.free();
    buf.append(LAST_CHUNK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_uppercase_hex() {
        let mut buf = DynBuf::new();
        encode_chunk(&mut buf, &[b'x'; 26]).unwrap();
        assert!(buf.as_slice().starts_with(b"1A\r\nxxx"));
        assert!(buf.as_slice().ends_with(b"x\r\n"));
        assert_eq!(buf.len(), 4 + 26 + 2);
    }

    #[test]
    fn last_chunk_replaces_content() {
        let mut buf = DynBuf::new();
        encode_chunk(&mut buf, b"abc").unwrap();
        encode_last_chunk(&mut buf).unwrap();
        assert_eq!(buf.as_slice(), b"0\r\n\r\n");
    }
}
