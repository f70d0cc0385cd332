//! Sequential reader over a backend frame body.

use memchr::memchr;
use std::str;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- FrameReader -----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct FrameReader<'a> {
    remaining: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { remaining: body }
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, ReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, ReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        if self.remaining.len() < n {
            return Err(ReadError::UnexpectedEof {
                wanted: n,
                available: self.remaining.len(),
            });
        }
        let (head, tail) = self.remaining.split_at(n);
        self.remaining = tail;
        Ok(head)
    }

    /// Reads a NUL-terminated UTF-8 string and advances past the terminator.
    pub fn read_cstr(&mut self) -> Result<&'a str, ReadError> {
        let nul_index = memchr(0, self.remaining).ok_or(ReadError::MissingTerminator)?;
        let (before_nul, from_nul) = self.remaining.split_at(nul_index);
        self.remaining = &from_nul[1..];
        str::from_utf8(before_nul).map_err(ReadError::Utf8)
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unexpected end of frame: wanted {wanted} bytes, {available} available")]
    UnexpectedEof { wanted: usize, available: usize },

    #[error("missing NUL terminator")]
    MissingTerminator,

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] str::Utf8Error),
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
