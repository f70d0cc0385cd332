// -----------------------------------------------------------------------------
// ----- FramePeek -------------------------------------------------------------

/// Result of looking at the front of a backend read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePeek {
    /// Not enough bytes buffered yet for a whole frame.
    Incomplete,

    /// A complete frame: tag byte and the declared length (which includes the
    /// four length bytes but not the tag).
    Frame { tag: u8, len: usize },

    /// The declared length can never be valid (< 4).
    Invalid { tag: u8, len: u32 },
}

/// Inspects `bytes` for one complete `tag | i32 len | body` backend frame.
pub fn peek_frame(bytes: &[u8]) -> FramePeek {
    if bytes.len() < 5 {
        return FramePeek::Incomplete;
    }

    let tag = bytes[0];
    let declared = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    if declared < 4 {
        return FramePeek::Invalid { tag, len: declared };
    }

    let len = declared as usize;
    if bytes.len() < 1 + len {
        return FramePeek::Incomplete;
    }

    FramePeek::Frame { tag, len }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_ready_for_query_frame() {
        let frame = [b'Z', 0, 0, 0, 5, b'I'];
        assert_eq!(peek_frame(&frame), FramePeek::Frame { tag: b'Z', len: 5 });
    }

    #[test]
    fn trailing_bytes_belong_to_next_frame() {
        let frame = [b'Z', 0, 0, 0, 5, b'I', b'C', 0];
        assert_eq!(peek_frame(&frame), FramePeek::Frame { tag: b'Z', len: 5 });
    }

    #[test]
    fn short_header_is_incomplete() {
        assert_eq!(peek_frame(&[b'Z', 0, 0, 0]), FramePeek::Incomplete);
    }

    #[test]
    fn missing_body_is_incomplete() {
        assert_eq!(peek_frame(&[b'D', 0, 0, 0, 9, 0, 1]), FramePeek::Incomplete);
    }

    #[test]
    fn impossible_length_is_invalid() {
        assert_eq!(
            peek_frame(&[b'Z', 0, 0, 0, 3, b'I']),
            FramePeek::Invalid { tag: b'Z', len: 3 }
        );
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
