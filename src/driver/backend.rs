//! Decoding of the backend messages the driver consumes.

use crate::wire::FrameReader;

use super::{DriverError, ReadyStatus, Row, error_response::ErrorResponse};

// -----------------------------------------------------------------------------
// ----- BackendMessage --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// 'R' with the method code and any method payload (the MD5 salt).
    Authentication(AuthRequest),

    /// '1'
    ParseComplete,

    /// '2'
    BindComplete,

    /// 'n'
    NoData,

    /// 'T', column names only.
    RowDescription(Vec<String>),

    /// 'D'
    DataRow(Row),

    /// 'C'
    CommandComplete(String),

    /// 'I'
    EmptyQueryResponse,

    /// 'E'
    ErrorResponse(ErrorResponse),

    /// 'Z'
    ReadyForQuery(ReadyStatus),

    /// 'S', 'K', 'N', 'A' and anything else that carries no state we track.
    Ignored(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Other(i32),
}

// -----------------------------------------------------------------------------
// ----- BackendMessage: Static ------------------------------------------------

impl BackendMessage {
    pub fn decode(tag: u8, body: &[u8]) -> Result<Self, DriverError> {
        let mut reader = FrameReader::new(body);

        let msg = match tag {
            b'R' => BackendMessage::Authentication(match reader.read_i32()? {
                0 => AuthRequest::Ok,
                3 => AuthRequest::CleartextPassword,
                5 => {
                    let salt = reader.read_bytes(4)?;
                    AuthRequest::Md5Password {
                        salt: [salt[0], salt[1], salt[2], salt[3]],
                    }
                }
                other => AuthRequest::Other(other),
            }),
            b'1' => BackendMessage::ParseComplete,
            b'2' => BackendMessage::BindComplete,
            b'n' => BackendMessage::NoData,
            b'T' => BackendMessage::RowDescription(decode_row_description(&mut reader)?),
            b'D' => BackendMessage::DataRow(decode_data_row(&mut reader)?),
            b'C' => BackendMessage::CommandComplete(reader.read_cstr()?.to_string()),
            b'I' => BackendMessage::EmptyQueryResponse,
            b'E' => BackendMessage::ErrorResponse(ErrorResponse::parse(body)?),
            b'Z' => {
                let byte = reader.read_u8()?;
                let status = ReadyStatus::from_byte(byte).ok_or_else(|| {
                    DriverError::Protocol(format!("unknown transaction status {byte:#X}"))
                })?;
                BackendMessage::ReadyForQuery(status)
            }
            other => BackendMessage::Ignored(other),
        };

        Ok(msg)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn decode_row_description(reader: &mut FrameReader<'_>) -> Result<Vec<String>, DriverError> {
    let count = reader.read_i16()?;
    let mut columns = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        columns.push(reader.read_cstr()?.to_string());
        // table oid, attnum, type oid, typlen, typmod, format
        reader.read_bytes(4 + 2 + 4 + 2 + 4 + 2)?;
    }
    Ok(columns)
}

fn decode_data_row(reader: &mut FrameReader<'_>) -> Result<Row, DriverError> {
    let count = reader.read_i16()?;
    let mut values = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let len = reader.read_i32()?;
        if len < 0 {
            values.push(None);
            continue;
        }
        let raw = reader.read_bytes(len as usize)?;
        let text = std::str::from_utf8(raw)
            .map_err(|e| DriverError::Protocol(format!("non UTF-8 column value: {e}")))?;
        values.push(Some(text.to_string()));
    }
    Ok(Row::new(values))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
