use crate::wire::{FrameReader, ReadError};

use super::DriverError;

// -----------------------------------------------------------------------------
// ----- ErrorResponse ---------------------------------------------------------

/// Decoded body of a backend ErrorResponse ('E') or NoticeResponse ('N').
///
/// Only the fields the pool acts on or logs are kept; everything else the
/// server sends (position, schema, routine, ...) is skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorResponse {
    pub severity: String, // S (V preferred when present)
    pub code: String,     // C (SQLSTATE 5-char)
    pub message: String,  // M

    pub detail: Option<String>, // D
    pub hint: Option<String>,   // H
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse: Static -------------------------------------------------

impl ErrorResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ReadError> {
        let mut reader = FrameReader::new(body);
        let mut out = ErrorResponse::default();
        let mut nonlocalized_severity = None;

        loop {
            let field = reader.read_u8()?;
            if field == 0 {
                break;
            }
            let value = reader.read_cstr()?.to_string();
            match field {
                b'S' => out.severity = value,
                b'V' => nonlocalized_severity = Some(value),
                b'C' => out.code = value,
                b'M' => out.message = value,
                b'D' => out.detail = Some(value),
                b'H' => out.hint = Some(value),
                _ => {}
            }
        }

        if let Some(severity) = nonlocalized_severity {
            out.severity = severity;
        }

        Ok(out)
    }
}

// -----------------------------------------------------------------------------
// ----- ErrorResponse: Public -------------------------------------------------

impl ErrorResponse {
    /// Invalid authorization specification / invalid password.
    pub fn is_auth_failure(&self) -> bool {
        self.code.starts_with("28")
    }

    pub fn into_driver_error(self) -> DriverError {
        if self.is_auth_failure() {
            return DriverError::Auth(format!("{} ({})", self.message, self.code));
        }

        let message = match self.detail {
            Some(detail) => format!("{}: {detail}", self.message),
            None => self.message,
        };

        DriverError::Server {
            severity: self.severity,
            code: self.code,
            message,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
