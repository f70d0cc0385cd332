// -----------------------------------------------------------------------------
// ----- ReadyStatus -----------------------------------------------------------

/// Transaction status byte carried by every ReadyForQuery the server sends.
/// The driver uses it to decide whether a transactional session needs a
/// `BEGIN` before the next statement and whether `COMMIT`/`ROLLBACK` has
/// anything to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStatus {
    Idle,
    InTransaction,
    FailedTransaction,
}

// -----------------------------------------------------------------------------
// ----- ReadyStatus: Static ---------------------------------------------------

impl ReadyStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(ReadyStatus::Idle),
            b'T' => Some(ReadyStatus::InTransaction),
            b'E' => Some(ReadyStatus::FailedTransaction),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ReadyStatus::Idle => b'I',
            ReadyStatus::InTransaction => b'T',
            ReadyStatus::FailedTransaction => b'E',
        }
    }

    /// True inside a transaction block, failed or not.
    pub fn in_transaction(self) -> bool {
        !matches!(self, ReadyStatus::Idle)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
