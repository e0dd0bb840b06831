//! Execution state of a data flow inside the data plane.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Data plane record states
///
/// Codes are stable and safe to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransferState {
    /// No record for the process
    NotStarted = 0,

    /// Accepted onto the transfer queue
    Received = 100,

    /// Transfer finished successfully
    Completed = 200,

    /// Transfer finished with an error
    Failed = -100,

    /// Control plane was told about the outcome
    Notified = 300,
}

impl TransferState {
    /// The data plane has nothing left to do for the process.
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Notified
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferState::NotStarted),
            100 => Some(TransferState::Received),
            200 => Some(TransferState::Completed),
            -100 => Some(TransferState::Failed),
            300 => Some(TransferState::Notified),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::NotStarted => "NOT_STARTED",
            TransferState::Received => "RECEIVED",
            TransferState::Completed => "COMPLETED",
            TransferState::Failed => "FAILED",
            TransferState::Notified => "NOTIFIED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferState::from_id(value).ok_or(())
    }
}
