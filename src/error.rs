//! Error taxonomy for the exploration engine and the reconciliation ledger.
//!
//! | Variant                 | Recovery                                            |
//! |-------------------------|-----------------------------------------------------|
//! | `OracleInput`           | none – caller bug                                   |
//! | `StoreIo`               | reads retried with backoff, writes pause the miner  |
//! | `Submission`            | terminal for the action, effect reversed            |
//! | `RemoteRevert`          | terminal for the action, effect reversed            |
//! | `TransportDisconnected` | re-attach the worker and resync                     |

use crate::types::Coordinate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("coordinate {0} is outside the representable lattice")]
    OracleInput(Coordinate),

    #[error("store I/O failure: {0}")]
    StoreIo(String),

    #[error("submission rejected: {0}")]
    Submission(String),

    #[error("remote ledger reverted the action: {0}")]
    RemoteRevert(String),

    #[error("worker '{0}' disconnected")]
    TransportDisconnected(String),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Errors that cross the remote-ledger boundary are shown to the user;
    /// everything else is operational.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            EngineError::Submission(_) | EngineError::RemoteRevert(_) | EngineError::InvalidAction(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
