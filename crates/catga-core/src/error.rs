//! The closed error-code set from spec §7.
//!
//! `ErrorCode` is never extended at runtime — behaviors and transports
//! translate every infrastructure fault into one of these variants at
//! the pipeline boundary (spec §4.A, §7 "Propagation").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ValidationFailed,
    HandlerNotFound,
    HandlerAmbiguous,
    HandlerFailed,
    PartialEventFailure,
    PipelineFailed,
    Timeout,
    Cancelled,
    CircuitOpen,
    Overloaded,
    SerializationFailed,
    PersistenceFailed,
    LockFailed,
    TransportFailed,
    ConcurrencyConflict,
    NotLeader,
    ClockRegression,
    Unexpected,
}

impl ErrorCode {
    /// Transient classification used by the resilience pipeline's retry
    /// stage (spec §7). `Overloaded` is transient except when it signals
    /// bulkhead queue overflow — callers that want that distinction
    /// inspect `Failure::metadata["overload_reason"]` themselves, since
    /// the code alone doesn't carry it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout | ErrorCode::TransportFailed | ErrorCode::PersistenceFailed | ErrorCode::Overloaded
        )
    }

    /// `ConcurrencyConflict` is only retried by the flow engine's bounded
    /// CAS-retry loop (spec §4.L), never by the general resilience stage.
    pub fn is_flow_retryable(&self) -> bool {
        matches!(self, ErrorCode::ConcurrencyConflict)
    }

    /// Errors the resilience pipeline must never retry (spec §7).
    pub fn is_non_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ValidationFailed | ErrorCode::HandlerNotFound | ErrorCode::CircuitOpen | ErrorCode::Cancelled
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
