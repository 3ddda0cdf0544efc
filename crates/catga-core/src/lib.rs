//! Core types shared by every `catga-*` crate: the `CatgaResult<T>`
//! success/failure carrier, the closed `ErrorCode` set, message
//! envelopes, attribute descriptors, and the logging entry point.
//!
//! This crate has no async runtime dependency and no I/O — it's the
//! vocabulary the rest of the workspace is written against.

pub mod descriptor;
pub mod error;
pub mod logging;
pub mod message;
pub mod metadata;
pub mod result;

pub use descriptor::{BehaviorAttribute, BehaviorDescriptor, Lifetime, MessageAttributes, RoutingAttribute};
pub use error::ErrorCode;
pub use message::{CorrelationId, Event, EventEnvelope, MessageId, Request, RequestEnvelope};
pub use metadata::Metadata;
pub use result::{CatgaResult, Failure};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_map_transforms_value() {
        let r: CatgaResult<i32> = CatgaResult::success(1).map(|v| v + 1);
        assert_eq!(r.value(), Some(&2));
    }

    #[test]
    fn failure_map_is_noop() {
        let r: CatgaResult<i32> = CatgaResult::failure(ErrorCode::Unexpected, "boom").map(|v: i32| v + 1);
        assert!(r.is_failure());
        assert_eq!(r.error_code(), Some(ErrorCode::Unexpected));
    }

    #[test]
    fn bind_merges_metadata_from_both_stages() {
        let r: CatgaResult<i32> = CatgaResult::success(1)
            .with_metadata("a", "1")
            .bind(|v| CatgaResult::success(v + 1).with_metadata("b", "2"));
        let meta = r.metadata().unwrap();
        assert_eq!(meta.get("a"), Some("1"));
        assert_eq!(meta.get("b"), Some("2"));
    }

    #[test]
    fn bind_short_circuits_on_failure() {
        let r: CatgaResult<i32> = CatgaResult::<i32>::failure(ErrorCode::ValidationFailed, "bad")
            .bind(|v| CatgaResult::success(v + 1));
        assert!(r.is_failure());
    }

    #[test]
    fn error_code_transience_classification() {
        assert!(ErrorCode::Timeout.is_transient());
        assert!(ErrorCode::TransportFailed.is_transient());
        assert!(!ErrorCode::ValidationFailed.is_transient());
        assert!(ErrorCode::ValidationFailed.is_non_retryable());
        assert!(ErrorCode::ConcurrencyConflict.is_flow_retryable());
    }
}
