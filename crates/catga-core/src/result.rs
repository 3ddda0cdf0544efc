//! `CatgaResult<T>` — the typed success/failure carrier handlers and
//! behaviors return instead of raising (spec §4.A). Infrastructure
//! faults are a distinct concern: they surface as Rust panics/`Err`
//! values at a layer boundary and get converted to
//! `Failure(Unexpected, ...)` by the pipeline (see `catga-pipeline`).

use crate::error::ErrorCode;
use crate::metadata::Metadata;

#[derive(Debug, Clone)]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
    pub cause: Option<String>,
    pub metadata: Metadata,
}

impl Failure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), cause: None, metadata: Metadata::new() }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone)]
pub enum CatgaResult<T> {
    Success { value: Option<T>, metadata: Metadata },
    Failure(Failure),
}

impl<T> CatgaResult<T> {
    pub fn success(value: T) -> Self {
        CatgaResult::Success { value: Some(value), metadata: Metadata::new() }
    }

    pub fn success_empty() -> Self {
        CatgaResult::Success { value: None, metadata: Metadata::new() }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        CatgaResult::Failure(Failure::new(code, message))
    }

    pub fn from_failure(failure: Failure) -> Self {
        CatgaResult::Failure(failure)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CatgaResult::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            CatgaResult::Failure(f) => Some(f.code),
            CatgaResult::Success { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            CatgaResult::Success { value, .. } => value.as_ref(),
            CatgaResult::Failure(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            CatgaResult::Success { value, .. } => value,
            CatgaResult::Failure(_) => None,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            CatgaResult::Success { metadata, .. } => Some(metadata),
            CatgaResult::Failure(f) => Some(&f.metadata),
        }
    }

    /// `Map` — transforms a successful value, leaving failures untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CatgaResult<U> {
        match self {
            CatgaResult::Success { value, metadata } => {
                CatgaResult::Success { value: value.map(f), metadata }
            }
            CatgaResult::Failure(e) => CatgaResult::Failure(e),
        }
    }

    /// `Bind` — chains a fallible continuation; metadata from the first
    /// stage is merged into the continuation's result.
    pub fn bind<U>(self, f: impl FnOnce(T) -> CatgaResult<U>) -> CatgaResult<U> {
        match self {
            CatgaResult::Success { value: Some(v), metadata } => {
                let mut next = f(v);
                next.merge_metadata(&metadata);
                next
            }
            CatgaResult::Success { value: None, metadata } => {
                CatgaResult::Success { value: None, metadata }
            }
            CatgaResult::Failure(e) => CatgaResult::Failure(e),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self {
            CatgaResult::Success { metadata, .. } => metadata.insert(key, value),
            CatgaResult::Failure(f) => f.metadata.insert(key, value),
        }
        self
    }

    fn merge_metadata(&mut self, other: &Metadata) {
        match self {
            CatgaResult::Success { metadata, .. } => metadata.merge(other),
            CatgaResult::Failure(f) => f.metadata.merge(other),
        }
    }
}
