//! The external completion capability boundary.
//!
//! The core treats generation as an opaque, fallible, retry-safe service
//! behind the [`Generator`] trait. Tests inject [`StubGenerator`], a
//! deterministic scripted implementation, so merge/validate/repair logic is
//! exercised without a live service.

pub mod client;
pub mod stub;

pub use client::{GeneratedFragment, GenerationFailure, GenerationRequest, Generator};
pub use stub::{StubBehavior, StubGenerator};
