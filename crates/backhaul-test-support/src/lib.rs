#![forbid(unsafe_code)]
#![warn(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (artifact builders, stream helpers), mocks.rs (in-memory origin and
//! storage that record every call).

pub mod fixtures;
pub mod mocks;

pub use mocks::{MemoryOrigin, MemoryStorage, OriginCall, StorageCall};
