//! # datagate testkit
//!
//! Test utilities shared by the datagate backends:
//! - a sample catalog and record fixtures
//! - conformance scenarios every backend must pass
//! - container helpers for integration tests against real engines
//!
//! ## Usage
//!
//! ```rust,ignore
//! use datagate_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn memory_backend_conforms() {
//!     let gate = memory_gate();
//!     gate.init().await.unwrap();
//!     run_all(&gate).await.unwrap();
//! }
//! ```

pub mod containers;
pub mod fixtures;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::containers::*;
    pub use crate::fixtures::*;
    pub use crate::scenarios::*;
}
