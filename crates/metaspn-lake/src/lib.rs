//! metaspn-lake: an append-only personal activity data lake.
//!
//! Activities live in newline-delimited JSON files partitioned into
//! `sources/` (consumed) and `artifacts/` (created). A disposable
//! [`manifest`] index accelerates lookups and a versioned [`enhancement`]
//! store keeps derived scores next to the raw records.
//!
//! # Conventions
//!
//! - **Errors**: each component returns its own `thiserror` enum carrying an
//!   [`error::ErrorCode`]; the composition root ([`Lake`]) uses `anyhow`.
//! - **Logging**: `tracing` macros with structured fields. Skipped records
//!   are logged, never returned.

pub mod activity;
pub mod config;
pub mod enhancement;
pub mod error;
pub mod event_log;
pub mod filter;
pub mod lake;
pub mod layout;
pub mod loader;
pub mod manifest;
pub mod platform;
pub mod store;

pub use activity::{Activity, ActivityType, GameSignature};
pub use error::ErrorCode;
pub use filter::ActivityFilter;
pub use lake::{AppendOutcome, Lake};
pub use loader::{ActivityLoader, QuerySource};
