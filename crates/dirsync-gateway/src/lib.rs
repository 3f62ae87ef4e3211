//! Directory gateway abstraction for dirsync.
//!
//! Defines the narrow interfaces through which the sync core talks to the
//! upstream identity source and the downstream LDAP-style directory, plus the
//! normalized roster types exchanged across that boundary. Protocol plumbing
//! (network calls, bind handshakes, wire encoding) lives behind these traits
//! and is not part of this crate.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{GatewayError, GatewayResult};
pub use traits::{SourceDirectory, TargetDirectory};
pub use types::{NewTargetEntry, SourceGroup, SourceUser, TargetRecord};
