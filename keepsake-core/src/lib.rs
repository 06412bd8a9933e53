//! Keepsake Core - Blob and Claim Types
//!
//! Pure data structures for the content-addressed store: blob references,
//! signed attribute claims and their time-resolved folding, the search
//! constraint tree, and the shared error taxonomy. No I/O lives here.

// Core modules
mod blobref;
mod cancel;
mod claim;
mod constraint;
mod error;
mod limits;
mod schema;

// Re-export blob reference types
pub use blobref::*;

// Re-export cancellation handle
pub use cancel::*;

// Re-export claim types and the claim folder
pub use claim::*;

// Re-export the constraint tree
pub use constraint::*;

// Re-export error types
pub use error::*;

// Re-export limits config
pub use limits::*;

// Re-export schema constants
pub use schema::*;
