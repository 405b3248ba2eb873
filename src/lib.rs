//! Client-side sync layer for the iblog REST API.
//!
//! Two concerns live here: a paginated article feed that stays correct when
//! filters change while pages are in flight, and a local-first comment cache
//! reconciled with the server after optimistic writes.

pub mod config;
pub mod error;
pub mod remote;
pub mod session;
pub mod storage;
pub mod sync;

pub use error::SyncError;
pub use session::{AuthorContext, Identity, SessionContext, SyncSettings};
