//! Helpdesk Shared Types and Utilities
//!
//! This crate contains the domain model, storage errors, pagination and
//! database helpers shared by the helpdesk services.

pub mod db;
pub mod error;
pub mod pagination;
pub mod types;

pub use db::*;
pub use error::*;
pub use pagination::{PageMeta, PageRequest, Paginated};
pub use types::*;
