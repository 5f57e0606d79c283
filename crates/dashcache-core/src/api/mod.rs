//! REST API client module.
//!
//! This module provides the `ApiClient` for issuing requests authorized by
//! the active session's bearer credential, and for wrapping endpoints as
//! fetch functions for the prefetch registry.

pub mod client;
pub mod error;

pub use client::{ApiClient, CredentialSource};
pub use error::ApiError;
