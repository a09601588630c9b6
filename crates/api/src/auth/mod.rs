//! Authentication primitives.
//!
//! - [`jwt`] -- HS256 access-token validation (and issuance for local tooling).

pub mod jwt;
