//! Domain types and pure policy for the image-generation backend.
//!
//! Nothing in this crate performs I/O. Persistence lives in
//! `imagegen-db`, provider HTTP calls in `imagegen-providers`, and the
//! admission/lifecycle services in `imagegen-pipeline`.

pub mod error;
pub mod generation;
pub mod quota;
pub mod roles;
pub mod task_status;
pub mod types;
pub mod webhook;
