//! Concrete object-store backends.

pub mod s3;
pub mod swift;
