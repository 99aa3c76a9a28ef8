//! Swift object store behind Keystone authentication.

mod auth;
mod client;

pub use client::SwiftStore;
