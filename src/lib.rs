// src/lib.rs

//! Vault Archiver Library
//!
//! Crawls a public site from its root, extracts readable text from each
//! same-origin page and packages the result into a zip archive that can
//! be downloaded exactly once.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
