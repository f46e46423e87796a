// src/lib.rs

//! Shelfwatch Library
//!
//! Captures dated snapshots of retail category listings and reports which
//! products appeared, disappeared, or changed price since the last run.

pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod report;
pub mod services;
pub mod storage;
pub mod utils;
