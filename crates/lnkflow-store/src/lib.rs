//! lnkflow Store - Rule persistence layer
//!
//! This crate provides the durable Rule Store behind the automation
//! engine: a PostgreSQL-backed repository plus an in-memory
//! implementation used in tests.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
