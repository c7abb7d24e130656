//! lnkflow API - REST API server
//!
//! This crate provides the REST surface over the automation engine:
//! rule CRUD, lifecycle operations, bulk operations and the internal
//! event endpoint.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use routes::create_router;
