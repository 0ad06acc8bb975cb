//! HTTP surface for the Courier dispatch engine.
//!
//! Endpoints:
//! - POST /notifications — submit a notification
//! - GET  /notifications/{id} — fetch one record
//! - GET  /users/{user_id}/notifications — list a user's records
//! - GET  /health — liveness + engine statistics

pub mod routes;
pub mod state;
