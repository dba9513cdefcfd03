//! REST API server: job submission and status, the continuation webhook,
//! enrichment, and OpenAPI documentation.

pub mod auth;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
