pub mod aggregate;
pub mod config;
pub mod cors;
pub mod inference;
pub mod routes;
pub mod service;
