pub mod config;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod inference;
pub mod models;
pub mod postprocess;
pub mod preprocess;
pub mod routes;
