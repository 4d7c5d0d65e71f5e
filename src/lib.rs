pub mod config;
pub mod error;
pub mod extractor;
pub mod publishing;
pub mod routes;
