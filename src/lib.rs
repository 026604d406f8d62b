pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod geo;
pub mod ingest;
pub mod models;
pub mod processor;
