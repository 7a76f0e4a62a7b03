pub mod config;
pub mod database;
pub mod entry;
pub mod error;
pub mod lines;
pub mod models;
pub mod repository;
pub mod runner;
pub mod types;
pub mod vtt;
