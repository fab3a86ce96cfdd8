pub mod api;
pub mod config;
pub mod connection;
pub mod controller;
pub mod engine;
pub mod host;
pub mod logging;
pub mod profile;
