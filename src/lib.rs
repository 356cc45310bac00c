pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod registry;
pub mod server;
pub mod tools;
pub mod transport;
