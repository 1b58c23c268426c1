//! Campus sync library exports

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod tasks;
