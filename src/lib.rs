pub mod ai;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod models;
pub mod permissions;
pub mod realtime;
pub mod routes;
pub mod schema;
pub mod services;
pub mod state;
pub mod storage;
pub mod store;
pub mod utils;
