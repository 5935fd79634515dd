pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod queue;
pub mod services;
pub mod storage;
pub mod utils;
pub mod web;
pub mod worker;
