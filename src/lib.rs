// Library entry point for fitsocial-server
// Exposes modules for testing

pub mod ai;
pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod uploads;
