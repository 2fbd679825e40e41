//! Ember - Embedded HTTP server with hot-loadable handler modules
//!
//! Core library for the event loop, HTTP handling and the plugin registry.

pub mod config;
pub mod http;
pub mod plugin;
pub mod server;
pub mod table;
