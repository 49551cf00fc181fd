pub mod broadcast;
pub mod chat;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;
pub mod notify;
pub mod rpc;
pub mod sync;
pub mod web;
