pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod routing;
pub mod security;
pub mod server;
pub mod session;
pub mod templates;
