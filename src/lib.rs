pub mod auth;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod lockout;
pub mod middleware;
pub mod router;
pub mod server;
pub mod services;
pub mod types;

#[cfg(test)]
pub mod testing;
