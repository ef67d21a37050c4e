pub mod cli;
pub mod config;
pub mod domains;
pub mod errors;
pub mod infrastructure;
pub mod meta;
pub mod server;
pub mod service;
