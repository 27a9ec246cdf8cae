pub mod authorize;
pub mod build;
pub mod config;
pub mod images;
pub mod utils;
