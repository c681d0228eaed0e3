pub mod config;
pub mod errors;
pub mod greeting_utils;
