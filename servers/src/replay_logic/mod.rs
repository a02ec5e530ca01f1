pub mod config;
pub mod control;
pub mod downstream;
pub mod logger;
pub mod state;
