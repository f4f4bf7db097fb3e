pub mod config;
pub mod state;
pub mod users;
