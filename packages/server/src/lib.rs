pub mod config;
pub mod consumers;
pub mod database;
pub mod entity;
pub mod error;
pub mod services;
pub mod state;

pub use config::AppConfig;
pub use error::{Result, ServiceError};
pub use state::AppState;
