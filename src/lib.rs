pub mod cli;
pub mod config;
pub mod connection;
pub mod environments;
pub mod error;
pub mod operator_log;
pub mod registry;
pub mod runtime_state;

pub use error::{ConnectionError, EnvironmentError, RegistryError};
