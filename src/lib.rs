pub mod backup;
pub mod cli;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod lock;
pub mod repository;
pub mod restore;
pub mod schedule;
pub mod signal_handler;
pub mod snapshot;
pub mod types;
pub mod util;
pub mod volume;

pub use error::{Result, ServerkeepError};
