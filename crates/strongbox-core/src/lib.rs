pub mod audit;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lock;
pub mod maintenance;
pub mod types;

pub use error::{ErrorKind, ErrorResponse, Result, StoreError};
