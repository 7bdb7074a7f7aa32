//! CovenantSQL client configuration
//!
//! DSN handling for database connections. A DSN names exactly one deployed
//! database instance: `covenantsql://<database id>`.

mod config;

pub use config::{format_dsn, parse_dsn, Config, DB_SCHEME, DB_SCHEME_ALIAS};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DsnError {
    #[error("Invalid DSN: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, DsnError>;
