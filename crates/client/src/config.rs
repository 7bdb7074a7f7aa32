use crate::{DsnError, Result};

/// Canonical DSN scheme
pub const DB_SCHEME: &str = "covenantsql";

/// Short alias accepted on parse
pub const DB_SCHEME_ALIAS: &str = "cql";

/// Configuration parsed from a DSN string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Hex id of the target database instance
    pub database_id: String,
    // read/write/exec timeouts belong here once the driver grows them
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Format this config into a DSN usable by the driver.
    pub fn format_dsn(&self) -> String {
        format!("{}://{}", DB_SCHEME, self.database_id)
    }
}

/// Format a config into a DSN string.
pub fn format_dsn(cfg: &Config) -> String {
    cfg.format_dsn()
}

/// Parse a DSN string into a config.
///
/// Accepts `covenantsql://<id>`, `cql://<id>`, or a bare id (the canonical
/// scheme is assumed).
pub fn parse_dsn(dsn: &str) -> Result<Config> {
    let canonical = format!("{}://", DB_SCHEME);
    let alias = format!("{}://", DB_SCHEME_ALIAS);

    let rest = if let Some(rest) = dsn.strip_prefix(&canonical) {
        rest
    } else if let Some(rest) = dsn.strip_prefix(&alias) {
        rest
    } else if dsn.contains("://") {
        return Err(DsnError::Invalid(format!("unsupported scheme in {}", dsn)));
    } else {
        dsn
    };

    // the host part is the database id; no path/query currently defined
    let database_id = rest.trim_end_matches('/');
    if database_id.contains('/') || database_id.contains('?') {
        return Err(DsnError::Invalid(format!(
            "unexpected path or query in {}",
            dsn
        )));
    }

    Ok(Config {
        database_id: database_id.to_string(),
    })
}
