//! Postgres connection layer shared by the manager and workers.
//!
//! Both stores (regions and point-cloud patches) are reached through a
//! [`DbEndpoint`] from the job configuration. This crate turns an endpoint
//! into connect options and a pool.

use std::time::Duration;

use ankadepth_proto::DbEndpoint;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use thiserror::Error;
use tracing::info;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Connect options for an endpoint.
///
/// `options` holds whitespace or comma separated `key=value` pairs.
/// `sslmode` and `application_name` map onto the driver settings,
/// `connect_timeout` (seconds) overrides the acquire timeout, anything else
/// is sent to the server as a runtime parameter.
pub fn connect_options(endpoint: &DbEndpoint, pool: &mut DbConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port)
        .database(&endpoint.database)
        .username(&endpoint.user)
        .password(&endpoint.password);

    let mut runtime = Vec::new();
    for pair in endpoint.options.split([' ', ',']).filter(|s| !s.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim() {
            "sslmode" => {
                if let Ok(mode) = value.trim().parse::<PgSslMode>() {
                    options = options.ssl_mode(mode);
                }
            }
            "application_name" => options = options.application_name(value.trim()),
            "connect_timeout" => {
                if let Ok(secs) = value.trim().parse() {
                    pool.acquire_timeout = Duration::from_secs(secs);
                }
            }
            key => runtime.push((key.to_string(), value.trim().to_string())),
        }
    }
    if !runtime.is_empty() {
        options = options.options(runtime);
    }
    options
}

fn pool_options(config: &DbConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Some(config.idle_timeout))
}

/// Open a pool and establish its first connection.
pub async fn connect(endpoint: &DbEndpoint, config: &DbConfig) -> Result<PgPool, DbError> {
    info!(
        host = %endpoint.host,
        port = endpoint.port,
        database = %endpoint.database,
        max_connections = config.max_connections,
        "Connecting to database"
    );

    let mut config = config.clone();
    let options = connect_options(endpoint, &mut config);
    let pool = pool_options(&config)
        .connect_with(options)
        .await
        .map_err(DbError::Connect)?;

    info!("Database connection pool established");
    Ok(pool)
}

/// Build a pool that connects on first use.
pub fn connect_lazy(endpoint: &DbEndpoint, config: &DbConfig) -> PgPool {
    let mut config = config.clone();
    let options = connect_options(endpoint, &mut config);
    pool_options(&config).connect_lazy_with(options)
}
