//! SurrealDB-backed `StateStore`.
//!
//! The state is kept as a single `trigger_state:current` record whose
//! `payload` field holds the JSON form of [`PersistedState`]. Storing the
//! serde JSON rather than a native object keeps the integer pull-request keys
//! and the optional fields exactly as the other stores write them.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::schema::PersistedState;
use crate::storage_traits::{StateStore, StorageResult};

const TABLE: &str = "trigger_state";
const RECORD: &str = "current";

/// Credentials and location of a remote SurrealDB instance.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint, e.g. `wss://db.example.com`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as a root user instead of a database user.
    pub is_root: bool,
}

impl CloudConfig {
    /// Read the connection settings from `SURREALDB_*` environment variables.
    ///
    /// Endpoint, username and password are required. Namespace and database
    /// default to `prtrigger` and `main`; `SURREALDB_ROOT=true` signs in as root.
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, String> {
        let required = |key: &str| lookup(key).ok_or_else(|| format!("{key} not set"));
        Ok(Self {
            endpoint: required("SURREALDB_ENDPOINT")?,
            username: required("SURREALDB_USERNAME")?,
            password: required("SURREALDB_PASSWORD")?,
            namespace: lookup("SURREALDB_NAMESPACE").unwrap_or_else(|| "prtrigger".to_string()),
            database: lookup("SURREALDB_DATABASE").unwrap_or_else(|| "main".to_string()),
            is_root: lookup("SURREALDB_ROOT").is_some_and(|v| v.eq_ignore_ascii_case("true")),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateRow {
    payload: String,
    saved_at: String,
}

/// SurrealDB-backed implementation of [`StateStore`].
pub struct SurrealStateStore {
    db: Surreal<Any>,
}

impl SurrealStateStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://", "prtrigger", "main").await
    }

    /// Connect to `url` without authentication and select `ns`/`db`.
    pub async fn connect(url: &str, ns: &str, db_name: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(ns)
            .use_db(db_name)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(url = %url, "SurrealStateStore connected");
        Ok(Self { db })
    }

    /// Connect to a remote instance with credentials.
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace))]
    pub async fn connect_cloud(config: &CloudConfig) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("DB auth failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!("SurrealStateStore connected (cloud)");
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// Tries, in order: [`CloudConfig::from_env`], `SURREALDB_URL`, and
    /// finally local persistence under `.prtrigger/db`.
    pub async fn from_env() -> StorageResult<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            return Self::connect_cloud(&config).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url, "prtrigger", "main").await;
        }

        let path = ".prtrigger/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::Connection(format!(
                "Failed to create database directory {}: {}",
                path, e
            ))
        })?;
        info!(
            "No cloud config or SURREALDB_URL found, using local persistence: {}",
            path
        );
        Self::connect(&format!("surrealkv://{}", path), "prtrigger", "main").await
    }
}

#[async_trait]
impl StateStore for SurrealStateStore {
    async fn load(&self) -> StorageResult<Option<PersistedState>> {
        let row: Option<StateRow> = self
            .db
            .select((TABLE, RECORD))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let state = serde_json::from_str(&row.payload)
                    .map_err(|e| StorageError::Deserialization(e.to_string()))?;
                debug!(saved_at = %row.saved_at, "loaded trigger state");
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &PersistedState) -> StorageResult<()> {
        let row = StateRow {
            payload: serde_json::to_string(state)?,
            saved_at: Utc::now().to_rfc3339(),
        };

        let _saved: Option<StateRow> = self
            .db
            .upsert((TABLE, RECORD))
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(tracked = state.tracked_count(), "saved trigger state");
        Ok(())
    }
}
