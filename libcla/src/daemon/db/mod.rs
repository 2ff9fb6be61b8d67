// Copyright 2025 The Command Line Assistant Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The storage engine. One `AnyConnection` type covers the embedded
//! and both networked dialects; everything above this module talks to
//! repositories and sees only `ConnectionError`/`QueryError`.

use std::sync::{Arc, Mutex};

use diesel::{
    connection::SimpleConnection as _,
    prelude::*,
    r2d2::{ConnectionManager, Pool},
};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::config::{DatabaseConfig, DatabaseKind};

pub mod models;
pub mod repository;
pub mod schema;

/// The base size of the connection pool for networked dialects.
const POOL_SIZE: u32 = 5;
/// How many extra connections the pool may open under load.
const POOL_MAX_OVERFLOW: u32 = 10;

#[derive(diesel::MultiConnection)]
pub enum AnyConnection {
    Postgresql(PgConnection),
    Mysql(MysqlConnection),
    Sqlite(SqliteConnection),
}

/// Raised when building the engine or setting up the schema fails.
#[derive(Error, Debug)]
#[error("could not set up the database: {0}")]
pub struct ConnectionError(pub String);

/// Raised when any operation inside a session fails.
#[derive(Error, Debug)]
#[error("database query failed: {0}")]
pub struct QueryError(pub String);

/// Hands out scoped transactional sessions.
///
/// The embedded dialect shares a single connection behind a mutex;
/// the networked ones draw from an r2d2 pool with pre-ping health
/// checks. Either way a session is one `transaction(..)`: commit on
/// success, rollback on any failure, released on all exit paths.
pub enum SessionFactory {
    Embedded(Mutex<AnyConnection>),
    Pooled(Pool<ConnectionManager<AnyConnection>>),
}

impl SessionFactory {
    pub fn with_session<T, F>(&self, f: F) -> Result<T, QueryError>
    where
        F: FnOnce(&mut AnyConnection) -> diesel::QueryResult<T>,
    {
        match self {
            SessionFactory::Embedded(conn) => {
                // we unwrap to propagate the poison as an unwind
                let mut conn = conn.lock().unwrap();
                conn.transaction(|conn| f(conn)).map_err(wrap_query_error)
            }
            SessionFactory::Pooled(pool) => {
                let mut conn = pool.get().map_err(|e| {
                    error!("checking out a pooled connection: {}", e);
                    QueryError(e.to_string())
                })?;
                conn.transaction(|conn| f(conn)).map_err(wrap_query_error)
            }
        }
    }

    /// Run raw statements outside a repository session. Only used for
    /// schema setup, where failures are connection errors.
    fn batch_execute(&self, sql: &str) -> Result<(), ConnectionError> {
        match self {
            SessionFactory::Embedded(conn) => {
                let mut conn = conn.lock().unwrap();
                conn.batch_execute(sql).map_err(|e| ConnectionError(e.to_string()))
            }
            SessionFactory::Pooled(pool) => {
                let mut conn = pool.get().map_err(|e| ConnectionError(e.to_string()))?;
                conn.batch_execute(sql).map_err(|e| ConnectionError(e.to_string()))
            }
        }
    }
}

fn wrap_query_error(e: diesel::result::Error) -> QueryError {
    error!("database session error: {}", e);
    QueryError(e.to_string())
}

/// The configured storage engine, ready to hand out sessions.
pub struct Database {
    sessions: Arc<SessionFactory>,
}

impl Database {
    /// Build the engine for the configured dialect and make sure the
    /// tables exist.
    #[instrument(skip_all)]
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let url = config.connection_url().map_err(|e| ConnectionError(e.to_string()))?;

        let sessions = match config.kind {
            DatabaseKind::Sqlite => {
                info!("opening embedded database");
                let conn = AnyConnection::establish(&url).map_err(|e| {
                    error!("failed to create database engine: {}", e);
                    ConnectionError(e.to_string())
                })?;
                SessionFactory::Embedded(Mutex::new(conn))
            }
            DatabaseKind::Mysql | DatabaseKind::Postgresql => {
                info!("building connection pool for {:?}", config.kind);
                let manager = ConnectionManager::<AnyConnection>::new(url);
                let pool = Pool::builder()
                    .min_idle(Some(POOL_SIZE))
                    .max_size(POOL_SIZE + POOL_MAX_OVERFLOW)
                    .test_on_check_out(true)
                    .build(manager)
                    .map_err(|e| {
                        error!("failed to create database engine: {}", e);
                        ConnectionError(e.to_string())
                    })?;
                SessionFactory::Pooled(pool)
            }
        };

        let db = Database { sessions: Arc::new(sessions) };
        db.ensure_schema(config.kind)?;
        Ok(db)
    }

    pub fn sessions(&self) -> Arc<SessionFactory> {
        Arc::clone(&self.sessions)
    }

    /// Create the tables if they don't exist.
    fn ensure_schema(&self, kind: DatabaseKind) -> Result<(), ConnectionError> {
        for statement in schema_ddl(kind) {
            self.sessions.batch_execute(statement)?;
        }
        Ok(())
    }
}

/// Per-dialect DDL. The differences are the key/text column types and
/// the timestamp flavor; everything else is shared.
fn schema_ddl(kind: DatabaseKind) -> &'static [&'static str] {
    match kind {
        DatabaseKind::Sqlite => &[
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                deleted_at TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS histories (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                deleted_at TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY NOT NULL,
                history_id TEXT NOT NULL,
                question TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                deleted_at TIMESTAMP
            )",
        ],
        DatabaseKind::Postgresql => &[
            "CREATE TABLE IF NOT EXISTS chats (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                deleted_at TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS histories (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                chat_id VARCHAR(36) NOT NULL,
                created_at TIMESTAMP NOT NULL,
                deleted_at TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS interactions (
                id VARCHAR(36) PRIMARY KEY,
                history_id VARCHAR(36) NOT NULL,
                question TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                deleted_at TIMESTAMP
            )",
        ],
        DatabaseKind::Mysql => &[
            "CREATE TABLE IF NOT EXISTS chats (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                deleted_at DATETIME(6)
            )",
            "CREATE TABLE IF NOT EXISTS histories (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                chat_id VARCHAR(36) NOT NULL,
                created_at DATETIME(6) NOT NULL,
                deleted_at DATETIME(6)
            )",
            "CREATE TABLE IF NOT EXISTS interactions (
                id VARCHAR(36) PRIMARY KEY,
                history_id VARCHAR(36) NOT NULL,
                question TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at DATETIME(6) NOT NULL,
                deleted_at DATETIME(6)
            )",
        ],
    }
}
