//! SQL directory backend
//!
//! Runs the configured authentication and search queries through a shared
//! sqlx `AnyPool`, so one build serves SQLite, PostgreSQL and MySQL.

mod row;

pub use row::Projection;

use crate::traits::{BackendError, DirectoryBackend, QueryResult};
use async_trait::async_trait;
use dirgate_core::config::DatabaseConfig;
use dirgate_core::{AttributeMapping, PROJECTION_PLACEHOLDER};
use futures::TryStreamExt;
use row::RowCollector;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct SqlBackend {
    pool: AnyPool,
    auth_query: String,
    search_query: String,
    projection: Projection,
    query_timeout: Duration,
    mapping: Arc<AttributeMapping>,
}

impl SqlBackend {
    /// Open the connection pool described by `config`
    pub async fn connect(
        config: &DatabaseConfig,
        mapping: Arc<AttributeMapping>,
    ) -> Result<Self, BackendError> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(config.query_timeout())
            .connect(&config.url)
            .await?;

        info!(driver = %config.driver, "Connected to directory database");

        Ok(Self::with_pool(pool, config, mapping))
    }

    /// Use an already opened pool
    pub fn with_pool(pool: AnyPool, config: &DatabaseConfig, mapping: Arc<AttributeMapping>) -> Self {
        let projection = if config.search_query.contains(PROJECTION_PLACEHOLDER) {
            Projection::Template
        } else {
            Projection::Aliased
        };

        Self {
            pool,
            auth_query: config.auth_query.clone(),
            search_query: config.search_query.clone(),
            projection,
            query_timeout: config.query_timeout(),
            mapping,
        }
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Search query with the projection applied
    fn render_search(&self, attributes: &[String]) -> String {
        match self.projection {
            Projection::Template => {
                let columns = attributes
                    .iter()
                    .map(|attr| self.mapping.token_for(attr))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.search_query.replacen(PROJECTION_PLACEHOLDER, &columns, 1)
            }
            Projection::Aliased => self.search_query.clone(),
        }
    }

    /// Check out a connection, waiting at most one query timeout
    async fn acquire(&self) -> Result<PoolConnection<Any>, BackendError> {
        match timeout(self.query_timeout, self.pool.acquire()).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(BackendError::Timeout(self.query_timeout)),
        }
    }
}

/// Take a connection whose query outlived the timeout out of the pool;
/// it may still be executing
fn discard(conn: PoolConnection<Any>) {
    drop(conn.detach());
}

async fn fetch_hash(
    conn: &mut PoolConnection<Any>,
    query: &str,
    username: &str,
) -> Result<String, BackendError> {
    let rows = sqlx::query(query)
        .bind(username)
        .fetch_all(&mut **conn)
        .await?;

    stored_hash(&rows)
}

async fn scan(
    conn: &mut PoolConnection<Any>,
    sql: &str,
    username: &str,
    collector: &mut RowCollector<'_>,
) -> Result<(), BackendError> {
    let mut rows = sqlx::query(sql).bind(username).fetch(&mut **conn);

    while let Some(row) = rows.try_next().await? {
        collector.add(&row)?;
    }

    Ok(())
}

fn stored_hash(rows: &[AnyRow]) -> Result<String, BackendError> {
    let row = match rows {
        [row] => row,
        [] => return Err(BackendError::Shape("no matching user".into())),
        _ => return Err(BackendError::Shape(format!("{} rows for one user", rows.len()))),
    };

    if row.len() != 1 {
        return Err(BackendError::Shape(format!(
            "expected a single hash column, got {}",
            row.len()
        )));
    }

    row.try_get::<Option<String>, _>(0)?
        .ok_or_else(|| BackendError::Shape("password hash is NULL".into()))
}

#[async_trait]
impl DirectoryBackend for SqlBackend {
    async fn authenticate(&self, username: &str) -> Option<String> {
        debug!(user = %username, "Fetching stored password hash");

        let mut conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(user = %username, error = %e, "No database connection for password lookup");
                return None;
            }
        };

        let outcome = timeout(
            self.query_timeout,
            fetch_hash(&mut conn, &self.auth_query, username),
        )
        .await;

        match outcome {
            Ok(Ok(hash)) => Some(hash),
            Ok(Err(e)) => {
                warn!(user = %username, error = %e, "Password lookup failed");
                None
            }
            Err(_) => {
                warn!(user = %username, timeout = ?self.query_timeout, "Password lookup timed out");
                discard(conn);
                None
            }
        }
    }

    async fn search(&self, username: &str, attributes: &[String]) -> Vec<QueryResult> {
        info!(user = %username, attributes = %attributes.join(", "), "Searching");

        let sql = self.render_search(attributes);
        let mut collector = RowCollector::new(self.mapping.rdn_attribute(), attributes, self.projection);

        let outcome = match self.acquire().await {
            Ok(mut conn) => {
                let scanned = timeout(
                    self.query_timeout,
                    scan(&mut conn, &sql, username, &mut collector),
                )
                .await;

                match scanned {
                    Ok(result) => result,
                    Err(_) => {
                        discard(conn);
                        Err(BackendError::Timeout(self.query_timeout))
                    }
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            warn!(
                user = %username,
                error = %e,
                collected = collector.len(),
                "Search aborted, returning partial results"
            );
        }

        collector.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSHA: &str = "{SSHA}RrAeHR4zMHdNUfvtEibV9yTbtmMY7nF/";

    const SCHEMA: &[&str] = &[
        "CREATE TABLE users (
            name TEXT PRIMARY KEY,
            password TEXT,
            email TEXT,
            last_name TEXT,
            uid_number INTEGER
        )",
        "CREATE TABLE memberships (user_name TEXT, group_name TEXT)",
    ];

    async fn pool() -> AnyPool {
        seeded_pool("sqlite::memory:").await
    }

    async fn seeded_pool(url: &str) -> AnyPool {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .unwrap();

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        sqlx::query("INSERT INTO users VALUES (?, ?, ?, ?, ?)")
            .bind("bob")
            .bind(SSHA)
            .bind("bob@example.com")
            .bind("Builder")
            .bind(1001i64)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (name, email, last_name, uid_number) VALUES ('alice', 'alice@example.com', 'Smith', 1002)")
            .execute(&pool)
            .await
            .unwrap();

        for group in ["admins", "staff", "admins"] {
            sqlx::query("INSERT INTO memberships VALUES ('bob', ?)")
                .bind(group)
                .execute(&pool)
                .await
                .unwrap();
        }

        pool
    }

    fn mapping() -> Arc<AttributeMapping> {
        Arc::new(AttributeMapping::new(
            "ou=People,dc=example,dc=com",
            "cn",
            vec![
                ("cn".to_string(), "u.name".to_string()),
                ("mail".to_string(), "u.email".to_string()),
                ("sn".to_string(), "u.last_name".to_string()),
                ("uidNumber".to_string(), "u.uid_number".to_string()),
                ("memberOf".to_string(), "m.group_name".to_string()),
                ("userPassword".to_string(), "u.password".to_string()),
            ],
        ))
    }

    async fn sql_backend(auth_query: &str, search_query: &str) -> SqlBackend {
        let config = DatabaseConfig {
            auth_query: auth_query.to_string(),
            search_query: search_query.to_string(),
            ..Default::default()
        };

        SqlBackend::with_pool(pool().await, &config, mapping())
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    const TEMPLATE_QUERY: &str = "SELECT %s FROM users u \
         LEFT JOIN memberships m ON m.user_name = u.name \
         WHERE u.name = ? ORDER BY m.rowid";

    #[tokio::test]
    async fn test_authenticate() {
        let backend = sql_backend("SELECT password FROM users WHERE name = ?", TEMPLATE_QUERY).await;

        assert_eq!(backend.authenticate("bob").await.as_deref(), Some(SSHA));
        assert_eq!(backend.authenticate("nobody").await, None);
        // NULL hash
        assert_eq!(backend.authenticate("alice").await, None);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_ambiguous_results() {
        let backend = sql_backend("SELECT password FROM users WHERE name <> ?", TEMPLATE_QUERY).await;
        assert_eq!(backend.authenticate("nobody").await, None);

        let backend = sql_backend("SELECT password, email FROM users WHERE name = ?", TEMPLATE_QUERY).await;
        assert_eq!(backend.authenticate("bob").await, None);

        let backend = sql_backend("SELECT password FROM missing WHERE name = ?", TEMPLATE_QUERY).await;
        assert_eq!(backend.authenticate("bob").await, None);
    }

    #[tokio::test]
    async fn test_search_template_projection() {
        let backend = sql_backend("SELECT password FROM users WHERE name = ?", TEMPLATE_QUERY).await;
        assert_eq!(backend.projection(), Projection::Template);

        let results = backend
            .search("bob", &strings(&["cn", "mail", "memberOf", "uidNumber"]))
            .await;

        assert_eq!(results.len(), 1);
        let entry = &results[0];
        assert_eq!(entry.get("cn").unwrap(), strings(&["bob"]).as_slice());
        assert_eq!(entry.get("mail").unwrap(), strings(&["bob@example.com"]).as_slice());
        assert_eq!(entry.get("memberOf").unwrap(), strings(&["admins", "staff"]).as_slice());
        assert_eq!(entry.get("uidNumber").unwrap(), strings(&["1001"]).as_slice());
        assert_eq!(entry.get("sn"), None);
    }

    #[tokio::test]
    async fn test_search_null_column_is_present_without_values() {
        let backend = sql_backend("SELECT password FROM users WHERE name = ?", TEMPLATE_QUERY).await;

        let results = backend.search("alice", &strings(&["cn", "userPassword"])).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].first("cn"), Some("alice"));
        assert_eq!(results[0].get("userPassword").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_search_aliased_projection() {
        let backend = sql_backend(
            "SELECT password FROM users WHERE name = ?",
            "SELECT email AS mail, last_name AS SN, password AS userPassword FROM users WHERE name = ?",
        )
        .await;
        assert_eq!(backend.projection(), Projection::Aliased);

        let results = backend.search("bob", &strings(&["cn", "mail", "sn"])).await;

        assert_eq!(results.len(), 1);
        let entry = &results[0];
        assert_eq!(entry.first("mail"), Some("bob@example.com"));
        assert_eq!(entry.first("sn"), Some("Builder"));
        assert_eq!(entry.get("cn"), None);
        assert_eq!(entry.get("userPassword"), None);
    }

    #[tokio::test]
    async fn test_search_groups_rows_per_entry() {
        let backend = sql_backend(
            "SELECT password FROM users WHERE name = ?",
            "SELECT %s FROM users u LEFT JOIN memberships m ON m.user_name = u.name \
             WHERE u.name <> ? ORDER BY u.name, m.rowid",
        )
        .await;

        let results = backend.search("nobody", &strings(&["cn", "memberOf"])).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].first("cn"), Some("alice"));
        assert_eq!(results[0].get("memberOf").unwrap().len(), 0);
        assert_eq!(results[1].first("cn"), Some("bob"));
        assert_eq!(
            results[1].get("memberOf").unwrap(),
            strings(&["admins", "staff"]).as_slice()
        );
    }

    #[tokio::test]
    async fn test_search_no_rows_and_failures_are_empty() {
        let backend = sql_backend("SELECT password FROM users WHERE name = ?", TEMPLATE_QUERY).await;
        assert!(backend.search("nobody", &strings(&["cn"])).await.is_empty());

        let backend = sql_backend(
            "SELECT password FROM users WHERE name = ?",
            "SELECT %s FROM missing WHERE name = ?",
        )
        .await;
        assert!(backend.search("bob", &strings(&["cn"])).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_keeps_rows_read_before_an_error() {
        // Rows come back in insertion order; abs() of the smallest integer
        // raises an overflow error on alice's row only
        let backend = sql_backend(
            "SELECT password FROM users WHERE name = ?",
            "SELECT name AS cn, \
             CASE WHEN name = 'alice' THEN abs(-9223372036854775807 + 16 - length(email)) ELSE 0 END AS uidNumber \
             FROM users WHERE name <> ?",
        )
        .await;

        let results = backend.search("nobody", &strings(&["cn", "uidNumber"])).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].first("cn"), Some("bob"));
        assert_eq!(results[0].first("uidNumber"), Some("0"));
    }

    /// Counts far enough that SQLite needs well over a second
    const SLOW_CTE: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 200000000) ";

    async fn slow_backend(dir: &tempfile::TempDir, auth_query: &str, search_query: &str) -> SqlBackend {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("users.db").display());
        let config = DatabaseConfig {
            auth_query: auth_query.to_string(),
            search_query: search_query.to_string(),
            query_timeout_secs: 1,
            ..Default::default()
        };

        SqlBackend::with_pool(seeded_pool(&url).await, &config, mapping())
    }

    #[tokio::test]
    async fn test_authenticate_timeout_releases_connection() {
        let dir = tempfile::tempdir().unwrap();
        let slow_auth = format!(
            "{}SELECT password FROM users WHERE name = ? AND (SELECT count(*) FROM c) > 0",
            SLOW_CTE
        );
        let backend = slow_backend(&dir, &slow_auth, TEMPLATE_QUERY).await;

        let started = std::time::Instant::now();
        assert_eq!(backend.authenticate("bob").await, None);
        assert!(started.elapsed() < Duration::from_secs(3));

        // The pool holds one connection; the timed-out one must not block this
        let results = backend.search("bob", &strings(&["cn", "mail"])).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].first("mail"), Some("bob@example.com"));
    }

    #[tokio::test]
    async fn test_search_timeout_keeps_rows_already_read() {
        let dir = tempfile::tempdir().unwrap();
        let slow_search = format!(
            "{}SELECT name AS cn FROM users WHERE name <> ? \
             UNION ALL SELECT count(*) FROM c",
            SLOW_CTE
        );
        let backend = slow_backend(&dir, "SELECT password FROM users WHERE name = ?", &slow_search).await;

        let started = std::time::Instant::now();
        let results = backend.search("nobody", &strings(&["cn"])).await;
        assert!(started.elapsed() < Duration::from_secs(3));

        let mut names: Vec<_> = results.iter().filter_map(|r| r.first("cn")).collect();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);

        assert_eq!(backend.authenticate("bob").await.as_deref(), Some(SSHA));
    }
}
