use async_trait::async_trait;
use openid_core::{
    salt_prefix, select_association, system_clock, Association, AssociationRecord, NonceWindow,
    SharedClock, StoreError, DEFAULT_NONCE_SKEW_SECS,
};
use openid_ports::OpenIdStore;
use sqlx::{Pool, Postgres, Sqlite};
use std::borrow::Cow;
use std::path::PathBuf;

#[derive(Clone, Debug)]
enum DatabasePool {
    Sqlite(Pool<Sqlite>),
    Postgres(Pool<Postgres>),
}

/// SQL-backed association and nonce store (SQLite/Postgres) using SQLx.
pub struct SqlxStore {
    pool: DatabasePool,
    clock: SharedClock,
    nonce_skew: i64,
}

impl SqlxStore {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = if database_url.starts_with("postgres") {
            DatabasePool::Postgres(Pool::<Postgres>::connect(database_url).await?)
        } else {
            // Best-effort: if we can't create it (permissions, etc.), sqlx will surface the
            // underlying error on connect.
            if let Some(path) = sqlite_db_path(database_url) {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                }

                if !path.as_os_str().is_empty() && !path.exists() {
                    let _ = std::fs::File::create(&path);
                }
            }

            let connect_url = sqlite_url_with_create_mode(database_url);
            DatabasePool::Sqlite(Pool::<Sqlite>::connect(connect_url.as_ref()).await?)
        };

        Ok(Self {
            pool,
            clock: system_clock(),
            nonce_skew: DEFAULT_NONCE_SKEW_SECS,
        })
    }

    /// Read "now" from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Accept nonce timestamps within `skew` seconds of now.
    pub fn with_nonce_skew(mut self, skew: i64) -> Self {
        self.nonce_skew = skew;
        self
    }

    pub fn nonce_skew(&self) -> i64 {
        self.nonce_skew
    }

    async fn init_sqlx(&self) -> Result<(), sqlx::Error> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                self.bootstrap_sqlite_schema(pool).await?;
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::Postgres(pool) => {
                // Postgres schema is expected to be created by Flyway migrations.
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }

        Ok(())
    }

    async fn bootstrap_sqlite_schema(&self, pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
        // Associations
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS openid_associations (
                server_url TEXT NOT NULL,
                handle TEXT NOT NULL,
                secret TEXT NOT NULL,
                issued INTEGER NOT NULL,
                lifetime INTEGER NOT NULL,
                assoc_type TEXT NOT NULL,
                PRIMARY KEY (server_url, handle)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_openid_associations_expiry ON openid_associations(issued, lifetime);"#,
        )
        .execute(pool)
        .await?;

        // Nonces
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS openid_nonces (
                server_url TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                salt TEXT NOT NULL,
                PRIMARY KEY (server_url, timestamp, salt)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_openid_nonces_timestamp ON openid_nonces(timestamp);"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn fetch_associations(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> Result<Vec<AssociationRecord>, sqlx::Error> {
        let records = match (&self.pool, handle) {
            (DatabasePool::Sqlite(pool), Some(handle)) => {
                sqlx::query_as::<_, AssociationRecord>(
                    "SELECT * FROM openid_associations WHERE server_url = ? AND handle = ?",
                )
                .bind(server_url)
                .bind(handle)
                .fetch_all(pool)
                .await?
            }
            (DatabasePool::Sqlite(pool), None) => {
                sqlx::query_as::<_, AssociationRecord>(
                    "SELECT * FROM openid_associations WHERE server_url = ?",
                )
                .bind(server_url)
                .fetch_all(pool)
                .await?
            }
            (DatabasePool::Postgres(pool), Some(handle)) => {
                sqlx::query_as::<_, AssociationRecord>(
                    "SELECT * FROM openid_associations WHERE server_url = $1 AND handle = $2",
                )
                .bind(server_url)
                .bind(handle)
                .fetch_all(pool)
                .await?
            }
            (DatabasePool::Postgres(pool), None) => {
                sqlx::query_as::<_, AssociationRecord>(
                    "SELECT * FROM openid_associations WHERE server_url = $1",
                )
                .bind(server_url)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(records)
    }

    /// Delete exactly the expired row that was read, so a row replaced in the
    /// meantime by a fresh upsert survives.
    async fn delete_expired(&self, record: &AssociationRecord) -> Result<(), sqlx::Error> {
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "DELETE FROM openid_associations WHERE server_url = ? AND handle = ? AND issued = ? AND lifetime = ?",
                )
                .bind(&record.server_url)
                .bind(&record.handle)
                .bind(record.issued)
                .bind(record.lifetime)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    "DELETE FROM openid_associations WHERE server_url = $1 AND handle = $2 AND issued = $3 AND lifetime = $4",
                )
                .bind(&record.server_url)
                .bind(&record.handle)
                .bind(record.issued)
                .bind(record.lifetime)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl OpenIdStore for SqlxStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.init_sqlx().await.map_err(Into::into)
    }

    async fn healthcheck(&self) -> Result<(), StoreError> {
        // Keep readiness/liveness cheap: don't run bootstrap or migrations.
        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }

        Ok(())
    }

    async fn store_association(
        &self,
        server_url: &str,
        association: &Association,
    ) -> Result<(), StoreError> {
        let record = AssociationRecord::new(server_url, association);

        match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO openid_associations (server_url, handle, secret, issued, lifetime, assoc_type)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT (server_url, handle) DO UPDATE SET
                        secret = excluded.secret,
                        issued = excluded.issued,
                        lifetime = excluded.lifetime,
                        assoc_type = excluded.assoc_type
                    "#,
                )
                .bind(&record.server_url)
                .bind(&record.handle)
                .bind(&record.secret)
                .bind(record.issued)
                .bind(record.lifetime)
                .bind(&record.assoc_type)
                .execute(pool)
                .await?;
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO openid_associations (server_url, handle, secret, issued, lifetime, assoc_type)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (server_url, handle) DO UPDATE SET
                        secret = EXCLUDED.secret,
                        issued = EXCLUDED.issued,
                        lifetime = EXCLUDED.lifetime,
                        assoc_type = EXCLUDED.assoc_type
                    "#,
                )
                .bind(&record.server_url)
                .bind(&record.handle)
                .bind(&record.secret)
                .bind(record.issued)
                .bind(record.lifetime)
                .bind(&record.assoc_type)
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> Result<Option<Association>, StoreError> {
        let records = self.fetch_associations(server_url, handle).await?;
        let lookup = select_association(records, self.clock.now())?;

        for record in &lookup.expired {
            self.delete_expired(record).await?;
        }
        if !lookup.expired.is_empty() {
            tracing::debug!(
                server_url,
                purged = lookup.expired.len(),
                "purged expired associations on lookup"
            );
        }

        Ok(lookup.found)
    }

    async fn remove_association(
        &self,
        server_url: &str,
        handle: &str,
    ) -> Result<bool, StoreError> {
        let result = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM openid_associations WHERE server_url = ? AND handle = ?")
                    .bind(server_url)
                    .bind(handle)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    "DELETE FROM openid_associations WHERE server_url = $1 AND handle = $2",
                )
                .bind(server_url)
                .bind(handle)
                .execute(pool)
                .await?
                .rows_affected()
            }
        };

        Ok(result > 0)
    }

    async fn use_nonce(
        &self,
        server_url: &str,
        timestamp: i64,
        salt: &str,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        if !NonceWindow::around(now, self.nonce_skew).contains(timestamp) {
            tracing::debug!(
                server_url,
                timestamp,
                now,
                skew = self.nonce_skew,
                "nonce timestamp outside skew window"
            );
            return Ok(false);
        }

        // Single conditional insert; the primary key decides first use.
        let inserted = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO openid_nonces (server_url, timestamp, salt) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(server_url)
                .bind(timestamp)
                .bind(salt)
                .execute(pool)
                .await?
                .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO openid_nonces (server_url, timestamp, salt) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                )
                .bind(server_url)
                .bind(timestamp)
                .bind(salt)
                .execute(pool)
                .await?
                .rows_affected()
            }
        };

        if inserted == 0 {
            tracing::debug!(
                server_url,
                timestamp,
                salt_prefix = %salt_prefix(salt),
                "nonce already used"
            );
        }

        Ok(inserted > 0)
    }

    async fn cleanup_nonces(&self) -> Result<u64, StoreError> {
        let window = NonceWindow::around(self.clock.now(), self.nonce_skew);

        let deleted = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM openid_nonces WHERE timestamp < ? OR timestamp > ?")
                    .bind(window.earliest)
                    .bind(window.latest)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("DELETE FROM openid_nonces WHERE timestamp < $1 OR timestamp > $2")
                    .bind(window.earliest)
                    .bind(window.latest)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        Ok(deleted)
    }

    async fn cleanup_associations(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();

        let deleted = match &self.pool {
            DatabasePool::Sqlite(pool) => {
                sqlx::query("DELETE FROM openid_associations WHERE issued + lifetime < ?")
                    .bind(now)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query("DELETE FROM openid_associations WHERE issued + lifetime < $1")
                    .bind(now)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };

        Ok(deleted)
    }
}

fn sqlite_db_path(database_url: &str) -> Option<PathBuf> {
    if !database_url.starts_with("sqlite:") {
        return None;
    }
    if database_url.starts_with("sqlite::memory:") {
        return None;
    }

    let mut rest = &database_url["sqlite:".len()..];

    // Reduce URL-ish leading slashes to a single filesystem root.
    if rest.starts_with("///") {
        rest = &rest[2..];
    } else if rest.starts_with("//") {
        rest = &rest[1..];
    }

    // Drop any query string.
    let path_part = rest.split('?').next().unwrap_or(rest);
    if path_part.is_empty() {
        return None;
    }

    Some(PathBuf::from(path_part))
}

fn sqlite_url_with_create_mode(database_url: &str) -> Cow<'_, str> {
    if !database_url.starts_with("sqlite:") {
        return Cow::Borrowed(database_url);
    }
    if database_url.starts_with("sqlite::memory:") {
        return Cow::Borrowed(database_url);
    }
    if database_url.contains("mode=") {
        return Cow::Borrowed(database_url);
    }

    let sep = if database_url.contains('?') { '&' } else { '?' };
    Cow::Owned(format!("{database_url}{sep}mode=rwc"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openid_core::FixedClock;
    use std::sync::Arc;

    async fn temp_store(
        clock: Arc<FixedClock>,
    ) -> Result<(tempfile::TempDir, SqlxStore), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}", dir.path().join("openid.db").display());
        let store = SqlxStore::new(&url).await?.with_clock(clock);
        store.init().await?;
        Ok((dir, store))
    }

    #[test]
    fn sqlite_path_is_extracted_from_url_forms() {
        assert_eq!(
            sqlite_db_path("sqlite:openid.db?mode=rwc"),
            Some(PathBuf::from("openid.db"))
        );
        assert_eq!(
            sqlite_db_path("sqlite:///var/lib/openid/openid.db"),
            Some(PathBuf::from("/var/lib/openid/openid.db"))
        );
        assert_eq!(
            sqlite_db_path("sqlite://tmp/x.db"),
            Some(PathBuf::from("/tmp/x.db"))
        );
        assert_eq!(sqlite_db_path("sqlite::memory:"), None);
        assert_eq!(sqlite_db_path("postgres://localhost/openid"), None);
    }

    #[test]
    fn create_mode_is_appended_once() {
        assert_eq!(
            sqlite_url_with_create_mode("sqlite:openid.db"),
            "sqlite:openid.db?mode=rwc"
        );
        assert_eq!(
            sqlite_url_with_create_mode("sqlite:openid.db?cache=shared"),
            "sqlite:openid.db?cache=shared&mode=rwc"
        );
        assert_eq!(
            sqlite_url_with_create_mode("sqlite:openid.db?mode=ro"),
            "sqlite:openid.db?mode=ro"
        );
        assert_eq!(
            sqlite_url_with_create_mode("postgres://localhost/openid"),
            "postgres://localhost/openid"
        );
    }

    #[tokio::test]
    async fn store_association_upserts_on_handle() -> Result<(), Box<dyn std::error::Error>> {
        let clock = Arc::new(FixedClock::new(1_000));
        let (_dir, store) = temp_store(clock).await?;

        let first = Association::new("h1", b"one".to_vec(), 900, 3_600, "HMAC-SHA1");
        let second = Association::new("h1", b"two".to_vec(), 950, 3_600, "HMAC-SHA256");
        store.store_association("https://idp.example", &first).await?;
        store.store_association("https://idp.example", &second).await?;

        let found = store
            .get_association("https://idp.example", Some("h1"))
            .await?
            .ok_or("association should exist")?;
        assert_eq!(found, second);

        assert!(store.remove_association("https://idp.example", "h1").await?);
        assert!(!store.remove_association("https://idp.example", "h1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn custom_skew_narrows_nonce_window() -> Result<(), Box<dyn std::error::Error>> {
        let clock = Arc::new(FixedClock::new(100_000));
        let (_dir, store) = temp_store(clock).await?;
        let store = store.with_nonce_skew(60);

        assert_eq!(store.nonce_skew(), 60);
        assert!(!store.use_nonce("https://idp.example", 99_900, "a").await?);
        assert!(store.use_nonce("https://idp.example", 99_940, "a").await?);
        assert!(!store.use_nonce("https://idp.example", 99_940, "a").await?);
        Ok(())
    }
}
