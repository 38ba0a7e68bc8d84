use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    options::{ClientOptions, IndexOptions, ReplaceOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};

use openid_core::{
    salt_prefix, select_association, system_clock, Association, AssociationRecord, NonceRecord,
    NonceWindow, SharedClock, StoreError, DEFAULT_NONCE_SKEW_SECS,
};
use openid_ports::OpenIdStore;

/// MongoDB-backed association and nonce store.
///
/// Notes:
/// - Uses the core records as documents via `serde`.
/// - Unique compound indexes stand in for the SQL primary keys, so nonce
///   consumption is a single insert that either lands or hits E11000.
pub struct MongoStore {
    db: Database,
    associations: Collection<AssociationRecord>,
    nonces: Collection<NonceRecord>,
    clock: SharedClock,
    nonce_skew: i64,
}

impl MongoStore {
    pub async fn new(uri: &str) -> Result<Self, StoreError> {
        let mut opts = ClientOptions::parse(uri)
            .await
            .map_err(Self::mongo_err_to_store)?;
        if opts.app_name.is_none() {
            opts.app_name = Some("openid-storage-mongo".to_string());
        }

        let client = MongoClient::with_options(opts).map_err(Self::mongo_err_to_store)?;

        // If URI doesn't specify a database, fall back to "openid".
        let db_name = client
            .default_database()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| "openid".to_string());

        let db = client.database(&db_name);

        let associations = db.collection::<AssociationRecord>("openid_associations");
        let nonces = db.collection::<NonceRecord>("openid_nonces");

        Ok(Self {
            db,
            associations,
            nonces,
            clock: system_clock(),
            nonce_skew: DEFAULT_NONCE_SKEW_SECS,
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_nonce_skew(mut self, skew: i64) -> Self {
        self.nonce_skew = skew;
        self
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        // openid_associations (server_url, handle) unique
        self.associations
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "server_url": 1, "handle": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_store)?;

        // openid_nonces (server_url, timestamp, salt) unique
        self.nonces
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "server_url": 1, "timestamp": 1, "salt": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_store)?;

        // openid_nonces.timestamp for sweeps
        self.nonces
            .create_index(
                IndexModel::builder().keys(doc! { "timestamp": 1 }).build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_store)?;

        Ok(())
    }

    fn duplicate_key_error(err: &mongodb::error::Error) -> bool {
        // Canonical server-side message includes "E11000".
        err.to_string().contains("E11000")
    }

    fn mongo_err_to_store(err: mongodb::error::Error) -> StoreError {
        StoreError::storage(&err.to_string())
    }
}

#[async_trait]
impl OpenIdStore for MongoStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(Self::mongo_err_to_store)?;
        self.ensure_indexes().await
    }

    async fn store_association(
        &self,
        server_url: &str,
        association: &Association,
    ) -> Result<(), StoreError> {
        let record = AssociationRecord::new(server_url, association);
        self.associations
            .replace_one(
                doc! { "server_url": record.server_url.as_str(), "handle": record.handle.as_str() },
                &record,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_store)
    }

    async fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> Result<Option<Association>, StoreError> {
        let filter = match handle {
            Some(handle) => doc! { "server_url": server_url, "handle": handle },
            None => doc! { "server_url": server_url },
        };

        let records: Vec<AssociationRecord> = self
            .associations
            .find(filter, None)
            .await
            .map_err(Self::mongo_err_to_store)?
            .try_collect()
            .await
            .map_err(Self::mongo_err_to_store)?;

        let lookup = select_association(records, self.clock.now())?;

        for record in &lookup.expired {
            self.associations
                .delete_one(
                    doc! {
                        "server_url": record.server_url.as_str(),
                        "handle": record.handle.as_str(),
                        "issued": record.issued,
                        "lifetime": record.lifetime,
                    },
                    None,
                )
                .await
                .map_err(Self::mongo_err_to_store)?;
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
        self.associations
            .delete_many(doc! { "server_url": server_url, "handle": handle }, None)
            .await
            .map(|result| result.deleted_count > 0)
            .map_err(Self::mongo_err_to_store)
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

        let record = NonceRecord::new(server_url, timestamp, salt);
        match self.nonces.insert_one(&record, None).await {
            Ok(_) => Ok(true),
            Err(err) if Self::duplicate_key_error(&err) => {
                tracing::debug!(
                    server_url,
                    timestamp,
                    salt_prefix = %salt_prefix(salt),
                    "nonce already used"
                );
                Ok(false)
            }
            Err(err) => Err(Self::mongo_err_to_store(err)),
        }
    }

    async fn cleanup_nonces(&self) -> Result<u64, StoreError> {
        let window = NonceWindow::around(self.clock.now(), self.nonce_skew);
        self.nonces
            .delete_many(
                doc! { "$or": [
                    { "timestamp": { "$lt": window.earliest } },
                    { "timestamp": { "$gt": window.latest } },
                ] },
                None,
            )
            .await
            .map(|result| result.deleted_count)
            .map_err(Self::mongo_err_to_store)
    }

    async fn cleanup_associations(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        self.associations
            .delete_many(
                doc! { "$expr": { "$lt": [ { "$add": ["$issued", "$lifetime"] }, now ] } },
                None,
            )
            .await
            .map(|result| result.deleted_count)
            .map_err(Self::mongo_err_to_store)
    }

    async fn healthcheck(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_store)
    }
}
