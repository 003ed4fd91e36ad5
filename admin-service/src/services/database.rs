//! MongoDB store for the admin service.
//!
//! Every operation carries a per-call timeout so a stalled store surfaces
//! as `UpstreamUnavailable` instead of hanging the request; callers decide
//! whether that fails closed (the authentication gate) or degrades (the
//! anomaly detector).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::doc,
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use std::future::Future;
use std::time::Duration;

use crate::models::{ActivityAction, ActivityRecord, Role, User};
use crate::services::error::ServiceError;
use crate::services::store::{ActivityStore, CredentialStore};

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
    op_timeout: Duration,
}

impl MongoDb {
    pub async fn connect(
        uri: &str,
        database: &str,
        op_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            ServiceError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self {
            client,
            db,
            op_timeout,
        })
    }

    pub async fn initialize_indexes(&self) -> Result<(), ServiceError> {
        tracing::info!("Creating MongoDB indexes for admin-service");

        let unique = |name: &str| {
            IndexOptions::builder()
                .name(name.to_string())
                .unique(true)
                .build()
        };

        let users = self.users();
        users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "username": 1 })
                    .options(unique("username_unique"))
                    .build(),
                None,
            )
            .await?;
        users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique("email_unique"))
                    .build(),
                None,
            )
            .await?;

        self.roles()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(unique("role_name_unique"))
                    .build(),
                None,
            )
            .await?;

        // Activity queries are always (user, action) bounded by time.
        let activity = self.activity_logs();
        activity
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "action": 1, "timestamp": -1 })
                    .options(
                        IndexOptions::builder()
                            .name("user_action_time".to_string())
                            .build(),
                    )
                    .build(),
                None,
            )
            .await?;
        activity
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "timestamp": -1 })
                    .options(IndexOptions::builder().name("time".to_string()).build())
                    .build(),
                None,
            )
            .await?;

        tracing::info!("MongoDB indexes ready");
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                ServiceError::from(e)
            })?;
        Ok(())
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub fn roles(&self) -> Collection<Role> {
        self.db.collection("roles")
    }

    pub fn activity_logs(&self) -> Collection<ActivityRecord> {
        self.db.collection("activity_logs")
    }

    /// Run a store operation under the configured timeout.
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, mongodb::error::Error>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::UpstreamUnavailable(format!(
                "{} timed out after {:?}",
                op, self.op_timeout
            ))),
        }
    }
}

#[async_trait]
impl CredentialStore for MongoDb {
    async fn health_check(&self) -> Result<(), ServiceError> {
        self.ping().await
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError> {
        self.timed(
            "find_user_by_id",
            self.users().find_one(doc! { "_id": user_id }, None),
        )
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        self.timed(
            "find_user_by_email",
            self.users().find_one(doc! { "email": email }, None),
        )
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ServiceError> {
        self.timed(
            "find_user_by_username",
            self.users().find_one(doc! { "username": username }, None),
        )
        .await
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        self.timed("insert_user", async {
            self.users().insert_one(user, None).await.map(|_| ())
        })
        .await
    }

    async fn find_role_by_id(&self, role_id: &str) -> Result<Option<Role>, ServiceError> {
        self.timed(
            "find_role_by_id",
            self.roles().find_one(doc! { "_id": role_id }, None),
        )
        .await
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, ServiceError> {
        self.timed(
            "find_role_by_name",
            self.roles().find_one(doc! { "name": name }, None),
        )
        .await
    }

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        self.timed("insert_role", async {
            self.roles().insert_one(role, None).await.map(|_| ())
        })
        .await
    }

    async fn set_two_factor_secret(
        &self,
        user_id: &str,
        secret: &str,
    ) -> Result<(), ServiceError> {
        self.timed("set_two_factor_secret", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$set": { "two_factor_secret": secret } },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn enable_two_factor(
        &self,
        user_id: &str,
        recovery_codes: &[String],
    ) -> Result<(), ServiceError> {
        self.timed("enable_two_factor", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$set": {
                        "two_factor_enabled": true,
                        "recovery_codes": recovery_codes,
                    } },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn disable_two_factor(&self, user_id: &str) -> Result<(), ServiceError> {
        self.timed("disable_two_factor", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! {
                        "$set": { "two_factor_enabled": false, "recovery_codes": [] },
                        "$unset": { "two_factor_secret": "" },
                    },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn consume_recovery_code(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<bool, ServiceError> {
        // Atomic pull: two racing requests with the same code produce
        // exactly one modified document between them.
        self.timed("consume_recovery_code", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$pull": { "recovery_codes": code } },
                    None,
                )
                .await
                .map(|result| result.modified_count == 1)
        })
        .await
    }

    async fn add_whitelisted_ip(&self, user_id: &str, ip: &str) -> Result<(), ServiceError> {
        self.timed("add_whitelisted_ip", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$addToSet": { "whitelisted_ips": ip } },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn remove_whitelisted_ip(&self, user_id: &str, ip: &str) -> Result<(), ServiceError> {
        self.timed("remove_whitelisted_ip", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$pull": { "whitelisted_ips": ip } },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn clear_whitelisted_ips(&self, user_id: &str) -> Result<(), ServiceError> {
        self.timed("clear_whitelisted_ips", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$set": { "whitelisted_ips": [] } },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn set_password_reset_token(
        &self,
        user_id: &str,
        token_digest: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.timed("set_password_reset_token", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! { "$set": {
                        "password_reset_token": token_digest,
                        "password_reset_expires": mongodb::bson::DateTime::from_chrono(expires),
                    } },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    async fn find_user_by_reset_token(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, ServiceError> {
        // Expired digests fall out of the filter, so "expired" and "never
        // existed" are indistinguishable here by construction.
        self.timed(
            "find_user_by_reset_token",
            self.users().find_one(
                doc! {
                    "password_reset_token": token_digest,
                    "password_reset_expires": { "$gt": mongodb::bson::DateTime::from_chrono(now) },
                },
                None,
            ),
        )
        .await
    }

    async fn reset_password(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<(), ServiceError> {
        self.timed("reset_password", async {
            self.users()
                .update_one(
                    doc! { "_id": user_id },
                    doc! {
                        "$set": { "password_hash": password_hash },
                        "$unset": { "password_reset_token": "", "password_reset_expires": "" },
                    },
                    None,
                )
                .await
                .map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl ActivityStore for MongoDb {
    async fn insert(&self, record: &ActivityRecord) -> Result<(), ServiceError> {
        self.timed("insert_activity", async {
            self.activity_logs().insert_one(record, None).await.map(|_| ())
        })
        .await
    }

    async fn count_since(
        &self,
        user_id: &str,
        action: ActivityAction,
        since: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        self.timed(
            "count_activity_since",
            self.activity_logs().count_documents(
                doc! {
                    "user_id": user_id,
                    "action": action.as_str(),
                    "timestamp": { "$gte": mongodb::bson::DateTime::from_chrono(since) },
                },
                None,
            ),
        )
        .await
    }

    async fn recent_by_action(
        &self,
        user_id: &str,
        action: ActivityAction,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, ServiceError> {
        self.timed("recent_activity_by_action", async {
            let options = FindOptions::builder()
                .sort(doc! { "timestamp": -1 })
                .limit(limit)
                .build();
            let cursor = self
                .activity_logs()
                .find(
                    doc! {
                        "user_id": user_id,
                        "action": action.as_str(),
                        "timestamp": { "$gte": mongodb::bson::DateTime::from_chrono(since) },
                    },
                    options,
                )
                .await?;
            cursor.try_collect().await
        })
        .await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ActivityRecord>, ServiceError> {
        self.timed("recent_activity", async {
            let options = FindOptions::builder()
                .sort(doc! { "timestamp": -1 })
                .limit(limit)
                .build();
            let cursor = self.activity_logs().find(doc! {}, options).await?;
            cursor.try_collect().await
        })
        .await
    }
}
