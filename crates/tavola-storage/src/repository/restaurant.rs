//! Restaurant locale and branding repository

use crate::db::DatabasePool;
use crate::models::RestaurantSettings;
use async_trait::async_trait;
use tavola_common::{Error, Result};

/// Locale/branding store trait (read-only for the delivery core)
#[async_trait]
pub trait RestaurantRepository: Send + Sync {
    async fn get(&self) -> Result<Option<RestaurantSettings>>;
}

/// Database restaurant settings repository
pub struct DbRestaurantRepository {
    pool: DatabasePool,
}

impl DbRestaurantRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RestaurantRepository for DbRestaurantRepository {
    async fn get(&self) -> Result<Option<RestaurantSettings>> {
        sqlx::query_as::<_, RestaurantSettings>(
            "SELECT * FROM restaurant_settings ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
