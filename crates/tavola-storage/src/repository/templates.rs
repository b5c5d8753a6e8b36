//! Email template repository

use crate::db::DatabasePool;
use crate::models::EmailTemplate;
use async_trait::async_trait;
use tavola_common::{Error, Result};

/// Template store trait
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Active template for `template_key`, if any
    async fn get_active(&self, template_key: &str) -> Result<Option<EmailTemplate>>;
}

/// Database template repository
pub struct DbTemplateRepository {
    pool: DatabasePool,
}

impl DbTemplateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for DbTemplateRepository {
    async fn get_active(&self, template_key: &str) -> Result<Option<EmailTemplate>> {
        sqlx::query_as::<_, EmailTemplate>(
            "SELECT * FROM email_templates WHERE template_key = $1 AND is_active = true",
        )
        .bind(template_key)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
