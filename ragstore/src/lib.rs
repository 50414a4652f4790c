//! Postgres/pgvector document store for the Confluence indexer.
//!
//! Each document is embedded once per distinct `title + content` and upserted
//! into the `documents` table keyed by its wiki page id.

pub mod blocking;
pub mod embeddings;
pub mod error;

use confluence_rag_types::Document;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

pub use embeddings::{DEFAULT_EMBEDDING_MODEL, EMBEDDING_DIMENSIONS, Embedder};
pub use error::{StoreError, StoreResult};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub postgres_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub max_connections: u32,
}

impl RagConfig {
    pub fn new(postgres_url: impl Into<String>, openai_api_key: impl Into<String>) -> Self {
        Self {
            postgres_url: postgres_url.into(),
            openai_api_key: openai_api_key.into(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            max_connections: 2,
        }
    }
}

/// What `add_document` did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Updated,
    Unchanged,
}

pub struct Rag {
    pool: PgPool,
    embedder: Embedder,
}

impl Rag {
    pub async fn connect(config: RagConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.postgres_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("document store ready");

        let embedder = Embedder::new(
            &config.openai_base_url,
            &config.openai_api_key,
            &config.embedding_model,
        )?;

        Ok(Self { pool, embedder })
    }

    pub async fn add_document(&self, document: Document) -> StoreResult<AddOutcome> {
        let hash = content_hash(&document.title, &document.content);

        let existing: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM documents WHERE id = $1")
                .bind(&document.id)
                .fetch_optional(&self.pool)
                .await?;

        let outcome = outcome(existing.as_deref(), &hash);
        if outcome == AddOutcome::Unchanged {
            debug!(id = %document.id, "content unchanged, skipping embedding");
            return Ok(outcome);
        }

        let embedding = self
            .embedder
            .embed(&embeddings::embedding_input(&document.title, &document.content))
            .await?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, space, title, url, version, last_modified, content, content_hash, embedding, indexed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::real[]::vector, now())
            ON CONFLICT (id) DO UPDATE SET
                space = EXCLUDED.space,
                title = EXCLUDED.title,
                url = EXCLUDED.url,
                version = EXCLUDED.version,
                last_modified = EXCLUDED.last_modified,
                content = EXCLUDED.content,
                content_hash = EXCLUDED.content_hash,
                embedding = EXCLUDED.embedding,
                indexed_at = now()
            "#,
        )
        .bind(&document.id)
        .bind(&document.space)
        .bind(&document.title)
        .bind(&document.url)
        .bind(document.version)
        .bind(document.last_modified)
        .bind(&document.content)
        .bind(&hash)
        .bind(&embedding)
        .execute(&self.pool)
        .await?;

        Ok(outcome)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// What storing a document with `hash` does, given the hash already stored under its id.
fn outcome(existing: Option<&str>, hash: &str) -> AddOutcome {
    match existing {
        None => AddOutcome::Inserted,
        Some(stored) if stored == hash => AddOutcome::Unchanged,
        Some(_) => AddOutcome::Updated,
    }
}

pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_separates_title_from_content() {
        assert_ne!(content_hash("ab", "c"), content_hash("a", "bc"));
        assert_eq!(content_hash("t", "c"), content_hash("t", "c"));
        assert_eq!(content_hash("t", "c").len(), 64);
    }

    #[test]
    fn outcome_depends_on_stored_hash() {
        let hash = content_hash("Runbook", "Technical Documentation");
        let other = content_hash("Runbook", "Other");

        assert_eq!(outcome(None, &hash), AddOutcome::Inserted);
        assert_eq!(outcome(Some(&hash), &hash), AddOutcome::Unchanged);
        assert_eq!(outcome(Some(&other), &hash), AddOutcome::Updated);
    }

    #[test]
    fn config_defaults() {
        let config = RagConfig::new("postgres://localhost/rag", "sk-test");
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.max_connections, 2);
    }
}
