//! Postgres document store.
//!
//! Every collection lives in the `documents` table as JSONB. Uniqueness of
//! `Document::unique_key` is enforced by a partial unique index, and stock
//! decrements are single conditional `UPDATE`s inside a transaction that
//! also records the idempotency key. Dead-lettered line items record their
//! key with outcome `dead_lettered`.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::PgPool;

use crate::domain::aggregates::Product;
use crate::ports::store::{Document, DocumentStore, ProductStore, StockDecrement, StoreError};

pub struct PgDocumentStore<D> {
    pool: PgPool,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Document> PgDocumentStore<D> {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, _marker: PhantomData }
    }
}

fn store_error<D: Document>(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            let field = if db.constraint() == Some("documents_pkey") { "id" } else { D::UNIQUE_FIELD };
            StoreError::Duplicate(field.to_string())
        }
        _ => StoreError::Unavailable(e.to_string()),
    }
}

fn decode<D: Document>(body: serde_json::Value) -> Result<D, StoreError> {
    Ok(serde_json::from_value(body)?)
}

#[async_trait]
impl<D: Document> DocumentStore<D> for PgDocumentStore<D> {
    async fn insert(&self, doc: &D) -> Result<(), StoreError> {
        let body = serde_json::to_value(doc)?;
        sqlx::query("INSERT INTO documents (collection, id, unique_key, body) VALUES ($1, $2, $3, $4)")
            .bind(D::COLLECTION)
            .bind(doc.id())
            .bind(doc.unique_key())
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(store_error::<D>)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<D>, StoreError> {
        let body: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND id = $2")
                .bind(D::COLLECTION)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error::<D>)?;
        body.map(decode::<D>).transpose()
    }

    async fn find_by_unique(&self, key: &str) -> Result<Option<D>, StoreError> {
        let body: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND unique_key = $2")
                .bind(D::COLLECTION)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error::<D>)?;
        body.map(decode::<D>).transpose()
    }

    async fn list(&self) -> Result<Vec<D>, StoreError> {
        let bodies: Vec<serde_json::Value> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 ORDER BY seq")
                .bind(D::COLLECTION)
                .fetch_all(&self.pool)
                .await
                .map_err(store_error::<D>)?;
        bodies.into_iter().map(decode::<D>).collect()
    }

    async fn update(&self, doc: &D) -> Result<(), StoreError> {
        let body = serde_json::to_value(doc)?;
        let result = sqlx::query(
            "UPDATE documents SET body = $3, unique_key = $4, updated_at = NOW() WHERE collection = $1 AND id = $2",
        )
        .bind(D::COLLECTION)
        .bind(doc.id())
        .bind(body)
        .bind(doc.unique_key())
        .execute(&self.pool)
        .await
        .map_err(store_error::<D>)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(D::COLLECTION)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error::<D>)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProductStore for PgDocumentStore<Product> {
    async fn decrement_stock(
        &self,
        id: &str,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<StockDecrement, StoreError> {
        let quantity = i64::from(quantity);
        let mut tx = self.pool.begin().await.map_err(store_error::<Product>)?;

        if let Some(key) = idempotency_key {
            let recorded = sqlx::query(
                "INSERT INTO stock_decrements (idempotency_key, product_id, quantity) VALUES ($1, $2, $3) \
                 ON CONFLICT (idempotency_key) DO NOTHING",
            )
            .bind(key)
            .bind(id)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(store_error::<Product>)?
            .rows_affected();

            if recorded == 0 {
                tx.rollback().await.map_err(store_error::<Product>)?;
                return Ok(StockDecrement::AlreadySettled);
            }
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let updated: Option<serde_json::Value> = sqlx::query_scalar(
            "UPDATE documents \
             SET body = jsonb_set(jsonb_set(body, '{stock}', to_jsonb((body->>'stock')::bigint - $3)), \
                                  '{updated_at}', to_jsonb($4::text)), \
                 updated_at = NOW() \
             WHERE collection = $1 AND id = $2 AND (body->>'stock')::bigint >= $3 \
             RETURNING body",
        )
        .bind(Product::COLLECTION)
        .bind(id)
        .bind(quantity)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error::<Product>)?;

        if let Some(body) = updated {
            tx.commit().await.map_err(store_error::<Product>)?;
            return Ok(StockDecrement::Applied(decode(body)?));
        }

        // Nothing matched: tell a missing product from a short one. The
        // rollback also forgets the idempotency key.
        let stock: Option<i64> = sqlx::query_scalar(
            "SELECT (body->>'stock')::bigint FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(Product::COLLECTION)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error::<Product>)?;
        tx.rollback().await.map_err(store_error::<Product>)?;

        Ok(match stock {
            Some(available) => StockDecrement::Insufficient { available: u32::try_from(available).unwrap_or(0) },
            None => StockDecrement::NotFound,
        })
    }

    async fn settle_key(&self, idempotency_key: &str, product_id: &str, quantity: u32) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stock_decrements (idempotency_key, product_id, quantity, outcome) \
             VALUES ($1, $2, $3, 'dead_lettered') \
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(idempotency_key)
        .bind(product_id)
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await
        .map_err(store_error::<Product>)?;
        Ok(())
    }

    async fn prune_settled_keys(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM stock_decrements WHERE settled_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(store_error::<Product>)?;
        Ok(result.rows_affected())
    }

    async fn search(&self, query: &str, category_id: Option<&str>) -> Result<Vec<Product>, StoreError> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT body FROM documents \
             WHERE collection = $1 \
               AND (body->>'name' ILIKE $2 OR body->>'description' ILIKE $2) \
               AND ($3::text IS NULL OR body->'category'->>'id' = $3) \
             ORDER BY seq",
        )
        .bind(Product::COLLECTION)
        .bind(pattern)
        .bind(category_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error::<Product>)?;
        bodies.into_iter().map(decode::<Product>).collect()
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
