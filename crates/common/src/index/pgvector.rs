//! pgvector-backed [`VectorIndex`]
//!
//! Vector operations go through raw SQL statements because SeaORM has no
//! native vector type. Upserts use `ON CONFLICT (id) DO UPDATE` so delivery
//! order across workers does not matter.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::Result;

use super::{embedding_literal, ChunkPoint, SearchFilter, SearchHit, VectorIndex};

/// Vector index stored in the `chunks` table (pgvector column)
#[derive(Clone)]
pub struct PgVectorIndex {
    pool: DbPool,
    embedding_model: String,
}

impl PgVectorIndex {
    pub fn new(pool: DbPool, embedding_model: String) -> Self {
        Self {
            pool,
            embedding_model,
        }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<()> {
        for point in points {
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO chunks (
                    id, item_id, source_id, ordinal, text, token_count,
                    start_secs, end_secs, section, metadata, embedding,
                    embedding_model, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::jsonb, $11::vector, $12, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    text = EXCLUDED.text,
                    token_count = EXCLUDED.token_count,
                    start_secs = EXCLUDED.start_secs,
                    end_secs = EXCLUDED.end_secs,
                    section = EXCLUDED.section,
                    metadata = EXCLUDED.metadata,
                    embedding = EXCLUDED.embedding,
                    embedding_model = EXCLUDED.embedding_model
                "#,
                vec![
                    point.id.into(),
                    point.item_id.into(),
                    point.source_id.into(),
                    point.ordinal.into(),
                    point.text.into(),
                    point.token_count.into(),
                    point.start_secs.into(),
                    point.end_secs.into(),
                    point.section.into(),
                    point.metadata.to_string().into(),
                    embedding_literal(&point.embedding).into(),
                    self.embedding_model.clone().into(),
                ],
            );

            self.pool.write().execute(stmt).await?;
        }

        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let embedding_str = embedding_literal(query);

        let mut sql = String::from(
            r#"
            SELECT
                id, item_id, source_id, ordinal, text, token_count, section,
                metadata::text,
                1 - (embedding <=> $1::vector) as score
            FROM chunks
            WHERE embedding IS NOT NULL
            "#,
        );

        let mut values: Vec<sea_orm::Value> = vec![embedding_str.into()];

        if let Some(source_id) = filter.source_id {
            values.push(source_id.into());
            sql.push_str(&format!(" AND source_id = ${}", values.len()));
        }
        if let Some(item_id) = filter.item_id {
            values.push(item_id.into());
            sql.push_str(&format!(" AND item_id = ${}", values.len()));
        }
        for (key, value) in &filter.metadata {
            let probe = serde_json::json!({ key: value });
            values.push(probe.to_string().into());
            sql.push_str(&format!(" AND metadata @> ${}::jsonb", values.len()));
        }

        values.push((k as i64).into());
        sql.push_str(&format!(
            " ORDER BY embedding <=> $1::vector LIMIT ${}",
            values.len()
        ));

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);

        let hits = self
            .pool
            .read()
            .query_all(stmt)
            .await?
            .into_iter()
            .filter_map(|row| {
                let metadata: String = row.try_get_by_index(7).ok()?;
                Some(SearchHit {
                    chunk_id: row.try_get_by_index::<Uuid>(0).ok()?,
                    item_id: row.try_get_by_index::<Uuid>(1).ok()?,
                    source_id: row.try_get_by_index::<Uuid>(2).ok()?,
                    ordinal: row.try_get_by_index::<i32>(3).ok()?,
                    text: row.try_get_by_index::<String>(4).ok()?,
                    token_count: row.try_get_by_index::<i32>(5).ok()?,
                    section: row.try_get_by_index::<Option<String>>(6).ok()?,
                    metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                    score: row.try_get_by_index::<f64>(8).ok()? as f32,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn delete_by_item(&self, item_id: Uuid) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "DELETE FROM chunks WHERE item_id = $1",
            vec![item_id.into()],
        );
        self.pool.write().execute(stmt).await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let stmt = Statement::from_string(DbBackend::Postgres, "SELECT COUNT(*) FROM chunks");
        let row = self.pool.read().query_one(stmt).await?;
        let count: i64 = match row {
            Some(row) => row
                .try_get_by_index::<i64>(0)
                .map_err(sea_orm::DbErr::from)?,
            None => 0,
        };
        Ok(count as u64)
    }
}
