//! PostgreSQL import store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{ImportClaim, ImportSession, ImportStore, StoreError};
use crate::ingest::models::{NewRecord, NewStatistic, NewWorkout};

#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn begin(&self) -> Result<Box<dyn ImportSession>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgImportSession { tx }))
    }
}

pub struct PgImportSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ImportSession for PgImportSession {
    async fn claim(&mut self, claim: &ImportClaim) -> Result<bool, StoreError> {
        // Blocks on the unique index while another open transaction holds the key.
        let result = sqlx::query(
            r#"
            INSERT INTO import_claims (idempotency_key, bucket, object_key, user_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(claim.key.as_str())
        .bind(&claim.bucket)
        .bind(&claim.object_key)
        .bind(claim.user_id)
        .execute(&mut *self.tx)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!(key = %claim.key, claimed, "Claimed idempotency key");
        Ok(claimed)
    }

    async fn insert_record(&mut self, record: &NewRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO health_records (
                id, user_id, type, source_version, source_name, device_id,
                start_date, end_date, creation_date, unit, value
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id)
        .bind(&record.record_type)
        .bind(&record.source_version)
        .bind(&record.source_name)
        .bind(&record.device_id)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(record.creation_date)
        .bind(&record.unit)
        .bind(&record.value)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_workout(&mut self, workout: &NewWorkout) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO xml_workouts (
                id, user_id, type, duration, duration_unit, source_name,
                start_date, end_date, creation_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workout.user_id)
        .bind(&workout.workout_type)
        .bind(&workout.duration)
        .bind(&workout.duration_unit)
        .bind(&workout.source_name)
        .bind(workout.start_date)
        .bind(workout.end_date)
        .bind(workout.creation_date)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_statistic(&mut self, statistic: &NewStatistic) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workout_statistics (
                id, user_id, type, start_date, end_date, creation_date,
                sum, average, maximum, minimum, unit
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(statistic.user_id)
        .bind(&statistic.statistic_type)
        .bind(statistic.start_date)
        .bind(statistic.end_date)
        .bind(statistic.creation_date)
        .bind(&statistic.sum)
        .bind(&statistic.average)
        .bind(&statistic.maximum)
        .bind(&statistic.minimum)
        .bind(&statistic.unit)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
