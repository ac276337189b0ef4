use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_create_metrics"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

// Portable across SQLite and PostgreSQL: exactly one of the value columns
// is non-null, matching `kind`.
const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    gauge_value DOUBLE PRECISION,
    counter_value BIGINT,
    CHECK (
        (kind = 'gauge' AND gauge_value IS NOT NULL AND counter_value IS NULL)
        OR (kind = 'counter' AND counter_value IS NOT NULL AND gauge_value IS NULL)
    )
);
";

const DOWN_SQL: &str = "DROP TABLE IF EXISTS metrics;";
