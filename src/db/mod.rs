//! Persistence layer: SQLite via sea-orm, schema created from the
//! entities on first start.

use std::path::Path;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

pub mod entities;
pub mod services;

pub async fn connect(path: &str) -> Result<DatabaseConnection, DbErr> {
    if let Some(dir) = Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .map_err(|e| DbErr::Custom(format!("failed to create database directory: {e}")))?;
        }
    }

    let mut options = ConnectOptions::new(format!("sqlite://{path}?mode=rwc"));
    options.max_connections(10).sqlx_logging(false);

    let db = Database::connect(options).await?;
    // WAL keeps concurrent readers from blocking the single writer.
    db.execute_unprepared("PRAGMA journal_mode = WAL").await?;
    db.execute_unprepared("PRAGMA busy_timeout = 5000").await?;
    ensure_schema(&db).await?;
    info!(path, "database ready");
    Ok(db)
}

pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut monitors = schema.create_table_from_entity(entities::monitor::Entity);
    monitors.if_not_exists();
    db.execute(backend.build(&monitors)).await?;

    let mut schedules = schema.create_table_from_entity(entities::schedule::Entity);
    schedules.if_not_exists();
    db.execute(backend.build(&schedules)).await?;

    Ok(())
}
