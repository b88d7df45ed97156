//! Repository operations for monitors and their schedules.
//!
//! Engine-side saves are column-restricted so a check finishing while an
//! operator edits the monitor can never clobber configuration fields, and
//! vice versa. Everything that touches schedules runs in a transaction.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    NotSet, QueryFilter, Set, TransactionTrait,
};

use crate::config::MonitorSeed;
use crate::db::entities::{monitor, prelude::*, schedule};
use crate::web::models::SchedulePayload;

pub async fn list_with_schedules(
    db: &DatabaseConnection,
) -> Result<Vec<(monitor::Model, Vec<schedule::Model>)>, DbErr> {
    Monitor::find().find_with_related(Schedule).all(db).await
}

pub async fn get_by_id(db: &DatabaseConnection, id: i32) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find_by_id(id).one(db).await
}

pub async fn get_by_name(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::Name.eq(name))
        .one(db)
        .await
}

pub async fn schedules_for(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Vec<schedule::Model>, DbErr> {
    Schedule::find()
        .filter(schedule::Column::MonitorId.eq(monitor_id))
        .all(db)
        .await
}

/// Persists the outcome of a check. Only state columns are written.
pub async fn save_check_state(db: &DatabaseConnection, m: &monitor::Model) -> Result<(), DbErr> {
    let update = monitor::ActiveModel {
        id: Set(m.id),
        status: Set(m.status.clone()),
        current_ip: Set(m.current_ip.clone()),
        consecutive_failures: Set(m.consecutive_failures),
        consecutive_successes: Set(m.consecutive_successes),
        last_checked_at: Set(m.last_checked_at),
        ..Default::default()
    };
    update.update(db).await.map(|_| ())
}

pub async fn save_record_handle(
    db: &DatabaseConnection,
    id: i32,
    handle: &str,
) -> Result<(), DbErr> {
    let update = monitor::ActiveModel {
        id: Set(id),
        record_handle: Set(handle.to_string()),
        ..Default::default()
    };
    update.update(db).await.map(|_| ())
}

/// Inserts a monitor with default state and its schedules atomically.
pub async fn create_monitor(
    db: &DatabaseConnection,
    mut model: monitor::Model,
    schedules: &[SchedulePayload],
) -> Result<monitor::Model, DbErr> {
    model.apply_defaults();
    if model.status.is_empty() {
        model.status = monitor::STATUS_NORMAL.to_string();
    }
    if model.current_ip.is_empty() {
        model.current_ip = model.original_ip.clone();
    }
    if model.last_checked_at.is_none() {
        model.last_checked_at = Some(Utc::now());
    }

    let txn = db.begin().await?;
    let saved = insert_active_model(&model).insert(&txn).await?;
    for s in schedules {
        schedule::ActiveModel {
            id: NotSet,
            monitor_id: Set(saved.id),
            cron_expression: Set(s.cron_expression.clone()),
            target_ip: Set(s.target_ip.clone()),
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;
    Ok(saved)
}

/// Writes the configuration columns of `updated` and, when `schedules` is
/// present, replaces the schedule set. State columns are left alone so a
/// concurrent check cannot be clobbered.
pub async fn update_monitor(
    db: &DatabaseConnection,
    updated: &monitor::Model,
    schedules: Option<&[SchedulePayload]>,
) -> Result<(), DbErr> {
    let txn = db.begin().await?;
    config_active_model(updated).update(&txn).await?;
    if let Some(schedules) = schedules {
        replace_schedules(&txn, updated.id, schedules).await?;
    }
    txn.commit().await
}

pub async fn delete_monitor(db: &DatabaseConnection, id: i32) -> Result<u64, DbErr> {
    let txn = db.begin().await?;
    Schedule::delete_many()
        .filter(schedule::Column::MonitorId.eq(id))
        .exec(&txn)
        .await?;
    let result = Monitor::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;
    Ok(result.rows_affected)
}

/// Merges the configured monitors into the database. The config file is
/// the source of truth for configuration fields; state fields survive
/// restarts for monitors that already exist by name.
pub async fn seed_monitors(db: &DatabaseConnection, seeds: &[MonitorSeed]) -> Result<(), DbErr> {
    for seed in seeds {
        match get_by_name(db, &seed.name).await? {
            Some(existing) => {
                let mut updated = existing.clone();
                apply_seed_config(&mut updated, seed);
                updated.apply_defaults();
                // A moved record loses its handle unless the seed pins one.
                if !seed.record_handle.is_empty() {
                    updated.record_handle = seed.record_handle.clone();
                } else if updated.zone_id != existing.zone_id
                    || updated.hostname != existing.hostname
                    || updated.dns_record_type != existing.dns_record_type
                {
                    updated.record_handle.clear();
                }

                let txn = db.begin().await?;
                config_active_model(&updated).update(&txn).await?;
                Schedule::delete_many()
                    .filter(schedule::Column::MonitorId.eq(existing.id))
                    .exec(&txn)
                    .await?;
                for s in &seed.schedules {
                    schedule::ActiveModel {
                        id: NotSet,
                        monitor_id: Set(existing.id),
                        cron_expression: Set(s.cron_expression.clone()),
                        target_ip: Set(s.target_ip.clone()),
                    }
                    .insert(&txn)
                    .await?;
                }
                txn.commit().await?;
            }
            None => {
                let mut model = monitor::Model {
                    id: 0,
                    name: seed.name.clone(),
                    account_key: seed.account_key.clone(),
                    zone_id: seed.zone_id.clone(),
                    hostname: seed.hostname.clone(),
                    dns_record_type: seed.dns_record_type.clone(),
                    check_kind: seed.check_kind.clone(),
                    check_target: seed.check_target.clone(),
                    original_ip: seed.original_ip.clone(),
                    backup_ip: seed.backup_ip.clone(),
                    interval_seconds: seed.interval_seconds,
                    timeout_seconds: seed.timeout_seconds,
                    failure_threshold: seed.failure_threshold,
                    recovery_threshold: seed.recovery_threshold,
                    record_handle: seed.record_handle.clone(),
                    status: monitor::STATUS_NORMAL.to_string(),
                    current_ip: seed.original_ip.clone(),
                    consecutive_failures: 0,
                    consecutive_successes: 0,
                    last_checked_at: Some(Utc::now()),
                };
                model.apply_defaults();

                let schedules: Vec<SchedulePayload> = seed
                    .schedules
                    .iter()
                    .map(|s| SchedulePayload {
                        cron_expression: s.cron_expression.clone(),
                        target_ip: s.target_ip.clone(),
                    })
                    .collect();
                create_monitor(db, model, &schedules).await?;
            }
        }
    }
    Ok(())
}

async fn replace_schedules<C: ConnectionTrait>(
    conn: &C,
    monitor_id: i32,
    schedules: &[SchedulePayload],
) -> Result<(), DbErr> {
    Schedule::delete_many()
        .filter(schedule::Column::MonitorId.eq(monitor_id))
        .exec(conn)
        .await?;
    for s in schedules {
        schedule::ActiveModel {
            id: NotSet,
            monitor_id: Set(monitor_id),
            cron_expression: Set(s.cron_expression.clone()),
            target_ip: Set(s.target_ip.clone()),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

fn apply_seed_config(target: &mut monitor::Model, seed: &MonitorSeed) {
    target.account_key = seed.account_key.clone();
    target.zone_id = seed.zone_id.clone();
    target.hostname = seed.hostname.clone();
    target.dns_record_type = seed.dns_record_type.clone();
    target.check_kind = seed.check_kind.clone();
    target.check_target = seed.check_target.clone();
    target.original_ip = seed.original_ip.clone();
    target.backup_ip = seed.backup_ip.clone();
    target.interval_seconds = seed.interval_seconds;
    target.timeout_seconds = seed.timeout_seconds;
    target.failure_threshold = seed.failure_threshold;
    target.recovery_threshold = seed.recovery_threshold;
}

fn insert_active_model(m: &monitor::Model) -> monitor::ActiveModel {
    monitor::ActiveModel {
        id: NotSet,
        name: Set(m.name.clone()),
        account_key: Set(m.account_key.clone()),
        zone_id: Set(m.zone_id.clone()),
        hostname: Set(m.hostname.clone()),
        dns_record_type: Set(m.dns_record_type.clone()),
        check_kind: Set(m.check_kind.clone()),
        check_target: Set(m.check_target.clone()),
        original_ip: Set(m.original_ip.clone()),
        backup_ip: Set(m.backup_ip.clone()),
        interval_seconds: Set(m.interval_seconds),
        timeout_seconds: Set(m.timeout_seconds),
        failure_threshold: Set(m.failure_threshold),
        recovery_threshold: Set(m.recovery_threshold),
        record_handle: Set(m.record_handle.clone()),
        status: Set(m.status.clone()),
        current_ip: Set(m.current_ip.clone()),
        consecutive_failures: Set(m.consecutive_failures),
        consecutive_successes: Set(m.consecutive_successes),
        last_checked_at: Set(m.last_checked_at),
    }
}

/// Configuration columns plus the record handle; never the check state.
fn config_active_model(m: &monitor::Model) -> monitor::ActiveModel {
    monitor::ActiveModel {
        id: Set(m.id),
        name: Set(m.name.clone()),
        account_key: Set(m.account_key.clone()),
        zone_id: Set(m.zone_id.clone()),
        hostname: Set(m.hostname.clone()),
        dns_record_type: Set(m.dns_record_type.clone()),
        check_kind: Set(m.check_kind.clone()),
        check_target: Set(m.check_target.clone()),
        original_ip: Set(m.original_ip.clone()),
        backup_ip: Set(m.backup_ip.clone()),
        interval_seconds: Set(m.interval_seconds),
        timeout_seconds: Set(m.timeout_seconds),
        failure_threshold: Set(m.failure_threshold),
        recovery_threshold: Set(m.recovery_threshold),
        record_handle: Set(m.record_handle.clone()),
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> DatabaseConnection {
    let mut options = sea_orm::ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = sea_orm::Database::connect(options).await.unwrap();
    crate::db::ensure_schema(&db).await.unwrap();
    db
}
