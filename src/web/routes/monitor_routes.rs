use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::{error, warn};

use crate::db::entities::monitor;
use crate::db::services::monitor_service;
use crate::engine::scheduler::parse_cron;
use crate::web::models::{MonitorDetails, MonitorPayload};
use crate::web::{AppError, AppState};

pub fn create_monitor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_monitors).post(create_monitor))
        .route(
            "/{id}",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/{id}/restore", post(restore_monitor))
}

async fn list_monitors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MonitorDetails>>, AppError> {
    let monitors = monitor_service::list_with_schedules(&state.db).await?;
    Ok(Json(
        monitors
            .into_iter()
            .map(|(monitor, schedules)| MonitorDetails { monitor, schedules })
            .collect(),
    ))
}

async fn get_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<MonitorDetails>, AppError> {
    fetch_details(&state, id).await.map(Json)
}

async fn create_monitor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MonitorPayload>,
) -> Result<(StatusCode, Json<MonitorDetails>), AppError> {
    validate_payload(&payload)?;
    if monitor_service::get_by_name(&state.db, &payload.name)
        .await?
        .is_some()
    {
        return Err(AppError::InvalidInput(format!(
            "monitor '{}' already exists",
            payload.name
        )));
    }

    let mut model = payload_to_model(&payload);
    if model.record_handle.is_empty() && !model.zone_id.is_empty() && !model.hostname.is_empty() {
        match state.dns.discover_record(&model).await {
            Ok(handle) => model.record_handle = handle,
            Err(e) => warn!(
                monitor = %model.name,
                error = %e,
                "record discovery failed at creation, retrying on first switch"
            ),
        }
    }

    let schedules = payload.schedules.unwrap_or_default();
    let saved = monitor_service::create_monitor(&state.db, model, &schedules).await?;
    reload_scheduler(&state).await;

    Ok((StatusCode::CREATED, Json(fetch_details(&state, saved.id).await?)))
}

async fn update_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<MonitorPayload>,
) -> Result<Json<MonitorDetails>, AppError> {
    validate_payload(&payload)?;
    let existing = monitor_service::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("monitor not found".to_string()))?;

    let mut updated = existing.clone();
    updated.name = payload.name.clone();
    updated.account_key = payload.account_key.clone();
    updated.zone_id = payload.zone_id.clone();
    updated.hostname = payload.hostname.clone();
    updated.dns_record_type = payload.dns_record_type.clone();
    updated.check_kind = payload.check_kind.clone();
    updated.check_target = payload.check_target.clone();
    updated.original_ip = payload.original_ip.clone();
    updated.backup_ip = payload.backup_ip.clone();
    updated.interval_seconds = payload.interval_seconds.unwrap_or(0);
    updated.timeout_seconds = payload.timeout_seconds.unwrap_or(0);
    updated.failure_threshold = payload.failure_threshold.unwrap_or(0);
    updated.recovery_threshold = payload.recovery_threshold.unwrap_or(0);
    updated.apply_defaults();

    // The handle identifies one concrete record; moving the monitor to a
    // different record invalidates it.
    let record_moved = updated.zone_id != existing.zone_id
        || updated.hostname != existing.hostname
        || updated.dns_record_type != existing.dns_record_type;
    if !payload.record_handle.is_empty() {
        updated.record_handle = payload.record_handle.clone();
    } else if record_moved {
        updated.record_handle.clear();
        match state.dns.discover_record(&updated).await {
            Ok(handle) => updated.record_handle = handle,
            Err(e) => warn!(
                monitor = %updated.name,
                error = %e,
                "record discovery failed after reconfiguration, retrying on first switch"
            ),
        }
    }

    monitor_service::update_monitor(&state.db, &updated, payload.schedules.as_deref()).await?;
    reload_scheduler(&state).await;

    fetch_details(&state, id).await.map(Json)
}

async fn delete_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let deleted = monitor_service::delete_monitor(&state.db, id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound("monitor not found".to_string()));
    }
    reload_scheduler(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<MonitorDetails>, AppError> {
    let restored = state
        .engine
        .restore(id)
        .await?
        .ok_or_else(|| AppError::NotFound("monitor not found".to_string()))?;
    fetch_details(&state, restored.id).await.map(Json)
}

async fn fetch_details(state: &AppState, id: i32) -> Result<MonitorDetails, AppError> {
    let monitor = monitor_service::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("monitor not found".to_string()))?;
    let schedules = monitor_service::schedules_for(&state.db, id).await?;
    Ok(MonitorDetails { monitor, schedules })
}

/// The transaction is already committed; a reload failure must not fail
/// the request, only the log.
async fn reload_scheduler(state: &AppState) {
    if let Err(e) = state.scheduler.reload().await {
        error!(error = %e, "scheduler reload failed after monitor mutation");
    }
}

pub(crate) fn validate_payload(payload: &MonitorPayload) -> Result<(), AppError> {
    if payload.name.is_empty() || payload.check_target.is_empty() {
        return Err(AppError::InvalidInput(
            "name and check_target are required".to_string(),
        ));
    }
    if !matches!(payload.check_kind.as_str(), "" | "ping" | "http" | "https") {
        return Err(AppError::InvalidInput(format!(
            "unknown check_kind '{}'",
            payload.check_kind
        )));
    }
    if !matches!(payload.dns_record_type.as_str(), "" | "A" | "AAAA" | "CNAME") {
        return Err(AppError::InvalidInput(format!(
            "unknown dns_record_type '{}'",
            payload.dns_record_type
        )));
    }
    for (field, value) in [
        ("interval_seconds", payload.interval_seconds),
        ("timeout_seconds", payload.timeout_seconds),
        ("failure_threshold", payload.failure_threshold),
        ("recovery_threshold", payload.recovery_threshold),
    ] {
        if let Some(v) = value {
            if v <= 0 {
                return Err(AppError::InvalidInput(format!("{field} must be positive")));
            }
        }
    }
    if let Some(schedules) = &payload.schedules {
        for schedule in schedules {
            if schedule.target_ip.is_empty() {
                return Err(AppError::InvalidInput(
                    "schedule target_ip is required".to_string(),
                ));
            }
            parse_cron(&schedule.cron_expression).map_err(|e| {
                AppError::InvalidInput(format!(
                    "bad cron expression '{}': {e}",
                    schedule.cron_expression
                ))
            })?;
        }
    }
    Ok(())
}

fn payload_to_model(payload: &MonitorPayload) -> monitor::Model {
    let mut model = monitor::Model {
        id: 0,
        name: payload.name.clone(),
        account_key: payload.account_key.clone(),
        zone_id: payload.zone_id.clone(),
        hostname: payload.hostname.clone(),
        dns_record_type: payload.dns_record_type.clone(),
        check_kind: payload.check_kind.clone(),
        check_target: payload.check_target.clone(),
        original_ip: payload.original_ip.clone(),
        backup_ip: payload.backup_ip.clone(),
        interval_seconds: payload.interval_seconds.unwrap_or(0),
        timeout_seconds: payload.timeout_seconds.unwrap_or(0),
        failure_threshold: payload.failure_threshold.unwrap_or(0),
        recovery_threshold: payload.recovery_threshold.unwrap_or(0),
        record_handle: payload.record_handle.clone(),
        status: monitor::STATUS_NORMAL.to_string(),
        current_ip: payload.original_ip.clone(),
        consecutive_failures: 0,
        consecutive_successes: 0,
        last_checked_at: Some(Utc::now()),
    };
    model.apply_defaults();
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::models::SchedulePayload;

    fn payload() -> MonitorPayload {
        MonitorPayload {
            name: "web".to_string(),
            account_key: String::new(),
            zone_id: "z1".to_string(),
            hostname: "www.example.com".to_string(),
            dns_record_type: String::new(),
            check_kind: "https".to_string(),
            check_target: "https://www.example.com".to_string(),
            original_ip: "1.1.1.1".to_string(),
            backup_ip: "2.2.2.2".to_string(),
            record_handle: String::new(),
            interval_seconds: None,
            timeout_seconds: None,
            failure_threshold: None,
            recovery_threshold: None,
            schedules: None,
        }
    }

    #[test]
    fn valid_payload_passes() {
        validate_payload(&payload()).unwrap();
    }

    #[test]
    fn missing_target_is_rejected() {
        let mut p = payload();
        p.check_target.clear();
        assert!(validate_payload(&p).is_err());
    }

    #[test]
    fn explicit_zero_threshold_is_rejected() {
        let mut p = payload();
        p.failure_threshold = Some(0);
        assert!(validate_payload(&p).is_err());
    }

    #[test]
    fn unknown_check_kind_is_rejected() {
        let mut p = payload();
        p.check_kind = "tcp".to_string();
        assert!(validate_payload(&p).is_err());
    }

    #[test]
    fn bad_schedule_cron_is_rejected() {
        let mut p = payload();
        p.schedules = Some(vec![SchedulePayload {
            cron_expression: "broken".to_string(),
            target_ip: "3.3.3.3".to_string(),
        }]);
        assert!(validate_payload(&p).is_err());
    }

    #[test]
    fn omitted_numbers_fall_back_to_defaults() {
        let model = payload_to_model(&payload());
        assert_eq!(model.interval_seconds, 60);
        assert_eq!(model.timeout_seconds, 5);
        assert_eq!(model.failure_threshold, 3);
        assert_eq!(model.recovery_threshold, 2);
        assert_eq!(model.current_ip, "1.1.1.1");
        assert_eq!(model.dns_record_type, "A");
    }
}
