use serde::{Deserialize, Serialize};

use crate::db::entities::{monitor, schedule};

/// Create/update payload for a monitor. Omitted numeric fields fall back
/// to the engine defaults; `schedules: null` leaves the schedule set
/// untouched on update, an explicit array replaces it.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorPayload {
    pub name: String,
    #[serde(default)]
    pub account_key: String,
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub dns_record_type: String,
    #[serde(default)]
    pub check_kind: String,
    pub check_target: String,
    #[serde(default)]
    pub original_ip: String,
    #[serde(default)]
    pub backup_ip: String,
    #[serde(default)]
    pub record_handle: String,
    #[serde(default)]
    pub interval_seconds: Option<i32>,
    #[serde(default)]
    pub timeout_seconds: Option<i32>,
    #[serde(default)]
    pub failure_threshold: Option<i32>,
    #[serde(default)]
    pub recovery_threshold: Option<i32>,
    #[serde(default)]
    pub schedules: Option<Vec<SchedulePayload>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePayload {
    pub cron_expression: String,
    pub target_ip: String,
}

#[derive(Debug, Serialize)]
pub struct MonitorDetails {
    #[serde(flatten)]
    pub monitor: monitor::Model,
    pub schedules: Vec<schedule::Model>,
}
