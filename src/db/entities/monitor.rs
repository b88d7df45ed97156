use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_NORMAL: &str = "Normal";
pub const STATUS_DOWN: &str = "Down";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub account_key: String,
    pub zone_id: String,
    pub hostname: String,
    pub dns_record_type: String,
    pub check_kind: String,
    pub check_target: String,
    pub original_ip: String,
    pub backup_ip: String,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub failure_threshold: i32,
    pub recovery_threshold: i32,
    pub record_handle: String,
    pub status: String,
    pub current_ip: String,
    pub consecutive_failures: i32,
    pub consecutive_successes: i32,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::schedule::Entity")]
    Schedule,
}

impl Related<super::schedule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Schedule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Fills zero/empty configuration fields with their defaults so the
    /// engine never operates on degenerate values.
    pub fn apply_defaults(&mut self) {
        if self.interval_seconds <= 0 {
            self.interval_seconds = 60;
        }
        if self.timeout_seconds <= 0 {
            self.timeout_seconds = 5;
        }
        if self.failure_threshold <= 0 {
            self.failure_threshold = 3;
        }
        if self.recovery_threshold <= 0 {
            self.recovery_threshold = 2;
        }
        if self.check_kind.is_empty() {
            self.check_kind = "ping".to_string();
        }
        if self.dns_record_type.is_empty() {
            self.dns_record_type = "A".to_string();
        }
    }

    pub fn is_down(&self) -> bool {
        self.status == STATUS_DOWN
    }

    /// Recovery threshold with the legacy fallback chain: an unset value
    /// falls back to the failure threshold, and to 3 if both are unset.
    pub fn effective_recovery_threshold(&self) -> i32 {
        if self.recovery_threshold > 0 {
            self.recovery_threshold
        } else if self.failure_threshold > 0 {
            self.failure_threshold
        } else {
            3
        }
    }
}
