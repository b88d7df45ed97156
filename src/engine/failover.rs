//! Per-monitor failover state machine.
//!
//! A monitor is either `Normal` (DNS points at the primary) or `Down`
//! (DNS points at the backup). Consecutive observations on the opposite
//! side accumulate toward the transition threshold; any observation on
//! the current side resets them. A transition only commits after the DNS
//! provider acknowledged the record update, otherwise state is kept and
//! the next check retries.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::db::entities::monitor::{self, STATUS_DOWN, STATUS_NORMAL};
use crate::db::services::monitor_service;
use crate::dns::DnsProvider;
use crate::notifications::Notifier;

use super::prober::Prober;

pub struct MonitorEngine {
    db: DatabaseConnection,
    dns: Arc<dyn DnsProvider>,
    notifier: Arc<Notifier>,
    prober: Prober,
}

impl MonitorEngine {
    pub fn new(db: DatabaseConnection, dns: Arc<dyn DnsProvider>, notifier: Arc<Notifier>) -> Self {
        Self {
            db,
            dns,
            notifier,
            prober: Prober::new(),
        }
    }

    /// One periodic check: re-read the monitor (edits take effect without
    /// a scheduler rebuild, deleted monitors fall out), probe the primary,
    /// feed the observation through the state machine and persist.
    pub async fn run_check(&self, monitor_id: i32) {
        let mut m = match monitor_service::get_by_id(&self.db, monitor_id).await {
            Ok(Some(m)) => m,
            Ok(None) => return,
            Err(e) => {
                warn!(monitor_id, error = %e, "failed to load monitor for check");
                return;
            }
        };
        m.apply_defaults();

        let is_up = self.probe(&m).await;
        self.apply_observation(&mut m, is_up).await;

        m.last_checked_at = Some(Utc::now());
        if let Err(e) = monitor_service::save_check_state(&self.db, &m).await {
            warn!(monitor = %m.name, error = %e, "failed to persist check state");
        }
    }

    /// The probe always targets the primary, not `current_ip`: while
    /// failed over, checking the backup would declare the primary healthy
    /// as long as the backup is, and failback would never happen.
    async fn probe(&self, m: &monitor::Model) -> bool {
        match m.check_kind.as_str() {
            "http" | "https" => {
                let force_ip = m.original_ip.parse().ok();
                self.prober
                    .check_http(&check_url(m), m.timeout_seconds as u64, force_ip)
                    .await
            }
            _ => {
                let host = if m.original_ip.is_empty() {
                    m.check_target.as_str()
                } else {
                    m.original_ip.as_str()
                };
                self.prober.check_ping(host, m.timeout_seconds as u64).await
            }
        }
    }

    pub(crate) async fn apply_observation(&self, m: &mut monitor::Model, is_up: bool) {
        if is_up {
            self.handle_success(m).await;
        } else {
            self.handle_failure(m).await;
        }
    }

    async fn handle_success(&self, m: &mut monitor::Model) {
        if !m.is_down() {
            m.consecutive_failures = 0;
            return;
        }

        m.consecutive_successes += 1;
        if m.consecutive_successes < m.effective_recovery_threshold() {
            return;
        }

        info!(monitor = %m.name, "primary is healthy again, switching back");
        let original = m.original_ip.clone();
        if self.switch_dns(m, &original).await {
            m.status = STATUS_NORMAL.to_string();
            m.consecutive_successes = 0;
            m.current_ip = original.clone();
            self.notifier.dispatch(&format!(
                "[RECOVERY] {}: primary {} recovered, DNS switched back",
                m.name, original
            ));
        } else {
            // Keep the counter elevated so the next healthy check retries
            // the switch immediately.
            warn!(monitor = %m.name, "recovery blocked: dns update failed, retrying next check");
        }
    }

    async fn handle_failure(&self, m: &mut monitor::Model) {
        if m.is_down() {
            m.consecutive_successes = 0;
            return;
        }

        m.consecutive_failures += 1;
        if m.consecutive_failures < m.failure_threshold {
            return;
        }

        warn!(monitor = %m.name, failures = m.consecutive_failures, "failure threshold reached, failing over");
        let backup = m.backup_ip.clone();
        if self.switch_dns(m, &backup).await {
            m.status = STATUS_DOWN.to_string();
            m.consecutive_failures = 0;
            m.current_ip = backup.clone();
            self.notifier.dispatch(&format!(
                "[FAILOVER] {}: primary {} failed, DNS switched to backup {}",
                m.name, m.original_ip, backup
            ));
        } else {
            // Counter stays past the threshold; the next failing check
            // retries the switch instead of waiting out a fresh window.
            warn!(monitor = %m.name, "failover blocked: dns update failed, retrying next check");
        }
    }

    /// A calendar rotation. Suppressed while failed over so it cannot
    /// override an active failover.
    pub async fn scheduled_switch(&self, monitor_id: i32, target_ip: &str) {
        let mut m = match monitor_service::get_by_id(&self.db, monitor_id).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                warn!(monitor_id, "scheduled switch for a deleted monitor");
                return;
            }
            Err(e) => {
                warn!(monitor_id, error = %e, "failed to load monitor for scheduled switch");
                return;
            }
        };
        m.apply_defaults();

        if m.is_down() {
            info!(monitor = %m.name, "skipping scheduled switch while failed over");
            return;
        }

        info!(monitor = %m.name, target_ip, "executing scheduled switch");
        if self.switch_dns(&mut m, target_ip).await {
            m.current_ip = target_ip.to_string();
            m.consecutive_failures = 0;
            m.consecutive_successes = 0;
            if let Err(e) = monitor_service::save_check_state(&self.db, &m).await {
                warn!(monitor = %m.name, error = %e, "failed to persist scheduled switch");
            }
            self.notifier.dispatch(&format!(
                "[SCHEDULED_SWITCH] {}: DNS rotated to {}",
                m.name, target_ip
            ));
        }
    }

    /// Forced recovery: state goes back to `Normal` unconditionally, the
    /// DNS switch is attempted but its failure does not veto the reset.
    pub async fn restore(&self, monitor_id: i32) -> Result<Option<monitor::Model>, DbErr> {
        let Some(mut m) = monitor_service::get_by_id(&self.db, monitor_id).await? else {
            return Ok(None);
        };
        m.apply_defaults();

        m.status = STATUS_NORMAL.to_string();
        m.consecutive_failures = 0;
        m.consecutive_successes = 0;
        m.current_ip = m.original_ip.clone();
        m.last_checked_at = Some(Utc::now());

        let original = m.original_ip.clone();
        if self.switch_dns(&mut m, &original).await {
            self.notifier.dispatch(&format!(
                "[MANUAL_RECOVERY] {}: DNS forced back to primary {}",
                m.name, original
            ));
        }

        monitor_service::save_check_state(&self.db, &m).await?;
        Ok(Some(m))
    }

    /// Points the monitor's DNS record at `ip`, lazily discovering and
    /// persisting the record handle on first use. Returns whether the
    /// provider acknowledged the update.
    async fn switch_dns(&self, m: &mut monitor::Model, ip: &str) -> bool {
        if m.zone_id.is_empty() || ip.is_empty() {
            warn!(monitor = %m.name, "skipping dns update: missing zone or target ip");
            return false;
        }

        if m.record_handle.is_empty() {
            match self.dns.discover_record(m).await {
                Ok(handle) => {
                    info!(monitor = %m.name, handle, "discovered dns record");
                    m.record_handle = handle.clone();
                    if let Err(e) =
                        monitor_service::save_record_handle(&self.db, m.id, &handle).await
                    {
                        warn!(monitor = %m.name, error = %e, "failed to persist record handle");
                    }
                }
                Err(e) => {
                    warn!(monitor = %m.name, error = %e, "record discovery failed, aborting dns update");
                    return false;
                }
            }
        }

        match self.dns.update_record(m, ip).await {
            Ok(()) => {
                info!(monitor = %m.name, ip, "dns record updated");
                true
            }
            Err(e) => {
                warn!(monitor = %m.name, ip, error = %e, "dns update failed");
                false
            }
        }
    }
}

/// Probe URL for http/https monitors; a bare host gets the check kind as
/// its scheme.
fn check_url(m: &monitor::Model) -> String {
    if m.check_target.starts_with("http") {
        m.check_target.clone()
    } else {
        format!("{}://{}", m.check_kind, m.check_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationsConfig;
    use crate::db::services::monitor_service::test_db;
    use crate::dns::DnsError;
    use crate::web::models::SchedulePayload;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockDns {
        updates: Mutex<Vec<String>>,
        fail_updates: AtomicBool,
        discovered_handle: Option<String>,
    }

    impl MockDns {
        fn with_handle(handle: &str) -> Self {
            Self {
                discovered_handle: Some(handle.to_string()),
                ..Default::default()
            }
        }

        fn updates(&self) -> Vec<String> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DnsProvider for MockDns {
        async fn discover_record(&self, _m: &monitor::Model) -> Result<String, DnsError> {
            self.discovered_handle
                .clone()
                .ok_or(DnsError::RecordNotFound)
        }

        async fn update_record(&self, _m: &monitor::Model, ip: &str) -> Result<(), DnsError> {
            if self.fail_updates.load(Ordering::Relaxed) {
                return Err(DnsError::Api("scripted rejection".to_string()));
            }
            self.updates.lock().unwrap().push(ip.to_string());
            Ok(())
        }
    }

    async fn engine_with(dns: Arc<MockDns>) -> (MonitorEngine, DatabaseConnection) {
        let db = test_db().await;
        let notifier = Arc::new(Notifier::new(NotificationsConfig::default()));
        (MonitorEngine::new(db.clone(), dns, notifier), db)
    }

    fn sample_monitor() -> monitor::Model {
        monitor::Model {
            id: 0,
            name: "web".to_string(),
            account_key: "main".to_string(),
            zone_id: "z1".to_string(),
            hostname: "www.example.com".to_string(),
            dns_record_type: "A".to_string(),
            check_kind: "ping".to_string(),
            check_target: "1.1.1.1".to_string(),
            original_ip: "1.1.1.1".to_string(),
            backup_ip: "2.2.2.2".to_string(),
            interval_seconds: 60,
            timeout_seconds: 5,
            failure_threshold: 3,
            recovery_threshold: 2,
            record_handle: "rec9".to_string(),
            status: STATUS_NORMAL.to_string(),
            current_ip: "1.1.1.1".to_string(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_checked_at: None,
        }
    }

    async fn insert(db: &DatabaseConnection, model: monitor::Model) -> monitor::Model {
        monitor_service::create_monitor(db, model, &[] as &[SchedulePayload])
            .await
            .unwrap()
    }

    async fn feed(engine: &MonitorEngine, m: &mut monitor::Model, observations: &[bool]) {
        for &is_up in observations {
            engine.apply_observation(m, is_up).await;
        }
    }

    #[tokio::test]
    async fn clean_failover_after_three_consecutive_failures() {
        let dns = Arc::new(MockDns::default());
        let (engine, db) = engine_with(dns.clone()).await;
        let mut m = insert(&db, sample_monitor()).await;

        feed(&engine, &mut m, &[true, true, false, false, false]).await;

        assert_eq!(dns.updates(), vec!["2.2.2.2"]);
        assert_eq!(m.status, STATUS_DOWN);
        assert_eq!(m.current_ip, "2.2.2.2");
        assert_eq!(m.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn interleaved_successes_debounce_the_failover() {
        let dns = Arc::new(MockDns::default());
        let (engine, db) = engine_with(dns.clone()).await;
        let mut m = insert(&db, sample_monitor()).await;

        feed(
            &engine,
            &mut m,
            &[false, true, false, false, true, false, false, false],
        )
        .await;

        // Only the final run of three failures may trigger the switch.
        assert_eq!(dns.updates(), vec!["2.2.2.2"]);
        assert_eq!(m.status, STATUS_DOWN);
    }

    #[tokio::test]
    async fn flapping_resets_recovery_progress() {
        let dns = Arc::new(MockDns::default());
        let (engine, db) = engine_with(dns.clone()).await;
        let mut template = sample_monitor();
        template.status = STATUS_DOWN.to_string();
        template.current_ip = "2.2.2.2".to_string();
        let mut m = insert(&db, template).await;

        feed(&engine, &mut m, &[true, false, true, true]).await;

        assert_eq!(dns.updates(), vec!["1.1.1.1"]);
        assert_eq!(m.status, STATUS_NORMAL);
        assert_eq!(m.current_ip, "1.1.1.1");
        assert_eq!(m.consecutive_successes, 0);
    }

    #[tokio::test]
    async fn rejected_dns_update_blocks_the_transition_and_retries() {
        let dns = Arc::new(MockDns::default());
        dns.fail_updates.store(true, Ordering::Relaxed);
        let (engine, db) = engine_with(dns.clone()).await;
        let mut m = insert(&db, sample_monitor()).await;

        feed(&engine, &mut m, &[false, false, false]).await;

        assert!(dns.updates().is_empty());
        assert_eq!(m.status, STATUS_NORMAL);
        assert_eq!(m.consecutive_failures, 3);

        // The very next failing check retries and succeeds.
        dns.fail_updates.store(false, Ordering::Relaxed);
        feed(&engine, &mut m, &[false]).await;

        assert_eq!(dns.updates(), vec!["2.2.2.2"]);
        assert_eq!(m.status, STATUS_DOWN);
        assert_eq!(m.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn recovery_keeps_counter_when_dns_update_fails() {
        let dns = Arc::new(MockDns::default());
        dns.fail_updates.store(true, Ordering::Relaxed);
        let (engine, db) = engine_with(dns.clone()).await;
        let mut template = sample_monitor();
        template.status = STATUS_DOWN.to_string();
        template.current_ip = "2.2.2.2".to_string();
        let mut m = insert(&db, template).await;

        feed(&engine, &mut m, &[true, true]).await;
        assert_eq!(m.status, STATUS_DOWN);
        assert_eq!(m.consecutive_successes, 2);

        dns.fail_updates.store(false, Ordering::Relaxed);
        feed(&engine, &mut m, &[true]).await;
        assert_eq!(m.status, STATUS_NORMAL);
        assert_eq!(dns.updates(), vec!["1.1.1.1"]);
    }

    #[tokio::test]
    async fn success_resets_failure_counter_without_dns_traffic() {
        let dns = Arc::new(MockDns::default());
        let (engine, db) = engine_with(dns.clone()).await;
        let mut m = insert(&db, sample_monitor()).await;

        feed(&engine, &mut m, &[false, false, true]).await;

        assert!(dns.updates().is_empty());
        assert_eq!(m.consecutive_failures, 0);
        assert_eq!(m.status, STATUS_NORMAL);
    }

    #[tokio::test]
    async fn scheduled_switch_is_suppressed_while_down() {
        let dns = Arc::new(MockDns::default());
        let (engine, db) = engine_with(dns.clone()).await;
        let mut template = sample_monitor();
        template.status = STATUS_DOWN.to_string();
        template.current_ip = "2.2.2.2".to_string();
        let m = insert(&db, template).await;

        engine.scheduled_switch(m.id, "3.3.3.3").await;

        assert!(dns.updates().is_empty());
        let after = monitor_service::get_by_id(&db, m.id).await.unwrap().unwrap();
        assert_eq!(after.current_ip, "2.2.2.2");
    }

    #[tokio::test]
    async fn scheduled_switch_rotates_and_resets_counters() {
        let dns = Arc::new(MockDns::default());
        let (engine, db) = engine_with(dns.clone()).await;
        let mut template = sample_monitor();
        template.consecutive_failures = 2;
        let m = insert(&db, template).await;

        engine.scheduled_switch(m.id, "3.3.3.3").await;

        assert_eq!(dns.updates(), vec!["3.3.3.3"]);
        let after = monitor_service::get_by_id(&db, m.id).await.unwrap().unwrap();
        assert_eq!(after.current_ip, "3.3.3.3");
        assert_eq!(after.consecutive_failures, 0);
        assert_eq!(after.status, STATUS_NORMAL);
    }

    #[tokio::test]
    async fn restore_forces_normal_even_when_dns_fails() {
        let dns = Arc::new(MockDns::default());
        dns.fail_updates.store(true, Ordering::Relaxed);
        let (engine, db) = engine_with(dns.clone()).await;
        let mut template = sample_monitor();
        template.status = STATUS_DOWN.to_string();
        template.current_ip = "2.2.2.2".to_string();
        template.consecutive_successes = 1;
        let m = insert(&db, template).await;

        let restored = engine.restore(m.id).await.unwrap().unwrap();

        assert_eq!(restored.status, STATUS_NORMAL);
        assert_eq!(restored.current_ip, "1.1.1.1");
        assert_eq!(restored.consecutive_failures, 0);
        assert_eq!(restored.consecutive_successes, 0);

        let after = monitor_service::get_by_id(&db, m.id).await.unwrap().unwrap();
        assert_eq!(after.status, STATUS_NORMAL);
        assert_eq!(after.current_ip, "1.1.1.1");
    }

    #[tokio::test]
    async fn restore_of_unknown_monitor_returns_none() {
        let dns = Arc::new(MockDns::default());
        let (engine, _db) = engine_with(dns).await;
        assert!(engine.restore(4242).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_handle_is_discovered_and_persisted_on_first_switch() {
        let dns = Arc::new(MockDns::with_handle("rec-new"));
        let (engine, db) = engine_with(dns.clone()).await;
        let mut template = sample_monitor();
        template.record_handle.clear();
        let mut m = insert(&db, template).await;

        feed(&engine, &mut m, &[false, false, false]).await;

        assert_eq!(m.record_handle, "rec-new");
        assert_eq!(dns.updates(), vec!["2.2.2.2"]);
        let after = monitor_service::get_by_id(&db, m.id).await.unwrap().unwrap();
        assert_eq!(after.record_handle, "rec-new");
    }

    #[tokio::test]
    async fn failed_discovery_blocks_the_switch() {
        let dns = Arc::new(MockDns::default()); // no handle to discover
        let (engine, db) = engine_with(dns.clone()).await;
        let mut template = sample_monitor();
        template.record_handle.clear();
        let mut m = insert(&db, template).await;

        feed(&engine, &mut m, &[false, false, false]).await;

        assert!(dns.updates().is_empty());
        assert_eq!(m.status, STATUS_NORMAL);
        assert_eq!(m.consecutive_failures, 3);
    }

    #[test]
    fn check_url_prefixes_bare_hosts_with_the_check_kind() {
        let mut m = sample_monitor();
        m.check_kind = "https".to_string();
        m.check_target = "www.example.com".to_string();
        assert_eq!(check_url(&m), "https://www.example.com");

        m.check_target = "http://www.example.com/health".to_string();
        assert_eq!(check_url(&m), "http://www.example.com/health");
    }
}
