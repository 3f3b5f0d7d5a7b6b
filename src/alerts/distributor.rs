//! Alert fan-out with per vehicle+type deduplication
//!
//! A dispatch for a key already dispatched within the cooldown window is
//! suppressed unless the caller marks it high priority. The ledger entry is
//! written before any channel is attempted, so two near-simultaneous events
//! for the same key cannot both pass the check.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::email::{EmailSender, OutgoingEmail};
use crate::config::AlertsConfig;
use crate::db::{Alert, Severity};

pub const SYSTEM_CHANNEL: &str = "system";
pub const DEDUPLICATED_CHANNEL: &str = "system_deduplicated";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub success: bool,
    pub message: String,
    pub distribution_channels: Vec<String>,
}

impl DispatchResult {
    fn suppressed() -> Self {
        Self {
            success: true,
            message: "Duplicate alert suppressed within cooldown window".to_string(),
            distribution_channels: vec![DEDUPLICATED_CHANNEL.to_string()],
        }
    }
}

#[cfg(test)]
impl DispatchResult {
    pub fn is_suppressed(&self) -> bool {
        self.distribution_channels.iter().any(|c| c == DEDUPLICATED_CHANNEL)
    }
}

pub fn dedup_key(vehicle_id: &str, alert_type: &str) -> String {
    format!("{}_{}", vehicle_id, alert_type)
}

pub struct AlertDistributor {
    mailer: Arc<dyn EmailSender>,
    recipients: Vec<String>,
    cooldown: Duration,
    /// Last non-suppressed dispatch per key
    ledger: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AlertDistributor {
    pub fn new(mailer: Arc<dyn EmailSender>, recipients: Vec<String>, cooldown: Duration) -> Self {
        Self {
            mailer,
            recipients,
            cooldown,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AlertsConfig, mailer: Arc<dyn EmailSender>) -> Self {
        let cooldown = Duration::seconds(config.cooldown_secs as i64);
        Self::new(mailer, config.recipients.clone(), cooldown)
    }

    pub async fn distribute(&self, alert: &Alert, high_priority: bool) -> DispatchResult {
        self.distribute_at(alert, high_priority, Utc::now()).await
    }

    /// Same as [`distribute`](Self::distribute) with an explicit clock reading
    pub async fn distribute_at(&self, alert: &Alert, high_priority: bool, now: DateTime<Utc>) -> DispatchResult {
        let key = dedup_key(&alert.vehicle_id, &alert.alert_type);

        if !self.claim(&key, high_priority, now).await {
            debug!(key = %key, alert_id = alert.id, "Alert suppressed by cooldown");
            return DispatchResult::suppressed();
        }

        let mut channels = vec![SYSTEM_CHANNEL.to_string()];
        let mut success = true;

        if alert.severity == Severity::Critical || high_priority {
            let sends = self.recipients.iter().map(|to| async move {
                let outcome = self.mailer.send_email(alert_email(alert, to)).await;
                (to, outcome)
            });

            for (to, outcome) in join_all(sends).await {
                if outcome.success {
                    debug!(alert_id = alert.id, recipient = %to, message_id = ?outcome.message_id, "Alert email sent");
                    channels.push(format!("email:{}", to));
                } else {
                    success = false;
                    warn!(
                        alert_id = alert.id,
                        recipient = %to,
                        "Alert email failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }

        let message = if success {
            format!("Alert distributed via {} channel(s)", channels.len())
        } else {
            format!("Alert distributed via {} channel(s), some deliveries failed", channels.len())
        };
        info!(alert_id = alert.id, key = %key, high_priority, channels = ?channels, "Alert distributed");

        DispatchResult {
            success,
            message,
            distribution_channels: channels,
        }
    }

    /// Check the cooldown and record `now` in one critical section.
    /// Returns false when the dispatch must be suppressed.
    async fn claim(&self, key: &str, high_priority: bool, now: DateTime<Utc>) -> bool {
        let mut ledger = self.ledger.lock().await;
        if !high_priority {
            if let Some(last) = ledger.get(key) {
                if now - *last < self.cooldown {
                    return false;
                }
            }
        }
        ledger.insert(key.to_string(), now);
        true
    }
}

fn alert_email(alert: &Alert, to: &str) -> OutgoingEmail {
    let subject = format!(
        "[{}] {} on vehicle {}",
        alert.severity.to_string().to_uppercase(),
        alert.alert_type,
        alert.vehicle_id
    );
    let text = format!(
        "Security alert #{}\nVehicle: {}\nType: {}\nSeverity: {}\nTime: {}\n\n{}",
        alert.id,
        alert.vehicle_id,
        alert.alert_type,
        alert.severity,
        alert.timestamp.to_rfc3339(),
        alert.message
    );
    let html = format!(
        "<h2>Security alert #{}</h2>\
         <table>\
         <tr><th>Vehicle</th><td>{}</td></tr>\
         <tr><th>Type</th><td>{}</td></tr>\
         <tr><th>Severity</th><td>{}</td></tr>\
         <tr><th>Time</th><td>{}</td></tr>\
         </table>\
         <p>{}</p>",
        alert.id,
        html_escape::encode_text(&alert.vehicle_id),
        html_escape::encode_text(&alert.alert_type),
        alert.severity,
        alert.timestamp.to_rfc3339(),
        html_escape::encode_text(&alert.message)
    );

    OutgoingEmail {
        to: to.to_string(),
        subject,
        html,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::email::testing::RecordingMailer;
    use crate::db::Metadata;
    use pretty_assertions::assert_eq;

    const OPS: &str = "ops@example.com";
    const SECURITY: &str = "security@example.com";
    const DISPATCH: &str = "dispatch@example.com";

    fn alert(vehicle_id: &str, alert_type: &str, severity: Severity) -> Alert {
        Alert {
            id: 1,
            vehicle_id: vehicle_id.to_string(),
            alert_type: alert_type.to_string(),
            message: "Something happened".to_string(),
            severity,
            acknowledged: false,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    fn distributor(mailer: Arc<RecordingMailer>) -> AlertDistributor {
        AlertDistributor::new(
            mailer,
            vec![OPS.to_string(), SECURITY.to_string(), DISPATCH.to_string()],
            Duration::minutes(5),
        )
    }

    #[tokio::test]
    async fn test_second_dispatch_within_window_is_suppressed() {
        let distributor = distributor(Arc::new(RecordingMailer::default()));
        let alert = alert("CIT-01", "suspicious_activity", Severity::Warning);
        let t0 = Utc::now();

        let first = distributor.distribute_at(&alert, false, t0).await;
        let second = distributor.distribute_at(&alert, false, t0 + Duration::minutes(4)).await;

        assert_eq!(first.distribution_channels, vec!["system".to_string()]);
        assert!(!first.is_suppressed());
        assert_eq!(second.distribution_channels, vec!["system_deduplicated".to_string()]);
        assert!(second.success);
    }

    #[tokio::test]
    async fn test_dispatch_after_window_is_delivered() {
        let distributor = distributor(Arc::new(RecordingMailer::default()));
        let alert = alert("CIT-01", "suspicious_activity", Severity::Warning);
        let t0 = Utc::now();

        distributor.distribute_at(&alert, false, t0).await;
        let later = distributor.distribute_at(&alert, false, t0 + Duration::minutes(5)).await;
        assert!(!later.is_suppressed());
    }

    #[tokio::test]
    async fn test_suppressed_dispatch_does_not_extend_window() {
        let distributor = distributor(Arc::new(RecordingMailer::default()));
        let alert = alert("CIT-01", "entering_risk_zone", Severity::Warning);
        let t0 = Utc::now();

        distributor.distribute_at(&alert, false, t0).await;
        assert!(distributor.distribute_at(&alert, false, t0 + Duration::minutes(3)).await.is_suppressed());
        assert!(!distributor.distribute_at(&alert, false, t0 + Duration::minutes(6)).await.is_suppressed());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let distributor = distributor(Arc::new(RecordingMailer::default()));
        let t0 = Utc::now();

        distributor.distribute_at(&alert("CIT-01", "suspicious_activity", Severity::Warning), false, t0).await;
        let other_vehicle = distributor
            .distribute_at(&alert("CIT-02", "suspicious_activity", Severity::Warning), false, t0)
            .await;
        let other_type = distributor
            .distribute_at(&alert("CIT-01", "entering_risk_zone", Severity::Warning), false, t0)
            .await;

        assert!(!other_vehicle.is_suppressed());
        assert!(!other_type.is_suppressed());
    }

    #[tokio::test]
    async fn test_high_priority_overrides_cooldown() {
        let mailer = Arc::new(RecordingMailer::default());
        let distributor = distributor(mailer.clone());
        let alert = alert("CIT-01", "weapon_detected", Severity::Critical);
        let t0 = Utc::now();

        distributor.distribute_at(&alert, true, t0).await;
        let again = distributor.distribute_at(&alert, true, t0 + Duration::seconds(1)).await;

        assert!(!again.is_suppressed());
        assert!(again.success);
        assert_eq!(mailer.delivered_to().len(), 6);
    }

    #[tokio::test]
    async fn test_non_critical_skips_email() {
        let mailer = Arc::new(RecordingMailer::default());
        let distributor = distributor(mailer.clone());

        let result = distributor
            .distribute(&alert("CIT-01", "entering_risk_zone", Severity::Warning), false)
            .await;

        assert_eq!(result.distribution_channels, vec!["system".to_string()]);
        assert!(mailer.delivered_to().is_empty());
    }

    #[tokio::test]
    async fn test_critical_severity_emails_every_recipient() {
        let mailer = Arc::new(RecordingMailer::default());
        let distributor = distributor(mailer.clone());

        let result = distributor
            .distribute(&alert("CIT-01", "door_forced", Severity::Critical), false)
            .await;

        assert_eq!(
            result.distribution_channels,
            vec![
                "system".to_string(),
                format!("email:{}", OPS),
                format!("email:{}", SECURITY),
                format!("email:{}", DISPATCH),
            ]
        );
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_one_failing_recipient_does_not_block_others() {
        let mailer = Arc::new(RecordingMailer::failing_for(&[SECURITY]));
        let distributor = distributor(mailer.clone());

        let result = distributor
            .distribute(&alert("CIT-01", "weapon_detected", Severity::Critical), true)
            .await;

        assert!(!result.success);
        assert_eq!(
            result.distribution_channels,
            vec!["system".to_string(), format!("email:{}", OPS), format!("email:{}", DISPATCH)]
        );
        assert_eq!(mailer.delivered_to(), vec![OPS.to_string(), DISPATCH.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_delivery_still_records_dispatch() {
        let mailer = Arc::new(RecordingMailer::failing_for(&[OPS, SECURITY, DISPATCH]));
        let distributor = distributor(mailer);
        let alert = alert("CIT-03", "door_forced", Severity::Critical);
        let t0 = Utc::now();

        let first = distributor.distribute_at(&alert, false, t0).await;
        assert!(!first.success);
        let second = distributor.distribute_at(&alert, false, t0 + Duration::seconds(10)).await;
        assert!(second.is_suppressed());
    }

    #[tokio::test]
    async fn test_concurrent_dispatches_only_one_passes() {
        let distributor = Arc::new(distributor(Arc::new(RecordingMailer::default())));
        let alert = alert("CIT-01", "suspicious_activity", Severity::Warning);

        let results = join_all((0..8).map(|_| {
            let distributor = distributor.clone();
            let alert = alert.clone();
            async move { distributor.distribute(&alert, false).await }
        }))
        .await;

        let delivered = results.iter().filter(|r| !r.is_suppressed()).count();
        assert_eq!(delivered, 1);
    }

    #[test]
    fn test_email_body_is_escaped() {
        let mut alert = alert("CIT-01", "weapon_detected", Severity::Critical);
        alert.message = "<script>alert(1)</script>".to_string();
        let email = alert_email(&alert, OPS);

        assert!(email.html.contains("&lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
        assert_eq!(email.subject, "[CRITICAL] weapon_detected on vehicle CIT-01");
        assert!(email.text.contains("<script>alert(1)</script>"));
    }

    #[test]
    fn test_dispatch_result_wire_shape() {
        let value = serde_json::to_value(DispatchResult::suppressed()).unwrap();
        assert_eq!(value["distributionChannels"], serde_json::json!(["system_deduplicated"]));
        assert_eq!(value["success"], serde_json::json!(true));
    }
}
