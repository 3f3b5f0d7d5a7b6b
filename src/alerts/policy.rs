//! Which detections become alerts, and which alerts skip the cooldown

use serde_json::Value;

use crate::db::{Detection, DetectionType, Metadata, NewAlert, RiskZone, Severity, Telemetry};

pub const WEAPON_DETECTED: &str = "weapon_detected";
pub const PANIC_DETECTED: &str = "panic_detected";
pub const TAMPER_DETECTED: &str = "tamper_detected";
pub const SUSPICIOUS_ACTIVITY: &str = "suspicious_activity";
pub const ENTERING_RISK_ZONE: &str = "entering_risk_zone";

/// Alert types that always bypass deduplication
const HIGH_PRIORITY_TYPES: &[&str] = &[WEAPON_DETECTED, PANIC_DETECTED, TAMPER_DETECTED];

pub fn is_high_priority(alert_type: &str) -> bool {
    HIGH_PRIORITY_TYPES.contains(&alert_type)
}

#[derive(Debug, Clone)]
pub struct AlertDecision {
    pub alert: NewAlert,
    pub high_priority: bool,
}

/// Decide whether a stored detection warrants an alert
pub fn evaluate_detection(detection: &Detection, threshold: f64) -> Option<AlertDecision> {
    if detection.confidence <= threshold {
        return None;
    }

    let (alert_type, severity, message) = match detection.detection_type {
        DetectionType::Weapon => (
            WEAPON_DETECTED,
            Severity::Critical,
            format!("Weapon detected near vehicle {}", detection.vehicle_id),
        ),
        DetectionType::Tamper => (
            TAMPER_DETECTED,
            Severity::Critical,
            format!("Tampering detected on vehicle {}", detection.vehicle_id),
        ),
        DetectionType::SuspiciousActivity => (
            SUSPICIOUS_ACTIVITY,
            Severity::Warning,
            format!("Suspicious activity around vehicle {}", detection.vehicle_id),
        ),
        DetectionType::Face | DetectionType::LicensePlate => return None,
    };

    let mut metadata = Metadata::new();
    metadata.insert("detectionId".to_string(), Value::from(detection.id));
    metadata.insert("confidence".to_string(), Value::from(detection.confidence));
    if let Some(camera_id) = &detection.camera_id {
        metadata.insert("cameraId".to_string(), Value::from(camera_id.clone()));
    }
    if let Some(location) = detection.metadata.get("location") {
        metadata.insert("location".to_string(), location.clone());
    }

    Some(AlertDecision {
        alert: NewAlert {
            vehicle_id: detection.vehicle_id.clone(),
            alert_type: alert_type.to_string(),
            message: format!("{} ({:.0}% confidence)", message, detection.confidence * 100.0),
            severity,
            metadata,
        },
        high_priority: is_high_priority(alert_type),
    })
}

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

fn zone_contains(zone: &RiskZone, latitude: f64, longitude: f64) -> bool {
    haversine_meters(latitude, longitude, zone.latitude, zone.longitude) <= zone.radius_meters
}

/// Raise `entering_risk_zone` when a vehicle's fix lies inside a zone its
/// previous fix was outside of
pub fn evaluate_telemetry(previous: Option<&Telemetry>, current: &Telemetry, zones: &[RiskZone]) -> Option<AlertDecision> {
    let zone = zones.iter().find(|zone| {
        zone_contains(zone, current.latitude, current.longitude)
            && !previous.is_some_and(|prev| zone_contains(zone, prev.latitude, prev.longitude))
    })?;

    let mut metadata = Metadata::new();
    metadata.insert("riskZoneId".to_string(), Value::from(zone.id));
    metadata.insert(
        "location".to_string(),
        serde_json::json!({ "latitude": current.latitude, "longitude": current.longitude }),
    );

    Some(AlertDecision {
        alert: NewAlert {
            vehicle_id: current.vehicle_id.clone(),
            alert_type: ENTERING_RISK_ZONE.to_string(),
            message: format!("Vehicle {} entered risk zone '{}'", current.vehicle_id, zone.name),
            severity: zone.risk_level,
            metadata,
        },
        high_priority: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn detection(detection_type: DetectionType, confidence: f64) -> Detection {
        Detection {
            id: 7,
            vehicle_id: "CIT-01".to_string(),
            detection_type,
            confidence,
            camera_id: Some("cam-front".to_string()),
            image_url: None,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_weapon_above_threshold_is_critical() {
        let decision = evaluate_detection(&detection(DetectionType::Weapon, 0.95), 0.9).unwrap();
        assert_eq!(decision.alert.alert_type, WEAPON_DETECTED);
        assert_eq!(decision.alert.severity, Severity::Critical);
        assert!(decision.high_priority);
        assert_eq!(decision.alert.metadata["detectionId"], Value::from(7));
        assert_eq!(decision.alert.metadata["cameraId"], Value::from("cam-front"));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert!(evaluate_detection(&detection(DetectionType::Weapon, 0.9), 0.9).is_none());
        assert!(evaluate_detection(&detection(DetectionType::Weapon, 0.5), 0.9).is_none());
    }

    #[test]
    fn test_suspicious_activity_is_not_high_priority() {
        let decision = evaluate_detection(&detection(DetectionType::SuspiciousActivity, 0.97), 0.9).unwrap();
        assert_eq!(decision.alert.severity, Severity::Warning);
        assert!(!decision.high_priority);
    }

    #[test]
    fn test_faces_never_alert() {
        assert!(evaluate_detection(&detection(DetectionType::Face, 0.99), 0.9).is_none());
        assert!(evaluate_detection(&detection(DetectionType::LicensePlate, 0.99), 0.9).is_none());
    }

    #[test]
    fn test_high_priority_types() {
        assert!(is_high_priority(PANIC_DETECTED));
        assert!(is_high_priority(TAMPER_DETECTED));
        assert!(!is_high_priority(ENTERING_RISK_ZONE));
        assert!(!is_high_priority(SUSPICIOUS_ACTIVITY));
    }

    fn zone() -> RiskZone {
        RiskZone {
            id: 3,
            name: "Cash centre".to_string(),
            latitude: -26.2041,
            longitude: 28.0473,
            radius_meters: 500.0,
            risk_level: Severity::Warning,
            created_at: Utc::now(),
        }
    }

    fn fix(latitude: f64, longitude: f64) -> Telemetry {
        Telemetry {
            id: 1,
            vehicle_id: "CIT-02".to_string(),
            latitude,
            longitude,
            speed: 40.0,
            heading: 90.0,
            fuel_level: None,
            door_status: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // one degree of latitude is roughly 111 km
        let d = haversine_meters(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
    }

    #[test]
    fn test_telemetry_inside_zone() {
        let decision = evaluate_telemetry(None, &fix(-26.2045, 28.0470), &[zone()]).unwrap();
        assert_eq!(decision.alert.alert_type, ENTERING_RISK_ZONE);
        assert_eq!(decision.alert.vehicle_id, "CIT-02");
        assert!(!decision.high_priority);
    }

    #[test]
    fn test_telemetry_outside_zone() {
        assert!(evaluate_telemetry(None, &fix(-26.30, 28.0473), &[zone()]).is_none());
        assert!(evaluate_telemetry(None, &fix(-26.2045, 28.0470), &[]).is_none());
    }

    #[test]
    fn test_only_entering_raises() {
        let outside = fix(-26.30, 28.0473);
        let inside = fix(-26.2045, 28.0470);
        let still_inside = fix(-26.2043, 28.0471);

        assert!(evaluate_telemetry(Some(&outside), &inside, &[zone()]).is_some());
        assert!(evaluate_telemetry(Some(&inside), &still_inside, &[zone()]).is_none());
    }
}
