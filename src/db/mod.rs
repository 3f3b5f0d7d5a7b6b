//! In-memory fleet store
//!
//! Every table is a map keyed by an autoincrement id. Creates stamp the
//! server-side time; limited reads come back newest first.

mod models;
mod seed;

pub use models::*;
pub use seed::seed_demo_data;

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Autoincrement table
struct Table<T> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
}

impl<T: Clone> Table<T> {
    fn insert_with(&mut self, build: impl FnOnce(i64) -> T) -> T {
        self.next_id += 1;
        let row = build(self.next_id);
        self.rows.insert(self.next_id, row.clone());
        row
    }

    fn all(&self) -> Vec<T> {
        self.rows.values().cloned().collect()
    }

    fn newest(&self, limit: Option<usize>) -> Vec<T> {
        let rows = self.rows.values().rev().cloned();
        match limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 0,
        }
    }
}

#[derive(Default)]
struct Tables {
    users: Table<User>,
    vehicles: Table<Vehicle>,
    telemetry: Table<Telemetry>,
    detections: Table<Detection>,
    alerts: Table<Alert>,
    risk_zones: Table<RiskZone>,
    routes: Table<Route>,
    assignments: Table<VehicleAssignment>,
}

#[derive(Clone, Default)]
pub struct Database {
    tables: Arc<RwLock<Tables>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_user(&self, id: i64) -> Option<User> {
        self.tables.read().await.users.rows.get(&id).cloned()
    }

    pub async fn get_users(&self) -> Vec<User> {
        self.tables.read().await.users.all()
    }

    pub async fn create_user(&self, new: NewUser) -> User {
        self.tables.write().await.users.insert_with(|id| User {
            id,
            username: new.username,
            full_name: new.full_name,
            email: new.email,
            role: new.role,
            created_at: Utc::now(),
        })
    }

    pub async fn get_vehicles(&self) -> Vec<Vehicle> {
        self.tables.read().await.vehicles.all()
    }

    pub async fn get_vehicle(&self, vehicle_id: &str) -> Option<Vehicle> {
        self.tables
            .read()
            .await
            .vehicles
            .rows
            .values()
            .find(|v| v.vehicle_id == vehicle_id)
            .cloned()
    }

    /// Insert a vehicle unless one with the same `vehicle_id` exists.
    /// The check and the insert hold one write lock.
    pub async fn create_vehicle(&self, new: NewVehicle) -> Option<Vehicle> {
        let mut tables = self.tables.write().await;
        if tables.vehicles.rows.values().any(|v| v.vehicle_id == new.vehicle_id) {
            return None;
        }
        Some(tables.vehicles.insert_with(|id| Vehicle {
            id,
            vehicle_id: new.vehicle_id,
            name: new.name,
            status: new.status,
            created_at: Utc::now(),
        }))
    }

    pub async fn update_vehicle(&self, vehicle_id: &str, update: VehicleUpdate) -> Option<Vehicle> {
        let mut tables = self.tables.write().await;
        let vehicle = tables.vehicles.rows.values_mut().find(|v| v.vehicle_id == vehicle_id)?;
        if let Some(name) = update.name {
            vehicle.name = name;
        }
        if let Some(status) = update.status {
            vehicle.status = status;
        }
        Some(vehicle.clone())
    }

    pub async fn get_telemetry_data(&self, limit: Option<usize>) -> Vec<Telemetry> {
        self.tables.read().await.telemetry.newest(limit)
    }

    /// Most recent fix for one vehicle
    pub async fn latest_telemetry_for(&self, vehicle_id: &str) -> Option<Telemetry> {
        self.tables
            .read()
            .await
            .telemetry
            .rows
            .values()
            .rev()
            .find(|t| t.vehicle_id == vehicle_id)
            .cloned()
    }

    pub async fn create_telemetry(&self, vehicle_id: &str, reading: TelemetryReading) -> Telemetry {
        self.tables.write().await.telemetry.insert_with(|id| Telemetry {
            id,
            vehicle_id: vehicle_id.to_string(),
            latitude: reading.latitude,
            longitude: reading.longitude,
            speed: reading.speed,
            heading: reading.heading,
            fuel_level: reading.fuel_level,
            door_status: reading.door_status,
            timestamp: Utc::now(),
        })
    }

    pub async fn get_detections(&self, limit: Option<usize>) -> Vec<Detection> {
        self.tables.read().await.detections.newest(limit)
    }

    pub async fn create_detection(&self, new: NewDetection) -> Detection {
        self.tables.write().await.detections.insert_with(|id| Detection {
            id,
            vehicle_id: new.vehicle_id,
            detection_type: new.detection_type,
            confidence: new.confidence,
            camera_id: new.camera_id,
            image_url: new.image_url,
            metadata: new.metadata,
            timestamp: Utc::now(),
        })
    }

    pub async fn get_alerts(&self, limit: Option<usize>) -> Vec<Alert> {
        self.tables.read().await.alerts.newest(limit)
    }

    pub async fn get_alert(&self, id: i64) -> Option<Alert> {
        self.tables.read().await.alerts.rows.get(&id).cloned()
    }

    pub async fn create_alert(&self, new: NewAlert) -> Alert {
        self.tables.write().await.alerts.insert_with(|id| Alert {
            id,
            vehicle_id: new.vehicle_id,
            alert_type: new.alert_type,
            message: new.message,
            severity: new.severity,
            acknowledged: false,
            timestamp: Utc::now(),
            metadata: new.metadata,
        })
    }

    /// Flip `acknowledged` to true. Returns `None` for an unknown id.
    pub async fn acknowledge_alert(&self, id: i64) -> Option<Alert> {
        let mut tables = self.tables.write().await;
        let alert = tables.alerts.rows.get_mut(&id)?;
        alert.acknowledged = true;
        Some(alert.clone())
    }

    pub async fn get_risk_zones(&self) -> Vec<RiskZone> {
        self.tables.read().await.risk_zones.all()
    }

    pub async fn create_risk_zone(&self, new: NewRiskZone) -> RiskZone {
        self.tables.write().await.risk_zones.insert_with(|id| RiskZone {
            id,
            name: new.name,
            latitude: new.latitude,
            longitude: new.longitude,
            radius_meters: new.radius_meters,
            risk_level: new.risk_level,
            created_at: Utc::now(),
        })
    }

    pub async fn get_routes(&self) -> Vec<Route> {
        self.tables.read().await.routes.all()
    }

    pub async fn create_route(&self, new: NewRoute) -> Route {
        self.tables.write().await.routes.insert_with(|id| Route {
            id,
            vehicle_id: new.vehicle_id,
            name: new.name,
            waypoints: new.waypoints,
            created_at: Utc::now(),
        })
    }

    pub async fn get_vehicle_assignments(&self) -> Vec<VehicleAssignment> {
        self.tables.read().await.assignments.all()
    }

    pub async fn get_vehicle_assignments_by_user_id(&self, user_id: i64) -> Vec<VehicleAssignment> {
        self.tables
            .read()
            .await
            .assignments
            .rows
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Admins see every assignment, everyone else only their own
    pub async fn assignments_visible_to(&self, user: &User) -> Vec<VehicleAssignment> {
        if user.is_admin() {
            self.get_vehicle_assignments().await
        } else {
            self.get_vehicle_assignments_by_user_id(user.id).await
        }
    }

    pub async fn create_vehicle_assignment(&self, new: NewVehicleAssignment) -> VehicleAssignment {
        self.tables.write().await.assignments.insert_with(|id| VehicleAssignment {
            id,
            user_id: new.user_id,
            vehicle_id: new.vehicle_id,
            active: true,
            assigned_at: Utc::now(),
        })
    }

    pub async fn update_vehicle_assignment(&self, id: i64, update: AssignmentUpdate) -> Option<VehicleAssignment> {
        let mut tables = self.tables.write().await;
        let assignment = tables.assignments.rows.get_mut(&id)?;
        if let Some(vehicle_id) = update.vehicle_id {
            assignment.vehicle_id = vehicle_id;
        }
        if let Some(active) = update.active {
            assignment.active = active;
        }
        Some(assignment.clone())
    }
}
