//! Demo fleet loaded at startup

use tracing::{info, warn};

use super::{Database, NewRiskZone, NewUser, NewVehicle, NewVehicleAssignment, Role, Severity};

pub async fn seed_demo_data(db: &Database) {
    let admin = db
        .create_user(NewUser {
            username: "admin".to_string(),
            full_name: "Fleet Administrator".to_string(),
            email: "admin@example.com".to_string(),
            role: Role::Admin,
        })
        .await;
    let operator = db
        .create_user(NewUser {
            username: "operator".to_string(),
            full_name: "Control Room Operator".to_string(),
            email: "operator@example.com".to_string(),
            role: Role::Operator,
        })
        .await;

    for (vehicle_id, name) in [("CIT-01", "Armoured Van 01"), ("CIT-02", "Armoured Van 02")] {
        let created = db
            .create_vehicle(NewVehicle {
                vehicle_id: vehicle_id.to_string(),
                name: name.to_string(),
                status: "idle".to_string(),
            })
            .await;
        if created.is_none() {
            warn!(vehicle_id, "Demo vehicle already present, skipping");
        }
    }

    db.create_vehicle_assignment(NewVehicleAssignment { user_id: admin.id, vehicle_id: "CIT-01".to_string() })
        .await;
    db.create_vehicle_assignment(NewVehicleAssignment { user_id: operator.id, vehicle_id: "CIT-02".to_string() })
        .await;

    db.create_risk_zone(NewRiskZone {
        name: "Downtown cash centre".to_string(),
        latitude: -26.2041,
        longitude: 28.0473,
        radius_meters: 500.0,
        risk_level: Severity::Warning,
    })
    .await;

    info!("Seeded demo fleet (2 users, 2 vehicles)");
}
