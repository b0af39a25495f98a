//! Read-only access to vehicle and energy reference data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::entities::{Energy, EnergyId, Vehicle, VehicleId};

/// Lookup contract the calculator reads reference data through.
///
/// Implementations must not mutate records on read.
pub trait ReferenceData {
    fn vehicle(&self, id: &str) -> Option<Vehicle>;
    fn energy(&self, id: &str) -> Option<Energy>;
}

/// Vehicles and energies held in memory, keyed by identifier.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReferenceStore {
    vehicles: HashMap<VehicleId, Vehicle>,
    energies: HashMap<EnergyId, Energy>,
}

/// On-disk shape of a reference data file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReferenceSnapshot {
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub energies: Vec<Energy>,
}

impl InMemoryReferenceStore {
    pub fn new(vehicles: Vec<Vehicle>, energies: Vec<Energy>) -> Self {
        Self {
            vehicles: vehicles.into_iter().map(|v| (v.id.clone(), v)).collect(),
            energies: energies.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let snapshot: ReferenceSnapshot = serde_json::from_str(raw)?;
        Ok(Self::from(snapshot))
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn energy_count(&self) -> usize {
        self.energies.len()
    }
}

impl From<ReferenceSnapshot> for InMemoryReferenceStore {
    fn from(snapshot: ReferenceSnapshot) -> Self {
        Self::new(snapshot.vehicles, snapshot.energies)
    }
}

impl ReferenceData for InMemoryReferenceStore {
    fn vehicle(&self, id: &str) -> Option<Vehicle> {
        self.vehicles.get(id).cloned()
    }

    fn energy(&self, id: &str) -> Option<Energy> {
        self.energies.get(id).cloned()
    }
}

impl<T: ReferenceData + ?Sized> ReferenceData for &T {
    fn vehicle(&self, id: &str) -> Option<Vehicle> {
        (**self).vehicle(id)
    }

    fn energy(&self, id: &str) -> Option<Energy> {
        (**self).energy(id)
    }
}

impl<T: ReferenceData + ?Sized> ReferenceData for std::sync::Arc<T> {
    fn vehicle(&self, id: &str) -> Option<Vehicle> {
        (**self).vehicle(id)
    }

    fn energy(&self, id: &str) -> Option<Energy> {
        (**self).energy(id)
    }
}
