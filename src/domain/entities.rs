//! Transport, phase and reference records.
//!
//! Records arrive as loosely-typed drafts (JSON, CSV rows, API payloads) and are
//! converted into validated types with `TryFrom`. Everything past that boundary
//! can rely on closed enums and finite numbers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier for vehicles in the reference store.
pub type VehicleId = String;

/// Identifier for energies in the reference store.
pub type EnergyId = String;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("transport reference must not be empty")]
    EmptyRef,
    #[error("unknown calculation tier: {0:?}")]
    UnknownTier(String),
    #[error("unknown phase type: {0:?}")]
    UnknownPhaseType(String),
    #[error("unknown consumption unit: {0:?}")]
    UnknownUnit(String),
    #[error("field `{0}` must be a finite number")]
    NonFinite(&'static str),
}

/// Calculation methodology selected per transport (`niveau_calcul`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Tier {
    /// Standardized vehicle ratings.
    Niveau1,
    /// Declared consumption and energy factor, from here down.
    #[default]
    Niveau2,
    Niveau3,
    Niveau4,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Niveau1 => "niveau_1",
            Tier::Niveau2 => "niveau_2",
            Tier::Niveau3 => "niveau_3",
            Tier::Niveau4 => "niveau_4",
        }
    }

    pub fn is_vehicle_centric(&self) -> bool {
        matches!(self, Tier::Niveau1)
    }
}

impl FromStr for Tier {
    type Err = ModelError;

    /// Accepts the stored forms (`niveau_1`, `Niveau 1`, `niveau_1_standard`...).
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let folded = raw.trim().to_lowercase().replace([' ', '-'], "_");
        let unknown = || ModelError::UnknownTier(raw.to_string());
        let rest = folded
            .find("niveau_")
            .map(|at| &folded[at + "niveau_".len()..])
            .ok_or_else(unknown)?;

        let mut chars = rest.chars();
        let tier = match chars.next() {
            Some('1') => Tier::Niveau1,
            Some('2') => Tier::Niveau2,
            Some('3') => Tier::Niveau3,
            Some('4') => Tier::Niveau4,
            _ => return Err(unknown()),
        };
        // `niveau_1` alone or with a `_label` suffix; never `niveau_10`.
        match (chars.next(), chars.next()) {
            (None, _) => Ok(tier),
            (Some('_'), Some(c)) if !c.is_ascii_digit() => Ok(tier),
            _ => Err(unknown()),
        }
    }
}

impl TryFrom<String> for Tier {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tier> for String {
    fn from(value: Tier) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leg of a multi-step transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PhaseType {
    /// Pickup.
    Collecte,
    /// Long-haul.
    Traction,
    /// Final delivery.
    Distribution,
}

impl PhaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseType::Collecte => "collecte",
            PhaseType::Traction => "traction",
            PhaseType::Distribution => "distribution",
        }
    }
}

impl FromStr for PhaseType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "collecte" => Ok(PhaseType::Collecte),
            "traction" => Ok(PhaseType::Traction),
            "distribution" => Ok(PhaseType::Distribution),
            _ => Err(ModelError::UnknownPhaseType(raw.to_string())),
        }
    }
}

impl TryFrom<String> for PhaseType {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PhaseType> for String {
    fn from(value: PhaseType) -> Self {
        value.as_str().to_string()
    }
}

/// Unit a phase's declared consumption is expressed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConsumptionUnit {
    #[default]
    LitresPer100Km,
    KwhPer100Km,
    KgPer100Km,
    LitresPerKm,
    KwhPerKm,
    KgPerKm,
}

impl ConsumptionUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionUnit::LitresPer100Km => "L/100km",
            ConsumptionUnit::KwhPer100Km => "kWh/100km",
            ConsumptionUnit::KgPer100Km => "kg/100km",
            ConsumptionUnit::LitresPerKm => "L/km",
            ConsumptionUnit::KwhPerKm => "kWh/km",
            ConsumptionUnit::KgPerKm => "kg/km",
        }
    }

    /// Converts a consumption in this unit to the same quantity per 100 km.
    pub fn to_per_100km(&self, value: f64) -> f64 {
        match self {
            ConsumptionUnit::LitresPer100Km
            | ConsumptionUnit::KwhPer100Km
            | ConsumptionUnit::KgPer100Km => value,
            ConsumptionUnit::LitresPerKm | ConsumptionUnit::KwhPerKm | ConsumptionUnit::KgPerKm => {
                value * 100.0
            }
        }
    }
}

impl FromStr for ConsumptionUnit {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let folded: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match folded.as_str() {
            "l/100km" | "l" => Ok(ConsumptionUnit::LitresPer100Km),
            "kwh/100km" | "kwh" => Ok(ConsumptionUnit::KwhPer100Km),
            "kg/100km" | "kg" => Ok(ConsumptionUnit::KgPer100Km),
            "l/km" => Ok(ConsumptionUnit::LitresPerKm),
            "kwh/km" => Ok(ConsumptionUnit::KwhPerKm),
            "kg/km" => Ok(ConsumptionUnit::KgPerKm),
            _ => Err(ModelError::UnknownUnit(raw.to_string())),
        }
    }
}

impl TryFrom<String> for ConsumptionUnit {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConsumptionUnit> for String {
    fn from(value: ConsumptionUnit) -> Self {
        value.as_str().to_string()
    }
}

/// Where a transport's `distance_km` came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceSource {
    /// Entered with the transport.
    #[default]
    Declared,
    Routing,
    Table,
    /// Placeholder value; callers should flag it.
    Default,
}

impl DistanceSource {
    pub fn is_low_confidence(&self) -> bool {
        matches!(self, DistanceSource::Default)
    }
}

/// Vehicle reference record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    #[serde(default)]
    pub nom: String,
    /// Fuel or energy per 100 km.
    #[serde(default)]
    pub consommation: Option<f64>,
    /// Direct emission intensity in grams.
    #[serde(default)]
    pub emissions: Option<f64>,
    /// Payload capacity in tonnes.
    #[serde(default)]
    pub charge_utile: Option<f64>,
    #[serde(default)]
    pub energie_id: Option<EnergyId>,
}

/// Energy reference record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Energy {
    pub id: EnergyId,
    #[serde(default)]
    pub nom: String,
    #[serde(default)]
    pub facteur: Option<f64>,
    /// Upstream (well-to-tank) share.
    #[serde(default)]
    pub phase_amont: Option<f64>,
    /// Combustion / use (tank-to-wheel) share.
    #[serde(default)]
    pub phase_fonctionnement: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub unite: Option<String>,
}

impl Energy {
    /// Authoritative multiplier: `facteur`, then `total`, then the sum of both phases.
    pub fn emission_factor(&self) -> Option<f64> {
        self.facteur
            .or(self.total)
            .or_else(|| match (self.phase_amont, self.phase_fonctionnement) {
                (Some(amont), Some(fonctionnement)) => Some(amont + fonctionnement),
                _ => None,
            })
            .filter(|factor| factor.is_finite() && *factor != 0.0)
    }
}

/// One leg of a phased transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Phase {
    #[serde(rename = "type")]
    pub kind: PhaseType,
    pub ordre: i32,
    pub origine: String,
    pub destination: String,
    pub distance_km: Option<f64>,
    pub distance_source: DistanceSource,
    pub poids_tonnes: Option<f64>,
    /// Tare / operating weight of the vehicle, tonnes.
    pub poids_vehicule: Option<f64>,
    pub vehicule_id: Option<VehicleId>,
    pub energie: Option<EnergyId>,
    pub consommation: Option<f64>,
    pub unite_consommation: ConsumptionUnit,
    pub emis_vehicule: Option<f64>,
    pub emis_transport: Option<f64>,
    pub emis_total: Option<f64>,
    pub emis_tkm: Option<f64>,
}

impl Phase {
    pub fn new(kind: PhaseType, ordre: i32) -> Self {
        Self {
            kind,
            ordre,
            origine: String::new(),
            destination: String::new(),
            distance_km: None,
            distance_source: DistanceSource::Declared,
            poids_tonnes: None,
            poids_vehicule: None,
            vehicule_id: None,
            energie: None,
            consommation: None,
            unite_consommation: ConsumptionUnit::default(),
            emis_vehicule: None,
            emis_transport: None,
            emis_total: None,
            emis_tkm: None,
        }
    }

    /// Declared consumption normalized to per-100-km.
    pub fn consumption_per_100km(&self) -> Option<f64> {
        self.consommation
            .map(|value| self.unite_consommation.to_per_100km(value))
    }
}

/// A registered transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transport {
    #[serde(rename = "ref")]
    reference: String,
    pub origine: String,
    pub destination: String,
    pub distance_km: Option<f64>,
    pub distance_source: DistanceSource,
    pub poids_tonnes: Option<f64>,
    pub type_vehicule: Option<VehicleId>,
    pub energie: Option<EnergyId>,
    pub conso_vehicule: Option<f64>,
    pub niveau_calcul: Tier,
    pub emis_kg: Option<f64>,
    pub emis_tkm: Option<f64>,
    pub phases: Vec<Phase>,
}

impl Transport {
    pub fn new(reference: impl Into<String>, tier: Tier) -> Result<Self, ModelError> {
        let reference = reference.into().trim().to_string();
        if reference.is_empty() {
            return Err(ModelError::EmptyRef);
        }
        Ok(Self {
            reference,
            origine: String::new(),
            destination: String::new(),
            distance_km: None,
            distance_source: DistanceSource::Declared,
            poids_tonnes: None,
            type_vehicule: None,
            energie: None,
            conso_vehicule: None,
            niveau_calcul: tier,
            emis_kg: None,
            emis_tkm: None,
            phases: Vec::new(),
        })
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn has_phases(&self) -> bool {
        !self.phases.is_empty()
    }

    /// Fills undeclared propulsion fields from the vehicle's own rating.
    pub fn with_vehicle_defaults(mut self, vehicle: &Vehicle) -> Self {
        if self.type_vehicule.is_none() {
            self.type_vehicule = Some(vehicle.id.clone());
        }
        if self.conso_vehicule.is_none() {
            self.conso_vehicule = vehicle.consommation;
        }
        if self.energie.is_none() {
            self.energie = vehicle.energie_id.clone();
        }
        self
    }
}

/// Unvalidated phase as read from JSON or CSV.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PhaseDraft {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ordre: i32,
    #[serde(default)]
    pub origine: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub poids_tonnes: Option<f64>,
    #[serde(default)]
    pub poids_vehicule: Option<f64>,
    #[serde(default)]
    pub vehicule_id: Option<String>,
    #[serde(default)]
    pub energie: Option<String>,
    #[serde(default)]
    pub consommation: Option<f64>,
    #[serde(default)]
    pub unite_consommation: Option<String>,
}

impl TryFrom<PhaseDraft> for Phase {
    type Error = ModelError;

    fn try_from(draft: PhaseDraft) -> Result<Self, Self::Error> {
        let mut phase = Phase::new(draft.kind.parse()?, draft.ordre);
        phase.origine = draft.origine.trim().to_string();
        phase.destination = draft.destination.trim().to_string();
        phase.distance_km = finite("distance_km", draft.distance_km)?;
        phase.poids_tonnes = finite("poids_tonnes", draft.poids_tonnes)?;
        phase.poids_vehicule = finite("poids_vehicule", draft.poids_vehicule)?;
        phase.vehicule_id = non_blank(draft.vehicule_id);
        phase.energie = non_blank(draft.energie);
        phase.consommation = finite("consommation", draft.consommation)?;
        if let Some(unit) = non_blank(draft.unite_consommation) {
            phase.unite_consommation = unit.parse()?;
        }
        Ok(phase)
    }
}

/// Unvalidated transport as read from JSON or CSV.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TransportDraft {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub origine: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub poids_tonnes: Option<f64>,
    #[serde(default)]
    pub type_vehicule: Option<String>,
    #[serde(default)]
    pub energie: Option<String>,
    #[serde(default)]
    pub conso_vehicule: Option<f64>,
    #[serde(default)]
    pub niveau_calcul: Option<String>,
    #[serde(default)]
    pub phases: Vec<PhaseDraft>,
}

impl TryFrom<TransportDraft> for Transport {
    type Error = ModelError;

    fn try_from(draft: TransportDraft) -> Result<Self, Self::Error> {
        let tier = match non_blank(draft.niveau_calcul) {
            Some(raw) => raw.parse()?,
            None => Tier::default(),
        };
        let mut transport = Transport::new(draft.reference, tier)?;
        transport.origine = draft.origine.trim().to_string();
        transport.destination = draft.destination.trim().to_string();
        transport.distance_km = finite("distance_km", draft.distance_km)?;
        transport.poids_tonnes = finite("poids_tonnes", draft.poids_tonnes)?;
        transport.type_vehicule = non_blank(draft.type_vehicule);
        transport.energie = non_blank(draft.energie);
        transport.conso_vehicule = finite("conso_vehicule", draft.conso_vehicule)?;
        transport.phases = draft
            .phases
            .into_iter()
            .map(Phase::try_from)
            .collect::<Result<_, _>>()?;
        Ok(transport)
    }
}

fn finite(field: &'static str, value: Option<f64>) -> Result<Option<f64>, ModelError> {
    match value {
        Some(v) if !v.is_finite() => Err(ModelError::NonFinite(field)),
        other => Ok(other),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parses_stored_variants() {
        assert_eq!("niveau_1".parse::<Tier>().unwrap(), Tier::Niveau1);
        assert_eq!(" Niveau 3 ".parse::<Tier>().unwrap(), Tier::Niveau3);
        assert_eq!("niveau_4_mesure".parse::<Tier>().unwrap(), Tier::Niveau4);
        assert_eq!(
            "niveau_9".parse::<Tier>(),
            Err(ModelError::UnknownTier("niveau_9".to_string()))
        );
        for raw in [
            "niveau_10",
            "niveau_1000",
            "Niveau 12",
            "niveau_1_2",
            "niveau_2x",
            "niveau",
            "",
        ] {
            assert!(raw.parse::<Tier>().is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn phase_type_rejects_unknown_values() {
        assert_eq!("Traction".parse::<PhaseType>().unwrap(), PhaseType::Traction);
        assert!(matches!(
            "livraison".parse::<PhaseType>(),
            Err(ModelError::UnknownPhaseType(_))
        ));
    }

    #[test]
    fn per_km_units_are_normalized() {
        assert_eq!(ConsumptionUnit::LitresPerKm.to_per_100km(0.3), 30.0);
        assert_eq!(ConsumptionUnit::KwhPer100Km.to_per_100km(120.0), 120.0);
        assert_eq!(
            "kWh / km".parse::<ConsumptionUnit>().unwrap(),
            ConsumptionUnit::KwhPerKm
        );
    }

    #[test]
    fn energy_factor_falls_back_to_total_then_phases() {
        let mut energy = Energy {
            id: "gazole".into(),
            nom: "Gazole".into(),
            facteur: None,
            phase_amont: Some(0.6),
            phase_fonctionnement: Some(2.5),
            total: None,
            unite: Some("kgCO2e/L".into()),
        };
        assert_eq!(energy.emission_factor(), Some(3.1));
        energy.total = Some(3.16);
        assert_eq!(energy.emission_factor(), Some(3.16));
        energy.facteur = Some(0.0);
        assert_eq!(energy.emission_factor(), None);
    }

    #[test]
    fn draft_conversion_validates_fields() {
        let draft: TransportDraft = serde_json::from_str(
            r#"{
                "ref": " TR-001 ",
                "origine": "Paris",
                "destination": "Lyon",
                "poids_tonnes": 2.0,
                "energie": "  ",
                "niveau_calcul": "niveau_2",
                "phases": [{"type": "collecte", "ordre": 1, "unite_consommation": "L/km"}]
            }"#,
        )
        .unwrap();
        let transport = Transport::try_from(draft).unwrap();
        assert_eq!(transport.reference(), "TR-001");
        assert_eq!(transport.energie, None);
        assert_eq!(transport.phases[0].unite_consommation, ConsumptionUnit::LitresPerKm);

        let empty = TransportDraft::default();
        assert_eq!(Transport::try_from(empty), Err(ModelError::EmptyRef));

        let bad = TransportDraft {
            reference: "TR-002".into(),
            niveau_calcul: Some("expert".into()),
            ..Default::default()
        };
        assert!(matches!(
            Transport::try_from(bad),
            Err(ModelError::UnknownTier(_))
        ));
    }

    #[test]
    fn vehicle_defaults_do_not_override_declared_values() {
        let vehicle = Vehicle {
            id: "porteur-19t".into(),
            nom: "Porteur 19t".into(),
            consommation: Some(28.0),
            emissions: Some(750.0),
            charge_utile: Some(9.0),
            energie_id: Some("gazole".into()),
        };
        let mut transport = Transport::new("TR-003", Tier::Niveau2).unwrap();
        transport.conso_vehicule = Some(31.0);
        let transport = transport.with_vehicle_defaults(&vehicle);
        assert_eq!(transport.conso_vehicule, Some(31.0));
        assert_eq!(transport.energie.as_deref(), Some("gazole"));
        assert_eq!(transport.type_vehicule.as_deref(), Some("porteur-19t"));
    }
}
