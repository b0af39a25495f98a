//! Recompute service: owns the transports, resolves missing distances and
//! writes computed emissions back under each transport's lock.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    apply_evaluation, evaluate_transport, CalculationError, DistanceSource, Phase, ReferenceData,
    Tier, Transport, TransportDraft,
};
use crate::infra::distance::{DistanceResolver, ResolvedDistance};
use crate::infra::registry::{EntryHandle, RegistryError, TransportEntry, TransportRegistry};

/// Partial edit of a transport's inputs. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransportUpdate {
    pub origine: Option<String>,
    pub destination: Option<String>,
    pub distance_km: Option<f64>,
    pub poids_tonnes: Option<f64>,
    pub type_vehicule: Option<String>,
    pub energie: Option<String>,
    pub conso_vehicule: Option<f64>,
    pub niveau_calcul: Option<Tier>,
}

impl TransportUpdate {
    fn is_empty(&self) -> bool {
        self.origine.is_none()
            && self.destination.is_none()
            && self.distance_km.is_none()
            && self.poids_tonnes.is_none()
            && self.type_vehicule.is_none()
            && self.energie.is_none()
            && self.conso_vehicule.is_none()
            && self.niveau_calcul.is_none()
    }

    fn apply(self, transport: &mut Transport) {
        let mut route_changed = false;
        if let Some(origine) = self.origine.map(|v| v.trim().to_string()) {
            route_changed |= origine != transport.origine;
            transport.origine = origine;
        }
        if let Some(destination) = self.destination.map(|v| v.trim().to_string()) {
            route_changed |= destination != transport.destination;
            transport.destination = destination;
        }

        match self.distance_km {
            Some(km) => {
                transport.distance_km = Some(km);
                transport.distance_source = DistanceSource::Declared;
            }
            // A resolved distance belongs to the old route.
            None if route_changed && transport.distance_source != DistanceSource::Declared => {
                transport.distance_km = None;
            }
            None => {}
        }

        if let Some(weight) = self.poids_tonnes {
            transport.poids_tonnes = Some(weight);
        }
        if let Some(vehicle) = self.type_vehicule {
            transport.type_vehicule = Some(vehicle).filter(|v| !v.trim().is_empty());
        }
        if let Some(energy) = self.energie {
            transport.energie = Some(energy).filter(|v| !v.trim().is_empty());
        }
        if let Some(conso) = self.conso_vehicule {
            transport.conso_vehicule = Some(conso);
        }
        if let Some(tier) = self.niveau_calcul {
            transport.niveau_calcul = tier;
        }
    }
}

/// What one recompute produced for one transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecomputeOutcome {
    #[serde(rename = "ref")]
    pub reference: String,
    pub success: bool,
    pub emis_kg: f64,
    pub emis_tkm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CalculationError>,
    pub distance_source: DistanceSource,
    /// Some distance used is the fixed placeholder.
    pub low_confidence: bool,
}

/// Result of a "recalculate all" run.
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub results: Vec<RecomputeOutcome>,
    pub succes: usize,
    pub erreurs: usize,
}

pub struct EmissionsService<R> {
    registry: TransportRegistry,
    reference: Arc<R>,
    distances: DistanceResolver,
}

impl<R> Clone for EmissionsService<R> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            reference: Arc::clone(&self.reference),
            distances: self.distances.clone(),
        }
    }
}

impl<R> EmissionsService<R>
where
    R: ReferenceData + Send + Sync + 'static,
{
    pub fn new(reference: Arc<R>, distances: DistanceResolver) -> Self {
        Self {
            registry: TransportRegistry::new(),
            reference,
            distances,
        }
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    /// Adds a transport in the `stale` state. Nothing is computed yet.
    pub async fn register(&self, transport: Transport) -> Result<(), RegistryError> {
        let reference = transport.reference().to_string();
        self.registry
            .insert(self.fill_vehicle_defaults(transport))
            .await?;
        debug!(transport = %reference, "registered");
        Ok(())
    }

    pub async fn register_draft(&self, draft: TransportDraft) -> Result<(), RegistryError> {
        self.register(Transport::try_from(draft)?).await
    }

    /// Current transport and state, read under the transport's lock.
    pub async fn get(&self, reference: &str) -> Result<TransportEntry, RegistryError> {
        let handle = self.registry.handle(reference).await?;
        let entry = handle.lock().await;
        Ok(entry.clone())
    }

    /// Edits inputs and marks the transport stale. Computed fields keep their
    /// previous values until the next recompute.
    pub async fn update(
        &self,
        reference: &str,
        update: TransportUpdate,
    ) -> Result<TransportEntry, RegistryError> {
        let handle = self.registry.handle(reference).await?;
        let mut entry = handle.lock().await;
        if !update.is_empty() {
            let vehicle_changed = update.type_vehicule.is_some();
            update.apply(&mut entry.transport);
            if vehicle_changed {
                entry.transport = self.fill_vehicle_defaults(entry.transport.clone());
            }
            entry.touch();
            debug!(
                transport = %entry.transport.reference(),
                state = entry.state.label(),
                "inputs changed"
            );
        }
        Ok(entry.clone())
    }

    /// Drops a transport, waiting for any recompute in flight to finish.
    pub async fn remove(&self, reference: &str) -> Result<Transport, RegistryError> {
        let transport = self.registry.remove(reference).await?;
        debug!(transport = %transport.reference(), "removed");
        Ok(transport)
    }

    /// Edit then recompute.
    pub async fn save(
        &self,
        reference: &str,
        update: TransportUpdate,
    ) -> Result<RecomputeOutcome, RegistryError> {
        self.update(reference, update).await?;
        self.recompute(reference).await
    }

    /// Inserts a phase, replacing any phase with the same `ordre`, then recomputes.
    pub async fn upsert_phase(
        &self,
        reference: &str,
        phase: Phase,
    ) -> Result<RecomputeOutcome, RegistryError> {
        let handle = self.registry.handle(reference).await?;
        {
            let mut entry = handle.lock().await;
            let phases = &mut entry.transport.phases;
            match phases.iter_mut().find(|p| p.ordre == phase.ordre) {
                Some(existing) => *existing = phase,
                None => phases.push(phase),
            }
            entry.touch();
        }
        Ok(self.recompute_entry(&handle).await)
    }

    pub async fn remove_phase(
        &self,
        reference: &str,
        ordre: i32,
    ) -> Result<RecomputeOutcome, RegistryError> {
        let handle = self.registry.handle(reference).await?;
        {
            let mut entry = handle.lock().await;
            let before = entry.transport.phases.len();
            entry.transport.phases.retain(|p| p.ordre != ordre);
            if entry.transport.phases.len() == before {
                return Err(RegistryError::PhaseNotFound {
                    reference: reference.to_string(),
                    ordre,
                });
            }
            entry.touch();
        }
        Ok(self.recompute_entry(&handle).await)
    }

    pub async fn recompute(&self, reference: &str) -> Result<RecomputeOutcome, RegistryError> {
        let handle = self.registry.handle(reference).await?;
        Ok(self.recompute_entry(&handle).await)
    }

    /// Recomputes every transport independently; failures are reported per
    /// transport and never stop the run.
    pub async fn recalculate_all(&self) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started_at = OffsetDateTime::now_utc();
        let refs = self.registry.refs().await;
        info!(%run_id, transports = refs.len(), "recalculating all transports");

        let mut tasks = JoinSet::new();
        for reference in refs {
            let service = self.clone();
            tasks.spawn(async move {
                let outcome = service.recompute(&reference).await;
                (reference, outcome)
            });
        }

        let mut results = Vec::new();
        let mut lost = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => results.push(outcome),
                // Removed while the run was in flight.
                Ok((reference, Err(err))) => {
                    debug!(%run_id, transport = %reference, error = %err, "skipped");
                }
                Err(err) => {
                    error!(%run_id, error = %err, "recompute task aborted");
                    lost += 1;
                }
            }
        }
        results.sort_by(|a, b| a.reference.cmp(&b.reference));

        let succes = results.iter().filter(|r| r.success).count();
        let erreurs = results.len() - succes + lost;
        info!(%run_id, succes, erreurs, "recalculation finished");

        BatchReport {
            run_id,
            started_at,
            results,
            succes,
            erreurs,
        }
    }

    /// Missing distances are resolved before the transport is locked. Nothing
    /// awaits between `begin` and `finish`.
    async fn recompute_entry(&self, handle: &EntryHandle) -> RecomputeOutcome {
        let pending = pending_routes(&handle.lock().await.transport);
        let mut resolved = Vec::with_capacity(pending.len());
        for route in pending {
            let distance = self.distances.resolve(&route.origine, &route.destination).await;
            resolved.push((route, distance));
        }

        let mut entry = handle.lock().await;
        for (route, distance) in &resolved {
            route.fill(&mut entry.transport, distance);
        }
        entry.state.begin();

        let evaluation = evaluate_transport(&entry.transport, &*self.reference);
        apply_evaluation(&mut entry.transport, &evaluation);
        let result = evaluation.result;

        match &result.error {
            None => {
                entry.state.finish(Ok(()));
                debug!(
                    transport = %entry.transport.reference(),
                    emis_kg = result.emis_kg,
                    emis_tkm = result.emis_tkm,
                    "computed"
                );
            }
            Some(err) => {
                entry.state.finish(Err(err.clone()));
                warn!(transport = %entry.transport.reference(), error = %err, "recompute failed");
            }
        }
        entry.updated_at = OffsetDateTime::now_utc();

        let transport = &entry.transport;
        RecomputeOutcome {
            reference: transport.reference().to_string(),
            success: result.success,
            emis_kg: result.emis_kg,
            emis_tkm: result.emis_tkm,
            error: result.error,
            distance_source: transport.distance_source,
            low_confidence: transport.distance_source.is_low_confidence()
                || transport
                    .phases
                    .iter()
                    .any(|p| p.distance_source.is_low_confidence()),
        }
    }

    /// Consumption-centric tiers take undeclared consumption and energy from
    /// the transport's vehicle. Tier 1 reads the vehicle directly.
    fn fill_vehicle_defaults(&self, transport: Transport) -> Transport {
        if transport.niveau_calcul.is_vehicle_centric() {
            return transport;
        }
        match transport
            .type_vehicule
            .as_deref()
            .and_then(|id| self.reference.vehicle(id))
        {
            Some(vehicle) => transport.with_vehicle_defaults(&vehicle),
            None => transport,
        }
    }
}

/// A leg whose distance was missing when a recompute started. `ordre` is
/// `None` for the transport itself.
struct PendingRoute {
    ordre: Option<i32>,
    origine: String,
    destination: String,
}

fn distance_missing(km: Option<f64>) -> bool {
    km.map_or(true, |km| km <= 0.0)
}

/// Phased transports are computed from their legs only.
fn pending_routes(transport: &Transport) -> Vec<PendingRoute> {
    let routable = |km: Option<f64>, origine: &str, destination: &str| {
        distance_missing(km) && !origine.is_empty() && !destination.is_empty()
    };
    if transport.has_phases() {
        transport
            .phases
            .iter()
            .filter(|p| routable(p.distance_km, &p.origine, &p.destination))
            .map(|p| PendingRoute {
                ordre: Some(p.ordre),
                origine: p.origine.clone(),
                destination: p.destination.clone(),
            })
            .collect()
    } else if routable(
        transport.distance_km,
        &transport.origine,
        &transport.destination,
    ) {
        vec![PendingRoute {
            ordre: None,
            origine: transport.origine.clone(),
            destination: transport.destination.clone(),
        }]
    } else {
        Vec::new()
    }
}

impl PendingRoute {
    /// Writes the distance unless the leg was edited while it was resolving.
    fn fill(&self, transport: &mut Transport, distance: &ResolvedDistance) {
        let slot = match self.ordre {
            None if !transport.has_phases() => Some((
                &mut transport.distance_km,
                &mut transport.distance_source,
                transport.origine.as_str(),
                transport.destination.as_str(),
            )),
            None => None,
            Some(ordre) => transport
                .phases
                .iter_mut()
                .find(|p| p.ordre == ordre)
                .map(|p| {
                    (
                        &mut p.distance_km,
                        &mut p.distance_source,
                        p.origine.as_str(),
                        p.destination.as_str(),
                    )
                }),
        };
        if let Some((km, source, origine, destination)) = slot {
            if distance_missing(*km) && origine == self.origine && destination == self.destination {
                *km = Some(distance.km);
                *source = distance.source;
            }
        }
    }
}
