//! Distance resolution: live routing, then the static city table, then a
//! fixed placeholder.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::domain::DistanceSource;
use crate::infra::cache::DistanceCache;
use crate::infra::routing::RoutingClient;
use crate::util::assets::{load_text, CITY_DISTANCES};
use crate::util::config::DEFAULT_DISTANCE_KM;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedDistance {
    pub km: f64,
    pub source: DistanceSource,
}

#[derive(Debug, Deserialize)]
struct CityTableFile {
    cities: Vec<String>,
    pairs: Vec<(String, String, f64)>,
}

/// Known road distances between major cities.
///
/// Low fidelity by nature: a stand-in until routing is configured.
#[derive(Clone, Debug, Default)]
pub struct CityTable {
    /// (folded needle, canonical name), in file order.
    cities: Vec<(String, String)>,
    pairs: HashMap<(String, String), f64>,
}

impl CityTable {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: CityTableFile = serde_json::from_str(raw)?;
        Ok(Self {
            cities: file
                .cities
                .into_iter()
                .map(|name| (fold(&name), name))
                .collect(),
            pairs: file
                .pairs
                .into_iter()
                .map(|(a, b, km)| ((a, b), km))
                .collect(),
        })
    }

    /// The table compiled into the binary. Empty if the asset is unreadable.
    pub fn embedded() -> &'static CityTable {
        static TABLE: OnceLock<CityTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            let parsed = load_text(CITY_DISTANCES)
                .ok_or_else(|| "asset missing".to_string())
                .and_then(|raw| CityTable::from_json(&raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(table) => table,
                Err(reason) => {
                    error!(%reason, "city distance table unavailable");
                    CityTable::default()
                }
            }
        })
    }

    /// Canonical city for a free-text label (`"Paris 15ème"` -> `"Paris"`).
    pub fn normalize(&self, label: &str) -> Option<&str> {
        let folded = fold(label);
        if folded.is_empty() {
            return None;
        }
        self.cities
            .iter()
            .find(|(needle, _)| folded.contains(needle.as_str()))
            .map(|(_, canonical)| canonical.as_str())
    }

    /// Symmetric lookup: (A, B) then (B, A).
    pub fn lookup(&self, origin: &str, destination: &str) -> Option<f64> {
        let a = self.normalize(origin)?;
        let b = self.normalize(destination)?;
        self.pairs
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| self.pairs.get(&(b.to_string(), a.to_string())))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Trimmed, lowercased, with French diacritics stripped, so `"Orleans"`
/// matches `"Orléans"`.
fn fold(label: &str) -> String {
    let mut folded = String::with_capacity(label.len());
    for c in label.trim().chars().flat_map(char::to_lowercase) {
        match c {
            'à' | 'â' | 'ä' | 'á' | 'ã' => folded.push('a'),
            'é' | 'è' | 'ê' | 'ë' => folded.push('e'),
            'î' | 'ï' | 'í' | 'ì' => folded.push('i'),
            'ô' | 'ö' | 'ó' | 'ò' | 'õ' => folded.push('o'),
            'ù' | 'û' | 'ü' | 'ú' => folded.push('u'),
            'ç' => folded.push('c'),
            'ÿ' => folded.push('y'),
            'ñ' => folded.push('n'),
            'œ' => folded.push_str("oe"),
            'æ' => folded.push_str("ae"),
            other => folded.push(other),
        }
    }
    folded
}

/// Resolves a distance for a pair of place labels. Never fails.
#[derive(Clone)]
pub struct DistanceResolver {
    routing: Option<RoutingClient>,
    table: &'static CityTable,
    default_km: f64,
    cache: Arc<Mutex<DistanceCache>>,
}

impl DistanceResolver {
    pub fn new(routing: Option<RoutingClient>) -> Self {
        let routing = routing.filter(|client| {
            if !client.is_configured() {
                debug!("routing client has no API key, using city table only");
            }
            client.is_configured()
        });
        Self {
            routing,
            table: CityTable::embedded(),
            default_km: DEFAULT_DISTANCE_KM,
            cache: Arc::new(Mutex::new(DistanceCache::default())),
        }
    }

    /// Table and default only.
    pub fn offline() -> Self {
        Self::new(None)
    }

    pub fn with_default_km(mut self, default_km: f64) -> Self {
        if default_km.is_finite() && default_km > 0.0 {
            self.default_km = default_km;
        }
        self
    }

    pub fn with_cache(mut self, cache: DistanceCache) -> Self {
        self.cache = Arc::new(Mutex::new(cache));
        self
    }

    pub async fn cache_snapshot(&self) -> DistanceCache {
        self.cache.lock().await.clone()
    }

    pub async fn resolve_km(&self, origin: &str, destination: &str) -> f64 {
        self.resolve(origin, destination).await.km
    }

    pub async fn resolve(&self, origin: &str, destination: &str) -> ResolvedDistance {
        if let Some(km) = self.cache.lock().await.get(origin, destination) {
            debug!(origin, destination, km, "distance served from cache");
            return ResolvedDistance {
                km,
                source: DistanceSource::Routing,
            };
        }

        if let Some(client) = &self.routing {
            match client.driving_distance_km(origin, destination).await {
                Ok(km) => {
                    self.cache.lock().await.insert(origin, destination, km);
                    debug!(origin, destination, km, "distance from routing");
                    return ResolvedDistance {
                        km,
                        source: DistanceSource::Routing,
                    };
                }
                Err(error) => {
                    warn!(origin, destination, %error, "routing failed, using city table");
                }
            }
        }

        if let Some(km) = self.table.lookup(origin, destination) {
            debug!(origin, destination, km, "distance from city table");
            return ResolvedDistance {
                km,
                source: DistanceSource::Table,
            };
        }

        warn!(
            origin,
            destination,
            km = self.default_km,
            "no known distance, using placeholder"
        );
        ResolvedDistance {
            km: self.default_km,
            source: DistanceSource::Default,
        }
    }
}
