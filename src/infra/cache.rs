//! Caches owned by the caller of the engine.
//!
//! - [`EnergyCache`]: short-lived in-memory energy lookups with explicit invalidation.
//! - [`DistanceCache`]: routing results persisted on disk with a TTL.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Energy, EnergyId, ReferenceData, Vehicle};

const DISTANCE_CACHE_FILENAME: &str = "distance_cache.json";

/// Routing results are kept 30 days; roads don't move often.
pub const DISTANCE_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn if_fresh(&self, ttl: Duration) -> Option<T> {
        (self.fetched_at.elapsed() <= ttl).then(|| self.value.clone())
    }
}

/// Energy lookups served from memory for `ttl`, then re-read from the source.
///
/// Vehicle lookups pass straight through. Call [`EnergyCache::invalidate`]
/// after editing the energy table.
pub struct EnergyCache<S> {
    source: S,
    ttl: Duration,
    entries: Mutex<HashMap<EnergyId, Cached<Option<Energy>>>>,
}

impl<S: ReferenceData> EnergyCache<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn invalidate(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "energy cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: ReferenceData> ReferenceData for EnergyCache<S> {
    fn vehicle(&self, id: &str) -> Option<Vehicle> {
        self.source.vehicle(id)
    }

    fn energy(&self, id: &str) -> Option<Energy> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = entries.get(id).and_then(|entry| entry.if_fresh(self.ttl)) {
            return hit;
        }
        let loaded = self.source.energy(id);
        debug!(energy = id, found = loaded.is_some(), "energy cache miss");
        entries.insert(id.to_string(), Cached::new(loaded.clone()));
        loaded
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedDistance {
    pub km: f64,
    /// Unix timestamp (seconds).
    pub fetched_at: u64,
}

/// Routing distances keyed by normalized `origin|destination`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceCache {
    #[serde(default)]
    pub entries: HashMap<String, CachedDistance>,
}

impl DistanceCache {
    pub fn key(origin: &str, destination: &str) -> String {
        format!(
            "{}|{}",
            origin.trim().to_lowercase(),
            destination.trim().to_lowercase()
        )
    }

    pub fn get(&self, origin: &str, destination: &str) -> Option<f64> {
        let entry = self.entries.get(&Self::key(origin, destination))?;
        (age(entry.fetched_at) <= DISTANCE_CACHE_TTL).then_some(entry.km)
    }

    pub fn insert(&mut self, origin: &str, destination: &str, km: f64) {
        self.entries.insert(
            Self::key(origin, destination),
            CachedDistance {
                km,
                fetched_at: unix_now(),
            },
        );
    }

    /// Drops expired entries, returning how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| age(entry.fetched_at) <= DISTANCE_CACHE_TTL);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn age(fetched_at: u64) -> Duration {
    Duration::from_secs(unix_now().saturating_sub(fetched_at))
}

/// Default location of the distance cache (in the local data directory).
pub fn default_distance_cache_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fret-emissions")
        .join(DISTANCE_CACHE_FILENAME)
}

/// Load the distance cache from disk, dropping expired entries.
pub fn load_distance_cache(path: &Path) -> Option<DistanceCache> {
    if !path.exists() {
        debug!(path = %path.display(), "no distance cache found");
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<DistanceCache>(&content) {
            Ok(mut cache) => {
                let expired = cache.prune();
                info!(
                    entries = cache.len(),
                    expired,
                    path = %path.display(),
                    "loaded distance cache"
                );
                Some(cache)
            }
            Err(e) => {
                warn!(error = %e, "failed to parse distance cache");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "failed to read distance cache");
            None
        }
    }
}

/// Save the distance cache to disk.
pub fn save_distance_cache(cache: &DistanceCache, path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string(cache)?;
    fs::write(path, content)?;
    info!(entries = cache.len(), path = %path.display(), "saved distance cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        energy_reads: AtomicUsize,
    }

    impl ReferenceData for CountingSource {
        fn vehicle(&self, _id: &str) -> Option<Vehicle> {
            None
        }

        fn energy(&self, id: &str) -> Option<Energy> {
            self.energy_reads.fetch_add(1, Ordering::SeqCst);
            (id == "gazole").then(|| Energy {
                id: "gazole".into(),
                nom: "Gazole".into(),
                facteur: Some(3.1),
                phase_amont: None,
                phase_fonctionnement: None,
                total: None,
                unite: None,
            })
        }
    }

    #[test]
    fn energy_cache_serves_repeats_until_invalidated() {
        let cache = EnergyCache::new(
            CountingSource {
                energy_reads: AtomicUsize::new(0),
            },
            Duration::from_secs(60),
        );
        assert!(cache.energy("gazole").is_some());
        assert!(cache.energy("gazole").is_some());
        assert!(cache.energy("hydrogene").is_none());
        assert!(cache.energy("hydrogene").is_none());
        assert_eq!(cache.source().energy_reads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.energy("gazole").is_some());
        assert_eq!(cache.source().energy_reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_ttl_always_rereads() {
        let cache = EnergyCache::new(
            CountingSource {
                energy_reads: AtomicUsize::new(0),
            },
            Duration::ZERO,
        );
        cache.energy("gazole");
        std::thread::sleep(Duration::from_millis(2));
        cache.energy("gazole");
        assert_eq!(cache.source().energy_reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn distance_cache_keys_are_normalized_and_expire() {
        let mut cache = DistanceCache::default();
        cache.insert(" Paris ", "LYON", 465.1);
        assert_eq!(cache.get("paris", "lyon"), Some(465.1));
        assert_eq!(cache.get("lyon", "paris"), None);

        cache.entries.get_mut("paris|lyon").unwrap().fetched_at = 0;
        assert_eq!(cache.get("paris", "lyon"), None);
        assert_eq!(cache.prune(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn distance_cache_round_trips_through_disk() {
        let path = std::env::temp_dir()
            .join(format!("fret-distance-{}", uuid::Uuid::new_v4()))
            .join(DISTANCE_CACHE_FILENAME);
        assert!(load_distance_cache(&path).is_none());

        let mut cache = DistanceCache::default();
        cache.insert("Nantes", "Rennes", 108.4);
        save_distance_cache(&cache, &path).unwrap();
        let loaded = load_distance_cache(&path).unwrap();
        assert_eq!(loaded.get("nantes", "rennes"), Some(108.4));
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }
}
