// Local disk manager for the embedded KV store each metadata-store node
// applies committed log entries into. Owns compaction and garbage
// collection of value-log segments (spec 4.A "Disk management policy").

use crate::config::DiskManagerConfig;
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskHealth {
    Ok,
    Warn,
    Critical,
}

/// A value-log segment tracked for GC purposes: `live_ratio` is the
/// fraction of bytes in the segment still referenced by the current KV
/// state (as opposed to superseded or tombstoned entries).
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: u64,
    pub bytes: u64,
    pub live_ratio: f64,
}

pub struct DiskManager {
    config: DiskManagerConfig,
    segments: RwLock<HashMap<u64, Segment>>,
    next_segment_id: RwLock<u64>,
}

impl DiskManager {
    pub fn new(config: DiskManagerConfig) -> Self {
        Self {
            config,
            segments: RwLock::new(HashMap::new()),
            next_segment_id: RwLock::new(1),
        }
    }

    pub fn add_segment(&self, bytes: u64, live_ratio: f64) -> u64 {
        let mut next = self.next_segment_id.write();
        let id = *next;
        *next += 1;
        self.segments.write().insert(id, Segment { id, bytes, live_ratio });
        id
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.read().values().map(|s| s.bytes).sum()
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.config.max_bytes == 0 {
            return 0.0;
        }
        self.total_bytes() as f64 / self.config.max_bytes as f64
    }

    pub fn health(&self) -> DiskHealth {
        let ratio = self.usage_ratio();
        if ratio >= self.config.critical_ratio {
            DiskHealth::Critical
        } else if ratio >= self.config.warn_ratio {
            DiskHealth::Warn
        } else {
            DiskHealth::Ok
        }
    }

    /// Reclaim segments whose live-data ratio is below the configured
    /// discard threshold. Returns the number of segments reclaimed.
    pub fn run_gc(&self) -> usize {
        let mut segments = self.segments.write();
        let to_remove: Vec<u64> = segments
            .values()
            .filter(|s| s.live_ratio < self.config.gc_discard_ratio)
            .map(|s| s.id)
            .collect();
        for id in &to_remove {
            segments.remove(id);
        }
        if !to_remove.is_empty() {
            info!(reclaimed = to_remove.len(), "disk manager GC pass reclaimed segments");
        }
        to_remove.len()
    }

    /// Merge remaining segments into a single compacted segment. A no-op
    /// compaction model is sufficient here: the disk manager only needs to
    /// expose the policy (when to run, how health responds), not a real
    /// merge-sort over on-disk files, which belongs to the embedded KV
    /// engine this type fronts.
    pub fn run_compaction(&self) {
        let mut segments = self.segments.write();
        if segments.len() <= 1 {
            return;
        }
        let total_bytes: u64 = segments.values().map(|s| s.bytes).sum();
        let weighted_live: f64 = segments
            .values()
            .map(|s| s.bytes as f64 * s.live_ratio)
            .sum::<f64>()
            / total_bytes.max(1) as f64;
        segments.clear();
        segments.insert(
            1,
            Segment { id: 1, bytes: (total_bytes as f64 * weighted_live) as u64, live_ratio: 1.0 },
        );
    }

    /// Run the disk management policy once: warn/critical detection,
    /// emergency GC + compaction on critical, re-evaluate (spec 4.A).
    pub fn evaluate_and_remediate(&self) -> DiskHealth {
        let health = self.health();
        match health {
            DiskHealth::Ok => health,
            DiskHealth::Warn => {
                warn!(ratio = self.usage_ratio(), "disk usage above warn threshold");
                health
            }
            DiskHealth::Critical => {
                warn!(ratio = self.usage_ratio(), "disk usage critical, running emergency GC");
                self.run_gc();
                self.run_compaction();
                let after = self.health();
                if after == DiskHealth::Critical {
                    warn!("disk usage still critical after emergency GC and compaction");
                }
                after
            }
        }
    }

    /// Background loop driver: run periodic GC and compaction at the
    /// configured cadences. The caller owns the tokio::select! against a
    /// cancellation signal; this just executes one tick of each.
    pub async fn periodic_tick(&self, elapsed_since_last_gc_secs: u64, elapsed_since_last_compaction_secs: u64) {
        if elapsed_since_last_gc_secs >= self.config.gc_interval_secs {
            self.run_gc();
        }
        if elapsed_since_last_compaction_secs >= self.config.compaction_interval_secs {
            self.run_compaction();
        }
        self.evaluate_and_remediate();
    }
}

pub fn snapshot_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| crate::error::RdbError::Serialization(e.to_string()))
}

pub fn restore_bytes<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| crate::error::RdbError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DiskManagerConfig {
        DiskManagerConfig {
            max_bytes: 1000,
            warn_ratio: 0.8,
            critical_ratio: 0.95,
            gc_discard_ratio: 0.5,
            gc_interval_secs: 300,
            compaction_interval_secs: 3600,
        }
    }

    #[test]
    fn health_thresholds() {
        let dm = DiskManager::new(cfg());
        dm.add_segment(700, 1.0);
        assert_eq!(dm.health(), DiskHealth::Ok);
        dm.add_segment(150, 1.0);
        assert_eq!(dm.health(), DiskHealth::Warn);
        dm.add_segment(150, 1.0);
        assert_eq!(dm.health(), DiskHealth::Critical);
    }

    #[test]
    fn gc_reclaims_low_live_ratio_segments() {
        let dm = DiskManager::new(cfg());
        dm.add_segment(100, 0.9);
        dm.add_segment(100, 0.3);
        dm.add_segment(100, 0.49);
        let reclaimed = dm.run_gc();
        assert_eq!(reclaimed, 2);
        assert_eq!(dm.total_bytes(), 100);
    }

    #[test]
    fn critical_triggers_emergency_gc_and_compaction() {
        let dm = DiskManager::new(cfg());
        dm.add_segment(960, 0.2);
        let health = dm.evaluate_and_remediate();
        assert_eq!(health, DiskHealth::Ok);
    }
}
