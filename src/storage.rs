//! Typed on-disk persistence.
//!
//! Every artifact is written to a temporary file and renamed into place, so
//! a canceled run leaves either the previous file or a complete new one,
//! never a truncated JSON body. Steam-scale catalogs merge incrementally
//! instead of being rewritten wholesale.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::errors::ScrapeError;
use crate::models::{Listing, OpportunityArchive, OpportunitySet, Venue, VenueSnapshot};
use crate::paths::PathRegistry;

/// Price changes below one cent are noise and are not persisted.
const PRICE_EPSILON: f64 = 0.01;

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ScrapeError> {
    let parent = path
        .parent()
        .ok_or_else(|| ScrapeError::Persistence(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent).map_err(ScrapeError::from_io)?;
    let json = serde_json::to_vec(value)
        .map_err(|e| ScrapeError::Persistence(format!("serialization failed: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(ScrapeError::from_io)?;
    std::fs::rename(&tmp, path).map_err(ScrapeError::from_io)?;
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub url_upgraded: usize,
    pub duplicates: usize,
    pub total: usize,
}

/// Snapshot persistence plus incremental merge for slow-changing catalogs.
pub struct SnapshotStore {
    paths: Arc<PathRegistry>,
}

impl SnapshotStore {
    pub fn new(paths: Arc<PathRegistry>) -> Self {
        Self { paths }
    }

    /// Persist a snapshot wholesale (non-Steam venues rescrape cheaply).
    pub fn write_snapshot(&self, snapshot: &VenueSnapshot) -> Result<(), ScrapeError> {
        let path = self.paths.venue_data_file(snapshot.venue);
        write_atomic(&path, &snapshot.listings)?;
        debug!(venue = %snapshot.venue, items = snapshot.len(), "snapshot persisted");
        Ok(())
    }

    pub fn load_listings(&self, venue: Venue) -> Result<Vec<Listing>, ScrapeError> {
        let path = self.paths.venue_data_file(venue);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ScrapeError::from_io(e)),
        };
        serde_json::from_slice(&raw)
            .map_err(|e| ScrapeError::Persistence(format!("{}: {e}", path.display())))
    }

    /// Merge a page of incoming items into the existing on-disk catalog.
    ///
    /// Keyed by `item_name`: new names insert; existing names update the
    /// price only when it moved at least one cent; asset URLs upgrade from
    /// remote to locally-cached form; identical records are counted and
    /// skipped. Applying the same page twice is a no-op.
    pub fn merge_snapshot(
        &self,
        venue: Venue,
        incoming: &[Listing],
    ) -> Result<MergeStats, ScrapeError> {
        let mut catalog: BTreeMap<String, Listing> = self
            .load_listings(venue)?
            .into_iter()
            .map(|l| (l.item_name.clone(), l))
            .collect();

        let mut stats = MergeStats::default();
        for item in incoming {
            match catalog.entry(item.item_name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(item.clone());
                    stats.inserted += 1;
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    let mut changed = false;
                    if (item.price - existing.price).abs() >= PRICE_EPSILON {
                        existing.price = item.price;
                        existing.quantity = item.quantity;
                        changed = true;
                        stats.updated += 1;
                    }
                    if let Some(new_url) = &item.url {
                        let cached = new_url.contains("/static/") || new_url.contains("/cache/");
                        let existing_cached = existing
                            .url
                            .as_deref()
                            .map(|u| u.contains("/static/") || u.contains("/cache/"))
                            .unwrap_or(false);
                        if cached && !existing_cached {
                            existing.url = Some(new_url.clone());
                            changed = true;
                            stats.url_upgraded += 1;
                        }
                    }
                    if !changed {
                        stats.duplicates += 1;
                    }
                }
            }
        }
        stats.total = catalog.len();

        // BTreeMap iteration gives the stable name ordering the on-disk
        // format requires.
        let listings: Vec<&Listing> = catalog.values().collect();
        write_atomic(&self.paths.venue_data_file(venue), &listings)?;
        Ok(stats)
    }
}

/// Serialized access to the profitability artifact.
pub struct ArchiveStore {
    paths: Arc<PathRegistry>,
    write_lock: Mutex<()>,
}

impl ArchiveStore {
    pub fn new(paths: Arc<PathRegistry>) -> Self {
        Self {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<Option<OpportunityArchive>, ScrapeError> {
        let path = self.paths.profitability_file();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScrapeError::from_io(e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| ScrapeError::Persistence(format!("{}: {e}", path.display())))
    }

    /// Record a new scan: the previous `current` rolls into the bounded
    /// history, and the whole artifact is rewritten atomically.
    pub fn record(&self, set: OpportunitySet) -> Result<OpportunityArchive, ScrapeError> {
        let _guard = self.write_lock.lock();
        let archive = match self.load()? {
            Some(mut archive) => {
                archive.record(set);
                archive
            }
            None => OpportunityArchive::new(set),
        };
        write_atomic(&self.paths.profitability_file(), &archive)?;
        Ok(archive)
    }
}
