//! Venue adapter contract and the shared scheduling loop.
//!
//! Adapters contribute URL construction and response decoding; everything
//! else (header composition, credential checks, rate limiting, pagination,
//! validation, dedup, persistence, telemetry) lives in the runner and is
//! identical for every venue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::header::HeaderMap;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{ScraperConfig, Secrets};
use crate::errors::ScrapeError;
use crate::models::{Listing, Venue, VenueSnapshot};
use crate::net::{ClientFlavor, HttpEngine, HttpRequest};
use crate::ratelimit::TokenBucket;
use crate::storage::SnapshotStore;
use crate::telemetry::{RunOutcome, RunState, RunStatus, Telemetry};

/// Hard ceiling on paginated fetches, a backstop against venues that never
/// return an empty page.
const MAX_PAGES: u32 = 200;

/// Concurrent Steam requests across all Steam adapters.
pub const STEAM_CONCURRENCY: usize = 5;

/// How a paginated venue addresses its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStyle {
    /// `?start=<page * page_size>`
    Offset,
    /// `?page=<1-based index>`
    PageNumber,
}

/// What the runner should fetch for a venue.
#[derive(Debug, Clone)]
pub enum FetchPlan {
    /// Whole catalog in one response.
    Single { url: String },
    /// Page through until empty responses persist.
    Paginated {
        base_url: String,
        page_param: &'static str,
        page_size: u32,
        style: PageStyle,
    },
    /// One request per Steam nameid task, batched under the Steam cap.
    NameidBatch {
        items: Vec<NameidTask>,
        batch_size: usize,
    },
}

/// One unit of nameid-keyed work: resolve or query `item_name`.
#[derive(Debug, Clone)]
pub struct NameidTask {
    pub item_name: String,
    pub nameid: u64,
}

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Decide what to fetch. Called before any network traffic; adapters
    /// whose credentials ride in the URL fail here with `MissingApiKey`.
    /// Async because some plans read previously-persisted tables.
    async fn plan(&self, secrets: &Secrets) -> Result<FetchPlan, ScrapeError>;

    /// Decode one response body into normalized listings.
    fn parse(&self, raw: &[u8]) -> Result<Vec<Listing>, ScrapeError>;

    /// Venue-specific headers (auth tokens, referers). Merged over the
    /// engine defaults.
    fn headers(&self, _secrets: &Secrets) -> Result<HeaderMap, ScrapeError> {
        Ok(HeaderMap::new())
    }

    /// Request for one nameid task. Only nameid-batch venues implement this.
    fn nameid_request(&self, _task: &NameidTask) -> Option<String> {
        None
    }

    /// Decode one nameid response. Only nameid-batch venues implement this.
    fn parse_nameid(
        &self,
        _task: &NameidTask,
        _raw: &[u8],
    ) -> Result<Option<Listing>, ScrapeError> {
        Ok(None)
    }
}

/// Cooperative cancellation shared by the orchestrator and every adapter.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared scheduling loop: fetch → parse → validate → normalize → persist.
pub struct ScraperRunner {
    engine: Arc<HttpEngine>,
    store: Arc<SnapshotStore>,
    telemetry: Arc<Telemetry>,
    secrets: Arc<Secrets>,
    steam_semaphore: Arc<Semaphore>,
    cancel: CancelFlag,
}

impl ScraperRunner {
    pub fn new(
        engine: Arc<HttpEngine>,
        store: Arc<SnapshotStore>,
        telemetry: Arc<Telemetry>,
        secrets: Arc<Secrets>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            engine,
            store,
            telemetry,
            secrets,
            steam_semaphore: Arc::new(Semaphore::new(STEAM_CONCURRENCY)),
            cancel,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one adapter to completion (or cancellation) and record the
    /// outcome. Single-item failures never surface here; adapter-level
    /// failures come back in the outcome instead of an Err so sibling
    /// adapters keep running.
    pub async fn run(&self, adapter: &dyn VenueAdapter, config: &ScraperConfig) -> RunOutcome {
        let venue = adapter.venue();
        let started = Instant::now();

        // SPA-rendered venues need a browser; publish an empty snapshot with
        // the reason instead of scraping noise out of app shells.
        if config.dynamic_content {
            info!(venue = %venue, reason = "dynamic content", "venue requires browser rendering, skipping");
            let snapshot = VenueSnapshot::from_listings(venue, Vec::new());
            let outcome = match self.store.write_snapshot(&snapshot) {
                Ok(()) => self.outcome(venue, RunStatus::Ok, 0, started, Some("dynamic content".into())),
                Err(e) => self.outcome(venue, RunStatus::Failed, 0, started, Some(e.to_string())),
            };
            return outcome;
        }

        // Credential check happens before any network traffic.
        if config.requires_api_key && self.secrets.api_key(venue).is_none() {
            let err = ScrapeError::MissingApiKey(venue);
            warn!(venue = %venue, "required API key absent, adapter not started");
            self.telemetry.set_state(venue, RunState::Failed);
            return self.outcome(venue, RunStatus::Failed, 0, started, Some(err.to_string()));
        }

        self.telemetry.set_state(venue, RunState::Fetching);
        let result = self.execute(adapter, config).await;
        match result {
            Ok((listings, partial_reason)) => {
                self.telemetry.set_state(venue, RunState::Persisting);
                let snapshot = VenueSnapshot::from_listings(venue, listings);
                let count = snapshot.len();
                let persisted = self.persist(&snapshot);
                self.telemetry.set_state(venue, RunState::Idle);
                match (persisted, partial_reason) {
                    (Ok(()), None) => self.outcome(venue, RunStatus::Ok, count, started, None),
                    (Ok(()), Some(reason)) => {
                        self.outcome(venue, RunStatus::Partial, count, started, Some(reason))
                    }
                    (Err(e), _) => {
                        self.outcome(venue, RunStatus::Failed, count, started, Some(e.to_string()))
                    }
                }
            }
            Err(err) => {
                // Previous snapshot on disk is preserved untouched.
                self.telemetry.set_state(venue, RunState::Failed);
                self.outcome(venue, RunStatus::Failed, 0, started, Some(err.to_string()))
            }
        }
    }

    fn outcome(
        &self,
        venue: Venue,
        status: RunStatus,
        items: usize,
        started: Instant,
        error: Option<String>,
    ) -> RunOutcome {
        let outcome = RunOutcome {
            venue,
            status,
            items,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error,
        };
        self.telemetry.record_outcome(outcome.clone());
        outcome
    }

    fn persist(&self, snapshot: &VenueSnapshot) -> Result<(), ScrapeError> {
        // Steam-scale catalogs merge incrementally; everything else is cheap
        // to rewrite wholesale.
        if snapshot.venue.is_steam_origin() || snapshot.venue == Venue::SteamId {
            self.store.merge_snapshot(snapshot.venue, &snapshot.listings)?;
            Ok(())
        } else {
            self.store.write_snapshot(snapshot)
        }
    }

    /// Fetch and decode per the adapter's plan. Returns the validated
    /// listings plus a partial-run reason when the run was cut short.
    async fn execute(
        &self,
        adapter: &dyn VenueAdapter,
        config: &ScraperConfig,
    ) -> Result<(Vec<Listing>, Option<String>), ScrapeError> {
        let venue = adapter.venue();
        let plan = adapter.plan(&self.secrets).await?;
        let headers = adapter.headers(&self.secrets)?;
        let limiter = TokenBucket::new(config.rate_per_minute, config.burst);
        let timeout = Duration::from_secs(config.timeout_secs);
        let flavor = if config.anti_bot_client {
            ClientFlavor::Raw
        } else {
            ClientFlavor::Standard
        };

        let request_for = |url: String| {
            let mut req = HttpRequest::get(venue, url)
                .with_timeout(timeout)
                .with_flavor(flavor);
            req.headers = headers.clone();
            req.use_proxy = config.use_proxy;
            req
        };

        match plan {
            FetchPlan::Single { url } => {
                if self.cancel.is_canceled() {
                    return Err(ScrapeError::Canceled);
                }
                limiter.acquire().await;
                let raw = self.engine.request(&request_for(url)).await?;
                if raw.is_empty() {
                    return Err(ScrapeError::EmptyBody);
                }
                self.telemetry.set_state(venue, RunState::Parsing);
                let listings = self.validate(venue, adapter.parse(&raw)?);
                Ok((listings, None))
            }

            FetchPlan::Paginated {
                base_url,
                page_param,
                page_size,
                style,
            } => {
                let mut collected: Vec<Listing> = Vec::new();
                let mut empty_pages: u32 = 0;

                for page in 0..MAX_PAGES {
                    if self.cancel.is_canceled() {
                        // Keep what already validated; Partial, not lost.
                        return Ok((collected, Some("canceled".into())));
                    }
                    limiter.acquire().await;

                    let sep = if base_url.contains('?') { '&' } else { '?' };
                    let value = match style {
                        PageStyle::Offset => page * page_size,
                        PageStyle::PageNumber => page + 1,
                    };
                    let url = format!("{base_url}{sep}{page_param}={value}");

                    let page_result = self.engine.request(&request_for(url)).await;
                    let listings = match page_result {
                        Ok(raw) if raw.is_empty() => {
                            empty_pages += 1;
                            if empty_pages >= config.max_empty_pages {
                                break;
                            }
                            continue;
                        }
                        Ok(raw) => {
                            self.telemetry.set_state(venue, RunState::Parsing);
                            match adapter.parse(&raw) {
                                Ok(listings) => listings,
                                Err(e) => {
                                    // One undecodable page; the rest of the
                                    // catalog is still worth keeping.
                                    warn!(venue = %venue, page, error = %e, "page parse failed");
                                    return Ok((collected, Some(format!("page {page}: {e}"))));
                                }
                            }
                        }
                        Err(e) if collected.is_empty() => return Err(e),
                        Err(e) => {
                            return Ok((collected, Some(format!("page {page}: {e}"))));
                        }
                    };
                    self.telemetry.set_state(venue, RunState::Fetching);

                    if listings.is_empty() {
                        empty_pages += 1;
                        if empty_pages >= config.max_empty_pages {
                            break;
                        }
                        continue;
                    }
                    empty_pages = 0;
                    collected.extend(self.validate(venue, listings));
                }
                Ok((collected, None))
            }

            FetchPlan::NameidBatch { items, batch_size } => {
                let mut collected: Vec<Listing> = Vec::new();
                let mut failed_tasks = 0usize;

                for chunk in items.chunks(batch_size.max(1)) {
                    if self.cancel.is_canceled() {
                        return Ok((collected, Some("canceled".into())));
                    }
                    let results: Vec<Option<Listing>> = stream::iter(chunk.to_vec())
                        .map(|task| {
                            let limiter = &limiter;
                            let request_for = &request_for;
                            async move {
                                let url = adapter.nameid_request(&task)?;
                                // Steam rate-limits aggressively; the global
                                // semaphore spans every Steam adapter.
                                let _permit = self
                                    .steam_semaphore
                                    .acquire()
                                    .await
                                    .expect("semaphore never closed");
                                limiter.acquire().await;
                                match self.engine.request(&request_for(url)).await {
                                    Ok(raw) if raw.is_empty() => None,
                                    Ok(raw) => adapter.parse_nameid(&task, &raw).ok().flatten(),
                                    Err(e) => {
                                        debug!(venue = %venue, item = %task.item_name, error = %e, "nameid fetch failed");
                                        None
                                    }
                                }
                            }
                        })
                        .buffer_unordered(STEAM_CONCURRENCY)
                        .collect()
                        .await;

                    for result in results {
                        match result {
                            Some(listing) => collected.push(listing),
                            None => failed_tasks += 1,
                        }
                    }
                }

                let collected = self.validate(venue, collected);
                let reason = (failed_tasks > 0).then(|| format!("{failed_tasks} nameid tasks failed"));
                Ok((collected, reason))
            }
        }
    }

    /// Drop invalid items; a bad record never fails the run.
    fn validate(&self, venue: Venue, listings: Vec<Listing>) -> Vec<Listing> {
        let before = listings.len();
        let listings: Vec<Listing> = listings.into_iter().filter(Listing::is_valid).collect();
        let dropped = before - listings.len();
        if dropped > 0 {
            debug!(venue = %venue, dropped, "invalid listings discarded");
        }
        listings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_propagates() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_canceled());
        flag.cancel();
        assert!(clone.is_canceled());
    }

    #[test]
    fn page_style_addressing() {
        // Offset style counts rows, page style counts pages from one.
        let offset = |page: u32, size: u32| page * size;
        assert_eq!(offset(0, 100), 0);
        assert_eq!(offset(3, 100), 300);

        let page_number = |page: u32| page + 1;
        assert_eq!(page_number(0), 1);
    }
}
