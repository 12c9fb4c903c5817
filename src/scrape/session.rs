use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{Config, FETCH_QUEUE_CAPACITY, MARKETPLACE_SEARCH_URL, SEARCH_PAGE_SIZE};
use crate::error::Result;
use crate::market::build_sample;
use crate::scrape::driver::ScrapeDriver;
use crate::scrape::parse::card_to_listing;
use crate::types::{Listing, MarketSample};

/// One queued search, answered on a oneshot channel.
struct FetchRequest {
    query: String,
    reply: oneshot::Sender<MarketSample>,
}

/// Cloneable handle to the scrape session. All fetches funnel through a
/// bounded FIFO queue into the single worker that owns the driver, so at
/// most one search runs against the shared session at a time.
#[derive(Clone)]
pub struct ScrapeSession {
    tx: mpsc::Sender<FetchRequest>,
}

impl ScrapeSession {
    /// Fetch a market sample for a query. Never errors: session loss or a
    /// failed scrape degrades to a `status=error` sample and the pipeline
    /// compensates via weighting.
    pub async fn fetch(&self, query: &str) -> MarketSample {
        let (reply, rx) = oneshot::channel();
        let request = FetchRequest { query: query.to_string(), reply };
        if self.tx.send(request).await.is_err() {
            return MarketSample::error("scrape session is shut down");
        }
        match rx.await {
            Ok(sample) => sample,
            Err(_) => MarketSample::error("scrape worker dropped the request"),
        }
    }
}

/// Owns the driver and serves fetch requests in arrival order. A randomized
/// delay is enforced between successive fetches: the marketplace blocks
/// sessions issuing parallel or too-rapid searches.
pub struct ScrapeWorker {
    driver: Box<dyn ScrapeDriver>,
    rx: mpsc::Receiver<FetchRequest>,
    max_listings: usize,
    fetch_timeout: Duration,
    delay_range_ms: (u64, u64),
    last_fetch_done: Option<Instant>,
    fetches_served: u64,
    cards_dropped: u64,
}

impl ScrapeWorker {
    pub fn new(driver: Box<dyn ScrapeDriver>, cfg: &Config) -> (ScrapeSession, Self) {
        let (tx, rx) = mpsc::channel(FETCH_QUEUE_CAPACITY);
        let worker = Self {
            driver,
            rx,
            max_listings: cfg.max_listings,
            fetch_timeout: Duration::from_millis(cfg.scrape_timeout_ms),
            delay_range_ms: (cfg.scrape_delay_ms_min, cfg.scrape_delay_ms_max),
            last_fetch_done: None,
            fetches_served: 0,
            cards_dropped: 0,
        };
        (ScrapeSession { tx }, worker)
    }

    /// Open the driver. Must be called once at process startup; failure here
    /// is fatal to the service.
    pub async fn start(&mut self) -> Result<()> {
        self.driver.open().await
    }

    /// Serve fetches until every session handle is dropped, then close the
    /// driver.
    pub async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            self.pace().await;
            let sample = self.fetch_once(&request.query).await;
            self.last_fetch_done = Some(Instant::now());
            self.fetches_served += 1;
            if self.fetches_served % 25 == 0 {
                info!(
                    fetches = self.fetches_served,
                    cards_dropped = self.cards_dropped,
                    "scrape session counters"
                );
            }
            if request.reply.send(sample).is_err() {
                warn!(query = %request.query, "fetch requester went away before reply");
            }
        }
        if let Err(e) = self.driver.close().await {
            warn!("driver close failed: {e}");
        }
        info!("scrape session stopped");
    }

    /// Sleep until the randomized inter-fetch delay since the previous fetch
    /// has elapsed.
    async fn pace(&mut self) {
        let Some(last) = self.last_fetch_done else { return };
        let (min_ms, max_ms) = self.delay_range_ms;
        let wait = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(min_ms..=max_ms))
        };
        let elapsed = last.elapsed();
        if elapsed < wait {
            tokio::time::sleep(wait - elapsed).await;
        }
    }

    async fn fetch_once(&mut self, query: &str) -> MarketSample {
        let url = search_url(query);
        let page = match timeout(self.fetch_timeout, self.driver.navigate_and_extract(&url)).await {
            Err(_) => return MarketSample::error("navigation deadline exceeded"),
            Ok(Err(e)) => return MarketSample::error(&e.to_string()),
            Ok(Ok(page)) => page,
        };
        tracing::debug!(bytes = page.html.len(), cards = page.cards.len(), "page extracted");

        let mut listings: Vec<Listing> = Vec::new();
        for card in &page.cards {
            if listings.len() >= self.max_listings {
                break;
            }
            match card_to_listing(card, query) {
                Some(listing) => listings.push(listing),
                None => {
                    self.cards_dropped += 1;
                    warn!(title = %card.title, "dropped unparseable listing card");
                }
            }
        }

        build_sample(listings)
    }
}

/// Sold/completed-listings search URL for a query.
pub fn search_url(query: &str) -> String {
    let page_size = SEARCH_PAGE_SIZE.to_string();
    let params = [
        ("_nkw", query),
        ("LH_Sold", "1"),
        ("LH_Complete", "1"),
        ("_sop", "12"),
        ("_ipg", page_size.as_str()),
    ];
    match reqwest::Url::parse_with_params(MARKETPLACE_SEARCH_URL, &params) {
        Ok(url) => url.into(),
        Err(_) => MARKETPLACE_SEARCH_URL.to_string(),
    }
}
