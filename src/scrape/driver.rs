use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::scrape::parse::ListingCard;

/// A page retrieved for one search: the raw markup plus the listing cards
/// located in it.
#[derive(Debug, Default)]
pub struct ScrapePage {
    pub html: String,
    pub cards: Vec<ListingCard>,
}

/// Contract consumed by the scrape session. Implementations own whatever
/// machinery renders the search page (plain HTTP, a real browser, a proxy
/// service); the session only sees opened/extract/closed.
#[async_trait]
pub trait ScrapeDriver: Send {
    async fn open(&mut self) -> Result<()>;
    async fn navigate_and_extract(&mut self, url: &str) -> Result<ScrapePage>;
    async fn close(&mut self) -> Result<()>;
}

/// HTTP driver: fetches the search page with a browser-like client and
/// extracts listing cards from the returned markup.
pub struct HttpDriver {
    timeout: Duration,
    headless: bool,
    client: Option<reqwest::Client>,
}

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl HttpDriver {
    pub fn new(timeout: Duration, headless: bool) -> Self {
        Self { timeout, headless, client: None }
    }

    fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Scrape("driver not opened".to_string()))
    }
}

#[async_trait]
impl ScrapeDriver for HttpDriver {
    async fn open(&mut self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        self.client = Some(client);
        info!(headless = self.headless, "scrape driver opened");
        Ok(())
    }

    async fn navigate_and_extract(&mut self, url: &str) -> Result<ScrapePage> {
        let resp = self
            .client()?
            .get(url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| AppError::Scrape(format!("navigation failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Scrape(format!("search page returned {status}")));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| AppError::Scrape(format!("body read failed: {e}")))?;

        let cards = extract_cards(&html)?;
        debug!(cards = cards.len(), "search page extracted");
        Ok(ScrapePage { html, cards })
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        info!("scrape driver closed");
        Ok(())
    }
}

/// Locate listing cards in the search markup. A missing root selector is a
/// scrape failure: the page rendered without its result list, which is what
/// a bot block looks like.
fn extract_cards(html: &str) -> Result<Vec<ListingCard>> {
    let doc = Html::parse_document(html);

    let card_sel = selector("li.s-card, li.s-item")?;
    let title_sel = selector(".s-card__title, .s-item__title")?;
    let price_sel = selector(".s-card__price, .s-item__price")?;
    let condition_sel = selector(".s-card__subtitle, .SECONDARY_INFO")?;
    let sold_sel = selector(".s-card__caption, .s-item__caption")?;
    let link_sel = selector("a[href*='/itm/']")?;

    let nodes: Vec<_> = doc.select(&card_sel).collect();
    if nodes.is_empty() {
        return Err(AppError::Scrape(
            "no listing cards in search page; possible bot block".to_string(),
        ));
    }

    let cards = nodes
        .into_iter()
        .map(|node| {
            let text_of = |sel: &Selector| {
                node.select(sel)
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string())
            };
            ListingCard {
                title: text_of(&title_sel).unwrap_or_default(),
                price_text: text_of(&price_sel).unwrap_or_default(),
                condition_text: text_of(&condition_sel),
                sold_text: text_of(&sold_sel),
                url: node
                    .select(&link_sel)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .map(str::to_string),
            }
        })
        .collect();

    Ok(cards)
}

fn selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| AppError::Internal(format!("bad selector {raw:?}: {e}")))
}
