//! Marketplace client
//!
//! `MarketClient` is the contract the acquisition engine consumes;
//! `SteamMarketClient` is the HTTP implementation against the Steam
//! Community Market endpoints.

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::models::skin::rarity_from_type;

pub const SOURCE_STEAM: &str = "steam";
const IMAGE_BASE_URL: &str = "https://community.cloudflare.steamstatic.com/economy/image";
const SEARCH_PAGE_SIZE: u32 = 100;

/// Latest quote for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrice {
    pub price: Decimal,
    pub volume: i64,
    pub median_price: Option<Decimal>,
}

/// Search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketItem {
    pub market_hash_name: String,
    pub name: String,
    pub price: Option<Decimal>,
    pub sell_listings: i64,
    pub image_url: Option<String>,
    pub rarity: Option<String>,
}

#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Identifier recorded as the sample source
    fn source(&self) -> &str;

    async fn get_item_price(&self, market_hash_name: &str) -> Result<MarketPrice>;

    async fn search_items(&self, query: &str) -> Result<Vec<MarketItem>>;
}

/// Strips leading currency symbols and thousands separators.
/// "$1,234.56" -> 1234.56
pub fn parse_price(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok().filter(|p| *p >= Decimal::ZERO)
}

fn parse_volume(raw: &str) -> i64 {
    raw.chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[derive(Debug, Deserialize)]
struct PriceOverviewResponse {
    success: bool,
    lowest_price: Option<String>,
    median_price: Option<String>,
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    success: bool,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    name: String,
    hash_name: String,
    #[serde(default)]
    sell_listings: i64,
    /// Cents
    #[serde(default)]
    sell_price: Option<i64>,
    #[serde(default)]
    asset_description: Option<AssetDescription>,
}

#[derive(Debug, Deserialize)]
struct AssetDescription {
    #[serde(default)]
    icon_url: Option<String>,
    #[serde(default, rename = "type")]
    type_line: Option<String>,
}

impl From<SearchResult> for MarketItem {
    fn from(r: SearchResult) -> Self {
        let (image_url, rarity) = match r.asset_description {
            Some(desc) => (
                desc.icon_url.map(|icon| format!("{}/{}", IMAGE_BASE_URL, icon)),
                desc.type_line.as_deref().and_then(rarity_from_type),
            ),
            None => (None, None),
        };
        MarketItem {
            market_hash_name: r.hash_name,
            name: r.name,
            price: r.sell_price.map(|cents| Decimal::new(cents, 2)),
            sell_listings: r.sell_listings,
            image_url,
            rarity,
        }
    }
}

#[derive(Clone)]
pub struct SteamMarketClient {
    client: Client,
    base_url: String,
    app_id: u32,
    currency: u32,
    search_cache: Arc<Cache<String, Vec<MarketItem>>>,
}

impl SteamMarketClient {
    pub fn new(base_url: String, app_id: u32, currency: u32, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent("skinwatch-backend/0.1")
            .build()?;

        let search_cache = Cache::builder()
            .max_capacity(256)
            .time_to_live(Duration::from_secs(600)) // 10 minutes
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id,
            currency,
            search_cache: Arc::new(search_cache),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Market(format!(
                "Steam market error {}: {}",
                status, error_text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl MarketClient for SteamMarketClient {
    fn source(&self) -> &str {
        SOURCE_STEAM
    }

    async fn get_item_price(&self, market_hash_name: &str) -> Result<MarketPrice> {
        let url = format!("{}/market/priceoverview/", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[
                ("appid", self.app_id.to_string()),
                ("currency", self.currency.to_string()),
                ("market_hash_name", market_hash_name.to_string()),
            ])
            .send()
            .await?;
        let data: PriceOverviewResponse = Self::check_status(response).await?.json().await?;

        if !data.success {
            return Err(PipelineError::Market(format!(
                "price overview unsuccessful for {}",
                market_hash_name
            )));
        }

        let median_price = data.median_price.as_deref().and_then(parse_price);
        let price = data
            .lowest_price
            .as_deref()
            .and_then(parse_price)
            .or(median_price)
            .ok_or_else(|| PipelineError::Market(format!("no price for {}", market_hash_name)))?;

        tracing::debug!(
            market_hash_name = market_hash_name,
            price = %price,
            "Fetched price overview"
        );

        Ok(MarketPrice {
            price,
            volume: data.volume.as_deref().map(parse_volume).unwrap_or(0),
            median_price,
        })
    }

    async fn search_items(&self, query: &str) -> Result<Vec<MarketItem>> {
        let cache_key = query.trim().to_lowercase();
        if let Some(cached) = self.search_cache.get(&cache_key).await {
            tracing::debug!("Cache hit for search {}", cache_key);
            return Ok(cached);
        }

        tracing::info!("Searching Steam market for {}", query);

        let url = format!("{}/market/search/render/", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[
                ("query", query.to_string()),
                ("appid", self.app_id.to_string()),
                ("norender", "1".to_string()),
                ("count", SEARCH_PAGE_SIZE.to_string()),
                ("start", "0".to_string()),
            ])
            .send()
            .await?;
        let data: SearchResponse = Self::check_status(response).await?.json().await?;

        if !data.success {
            return Err(PipelineError::Market(format!("search unsuccessful for {}", query)));
        }

        let items: Vec<MarketItem> = data.results.into_iter().map(MarketItem::from).collect();
        self.search_cache.insert(cache_key, items.clone()).await;

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("$0.58"), Some(dec!(0.58)));
        assert_eq!(parse_price("$1,234.56"), Some(dec!(1234.56)));
        assert_eq!(parse_price(" USD 12.00 "), Some(dec!(12.00)));
        assert_eq!(parse_price("£3.10"), Some(dec!(3.10)));
        assert_eq!(parse_price("--"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("1,397"), 1397);
        assert_eq!(parse_volume(""), 0);
    }

    #[test]
    fn test_search_result_conversion() {
        let raw = r#"{
            "success": true,
            "results": [{
                "name": "AK-47 | Redline (Field-Tested)",
                "hash_name": "AK-47 | Redline (Field-Tested)",
                "sell_listings": 812,
                "sell_price": 58,
                "asset_description": {"icon_url": "abc", "type": "Classified Rifle"}
            }]
        }"#;
        let data: SearchResponse = serde_json::from_str(raw).unwrap();
        let item = MarketItem::from(data.results.into_iter().next().unwrap());
        assert_eq!(item.price, Some(dec!(0.58)));
        assert_eq!(item.rarity.as_deref(), Some("Classified"));
        assert_eq!(item.image_url.unwrap(), format!("{}/abc", IMAGE_BASE_URL));
    }

    #[test]
    fn test_price_overview_decode() {
        let raw = r#"{"success":true,"lowest_price":"$0.58","volume":"1,397","median_price":"$0.55"}"#;
        let data: PriceOverviewResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(data.lowest_price.as_deref().and_then(parse_price), Some(dec!(0.58)));
        assert_eq!(data.volume.as_deref().map(parse_volume), Some(1397));
    }
}
