//! Process configuration from the environment
//!
//! `.env` is loaded by `main` via dotenvy before `Config::from_env` runs.

use chrono::FixedOffset;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::services::shard_router::SHARD_COUNT;

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub interval: Duration,
    pub rate_limit_per_minute: u64,
    pub workers: usize,
    pub request_timeout: Duration,
    pub discovery_enabled: bool,
    pub discovery_interval: Duration,
    pub discovery_queries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max: u32,
    pub shard_enabled: bool,
    /// Ordered [pistols, rifles, other]
    pub shard_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub brokers: Vec<String>,
    pub topic_price_updates: String,
    pub topic_skin_discovered: String,
    pub topic_price_alerts: String,
    pub group_price_consumer: String,
    pub group_notification_consumer: String,
    pub partitions: u32,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub addr: Option<String>,
    pub password: Option<String>,
    pub db: u32,
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub base_url: String,
    pub app_id: u32,
    pub currency: u32,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub email_relay_url: Option<String>,
    pub push_relay_url: Option<String>,
    /// Zone quiet hours are evaluated in; host local time when unset
    pub quiet_hours_offset: Option<FixedOffset>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub parser: ParserConfig,
    pub database: DatabaseConfig,
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub market: MarketConfig,
    pub notify: NotifyConfig,
    pub retention_days: i64,
    pub http_port: u16,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| PipelineError::BadConfig(format!("{} has invalid value {:?}", name, raw))),
    }
}

fn string_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn bool_or(name: &str, default: bool) -> Result<bool> {
    match var(name).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(PipelineError::BadConfig(format!("{} is not a boolean: {:?}", name, v))),
    }
}

/// "+03:00" style offset
fn utc_offset(name: &str) -> Result<Option<FixedOffset>> {
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<FixedOffset>()
            .map(Some)
            .map_err(|_| PipelineError::BadConfig(format!("{} is not a UTC offset: {:?}", name, raw))),
    }
}

fn list(name: &str) -> Vec<String> {
    var(name)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl ParserConfig {
    pub fn from_env() -> Result<Self> {
        // Safety floor of one minute
        let minutes: u64 = parse_or("PARSER_INTERVAL_MINUTES", 5)?;
        Ok(Self {
            interval: Duration::from_secs(minutes.max(1) * 60),
            rate_limit_per_minute: parse_or("PARSER_RATE_LIMIT_PER_MINUTE", 60)?,
            workers: parse_or::<usize>("PARSER_WORKERS", 10)?.max(1),
            request_timeout: Duration::from_secs(parse_or("PARSER_REQUEST_TIMEOUT_SECS", 10)?),
            discovery_enabled: bool_or("PARSER_DISCOVERY_ENABLED", false)?,
            discovery_interval: Duration::from_secs(
                parse_or::<u64>("PARSER_DISCOVERY_INTERVAL_MINUTES", 60)?.max(1) * 60,
            ),
            discovery_queries: list("PARSER_DISCOVERY_QUERIES"),
        })
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = var("PG_URL")
            .or_else(|| var("DATABASE_URL"))
            .ok_or_else(|| PipelineError::BadConfig("PG_URL must be set".into()))?;
        let shard_enabled = bool_or("SHARD_ENABLED", false)?;
        let shard_urls = list("SHARD_URLS");

        if shard_enabled && shard_urls.len() != SHARD_COUNT {
            return Err(PipelineError::BadConfig(format!(
                "SHARD_URLS must list exactly {} urls [pistols, rifles, other], got {}",
                SHARD_COUNT,
                shard_urls.len()
            )));
        }

        Ok(Self {
            url,
            pool_max: parse_or("PG_POOL_MAX", 20)?,
            shard_enabled,
            shard_urls,
        })
    }
}

impl BusConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            brokers: list("KAFKA_BROKERS"),
            topic_price_updates: string_or("KAFKA_TOPIC_PRICE_UPDATES", "skin.price.updated"),
            topic_skin_discovered: string_or("KAFKA_TOPIC_SKIN_DISCOVERED", "skin.discovered"),
            topic_price_alerts: string_or("KAFKA_TOPIC_PRICE_ALERTS", "notification.price_alert"),
            group_price_consumer: string_or("KAFKA_GROUP_PRICE_CONSUMER", "price-consumer-group"),
            group_notification_consumer: string_or(
                "KAFKA_GROUP_NOTIFICATION_CONSUMER",
                "notification-consumer-group",
            ),
            partitions: parse_or::<u32>("KAFKA_PARTITIONS", 6)?.max(1),
        })
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            addr: var("REDIS_ADDR"),
            password: var("REDIS_PASSWORD"),
            db: parse_or("REDIS_DB", 0)?,
        })
    }
}

impl MarketConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: string_or("STEAM_MARKET_BASE_URL", "https://steamcommunity.com"),
            app_id: parse_or("STEAM_APP_ID", 730)?,
            currency: parse_or("STEAM_CURRENCY", 1)?,
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            parser: ParserConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            bus: BusConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            market: MarketConfig::from_env()?,
            notify: NotifyConfig {
                email_relay_url: var("NOTIFY_EMAIL_RELAY_URL"),
                push_relay_url: var("NOTIFY_PUSH_RELAY_URL"),
                quiet_hours_offset: utc_offset("NOTIFY_QUIET_HOURS_UTC_OFFSET")?,
            },
            retention_days: parse_or("PRICE_HISTORY_RETENTION_DAYS", 90)?,
            http_port: parse_or("HTTP_PORT", 8080)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env mutation is process-wide; each test uses its own variable names.

    #[test]
    fn test_parse_or_default_and_invalid() {
        assert_eq!(parse_or::<u64>("SKINWATCH_TEST_UNSET_NUMBER", 7).unwrap(), 7);

        unsafe { env::set_var("SKINWATCH_TEST_BAD_NUMBER", "abc") };
        assert!(matches!(
            parse_or::<u64>("SKINWATCH_TEST_BAD_NUMBER", 7),
            Err(PipelineError::BadConfig(_))
        ));
    }

    #[test]
    fn test_utc_offset() {
        assert_eq!(utc_offset("SKINWATCH_TEST_UNSET_OFFSET").unwrap(), None);

        unsafe { env::set_var("SKINWATCH_TEST_OFFSET", "+03:00") };
        assert_eq!(
            utc_offset("SKINWATCH_TEST_OFFSET").unwrap(),
            FixedOffset::east_opt(3 * 3600)
        );
        unsafe { env::set_var("SKINWATCH_TEST_OFFSET_BAD", "Mars/Olympus") };
        assert!(matches!(
            utc_offset("SKINWATCH_TEST_OFFSET_BAD"),
            Err(PipelineError::BadConfig(_))
        ));
    }

    #[test]
    fn test_list_and_bool() {
        unsafe { env::set_var("SKINWATCH_TEST_LIST", "a, b,,c ") };
        assert_eq!(list("SKINWATCH_TEST_LIST"), vec!["a", "b", "c"]);

        unsafe { env::set_var("SKINWATCH_TEST_BOOL", "TRUE") };
        assert!(bool_or("SKINWATCH_TEST_BOOL", false).unwrap());
        unsafe { env::set_var("SKINWATCH_TEST_BOOL_BAD", "maybe") };
        assert!(bool_or("SKINWATCH_TEST_BOOL_BAD", false).is_err());
    }
}
