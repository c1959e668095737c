//! Skin naming helpers
//!
//! Marketplace hash names carry weapon, finish and wear in one string,
//! e.g. "StatTrak™ AK-47 | Redline (Field-Tested)". Everything here is pure.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref WEAR_SUFFIX_REGEX: Regex = Regex::new(
        r"\s*\((Factory New|Minimal Wear|Field-Tested|Well-Worn|Battle-Scarred)\)\s*$"
    ).unwrap();

    static ref RARITY_REGEX: Regex = Regex::new(
        r"^(?:StatTrak™\s+|Souvenir\s+|★\s+)?(Consumer Grade|Industrial Grade|Mil-Spec Grade|Mil-Spec|Restricted|Classified|Covert|Contraband|Base Grade|High Grade|Remarkable|Exotic|Extraordinary)\b"
    ).unwrap();
}

const STATTRAK_PREFIX: &str = "StatTrak™";
const SOUVENIR_PREFIX: &str = "Souvenir";
const STAR_PREFIX: &str = "★";

/// Components of a market hash name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHashName {
    /// Weapon string, e.g. "AK-47" or "Karambit"
    pub weapon: String,
    /// Display name without wear, e.g. "StatTrak™ AK-47 | Redline"
    pub name: String,
    /// Wear, e.g. "Field-Tested"; empty for items without wear
    pub quality: String,
    pub stattrak: bool,
    pub souvenir: bool,
}

pub fn parse_market_hash_name(hash_name: &str) -> ParsedHashName {
    let trimmed = hash_name.trim();

    let quality = WEAR_SUFFIX_REGEX
        .captures(trimmed)
        .map(|cap| cap[1].to_string())
        .unwrap_or_default();
    let name = WEAR_SUFFIX_REGEX.replace(trimmed, "").trim().to_string();

    // Strip decorations to get at the weapon
    let mut rest = name.as_str();
    let mut stattrak = false;
    let mut souvenir = false;
    loop {
        let before = rest;
        if let Some(r) = rest.strip_prefix(STAR_PREFIX) {
            rest = r.trim_start();
        }
        if let Some(r) = rest.strip_prefix(STATTRAK_PREFIX) {
            stattrak = true;
            rest = r.trim_start();
        }
        if let Some(r) = rest.strip_prefix(SOUVENIR_PREFIX) {
            souvenir = true;
            rest = r.trim_start();
        }
        if before == rest {
            break;
        }
    }

    let weapon = rest.split('|').next().unwrap_or(rest).trim().to_string();

    ParsedHashName {
        weapon,
        name,
        quality,
        stattrak,
        souvenir,
    }
}

/// Deterministic URL slug from name + quality
pub fn slugify(name: &str, quality: &str) -> String {
    let mut slug = String::with_capacity(name.len() + quality.len() + 1);
    let mut pending_dash = false;

    for c in name.chars().chain(std::iter::once(' ')).chain(quality.chars()) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c != '™' && c != '★' {
            pending_dash = true;
        }
    }

    slug
}

/// Extract rarity from a marketplace type line such as "Classified Rifle"
pub fn rarity_from_type(type_line: &str) -> Option<String> {
    RARITY_REGEX
        .captures(type_line.trim())
        .map(|cap| cap[1].to_string())
}

/// Input for CreateItem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSkin {
    pub market_hash_name: String,
    pub name: String,
    pub weapon: String,
    pub quality: String,
    #[serde(default = "default_rarity")]
    pub rarity: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub initial_price: Option<Decimal>,
}

fn default_rarity() -> String {
    "Unknown".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

impl NewSkin {
    /// Build from a bare hash name, deriving weapon, name and quality
    pub fn from_hash_name(hash_name: &str) -> Self {
        let parsed = parse_market_hash_name(hash_name);
        Self {
            market_hash_name: hash_name.trim().to_string(),
            name: parsed.name,
            weapon: parsed.weapon,
            quality: parsed.quality,
            rarity: default_rarity(),
            image_url: None,
            currency: default_currency(),
            initial_price: None,
        }
    }

    pub fn slug(&self) -> String {
        slugify(&self.name, &self.quality)
    }
}
