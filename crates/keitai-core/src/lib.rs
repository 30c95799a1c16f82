//! Core domain model for carrier price reconciliation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "keitai-core";

/// Layout of `Snapshot::updated_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Carriers in output order. `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Carrier {
    #[serde(rename = "Rakuten", alias = "rakuten")]
    Rakuten,
    #[serde(rename = "ahamo", alias = "Ahamo")]
    Ahamo,
    #[serde(rename = "UQ mobile", alias = "uq-mobile", alias = "UQMobile")]
    UqMobile,
}

impl Carrier {
    pub const ALL: [Carrier; 3] = [Carrier::Rakuten, Carrier::Ahamo, Carrier::UqMobile];

    pub fn display_name(self) -> &'static str {
        match self {
            Carrier::Rakuten => "Rakuten",
            Carrier::Ahamo => "ahamo",
            Carrier::UqMobile => "UQ mobile",
        }
    }

    /// Slug used for fixture directories and config files.
    pub fn slug(self) -> &'static str {
        match self {
            Carrier::Rakuten => "rakuten",
            Carrier::Ahamo => "ahamo",
            Carrier::UqMobile => "uq-mobile",
        }
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One scraped price observation, before any carrier rules are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOffer {
    pub carrier: Carrier,
    pub model: String,
    /// Capacity label as scraped; absent when the page does not show one.
    #[serde(default)]
    pub storage: Option<String>,
    pub price_gross: i64,
    /// Carrier-stated discount, absent when the page did not expose one.
    #[serde(default)]
    pub discount_official: Option<i64>,
    #[serde(default)]
    pub rent_price_displayed: Option<i64>,
    pub source_url: String,
}

/// One observed point-value mention on a promotional page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCampaignHit {
    /// Free text used to attribute the hit to a model (URL, title, heading).
    pub source_text: String,
    pub url: String,
    /// Page text holding the point amounts.
    pub points_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockVariant {
    pub color: String,
    pub stock_text: String,
    pub stock_available: bool,
}

/// `model -> storage label -> variants in page order`.
pub type StockMap = BTreeMap<String, BTreeMap<String, Vec<StockVariant>>>;

/// Everything one adapter extracted for a carrier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBatch {
    #[serde(default)]
    pub offers: Vec<RawOffer>,
    #[serde(default)]
    pub campaign_hits: Vec<RawCampaignHit>,
    #[serde(default)]
    pub stock: StockMap,
}

impl RawBatch {
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty() && self.campaign_hits.is_empty() && self.stock.is_empty()
    }

    /// Append another batch. Stock variants for an existing key pair are
    /// appended after the ones already present.
    pub fn extend(&mut self, other: RawBatch) {
        self.offers.extend(other.offers);
        self.campaign_hits.extend(other.campaign_hits);
        for (model, storages) in other.stock {
            let entry = self.stock.entry(model).or_default();
            for (storage, variants) in storages {
                entry.entry(storage).or_default().extend(variants);
            }
        }
    }
}

/// Unit of output. Field names are a stable contract for downstream readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOffer {
    pub carrier: Carrier,
    pub model: String,
    pub storage: String,
    pub price_gross: i64,
    pub discount_official: i64,
    pub program_exemption: i64,
    pub points_awarded: i64,
    pub price_effective_buyout: i64,
    pub price_effective_rent: i64,
    pub variants: Vec<StockVariant>,
    pub url: String,
}

/// One batch run's output document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub updated_at: String,
    pub items: Vec<NormalizedOffer>,
}

pub fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};

    #[test]
    fn carrier_order_follows_enumeration() {
        let mut carriers = vec![Carrier::UqMobile, Carrier::Rakuten, Carrier::Ahamo];
        carriers.sort();
        assert_eq!(carriers, Carrier::ALL.to_vec());
    }

    #[test]
    fn carrier_serializes_with_display_names_and_reads_slugs() {
        let json = serde_json::to_string(&Carrier::UqMobile).unwrap();
        assert_eq!(json, "\"UQ mobile\"");
        let parsed: Carrier = serde_json::from_str("\"uq-mobile\"").unwrap();
        assert_eq!(parsed, Carrier::UqMobile);
        let parsed: Carrier = serde_json::from_str("\"rakuten\"").unwrap();
        assert_eq!(parsed, Carrier::Rakuten);
    }

    #[test]
    fn timestamp_uses_minute_precision() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 59).single().unwrap();
        assert_eq!(format_timestamp(&at), "2026-03-01 09:05");
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(format_timestamp(&at.with_timezone(&tokyo)), "2026-03-01 18:05");
    }

    #[test]
    fn raw_offer_optional_fields_default_to_absent() {
        let offer: RawOffer = serde_json::from_str(
            r#"{"carrier":"ahamo","model":"iPhone 16","price_gross":144980,"source_url":"https://ahamo.com/products/iphone/"}"#,
        )
        .unwrap();
        assert_eq!(offer.storage, None);
        assert_eq!(offer.discount_official, None);
        assert_eq!(offer.rent_price_displayed, None);
    }

    #[test]
    fn extend_appends_stock_variants_under_existing_keys() {
        let variant = |color: &str| StockVariant {
            color: color.to_string(),
            stock_text: "在庫あり".to_string(),
            stock_available: true,
        };
        let mut a = RawBatch::default();
        a.stock
            .entry("iPhone 16".into())
            .or_default()
            .insert("128GB".into(), vec![variant("Black")]);
        let mut b = RawBatch::default();
        b.stock
            .entry("iPhone 16".into())
            .or_default()
            .insert("128GB".into(), vec![variant("White")]);
        a.extend(b);
        let colors: Vec<_> = a.stock["iPhone 16"]["128GB"].iter().map(|v| v.color.as_str()).collect();
        assert_eq!(colors, vec!["Black", "White"]);
    }
}
