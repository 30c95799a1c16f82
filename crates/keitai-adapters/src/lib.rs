//! Capture adapter contracts + fixture-first carrier page parsers.
//!
//! Adapters never fetch anything. They read page text that was captured
//! elsewhere and turn it into raw offers, campaign hits and stock maps.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keitai_core::{Carrier, RawBatch, RawCampaignHit, RawOffer, StockMap, StockVariant};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "keitai-adapters";

/// Stock display text is cut to this many characters.
pub const STOCK_TEXT_MAX_CHARS: usize = 20;

/// UQ mobile secondary price pattern ignores anything cheaper than this.
pub const UQ_SECONDARY_MIN_PRICE: i64 = 20_000;

const IN_STOCK_PHRASES: [&str; 2] = ["在庫あり", "In stock"];
const RAKUTEN_ROW_LABELS: [&str; 2] = ["楽天モバイル", "Rakuten Mobile"];
const RAKUTEN_STOCK_AREA_CLASS: &str = "product-iphone-stock-Layout_Product-area";

static POINTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9０-９,，]{4,})\s*ポイント").expect("valid points pattern"));
static STORAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(GB|TB)").expect("valid storage pattern"));
static UQ_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(64GB|128GB|256GB|512GB|1TB).*?機種代金\s*[:：]?\s*([0-9０-９,，]+)円")
        .expect("valid uq price pattern")
});
static UQ_LOOSE_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(64GB|128GB|256GB|512GB|1TB).*?([0-9０-９,，]{4,})円").expect("valid uq loose pattern")
});
static UQ_DISCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"最大割引額.*?(-?[0-9０-９,，]+)円").expect("valid uq discount pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Fee,
    Stock,
    Campaign,
    Listing,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedPage {
    pub kind: PageKind,
    pub url: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub inline_text: Option<String>,
}

/// A carrier's captured pages, plus pre-extracted records used when the
/// pages themselves yield nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureBundle {
    pub fixture_id: String,
    pub carrier: Carrier,
    pub captured_from_url: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub pages: Vec<CapturedPage>,
    #[serde(default)]
    pub parsed: RawBatch,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub trait CarrierAdapter: Send + Sync {
    fn carrier(&self) -> Carrier;

    fn parse_page(&self, kind: PageKind, url: &str, text: &str) -> Result<RawBatch, AdapterError>;

    fn parse(&self, bundle: &CaptureBundle) -> Result<RawBatch, AdapterError> {
        if bundle.carrier != self.carrier() {
            return Err(AdapterError::Message(format!(
                "bundle carrier={} does not match adapter carrier={}",
                bundle.carrier,
                self.carrier()
            )));
        }
        let mut batch = RawBatch::default();
        for page in &bundle.pages {
            let Some(text) = page.inline_text.as_deref() else {
                debug!(url = %page.url, "captured page has no text; skipping");
                continue;
            };
            batch.extend(self.parse_page(page.kind, &page.url, text)?);
        }
        if batch.is_empty() {
            return Ok(bundle.parsed.clone());
        }
        Ok(batch)
    }
}

pub fn load_capture_bundle(path: impl AsRef<Path>) -> Result<CaptureBundle> {
    let path = path.as_ref();
    let mut bundle: CaptureBundle = read_json_file(path)?;
    hydrate_page_texts(path, &mut bundle)?;
    Ok(bundle)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_page_texts(bundle_path: &Path, bundle: &mut CaptureBundle) -> Result<()> {
    let base = bundle_path.parent().unwrap_or_else(|| Path::new("."));
    for page in &mut bundle.pages {
        if page.inline_text.is_some() {
            continue;
        }
        let Some(rel_path) = &page.path else {
            continue;
        };
        let page_path = base.join(rel_path);
        if !page_path.exists() {
            continue;
        }
        let text = fs::read_to_string(&page_path)
            .with_context(|| format!("reading captured page {}", page_path.display()))?;
        page.inline_text = Some(text);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Field parsers shared by every carrier.
// ---------------------------------------------------------------------------

/// ASCII form of a half- or full-width decimal digit.
fn ascii_digit(ch: char) -> Option<char> {
    match ch {
        '0'..='9' => Some(ch),
        '０'..='９' => char::from_u32(u32::from(ch) - u32::from('０') + u32::from('0')),
        _ => None,
    }
}

fn is_thousands_separator(ch: char) -> bool {
    matches!(ch, ',' | '，')
}

/// Digits of a captured amount, any width; everything else is dropped.
fn parse_amount(text: &str) -> Option<i64> {
    let digits = text.chars().filter_map(ascii_digit).collect::<String>();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Integer runs in `text`, with thousands separators inside a run ignored.
pub fn extract_numbers(text: &str) -> Vec<i64> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if let Some(digit) = ascii_digit(ch) {
            current.push(digit);
            continue;
        }
        if is_thousands_separator(ch) && !current.is_empty() {
            continue;
        }
        if !current.is_empty() {
            if let Ok(v) = current.parse::<i64>() {
                out.push(v);
            }
            current.clear();
        }
    }
    if !current.is_empty() {
        if let Ok(v) = current.parse::<i64>() {
            out.push(v);
        }
    }
    out
}

/// First yen amount in `text`; `None` when no digits are present.
pub fn parse_yen(text: &str) -> Option<i64> {
    extract_numbers(text).first().copied()
}

/// Largest "N ポイント" amount mentioned in `text`.
pub fn max_points_in_text(text: &str) -> Option<i64> {
    POINTS_RE
        .captures_iter(text)
        .filter_map(|caps| parse_amount(&caps[1]))
        .max()
}

/// First capacity label such as `128GB` or `1TB`.
pub fn storage_label(text: &str) -> Option<String> {
    STORAGE_RE.find(text).map(|m| m.as_str().to_string())
}

pub fn is_in_stock(status_text: &str) -> bool {
    IN_STOCK_PHRASES.iter().any(|phrase| status_text.contains(phrase))
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn first_text_in(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .and_then(|n| text_or_none(element_text(n)))
}

// ---------------------------------------------------------------------------
// Rakuten Mobile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct RakutenAdapter;

impl CarrierAdapter for RakutenAdapter {
    fn carrier(&self) -> Carrier {
        Carrier::Rakuten
    }

    fn parse_page(&self, kind: PageKind, url: &str, text: &str) -> Result<RawBatch, AdapterError> {
        match kind {
            PageKind::Fee => Ok(RawBatch {
                offers: parse_rakuten_fee_page(text, url)?,
                ..RawBatch::default()
            }),
            PageKind::Stock => Ok(RawBatch {
                stock: parse_rakuten_stock_page(text)?,
                ..RawBatch::default()
            }),
            PageKind::Campaign => Ok(RawBatch {
                campaign_hits: vec![campaign_hit_from_page(url, text)],
                ..RawBatch::default()
            }),
            other => Err(unsupported_page(self.carrier(), other)),
        }
    }
}

/// Price rows of the fee table, one offer per capacity column.
pub fn parse_rakuten_fee_page(html: &str, url: &str) -> Result<Vec<RawOffer>, AdapterError> {
    let document = Html::parse_document(html);
    let section_sel = selector(".product-iphone-Fee_Media")?;
    let name_sel = selector("h3, .product-iphone-Fee_Product-name")?;
    let table_sel = selector("table.c-Table_Container")?;
    let head_sel = selector("thead th")?;
    let row_sel = selector("tbody tr")?;
    let th_sel = selector("th")?;
    let td_sel = selector("td")?;

    let mut offers = Vec::new();
    for section in document.select(&section_sel) {
        let Some(model) = first_text_in(section, &name_sel) else {
            debug!("fee section without a model name; skipping");
            continue;
        };
        let Some(table) = section.select(&table_sel).next() else {
            debug!(%model, "no fee table");
            continue;
        };
        let storages = table
            .select(&head_sel)
            .filter_map(|th| text_or_none(element_text(th)))
            .filter(|t| t.contains("GB") || t.contains("TB"))
            .collect::<Vec<_>>();

        let rakuten_row = table.select(&row_sel).find(|row| {
            row.select(&th_sel)
                .next()
                .map(|th| {
                    let label = element_text(th);
                    RAKUTEN_ROW_LABELS.iter().any(|l| label.contains(l))
                })
                .unwrap_or(false)
        });
        let Some(row) = rakuten_row else {
            debug!(%model, "no Rakuten price row");
            continue;
        };

        let cells = row.select(&td_sel).collect::<Vec<_>>();
        for (storage, cell) in storages.iter().zip(cells) {
            let Some(price_gross) = parse_yen(&element_text(cell)) else {
                continue;
            };
            offers.push(RawOffer {
                carrier: Carrier::Rakuten,
                model: model.clone(),
                storage: Some(storage.clone()),
                price_gross,
                discount_official: None,
                rent_price_displayed: None,
                source_url: url.to_string(),
            });
        }
    }
    Ok(offers)
}

/// Per-model colour/capacity availability from the stock page.
pub fn parse_rakuten_stock_page(html: &str) -> Result<StockMap, AdapterError> {
    let document = Html::parse_document(html);
    let header_sel = selector(".product-iphone-stock-Layout_Product-name")?;
    let color_block_sel = selector(".color-details")?;
    let color_name_sel = selector(".c-Heading_Lv4, h4")?;
    let row_sel = selector("table tbody tr")?;
    let td_sel = selector("td")?;

    let mut stock = StockMap::new();
    for header in document.select(&header_sel) {
        let model = element_text(header).trim().to_string();
        let area = header
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().classes().any(|c| c == RAKUTEN_STOCK_AREA_CLASS));
        let Some(area) = area else {
            debug!(%model, "no stock area");
            continue;
        };

        let by_storage = stock.entry(model.clone()).or_default();
        for block in area.select(&color_block_sel) {
            let Some(color) = first_text_in(block, &color_name_sel) else {
                continue;
            };
            for row in block.select(&row_sel) {
                let cols = row.select(&td_sel).collect::<Vec<_>>();
                if cols.len() < 2 {
                    continue;
                }
                // Watch bands and other accessories share the table layout.
                let Some(storage) = storage_label(&element_text(cols[0])) else {
                    continue;
                };
                let status = element_text(cols[1]);
                by_storage.entry(storage).or_default().push(StockVariant {
                    color: color.clone(),
                    stock_text: truncate_chars(&status, STOCK_TEXT_MAX_CHARS),
                    stock_available: is_in_stock(&status),
                });
            }
        }
        debug!(%model, capacities = by_storage.len(), "parsed stock");
    }
    Ok(stock)
}

/// A campaign page is attributed by its URL; its points live in the body.
pub fn campaign_hit_from_page(url: &str, html: &str) -> RawCampaignHit {
    RawCampaignHit {
        source_text: url.to_string(),
        url: url.to_string(),
        points_text: html.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ahamo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct AhamoAdapter;

impl CarrierAdapter for AhamoAdapter {
    fn carrier(&self) -> Carrier {
        Carrier::Ahamo
    }

    fn parse_page(&self, kind: PageKind, url: &str, text: &str) -> Result<RawBatch, AdapterError> {
        match kind {
            PageKind::Listing => Ok(RawBatch {
                offers: parse_ahamo_listing(text, url)?,
                ..RawBatch::default()
            }),
            other => Err(unsupported_page(self.carrier(), other)),
        }
    }
}

/// Product cards of the listing page. Storage is not shown there.
pub fn parse_ahamo_listing(html: &str, url: &str) -> Result<Vec<RawOffer>, AdapterError> {
    let document = Html::parse_document(html);
    let card_sel = selector("a.a-product-thumbnail-link")?;
    let name_sel = selector(".a-product-thumbnail__name")?;
    let alt_name_sel = selector(".a-product-thumbnail-link__name")?;
    let gross_sel = selector(".a-product-thumbnail__price .a-price-amount")?;
    let legacy_gross_sel = selector(".a-product-thumbnail-link__price-number")?;
    let rent_sel =
        selector(".a-product-thumbnail-link__kaedoki-campaign-content-price-item-price .a-price-amount")?;
    let discount_sel = selector(
        ".a-product-thumbnail-link__kaedoki-campaign-content-price-item-discount .a-price-amount",
    )?;

    let amount = |card: ElementRef<'_>, sel: &Selector| {
        card.select(sel)
            .next()
            .and_then(|el| parse_yen(&element_text(el)))
    };

    let mut offers = Vec::new();
    for card in document.select(&card_sel) {
        let Some(model) = first_text_in(card, &name_sel).or_else(|| first_text_in(card, &alt_name_sel))
        else {
            continue;
        };
        let price_gross = amount(card, &gross_sel)
            .filter(|v| *v > 0)
            .or_else(|| amount(card, &legacy_gross_sel))
            .unwrap_or(0);
        offers.push(RawOffer {
            carrier: Carrier::Ahamo,
            model,
            storage: None,
            price_gross,
            discount_official: amount(card, &discount_sel),
            rent_price_displayed: amount(card, &rent_sel),
            source_url: url.to_string(),
        });
    }
    Ok(offers)
}

// ---------------------------------------------------------------------------
// UQ mobile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct UqMobileAdapter;

impl CarrierAdapter for UqMobileAdapter {
    fn carrier(&self) -> Carrier {
        Carrier::UqMobile
    }

    fn parse_page(&self, kind: PageKind, url: &str, text: &str) -> Result<RawBatch, AdapterError> {
        match kind {
            PageKind::Model => Ok(RawBatch {
                offers: parse_uq_model_page(text, url)?,
                ..RawBatch::default()
            }),
            other => Err(unsupported_page(self.carrier(), other)),
        }
    }
}

/// Model page prices. Duplicated capacities are kept; the pricing strategy
/// decides which one wins.
pub fn parse_uq_model_page(html: &str, url: &str) -> Result<Vec<RawOffer>, AdapterError> {
    let document = Html::parse_document(html);
    let mut model = None;
    for css in ["h1", ".product-name", "title"] {
        let sel = selector(css)?;
        model = document
            .select(&sel)
            .map(element_text)
            .find(|t| t.contains("iPhone"))
            .map(|t| t.trim().to_string());
        if model.is_some() {
            break;
        }
    }
    let model = model.unwrap_or_else(|| "Unknown iPhone".to_string());
    let discount_official = uq_max_discount(html);

    let offer = |storage: &str, price_gross: i64| RawOffer {
        carrier: Carrier::UqMobile,
        model: model.clone(),
        storage: Some(storage.to_string()),
        price_gross,
        discount_official,
        rent_price_displayed: None,
        source_url: url.to_string(),
    };

    let mut offers = UQ_PRICE_RE
        .captures_iter(html)
        .filter_map(|caps| parse_yen(&caps[2]).map(|price| offer(&caps[1], price)))
        .collect::<Vec<_>>();
    if offers.is_empty() {
        offers = UQ_LOOSE_PRICE_RE
            .captures_iter(html)
            .filter_map(|caps| parse_yen(&caps[2]).map(|price| (caps[1].to_string(), price)))
            .filter(|(_, price)| *price >= UQ_SECONDARY_MIN_PRICE)
            .map(|(storage, price)| offer(&storage, price))
            .collect();
    }
    Ok(offers)
}

/// "最大割引額" amount with its sign dropped.
pub fn uq_max_discount(text: &str) -> Option<i64> {
    UQ_DISCOUNT_RE
        .captures(text)
        .and_then(|caps| parse_amount(&caps[1]))
}

// ---------------------------------------------------------------------------

fn unsupported_page(carrier: Carrier, kind: PageKind) -> AdapterError {
    AdapterError::Message(format!("{carrier} adapter cannot parse {kind:?} pages"))
}

pub fn rakuten_adapter() -> impl CarrierAdapter {
    RakutenAdapter
}

pub fn ahamo_adapter() -> impl CarrierAdapter {
    AhamoAdapter
}

pub fn uq_mobile_adapter() -> impl CarrierAdapter {
    UqMobileAdapter
}

pub fn adapter_for_carrier(carrier: Carrier) -> Box<dyn CarrierAdapter> {
    match carrier {
        Carrier::Rakuten => Box::new(RakutenAdapter),
        Carrier::Ahamo => Box::new(AhamoAdapter),
        Carrier::UqMobile => Box::new(UqMobileAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GoldenOffer {
        model: String,
        storage: Option<String>,
        price_gross: i64,
        discount_official: Option<i64>,
        rent_price_displayed: Option<i64>,
    }

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture_bundle_path(carrier: Carrier) -> PathBuf {
        workspace_root()
            .join("fixtures")
            .join(carrier.slug())
            .join("sample")
            .join("bundle.json")
    }

    fn expected_snapshot_path(carrier: Carrier) -> PathBuf {
        workspace_root()
            .join("fixtures")
            .join(carrier.slug())
            .join("sample")
            .join("snapshot.json")
    }

    fn offers_to_golden(offers: &[RawOffer]) -> Vec<GoldenOffer> {
        offers
            .iter()
            .map(|o| GoldenOffer {
                model: o.model.clone(),
                storage: o.storage.clone(),
                price_gross: o.price_gross,
                discount_official: o.discount_official,
                rent_price_displayed: o.rent_price_displayed,
            })
            .collect()
    }

    fn read_snapshot(path: &Path) -> Vec<GoldenOffer> {
        let text = fs::read_to_string(path).expect("read snapshot");
        serde_json::from_str(&text).expect("parse snapshot")
    }

    fn assert_golden(carrier: Carrier) -> RawBatch {
        let adapter = adapter_for_carrier(carrier);
        let bundle = load_capture_bundle(fixture_bundle_path(carrier)).unwrap();
        let batch = adapter.parse(&bundle).unwrap();
        assert!(batch.offers.iter().all(|o| o.carrier == carrier));
        let actual = offers_to_golden(&batch.offers);
        let expected = read_snapshot(&expected_snapshot_path(carrier));
        assert_eq!(actual, expected);
        batch
    }

    #[test]
    fn golden_json_snapshot_test_rakuten() {
        let batch = assert_golden(Carrier::Rakuten);
        assert_eq!(batch.campaign_hits.len(), 3);
        let variants = &batch.stock["iPhone 16e"]["128GB"];
        assert_eq!(variants.len(), 2);
        assert!(variants[0].stock_available);
        assert!(!variants[1].stock_available);
        assert!(!batch.stock["iPhone 16e"].contains_key("Black S/M"));
    }

    #[test]
    fn golden_json_snapshot_test_ahamo() {
        assert_golden(Carrier::Ahamo);
    }

    #[test]
    fn golden_json_snapshot_test_uq_mobile() {
        assert_golden(Carrier::UqMobile);
    }

    #[test]
    fn bundle_with_unreadable_pages_falls_back_to_parsed_records() {
        let mut bundle = load_capture_bundle(fixture_bundle_path(Carrier::Ahamo)).unwrap();
        for page in &mut bundle.pages {
            page.inline_text = None;
        }
        bundle.parsed.offers.push(RawOffer {
            carrier: Carrier::Ahamo,
            model: "iPhone SE (第3世代)".into(),
            storage: None,
            price_gross: 70_290,
            discount_official: None,
            rent_price_displayed: None,
            source_url: "https://ahamo.com/products/iphone/".into(),
        });
        let batch = ahamo_adapter().parse(&bundle).unwrap();
        assert_eq!(batch.offers.len(), 1);
        assert_eq!(batch.offers[0].price_gross, 70_290);
    }

    #[test]
    fn adapter_rejects_bundle_of_another_carrier() {
        let bundle = load_capture_bundle(fixture_bundle_path(Carrier::Ahamo)).unwrap();
        let err = rakuten_adapter().parse(&bundle).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn adapter_rejects_page_kinds_it_does_not_understand() {
        let err = uq_mobile_adapter()
            .parse_page(PageKind::Stock, "https://www.uqwimax.jp/mobile/iphone/", "")
            .unwrap_err();
        assert!(err.to_string().contains("cannot parse"));
    }

    #[test]
    fn numbers_skip_thousands_separators() {
        assert_eq!(extract_numbers("¥104,800 / 24回 4,366円"), vec![104_800, 24, 4_366]);
        assert_eq!(parse_yen("価格未定"), None);
        assert_eq!(parse_yen(",,"), None);
    }

    #[test]
    fn points_take_the_largest_amount() {
        let text = "最大 12,000ポイント 還元！ さらに 30,000 ポイント。 抽選で500ポイント";
        assert_eq!(max_points_in_text(text), Some(30_000));
        assert_eq!(max_points_in_text("ポイント還元なし"), None);
        assert_eq!(max_points_in_text(",,,,ポイント"), None);
    }

    #[test]
    fn storage_label_and_stock_phrases() {
        assert_eq!(storage_label(" 256GB "), Some("256GB".to_string()));
        assert_eq!(storage_label("1TB"), Some("1TB".to_string()));
        assert_eq!(storage_label("Black S/M"), None);
        assert!(is_in_stock("在庫あり"));
        assert!(is_in_stock("In stock (online)"));
        assert!(!is_in_stock("在庫なし"));
    }

    #[test]
    fn stock_text_is_trimmed_then_truncated() {
        let text = "  在庫あり（お届けまで1〜2週間程度かかる場合があります）  ";
        let truncated = truncate_chars(text, STOCK_TEXT_MAX_CHARS);
        assert_eq!(truncated.chars().count(), STOCK_TEXT_MAX_CHARS);
        assert!(truncated.starts_with("在庫あり"));
    }

    #[test]
    fn full_width_amounts_parse_like_ascii() {
        assert_eq!(extract_numbers("¥１０４，８００ / ２４回"), vec![104_800, 24]);
        assert_eq!(parse_yen("１１２８００円"), Some(112_800));
        assert_eq!(max_points_in_text("最大２５０００ポイント還元"), Some(25_000));
        assert_eq!(max_points_in_text("２５，０００ポイント / 30,000ポイント"), Some(30_000));
        assert_eq!(uq_max_discount("最大割引額 －４４，０００円"), Some(44_000));
        assert_eq!(uq_max_discount("最大割引額 -４４，０００円"), Some(44_000));
    }

    #[test]
    fn uq_model_page_reads_full_width_prices() {
        let html = "<h1>iPhone 15</h1><p>128GB 機種代金：１１２８００円</p>";
        let offers = parse_uq_model_page(html, "https://www.uqwimax.jp/mobile/iphone/15/").unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].storage.as_deref(), Some("128GB"));
        assert_eq!(offers[0].price_gross, 112_800);
    }

    #[test]
    fn uq_discount_pattern_drops_sign() {
        assert_eq!(uq_max_discount("最大割引額 -44,000円"), Some(44_000));
        assert_eq!(uq_max_discount("割引なし"), None);
    }

    #[test]
    fn uq_secondary_pattern_ignores_cheap_amounts() {
        let html = "<html><h1>iPhone 15</h1><p>128GB 月々 1,980円</p><p>256GB 一括 131,800円</p></html>";
        let offers = parse_uq_model_page(html, "https://www.uqwimax.jp/mobile/iphone/15/").unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].storage.as_deref(), Some("256GB"));
        assert_eq!(offers[0].price_gross, 131_800);
        assert_eq!(offers[0].discount_official, None);
    }

    #[test]
    fn uq_model_name_falls_back_when_no_heading_mentions_iphone() {
        let html = "<html><head><title>UQ mobile</title></head><body><h1>機種一覧</h1></body></html>";
        let offers = parse_uq_model_page(html, "https://www.uqwimax.jp/mobile/iphone/se/").unwrap();
        assert!(offers.is_empty());
        let html = "<html><h1>機種</h1><p>128GB 機種代金：98,000円</p></html>";
        let offers = parse_uq_model_page(html, "https://www.uqwimax.jp/mobile/iphone/se/").unwrap();
        assert_eq!(offers[0].model, "Unknown iPhone");
    }
}
