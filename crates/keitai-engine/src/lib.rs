//! Price normalization + campaign resolution engine, and the batch run
//! that feeds it from captured bundles and writes the snapshot.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use keitai_adapters::{adapter_for_carrier, load_capture_bundle, max_points_in_text};
use keitai_core::{
    format_timestamp, Carrier, NormalizedOffer, RawBatch, RawCampaignHit, RawOffer, Snapshot,
    StockMap,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "keitai-engine";

/// Campaign hits for a model stop being folded once its points exceed this.
pub const DEFAULT_CAMPAIGN_CAP: i64 = 40_000;

/// UQ mobile discount used when the model page shows no maximum discount.
pub const DEFAULT_UQ_DISCOUNT: i64 = 22_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub carrier: Carrier,
    pub display_name: String,
    pub enabled: bool,
    /// Capture bundle, relative to the workspace root.
    pub bundle: PathBuf,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workspace_root: PathBuf,
    pub output_path: PathBuf,
    /// `None` disables the campaign early exit.
    pub campaign_cap: Option<i64>,
    pub uq_default_discount: i64,
    pub overrides_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            output_path: PathBuf::from("docs/data.json"),
            campaign_cap: Some(DEFAULT_CAMPAIGN_CAP),
            uq_default_discount: DEFAULT_UQ_DISCOUNT,
            overrides_path: PathBuf::from("rules/overrides.yaml"),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_root: std::env::var("KEITAI_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            output_path: std::env::var("KEITAI_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            campaign_cap: match std::env::var("KEITAI_CAMPAIGN_CAP") {
                Ok(v) => parse_cap(&v).unwrap_or(defaults.campaign_cap),
                Err(_) => defaults.campaign_cap,
            },
            uq_default_discount: std::env::var("KEITAI_UQ_DEFAULT_DISCOUNT")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|v: &i64| *v >= 0)
                .unwrap_or(defaults.uq_default_discount),
            overrides_path: std::env::var("KEITAI_OVERRIDES")
                .map(PathBuf::from)
                .unwrap_or(defaults.overrides_path),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    pub fn pricing_constants(&self) -> PricingConstants {
        PricingConstants {
            uq_default_discount: self.uq_default_discount,
        }
    }
}

/// `Some(None)` means "disabled"; `None` means unparsable.
fn parse_cap(value: &str) -> Option<Option<i64>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("off") || value == "0" {
        return Some(None);
    }
    value.parse::<i64>().ok().filter(|v| *v > 0).map(Some)
}

// ---------------------------------------------------------------------------
// Model classification
// ---------------------------------------------------------------------------

/// Models that campaign pages can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelKey {
    Iphone16e,
    Iphone16,
}

impl ModelKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKey::Iphone16e => "iPhone 16e",
            ModelKey::Iphone16 => "iPhone 16",
        }
    }

    /// `Iphone16` also swallows "16 Pro" and "16 Plus" text, so only the
    /// 16e key is trusted when matching fee-table names.
    pub fn is_unambiguous(self) -> bool {
        matches!(self, ModelKey::Iphone16e)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substring classification: "16e" wins over "16"; anything else is unknown.
pub fn classify_model(text: &str) -> Option<ModelKey> {
    if text.contains("16e") {
        Some(ModelKey::Iphone16e)
    } else if text.contains("16") {
        Some(ModelKey::Iphone16)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Campaign point resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignPointRecord {
    pub model_key: String,
    pub max_points: i64,
    pub visited_sources: BTreeSet<String>,
}

impl CampaignPointRecord {
    fn empty(model_key: &str) -> Self {
        Self {
            model_key: model_key.to_string(),
            max_points: 0,
            visited_sources: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    Unclassified,
    SkippedByCap,
    Duplicate,
    NoPoints,
    Folded { model_key: ModelKey, points: i64 },
}

/// Folds campaign hits one at a time into per-model maximum points.
#[derive(Debug, Clone)]
pub struct CampaignPointResolver {
    cap: Option<i64>,
    records: BTreeMap<String, CampaignPointRecord>,
}

impl Default for CampaignPointResolver {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CAMPAIGN_CAP))
    }
}

impl CampaignPointResolver {
    pub fn new(cap: Option<i64>) -> Self {
        Self {
            cap,
            records: BTreeMap::new(),
        }
    }

    pub fn fold(&mut self, hit: &RawCampaignHit) -> FoldOutcome {
        let Some(key) = classify_model(&hit.source_text) else {
            debug!(url = %hit.url, "campaign hit matches no known model");
            return FoldOutcome::Unclassified;
        };
        let record = self
            .records
            .entry(key.as_str().to_string())
            .or_insert_with(|| CampaignPointRecord::empty(key.as_str()));

        // Skip, never clamp: the stored maximum stays whatever was seen.
        if let Some(cap) = self.cap {
            if record.max_points > cap {
                debug!(model = %key, url = %hit.url, cap, "campaign cap reached; hit skipped");
                return FoldOutcome::SkippedByCap;
            }
        }
        if !record.visited_sources.insert(hit.url.clone()) {
            return FoldOutcome::Duplicate;
        }
        match max_points_in_text(&hit.points_text) {
            Some(points) => {
                if points > record.max_points {
                    debug!(model = %key, points, url = %hit.url, "campaign points raised");
                    record.max_points = points;
                }
                FoldOutcome::Folded {
                    model_key: key,
                    points,
                }
            }
            None => FoldOutcome::NoPoints,
        }
    }

    pub fn fold_all<'a>(&mut self, hits: impl IntoIterator<Item = &'a RawCampaignHit>) -> Vec<FoldOutcome> {
        hits.into_iter().map(|hit| self.fold(hit)).collect()
    }

    pub fn record(&self, model_key: &str) -> Option<&CampaignPointRecord> {
        self.records.get(model_key)
    }

    /// Read-only view handed to the pricing strategies.
    pub fn snapshot(&self) -> CampaignPoints {
        CampaignPoints(
            self.records
                .iter()
                .map(|(k, r)| (k.clone(), r.max_points))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignPoints(BTreeMap<String, i64>);

impl CampaignPoints {
    pub fn from_map(points: BTreeMap<String, i64>) -> Self {
        Self(points)
    }

    /// Exact model name first, then its classified key when that key is
    /// unambiguous.
    pub fn lookup(&self, model: &str) -> Option<i64> {
        if let Some(points) = self.0.get(model.trim()) {
            return Some(*points);
        }
        classify_model(model)
            .filter(|key| key.is_unambiguous())
            .and_then(|key| self.0.get(key.as_str()).copied())
    }
}

// ---------------------------------------------------------------------------
// Point overrides
// ---------------------------------------------------------------------------

/// Forces `points` for a carrier's models containing `model_contains`
/// whenever the resolved points are below `below`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointOverride {
    pub carrier: Carrier,
    pub model_contains: String,
    pub below: i64,
    pub points: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OverridesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<PointOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideTable {
    rules: Vec<PointOverride>,
}

impl OverrideTable {
    pub fn new(rules: Vec<PointOverride>) -> Self {
        Self { rules }
    }

    /// Rakuten's iPhone 16e near-zero promotion: the campaign pages undercount
    /// the points it needs.
    pub fn builtin() -> Self {
        Self::new(vec![PointOverride {
            carrier: Carrier::Rakuten,
            model_contains: "16e".to_string(),
            below: 50_000,
            points: 52_352,
            note: Some("iPhone 16e effective 1-yen campaign".to_string()),
        }])
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: OverridesFile = serde_yaml::from_str(text).context("parsing override rules")?;
        Ok(Self::new(file.rules))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Missing file means the builtin table; a broken file is an error.
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no override file; using builtin rules");
            return Ok(Self::builtin());
        }
        Self::from_path(path)
    }

    pub fn rules(&self) -> &[PointOverride] {
        &self.rules
    }

    pub fn apply(&self, carrier: Carrier, model: &str, points: i64) -> i64 {
        self.rules
            .iter()
            .find(|rule| rule.carrier == carrier && model.contains(&rule.model_contains))
            .filter(|rule| points < rule.below)
            .map(|rule| rule.points)
            .unwrap_or(points)
    }
}

// ---------------------------------------------------------------------------
// Carrier pricing strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingConstants {
    pub uq_default_discount: i64,
}

impl Default for PricingConstants {
    fn default() -> Self {
        Self {
            uq_default_discount: DEFAULT_UQ_DISCOUNT,
        }
    }
}

pub struct PricingContext<'a> {
    pub campaign: &'a CampaignPoints,
    pub overrides: &'a OverrideTable,
    pub constants: PricingConstants,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PricedBatch {
    pub offers: Vec<NormalizedOffer>,
    pub duplicates: usize,
}

pub trait PricingStrategy: Send + Sync {
    fn carrier(&self) -> Carrier;

    fn price(&self, offer: &RawOffer, ctx: &PricingContext<'_>) -> NormalizedOffer;

    fn price_all(&self, offers: &[RawOffer], ctx: &PricingContext<'_>) -> PricedBatch {
        PricedBatch {
            offers: offers.iter().map(|o| self.price(o, ctx)).collect(),
            duplicates: 0,
        }
    }
}

fn normalize_model(model: &str) -> String {
    model.trim().to_string()
}

fn unpriced(raw: &RawOffer, storage: String) -> NormalizedOffer {
    NormalizedOffer {
        carrier: raw.carrier,
        model: normalize_model(&raw.model),
        storage,
        price_gross: raw.price_gross,
        discount_official: 0,
        program_exemption: 0,
        points_awarded: 0,
        price_effective_buyout: 0,
        price_effective_rent: 0,
        variants: Vec::new(),
        url: raw.source_url.clone(),
    }
}

/// Return program forgives half the device price; campaign points apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct RakutenStrategy;

impl PricingStrategy for RakutenStrategy {
    fn carrier(&self) -> Carrier {
        Carrier::Rakuten
    }

    fn price(&self, raw: &RawOffer, ctx: &PricingContext<'_>) -> NormalizedOffer {
        let mut offer = unpriced(raw, raw.storage.clone().unwrap_or_default());
        let gross = raw.price_gross;
        let discount = raw.discount_official.unwrap_or(0).max(0);
        let points = ctx.campaign.lookup(&offer.model).unwrap_or(0);
        let points = ctx.overrides.apply(Carrier::Rakuten, &offer.model, points);
        let exemption = gross / 2;

        offer.discount_official = discount;
        offer.program_exemption = exemption;
        offer.points_awarded = points;
        offer.price_effective_buyout = (gross - discount - points).max(0);
        offer.price_effective_rent = (gross - discount - exemption - points).max(0);
        offer
    }
}

/// The program's share is inferred from the displayed "customer burden"
/// figure. That figure is assumed to exclude points.
#[derive(Debug, Clone, Copy, Default)]
pub struct AhamoStrategy;

impl PricingStrategy for AhamoStrategy {
    fn carrier(&self) -> Carrier {
        Carrier::Ahamo
    }

    fn price(&self, raw: &RawOffer, ctx: &PricingContext<'_>) -> NormalizedOffer {
        let storage = raw
            .storage
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| infer_ahamo_storage(&raw.model).to_string());
        let mut offer = unpriced(raw, storage);
        let gross = raw.price_gross;
        let discount = raw.discount_official.unwrap_or(0).max(0);
        let points = ctx.overrides.apply(Carrier::Ahamo, &offer.model, 0);

        let (exemption, mut rent) = match raw.rent_price_displayed {
            Some(displayed) if displayed > 0 && gross > 0 => {
                ((gross - discount - displayed).max(0), displayed - points)
            }
            _ => (0, 0),
        };
        let buyout = gross - discount - points;
        if rent == 0 && buyout > 0 {
            rent = buyout;
        }

        offer.discount_official = discount;
        offer.program_exemption = exemption;
        offer.points_awarded = points;
        offer.price_effective_buyout = buyout.max(0);
        offer.price_effective_rent = rent.max(0);
        offer
    }
}

/// Listing cards rarely show capacity; this is an approximation.
pub fn infer_ahamo_storage(model: &str) -> &'static str {
    if ["15", "16", "17"].iter().any(|gen| model.contains(gen)) {
        "128GB"
    } else if model.contains("SE") {
        "64GB"
    } else {
        "Unknown"
    }
}

/// No leasing tier: rent equals buyout.
#[derive(Debug, Clone, Copy, Default)]
pub struct UqMobileStrategy;

impl PricingStrategy for UqMobileStrategy {
    fn carrier(&self) -> Carrier {
        Carrier::UqMobile
    }

    fn price(&self, raw: &RawOffer, ctx: &PricingContext<'_>) -> NormalizedOffer {
        let mut offer = unpriced(raw, raw.storage.clone().unwrap_or_default());
        let discount = raw
            .discount_official
            .unwrap_or(ctx.constants.uq_default_discount)
            .max(0);
        let points = ctx.overrides.apply(Carrier::UqMobile, &offer.model, 0);
        let buyout = (raw.price_gross - discount - points).max(0);

        offer.discount_official = discount;
        offer.points_awarded = points;
        offer.price_effective_buyout = buyout;
        offer.price_effective_rent = buyout;
        offer
    }

    /// Repeated passes over one page can yield the same capacity twice;
    /// the first one is kept.
    fn price_all(&self, offers: &[RawOffer], ctx: &PricingContext<'_>) -> PricedBatch {
        let mut seen = HashSet::new();
        let mut batch = PricedBatch::default();
        for raw in offers {
            let offer = self.price(raw, ctx);
            if !seen.insert((offer.model.clone(), offer.storage.clone())) {
                debug!(model = %offer.model, storage = %offer.storage, "duplicate UQ mobile offer dropped");
                batch.duplicates += 1;
                continue;
            }
            batch.offers.push(offer);
        }
        batch
    }
}

pub fn strategy_for(carrier: Carrier) -> Box<dyn PricingStrategy> {
    match carrier {
        Carrier::Rakuten => Box::new(RakutenStrategy),
        Carrier::Ahamo => Box::new(AhamoStrategy),
        Carrier::UqMobile => Box::new(UqMobileStrategy),
    }
}

// ---------------------------------------------------------------------------
// Stock merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub model: String,
    pub storage: String,
}

/// Outcome of a lenient join; unmatched keys are reported, not rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub matched: usize,
    pub unmatched: Vec<StockKey>,
}

impl MergeReport {
    pub fn unmatched_count(&self) -> usize {
        self.unmatched.len()
    }
}

/// Exact, case- and whitespace-sensitive lookup. Returns whether a stock
/// entry was found.
pub fn attach_variants(offer: &mut NormalizedOffer, stock: &StockMap) -> bool {
    match stock.get(&offer.model).and_then(|by_storage| by_storage.get(&offer.storage)) {
        Some(variants) => {
            offer.variants = variants.clone();
            true
        }
        None => {
            offer.variants = Vec::new();
            false
        }
    }
}

pub fn merge_stock(offers: &mut [NormalizedOffer], stock: &StockMap) -> MergeReport {
    let mut report = MergeReport::default();
    for offer in offers.iter_mut() {
        if attach_variants(offer, stock) {
            report.matched += 1;
        } else {
            report.unmatched.push(StockKey {
                model: offer.model.clone(),
                storage: offer.storage.clone(),
            });
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Carrier order first, then each carrier's own order. One timestamp for
/// the whole batch; identical models across carriers stay separate.
pub fn aggregate<Tz>(batches: Vec<(Carrier, Vec<NormalizedOffer>)>, at: &DateTime<Tz>) -> Snapshot
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let mut batches = batches;
    batches.sort_by_key(|(carrier, _)| *carrier);
    Snapshot {
        updated_at: format_timestamp(at),
        items: batches.into_iter().flat_map(|(_, offers)| offers).collect(),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One raw batch per carrier; each carrier's hits and stock stay with it.
pub type BatchInput = BTreeMap<Carrier, RawBatch>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedStock {
    pub carrier: Carrier,
    pub model: String,
    pub storage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub raw_offers: usize,
    pub discarded: usize,
    pub duplicates: usize,
    pub campaign_folds: usize,
    pub campaign_skipped_by_cap: usize,
    pub stock_matched: usize,
    pub unmatched_stock: Vec<UnmatchedStock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub snapshot: Snapshot,
    pub stats: PipelineStats,
}

/// Pure batch computation: no I/O, no clock.
#[derive(Debug, Clone)]
pub struct PricingPipeline {
    campaign_cap: Option<i64>,
    constants: PricingConstants,
    overrides: OverrideTable,
}

impl Default for PricingPipeline {
    fn default() -> Self {
        Self {
            campaign_cap: Some(DEFAULT_CAMPAIGN_CAP),
            constants: PricingConstants::default(),
            overrides: OverrideTable::builtin(),
        }
    }
}

impl PricingPipeline {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            campaign_cap: config.campaign_cap,
            constants: config.pricing_constants(),
            overrides: OverrideTable::builtin(),
        }
    }

    pub fn with_overrides(mut self, overrides: OverrideTable) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_campaign_cap(mut self, cap: Option<i64>) -> Self {
        self.campaign_cap = cap;
        self
    }

    pub fn run<Tz>(&self, input: &BatchInput, at: &DateTime<Tz>) -> PipelineOutput
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let mut stats = PipelineStats::default();
        let mut priced = Vec::new();

        for (carrier, raw) in input {
            let mut resolver = CampaignPointResolver::new(self.campaign_cap);
            for outcome in resolver.fold_all(&raw.campaign_hits) {
                match outcome {
                    FoldOutcome::Folded { .. } => stats.campaign_folds += 1,
                    FoldOutcome::SkippedByCap => stats.campaign_skipped_by_cap += 1,
                    _ => {}
                }
            }
            let campaign = resolver.snapshot();
            let ctx = PricingContext {
                campaign: &campaign,
                overrides: &self.overrides,
                constants: self.constants,
            };

            let strategy = strategy_for(*carrier);
            stats.raw_offers += raw.offers.len();
            // An offer filed under another carrier is never priced by this one's rules.
            let (valid, discarded): (Vec<RawOffer>, Vec<RawOffer>) = raw
                .offers
                .iter()
                .cloned()
                .partition(|o| o.price_gross > 0 && o.carrier == strategy.carrier());
            for offer in &discarded {
                debug!(
                    carrier = %offer.carrier,
                    batch = %strategy.carrier(),
                    model = %offer.model,
                    price_gross = offer.price_gross,
                    "offer discarded"
                );
            }
            stats.discarded += discarded.len();

            let mut batch = strategy.price_all(&valid, &ctx);
            stats.duplicates += batch.duplicates;

            let report = merge_stock(&mut batch.offers, &raw.stock);
            stats.stock_matched += report.matched;
            // Carriers without a stock source would report every offer.
            if !raw.stock.is_empty() {
                for key in report.unmatched {
                    debug!(carrier = %carrier, model = %key.model, storage = %key.storage, "no stock entry");
                    stats.unmatched_stock.push(UnmatchedStock {
                        carrier: *carrier,
                        model: key.model,
                        storage: key.storage,
                    });
                }
            }

            priced.push((*carrier, batch.offers));
        }

        PipelineOutput {
            snapshot: aggregate(priced, at),
            stats,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch run (bundles in, JSON out)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub updated_at: String,
    pub carriers: Vec<Carrier>,
    pub failed_carriers: Vec<Carrier>,
    pub raw_offers: usize,
    pub discarded: usize,
    pub duplicates: usize,
    pub items: usize,
    pub unmatched_stock: Vec<UnmatchedStock>,
    pub output_path: Option<String>,
}

pub struct SyncRunner {
    config: EngineConfig,
    pipeline: PricingPipeline,
}

impl SyncRunner {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let overrides = OverrideTable::load_or_builtin(&config.resolve(&config.overrides_path))?;
        let pipeline = PricingPipeline::new(&config).with_overrides(overrides);
        Ok(Self { config, pipeline })
    }

    pub fn with_pipeline(mut self, pipeline: PricingPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Computes one snapshot; writes it unless `dry_run`.
    pub async fn run_once(&self, dry_run: bool) -> Result<(RunSummary, Snapshot)> {
        let run_id = Uuid::new_v4();
        let registry = self.load_source_registry().await?;
        let (input, failed_carriers) = self.collect_inputs(&registry);

        let output = self.pipeline.run(&input, &Local::now());
        let stats = output.stats;
        info!(
            %run_id,
            items = output.snapshot.items.len(),
            discarded = stats.discarded,
            duplicates = stats.duplicates,
            campaign_folds = stats.campaign_folds,
            campaign_skipped = stats.campaign_skipped_by_cap,
            unmatched_stock = stats.unmatched_stock.len(),
            "pricing batch complete"
        );

        let output_path = if dry_run {
            None
        } else {
            let path = self.config.resolve(&self.config.output_path);
            write_snapshot(&path, &output.snapshot).await?;
            info!(path = %path.display(), "snapshot written");
            Some(path.display().to_string())
        };

        let summary = RunSummary {
            run_id,
            updated_at: output.snapshot.updated_at.clone(),
            carriers: input.keys().copied().collect(),
            failed_carriers,
            raw_offers: stats.raw_offers,
            discarded: stats.discarded,
            duplicates: stats.duplicates,
            items: output.snapshot.items.len(),
            unmatched_stock: stats.unmatched_stock,
            output_path,
        };
        Ok((summary, output.snapshot))
    }

    async fn load_source_registry(&self) -> Result<SourceRegistry> {
        let path = self.config.workspace_root.join("sources.yaml");
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// A carrier whose bundle cannot be read or parsed is left out of the
    /// batch rather than failing the run.
    fn collect_inputs(&self, registry: &SourceRegistry) -> (BatchInput, Vec<Carrier>) {
        let mut input = BatchInput::new();
        let mut failed = Vec::new();
        for source in registry.sources.iter().filter(|s| s.enabled) {
            let path = self.config.resolve(&source.bundle);
            let parsed = load_capture_bundle(&path)
                .and_then(|bundle| {
                    adapter_for_carrier(source.carrier)
                        .parse(&bundle)
                        .map_err(anyhow::Error::from)
                });
            match parsed {
                Ok(batch) => {
                    debug!(
                        carrier = %source.carrier,
                        offers = batch.offers.len(),
                        hits = batch.campaign_hits.len(),
                        "bundle parsed"
                    );
                    input.entry(source.carrier).or_default().extend(batch);
                }
                Err(err) => {
                    warn!(carrier = %source.carrier, source = %source.display_name, error = %err, "carrier omitted from batch");
                    failed.push(source.carrier);
                }
            }
        }
        (input, failed)
    }
}

pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(snapshot).context("serializing snapshot")?;
    fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

pub async fn run_sync_once_from_env(dry_run: bool) -> Result<(RunSummary, Snapshot)> {
    let runner = SyncRunner::new(EngineConfig::from_env())?;
    runner.run_once(dry_run).await
}
