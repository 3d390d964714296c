//! Marketplace provider adapters and snippet extraction utilities.
//!
//! Each provider owns an explicit serde schema for its response shape and a
//! pure transform into [`Listing`]; absent fields map to fixed defaults, and
//! prices are always clamped to the requested budget at this boundary.

use std::fmt;

use async_trait::async_trait;
use kosku_core::{KostCategory, Listing, SearchFilters};
use kosku_store::{Auth, FetchError, HttpFetcher, ListingCache};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "kosku-providers";

/// Placeholder price for items whose schema omitted one, applied before the
/// budget clamp.
pub const PRICE_PLACEHOLDER: u64 = 1_000_000;
/// Rating assumed for items whose schema omitted one.
pub const RATING_PLACEHOLDER: f64 = 4.0;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

/// One provider's endpoint configuration. A missing key disables the
/// provider without failing anything at startup.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    fn from_env(default_base: &str, base_var: &str, key_var: &str) -> Self {
        Self {
            base_url: std::env::var(base_var).unwrap_or_else(|_| default_base.to_string()),
            api_key: std::env::var(key_var).ok().filter(|key| !key.is_empty()),
        }
    }

    fn disabled(default_base: &str) -> Self {
        Self {
            base_url: default_base.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub mamikos: ProviderEndpoint,
    pub olx: ProviderEndpoint,
    pub rumah123: ProviderEndpoint,
    pub travelio: ProviderEndpoint,
    pub mamitroom: ProviderEndpoint,
}

impl ProvidersConfig {
    pub fn from_env() -> Self {
        Self {
            mamikos: ProviderEndpoint::from_env(
                "https://api.mamikos.com/v1",
                "MAMIKOS_BASE_URL",
                "MAMIKOS_API_KEY",
            ),
            olx: ProviderEndpoint::from_env(
                "https://api.olx.co.id/v1",
                "OLX_BASE_URL",
                "OLX_API_KEY",
            ),
            rumah123: ProviderEndpoint::from_env(
                "https://api.rumah123.com/v1",
                "RUMAH123_BASE_URL",
                "RUMAH123_API_KEY",
            ),
            travelio: ProviderEndpoint::from_env(
                "https://api.travelio.com/v1",
                "TRAVELIO_BASE_URL",
                "TRAVELIO_API_KEY",
            ),
            mamitroom: ProviderEndpoint::from_env(
                "https://api.mamitroom.com/v1",
                "MAMITROOM_BASE_URL",
                "MAMITROOM_API_KEY",
            ),
        }
    }

    /// All providers credential-less, i.e. every adapter skips itself.
    pub fn disabled() -> Self {
        Self {
            mamikos: ProviderEndpoint::disabled("https://api.mamikos.com/v1"),
            olx: ProviderEndpoint::disabled("https://api.olx.co.id/v1"),
            rumah123: ProviderEndpoint::disabled("https://api.rumah123.com/v1"),
            travelio: ProviderEndpoint::disabled("https://api.travelio.com/v1"),
            mamitroom: ProviderEndpoint::disabled("https://api.mamitroom.com/v1"),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_id(&self) -> &'static str;
    fn source_label(&self) -> &'static str;
    fn api_key(&self) -> Option<&str>;

    /// Raw fetch + transform. Only called when a credential is configured;
    /// errors are handled by [`run_provider`], never by the aggregator.
    async fn fetch(
        &self,
        http: &HttpFetcher,
        filters: &SearchFilters,
    ) -> Result<Vec<Listing>, ProviderError>;
}

/// Runs one provider end to end: credential check, cache consultation,
/// bounded fetch, cache fill. Never raises: every failure degrades to an
/// empty result and is only logged.
pub async fn run_provider(
    provider: &dyn Provider,
    http: &HttpFetcher,
    cache: &ListingCache,
    filters: &SearchFilters,
) -> Vec<Listing> {
    if provider.api_key().is_none() {
        debug!(provider = provider.provider_id(), "no API key configured, skipping");
        return Vec::new();
    }

    let cache_key = filters.cache_key(provider.provider_id());
    if let Some(cached) = cache.get_fresh(&cache_key).await {
        debug!(provider = provider.provider_id(), count = cached.len(), "cache hit");
        return cached;
    }

    match provider.fetch(http, filters).await {
        Ok(listings) => {
            debug!(provider = provider.provider_id(), count = listings.len(), "fetched");
            cache.insert(cache_key, listings.clone()).await;
            listings
        }
        Err(err) => {
            warn!(
                provider = provider.provider_id(),
                error = %err,
                "provider fetch failed, degrading to empty result"
            );
            Vec::new()
        }
    }
}

/// The five marketplace adapters in the fixed iteration order the
/// aggregator merges them in.
pub fn all_providers(config: &ProvidersConfig) -> Vec<Box<dyn Provider>> {
    vec![
        Box::new(MamikosProvider::new(config.mamikos.clone())),
        Box::new(OlxProvider::new(config.olx.clone())),
        Box::new(Rumah123Provider::new(config.rumah123.clone())),
        Box::new(TravelioProvider::new(config.travelio.clone())),
        Box::new(MamitroomProvider::new(config.mamitroom.clone())),
    ]
}

fn clamp_price(raw: Option<u64>, max_budget: u64) -> u64 {
    raw.unwrap_or(PRICE_PLACEHOLDER).min(max_budget)
}

fn parse_category(raw: Option<String>) -> KostCategory {
    raw.map(|value| KostCategory::parse_or(&value, KostCategory::Campur))
        .unwrap_or(KostCategory::Campur)
}

/// Upstream ids arrive as numbers on some platforms and strings on others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(u64),
    Text(String),
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Num(n) => write!(f, "{n}"),
            RawId::Text(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Mamikos

#[derive(Debug, Clone)]
pub struct MamikosProvider {
    endpoint: ProviderEndpoint,
}

impl MamikosProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Self {
        Self { endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct MamikosEnvelope {
    #[serde(default)]
    data: Vec<MamikosItem>,
}

#[derive(Debug, Deserialize)]
struct MamikosItem {
    id: RawId,
    name: Option<String>,
    address: Option<String>,
    location: Option<String>,
    price: Option<u64>,
    distance: Option<f64>,
    #[serde(default)]
    facilities: Vec<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    available: Option<bool>,
    rating: Option<f64>,
    #[serde(default)]
    images: Vec<String>,
    description: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    contact: Option<String>,
    phone: Option<String>,
    whatsapp: Option<String>,
}

fn map_mamikos(item: MamikosItem, filters: &SearchFilters) -> Listing {
    Listing {
        distance_km: item.distance,
        facilities: item.facilities,
        category: parse_category(item.kind),
        available: item.available.unwrap_or(true),
        rating: Some(item.rating.unwrap_or(RATING_PLACEHOLDER)),
        latitude: item.latitude,
        longitude: item.longitude,
        contact: item.contact.or(item.phone),
        whatsapp: item.whatsapp,
        description: Some(
            item.description
                .unwrap_or_else(|| "Kos nyaman dengan fasilitas lengkap".to_string()),
        ),
        images: item.images,
        ..Listing::new(
            format!("mamikos-{}", item.id),
            item.name.unwrap_or_else(|| "Kos Mamikos".to_string()),
            item.address
                .or(item.location)
                .unwrap_or_else(|| "Alamat tidak tersedia".to_string()),
            clamp_price(item.price, filters.max_budget),
            "mamikos.com",
        )
    }
}

#[async_trait]
impl Provider for MamikosProvider {
    fn provider_id(&self) -> &'static str {
        "mamikos"
    }

    fn source_label(&self) -> &'static str {
        "mamikos.com"
    }

    fn api_key(&self) -> Option<&str> {
        self.endpoint.api_key.as_deref()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filters: &SearchFilters,
    ) -> Result<Vec<Listing>, ProviderError> {
        let key = self.endpoint.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/kos/search", self.endpoint.base_url);
        let query = [
            ("location", filters.location.clone()),
            ("max_price", filters.max_budget.to_string()),
            ("type", filters.category.as_str().to_ascii_lowercase()),
            ("facilities", filters.facilities.join(",")),
            ("limit", "20".to_string()),
            ("page", "1".to_string()),
        ];
        let envelope: MamikosEnvelope = http.get_json(&url, &query, Auth::Bearer(key)).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(|item| map_mamikos(item, filters))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// OLX

#[derive(Debug, Clone)]
pub struct OlxProvider {
    endpoint: ProviderEndpoint,
}

impl OlxProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Self {
        Self { endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct OlxEnvelope {
    #[serde(default)]
    listings: Vec<OlxItem>,
}

#[derive(Debug, Deserialize)]
struct OlxItem {
    id: RawId,
    title: Option<String>,
    location: Option<String>,
    price: Option<u64>,
    #[serde(default)]
    facilities: Vec<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    sold: Option<bool>,
    #[serde(default)]
    images: Vec<String>,
    description: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    contact_phone: Option<String>,
    contact_whatsapp: Option<String>,
}

fn map_olx(item: OlxItem, filters: &SearchFilters) -> Listing {
    Listing {
        facilities: item.facilities,
        category: parse_category(item.kind),
        // OLX marks sold items instead of reporting availability.
        available: !item.sold.unwrap_or(false),
        rating: Some(RATING_PLACEHOLDER),
        latitude: item.latitude,
        longitude: item.longitude,
        contact: item.contact_phone,
        whatsapp: item.contact_whatsapp,
        description: Some(item.description.unwrap_or_else(|| "Kos dari OLX".to_string())),
        images: item.images,
        ..Listing::new(
            format!("olx-{}", item.id),
            item.title.unwrap_or_else(|| "Kos OLX".to_string()),
            item.location.unwrap_or_else(|| "Alamat tidak tersedia".to_string()),
            clamp_price(item.price, filters.max_budget),
            "olx.co.id",
        )
    }
}

#[async_trait]
impl Provider for OlxProvider {
    fn provider_id(&self) -> &'static str {
        "olx"
    }

    fn source_label(&self) -> &'static str {
        "olx.co.id"
    }

    fn api_key(&self) -> Option<&str> {
        self.endpoint.api_key.as_deref()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filters: &SearchFilters,
    ) -> Result<Vec<Listing>, ProviderError> {
        let key = self.endpoint.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/listings", self.endpoint.base_url);
        let query = [
            ("q", format!("kos {}", filters.location)),
            ("price_max", filters.max_budget.to_string()),
            ("category", "rumah-dijual-dan-disewakan".to_string()),
            ("subcategory", "kos".to_string()),
            ("limit", "15".to_string()),
            ("page", "1".to_string()),
        ];
        let envelope: OlxEnvelope = http.get_json(&url, &query, Auth::ApiKey(key)).await?;
        Ok(envelope
            .listings
            .into_iter()
            .map(|item| map_olx(item, filters))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Rumah123

#[derive(Debug, Clone)]
pub struct Rumah123Provider {
    endpoint: ProviderEndpoint,
}

impl Rumah123Provider {
    pub fn new(endpoint: ProviderEndpoint) -> Self {
        Self { endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct Rumah123Envelope {
    #[serde(default)]
    properties: Vec<Rumah123Item>,
}

#[derive(Debug, Deserialize)]
struct Rumah123Item {
    id: RawId,
    name: Option<String>,
    address: Option<String>,
    location: Option<String>,
    price: Option<u64>,
    distance: Option<f64>,
    #[serde(default)]
    facilities: Vec<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    available: Option<bool>,
    rating: Option<f64>,
    #[serde(default)]
    images: Vec<String>,
    description: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    contact: Option<String>,
    whatsapp: Option<String>,
}

fn map_rumah123(item: Rumah123Item, filters: &SearchFilters) -> Listing {
    Listing {
        distance_km: item.distance,
        facilities: item.facilities,
        category: parse_category(item.kind),
        available: item.available.unwrap_or(true),
        rating: Some(item.rating.unwrap_or(RATING_PLACEHOLDER)),
        latitude: item.latitude,
        longitude: item.longitude,
        contact: item.contact,
        whatsapp: item.whatsapp,
        description: Some(
            item.description
                .unwrap_or_else(|| "Kos dari Rumah123".to_string()),
        ),
        images: item.images,
        ..Listing::new(
            format!("rumah123-{}", item.id),
            item.name.unwrap_or_else(|| "Kos Rumah123".to_string()),
            item.address
                .or(item.location)
                .unwrap_or_else(|| "Alamat tidak tersedia".to_string()),
            clamp_price(item.price, filters.max_budget),
            "rumah123.com",
        )
    }
}

#[async_trait]
impl Provider for Rumah123Provider {
    fn provider_id(&self) -> &'static str {
        "rumah123"
    }

    fn source_label(&self) -> &'static str {
        "rumah123.com"
    }

    fn api_key(&self) -> Option<&str> {
        self.endpoint.api_key.as_deref()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filters: &SearchFilters,
    ) -> Result<Vec<Listing>, ProviderError> {
        let key = self.endpoint.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/properties/search", self.endpoint.base_url);
        let query = [
            ("location", filters.location.clone()),
            ("price_max", filters.max_budget.to_string()),
            ("property_type", "kos".to_string()),
            ("limit", "15".to_string()),
            ("page", "1".to_string()),
        ];
        let envelope: Rumah123Envelope = http.get_json(&url, &query, Auth::Bearer(key)).await?;
        Ok(envelope
            .properties
            .into_iter()
            .map(|item| map_rumah123(item, filters))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Travelio

#[derive(Debug, Clone)]
pub struct TravelioProvider {
    endpoint: ProviderEndpoint,
}

impl TravelioProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Self {
        Self { endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct TravelioEnvelope {
    #[serde(default)]
    data: Vec<TravelioItem>,
}

#[derive(Debug, Deserialize)]
struct TravelioItem {
    id: RawId,
    name: Option<String>,
    address: Option<String>,
    location: Option<String>,
    price: Option<u64>,
    distance: Option<f64>,
    #[serde(default)]
    facilities: Vec<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    available: Option<bool>,
    rating: Option<f64>,
    #[serde(default)]
    images: Vec<String>,
    description: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    contact: Option<String>,
    whatsapp: Option<String>,
}

fn map_travelio(item: TravelioItem, filters: &SearchFilters) -> Listing {
    Listing {
        distance_km: item.distance,
        facilities: item.facilities,
        category: parse_category(item.kind),
        available: item.available.unwrap_or(true),
        rating: Some(item.rating.unwrap_or(RATING_PLACEHOLDER)),
        latitude: item.latitude,
        longitude: item.longitude,
        contact: item.contact,
        whatsapp: item.whatsapp,
        description: Some(
            item.description
                .unwrap_or_else(|| "Kos dari Travelio".to_string()),
        ),
        images: item.images,
        ..Listing::new(
            format!("travelio-{}", item.id),
            item.name.unwrap_or_else(|| "Kos Travelio".to_string()),
            item.address
                .or(item.location)
                .unwrap_or_else(|| "Alamat tidak tersedia".to_string()),
            clamp_price(item.price, filters.max_budget),
            "travelio.com",
        )
    }
}

#[async_trait]
impl Provider for TravelioProvider {
    fn provider_id(&self) -> &'static str {
        "travelio"
    }

    fn source_label(&self) -> &'static str {
        "travelio.com"
    }

    fn api_key(&self) -> Option<&str> {
        self.endpoint.api_key.as_deref()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filters: &SearchFilters,
    ) -> Result<Vec<Listing>, ProviderError> {
        let key = self.endpoint.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/properties", self.endpoint.base_url);
        let query = [
            ("city", filters.location.clone()),
            ("max_price", filters.max_budget.to_string()),
            ("property_type", "kost".to_string()),
            ("limit", "10".to_string()),
            ("page", "1".to_string()),
        ];
        let envelope: TravelioEnvelope = http.get_json(&url, &query, Auth::Bearer(key)).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(|item| map_travelio(item, filters))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Mamitroom

#[derive(Debug, Clone)]
pub struct MamitroomProvider {
    endpoint: ProviderEndpoint,
}

impl MamitroomProvider {
    pub fn new(endpoint: ProviderEndpoint) -> Self {
        Self { endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct MamitroomEnvelope {
    #[serde(default)]
    kos: Vec<MamitroomItem>,
}

#[derive(Debug, Deserialize)]
struct MamitroomItem {
    id: RawId,
    name: Option<String>,
    address: Option<String>,
    location: Option<String>,
    price: Option<u64>,
    distance: Option<f64>,
    #[serde(default)]
    facilities: Vec<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    available: Option<bool>,
    rating: Option<f64>,
    #[serde(default)]
    images: Vec<String>,
    description: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    contact: Option<String>,
    whatsapp: Option<String>,
}

fn map_mamitroom(item: MamitroomItem, filters: &SearchFilters) -> Listing {
    Listing {
        distance_km: item.distance,
        facilities: item.facilities,
        category: parse_category(item.kind),
        available: item.available.unwrap_or(true),
        rating: Some(item.rating.unwrap_or(RATING_PLACEHOLDER)),
        latitude: item.latitude,
        longitude: item.longitude,
        contact: item.contact,
        whatsapp: item.whatsapp,
        description: Some(
            item.description
                .unwrap_or_else(|| "Kos dari Mamitroom".to_string()),
        ),
        images: item.images,
        ..Listing::new(
            format!("mamitroom-{}", item.id),
            item.name.unwrap_or_else(|| "Kos Mamitroom".to_string()),
            item.address
                .or(item.location)
                .unwrap_or_else(|| "Alamat tidak tersedia".to_string()),
            clamp_price(item.price, filters.max_budget),
            "mamitroom.com",
        )
    }
}

#[async_trait]
impl Provider for MamitroomProvider {
    fn provider_id(&self) -> &'static str {
        "mamitroom"
    }

    fn source_label(&self) -> &'static str {
        "mamitroom.com"
    }

    fn api_key(&self) -> Option<&str> {
        self.endpoint.api_key.as_deref()
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filters: &SearchFilters,
    ) -> Result<Vec<Listing>, ProviderError> {
        let key = self.endpoint.api_key.as_deref().unwrap_or_default();
        let url = format!("{}/kos/search", self.endpoint.base_url);
        let query = [
            ("location", filters.location.clone()),
            ("max_price", filters.max_budget.to_string()),
            ("type", filters.category.as_str().to_string()),
            ("facilities", filters.facilities.join(",")),
            ("limit", "12".to_string()),
            ("page", "1".to_string()),
        ];
        let envelope: MamitroomEnvelope = http.get_json(&url, &query, Auth::Bearer(key)).await?;
        Ok(envelope
            .kos
            .into_iter()
            .map(|item| map_mamitroom(item, filters))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Snippet extraction
//
// Pure, total parsers for free-text search-engine snippets. Keyword tables
// use Indonesian locale tokens; one combined pattern per facility tag keeps
// synonyms from producing duplicate tags.

lazy_static! {
    static ref PRICE_RE: Regex =
        Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(jt|juta|rb|ribu)").unwrap();
    static ref CONTACT_RE: Regex =
        Regex::new(r"(?i)(?:telp|hp|wa|whatsapp)\s*:?\s*\d{10,13}").unwrap();
    static ref PUTRA_RE: Regex = Regex::new(r"(?i)putra|pria|cowok|laki-laki").unwrap();
    static ref PUTRI_RE: Regex = Regex::new(r"(?i)putri|wanita|cewek|perempuan").unwrap();
    static ref CAMPUR_RE: Regex = Regex::new(r"(?i)campur|gabung|mixed").unwrap();
    static ref ADDRESS_RE: Regex =
        Regex::new(r"(?i)(?:di|dengan alamat|lokasi)\s+([^,.]+)").unwrap();
    static ref TITLE_NOISE_RE: Regex =
        Regex::new(r"(?i)kost|kos|murah|bandung|jakarta|surabaya|yogyakarta").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref FACILITY_VOCAB: Vec<(&'static str, Regex)> = vec![
        ("AC", Regex::new(r"(?i)\bac\b|air conditioner|pendingin").unwrap()),
        ("WiFi", Regex::new(r"(?i)wifi|wi-fi|internet").unwrap()),
        (
            "Kamar Mandi Dalam",
            Regex::new(r"(?i)kamar mandi dalam|km dalam|toilet dalam").unwrap(),
        ),
        ("Parkir Motor", Regex::new(r"(?i)parkir").unwrap()),
        ("TV", Regex::new(r"(?i)\btv\b|televisi").unwrap()),
        ("Kulkas", Regex::new(r"(?i)kulkas|refrigerator").unwrap()),
        ("Meja Belajar", Regex::new(r"(?i)meja").unwrap()),
        ("Lemari", Regex::new(r"(?i)lemari|closet").unwrap()),
    ];
}

/// Extracts a monthly price from a snippet. `1 juta`/`1 jt` scale by a
/// million, `800 ribu`/`800 rb` by a thousand; the result never exceeds the
/// budget. No match defaults to 80% of the budget.
pub fn extract_price(snippet: &str, max_budget: u64) -> u64 {
    let Some(caps) = PRICE_RE.captures(snippet) else {
        return max_budget / 5 * 4;
    };
    let number: f64 = caps[1].replace(',', ".").parse().unwrap_or(0.0);
    let unit = caps[2].to_ascii_lowercase();
    let multiplier = if unit.starts_with("jt") || unit.starts_with("juta") {
        1_000_000.0
    } else {
        1_000.0
    };
    ((number * multiplier) as u64).min(max_budget)
}

/// Matches the fixed facility vocabulary against a snippet; output order is
/// vocabulary order and each tag appears at most once.
pub fn extract_facilities(snippet: &str) -> Vec<String> {
    FACILITY_VOCAB
        .iter()
        .filter(|(_, pattern)| pattern.is_match(snippet))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}

/// Classifies a snippet's occupancy category, testing male keywords first,
/// then female, then mixed; anything else is `Campur`.
pub fn extract_category(snippet: &str) -> KostCategory {
    if PUTRA_RE.is_match(snippet) {
        KostCategory::Putra
    } else if PUTRI_RE.is_match(snippet) {
        KostCategory::Putri
    } else if CAMPUR_RE.is_match(snippet) {
        KostCategory::Campur
    } else {
        KostCategory::Campur
    }
}

/// Pulls a labeled phone number (`telp/hp/wa/whatsapp` + 10-13 digits) out
/// of a snippet.
pub fn extract_contact(snippet: &str) -> Option<String> {
    CONTACT_RE.find(snippet).map(|m| m.as_str().to_string())
}

/// Strips boilerplate tokens from a search-result title.
pub fn clean_title(title: &str) -> String {
    if title.trim().is_empty() {
        return "Kos dari Google".to_string();
    }
    let stripped = TITLE_NOISE_RE.replace_all(title, "");
    let collapsed = WHITESPACE_RE.replace_all(&stripped, " ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        "Kos Terbaik".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Pulls an address fragment following a location marker word.
pub fn extract_address(snippet: &str) -> String {
    ADDRESS_RE
        .captures(snippet)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| "Alamat lengkap akan diberikan saat kontak".to_string())
}

/// Builds a listing out of one web-search result (title/snippet/link) using
/// the snippet extractors. Same clamping rules as the API adapters.
pub fn listing_from_search_result(
    id: String,
    title: &str,
    snippet: &str,
    link: Option<String>,
    filters: &SearchFilters,
) -> Listing {
    Listing {
        facilities: extract_facilities(snippet),
        category: extract_category(snippet),
        whatsapp: extract_contact(snippet),
        rating: Some(RATING_PLACEHOLDER),
        description: Some(if snippet.is_empty() {
            "Kos dari pencarian Google".to_string()
        } else {
            snippet.to_string()
        }),
        ..Listing::new(
            id,
            clean_title(title),
            extract_address(snippet),
            extract_price(snippet, filters.max_budget),
            link.unwrap_or_else(|| "google-search".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use kosku_store::{HttpConfig, ListingCache};

    fn filters() -> SearchFilters {
        SearchFilters {
            location: "Bandung".to_string(),
            max_budget: 1_000_000,
            facilities: vec!["WiFi".to_string()],
            category: KostCategory::Campur,
        }
    }

    #[test]
    fn snippet_extraction_reads_price_facilities_and_category() {
        let snippet = "Kos AC wifi dekat ITB, harga 1 juta, putri only";
        assert_eq!(extract_price(snippet, 2_000_000), 1_000_000);
        let facilities = extract_facilities(snippet);
        assert!(facilities.contains(&"AC".to_string()));
        assert!(facilities.contains(&"WiFi".to_string()));
        assert_eq!(extract_category(snippet), KostCategory::Putri);
    }

    #[test]
    fn price_extraction_clamps_to_budget_and_defaults_to_eighty_percent() {
        assert_eq!(extract_price("harga 2 juta", 1_500_000), 1_500_000);
        assert_eq!(extract_price("harga 800 ribu", 1_000_000), 800_000);
        assert_eq!(extract_price("harga 750 rb", 1_000_000), 750_000);
        assert_eq!(extract_price("hubungi pemilik", 1_000_000), 800_000);
    }

    #[test]
    fn facility_order_follows_vocabulary_and_never_duplicates() {
        let facilities = extract_facilities("lemari, wifi dan internet cepat, parkir luas, AC");
        assert_eq!(facilities, vec!["AC", "WiFi", "Parkir Motor", "Lemari"]);
    }

    #[test]
    fn category_priority_is_male_female_mixed() {
        assert_eq!(extract_category("khusus putra"), KostCategory::Putra);
        assert_eq!(extract_category("kos wanita"), KostCategory::Putri);
        assert_eq!(extract_category("campur bebas"), KostCategory::Campur);
        assert_eq!(extract_category("dekat stasiun"), KostCategory::Campur);
        // Male keywords win when both appear.
        assert_eq!(extract_category("putra dan putri"), KostCategory::Putra);
    }

    #[test]
    fn contact_extraction_requires_a_label() {
        assert_eq!(
            extract_contact("hubungi WA: 081234567890").as_deref(),
            Some("WA: 081234567890")
        );
        assert_eq!(extract_contact("nomor 081234567890 tanpa label"), None);
    }

    #[test]
    fn search_result_listing_applies_extractors() {
        let listing = listing_from_search_result(
            "google-1".to_string(),
            "Kost Murah Bandung Dago Asri",
            "Kos putri di Jalan Dago Asri, harga 900 ribu, wifi dan parkir. Telp: 08123456789",
            Some("https://example.com/kos-dago".to_string()),
            &filters(),
        );
        assert_eq!(listing.price, 900_000);
        assert_eq!(listing.category, KostCategory::Putri);
        assert_eq!(listing.address, "Jalan Dago Asri");
        assert_eq!(listing.source, "https://example.com/kos-dago");
        assert!(listing.whatsapp.is_some());
        assert_eq!(listing.name, "Dago Asri");
    }

    #[test]
    fn mamikos_mapping_defaults_and_clamps() {
        let item: MamikosItem = serde_json::from_value(serde_json::json!({
            "id": 42,
            "price": 5_000_000,
            "type": "mewah"
        }))
        .unwrap();
        let listing = map_mamikos(item, &filters());
        assert_eq!(listing.id, "mamikos-42");
        assert_eq!(listing.name, "Kos Mamikos");
        assert_eq!(listing.address, "Alamat tidak tersedia");
        assert_eq!(listing.price, 1_000_000);
        assert_eq!(listing.category, KostCategory::Campur);
        assert!(listing.available);
        assert_eq!(listing.rating, Some(RATING_PLACEHOLDER));
    }

    #[test]
    fn missing_price_takes_placeholder_before_clamp() {
        let item: MamikosItem = serde_json::from_value(serde_json::json!({ "id": "x" })).unwrap();
        let listing = map_mamikos(item, &filters());
        assert_eq!(listing.price, PRICE_PLACEHOLDER.min(1_000_000));
    }

    #[test]
    fn olx_mapping_inverts_sold_flag() {
        let sold: OlxItem =
            serde_json::from_value(serde_json::json!({ "id": 7, "sold": true })).unwrap();
        assert!(!map_olx(sold, &filters()).available);
        let open: OlxItem = serde_json::from_value(serde_json::json!({ "id": 8 })).unwrap();
        assert!(map_olx(open, &filters()).available);
    }

    struct CountingProvider {
        calls: AtomicUsize,
        key: Option<String>,
    }

    impl CountingProvider {
        fn with_key() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                key: Some("secret".to_string()),
            }
        }

        fn without_key() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                key: None,
            }
        }
    }

    #[async_trait]
    impl Provider for CountingProvider {
        fn provider_id(&self) -> &'static str {
            "counting"
        }

        fn source_label(&self) -> &'static str {
            "counting.test"
        }

        fn api_key(&self) -> Option<&str> {
            self.key.as_deref()
        }

        async fn fetch(
            &self,
            _http: &HttpFetcher,
            filters: &SearchFilters,
        ) -> Result<Vec<Listing>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Listing::new(
                "counting-1",
                "Kos Counting",
                "Jl. Counting 1",
                filters.max_budget / 2,
                "counting.test",
            )])
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn provider_id(&self) -> &'static str {
            "failing"
        }

        fn source_label(&self) -> &'static str {
            "failing.test"
        }

        fn api_key(&self) -> Option<&str> {
            Some("secret")
        }

        async fn fetch(
            &self,
            _http: &HttpFetcher,
            _filters: &SearchFilters,
        ) -> Result<Vec<Listing>, ProviderError> {
            Err(ProviderError::Message("upstream exploded".to_string()))
        }
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_empty_and_caches_nothing() {
        let provider = FailingProvider;
        let http = HttpFetcher::new(HttpConfig::default()).unwrap();
        let cache = ListingCache::with_defaults();
        let results = run_provider(&provider, &http, &cache, &filters()).await;
        assert!(results.is_empty());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn missing_credential_skips_without_a_network_call() {
        let provider = CountingProvider::without_key();
        let http = HttpFetcher::new(HttpConfig::default()).unwrap();
        let cache = ListingCache::with_defaults();
        let results = run_provider(&provider, &http, &cache, &filters()).await;
        assert!(results.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_filters_inside_ttl_fetch_once() {
        let provider = CountingProvider::with_key();
        let http = HttpFetcher::new(HttpConfig::default()).unwrap();
        let cache = ListingCache::new(Duration::from_secs(300), 8);

        let first = run_provider(&provider, &http, &cache, &filters()).await;
        let second = run_provider(&provider, &http, &cache, &filters()).await;

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_cache_entry_fetches_again() {
        let provider = CountingProvider::with_key();
        let http = HttpFetcher::new(HttpConfig::default()).unwrap();
        let cache = ListingCache::new(Duration::from_secs(300), 8);

        run_provider(&provider, &http, &cache, &filters()).await;
        tokio::time::advance(Duration::from_secs(301)).await;
        run_provider(&provider, &http, &cache, &filters()).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_filters_use_distinct_cache_slots() {
        let provider = CountingProvider::with_key();
        let http = HttpFetcher::new(HttpConfig::default()).unwrap();
        let cache = ListingCache::with_defaults();

        run_provider(&provider, &http, &cache, &filters()).await;
        let mut other = filters();
        other.location = "Jakarta".to_string();
        run_provider(&provider, &http, &cache, &other).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[test]
    fn provider_registry_keeps_iteration_order() {
        let providers = all_providers(&ProvidersConfig::disabled());
        let ids: Vec<_> = providers.iter().map(|p| p.provider_id()).collect();
        assert_eq!(ids, vec!["mamikos", "olx", "rumah123", "travelio", "mamitroom"]);
    }
}
