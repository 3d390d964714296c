//! Search orchestration: provider fan-out, ranking, generative fallback,
//! chat assistance, and the listing sync pipeline.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use kosku_core::{KostCategory, Listing, SearchFilters, SearchHit};
use kosku_providers::{
    all_providers, listing_from_search_result, run_provider, Provider, ProvidersConfig,
    PRICE_PLACEHOLDER, RATING_PLACEHOLDER,
};
use kosku_store::{Auth, FetchError, HttpConfig, HttpFetcher, ListingCache, ListingFileStore};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "kosku-search";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_MODEL: &str = "gemini-2.0-flash";
const GEMINI_TIMEOUT: Duration = Duration::from_secs(30);

const CUSTOM_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
const CUSTOM_SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

const CHAT_FALLBACK_REPLY: &str =
    "Wah maaf ya dek, Mbah lagi sibuk ngurus kos lain. Coba tanya lagi nanti ya! 😊";

/// Process configuration, read once from the environment with explicit
/// defaults. A missing variable is never a startup failure.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listings_path: PathBuf,
    pub web_port: u16,
    pub http_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub user_agent: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            listings_path: std::env::var("KOSKU_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("db/kosan.json")),
            web_port: std::env::var("KOSKU_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            http_timeout: Duration::from_secs(
                std::env::var("KOSKU_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            cache_ttl: Duration::from_secs(
                std::env::var("KOSKU_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            cache_capacity: std::env::var("KOSKU_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(128),
            user_agent: std::env::var("KOSKU_USER_AGENT")
                .unwrap_or_else(|_| "kosku-bot/0.1".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Generative text collaborator

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Opaque prompt-in/text-out client for the generative model API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GEMINI_TIMEOUT)
            .build()
            .context("building generative model HTTP client")?;
        Ok(Self {
            api_key,
            model: GEMINI_MODEL.to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            client,
        })
    }

    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var("GOOGLE_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(Some(Self::new(key)?)),
            _ => Ok(None),
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .context("calling generative model API")?;

        let status = response.status();
        if !status.is_success() {
            bail!("generative model API returned status {status}");
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("decoding generative model response")?;
        let text: String = body
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .map(|part| part.text)
            .collect();
        if text.is_empty() {
            bail!("generative model returned no candidates");
        }
        Ok(text)
    }
}

/// Finds the first balanced `open`..`close` block outside string literals.
fn extract_json_block(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..start + offset + ch.len_utf8()]);
            }
        }
    }
    None
}

/// Locates a JSON array literal inside free-form generated text.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_json_block(text, '[', ']')
}

/// Locates a JSON object literal inside free-form generated text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_json_block(text, '{', '}')
}

/// Tolerant schema for one model-generated listing object.
#[derive(Debug, Deserialize)]
struct GeneratedKost {
    nama: Option<String>,
    alamat: Option<String>,
    harga: Option<f64>,
    #[serde(default)]
    fasilitas: Vec<String>,
    tipe: Option<String>,
    rating: Option<f64>,
    sumber: Option<String>,
    #[serde(rename = "sourceUrl")]
    source_url: Option<String>,
    kontak: Option<String>,
    deskripsi: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    jarak_km: Option<f64>,
    tersedia: Option<bool>,
    whatsapp: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    kecamatan: Option<String>,
    kota: Option<String>,
    provinsi: Option<String>,
    #[serde(default)]
    dekat_kampus: Vec<String>,
    #[serde(default)]
    dekat_mall: Vec<String>,
    #[serde(default)]
    dekat_transport: Vec<String>,
    #[serde(default)]
    biaya_tambahan: Vec<String>,
    #[serde(default)]
    peraturan: Vec<String>,
    #[serde(default)]
    keunggulan: Vec<String>,
}

fn effective_category(filters: &SearchFilters) -> KostCategory {
    if filters.category == KostCategory::Semua {
        KostCategory::Campur
    } else {
        filters.category
    }
}

fn map_generated(item: GeneratedKost, filters: &SearchFilters) -> Listing {
    let price = item
        .harga
        .map(|harga| harga.max(0.0) as u64)
        .unwrap_or(PRICE_PLACEHOLDER)
        .min(filters.max_budget);
    let category = item
        .tipe
        .map(|tipe| KostCategory::parse_or(&tipe, KostCategory::Campur))
        .unwrap_or_else(|| effective_category(filters));
    Listing {
        distance_km: item.jarak_km,
        facilities: item.fasilitas,
        category,
        available: item.tersedia.unwrap_or(true),
        rating: Some(item.rating.unwrap_or(RATING_PLACEHOLDER)),
        source_url: item.source_url,
        latitude: item.latitude,
        longitude: item.longitude,
        contact: item.kontak,
        whatsapp: item.whatsapp,
        description: Some(
            item.deskripsi
                .unwrap_or_else(|| "Kos nyaman dengan fasilitas lengkap".to_string()),
        ),
        images: item.images,
        district: item.kecamatan,
        city: item.kota,
        province: item.provinsi,
        nearby_campuses: item.dekat_kampus,
        nearby_malls: item.dekat_mall,
        nearby_transit: item.dekat_transport,
        extra_costs: item.biaya_tambahan,
        house_rules: item.peraturan,
        highlights: item.keunggulan,
        ..Listing::new(
            format!("ai-{}", Uuid::new_v4()),
            item.nama.unwrap_or_else(|| "Kos Rekomendasi".to_string()),
            item.alamat
                .unwrap_or_else(|| "Alamat tidak tersedia".to_string()),
            price,
            item.sumber.unwrap_or_else(|| "generated".to_string()),
        )
    }
}

/// Parses a generated response into listings; anything unparseable yields an
/// empty set, never an error.
pub fn parse_generated_listings(text: &str, filters: &SearchFilters) -> Vec<Listing> {
    let Some(block) = extract_json_array(text) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<GeneratedKost>>(block) {
        Ok(items) => items
            .into_iter()
            .map(|item| map_generated(item, filters))
            .collect(),
        Err(err) => {
            warn!(error = %err, "generated listing array did not parse");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Synthetic listing generator

struct CityProfile {
    name_prefix: &'static str,
    area: String,
    city: String,
    province: String,
    street: String,
    district: String,
    latitude: f64,
    longitude: f64,
    price_multiplier: f64,
    campuses: Vec<String>,
    malls: Vec<String>,
    transit: Vec<String>,
    area_tags: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

fn city_profile(location: &str) -> CityProfile {
    match location.trim().to_ascii_lowercase().as_str() {
        "jakarta" => CityProfile {
            name_prefix: "Kos Exclusive",
            area: "Jakarta Selatan".to_string(),
            city: "Jakarta".to_string(),
            province: "DKI Jakarta".to_string(),
            street: "Jl. Kemang Raya".to_string(),
            district: "Kebayoran Baru".to_string(),
            latitude: -6.261493,
            longitude: 106.8106,
            price_multiplier: 1.5,
            campuses: owned(&["Universitas Indonesia", "BINUS University", "Atma Jaya University"]),
            malls: owned(&["Kemang Village", "Pondok Indah Mall", "Senayan City"]),
            transit: owned(&["TransJakarta", "MRT Jakarta", "Go-Jek/Grab"]),
            area_tags: owned(&["Deket MRT", "Deket TransJakarta", "Deket Mall"]),
        },
        "bandung" => CityProfile {
            name_prefix: "Kos Asri",
            area: "Dago".to_string(),
            city: "Bandung".to_string(),
            province: "Jawa Barat".to_string(),
            street: "Jl. Ir. H. Djuanda".to_string(),
            district: "Coblong".to_string(),
            latitude: -6.890898,
            longitude: 107.6101,
            price_multiplier: 1.2,
            campuses: owned(&["ITB", "Universitas Padjadjaran", "Universitas Kristen Maranatha"]),
            malls: owned(&["Paris Van Java", "Bandung Indah Plaza", "Trans Studio Mall"]),
            transit: owned(&["Angkot", "Trans Bandung Raya", "Go-Jek/Grab"]),
            area_tags: owned(&["Deket Kampus", "Deket PVJ", "Deket Cihampelas"]),
        },
        "yogyakarta" => CityProfile {
            name_prefix: "Kos Harmoni",
            area: "Sleman".to_string(),
            city: "Yogyakarta".to_string(),
            province: "DI Yogyakarta".to_string(),
            street: "Jl. Kaliurang".to_string(),
            district: "Depok".to_string(),
            latitude: -7.7956,
            longitude: 110.3695,
            price_multiplier: 1.0,
            campuses: owned(&["UGM", "Universitas Islam Indonesia", "Universitas Atma Jaya Yogyakarta"]),
            malls: owned(&["Hartono Mall", "Jogja City Mall", "Ambarrukmo Plaza"]),
            transit: owned(&["Trans Jogja", "Gojek/Grab", "Angkot"]),
            area_tags: owned(&["Deket UGM", "Deket Malioboro", "Deket Kaliurang"]),
        },
        "surabaya" => CityProfile {
            name_prefix: "Kos Premium",
            area: "Surabaya Barat".to_string(),
            city: "Surabaya".to_string(),
            province: "Jawa Timur".to_string(),
            street: "Jl. Mayjen Sungkono".to_string(),
            district: "Dukuh Pakis".to_string(),
            latitude: -7.2906,
            longitude: 112.7344,
            price_multiplier: 1.1,
            campuses: owned(&["ITS", "Universitas Airlangga", "Universitas Surabaya"]),
            malls: owned(&["Tunjungan Plaza", "Surabaya Town Square", "Ciputra World"]),
            transit: owned(&["Trans Semanggi Suroboyo", "Gojek/Grab", "Angkot"]),
            area_tags: owned(&["Deket ITS", "Deket Tunjungan", "Deket Bandara"]),
        },
        _ => CityProfile {
            name_prefix: "Kos Nyaman",
            area: location.to_string(),
            city: location.to_string(),
            province: "Indonesia".to_string(),
            street: format!("Jl. {location} Raya"),
            district: location.to_string(),
            latitude: -6.2088,
            longitude: 106.8456,
            price_multiplier: 1.0,
            campuses: owned(&["Universitas Terdekat"]),
            malls: owned(&["Mall Terdekat"]),
            transit: owned(&["Transportasi Umum"]),
            area_tags: Vec::new(),
        },
    }
}

const FACILITY_POOL: &[&str] = &[
    "WiFi",
    "AC",
    "Kamar Mandi Dalam",
    "Spring Bed",
    "Lemari",
    "Meja Belajar",
    "Smart TV",
    "Kulkas Mini",
    "Dispenser",
    "CCTV Security",
    "Akses 24 Jam",
    "Dapur Bersama",
    "Laundry",
];

const CONTACT_PREFIXES: &[&str] = &[
    "62811", "62812", "62813", "62821", "62822", "62823", "62852", "62853", "62881", "62882",
];

const EXTRA_COSTS: &[&str] = &[
    "Listrik: Rp 150.000 - 300.000/bulan",
    "Air: Rp 50.000 - 100.000/bulan",
    "WiFi: Rp 100.000 - 200.000/bulan",
    "Keamanan: Rp 50.000 - 100.000/bulan",
    "Kebersihan: Rp 50.000 - 100.000/bulan",
];

const HOUSE_RULES: &[&str] = &[
    "Tidak boleh membawa tamu lawan jenis ke kamar",
    "Tidak boleh merokok di dalam kamar",
    "Wajib menjaga kebersihan kamar dan lingkungan",
    "Dilarang keras membawa hewan peliharaan",
    "Jam malam berlaku setelah jam 22:00",
];

const HIGHLIGHTS: &[&str] = &[
    "Lokasi sangat strategis dekat kampus dan tempat belanja",
    "Lingkungan aman dengan CCTV 24 jam",
    "Fasilitas lengkap siap huni tanpa perlu beli perabot",
    "Akses mudah ke transportasi umum",
    "Harga bersaing dengan fasilitas premium",
];

const IMAGE_IDS: &[&str] = &[
    "1522771731443-4a6f2d3fbc4c",
    "1502672260266-1c1ef2d93688",
    "1493809842364-78817d7e3ef7",
    "1505691938895-60b36390c4de",
    "1522708329358-968a97250483",
    "1507089947367-2c5e2e8c2cca",
];

fn category_multiplier(category: KostCategory) -> f64 {
    match category {
        KostCategory::Putra => 1.0,
        KostCategory::Putri => 1.1,
        KostCategory::Campur | KostCategory::Semua => 0.9,
    }
}

/// Builds exactly one plausible listing from the per-city reference table and
/// local randomization. Always labeled `generated`, always within budget, and
/// always carries the requested facilities.
pub fn synthesize_listing(filters: &SearchFilters) -> Listing {
    let profile = city_profile(&filters.location);
    let category = effective_category(filters);
    let mut rng = rand::thread_rng();

    let base_price = (filters.max_budget as f64 * 0.8).min(2_000_000.0);
    let variation = rng.gen_range(0.8..1.2);
    let raw_price = base_price * profile.price_multiplier * category_multiplier(category) * variation;
    let price = (((raw_price / 50_000.0).round() as u64) * 50_000).min(filters.max_budget);

    let mut facilities = filters.facilities.clone();
    while facilities.len() < 8 {
        let pick = FACILITY_POOL[rng.gen_range(0..FACILITY_POOL.len())];
        if !facilities.iter().any(|have| have == pick) {
            facilities.push(pick.to_string());
        }
    }
    for tag in &profile.area_tags {
        if !facilities.contains(tag) {
            facilities.push(tag.clone());
        }
    }

    let contact = format!(
        "{}{}",
        CONTACT_PREFIXES[rng.gen_range(0..CONTACT_PREFIXES.len())],
        rng.gen_range(10_000_000u64..100_000_000u64)
    );
    let rating = (rng.gen_range(3.5..=5.0) * 10.0_f64).round() / 10.0;
    let distance_km = (rng.gen_range(0.5..=5.0) * 10.0_f64).round() / 10.0;
    let house_number = rng.gen_range(1..200);

    let descriptions = [
        format!(
            "Kos {category} nyaman di {} dengan fasilitas lengkap. Dekat kampus dan tempat belanja.",
            filters.location
        ),
        format!(
            "Kos premium {category} di lokasi strategis {}. Akses mudah ke transportasi umum.",
            filters.location
        ),
        format!(
            "Kos {category} modern dengan konsep minimalis di {}. Lokasi sangat strategis.",
            filters.location
        ),
        format!(
            "Kos {category} exclusive di {} dengan pelayanan terbaik. Lingkungan tenang dan asri.",
            filters.location
        ),
    ];
    let description = descriptions[rng.gen_range(0..descriptions.len())].clone();

    let image_count = 3 + rng.gen_range(0..=3).min(IMAGE_IDS.len() - 3);
    let images = IMAGE_IDS[..image_count]
        .iter()
        .map(|id| format!("https://images.unsplash.com/photo-{id}?w=800&q=80"))
        .collect();

    Listing {
        distance_km: Some(distance_km),
        facilities,
        category,
        available: rng.gen_bool(0.85),
        rating: Some(rating),
        latitude: Some(profile.latitude + rng.gen_range(-0.01..0.01)),
        longitude: Some(profile.longitude + rng.gen_range(-0.01..0.01)),
        contact: Some(contact.clone()),
        whatsapp: Some(format!("https://wa.me/{contact}")),
        description: Some(description),
        images,
        district: Some(profile.district),
        city: Some(profile.city.clone()),
        province: Some(profile.province),
        nearby_campuses: profile.campuses,
        nearby_malls: profile.malls,
        nearby_transit: profile.transit,
        extra_costs: owned(&EXTRA_COSTS[..2 + rng.gen_range(0..3).min(EXTRA_COSTS.len() - 2)]),
        house_rules: owned(&HOUSE_RULES[..3 + rng.gen_range(0..3).min(HOUSE_RULES.len() - 3)]),
        highlights: owned(&HIGHLIGHTS[..2 + rng.gen_range(0..3).min(HIGHLIGHTS.len() - 2)]),
        ..Listing::new(
            format!("ai-{}", Uuid::new_v4()),
            format!("{} {} {}", profile.name_prefix, category, profile.area),
            format!(
                "{} No. {}, {}, {}",
                profile.street, house_number, profile.area, profile.city
            ),
            price,
            "generated",
        )
    }
}

// ---------------------------------------------------------------------------
// Aggregation

/// Drops `(address, price)` duplicates keeping the first occurrence, then
/// ranks ascending by price with rating descending as tie-break. The sort is
/// stable, so equally-ranked listings keep provider-iteration order.
pub fn dedup_and_rank(listings: Vec<Listing>) -> Vec<Listing> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(listings.len());
    for listing in listings {
        let key = (listing.address.clone(), listing.price);
        if seen.insert(key) {
            unique.push(listing);
        }
    }
    unique.sort_by(|a, b| {
        a.price.cmp(&b.price).then_with(|| {
            let rating_a = a.rating.unwrap_or(0.0);
            let rating_b = b.rating.unwrap_or(0.0);
            rating_b.partial_cmp(&rating_a).unwrap_or(Ordering::Equal)
        })
    });
    unique
}

/// The multi-source search front end. Fans out to every configured provider,
/// merges and ranks, and falls back to generated data only when every source
/// came back empty, so a search always answers with at least one hit.
pub struct SearchService {
    providers: Vec<Box<dyn Provider>>,
    http: HttpFetcher,
    cache: Arc<ListingCache>,
    generative: Option<GeminiClient>,
}

impl SearchService {
    pub fn new(
        providers: Vec<Box<dyn Provider>>,
        http: HttpFetcher,
        cache: Arc<ListingCache>,
        generative: Option<GeminiClient>,
    ) -> Self {
        Self {
            providers,
            http,
            cache,
            generative,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(&AppConfig::from_env())
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let providers = all_providers(&ProvidersConfig::from_env());
        let http = HttpFetcher::new(HttpConfig {
            timeout: config.http_timeout,
            user_agent: Some(config.user_agent.clone()),
        })?;
        let cache = Arc::new(ListingCache::new(config.cache_ttl, config.cache_capacity));
        let generative = GeminiClient::from_env()?;
        Ok(Self::new(providers, http, cache, generative))
    }

    pub fn cache(&self) -> Arc<ListingCache> {
        Arc::clone(&self.cache)
    }

    /// Concurrent fan-out over all providers, concatenated in provider
    /// iteration order. Failures already degraded to empty at the adapter
    /// boundary; one slow provider never cancels its siblings.
    pub async fn fetch_sourced(&self, filters: &SearchFilters) -> Vec<Listing> {
        let fetches = self
            .providers
            .iter()
            .map(|provider| run_provider(provider.as_ref(), &self.http, &self.cache, filters));
        join_all(fetches).await.into_iter().flatten().collect()
    }

    pub async fn search(&self, filters: &SearchFilters) -> Vec<SearchHit> {
        let merged = dedup_and_rank(self.fetch_sourced(filters).await);
        if !merged.is_empty() {
            info!(count = merged.len(), location = %filters.location, "search served from providers");
            return merged.into_iter().map(SearchHit::Sourced).collect();
        }

        info!(location = %filters.location, "no sourced results, taking the generative fallback");
        self.fallback(filters)
            .await
            .into_iter()
            .map(SearchHit::Synthetic)
            .collect()
    }

    async fn fallback(&self, filters: &SearchFilters) -> Vec<Listing> {
        if let Some(model) = &self.generative {
            match model.generate(&build_listing_prompt(filters)).await {
                Ok(text) => {
                    let parsed = parse_generated_listings(&text, filters);
                    if !parsed.is_empty() {
                        return parsed;
                    }
                    warn!("generated response carried no parseable listing array");
                }
                Err(err) => warn!(error = %err, "listing generation failed"),
            }
        }
        vec![synthesize_listing(filters)]
    }

    /// Asks the model to pull structured filters out of a chat message.
    /// Anything short of a parseable answer is `None`, never an error.
    pub async fn extract_filters(&self, message: &str) -> Option<SearchFilters> {
        let model = self.generative.as_ref()?;
        let text = match model.generate(&build_filter_prompt(message)).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "filter extraction failed");
                return None;
            }
        };
        let block = extract_json_object(&text)?;
        let extracted: ExtractedFilters = serde_json::from_str(block).ok()?;
        let location = extracted.location.filter(|l| !l.trim().is_empty())?;
        Some(SearchFilters {
            location,
            max_budget: extracted.max_budget.unwrap_or(1_000_000),
            facilities: extracted.facilities,
            category: extracted
                .kind
                .map(|kind| KostCategory::parse_or(&kind, KostCategory::Semua))
                .unwrap_or(KostCategory::Semua),
        })
    }

    /// Free-form assistant reply in the Mbah persona. Model failure falls
    /// back to a fixed apology so chat never errors.
    pub async fn chat_reply(&self, message: &str) -> String {
        let Some(model) = &self.generative else {
            return CHAT_FALLBACK_REPLY.to_string();
        };
        match model.generate(&build_chat_prompt(message)).await {
            Ok(text) => tidy_chat_reply(&text),
            Err(err) => {
                warn!(error = %err, "chat generation failed");
                CHAT_FALLBACK_REPLY.to_string()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractedFilters {
    location: Option<String>,
    #[serde(rename = "maxBudget")]
    max_budget: Option<u64>,
    #[serde(default)]
    facilities: Vec<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

lazy_static! {
    static ref BOLD_RE: Regex = Regex::new(r"\*\*(.*?)\*\*").unwrap();
    static ref KEYWORD_LOCATION_RE: Regex = Regex::new(r"(?i)kos\s+(\w+)").unwrap();
    static ref KEYWORD_BUDGET_RE: Regex = Regex::new(r"(?i)(\d+)\s*(jt|juta|rb|ribu)").unwrap();
}

fn tidy_chat_reply(text: &str) -> String {
    let unbolded = BOLD_RE.replace_all(text, "$1");
    unbolded.replace("\n\n", "\n").trim().to_string()
}

fn format_rupiah(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

fn build_listing_prompt(filters: &SearchFilters) -> String {
    format!(
        "Generate realistic Indonesian kos/kost listings with these criteria:\n\
         Location: {}\n\
         Max Budget: Rp {}\n\
         Facilities: {}\n\
         Type: {}\n\n\
         Return a JSON array of listing objects with fields: nama, alamat, harga (monthly rupiah), \
         fasilitas (array), tipe (Putra/Putri/Campur), rating (1-5), sumber, sourceUrl, kontak, \
         deskripsi, latitude, longitude, jarak_km, tersedia, whatsapp (628xxxxxxxxx), images, \
         kecamatan, kota, provinsi, dekat_kampus, dekat_mall, dekat_transport, biaya_tambahan, \
         peraturan, keunggulan.\n\
         Use current market rates and real landmarks specific to the location. \
         Return only the JSON array.",
        filters.location,
        format_rupiah(filters.max_budget),
        filters.facilities.join(", "),
        filters.category,
    )
}

fn build_filter_prompt(message: &str) -> String {
    format!(
        "Extract search criteria from this Indonesian message: \"{message}\"\n\n\
         Return JSON with:\n\
         - location: string (area/city)\n\
         - maxBudget: number (IDR)\n\
         - facilities: string[]\n\
         - type: string (Putra/Putri/Campur/Semua)\n\n\
         Return null if no criteria found."
    )
}

fn build_chat_prompt(message: &str) -> String {
    format!(
        "Anda adalah Mbah, seorang ahli kos di Indonesia yang ramah dan berpengalaman. \
         Gunakan bahasa Indonesia yang santai dan khas anak kos, sapa dengan \"ya\", \"nak\", \"dek\", \
         dan pakai emotikon seperti 😊, 🏠, 💰 sesuai konteks. \
         Untuk pencarian kos berikan 2-3 rekomendasi spesifik dengan lokasi dan harga realistis; \
         untuk pertanyaan umum jawab dengan pengalaman dan tips.\n\n\
         Pertanyaan user: {message}\n\n\
         Jawaban Mbah:"
    )
}

/// Default sync filters, overridden by whatever the keyword carries
/// (`kos <lokasi>`, `<n> jt|juta|rb|ribu`).
pub fn filters_from_keyword(keyword: &str) -> SearchFilters {
    let mut filters = SearchFilters {
        location: "Bandung".to_string(),
        max_budget: 2_000_000,
        facilities: Vec::new(),
        category: KostCategory::Semua,
    };
    if let Some(caps) = KEYWORD_LOCATION_RE.captures(keyword) {
        filters.location = caps[1].to_string();
    }
    if let Some(caps) = KEYWORD_BUDGET_RE.captures(keyword) {
        if let Ok(amount) = caps[1].parse::<u64>() {
            let unit = caps[2].to_ascii_lowercase();
            filters.max_budget = if unit.starts_with("jt") || unit.starts_with("juta") {
                amount * 1_000_000
            } else {
                amount * 1_000
            };
        }
    }
    filters
}

// ---------------------------------------------------------------------------
// Web search supplement

#[derive(Debug, Deserialize)]
struct CustomSearchEnvelope {
    #[serde(default)]
    items: Vec<WebSearchItem>,
}

/// One web-search result as returned by the custom search API.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSearchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub link: Option<String>,
}

/// Custom-search REST client used to supplement provider data during sync.
#[derive(Debug, Clone)]
pub struct GoogleSearchClient {
    api_key: String,
    engine_id: String,
    base_url: String,
    http: HttpFetcher,
}

impl GoogleSearchClient {
    pub fn new(api_key: String, engine_id: String) -> Result<Self> {
        Ok(Self {
            api_key,
            engine_id,
            base_url: CUSTOM_SEARCH_URL.to_string(),
            http: HttpFetcher::new(HttpConfig {
                timeout: CUSTOM_SEARCH_TIMEOUT,
                user_agent: None,
            })?,
        })
    }

    pub fn from_env() -> Result<Option<Self>> {
        let (Ok(api_key), Ok(engine_id)) = (
            std::env::var("GOOGLE_API_KEY"),
            std::env::var("CUSTOM_SEARCH_ENGINE_ID"),
        ) else {
            return Ok(None);
        };
        if api_key.is_empty() || engine_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::new(api_key, engine_id)?))
    }

    pub async fn search(&self, query: &str) -> Result<Vec<WebSearchItem>, FetchError> {
        let params = [
            ("q", query.to_string()),
            ("key", self.api_key.clone()),
            ("cx", self.engine_id.clone()),
            ("num", "10".to_string()),
        ];
        let envelope: CustomSearchEnvelope =
            self.http.get_json(&self.base_url, &params, Auth::None).await?;
        Ok(envelope.items)
    }
}

// ---------------------------------------------------------------------------
// Sync pipeline

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub finished_at: DateTime<Utc>,
    pub total_listings: usize,
    pub sources: Vec<String>,
    pub price_min: Option<u64>,
    pub price_max: Option<u64>,
}

/// Refreshes the static listing file from every reachable source: the five
/// marketplace providers plus the web-search supplement.
pub struct SyncService {
    search: SearchService,
    google: Option<GoogleSearchClient>,
    store: ListingFileStore,
}

impl SyncService {
    pub fn new(
        search: SearchService,
        google: Option<GoogleSearchClient>,
        store: ListingFileStore,
    ) -> Self {
        Self {
            search,
            google,
            store,
        }
    }

    pub fn from_env() -> Result<Self> {
        let config = AppConfig::from_env();
        Ok(Self {
            search: SearchService::from_config(&config)?,
            google: GoogleSearchClient::from_env()?,
            store: ListingFileStore::new(config.listings_path),
        })
    }

    pub async fn run(&self, keyword: &str) -> Result<SyncSummary> {
        let filters = filters_from_keyword(keyword);
        info!(keyword, location = %filters.location, budget = filters.max_budget, "starting listing sync");

        let mut merged = self.search.fetch_sourced(&filters).await;
        merged.extend(self.web_results(keyword, &filters).await);
        let merged = dedup_and_rank(merged);

        self.store.save(&merged).await?;

        let mut sources: Vec<String> = merged.iter().map(|l| l.source.clone()).collect();
        sources.sort();
        sources.dedup();

        Ok(SyncSummary {
            finished_at: Utc::now(),
            total_listings: merged.len(),
            sources,
            price_min: merged.iter().map(|l| l.price).min(),
            price_max: merged.iter().map(|l| l.price).max(),
        })
    }

    async fn web_results(&self, keyword: &str, filters: &SearchFilters) -> Vec<Listing> {
        let Some(client) = &self.google else {
            debug!("web search credentials not configured, skipping supplement");
            return Vec::new();
        };
        let cache = self.search.cache();
        let cache_key = format!("google-{keyword}");
        if let Some(cached) = cache.get_fresh(&cache_key).await {
            return cached;
        }
        match client.search(keyword).await {
            Ok(items) => {
                let batch_id = Uuid::new_v4();
                let listings: Vec<Listing> = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        listing_from_search_result(
                            format!("google-{batch_id}-{index}"),
                            &item.title,
                            &item.snippet,
                            item.link,
                            filters,
                        )
                    })
                    .collect();
                cache.insert(cache_key, listings.clone()).await;
                listings
            }
            Err(err) => {
                warn!(error = %err, "web search failed, skipping supplement");
                Vec::new()
            }
        }
    }
}

/// The placeholder listing the sync endpoint appends until a real
/// marketplace push integration exists.
pub fn simulated_sync_listing() -> Listing {
    Listing {
        distance_km: Some(2.5),
        facilities: vec!["WiFi".to_string(), "Parkir Motor".to_string()],
        rating: Some(4.0),
        ..Listing::new(
            format!("sync-{}", Uuid::new_v4()),
            "Kos Update dari Sync",
            "Hasil Pencarian Google - Area Bandung",
            800_000,
            "google-search",
        )
    }
}
