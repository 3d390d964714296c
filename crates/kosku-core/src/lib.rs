//! Canonical listing model and search types for Kosku.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "kosku-core";

/// Occupancy category of a kost. Closed set; unrecognized input never
/// propagates past a parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KostCategory {
    /// Male-only (putra).
    Putra,
    /// Female-only (putri).
    Putri,
    /// Mixed occupancy (campur).
    #[default]
    Campur,
    /// No preference; only meaningful in a query, never on a listing.
    Semua,
}

impl KostCategory {
    /// Parses a category token, falling back to `fallback` on anything
    /// unrecognized. Provider and snippet boundaries pass `Campur`; the
    /// query boundary passes `Semua`.
    pub fn parse_or(input: &str, fallback: KostCategory) -> KostCategory {
        match input.trim().to_ascii_lowercase().as_str() {
            "putra" => KostCategory::Putra,
            "putri" => KostCategory::Putri,
            "campur" => KostCategory::Campur,
            "semua" => KostCategory::Semua,
            _ => fallback,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KostCategory::Putra => "Putra",
            KostCategory::Putri => "Putri",
            KostCategory::Campur => "Campur",
            KostCategory::Semua => "Semua",
        }
    }
}

impl fmt::Display for KostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rentable room, normalized from whichever source produced it.
///
/// Serialized field names follow the Indonesian wire vocabulary used by the
/// marketplace feeds and the on-disk listing file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Source-qualified id, e.g. `mamikos-123` or `ai-<uuid>`. Unique within
    /// one merged result set, not globally.
    pub id: String,
    #[serde(rename = "nama")]
    pub name: String,
    #[serde(rename = "alamat")]
    pub address: String,
    /// Monthly price in rupiah. Every producer clamps this to the requested
    /// budget; the aggregator never does.
    #[serde(rename = "harga")]
    pub price: u64,
    #[serde(rename = "jarak_km", default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    /// Facility tags in insertion order.
    #[serde(rename = "fasilitas", default)]
    pub facilities: Vec<String>,
    #[serde(rename = "tipe", default)]
    pub category: KostCategory,
    #[serde(rename = "tersedia")]
    pub available: bool,
    /// Provenance label: a platform domain, a search-result link, or
    /// `generated` for fabricated records.
    #[serde(rename = "sumber")]
    pub source: String,
    #[serde(rename = "sourceUrl", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Star rating in `[1.0, 5.0]` when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(rename = "kontak", default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(rename = "deskripsi", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(rename = "kecamatan", default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(rename = "kota", default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(rename = "provinsi", default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(rename = "dekat_kampus", default, skip_serializing_if = "Vec::is_empty")]
    pub nearby_campuses: Vec<String>,
    #[serde(rename = "dekat_mall", default, skip_serializing_if = "Vec::is_empty")]
    pub nearby_malls: Vec<String>,
    #[serde(rename = "dekat_transport", default, skip_serializing_if = "Vec::is_empty")]
    pub nearby_transit: Vec<String>,
    #[serde(rename = "biaya_tambahan", default, skip_serializing_if = "Vec::is_empty")]
    pub extra_costs: Vec<String>,
    #[serde(rename = "peraturan", default, skip_serializing_if = "Vec::is_empty")]
    pub house_rules: Vec<String>,
    #[serde(rename = "keunggulan", default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,
}

impl Listing {
    /// Minimal listing with every optional field empty; `available` starts
    /// true, `category` starts `Campur`. Producers override what they know.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        price: u64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            price,
            distance_km: None,
            facilities: Vec::new(),
            category: KostCategory::Campur,
            available: true,
            source: source.into(),
            source_url: None,
            rating: None,
            latitude: None,
            longitude: None,
            contact: None,
            whatsapp: None,
            description: None,
            images: Vec::new(),
            district: None,
            city: None,
            province: None,
            nearby_campuses: Vec::new(),
            nearby_malls: Vec::new(),
            nearby_transit: Vec::new(),
            extra_costs: Vec::new(),
            house_rules: Vec::new(),
            highlights: Vec::new(),
        }
    }

    /// Duplicate-detection key. Two listings with the same `(address, price)`
    /// are treated as the same room and merged first-seen-wins. Known
    /// limitation: distinct rooms that coincide on both fields merge, and the
    /// same room re-priced by another platform does not.
    pub fn dedup_key(&self) -> (&str, u64) {
        (self.address.as_str(), self.price)
    }
}

/// A ranked search result. Fabricated data never masquerades as sourced
/// data: the fallback path only ever produces `Synthetic`, and the `origin`
/// tag survives serialization so consumers can tell the two apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum SearchHit {
    Sourced(Listing),
    Synthetic(Listing),
}

impl SearchHit {
    pub fn listing(&self) -> &Listing {
        match self {
            SearchHit::Sourced(listing) | SearchHit::Synthetic(listing) => listing,
        }
    }

    pub fn into_listing(self) -> Listing {
        match self {
            SearchHit::Sourced(listing) | SearchHit::Synthetic(listing) => listing,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, SearchHit::Synthetic(_))
    }
}

/// One search request. Built per call and never mutated after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub location: String,
    #[serde(rename = "maxBudget")]
    pub max_budget: u64,
    #[serde(default)]
    pub facilities: Vec<String>,
    #[serde(rename = "type", default = "default_query_category")]
    pub category: KostCategory,
}

fn default_query_category() -> KostCategory {
    KostCategory::Semua
}

impl SearchFilters {
    pub fn new(location: impl Into<String>, max_budget: u64) -> Self {
        Self {
            location: location.into(),
            max_budget,
            facilities: Vec::new(),
            category: KostCategory::Semua,
        }
    }

    /// Deterministic cache key: provider identity plus the serialized
    /// filters, so identical queries hit the same slot.
    pub fn cache_key(&self, provider_id: &str) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        format!("{provider_id}-{serialized}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_fails_closed_to_fallback() {
        assert_eq!(
            KostCategory::parse_or("putri", KostCategory::Campur),
            KostCategory::Putri
        );
        assert_eq!(
            KostCategory::parse_or("  PUTRA ", KostCategory::Campur),
            KostCategory::Putra
        );
        assert_eq!(
            KostCategory::parse_or("wanita-only", KostCategory::Campur),
            KostCategory::Campur
        );
        assert_eq!(
            KostCategory::parse_or("", KostCategory::Semua),
            KostCategory::Semua
        );
    }

    #[test]
    fn search_hit_serializes_origin_tag_with_listing_fields() {
        let hit = SearchHit::Synthetic(Listing::new(
            "ai-1",
            "Kos Asri Campur Dago",
            "Jl. Ir. H. Djuanda No. 10",
            900_000,
            "generated",
        ));
        let value = serde_json::to_value(&hit).unwrap();
        assert_eq!(value["origin"], "synthetic");
        assert_eq!(value["nama"], "Kos Asri Campur Dago");
        assert_eq!(value["harga"], 900_000);
        assert_eq!(value["sumber"], "generated");
    }

    #[test]
    fn listing_roundtrips_through_wire_names() {
        let mut listing = Listing::new("mamikos-9", "Kos Melati", "Jl. Dago 5", 750_000, "mamikos.com");
        listing.facilities = vec!["WiFi".to_string(), "AC".to_string()];
        listing.rating = Some(4.5);
        listing.category = KostCategory::Putri;

        let json = serde_json::to_string(&listing).unwrap();
        assert!(json.contains("\"alamat\""));
        assert!(json.contains("\"fasilitas\""));
        assert!(json.contains("\"tipe\":\"Putri\""));
        // Empty optionals stay off the wire.
        assert!(!json.contains("dekat_kampus"));

        let back: Listing = serde_json::from_str(&json).unwrap();
        assert_eq!(back, listing);
    }

    #[test]
    fn filters_cache_key_is_deterministic_per_provider() {
        let filters = SearchFilters {
            location: "Bandung".to_string(),
            max_budget: 1_500_000,
            facilities: vec!["WiFi".to_string()],
            category: KostCategory::Putri,
        };
        assert_eq!(filters.cache_key("mamikos"), filters.cache_key("mamikos"));
        assert_ne!(filters.cache_key("mamikos"), filters.cache_key("olx"));
    }

    #[test]
    fn dedup_key_pairs_address_and_price() {
        let listing = Listing::new("olx-1", "Kos A", "Jl. Merdeka 1", 500_000, "olx.co.id");
        assert_eq!(listing.dedup_key(), ("Jl. Merdeka 1", 500_000));
    }
}
