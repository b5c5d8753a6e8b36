//! Template data assembly
//!
//! Merges the caller's data bag with the restaurant's locale and branding
//! fields before rendering. Caller-supplied keys always win.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tavola_common::config::RestaurantConfig;
use tavola_storage::models::RestaurantSettings;

/// Resolved restaurant branding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branding {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postcode: String,
    pub brand_color: String,
    pub website_url: String,
}

impl Branding {
    /// Stored settings first, configured fallbacks for anything missing or blank
    pub fn resolve(stored: Option<&RestaurantSettings>, fallback: &RestaurantConfig) -> Self {
        Self {
            name: pick(stored.map(|s| &s.name), &fallback.name),
            phone: pick(stored.map(|s| &s.phone), &fallback.phone),
            address: pick(stored.map(|s| &s.address), &fallback.address),
            city: pick(stored.map(|s| &s.city), &fallback.city),
            postcode: pick(stored.map(|s| &s.postcode), &fallback.postcode),
            brand_color: pick(stored.map(|s| &s.brand_color), &fallback.brand_color),
            website_url: pick(stored.map(|s| &s.website_url), &fallback.website_url),
        }
    }

    /// Non-empty parts of name, address, city, postcode and phone joined with " | "
    pub fn footer(&self) -> String {
        [
            &self.name,
            &self.address,
            &self.city,
            &self.postcode,
            &self.phone,
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .map(|part| part.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
    }
}

fn pick(value: Option<&Option<String>>, default: &str) -> String {
    value
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Template data assembly
pub struct TemplateData;

impl TemplateData {
    /// Build the merged bag handed to the renderer
    pub fn assemble(
        raw: &Map<String, Value>,
        recipient_name: Option<&str>,
        branding: &Branding,
        now: DateTime<Utc>,
    ) -> Map<String, Value> {
        let mut data = Map::new();
        let mut put = |key: &str, value: String| {
            data.insert(key.to_string(), Value::String(value));
        };

        put("restaurant_name", branding.name.clone());
        put("restaurant_phone", branding.phone.clone());
        put("restaurant_address", branding.address.clone());
        put("restaurant_city", branding.city.clone());
        put("restaurant_postcode", branding.postcode.clone());
        put("restaurant_footer", branding.footer());
        put("brand_color", branding.brand_color.clone());
        put("website_url", branding.website_url.clone());
        put("created_at", format_timestamp(now));
        put(
            "recipient_name",
            recipient_name.unwrap_or_default().to_string(),
        );

        if let Some(size) = raw.get("party_size").and_then(party_size) {
            put("guest_text", guest_text(size));
        }

        for (key, value) in raw {
            data.insert(key.clone(), value.clone());
        }

        data
    }
}

/// Pin `created_at` in a caller data bag unless the caller set it
///
/// Every attempt of one logical send reuses the provider idempotency key, so
/// the rendered body must not change between attempts.
pub fn stamp_created_at(data: &mut Map<String, Value>, at: DateTime<Utc>) {
    data.entry("created_at")
        .or_insert_with(|| Value::String(format_timestamp(at)));
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%d/%m/%Y %H:%M").to_string()
}

fn party_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// "1 guest" / "N guests"
pub fn guest_text(size: u64) -> String {
    if size == 1 {
        "1 guest".to_string()
    } else {
        format!("{} guests", size)
    }
}
