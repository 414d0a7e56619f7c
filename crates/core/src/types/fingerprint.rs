//! Request fingerprinting and cache key derivation.

use std::collections::HashSet;
use std::fmt;

/// Query fields that influence the upstream response.
pub const DEFAULT_CACHE_FIELDS: &[&str] = &[
    "lat",
    "lon",
    "format",
    "json_callback",
    "addressdetails",
    "extratags",
    "namedetails",
    "accept-language",
    "zoom",
    "polygon_geojson",
    "polygon_kml",
    "polygon_svg",
    "polygon_text",
    "polygon_threshold",
];

/// Separator between `field=value` pairs and between key segments.
pub const KEY_SEPARATOR: &str = "__";

/// Canonical, order-independent view of the cache-relevant query fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFingerprint {
    pairs: Vec<(String, String)>,
}

impl RequestFingerprint {
    /// `field=value` pairs joined by `__`.
    pub fn canonical(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR)
    }
}

/// Which fields participate in a fingerprint and which default applies.
#[derive(Debug, Clone)]
pub struct FingerprintPolicy {
    fields: HashSet<String>,
    language_field: String,
    default_language: String,
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_CACHE_FIELDS.iter().map(|f| f.to_string()),
            "accept-language",
            "en-us",
        )
    }
}

impl FingerprintPolicy {
    pub fn new(
        fields: impl IntoIterator<Item = String>,
        language_field: impl Into<String>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            language_field: language_field.into(),
            default_language: default_language.into(),
        }
    }

    pub fn from_config(cfg: &crate::config::CacheConfig) -> Self {
        Self::new(
            cfg.fields.iter().cloned(),
            cfg.language_field.clone(),
            cfg.default_language.clone(),
        )
    }

    /// Build the fingerprint of a decoded query string.
    ///
    /// Only the first occurrence of a repeated field counts, matching how
    /// query strings are usually read as a multi-dict.
    pub fn fingerprint<K, V>(&self, params: &[(K, V)]) -> RequestFingerprint
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut pairs: Vec<(String, String)> = Vec::new();

        for (k, v) in params {
            let k = k.as_ref();
            if !seen.insert(k.to_string()) {
                continue;
            }
            if self.fields.contains(k) {
                pairs.push((k.to_string(), v.as_ref().to_string()));
            }
        }

        if !seen.contains(&self.language_field) && self.fields.contains(&self.language_field) {
            pairs.push((self.language_field.clone(), self.default_language.clone()));
        }

        pairs.sort();
        RequestFingerprint { pairs }
    }
}

/// Content-addressed key: `<prefix>__<md5 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(prefix: &str, fingerprint: &RequestFingerprint) -> Self {
        let digest = md5::compute(fingerprint.canonical().as_bytes());
        Self(format!("{}{}{:x}", prefix, KEY_SEPARATOR, digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Payload key in split storage.
    pub fn data_key(&self) -> String {
        format!("{}{}data", self.0, KEY_SEPARATOR)
    }

    /// Metadata key in split storage.
    pub fn info_key(&self) -> String {
        format!("{}{}info", self.0, KEY_SEPARATOR)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
