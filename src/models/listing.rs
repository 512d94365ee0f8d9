//! Vehicle listing as delivered by the upstream search and detail APIs.
//!
//! Upstream payloads are loosely typed: amounts arrive as numbers or decimal
//! strings, identifiers as strings or numbers, and optional fields may be
//! missing or malformed. Deserialization is lenient for every optional field so
//! a single odd attribute never drops a listing.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Image size keys, largest first. The first key present wins.
const IMAGE_VARIANT_PREFERENCE: &[&str] = &["XXXL", "XXL", "XL", "L", "M", "S", "ICON"];

/// One vehicle advertisement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Upstream-assigned identifier (`mobileAdId` on the wire for some feeds).
    #[serde(alias = "mobileAdId", deserialize_with = "de::string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "de::lenient")]
    pub make: Option<String>,
    #[serde(default, deserialize_with = "de::lenient")]
    pub model: Option<String>,
    /// Year/month of first registration, e.g. `201905`.
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub first_registration: Option<String>,
    #[serde(default, deserialize_with = "de::lenient")]
    pub price: Option<Price>,
    /// Odometer reading in km.
    #[serde(default, deserialize_with = "de::lenient")]
    pub mileage: Option<u64>,
    /// Fuel code, e.g. `PETROL`.
    #[serde(default, deserialize_with = "de::lenient")]
    pub fuel: Option<String>,
    /// Gearbox code, e.g. `AUTOMATIC_GEAR`.
    #[serde(default, deserialize_with = "de::lenient")]
    pub gearbox: Option<String>,
    /// Engine power in kW.
    #[serde(default, deserialize_with = "de::lenient")]
    pub power: Option<u32>,
    /// Images in source order.
    #[serde(default, deserialize_with = "de::lenient_vec")]
    pub images: Vec<ImageVariants>,
}

impl Listing {
    /// Best URL of each image, in source order, at most `limit` entries.
    pub fn image_urls(&self, limit: usize) -> Vec<String> {
        self.images
            .iter()
            .filter_map(ImageVariants::best_url)
            .map(str::to_string)
            .take(limit)
            .collect()
    }

    /// `make model`, skipping whichever part is missing.
    pub fn title(&self) -> String {
        [self.make.as_deref(), self.model.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Gross/net price pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    #[serde(default, alias = "consumerPriceGross", deserialize_with = "de::amount")]
    pub gross: Option<f64>,
    #[serde(default, alias = "consumerPriceNet", deserialize_with = "de::amount")]
    pub net: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient")]
    pub currency: Option<String>,
}

impl Price {
    /// Amount shown to consumers: gross when known, net otherwise.
    pub fn amount(&self) -> Option<f64> {
        self.gross.or(self.net).filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// Size variant → URL mapping for one image, in the order the upstream sent it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageVariants(pub Vec<(String, serde_json::Value)>);

impl ImageVariants {
    /// URL of the largest known variant, falling back to the first http(s)
    /// URL in source order.
    pub fn best_url(&self) -> Option<&str> {
        IMAGE_VARIANT_PREFERENCE
            .iter()
            .find_map(|key| self.url_for(key))
            .or_else(|| {
                self.0
                    .iter()
                    .filter_map(|(_, v)| v.as_str())
                    .find(|v| is_http_url(v))
            })
    }

    fn url_for(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_str())
            .filter(|v| is_http_url(v))
    }
}

impl Serialize for ImageVariants {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ImageVariants {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VariantsVisitor;

        impl<'de> Visitor<'de> for VariantsVisitor {
            type Value = ImageVariants;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of size variant to URL")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ImageVariants, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, serde_json::Value>()? {
                    entries.push(entry);
                }
                Ok(ImageVariants(entries))
            }
        }

        deserializer.deserialize_map(VariantsVisitor)
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

/// One page of search results.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawSearchPage")]
pub struct SearchPage {
    /// Ads that parsed; malformed ones are dropped.
    pub ads: Vec<Listing>,
    /// Number of elements the upstream sent, parsed or not.
    pub received: usize,
    pub total: Option<u64>,
}

impl SearchPage {
    /// Items came back but none of them could be used.
    pub fn is_unreadable(&self) -> bool {
        self.received > 0 && self.ads.is_empty()
    }
}

#[derive(Deserialize)]
struct RawSearchPage {
    #[serde(default)]
    ads: serde_json::Value,
    #[serde(default, deserialize_with = "de::lenient")]
    total: Option<u64>,
}

impl From<RawSearchPage> for SearchPage {
    fn from(raw: RawSearchPage) -> Self {
        let items = match raw.ads {
            serde_json::Value::Array(items) => items,
            _ => Vec::new(),
        };
        Self {
            received: items.len(),
            ads: items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            total: raw.total,
        }
    }
}

mod de {
    use serde::de::{DeserializeOwned, Error};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Any value that does not fit `T` becomes `None`.
    pub fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).ok())
    }

    /// Keeps the elements that fit `T`, drops the rest.
    pub fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Value::deserialize(deserializer)?;
        let Value::Array(items) = value else {
            return Ok(Vec::new());
        };
        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect())
    }

    pub fn amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }

    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(D::Error::custom(format!(
                "expected a non-empty string or number, got {other}"
            ))),
        }
    }

    pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}
