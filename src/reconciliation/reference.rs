use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Gateway-issued transaction identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Returns `None` for blank input.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PaymentReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Query parameter names the gateway may use for the reference, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceKeys {
    primary: String,
    legacy: String,
}

impl ReferenceKeys {
    pub fn new(primary: impl Into<String>, legacy: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            legacy: legacy.into(),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn legacy(&self) -> &str {
        &self.legacy
    }
}

impl Default for ReferenceKeys {
    fn default() -> Self {
        Self::new("reference", "trxref")
    }
}

/// Query parameters of a gateway redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackQuery {
    params: HashMap<String, String>,
}

impl CallbackQuery {
    /// Parses a raw query string (`a=1&b=2`, leading `?` tolerated).
    /// The first occurrence of a repeated key wins.
    pub fn from_query(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut params = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self { params }
    }

    /// Parses the query part of a full redirect URL.
    pub fn from_url(raw: &str) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(raw)?;
        Ok(Self::from_query(parsed.query().unwrap_or_default()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl From<HashMap<String, String>> for CallbackQuery {
    fn from(params: HashMap<String, String>) -> Self {
        Self { params }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CallbackQuery {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = HashMap::new();
        for (key, value) in iter {
            params.entry(key.into()).or_insert_with(|| value.into());
        }
        Self { params }
    }
}

/// Primary key first, legacy key second. A blank value counts as absent.
pub fn extract_reference(query: &CallbackQuery, keys: &ReferenceKeys) -> Option<PaymentReference> {
    query
        .get(keys.primary())
        .and_then(PaymentReference::new)
        .or_else(|| query.get(keys.legacy()).and_then(PaymentReference::new))
}
