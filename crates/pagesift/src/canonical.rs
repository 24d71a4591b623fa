//! Link canonicalization: absolute URLs with a policy-defined query.
//!
//! Relative links are resolved against the scheme and host of the page they
//! were found on. Tracking parameters on the denylist are removed, then the
//! configured affiliate parameters are appended. Query segments are handled
//! as raw text, so canonicalizing an already canonical URL is a no-op.

use serde::{Deserialize, Serialize};
use url::Url;

/// Which query parameters to strip and what to append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingPolicy {
    /// Parameter names removed wherever they appear (case-sensitive).
    pub denylist: Vec<String>,
    /// Raw `name=value&name=value` string appended to every link.
    pub affiliate_params: String,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            denylist: [
                "psrc",
                "cmp",
                "ranking_uuid",
                "visitor_id",
                "utm_source",
                "utm_campaign",
                "utm_term",
                "utm_content",
                "gclid",
                "fbclid",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            affiliate_params: "partner_id=5QQHAHP&utm_medium=online_publisher".to_string(),
        }
    }
}

impl TrackingPolicy {
    /// Affiliate string without leading `?`/`&` or empty segments.
    fn affiliate_segments(&self) -> Vec<&str> {
        self.affiliate_params
            .trim_start_matches(['?', '&'])
            .split('&')
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn strips(&self, name: &str) -> bool {
        self.denylist.iter().any(|d| d == name)
            || self
                .affiliate_segments()
                .iter()
                .any(|seg| param_name(seg) == name)
    }
}

/// Applies a `TrackingPolicy` to extracted links.
#[derive(Debug, Clone, Default)]
pub struct LinkCanonicalizer {
    policy: TrackingPolicy,
}

impl LinkCanonicalizer {
    pub fn new(policy: TrackingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TrackingPolicy {
        &self.policy
    }

    /// Canonicalize `url` as found on the page at `base_url`.
    ///
    /// Returns the empty string when `url` is blank or cannot be made into an
    /// absolute http(s) URL; never returns a relative path.
    pub fn canonicalize(&self, url: &str, base_url: &str) -> String {
        let Some(mut parsed) = resolve(url, base_url) else {
            return String::new();
        };

        let kept: Vec<String> = parsed
            .query()
            .unwrap_or("")
            .split('&')
            .filter(|seg| !seg.is_empty() && !self.policy.strips(param_name(seg)))
            .map(str::to_string)
            .collect();

        let mut query = kept.join("&");
        let affiliate = self.policy.affiliate_segments().join("&");
        if !affiliate.is_empty() {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&affiliate);
        }

        if query.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.set_query(Some(&query));
        }
        parsed.to_string()
    }
}

/// Resolve `url` to an absolute http(s) URL without touching its query.
///
/// Returns the empty string when that is not possible.
pub fn resolve_absolute(url: &str, base_url: &str) -> String {
    resolve(url, base_url).map(String::from).unwrap_or_default()
}

fn resolve(url: &str, base_url: &str) -> Option<Url> {
    let raw = url.trim();
    if raw.is_empty() {
        return None;
    }

    let resolved = match Url::parse(raw) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base_url).ok()?;
            base.join("/").ok()?.join(raw).ok()?
        }
        Err(_) => return None,
    };

    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

fn param_name(segment: &str) -> &str {
    segment.split_once('=').map(|(name, _)| name).unwrap_or(segment)
}
