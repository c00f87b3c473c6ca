//! Cookie header parsing and sticky `Set-Cookie` rendering.
//!
//! # Design Decisions
//! - Only the subset needed for assignment cookies: name=value pairs in,
//!   one attribute set out
//! - Never HttpOnly: client analytics read the assignment
//! - Expiry sent both as `Expires` and `Max-Age`
//! - A duration whose expiry has no IMF-fixdate form yields no cookie at all

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Datelike, Duration, Utc};

use crate::config::CookieConfig;
use crate::experiments::Variant;

/// Value of cookie `name` from all `Cookie` headers, first occurrence wins.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
}

/// Assignment cookie waiting to be written on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyCookie {
    pub name: String,
    pub variant: Variant,
    pub duration_days: u32,
}

impl StickyCookie {
    pub fn new(name: impl Into<String>, variant: Variant, duration_days: u32) -> Self {
        Self {
            name: name.into(),
            variant,
            duration_days,
        }
    }

    /// Render as a `Set-Cookie` value relative to `now`.
    ///
    /// `None` when the expiry falls past year 9999.
    pub fn render(&self, config: &CookieConfig, now: DateTime<Utc>) -> Option<String> {
        let expires = now
            .checked_add_signed(Duration::days(i64::from(self.duration_days)))
            .filter(|expires| expires.year() <= 9999)?;
        let max_age = u64::from(self.duration_days) * 86_400;

        let mut out = format!(
            "{}={}; Path={}; Expires={}; Max-Age={}; SameSite=Lax",
            self.name,
            self.variant,
            config.path,
            expires.format("%a, %d %b %Y %H:%M:%S GMT"),
            max_age,
        );
        if config.secure() {
            out.push_str("; Secure");
        }
        Some(out)
    }

    pub fn header_value(&self, config: &CookieConfig, now: DateTime<Utc>) -> Option<HeaderValue> {
        self.render(config, now)
            .and_then(|rendered| HeaderValue::from_str(&rendered).ok())
    }
}
