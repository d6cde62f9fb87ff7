//! Caller identity resolution.
//!
//! A caller is identified, in priority order, by a validated site token, by
//! the first hop of `X-Forwarded-For`, by `X-Real-IP`, or as `unknown`.
//! Resolution never fails and performs no I/O.

use std::collections::HashMap;
use std::fmt;

/// Header carrying the caller-supplied opaque site token.
pub const SITE_ID_HEADER: &str = "x-site-id";
/// Proxy chain header; only the first entry is used.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Single-address header set by the fronting proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Prefix marking an IP-derived identity.
pub const IP_PREFIX: &str = "ip:";
/// Identity used when the request carries no usable signal.
pub const UNKNOWN_IDENTITY: &str = "unknown";

const MIN_TOKEN_LEN: usize = 8;
const MAX_TOKEN_LEN: usize = 64;

/// Read-only view of request headers.
///
/// Header names are matched case-insensitively by the provided impls.
pub trait RequestMetadata {
    /// Look up a header value by name.
    fn header(&self, name: &str) -> Option<&str>;
}

impl RequestMetadata for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.get(name) {
            return Some(value.as_str());
        }
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl<'a> RequestMetadata for [(&'a str, &'a str)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

impl<'a, const N: usize> RequestMetadata for [(&'a str, &'a str); N] {
    fn header(&self, name: &str) -> Option<&str> {
        self.as_slice().header(name)
    }
}

/// The resolved identity a rate limit is partitioned by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerIdentity {
    /// A validated opaque site token.
    SiteToken(String),
    /// An address taken from proxy headers (without the `ip:` prefix).
    Ip(String),
    /// No usable signal.
    Unknown,
}

impl CallerIdentity {
    /// Resolve the identity for a request.
    pub fn resolve<M: RequestMetadata + ?Sized>(metadata: &M) -> Self {
        if let Some(token) = metadata.header(SITE_ID_HEADER) {
            if is_valid_site_token(token) {
                return CallerIdentity::SiteToken(token.to_string());
            }
        }

        if let Some(forwarded) = metadata.header(FORWARDED_FOR_HEADER) {
            let first = forwarded.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return CallerIdentity::Ip(first.to_string());
            }
        }

        if let Some(real_ip) = metadata.header(REAL_IP_HEADER) {
            let real_ip = real_ip.trim();
            if !real_ip.is_empty() {
                return CallerIdentity::Ip(real_ip.to_string());
            }
        }

        CallerIdentity::Unknown
    }

    /// The site token, if this identity is one.
    pub fn site_token(&self) -> Option<&str> {
        match self {
            CallerIdentity::SiteToken(token) => Some(token),
            _ => None,
        }
    }

    /// A copy of the identity that is safe to log.
    pub fn masked(&self) -> String {
        crate::ratelimit::violation::mask_identifier(&self.to_string())
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerIdentity::SiteToken(token) => f.write_str(token),
            CallerIdentity::Ip(addr) => write!(f, "{}{}", IP_PREFIX, addr),
            CallerIdentity::Unknown => f.write_str(UNKNOWN_IDENTITY),
        }
    }
}

/// Check that a site token is 8-64 characters of `[A-Za-z0-9-]`.
pub fn is_valid_site_token(token: &str) -> bool {
    (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len())
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
