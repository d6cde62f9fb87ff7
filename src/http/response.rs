//! Translation of admission results into transport-agnostic HTTP pieces.

use serde::Serialize;

use crate::ratelimit::{CallerIdentity, EvaluationResult};

pub const RETRY_AFTER: &str = "Retry-After";
pub const X_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const X_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const X_RATELIMIT_RESET: &str = "X-RateLimit-Reset";
pub const X_RATELIMIT_SITE_ID: &str = "X-RateLimit-Site-ID";

/// Status code for a denied request.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Ordered list of response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderList(Vec<(&'static str, String)>);

impl HeaderList {
    fn push(&mut self, name: &'static str, value: impl ToString) {
        self.0.push((name, value.to_string()));
    }

    /// Value of the first header named `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialBody {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

/// A complete 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: DenialBody,
}

impl DenialResponse {
    /// The body rendered as JSON.
    pub fn body_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.body)
    }
}

/// Build the 429 response for a denied evaluation.
pub fn denial_response(result: &EvaluationResult) -> DenialResponse {
    let mut headers = HeaderList::default();
    headers.push(RETRY_AFTER, result.retry_after);
    headers.push(X_RATELIMIT_LIMIT, result.limit);
    headers.push(X_RATELIMIT_REMAINING, result.remaining);
    headers.push(X_RATELIMIT_RESET, result.reset_at);

    DenialResponse {
        status: TOO_MANY_REQUESTS,
        headers,
        body: DenialBody {
            error: "Too Many Requests".to_string(),
            message: format!(
                "Rate limit exceeded. Please retry after {} seconds.",
                result.retry_after
            ),
            retry_after: result.retry_after,
        },
    }
}

/// Headers to merge into a successful response.
///
/// The site id header is only echoed for validated site tokens.
pub fn success_headers(result: &EvaluationResult, identity: Option<&CallerIdentity>) -> HeaderList {
    let mut headers = HeaderList::default();
    headers.push(X_RATELIMIT_LIMIT, result.limit);
    headers.push(X_RATELIMIT_REMAINING, result.remaining);
    headers.push(X_RATELIMIT_RESET, result.reset_at);

    if let Some(token) = identity.and_then(CallerIdentity::site_token) {
        headers.push(X_RATELIMIT_SITE_ID, token);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(allowed: bool) -> EvaluationResult {
        EvaluationResult {
            allowed,
            current: if allowed { 3 } else { 5 },
            limit: 5,
            remaining: if allowed { 1 } else { 0 },
            reset_at: 1_700_000_060,
            retry_after: 17,
        }
    }

    #[test]
    fn test_denial_response() {
        let response = denial_response(&result(false));

        assert_eq!(response.status, 429);
        assert_eq!(response.headers.get("retry-after"), Some("17"));
        assert_eq!(response.headers.get(X_RATELIMIT_LIMIT), Some("5"));
        assert_eq!(response.headers.get(X_RATELIMIT_REMAINING), Some("0"));
        assert_eq!(response.headers.get(X_RATELIMIT_RESET), Some("1700000060"));
        assert_eq!(response.body.retry_after, 17);
        assert!(response.body.message.contains("17 seconds"));
    }

    #[test]
    fn test_denial_body_json() {
        let response = denial_response(&result(false));
        let body: serde_json::Value = serde_json::from_str(&response.body_json().unwrap()).unwrap();

        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["retry_after"], 17);
        assert!(body["message"].is_string());
    }

    #[test]
    fn test_body_json_escapes_text() {
        let mut response = denial_response(&result(false));
        response.body.error = "Too \"Many\" Requests".to_string();

        let body: serde_json::Value = serde_json::from_str(&response.body_json().unwrap()).unwrap();
        assert_eq!(body["error"], "Too \"Many\" Requests");
    }

    #[test]
    fn test_success_headers_for_token() {
        let identity = CallerIdentity::SiteToken("shop-0001".to_string());
        let headers = success_headers(&result(true), Some(&identity));

        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get(X_RATELIMIT_REMAINING), Some("1"));
        assert_eq!(headers.get(X_RATELIMIT_SITE_ID), Some("shop-0001"));
        assert_eq!(headers.get(RETRY_AFTER), None);
    }

    #[test]
    fn test_success_headers_omit_site_id_for_ip_and_unknown() {
        let ip = CallerIdentity::Ip("192.0.2.1".to_string());
        let unknown = CallerIdentity::Unknown;
        for identity in [Some(&ip), Some(&unknown), None] {
            let headers = success_headers(&result(true), identity);
            assert_eq!(headers.len(), 3);
            assert_eq!(headers.get(X_RATELIMIT_SITE_ID), None);
        }
    }
}
