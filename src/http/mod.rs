//! Transport-facing admission layer.
//!
//! Route handlers call [`AdmissionGuard::check`] and either merge the returned
//! headers into their response or reply with the prepared 429.

mod guard;
mod response;

pub use guard::{Admission, AdmissionGuard};
pub use response::{
    denial_response, success_headers, DenialBody, DenialResponse, HeaderList, RETRY_AFTER,
    TOO_MANY_REQUESTS, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
    X_RATELIMIT_SITE_ID,
};
