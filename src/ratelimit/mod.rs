//! Sliding-window admission control and its supporting state.

mod clock;
mod identity;
mod limiter;
mod policy;
mod store;
mod sweeper;
mod violation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{
    is_valid_site_token, CallerIdentity, RequestMetadata, FORWARDED_FOR_HEADER, REAL_IP_HEADER,
    SITE_ID_HEADER, UNKNOWN_IDENTITY,
};
pub use limiter::{window_key, EvaluationResult, LimiterSettings, RateLimiter, DEFAULT_SWEEP_EVERY};
pub use policy::{PolicyFile, PolicyTable, RateLimitPolicy, DEFAULT_POLICIES, DEFAULT_WINDOW_MILLIS};
pub use store::{MemoryWindowStore, WindowStore};
pub use sweeper::{spawn_periodic_sweeper, sweep};
pub use violation::{
    mask_identifier, mask_ip, TracingSink, ViolationEvent, ViolationReporter, ViolationSink,
    DEFAULT_SUPPRESSION,
};
