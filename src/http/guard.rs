//! One-call admission check for route handlers.

use std::sync::Arc;
use tracing::debug;

use super::response::{denial_response, success_headers, DenialResponse, HeaderList};
use crate::error::Result;
use crate::ratelimit::{
    CallerIdentity, EvaluationResult, MemoryWindowStore, PolicyTable, RateLimitPolicy,
    RateLimiter, RequestMetadata, WindowStore,
};

/// What a route handler should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Proceed, merging `headers` into the response.
    Allowed {
        identity: CallerIdentity,
        result: EvaluationResult,
        headers: HeaderList,
    },
    /// Reply with `response` instead of rendering.
    Denied {
        identity: CallerIdentity,
        result: EvaluationResult,
        response: DenialResponse,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    pub fn result(&self) -> &EvaluationResult {
        match self {
            Admission::Allowed { result, .. } | Admission::Denied { result, .. } => result,
        }
    }

    pub fn identity(&self) -> &CallerIdentity {
        match self {
            Admission::Allowed { identity, .. } | Admission::Denied { identity, .. } => identity,
        }
    }
}

/// Resolves the caller, evaluates the route's policy and shapes the outcome.
#[derive(Debug)]
pub struct AdmissionGuard<S: WindowStore = MemoryWindowStore> {
    limiter: Arc<RateLimiter<S>>,
    policies: Arc<PolicyTable>,
}

impl<S: WindowStore> Clone for AdmissionGuard<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            policies: Arc::clone(&self.policies),
        }
    }
}

impl<S: WindowStore> AdmissionGuard<S> {
    /// Create a guard over a shared limiter and policy table.
    pub fn new(limiter: Arc<RateLimiter<S>>, policies: PolicyTable) -> Self {
        Self {
            limiter,
            policies: Arc::new(policies),
        }
    }

    /// Policy for a route's endpoint class. Call at route registration so a
    /// missing policy fails startup rather than a request.
    pub fn policy(&self, endpoint_class: &str) -> Result<&RateLimitPolicy> {
        self.policies.require(endpoint_class)
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn limiter(&self) -> &Arc<RateLimiter<S>> {
        &self.limiter
    }

    /// Admit or deny one request.
    pub fn check<M>(&self, metadata: &M, policy: &RateLimitPolicy) -> Admission
    where
        M: RequestMetadata + ?Sized,
    {
        let identity = CallerIdentity::resolve(metadata);
        let result = self.limiter.check(&identity, policy);

        if result.allowed {
            let headers = success_headers(&result, Some(&identity));
            Admission::Allowed {
                identity,
                result,
                headers,
            }
        } else {
            debug!(
                site_id = %identity.masked(),
                endpoint = %policy.endpoint_class,
                retry_after = result.retry_after,
                "Request denied"
            );
            Admission::Denied {
                response: denial_response(&result),
                identity,
                result,
            }
        }
    }
}
