//! C4: AutoRouter — a pure routing decision from (quota, estimate, thresholds).
//!
//! `decide` performs no I/O: estimation, quota accounting, and threshold
//! comparison are all plain data in, plain data out, so the decision can be
//! unit tested and property tested without a database or network.

use hco_models::config::AutoRouterConfig;
use hco_models::entities::JobType;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("custodian email must not be empty")]
    EmptyCustodian,
    #[error("date_range is inverted: start must be before end")]
    InvertedDateRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    PerItemApi,
    BulkPipeline,
    Hybrid,
}

impl From<Route> for hco_models::entities::Route {
    fn from(r: Route) -> Self {
        match r {
            Route::PerItemApi => hco_models::entities::Route::PerItemApi,
            Route::BulkPipeline => hco_models::entities::Route::BulkPipeline,
            Route::Hybrid => hco_models::entities::Route::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The routing request, independent of how it arrived (HTTP, CLI, etc).
#[derive(Debug, Clone)]
pub struct Request {
    pub custodian: String,
    pub job_type: JobType,
    pub range_start: chrono::DateTime<chrono::Utc>,
    pub range_end: chrono::DateTime<chrono::Utc>,
    pub keywords: Vec<String>,
    pub include_attachments: bool,
}

impl Request {
    fn validate(&self) -> Result<(), Error> {
        if self.custodian.trim().is_empty() {
            return Err(Error::EmptyCustodian);
        }
        if self.range_start > self.range_end {
            return Err(Error::InvertedDateRange);
        }
        Ok(())
    }

    fn span_days(&self) -> i64 {
        (self.range_end - self.range_start).num_days()
    }
}

/// Current quota consumption against a matter or tenant's allowance.
#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub used_bytes: i64,
    pub limit_bytes: i64,
    pub used_items: i64,
    pub limit_items: i64,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// Injectable per-custodian volume estimator. Returns `None` when the profile has no data for this
/// custodian/job_type, in which case `decide` falls back to the
/// conservative date-span default.
pub trait EstimatorProfile {
    fn estimate(&self, request: &Request) -> Option<(i64, i64)>;
}

/// No injected profile: always falls back to the conservative default.
pub struct NoProfile;

impl EstimatorProfile for NoProfile {
    fn estimate(&self, _request: &Request) -> Option<(i64, i64)> {
        None
    }
}

/// Bytes and items estimated per day of date span, used when no profile is
/// available and the date range is non-empty.
const DEFAULT_BYTES_PER_DAY: i64 = 50 * 1024 * 1024; // 50 MiB/day/custodian
const DEFAULT_ITEMS_PER_DAY: i64 = 200; // 200 items/day/custodian

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub route: Route,
    pub reason: String,
    pub estimated_bytes: i64,
    pub estimated_items: i64,
    pub confidence: Confidence,
    pub metrics: serde_json::Value,
}

/// Estimate `(bytes, items)` for `request`, preferring an injected profile
/// and falling back to the conservative date-span default. Returns `None`
/// only when both the profile is absent/empty AND the date range has zero
/// span.
fn estimate(request: &Request, profile: &dyn EstimatorProfile) -> Option<(i64, i64)> {
    if let Some(estimate) = profile.estimate(request) {
        return Some(estimate);
    }

    let span_days = request.span_days();
    if span_days <= 0 {
        return None;
    }

    Some((
        DEFAULT_BYTES_PER_DAY.saturating_mul(span_days),
        DEFAULT_ITEMS_PER_DAY.saturating_mul(span_days),
    ))
}

/// How far a value sits past a threshold, as a fraction (0.0 means at the
/// threshold, 1.0 means double the threshold).
fn overage_fraction(value: i64, threshold: i64) -> f64 {
    if threshold <= 0 {
        return f64::INFINITY;
    }
    (value as f64 - threshold as f64) / threshold as f64
}

/// The core decision, separated from estimation so the monotonicity
/// property can be tested directly over
/// `(est_bytes, est_items)` without needing a `Request`/`EstimatorProfile`.
pub fn decide_from_estimate(
    est_bytes: i64,
    est_items: i64,
    quota: &Quota,
    config: &AutoRouterConfig,
) -> (Route, Confidence, serde_json::Value) {
    let bytes_headroom = quota.used_bytes + est_bytes <= quota.limit_bytes;
    let items_headroom = quota.used_items + est_items <= quota.limit_items;

    if est_bytes < config.max_bytes && est_items < config.max_items && bytes_headroom && items_headroom
    {
        return (Route::PerItemApi, Confidence::High, serde_json::json!({}));
    }

    if est_bytes >= 2 * config.max_bytes || est_items >= 2 * config.max_items {
        return (Route::BulkPipeline, Confidence::High, serde_json::json!({}));
    }

    // Within +/-50% of a threshold: record both overages for diagnostics,
    // but decide against the threshold itself rather than against each
    // other's overage. Comparing overages head-to-head (bulk iff
    // bytes_overage >= items_overage) is not monotone: growing items_overage
    // alone can overtake a larger, unmoving bytes_overage and flip the
    // route back to PerItemApi even though nothing got smaller. Once either
    // dimension has reached its own threshold we latch to BulkPipeline, so
    // growing either dimension further can only keep the route at
    // BulkPipeline, never send it back (property #7).
    let bytes_overage = overage_fraction(est_bytes, config.max_bytes);
    let items_overage = overage_fraction(est_items, config.max_items);

    let metrics = serde_json::json!({
        "bytes_overage_fraction": bytes_overage,
        "items_overage_fraction": items_overage,
    });

    let route = if bytes_overage >= 0.0 || items_overage >= 0.0 {
        Route::BulkPipeline
    } else {
        Route::PerItemApi
    };

    (route, Confidence::Medium, metrics)
}

/// Decide the collection back-end for `request`.
pub fn decide(
    request: &Request,
    quota: &Quota,
    config: &AutoRouterConfig,
    profile: &dyn EstimatorProfile,
) -> Result<Decision, Error> {
    request.validate()?;

    match estimate(request, profile) {
        Some((est_bytes, est_items)) => {
            let (route, confidence, metrics) = decide_from_estimate(est_bytes, est_items, quota, config);
            let reason = match (route, confidence) {
                (Route::PerItemApi, Confidence::High) => {
                    "estimate and quota both comfortably within per-item thresholds".to_string()
                }
                (Route::BulkPipeline, Confidence::High) => {
                    "estimate exceeds double the configured thresholds".to_string()
                }
                _ => "estimate sits within 50% of a threshold".to_string(),
            };
            Ok(Decision {
                route,
                reason,
                estimated_bytes: est_bytes,
                estimated_items: est_items,
                confidence,
                metrics,
            })
        }
        None => Ok(Decision {
            route: Route::PerItemApi,
            reason: "fallback".to_string(),
            estimated_bytes: 0,
            estimated_items: 0,
            confidence: Confidence::Low,
            metrics: serde_json::json!({}),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn quota(limit_bytes: i64, limit_items: i64) -> Quota {
        Quota {
            used_bytes: 0,
            limit_bytes,
            used_items: 0,
            limit_items,
            last_updated: Utc::now(),
        }
    }

    fn request(days: i64) -> Request {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Request {
            custodian: "a@x".to_string(),
            job_type: JobType::Email,
            range_start: start,
            range_end: start + Duration::days(days),
            keywords: vec![],
            include_attachments: true,
        }
    }

    struct FixedProfile(i64, i64);
    impl EstimatorProfile for FixedProfile {
        fn estimate(&self, _r: &Request) -> Option<(i64, i64)> {
            Some((self.0, self.1))
        }
    }

    /// S1: small request routes to the synchronous per-item path with high confidence.
    #[test]
    fn s1_small_request_routes_per_item_api() {
        let req = request(7);
        let q = quota(100 * (1i64 << 30), 500_000);
        let profile = FixedProfile(5 * 1024 * 1024, 2000);
        let config = AutoRouterConfig::default();

        let decision = decide(&req, &q, &config, &profile).unwrap();
        assert_eq!(decision.route, Route::PerItemApi);
        assert_eq!(decision.confidence, Confidence::High);
    }

    /// S2: a very large multi-year estimate routes to the bulk pipeline.
    #[test]
    fn s2_large_request_routes_bulk_pipeline() {
        let req = request(730);
        let q = quota(100 * (1i64 << 30), 500_000);
        let profile = FixedProfile(400 * (1i64 << 30), 3_000_000);
        let config = AutoRouterConfig::default();

        let decision = decide(&req, &q, &config, &profile).unwrap();
        assert_eq!(decision.route, Route::BulkPipeline);
        assert_eq!(decision.confidence, Confidence::High);
    }

    #[test]
    fn empty_custodian_is_invalid_request() {
        let mut req = request(7);
        req.custodian = "   ".to_string();
        let err = decide(&req, &quota(1, 1), &AutoRouterConfig::default(), &NoProfile).unwrap_err();
        assert_eq!(err, Error::EmptyCustodian);
    }

    #[test]
    fn inverted_date_range_is_invalid_request() {
        let mut req = request(7);
        std::mem::swap(&mut req.range_start, &mut req.range_end);
        let err = decide(&req, &quota(1, 1), &AutoRouterConfig::default(), &NoProfile).unwrap_err();
        assert_eq!(err, Error::InvertedDateRange);
    }

    #[test]
    fn missing_profile_and_zero_span_falls_back_low_confidence() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let req = Request {
            custodian: "a@x".to_string(),
            job_type: JobType::Email,
            range_start: start,
            range_end: start,
            keywords: vec![],
            include_attachments: false,
        };
        let decision = decide(&req, &quota(1, 1), &AutoRouterConfig::default(), &NoProfile).unwrap();
        assert_eq!(decision.confidence, Confidence::Low);
        assert_eq!(decision.reason, "fallback");
        assert_eq!(decision.route, Route::PerItemApi);
    }

    #[test]
    fn missing_profile_nonzero_span_uses_conservative_default() {
        let req = request(30);
        let decision = decide(&req, &quota(1 << 40, 10_000_000), &AutoRouterConfig::default(), &NoProfile)
            .unwrap();
        assert!(decision.estimated_bytes > 0);
        assert!(decision.estimated_items > 0);
        assert_ne!(decision.confidence, Confidence::Low);
    }

    proptest::proptest! {
        /// Property 7: increasing est_bytes or est_items never switches the
        /// route from BulkPipeline back to PerItemApi with the same thresholds.
        #[test]
        fn router_monotonicity(
            base_bytes in 0i64..200_000_000_000,
            base_items in 0i64..1_000_000,
            delta_bytes in 0i64..200_000_000_000,
            delta_items in 0i64..1_000_000,
        ) {
            let config = AutoRouterConfig::default();
            let q = quota(i64::MAX / 2, i64::MAX / 2);

            let (route_before, _, _) = decide_from_estimate(base_bytes, base_items, &q, &config);
            let (route_after, _, _) = decide_from_estimate(
                base_bytes + delta_bytes,
                base_items + delta_items,
                &q,
                &config,
            );

            if route_before == Route::BulkPipeline {
                proptest::prop_assert_ne!(route_after, Route::PerItemApi);
            }
        }
    }
}
