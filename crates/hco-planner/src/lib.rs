//! C5: Shard Planner — partitions a (custodian, date-range, job-type)
//! request into shards along custodian x date-window boundaries.
//!
//! `plan` is pure: it performs no I/O and returns the shards the caller
//! (the Job Controller) must persist atomically with the parent Job in a
//! single `MetadataStore` transaction.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use hco_models::config::ShardConfig;
use hco_models::entities::{JobType, Route};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("plan would produce {actual} shards, exceeding max_total_shards={max}")]
    PlanTooLarge { actual: u32, max: u32 },
    #[error("date range is empty: start must be strictly before end")]
    EmptyPlan,
}

/// A request to partition work across one or more custodians.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub parent_job_id: Uuid,
    pub custodians: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub job_type: JobType,
    pub route: Route,
    pub output_prefix_base: String,
}

/// A shard the planner has produced, ready for the caller to assign an id
/// and persist. Mirrors `hco_models::entities::Shard`'s structural fields
/// but omits the ones only the store/scheduler ever populate (id, status,
/// lease, progress).
#[derive(Debug, Clone, PartialEq)]
pub struct NewShard {
    pub shard_index: i32,
    pub total_shards: i32,
    pub shard_identifier: String,
    pub custodian_email: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub job_type: JobType,
    pub route: Route,
    pub estimated_bytes: i64,
    pub estimated_items: i64,
    pub output_prefix: String,
    pub max_retries: i32,
}

/// Injectable per-window volume estimator, mirroring `hco_router`'s
/// `EstimatorProfile`. Defaults to a conservative per-day constant so the
/// planner can run without a live profile.
pub trait WindowEstimator {
    fn estimate(&self, custodian: &str, job_type: JobType, start: DateTime<Utc>, end: DateTime<Utc>) -> (i64, i64);
}

pub struct DefaultWindowEstimator;

const DEFAULT_BYTES_PER_DAY: i64 = 50 * 1024 * 1024;
const DEFAULT_ITEMS_PER_DAY: i64 = 200;

impl WindowEstimator for DefaultWindowEstimator {
    fn estimate(&self, _custodian: &str, _job_type: JobType, start: DateTime<Utc>, end: DateTime<Utc>) -> (i64, i64) {
        let days = (end - start).num_days().max(1);
        (
            DEFAULT_BYTES_PER_DAY.saturating_mul(days),
            DEFAULT_ITEMS_PER_DAY.saturating_mul(days),
        )
    }
}

/// A half-open date window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Window {
    fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Build candidate windows covering `[start, end)`.
///
/// When `align_to_calendar` is set, windows snap to calendar-month
/// boundaries provided the resulting
/// window is still >= `min_window_days`; otherwise windows are fixed-size
/// `max_window_days` slices, with the final window truncated to `end`.
fn candidate_windows(start: DateTime<Utc>, end: DateTime<Utc>, config: &ShardConfig) -> Vec<Window> {
    let mut windows = Vec::new();

    if config.align_calendar {
        let mut cursor = start;
        while cursor < end {
            let month_end = first_of_next_month(cursor).min(end);
            let window = Window {
                start: cursor,
                end: month_end,
            };
            if window.days() >= config.min_window_days || windows.is_empty() {
                windows.push(window);
            } else if let Some(last) = windows.last_mut() {
                // Too small a tail to stand alone: merge into the prior window.
                last.end = window.end;
            }
            cursor = month_end;
        }
    } else {
        let mut cursor = start;
        let step = Duration::days(config.max_window_days.max(1));
        while cursor < end {
            let window_end = (cursor + step).min(end);
            windows.push(Window {
                start: cursor,
                end: window_end,
            });
            cursor = window_end;
        }
    }

    windows
}

fn first_of_next_month(ts: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = (ts.year(), ts.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("valid calendar month boundary")
}

/// Recursively bisect `window` until its estimate fits within the shard
/// caps, or it has reached `min_window_days`.
fn bisect_to_caps(
    window: Window,
    custodian: &str,
    job_type: JobType,
    config: &ShardConfig,
    estimator: &dyn WindowEstimator,
    out: &mut Vec<Window>,
) {
    let (bytes, items) = estimator.estimate(custodian, job_type, window.start, window.end);
    let over_caps = bytes > config.max_bytes || items > config.max_items;

    if !over_caps || !config.adaptive || window.days() <= config.min_window_days {
        out.push(window);
        return;
    }

    let half = window.days() / 2;
    let midpoint = window.start + Duration::days(half.max(1));
    if midpoint >= window.end {
        out.push(window);
        return;
    }

    bisect_to_caps(
        Window {
            start: window.start,
            end: midpoint,
        },
        custodian,
        job_type,
        config,
        estimator,
        out,
    );
    bisect_to_caps(
        Window {
            start: midpoint,
            end: window.end,
        },
        custodian,
        job_type,
        config,
        estimator,
        out,
    );
}

/// Merge the tail windows of `windows` down to at most `cap` entries,
/// combining from the end forward.
fn merge_tail_to_cap(mut windows: Vec<Window>, cap: usize) -> Vec<Window> {
    while windows.len() > cap && windows.len() >= 2 {
        let last = windows.pop().unwrap();
        let second_last = windows.last_mut().unwrap();
        second_last.end = last.end;
    }
    windows
}

/// Partition `request` into shards.
pub fn plan(
    request: &PlanRequest,
    config: &ShardConfig,
    estimator: &dyn WindowEstimator,
) -> Result<Vec<NewShard>, Error> {
    if request.start >= request.end {
        return Err(Error::EmptyPlan);
    }

    let mut all_shards = Vec::new();

    for custodian in &request.custodians {
        let candidates = candidate_windows(request.start, request.end, config);

        let mut bisected = Vec::new();
        for window in candidates {
            bisect_to_caps(window, custodian, request.job_type, config, estimator, &mut bisected);
        }

        let merged = merge_tail_to_cap(bisected, config.max_per_custodian as usize);
        let total_shards = merged.len() as i32;

        for (index, window) in merged.into_iter().enumerate() {
            let (estimated_bytes, estimated_items) =
                estimator.estimate(custodian, request.job_type, window.start, window.end);

            let shard_identifier =
                hco_models::entities::Shard::make_identifier(custodian, window.start, window.end, request.job_type);

            all_shards.push(NewShard {
                shard_index: index as i32,
                total_shards,
                shard_identifier,
                custodian_email: custodian.clone(),
                start_date: window.start,
                end_date: window.end,
                job_type: request.job_type,
                route: request.route,
                estimated_bytes,
                estimated_items,
                output_prefix: format!("{}/{}", request.output_prefix_base, custodian),
                max_retries: config.max_retries,
            });
        }
    }

    let total = all_shards.len() as u32;
    if total > config.max_total_shards {
        return Err(Error::PlanTooLarge {
            actual: total,
            max: config.max_total_shards,
        });
    }

    Ok(all_shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ShardConfig {
        ShardConfig::default()
    }

    fn dt(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    /// S3: a 6-month range for 2 custodians with monthly calendar alignment
    /// produces 12 shards total, 6 per custodian.
    #[test]
    fn s3_monthly_calendar_aligned_planning() {
        let request = PlanRequest {
            parent_job_id: Uuid::nil(),
            custodians: vec!["u1".to_string(), "u2".to_string()],
            start: dt(2024, 1, 1),
            end: dt(2024, 6, 30),
            job_type: JobType::Email,
            route: Route::PerItemApi,
            output_prefix_base: "matter/acme".to_string(),
        };
        let config = config();
        let shards = plan(&request, &config, &DefaultWindowEstimator).unwrap();

        assert_eq!(shards.len(), 12);
        for custodian in ["u1", "u2"] {
            let mine: Vec<_> = shards.iter().filter(|s| s.custodian_email == custodian).collect();
            assert_eq!(mine.len(), 6);
            assert!(mine.iter().all(|s| s.total_shards == 6));
            let mut indices: Vec<_> = mine.iter().map(|s| s.shard_index).collect();
            indices.sort();
            assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
            for s in mine {
                assert!(s.shard_identifier.starts_with(custodian));
                assert!(s.shard_identifier.ends_with("Email"));
            }
        }
    }

    #[test]
    fn empty_date_range_is_rejected() {
        let request = PlanRequest {
            parent_job_id: Uuid::nil(),
            custodians: vec!["u1".to_string()],
            start: dt(2024, 1, 1),
            end: dt(2024, 1, 1),
            job_type: JobType::Email,
            route: Route::PerItemApi,
            output_prefix_base: "matter/acme".to_string(),
        };
        assert_eq!(plan(&request, &config(), &DefaultWindowEstimator).unwrap_err(), Error::EmptyPlan);
    }

    #[test]
    fn plan_too_large_is_rejected() {
        let request = PlanRequest {
            parent_job_id: Uuid::nil(),
            custodians: (0..50).map(|i| format!("u{i}")).collect(),
            start: dt(2020, 1, 1),
            end: dt(2024, 1, 1),
            job_type: JobType::Email,
            route: Route::PerItemApi,
            output_prefix_base: "matter/acme".to_string(),
        };
        let mut cfg = config();
        cfg.max_total_shards = 10;
        let err = plan(&request, &cfg, &DefaultWindowEstimator).unwrap_err();
        assert!(matches!(err, Error::PlanTooLarge { .. }));
    }

    #[test]
    fn adaptive_bisection_shrinks_windows_over_caps() {
        struct HugeEstimator;
        impl WindowEstimator for HugeEstimator {
            fn estimate(&self, _c: &str, _jt: JobType, start: DateTime<Utc>, end: DateTime<Utc>) -> (i64, i64) {
                // A constant-per-day rate that exceeds caps unless the
                // window is bisected down near min_window_days.
                let days = (end - start).num_days().max(1);
                (days * 100 * (1i64 << 30), days * 10_000_000)
            }
        }

        let request = PlanRequest {
            parent_job_id: Uuid::nil(),
            custodians: vec!["u1".to_string()],
            start: dt(2024, 1, 1),
            end: dt(2024, 2, 1),
            job_type: JobType::Email,
            route: Route::BulkPipeline,
            output_prefix_base: "matter/acme".to_string(),
        };
        let mut cfg = config();
        cfg.align_calendar = false;
        cfg.max_window_days = 30;
        cfg.min_window_days = 1;
        cfg.max_per_custodian = 1000;

        let shards = plan(&request, &cfg, &HugeEstimator).unwrap();
        // Every window must have been bisected down to its floor.
        assert!(shards.iter().all(|s| (s.end_date - s.start_date).num_days() <= 1));
        assert!(shards.len() > 1);
    }

    #[test]
    fn excess_windows_merge_tail_first() {
        let request = PlanRequest {
            parent_job_id: Uuid::nil(),
            custodians: vec!["u1".to_string()],
            start: dt(2024, 1, 1),
            end: dt(2025, 1, 1),
            job_type: JobType::Email,
            route: Route::PerItemApi,
            output_prefix_base: "matter/acme".to_string(),
        };
        let mut cfg = config();
        cfg.max_per_custodian = 3; // Fewer than the 12 monthly windows a full year would produce.
        let shards = plan(&request, &cfg, &DefaultWindowEstimator).unwrap();
        assert_eq!(shards.len(), 3);
        // The last shard should have absorbed the merged tail and end at the request end.
        assert_eq!(shards.last().unwrap().end_date, dt(2025, 1, 1));
    }
}
