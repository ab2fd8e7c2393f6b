//! C11: the Job Controller and HTTP surface that wire C3–C10 together
//!. The `hcod` binary in `src/main.rs` is the only
//! consumer that needs both halves; library consumers typically just want
//! [`controller::JobController`].

pub mod api;
pub mod config;
pub mod controller;
pub mod error;

pub use controller::JobController;
pub use error::{ApiError, ApiResult};
