//! Candidate selection.
//!
//! - `filter`: batched stage runner that keeps tickers passing a predicate
//! - `stages`: the concrete price, volume, spread and trend stages
//! - `scanner`: seed list construction and the periodic candidate scan

mod filter;
mod scanner;
mod stages;

pub use filter::{filter_by, run_pipeline, DataSource, FilterStage, Predicate, StageData};
pub use scanner::StockScanner;
pub use stages::{candidate_stages, seed_stages};
