//! Batched, concurrent filter stages.
//!
//! A [`FilterStage`] pairs a data source with a predicate. [`filter_by`]
//! splits the ticker list into batches, fetches every batch concurrently and
//! keeps the tickers whose data satisfies the predicate.

use crate::exchange::{BarRequest, BarSeries, BatchResponse, Brokerage, Quote};
use anyhow::Result;
use futures_util::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Data fetched for one ticker by a stage's source.
#[derive(Debug, Clone, PartialEq)]
pub enum StageData {
    Price(f64),
    Bars(BarSeries),
    Quote(Quote),
}

impl StageData {
    /// Empty bar series carry no information and are skipped.
    pub fn is_empty(&self) -> bool {
        matches!(self, StageData::Bars(series) if series.is_empty())
    }

    pub fn as_price(&self) -> Option<f64> {
        match self {
            StageData::Price(price) => Some(*price),
            _ => None,
        }
    }

    pub fn as_bars(&self) -> Option<&BarSeries> {
        match self {
            StageData::Bars(series) => Some(series),
            _ => None,
        }
    }

    pub fn as_quote(&self) -> Option<&Quote> {
        match self {
            StageData::Quote(quote) => Some(quote),
            _ => None,
        }
    }
}

/// Which brokerage endpoint a stage reads from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataSource {
    LatestClose,
    Bars(BarRequest),
    LatestQuote,
}

impl DataSource {
    /// Fetch data for one batch of symbols.
    pub async fn fetch(
        &self,
        client: &dyn Brokerage,
        symbols: &[String],
    ) -> Result<BatchResponse<StageData>> {
        Ok(match self {
            DataSource::LatestClose => client
                .get_latest_closing_price(symbols)
                .await?
                .map(StageData::Price),
            DataSource::Bars(request) => client
                .get_historical_data(symbols, *request)
                .await?
                .map(StageData::Bars),
            DataSource::LatestQuote => client
                .get_latest_quote(symbols)
                .await?
                .map(StageData::Quote),
        })
    }
}

pub type Predicate = Arc<dyn Fn(&StageData) -> bool + Send + Sync>;

/// One step of the filter pipeline.
#[derive(Clone)]
pub struct FilterStage {
    pub name: &'static str,
    pub source: DataSource,
    pub batch_size: usize,
    predicate: Predicate,
}

impl FilterStage {
    pub fn new(
        name: &'static str,
        source: DataSource,
        batch_size: usize,
        predicate: impl Fn(&StageData) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            source,
            batch_size,
            predicate: Arc::new(predicate),
        }
    }

    pub fn accepts(&self, data: &StageData) -> bool {
        (self.predicate)(data)
    }
}

impl fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStage")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// Keep the tickers that pass `stage`, in input order.
///
/// A batch whose fetch fails is dropped for this pass; the other batches are
/// unaffected. Tickers with no data or an empty bar series never pass.
pub async fn filter_by(
    client: &dyn Brokerage,
    tickers: &[String],
    stage: &FilterStage,
) -> Vec<String> {
    if tickers.is_empty() {
        return Vec::new();
    }

    let batches: Vec<&[String]> = tickers.chunks(stage.batch_size.max(1)).collect();
    let results = join_all(
        batches
            .iter()
            .map(|batch| async move { stage.source.fetch(client, batch).await }),
    )
    .await;

    let mut passed = Vec::new();
    let mut failed_batches = 0usize;

    for (batch, result) in batches.iter().zip(results) {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                failed_batches += 1;
                warn!(
                    stage = stage.name,
                    batch_len = batch.len(),
                    error = %e,
                    "Batch fetch failed, excluding its tickers"
                );
                continue;
            }
        };

        if response.has_next_page {
            debug!(stage = stage.name, "Batch response has more pages, using first");
        }

        passed.extend(
            batch
                .iter()
                .filter(|ticker| {
                    response
                        .get(ticker)
                        .is_some_and(|data| !data.is_empty() && stage.accepts(data))
                })
                .cloned(),
        );
    }

    info!(
        stage = stage.name,
        input = tickers.len(),
        batches = batches.len(),
        failed_batches,
        passed = passed.len(),
        "Filter stage complete"
    );

    passed
}

/// Run `stages` in order, each consuming the previous stage's survivors.
pub async fn run_pipeline(
    client: &dyn Brokerage,
    tickers: &[String],
    stages: &[FilterStage],
) -> Vec<String> {
    let mut current = tickers.to_vec();
    for stage in stages {
        if current.is_empty() {
            break;
        }
        current = filter_by(client, &current, stage).await;
    }
    current
}
