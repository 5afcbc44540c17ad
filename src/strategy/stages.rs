//! Concrete filter stages and their thresholds.

use super::filter::{DataSource, FilterStage};
use crate::config::FilterConfig;
use crate::exchange::{BarRequest, BarSeries, Quote, Timeframe};
use crate::indicators;

/// Fewest MACD points the momentum rule will judge.
const MIN_MACD_POINTS: usize = 3;

/// Strictly inside the `(min, max)` band.
pub fn price_in_band(close: f64, min: f64, max: f64) -> bool {
    close > min && close < max
}

/// Mean volume of every bar except the most recent one, which is still forming.
pub fn completed_bar_mean_volume(series: &BarSeries) -> Option<f64> {
    let (_, completed) = series.volume.split_last()?;
    if completed.is_empty() {
        return None;
    }
    Some(completed.iter().sum::<f64>() / completed.len() as f64)
}

pub fn daily_volume_ok(series: &BarSeries, min_volume: f64) -> bool {
    completed_bar_mean_volume(series).is_some_and(|mean| mean > min_volume)
}

pub fn recent_volume_ok(series: &BarSeries, min_volume: f64) -> bool {
    series
        .volume
        .last()
        .is_some_and(|volume| *volume > min_volume)
}

/// Relative spread below `max_spread`; one-sided books never pass.
pub fn spread_ok(quote: &Quote, max_spread: f64) -> bool {
    if quote.ask_price == 0.0 || quote.bid_price == 0.0 {
        return false;
    }
    (quote.ask_price - quote.bid_price) / quote.ask_price < max_spread
}

pub fn above_ema(series: &BarSeries, period: usize) -> bool {
    match (series.latest_close(), indicators::ema(&series.close, period)) {
        (Some(close), Some(ema)) => close > ema,
        _ => false,
    }
}

pub fn adx_above(series: &BarSeries, period: usize, threshold: f64) -> bool {
    indicators::adx(&series.high, &series.low, &series.close, period)
        .is_some_and(|adx| adx > threshold)
}

/// MACD momentum: rising MACD line over the last `relevant_bars` points,
/// non-decreasing histogram over the last two, and a positive latest histogram.
pub fn macd_momentum(
    series: &BarSeries,
    fast: usize,
    slow: usize,
    signal: usize,
    relevant_bars: usize,
) -> bool {
    let Some(macd) = indicators::macd(&series.close, fast, slow, signal) else {
        return false;
    };
    let needed = relevant_bars.max(MIN_MACD_POINTS);
    if macd.line.len() < needed || macd.histogram.len() < needed {
        return false;
    }

    let recent_line = &macd.line[macd.line.len() - relevant_bars..];
    let Some(slope) = indicators::linear_regression_slope(recent_line) else {
        return false;
    };

    let hist = &macd.histogram;
    let latest = hist[hist.len() - 1];
    let previous = hist[hist.len() - 2];

    slope > 0.0 && latest >= previous && latest > 0.0
}

fn bars(bar: Timeframe, lookback_hours: f64) -> DataSource {
    DataSource::Bars(BarRequest::new(bar, lookback_hours))
}

pub fn price_stage(config: &FilterConfig) -> FilterStage {
    let (min, max) = (config.min_price, config.max_price);
    FilterStage::new(
        "price",
        DataSource::LatestClose,
        config.price_batch_size,
        move |data| data.as_price().is_some_and(|close| price_in_band(close, min, max)),
    )
}

pub fn daily_volume_stage(config: &FilterConfig) -> FilterStage {
    let min_volume = config.min_daily_volume;
    FilterStage::new(
        "daily_volume",
        bars(config.daily_volume_bar, config.daily_volume_lookback_hours),
        config.daily_volume_batch_size,
        move |data| data.as_bars().is_some_and(|s| daily_volume_ok(s, min_volume)),
    )
}

pub fn recent_volume_stage(config: &FilterConfig) -> FilterStage {
    let min_volume = config.min_recent_volume();
    FilterStage::new(
        "recent_volume",
        bars(config.recent_volume_bar, config.recent_volume_lookback_hours),
        config.recent_volume_batch_size,
        move |data| data.as_bars().is_some_and(|s| recent_volume_ok(s, min_volume)),
    )
}

pub fn spread_stage(config: &FilterConfig) -> FilterStage {
    let max_spread = config.max_spread;
    FilterStage::new(
        "spread",
        DataSource::LatestQuote,
        config.spread_batch_size,
        move |data| data.as_quote().is_some_and(|q| spread_ok(q, max_spread)),
    )
}

pub fn ema_stage(config: &FilterConfig) -> FilterStage {
    let period = config.ema_period;
    FilterStage::new(
        "ema",
        bars(config.ema_bar, config.ema_lookback_hours),
        config.ema_batch_size,
        move |data| data.as_bars().is_some_and(|s| above_ema(s, period)),
    )
}

pub fn adx_stage(config: &FilterConfig) -> FilterStage {
    let (period, threshold) = (config.adx_period, config.adx_threshold);
    FilterStage::new(
        "adx",
        bars(config.adx_bar, config.adx_lookback_hours),
        config.adx_batch_size,
        move |data| data.as_bars().is_some_and(|s| adx_above(s, period, threshold)),
    )
}

pub fn macd_stage(config: &FilterConfig) -> FilterStage {
    let (fast, slow, signal, relevant) = (
        config.macd_fast_period,
        config.macd_slow_period,
        config.macd_signal_period,
        config.macd_relevant_bars,
    );
    FilterStage::new(
        "macd",
        bars(config.macd_bar, config.macd_lookback_hours),
        config.macd_batch_size,
        move |data| {
            data.as_bars()
                .is_some_and(|s| macd_momentum(s, fast, slow, signal, relevant))
        },
    )
}

/// Price then daily volume: narrows the universe to the seed list.
pub fn seed_stages(config: &FilterConfig) -> Vec<FilterStage> {
    vec![price_stage(config), daily_volume_stage(config)]
}

/// Recent volume, spread, EMA, ADX, MACD: narrows the seed list to candidates.
pub fn candidate_stages(config: &FilterConfig) -> Vec<FilterStage> {
    vec![
        recent_volume_stage(config),
        spread_stage(config),
        ema_stage(config),
        adx_stage(config),
        macd_stage(config),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::filter::StageData;

    fn volumes(values: &[f64]) -> BarSeries {
        BarSeries {
            high: values.to_vec(),
            low: values.to_vec(),
            close: values.to_vec(),
            volume: values.to_vec(),
        }
    }

    fn closes(values: Vec<f64>) -> BarSeries {
        BarSeries {
            high: values.iter().map(|c| c + 0.05).collect(),
            low: values.iter().map(|c| c - 0.05).collect(),
            volume: vec![1000.0; values.len()],
            close: values,
        }
    }

    #[test]
    fn test_price_band_is_strict() {
        let stage = price_stage(&FilterConfig::default());
        assert!(!stage.accepts(&StageData::Price(9.99)));
        assert!(stage.accepts(&StageData::Price(10.01)));
        assert!(!stage.accepts(&StageData::Price(50.00)));
        assert!(!stage.accepts(&StageData::Price(10.00)));
    }

    #[test]
    fn test_price_stage_rejects_wrong_data_kind() {
        let stage = price_stage(&FilterConfig::default());
        assert!(!stage.accepts(&StageData::Quote(Quote::new(20.0, 19.99))));
    }

    #[test]
    fn test_daily_volume_ignores_latest_bar() {
        // completed bars average 3M, the forming bar is tiny
        let series = volumes(&[2_000_000.0, 4_000_000.0, 10.0]);
        assert!(daily_volume_ok(&series, 2_000_000.0));

        // a huge forming bar cannot lift a thin history
        let series = volumes(&[1_000_000.0, 1_000_000.0, 90_000_000.0]);
        assert!(!daily_volume_ok(&series, 2_000_000.0));
    }

    #[test]
    fn test_daily_volume_needs_a_completed_bar() {
        assert!(!daily_volume_ok(&volumes(&[9_000_000.0]), 1.0));
    }

    #[test]
    fn test_recent_volume_threshold() {
        let config = FilterConfig::default();
        let min = config.min_recent_volume();
        assert!((min - 2_000_000.0 / 6.5 / 4.0).abs() < 1e-9);

        let stage = recent_volume_stage(&config);
        assert!(stage.accepts(&StageData::Bars(volumes(&[1.0, min + 1.0]))));
        assert!(!stage.accepts(&StageData::Bars(volumes(&[min * 10.0, min]))));
    }

    #[test]
    fn test_spread_rules() {
        assert!(!spread_ok(&Quote::new(0.0, 99.0), 0.02));
        assert!(!spread_ok(&Quote::new(100.0, 0.0), 0.02));
        assert!(spread_ok(&Quote::new(100.0, 99.0), 0.02));
        assert!(!spread_ok(&Quote::new(100.0, 97.0), 0.02));
    }

    #[test]
    fn test_above_ema() {
        let rising: Vec<f64> = (0..40).map(|i| 10.0 + i as f64 * 0.1).collect();
        assert!(above_ema(&closes(rising), 20));

        let falling: Vec<f64> = (0..40).map(|i| 20.0 - i as f64 * 0.1).collect();
        assert!(!above_ema(&closes(falling), 20));

        assert!(!above_ema(&closes(vec![10.0; 5]), 20));
    }

    #[test]
    fn test_adx_above_threshold() {
        let trending: Vec<f64> = (0..40).map(|i| 10.0 + i as f64 * 0.5).collect();
        assert!(adx_above(&closes(trending), 5, 20.0));
        assert!(!adx_above(&closes(vec![10.0; 4]), 5, 20.0));
    }

    #[test]
    fn test_macd_momentum_accelerating_uptrend() {
        // quadratic rise keeps the MACD line and histogram increasing
        let accelerating: Vec<f64> = (0..80).map(|i| 10.0 + (i * i) as f64 * 0.002).collect();
        assert!(macd_momentum(&closes(accelerating), 12, 26, 9, 3));
    }

    #[test]
    fn test_macd_momentum_rejects_downtrend() {
        let falling: Vec<f64> = (0..80).map(|i| 30.0 - i as f64 * 0.1).collect();
        assert!(!macd_momentum(&closes(falling), 12, 26, 9, 3));
    }

    #[test]
    fn test_macd_momentum_needs_enough_points() {
        // 27 closes yield only 2 MACD points
        let short: Vec<f64> = (0..27).map(|i| 10.0 + i as f64).collect();
        assert!(!macd_momentum(&closes(short), 12, 26, 9, 3));
    }

    #[test]
    fn test_stage_chains_use_configured_batches() {
        let config = FilterConfig::default();
        let seed: Vec<&str> = seed_stages(&config).iter().map(|s| s.name).collect();
        assert_eq!(seed, vec!["price", "daily_volume"]);

        let candidates = candidate_stages(&config);
        let names: Vec<&str> = candidates.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["recent_volume", "spread", "ema", "adx", "macd"]);
        assert_eq!(candidates[1].batch_size, config.spread_batch_size);
        assert_eq!(candidates[1].source, DataSource::LatestQuote);
    }
}
