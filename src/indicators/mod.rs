//! Technical indicator kernels over bar columns (oldest first).
//!
//! Every function returns `None` when the input is too short for the period
//! or the result is not finite; callers treat that as "does not qualify".

/// MACD output series, aligned so index `i` of each vector refers to the same bar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

impl Macd {
    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn true_ranges(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..close.len())
        .map(|i| {
            let range = high[i] - low[i];
            if i == 0 {
                range
            } else {
                range
                    .max((high[i] - close[i - 1]).abs())
                    .max((low[i] - close[i - 1]).abs())
            }
        })
        .collect()
}

fn same_len(high: &[f64], low: &[f64], close: &[f64]) -> bool {
    high.len() == low.len() && low.len() == close.len()
}

/// Exponential moving average series seeded with the first value.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for value in &values[1..] {
        current = (value - current) * k + current;
        out.push(current);
    }
    out
}

/// Latest EMA of `values`.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    ema_series(values, period).last().copied().and_then(finite)
}

/// Latest Average True Range with Wilder smoothing.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    if period == 0 || close.len() < period || !same_len(high, low, close) {
        return None;
    }
    let tr = true_ranges(high, low, close);
    let p = period as f64;
    let mut value = tr[..period].iter().sum::<f64>() / p;
    for range in &tr[period..] {
        value = (value * (p - 1.0) + range) / p;
    }
    finite(value)
}

/// Latest Average Directional Index.
///
/// Needs `2 * period` bars: the first bar only provides a previous close,
/// `period` more seed the smoothed directional movement and the remaining
/// `period - 1` complete the first DX average.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    if period == 0 || close.len() < 2 * period || !same_len(high, low, close) {
        return None;
    }
    let p = period as f64;
    let tr = true_ranges(high, low, close);

    let mut plus_dm = Vec::with_capacity(close.len() - 1);
    let mut minus_dm = Vec::with_capacity(close.len() - 1);
    for i in 1..close.len() {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }
    let tr = &tr[1..];

    let dx = |plus: f64, minus: f64, range: f64| {
        let plus_di = 100.0 * plus / range;
        let minus_di = 100.0 * minus / range;
        let di_sum = plus_di + minus_di;
        if di_sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / di_sum
        }
    };

    let mut atr_sum: f64 = tr[..period].iter().sum();
    let mut plus_sum: f64 = plus_dm[..period].iter().sum();
    let mut minus_sum: f64 = minus_dm[..period].iter().sum();

    let mut dx_values = vec![dx(plus_sum, minus_sum, atr_sum)];
    for i in period..tr.len() {
        atr_sum = atr_sum - atr_sum / p + tr[i];
        plus_sum = plus_sum - plus_sum / p + plus_dm[i];
        minus_sum = minus_sum - minus_sum / p + minus_dm[i];
        dx_values.push(dx(plus_sum, minus_sum, atr_sum));
    }

    if dx_values.len() < period {
        return None;
    }
    let mut value = dx_values[..period].iter().sum::<f64>() / p;
    for next in &dx_values[period..] {
        value = (value * (p - 1.0) + next) / p;
    }
    finite(value)
}

/// MACD line, signal and histogram.
///
/// Output starts at the bar where the slow EMA has a full period behind it,
/// so a series of `n` closes yields `n - slow + 1` points.
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || signal == 0 || fast >= slow || close.len() < slow {
        return None;
    }
    let fast_ema = ema_series(close, fast);
    let slow_ema = ema_series(close, slow);
    let line: Vec<f64> = fast_ema[slow - 1..]
        .iter()
        .zip(&slow_ema[slow - 1..])
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(l, s)| l - s)
        .collect::<Vec<f64>>();

    if histogram.iter().any(|h| !h.is_finite()) {
        return None;
    }
    Some(Macd {
        line,
        signal: signal_line,
        histogram,
    })
}

/// Ordinary least squares slope of `values` against their index.
pub fn linear_regression_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });
    finite(num / den)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ema_constant_series() {
        let values = vec![5.0; 30];
        assert!(approx(ema(&values, 20).unwrap(), 5.0));
    }

    #[test]
    fn test_ema_follows_trend_with_lag() {
        let values: Vec<f64> = (1..=40).map(|v| v as f64).collect();
        let value = ema(&values, 10).unwrap();
        assert!(value < 40.0);
        assert!(value > 30.0);
    }

    #[test]
    fn test_ema_insufficient_data() {
        assert_eq!(ema(&[1.0, 2.0], 20), None);
    }

    #[test]
    fn test_atr_constant_range() {
        let high = vec![11.0; 20];
        let low = vec![9.0; 20];
        let close = vec![10.0; 20];
        assert!(approx(atr(&high, &low, &close, 14).unwrap(), 2.0));
    }

    #[test]
    fn test_atr_uses_gap_from_previous_close() {
        let high = vec![11.0, 16.0];
        let low = vec![9.0, 14.0];
        let close = vec![10.0, 15.0];
        // second TR is |16 - 10| = 6, seed window of 1 is TR[0] = 2
        assert!(approx(atr(&high, &low, &close, 1).unwrap(), 6.0));
    }

    #[test]
    fn test_atr_rejects_mismatched_columns() {
        assert_eq!(atr(&[1.0, 2.0], &[1.0], &[1.0, 2.0], 1), None);
    }

    #[test]
    fn test_adx_strong_trend() {
        let close: Vec<f64> = (0..40).map(|i| 10.0 + i as f64).collect();
        let high: Vec<f64> = close.iter().map(|c| c + 0.5).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 0.5).collect();

        let value = adx(&high, &low, &close, 5).unwrap();
        assert!(value > 90.0, "adx = {value}");
    }

    #[test]
    fn test_adx_flat_market_is_weak() {
        let close: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 10.0 } else { 10.2 })
            .collect();
        let high: Vec<f64> = close.iter().map(|c| c + 0.1).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 0.1).collect();

        let value = adx(&high, &low, &close, 5).unwrap();
        assert!(value < 20.0, "adx = {value}");
    }

    #[test]
    fn test_adx_insufficient_data() {
        let v = vec![1.0; 9];
        assert_eq!(adx(&v, &v, &v, 5), None);
    }

    #[test]
    fn test_macd_alignment() {
        let close: Vec<f64> = (0..60).map(|i| 10.0 + (i as f64 * 0.3).sin()).collect();
        let result = macd(&close, 12, 26, 9).unwrap();

        assert_eq!(result.len(), 60 - 26 + 1);
        assert_eq!(result.signal.len(), result.len());
        assert_eq!(result.histogram.len(), result.len());
        let last = result.len() - 1;
        assert!(approx(
            result.histogram[last],
            result.line[last] - result.signal[last]
        ));
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let close: Vec<f64> = (0..60).map(|i| 10.0 + i as f64 * 0.1).collect();
        let result = macd(&close, 12, 26, 9).unwrap();
        assert!(*result.line.last().unwrap() > 0.0);
    }

    #[test]
    fn test_macd_rejects_bad_periods() {
        let close = vec![1.0; 60];
        assert_eq!(macd(&close, 26, 12, 9), None);
        assert_eq!(macd(&close[..10], 12, 26, 9), None);
    }

    #[test]
    fn test_linear_regression_slope() {
        assert!(approx(
            linear_regression_slope(&[1.0, 3.0, 5.0]).unwrap(),
            2.0
        ));
        assert!(linear_regression_slope(&[3.0, 2.0, 1.5]).unwrap() < 0.0);
        assert_eq!(linear_regression_slope(&[1.0]), None);
    }
}
