//! Windowed latency and throughput statistics.
//!
//! Samples accumulate into the current window, one latency histogram per
//! transaction label. [`Stats::flush`] renders the window and starts a new
//! one; cumulative operation counts survive across windows.

use crate::exporter::Exporter;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Highest trackable latency, one hour in microseconds.
const MAX_LATENCY_US: u64 = 3_600_000_000;
const SIGNIFICANT_FIGURES: u8 = 3;

/// Label of the aggregate row across all transactions.
pub const TOTAL_LABEL: &str = "TOTAL";

/// Labels such as `__cycle__` and `__think__` are not transactions and stay
/// out of the aggregate row.
fn is_internal(label: &str) -> bool {
    label.starts_with("__")
}

fn latency_histogram() -> Histogram<u64> {
    // Bounds are constants within hdrhistogram's supported range.
    Histogram::new_with_bounds(1, MAX_LATENCY_US, SIGNIFICANT_FIGURES)
        .expect("latency histogram bounds are valid")
}

/// Accumulates samples for the current reporting window.
pub struct Stats {
    started: Instant,
    window_started: Instant,
    window: BTreeMap<String, Histogram<u64>>,
    cumulative: BTreeMap<String, u64>,
    exporter: Option<Arc<Exporter>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            window_started: now,
            window: BTreeMap::new(),
            cumulative: BTreeMap::new(),
            exporter: None,
        }
    }

    /// Mirror every sample into a Prometheus exporter.
    pub fn with_exporter(mut self, exporter: Arc<Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Record one timing sample.
    pub fn add_sample(&mut self, label: &str, elapsed_secs: f64) {
        let micros = (elapsed_secs.max(0.0) * 1_000_000.0).round() as u64;
        self.window
            .entry(label.to_string())
            .or_insert_with(latency_histogram)
            .saturating_record(micros.max(1));
        *self.cumulative.entry(label.to_string()).or_insert(0) += 1;

        if let Some(exporter) = &self.exporter {
            exporter.observe(label, elapsed_secs);
        }
    }

    /// Report on the current window without resetting it.
    pub fn report(&self) -> StatsReport {
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let window_secs = self.window_started.elapsed().as_secs_f64();

        let rows = self
            .cumulative
            .iter()
            .map(|(label, total_ops)| {
                LabelStats::from_window(
                    label,
                    self.window.get(label),
                    *total_ops,
                    elapsed_secs,
                    window_secs,
                )
            })
            .collect();

        let mut merged = latency_histogram();
        for (label, histogram) in &self.window {
            if !is_internal(label) {
                merged.add(histogram).ok();
            }
        }
        let total_ops = self
            .cumulative
            .iter()
            .filter(|(label, _)| !is_internal(label))
            .map(|(_, ops)| ops)
            .sum();
        let total = LabelStats::from_window(
            TOTAL_LABEL,
            Some(&merged),
            total_ops,
            elapsed_secs,
            window_secs,
        );

        StatsReport {
            elapsed_secs,
            rows,
            total,
        }
    }

    /// Report on the current window and start a new one.
    pub fn flush(&mut self) -> StatsReport {
        let report = self.report();
        self.new_window();
        report
    }

    fn new_window(&mut self) {
        self.window_started = Instant::now();
        self.window.clear();
    }
}

/// Statistics for one label over the cumulative run and the last window.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStats {
    pub label: String,
    pub total_ops: u64,
    pub total_ops_per_sec: f64,
    pub period_ops: u64,
    pub period_ops_per_sec: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LabelStats {
    fn from_window(
        label: &str,
        window: Option<&Histogram<u64>>,
        total_ops: u64,
        elapsed_secs: f64,
        window_secs: f64,
    ) -> Self {
        let per_sec = |ops: u64, secs: f64| if secs > 0.0 { ops as f64 / secs } else { 0.0 };
        let to_ms = |micros: u64| micros as f64 / 1000.0;

        let period_ops = window.map(|h| h.len()).unwrap_or(0);
        let (mean_ms, p50_ms, p90_ms, p95_ms, p99_ms, max_ms) = match window {
            Some(h) if !h.is_empty() => (
                h.mean() / 1000.0,
                to_ms(h.value_at_quantile(0.50)),
                to_ms(h.value_at_quantile(0.90)),
                to_ms(h.value_at_quantile(0.95)),
                to_ms(h.value_at_quantile(0.99)),
                to_ms(h.max()),
            ),
            _ => (0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
        };

        Self {
            label: label.to_string(),
            total_ops,
            total_ops_per_sec: per_sec(total_ops, elapsed_secs),
            period_ops,
            period_ops_per_sec: per_sec(period_ops, window_secs),
            mean_ms,
            p50_ms,
            p90_ms,
            p95_ms,
            p99_ms,
            max_ms,
        }
    }
}

/// One rendered reporting window.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    /// Seconds since the stats started.
    pub elapsed_secs: f64,
    /// One row per label, sorted by label.
    pub rows: Vec<LabelStats>,
    /// Aggregate over every transaction label.
    pub total: LabelStats,
}

impl StatsReport {
    pub fn get(&self, label: &str) -> Option<&LabelStats> {
        self.rows.iter().find(|row| row.label == label)
    }

    /// Operations recorded in this window across all labels.
    pub fn period_ops(&self) -> u64 {
        self.rows.iter().map(|row| row.period_ops).sum()
    }

    /// Cumulative operations for a label, 0 if never seen.
    pub fn total_ops(&self, label: &str) -> u64 {
        self.get(label).map(|row| row.total_ops).unwrap_or(0)
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            "id",
            "elapsed",
            "tot_ops",
            "tot_ops/s",
            "period_ops",
            "period_ops/s",
            "mean(ms)",
            "p50(ms)",
            "p90(ms)",
            "p95(ms)",
            "p99(ms)",
            "max(ms)",
        ]);

        let elapsed = format!("{:.0}", self.elapsed_secs);
        let row_cells = |row: &LabelStats, id: Cell| {
            vec![
                id,
                Cell::new(&elapsed),
                Cell::new(format_number(row.total_ops)),
                Cell::new(format!("{:.0}", row.total_ops_per_sec)),
                Cell::new(format_number(row.period_ops)),
                Cell::new(format!("{:.0}", row.period_ops_per_sec)),
                Cell::new(format!("{:.2}", row.mean_ms)),
                Cell::new(format!("{:.2}", row.p50_ms)),
                Cell::new(format!("{:.2}", row.p90_ms)),
                Cell::new(format!("{:.2}", row.p95_ms)),
                Cell::new(format!("{:.2}", row.p99_ms)),
                Cell::new(format!("{:.2}", row.max_ms)),
            ]
        };

        for row in &self.rows {
            table.add_row(row_cells(row, Cell::new(&row.label)));
        }
        table.add_row(row_cells(&self.total, Cell::new(TOTAL_LABEL).fg(Color::Cyan)));

        table.to_string()
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Format number with thousands separators.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::CYCLE_LABEL;

    #[test]
    fn test_add_sample_counts_per_label() {
        let mut stats = Stats::new();
        stats.add_sample("read_kv", 0.002);
        stats.add_sample("read_kv", 0.004);
        stats.add_sample("write_kv", 0.010);
        stats.add_sample(CYCLE_LABEL, 0.016);
        stats.add_sample("__think__", 0.010);

        let report = stats.report();
        assert_eq!(report.total_ops("read_kv"), 2);
        assert_eq!(report.total_ops("write_kv"), 1);
        assert_eq!(report.total_ops(CYCLE_LABEL), 1);
        assert_eq!(report.period_ops(), 5);
        assert_eq!(report.total.total_ops, 3);
        assert_eq!(report.total.period_ops, 3);
    }

    #[test]
    fn test_latency_percentiles_in_milliseconds() {
        let mut stats = Stats::new();
        for ms in 1..=100 {
            stats.add_sample("txn", ms as f64 / 1000.0);
        }

        let report = stats.report();
        let row = report.get("txn").unwrap();
        assert!((row.mean_ms - 50.5).abs() < 0.5, "mean {}", row.mean_ms);
        assert!((row.p50_ms - 50.0).abs() < 0.5, "p50 {}", row.p50_ms);
        assert!((row.p99_ms - 99.0).abs() < 0.5, "p99 {}", row.p99_ms);
        assert!((row.max_ms - 100.0).abs() < 0.5, "max {}", row.max_ms);
    }

    #[test]
    fn test_flush_resets_window_but_keeps_totals() {
        let mut stats = Stats::new();
        stats.add_sample("txn", 0.001);
        stats.add_sample("txn", 0.001);

        let first = stats.flush();
        assert_eq!(first.period_ops(), 2);

        let second = stats.flush();
        assert_eq!(second.period_ops(), 0);
        assert_eq!(second.total.period_ops, 0);
        let row = second.get("txn").unwrap();
        assert_eq!(row.total_ops, 2);
        assert_eq!(row.period_ops, 0);
        assert_eq!(row.mean_ms, 0.0);
    }

    #[test]
    fn test_report_does_not_reset() {
        let mut stats = Stats::new();
        stats.add_sample("txn", 0.001);
        assert_eq!(stats.report().period_ops(), 1);
        assert_eq!(stats.report().period_ops(), 1);
    }

    #[test]
    fn test_render_lists_labels_and_total() {
        let mut stats = Stats::new();
        stats.add_sample("write_kv", 0.003);
        stats.add_sample(CYCLE_LABEL, 0.004);

        let rendered = stats.report().render();
        assert!(rendered.contains("write_kv"));
        assert!(rendered.contains(CYCLE_LABEL));
        assert!(rendered.contains(TOTAL_LABEL));
        assert!(rendered.contains("p99(ms)"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
