//! # Dashboards
//!
//! Rows of charts, each chart fed by one or more labelled queries. A chart
//! is drawn once, after the last of its sub-queries resolves; results are
//! merged into one table keyed by the x value with a column per label.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::payload::QueryPayload;
use crate::response::{QueryResponse, ResponseKind, ResultBinding};
use crate::session::FailureReason;

/// Group-by fields that make a chart a time series.
pub const TIME_GROUPS: [&str; 5] = ["timestamp", "minute", "hour", "day", "year"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub rows: Vec<DashboardRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardRow {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub charts: Vec<ChartSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub chart_type: String,
    #[serde(default)]
    pub group: Option<Aggregation>,
    #[serde(default)]
    pub queries: Vec<ChartQuery>,
}

impl ChartSpec {
    pub fn is_time_chart(&self) -> bool {
        self.queries.iter().any(|q| {
            q.payload
                .groupby()
                .first()
                .map(|g| TIME_GROUPS.contains(&g.as_str()))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartQuery {
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub payload: QueryPayload,
}

/// How repeated x values within one series are folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Count,
    Max,
    Min,
    Avg,
}

impl Aggregation {
    fn fold(self, values: &[f64]) -> f64 {
        match self {
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
            Self::Max => values.iter().copied().fold(f64::MIN, f64::max),
            Self::Min => values.iter().copied().fold(f64::MAX, f64::min),
            Self::Avg => {
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            }
        }
    }
}

/// One sub-query's points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub label: String,
    pub points: Vec<(String, f64)>,
}

impl Series {
    /// Points of a loaded response: the first group table, or a single
    /// `(label, total)` point for ungrouped results.
    pub fn from_response(label: &str, response: &QueryResponse, sent: &QueryPayload) -> Self {
        let points = match ResultBinding::bind(response, sent) {
            ResultBinding::Grouped { tables, .. } => tables
                .into_iter()
                .next()
                .map(|t| {
                    t.rows
                        .into_iter()
                        .map(|r| (r.value, r.count as f64))
                        .collect()
                })
                .unwrap_or_default(),
            ResultBinding::Rows(set) => {
                let total = set.total_records.unwrap_or(set.rows.len() as i64);
                vec![(label.to_string(), total as f64)]
            }
            ResultBinding::Batch { .. } => Vec::new(),
        };
        Self {
            label: label.to_string(),
            points,
        }
    }

    fn folded(&self, group: Option<Aggregation>) -> Vec<(String, f64)> {
        let mut buckets: Vec<(String, Vec<f64>)> = Vec::new();
        for (x, y) in &self.points {
            match buckets.iter_mut().find(|(bx, _)| bx == x) {
                Some((_, ys)) => ys.push(*y),
                None => buckets.push((x.clone(), vec![*y])),
            }
        }
        buckets
            .into_iter()
            .map(|(x, ys)| {
                let y = match group {
                    Some(agg) => agg.fold(&ys),
                    None => ys.last().copied().unwrap_or_default(),
                };
                (x, y)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartRow {
    pub x: String,
    pub values: Vec<Option<f64>>,
}

/// A merged chart table ready to draw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub title: String,
    pub chart_type: String,
    pub is_time: bool,
    pub labels: Vec<String>,
    pub rows: Vec<ChartRow>,
}

fn compare_x(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(fa), Ok(fb)) => fa.partial_cmp(&fb).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

/// Adds `series` as a new column of `data`.
pub fn merge_series(data: &mut ChartData, label: &str, points: &[(String, f64)]) {
    data.labels.push(label.to_string());
    let width = data.labels.len();
    for row in data.rows.iter_mut() {
        row.values.resize(width, None);
    }
    for (x, y) in points {
        match data.rows.iter_mut().find(|r| &r.x == x) {
            Some(row) => row.values[width - 1] = Some(*y),
            None => {
                let mut values = vec![None; width];
                values[width - 1] = Some(*y);
                data.rows.push(ChartRow {
                    x: x.clone(),
                    values,
                });
            }
        }
    }
    data.rows.sort_by(|a, b| compare_x(&a.x, &b.x));
}

/// Collects one chart's sub-query results.
#[derive(Debug, Clone)]
pub struct ChartAssembly {
    spec: ChartSpec,
    results: Vec<Option<Option<Series>>>,
    received: usize,
}

impl ChartAssembly {
    pub fn new(spec: ChartSpec) -> Self {
        let results = vec![None; spec.queries.len()];
        Self {
            spec,
            results,
            received: 0,
        }
    }

    pub fn spec(&self) -> &ChartSpec {
        &self.spec
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.results.len()
    }

    /// Records sub-query `index`. Returns the merged chart when this was the
    /// last outstanding one. Failures count as resolved and add no column.
    pub fn record(
        &mut self,
        index: usize,
        outcome: Result<QueryResponse, FailureReason>,
    ) -> Option<ChartData> {
        let Some(query) = self.spec.queries.get(index) else {
            tracing::warn!("chart {} has no query {}", self.spec.title, index);
            return None;
        };
        if self.results[index].is_some() {
            tracing::warn!("chart {} query {} already resolved", self.spec.title, index);
            return None;
        }

        let series = match outcome {
            Ok(response) => match response.classify() {
                ResponseKind::Loaded => {
                    Some(Series::from_response(&query.label, &response, &query.payload))
                }
                ResponseKind::Error(e) => {
                    tracing::warn!("chart {} query {} failed: {}", self.spec.title, index, e);
                    None
                }
                ResponseKind::Batch(id) => {
                    tracing::warn!("chart {} query {} was batched as {}", self.spec.title, index, id);
                    None
                }
            },
            Err(reason) => {
                tracing::warn!("chart {} query {} failed: {}", self.spec.title, index, reason);
                None
            }
        };
        self.results[index] = Some(series);
        self.received += 1;

        if !self.is_complete() {
            return None;
        }
        tracing::info!(
            "received all ({}) results for chart {}",
            self.results.len(),
            self.spec.title
        );
        Some(self.merge())
    }

    fn merge(&self) -> ChartData {
        let mut data = ChartData {
            title: self.spec.title.clone(),
            chart_type: self.spec.chart_type.clone(),
            is_time: self.spec.is_time_chart(),
            labels: Vec::new(),
            rows: Vec::new(),
        };
        for series in self.results.iter().flatten().flatten() {
            merge_series(&mut data, &series.label, &series.folded(self.spec.group));
        }
        data
    }
}
