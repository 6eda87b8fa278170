//! Dashboard runner: issues every chart's sub-queries at once and assembles
//! each chart as its answers arrive.

use std::time::Duration;

use elsa_core::{ChartAssembly, ChartData, ChartSpec, Dashboard, SessionRequest};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::client::ElsaClient;
use crate::driver::fetch;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardRowData {
    pub title: String,
    pub charts: Vec<ChartData>,
}

fn empty_chart(spec: &ChartSpec) -> ChartData {
    ChartData {
        title: spec.title.clone(),
        chart_type: spec.chart_type.clone(),
        is_time: spec.is_time_chart(),
        labels: Vec::new(),
        rows: Vec::new(),
    }
}

/// Runs one chart. Sub-queries resolve in any order; failed ones leave no
/// column.
pub async fn run_chart(client: &ElsaClient, timeout: Duration, spec: &ChartSpec) -> ChartData {
    let mut assembly = ChartAssembly::new(spec.clone());
    let mut in_flight: FuturesUnordered<_> = spec
        .queries
        .iter()
        .enumerate()
        .map(|(index, query)| async move {
            let request = SessionRequest::Query(query.payload.clone());
            (index, fetch(client, timeout, &request).await)
        })
        .collect();

    tracing::debug!("chart {}: {} queries issued", spec.title, spec.queries.len());
    while let Some((index, outcome)) = in_flight.next().await {
        if let Some(chart) = assembly.record(index, outcome) {
            return chart;
        }
    }
    empty_chart(spec)
}

/// Runs every chart of `dashboard` concurrently. Rows and charts keep
/// their declared order.
pub async fn run_dashboard(
    client: &ElsaClient,
    timeout: Duration,
    dashboard: &Dashboard,
) -> Vec<DashboardRowData> {
    tracing::info!("running dashboard {}", dashboard.title);
    join_all(dashboard.rows.iter().map(|row| async move {
        let charts = join_all(row.charts.iter().map(|c| run_chart(client, timeout, c))).await;
        DashboardRowData {
            title: row.title.clone(),
            charts,
        }
    }))
    .await
}
