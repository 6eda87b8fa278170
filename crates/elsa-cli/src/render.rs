//! Terminal output: notifier on stderr, result tables on stdout.

use std::io::Write;

use chrono::{TimeZone, Utc};
use elsa_core::{ChartData, GroupTable, Notifier, RenderError, ResultBinding, ResultRenderer, RowSet};
use tabled::builder::Builder;
use tabled::settings::Style;

pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&mut self, message: &str) {
        eprintln!("⚠️  {}", message);
    }
}

pub fn format_epoch(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Builds a table from a header and string rows.
pub fn table<I, R>(header: &[&str], rows: I) -> String
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    let mut builder = Builder::default();
    builder.push_record(header.iter().map(|h| h.to_string()));
    for row in rows {
        builder.push_record(row);
    }
    builder.build().with(Style::modern()).to_string()
}

fn rows_table(rows: &RowSet) -> String {
    table(
        &["timestamp", "id", "host", "program", "msg"],
        rows.rows.iter().map(|r| {
            vec![
                r.timestamp().map(format_epoch).unwrap_or_default(),
                r.id().map(|i| i.to_string()).unwrap_or_default(),
                r.field_value("host").unwrap_or_default(),
                r.field_value("program").unwrap_or_default(),
                r.msg().unwrap_or_default().to_string(),
            ]
        }),
    )
}

fn group_table(group: &GroupTable) -> String {
    table(
        &[group.field.as_str(), "count"],
        group
            .rows
            .iter()
            .map(|r| vec![r.value.clone(), r.count.to_string()]),
    )
}

pub fn chart_table(chart: &ChartData) -> String {
    let mut header = vec!["x"];
    header.extend(chart.labels.iter().map(String::as_str));
    table(
        &header,
        chart.rows.iter().map(|row| {
            let x = match (chart.is_time, row.x.parse::<i64>()) {
                (true, Ok(secs)) => format_epoch(secs),
                _ => row.x.clone(),
            };
            std::iter::once(x)
                .chain(
                    row.values
                        .iter()
                        .map(|v| v.map(|n| n.to_string()).unwrap_or_default()),
                )
                .collect::<Vec<_>>()
        }),
    )
}

/// Prints bindings as tables.
pub struct TableRenderer<W: Write> {
    out: W,
}

impl<W: Write> TableRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResultRenderer for TableRenderer<W> {
    fn render(&mut self, label: &str, binding: &ResultBinding) -> Result<(), RenderError> {
        let io = |e: std::io::Error| RenderError(e.to_string());
        writeln!(self.out, "== {} ==", label).map_err(io)?;
        match binding {
            ResultBinding::Rows(rows) => {
                writeln!(self.out, "{}", rows_table(rows)).map_err(io)?;
                for w in &rows.warnings {
                    writeln!(self.out, "warning: {}", w).map_err(io)?;
                }
                for e in &rows.errors {
                    writeln!(self.out, "error: {}", e).map_err(io)?;
                }
            }
            ResultBinding::Grouped { tables, local } => {
                if *local {
                    writeln!(self.out, "(grouped locally)").map_err(io)?;
                }
                for t in tables {
                    writeln!(self.out, "{}", group_table(t)).map_err(io)?;
                }
            }
            ResultBinding::Batch { batch_id } => {
                writeln!(
                    self.out,
                    "Query batched with ID {}. Cancel with `elsa cancel {}`.",
                    batch_id, batch_id
                )
                .map_err(io)?;
            }
        }
        Ok(())
    }
}

/// Prints bindings as JSON, one document per result.
pub struct JsonRenderer;

impl ResultRenderer for JsonRenderer {
    fn render(&mut self, label: &str, binding: &ResultBinding) -> Result<(), RenderError> {
        let doc = serde_json::json!({ "label": label, "result": binding });
        let text = serde_json::to_string_pretty(&doc).map_err(|e| RenderError(e.to_string()))?;
        println!("{}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elsa_core::response::GroupRow;
    use elsa_core::LogRow;
    use serde_json::json;

    #[test]
    fn test_rows_render_in_order() {
        let rows: Vec<LogRow> = serde_json::from_value(json!([
            {"id": 1, "msg": "first", "timestamp": 1700000000, "host": "10.0.0.1"},
            {"id": 2, "msg": "second", "timestamp": 1700000060}
        ]))
        .unwrap();
        let binding = ResultBinding::Rows(RowSet {
            rows,
            total_records: Some(2),
            errors: vec![],
            warnings: vec!["slow node".into()],
        });
        let mut r = TableRenderer::new(Vec::new());
        r.render("sshd (2)", &binding).unwrap();
        let out = String::from_utf8(r.into_inner()).unwrap();
        assert!(out.starts_with("== sshd (2) =="));
        assert!(out.contains("2023-11-14 22:13:20"));
        assert!(out.find("first").unwrap() < out.find("second").unwrap());
        assert!(out.contains("warning: slow node"));
    }

    #[test]
    fn test_group_and_batch_render() {
        let binding = ResultBinding::Grouped {
            tables: vec![GroupTable::new(
                "program",
                vec![GroupRow {
                    value: "sshd".into(),
                    count: 4,
                }],
            )],
            local: true,
        };
        let mut r = TableRenderer::new(Vec::new());
        r.render("x", &binding).unwrap();
        r.render("y", &ResultBinding::Batch { batch_id: 9 }).unwrap();
        let out = String::from_utf8(r.into_inner()).unwrap();
        assert!(out.contains("(grouped locally)"));
        assert!(out.contains("sshd"));
        assert!(out.contains("elsa cancel 9"));
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(0), "1970-01-01 00:00:00");
    }
}
