//! # elsa: command line client for ELSA log search
//!
//! - `elsa query <text> --term program=sshd --groupby host`: build, submit
//!   and print a search.
//! - `elsa fields`: list the searchable fields.
//! - `elsa history`, `elsa saved ...`, `elsa scheduled ...`: server-side
//!   query records.
//! - `elsa cancel <qid>`, `elsa running`: batch (archive) queries.
//! - `elsa export`, `elsa dashboard`: result export and multi-query charts.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elsa_client::{
    run_dashboard, Config, ElsaClient, ExportFormat, ScheduleRequest, SessionDriver, TimeUnitCode,
};
use elsa_core::query::parse_timestamp;
use elsa_core::{
    Dashboard, FieldCatalog, GroupBySelection, ResultRenderer, SearchMode, SessionState,
    TermInput, TimeRange, Workspace,
};

mod render;

use render::{chart_table, format_epoch, table, JsonRenderer, StderrNotifier, TableRenderer};

/// Query an ELSA log search server.
#[derive(Parser)]
#[command(name = "elsa", version, about, long_about = None)]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true, default_value = "elsa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run a search.
    Query {
        /// Free text of the query.
        #[arg(default_value = "")]
        text: String,

        /// Field terms such as `program=sshd` or `SYSLOG.program:sshd`.
        #[arg(long = "term", short = 't')]
        terms: Vec<String>,

        /// Boolean applied to the following terms (and, or, not).
        #[arg(long)]
        boolean: Option<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// Field to report on, e.g. `any.host` or `SYSLOG.program`.
        #[arg(long)]
        groupby: Option<String>,

        /// index, archive, index-analytics or archive-analytics.
        #[arg(long)]
        mode: Option<SearchMode>,

        #[arg(long)]
        limit: Option<u64>,

        /// Print JSON instead of tables.
        #[arg(long)]
        json: bool,

        /// Save the result with this comment once loaded.
        #[arg(long)]
        save: Option<String>,
    },

    /// Open a saved result by its query ID.
    Show { qid: i64 },

    /// List searchable fields.
    Fields {
        #[arg(long)]
        class: Option<String>,
    },

    /// Show previously run queries.
    History {
        #[arg(long)]
        start: Option<usize>,
        #[arg(long, default_value_t = 20)]
        results: usize,
    },

    /// Manage saved results.
    Saved {
        #[command(subcommand)]
        action: SavedCmd,
    },

    /// Manage scheduled queries.
    Scheduled {
        #[command(subcommand)]
        action: ScheduledCmd,
    },

    /// Cancel a running batch query.
    Cancel { qid: i64 },

    /// Show the currently running archive query.
    Running,

    /// Export a result document through a server plugin.
    Export {
        /// JSON file with the data to export.
        data: PathBuf,
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// Output file; stdout when omitted.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Run every chart of a dashboard definition.
    Dashboard {
        /// JSON dashboard definition.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum SavedCmd {
    List {
        #[arg(long)]
        start: Option<usize>,
        #[arg(long, default_value_t = 20)]
        results: usize,
    },
    Show {
        qid: i64,
    },
    Delete {
        qid: i64,
    },
    /// Upload a result document (as printed by `query --json`).
    Save {
        file: PathBuf,
        #[arg(long)]
        comments: String,
    },
}

#[derive(Subcommand)]
enum ScheduledCmd {
    List,
    Add {
        qid: i64,
        /// Run every N units.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        every: u32,
        /// minute, hour, day, week, month or year.
        #[arg(long, default_value = "day")]
        unit: TimeUnitCode,
        /// Days to keep the schedule; 0 keeps it forever.
        #[arg(long, default_value_t = 0)]
        days: u32,
        /// Action to run; the server's `Save` action when omitted.
        #[arg(long)]
        action_id: Option<String>,
    },
    Update {
        id: i64,
        property: String,
        /// JSON value, or a plain string.
        value: String,
    },
    Delete {
        id: i64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "elsa=info,elsa_client=info,elsa_core=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async_main(config, cli.command))
}

async fn async_main(config: Config, cmd: Commands) -> anyhow::Result<()> {
    let client = ElsaClient::from_config(&config)?;
    tracing::debug!("using ELSA at {}", client.base_url());

    match cmd {
        Commands::Query {
            text,
            terms,
            boolean,
            start,
            end,
            groupby,
            mode,
            limit,
            json,
            save,
        } => {
            let params = client
                .get_form_params()
                .await
                .context("loading field catalog")?;
            let catalog = FieldCatalog::from_form_params(&params);
            let mut ws = Workspace::new(catalog, StderrNotifier, config.workspace_config());

            ws.query_mut().set_query_text(text);
            if let Some(b) = boolean {
                ws.set_boolean(&b)?;
            }
            for t in terms {
                ws.add_term(TermInput::expr(t))?;
            }
            if start.is_some() || end.is_some() {
                let start = start.as_deref().map(parse_timestamp).transpose()?;
                let end = end.as_deref().map(parse_timestamp).transpose()?;
                ws.set_time_range(TimeRange::new(start, end));
            }
            if let Some(g) = groupby {
                let label = ws.select_group_by(&GroupBySelection::parse(&g));
                tracing::info!("reporting on {}", label);
            }
            if let Some(m) = mode {
                ws.set_search_mode(m);
            }
            if let Some(n) = limit {
                ws.query_mut()
                    .add_meta(elsa_core::meta::LIMIT, serde_json::json!(n))?;
            }

            let pending = ws.submit()?;
            let local_id = pending.local_id;
            let driver = SessionDriver::new(client.clone(), config.request_timeout());
            let canceller = driver.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel(local_id);
                }
            });

            let mut renderer: Box<dyn ResultRenderer> = if json {
                Box::new(JsonRenderer)
            } else {
                Box::new(TableRenderer::new(std::io::stdout()))
            };
            let state = driver.run(&mut ws, pending, renderer.as_mut()).await?;
            match state {
                SessionState::Failed { reason } => bail!("{}", reason),
                SessionState::Loaded => {
                    if let (Some(comments), Some(session)) = (save, ws.registry().get(local_id)) {
                        let results = serde_json::to_value(session.response())?;
                        client.save_results(&comments, &results).await?;
                        eprintln!("Saved to QID {}", session.server_id().unwrap_or_default());
                    }
                }
                _ => {}
            }
        }

        Commands::Show { qid } => show_saved(&client, &config, qid).await?,

        Commands::Fields { class } => {
            let params = client.get_form_params().await?;
            let catalog = FieldCatalog::from_form_params(&params);
            let rows = catalog
                .fields()
                .iter()
                .filter(|f| class.as_deref().map_or(true, |c| f.class.eq_ignore_ascii_case(c)))
                .map(|f| {
                    vec![
                        f.fqdn.clone(),
                        f.field_type.to_string(),
                        f.validation
                            .as_ref()
                            .map(|v| format!("{:?}", v))
                            .unwrap_or_default(),
                    ]
                });
            println!("{}", table(&["field", "type", "validation"], rows));
        }

        Commands::History { start, results } => {
            let page = client.get_previous_queries(start, Some(results)).await?;
            let rows = page.results.iter().map(|q| {
                vec![
                    q.qid.map(|i| i.to_string()).unwrap_or_default(),
                    q.timestamp.clone(),
                    q.payload().query_string,
                    q.num_results.map(|i| i.to_string()).unwrap_or_default(),
                    q.milliseconds.map(|i| format!("{} ms", i)).unwrap_or_default(),
                ]
            });
            println!("{}", table(&["qid", "timestamp", "query", "results", "took"], rows));
            if let Some(total) = page.total_records {
                eprintln!("{} total", total);
            }
        }

        Commands::Saved { action } => match action {
            SavedCmd::List { start, results } => {
                let page = client.get_saved_queries(start, Some(results)).await?;
                let rows = page.results.iter().map(|q| {
                    vec![
                        q.qid.map(|i| i.to_string()).unwrap_or_default(),
                        q.timestamp.clone(),
                        q.payload().query_string,
                        q.num_results.map(|i| i.to_string()).unwrap_or_default(),
                        q.comments.clone(),
                    ]
                });
                println!("{}", table(&["qid", "timestamp", "query", "results", "comments"], rows));
            }
            SavedCmd::Delete { qid } => {
                client.delete_saved_results(qid).await?;
                eprintln!("Deleted saved result {}", qid);
            }
            SavedCmd::Save { file, comments } => {
                let results = read_json(&file)?;
                client.save_results(&comments, &results).await?;
                eprintln!("Result saved.");
            }
            SavedCmd::Show { qid } => show_saved(&client, &config, qid).await?,
        },

        Commands::Scheduled { action } => match action {
            ScheduledCmd::List => {
                let page = client.get_scheduled_queries().await?;
                let rows = page.results.iter().map(|q| {
                    vec![
                        q.id.map(|i| i.to_string()).unwrap_or_default(),
                        q.query_payload().query_string,
                        q.frequency.clone(),
                        q.action.clone(),
                        if q.enabled { "yes" } else { "no" }.to_string(),
                        q.last_alert.clone(),
                    ]
                });
                println!(
                    "{}",
                    table(&["id", "query", "frequency", "action", "enabled", "last alert"], rows)
                );
            }
            ScheduledCmd::Add {
                qid,
                every,
                unit,
                days,
                action_id,
            } => {
                let action_id = match action_id {
                    Some(id) => serde_json::Value::String(id),
                    None => client.get_form_params().await?.save_action_id(),
                };
                let request = ScheduleRequest {
                    qid,
                    count: every,
                    time_unit: unit,
                    days,
                    action_id,
                };
                let answer = client.schedule_query(&request).await?;
                eprintln!("Scheduled query {}: {}", qid, answer);
            }
            ScheduledCmd::Update {
                id,
                property,
                value,
            } => {
                let value = serde_json::from_str(&value)
                    .unwrap_or(serde_json::Value::String(value));
                let answer = client.update_scheduled_query(id, &property, &value).await?;
                println!("{}", serde_json::to_string_pretty(&answer)?);
            }
            ScheduledCmd::Delete { id } => {
                client.delete_scheduled_query(id).await?;
                eprintln!("Deleted schedule {}", id);
            }
        },

        Commands::Cancel { qid } => match client.cancel_query(qid).await {
            Ok(()) => eprintln!(
                "Cancelling query with ID {}.  You will be able to issue a new archive query soon.",
                qid
            ),
            Err(e) => {
                tracing::warn!("cancel of {} failed: {}", qid, e);
                bail!("Query cancel failed!");
            }
        },

        Commands::Running => match client.get_running_archive_query().await? {
            Some(qid) => println!("{}", qid),
            None => eprintln!("No archive query running."),
        },

        Commands::Export {
            data,
            format,
            output,
        } => {
            let data = read_json(&data)?;
            let document = client.export(format, &data).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &document)
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("Wrote {} bytes to {}", document.len(), path.display());
                }
                None => std::io::stdout().write_all(&document)?,
            }
        }

        Commands::Dashboard { file } => {
            let dashboard: Dashboard = serde_json::from_value(read_json(&file)?)
                .with_context(|| format!("parsing dashboard {}", file.display()))?;
            let rows = run_dashboard(&client, config.request_timeout(), &dashboard).await;
            println!("# {}", dashboard.title);
            for row in rows {
                println!("## {}", row.title);
                for chart in row.charts {
                    let kind = if chart.is_time { "time" } else { "categories" };
                    println!("### {} ({}, {})", chart.title, chart.chart_type, kind);
                    println!("{}", chart_table(&chart));
                }
            }
        }
    }
    Ok(())
}

async fn show_saved(client: &ElsaClient, config: &Config, qid: i64) -> anyhow::Result<()> {
    let mut ws = Workspace::new(FieldCatalog::default(), StderrNotifier, config.workspace_config());
    let pending = ws.open_saved(qid);
    let driver = SessionDriver::new(client.clone(), config.request_timeout());
    let mut renderer = TableRenderer::new(std::io::stdout());
    if let SessionState::Failed { reason } = driver.run(&mut ws, pending, &mut renderer).await? {
        bail!("{}", reason);
    }
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_query() {
        let cli = Cli::try_parse_from([
            "elsa", "query", "sshd", "-t", "program=sshd", "--groupby", "any.host", "--mode",
            "archive",
        ])
        .unwrap();
        match cli.command {
            Commands::Query {
                text,
                terms,
                groupby,
                mode,
                ..
            } => {
                assert_eq!(text, "sshd");
                assert_eq!(terms, vec!["program=sshd"]);
                assert_eq!(groupby.as_deref(), Some("any.host"));
                assert_eq!(mode, Some(SearchMode::Archive));
            }
            _ => panic!("expected query"),
        }
        assert_eq!(cli.config, PathBuf::from("elsa.toml"));
    }

    #[test]
    fn test_cli_parses_schedule() {
        let cli = Cli::try_parse_from(["elsa", "scheduled", "add", "12", "--unit", "hours"]).unwrap();
        match cli.command {
            Commands::Scheduled {
                action: ScheduledCmd::Add { qid, unit, every, .. },
            } => {
                assert_eq!(qid, 12);
                assert_eq!(unit, TimeUnitCode::Hour);
                assert_eq!(every, 1);
            }
            _ => panic!("expected scheduled add"),
        }
    }

    #[test]
    fn test_cli_rejects_zero_schedule_interval() {
        assert!(Cli::try_parse_from(["elsa", "scheduled", "add", "12", "--every", "0"]).is_err());
        assert!(Cli::try_parse_from(["elsa", "scheduled", "add", "12", "--every", "2"]).is_ok());
    }

    #[test]
    fn test_format_epoch_in_history() {
        assert_eq!(format_epoch(1700000000), "2023-11-14 22:13:20");
    }
}
