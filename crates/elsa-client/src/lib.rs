//! # elsa-client
//!
//! Async side of the ELSA query client.
//!
//! [`client::ElsaClient`] talks to the `Query/*` endpoints,
//! [`driver::SessionDriver`] performs the requests an
//! [`elsa_core::Workspace`] hands out (with timeout and cancellation), and
//! [`dashboard`] runs multi-query charts. [`config::Config`] reads
//! `elsa.toml`.

pub mod client;
pub mod config;
pub mod dashboard;
pub mod driver;
pub mod error;
pub mod records;

pub use client::ElsaClient;
pub use config::Config;
pub use dashboard::{run_chart, run_dashboard, DashboardRowData};
pub use driver::{Completion, SessionDriver};
pub use error::{ClientError, Result};
pub use records::{
    ExportFormat, PreviousQuery, RecordPage, SavedQuery, ScheduleRequest, ScheduledQuery,
    TimeUnitCode,
};
