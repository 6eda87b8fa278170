//! # elsa-core
//!
//! The query model of the ELSA log search client.
//!
//! Everything between a user's search intent and a bound result set:
//!
//! - [`field`]: the field catalog served by `Query/get_form_params`.
//! - [`query`]: the mutable search draft (terms, free text, metas, boolean).
//! - [`payload`]: the canonical `{query_string, query_meta_params}` wire form.
//! - [`grouping`]: server-side vs. client-side group-by selection.
//! - [`session`] / [`registry`]: result session lifecycle and lookup.
//! - [`workspace`]: the application context owning all of the above.
//! - [`dashboard`]: multi-query chart assembly.
//!
//! The crate performs no I/O. Requests are issued by `elsa-client`, which
//! hands completions back to [`workspace::Workspace::complete`].

pub mod dashboard;
pub mod error;
pub mod field;
pub mod grouping;
pub mod meta;
pub mod payload;
pub mod query;
pub mod registry;
pub mod response;
pub mod session;
pub mod view;
pub mod workspace;

pub use dashboard::{Aggregation, ChartAssembly, ChartData, ChartQuery, ChartSpec, Dashboard};
pub use error::{QueryError, SessionError};
pub use field::{FieldCatalog, FieldDescriptor, FieldType, FormParams};
pub use grouping::GroupBySelection;
pub use meta::{MetaParams, SearchMode};
pub use payload::QueryPayload;
pub use query::{BooleanConnective, Query, TermInput, TermOutcome, TermSource, TimeRange};
pub use registry::ResultRegistry;
pub use response::{GroupTable, LogRow, QueryResponse, ResultBinding, RowSet};
pub use session::{FailureReason, Presentation, ResultSession, SessionRequest, SessionState};
pub use view::{Notifier, RenderError, ResultRenderer};
pub use workspace::{PendingRequest, QueryControls, Workspace, WorkspaceConfig};
