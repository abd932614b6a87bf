//! Structured audit logging for route lifecycle events.
//!
//! Operational messages go through the `log` facade. Events an operator may
//! need to reconstruct later (a route installed, re-planned or torn down, a
//! reservation that could not be honoured, the daemon starting or stopping)
//! are additionally emitted as [`AuditRecord`]s through [`audit_log!`], which
//! forwards them to `tracing` under the `audit` target with the full record
//! attached as JSON.
//!
//! | Outcome      | Level |
//! |--------------|-------|
//! | `Success`    | info  |
//! | `InProgress` | debug |
//! | `Failure`    | warn  |
//! | `Denied`     | warn  |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Level;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// A route was installed
    ResourceCreate,
    /// A route was re-planned or rebalanced
    ResourceModify,
    /// A route was removed
    ResourceDelete,
    /// Daemon startup and shutdown
    SystemLifecycle,
    /// Configuration loaded or changed
    ConfigurationChange,
    /// Reservation checks and rebalancing outcomes
    TrafficEngineering,
    /// Flow-table programming on a switch
    FlowTableOperation,
    /// Error and failure events
    ErrorCondition,
    /// Operator-initiated actions
    AdminAction,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditCategory::ResourceCreate => "RESOURCE_CREATE",
            AuditCategory::ResourceModify => "RESOURCE_MODIFY",
            AuditCategory::ResourceDelete => "RESOURCE_DELETE",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::ConfigurationChange => "CONFIGURATION_CHANGE",
            AuditCategory::TrafficEngineering => "TRAFFIC_ENGINEERING",
            AuditCategory::FlowTableOperation => "FLOW_TABLE_OPERATION",
            AuditCategory::ErrorCondition => "ERROR_CONDITION",
            AuditCategory::AdminAction => "ADMIN_ACTION",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// A single audit event.
///
/// Built with the `with_*` methods and handed to [`audit_log!`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that raised the event, e.g. `RouteStore`.
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,

    /// Identity of the affected object, e.g. a route cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current UTC time.
    ///
    /// The outcome starts as `InProgress` until set explicitly.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as `Failure`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    /// Sends the record to the `audit` tracing target.
    pub fn emit(&self) {
        macro_rules! emit_at {
            ($level:expr, $record:ident) => {
                tracing::event!(
                    target: "audit",
                    $level,
                    category = %$record.category,
                    source = %$record.source,
                    action = %$record.action,
                    outcome = %$record.outcome,
                    object = $record.object_id.as_deref().unwrap_or("-"),
                    error = $record.error.as_deref().unwrap_or(""),
                    audit_json = %$record.to_json(),
                    "AUDIT: {} {} {} ({})",
                    $record.source,
                    $record.action,
                    $record.outcome,
                    $record.category
                )
            };
        }

        let record = self;
        match record.outcome {
            AuditOutcome::Success => emit_at!(Level::INFO, record),
            AuditOutcome::InProgress => emit_at!(Level::DEBUG, record),
            AuditOutcome::Failure | AuditOutcome::Denied => emit_at!(Level::WARN, record),
        }
    }

    /// Serialises the record for the `audit_json` field.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"error":"audit serialization failed: {}","action":"{}"}}"#,
                e, self.action
            )
        })
    }
}

/// Emits an [`AuditRecord`] at a level derived from its outcome.
///
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::ResourceCreate, "RouteStore", "add_route")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("17")
///     .with_object_type("route");
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::AuditRecord::emit(&$record)
    };
}

/// Installs a JSON `tracing` subscriber filtered by `RUST_LOG` or `log_level`.
///
/// Used instead of `env_logger` when the daemon runs with `--log-format json`.
pub fn init_json_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}
