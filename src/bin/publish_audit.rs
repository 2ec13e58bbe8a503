//! Publish Audit Binary
//!
//! Runs the drift auditor against a document store and prints the report as
//! JSON on stdout. Logs go to stderr.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PUBLISH_ROOT_DIR`: store root (default: `content`)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Exit Status
//!
//! `0` when clean, `2` when drift was found, `1` when the audit failed.
//!
//! ## Usage
//!
//! ```bash
//! PUBLISH_ROOT_DIR=./content LOG_FORMAT=pretty cargo run --bin publish_audit
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use publish_kernel::{DriftAuditor, NoOpMetrics, OsBackend, StoreConfig};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "publish_audit=info,publish_kernel=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn main() -> ExitCode {
    init_tracing();

    let config = StoreConfig::from_env();
    info!(root = %config.root().display(), "starting drift audit");

    let auditor = DriftAuditor::new(&config, Arc::new(OsBackend::new()), Arc::new(NoOpMetrics));
    let report = match auditor.audit() {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, kind = e.kind(), "audit failed");
            return ExitCode::from(1);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!(error = %e, "failed to serialize report");
            return ExitCode::from(1);
        }
    }

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        info!(findings = report.findings(), "drift found");
        ExitCode::from(2)
    }
}
