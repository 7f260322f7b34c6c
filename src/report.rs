use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::config::CheckDescriptor;

/// The outcome of one executed check. Borrows the descriptor it was produced for.
#[derive(Debug, Clone)]
pub struct Report<'a> {
    ok: bool,
    msg: String,
    check: &'a CheckDescriptor,
    timestamp: SystemTime,
}

impl<'a> Report<'a> {
    pub fn new(ok: bool, msg: impl Into<String>, check: &'a CheckDescriptor) -> Self {
        Report {
            ok,
            msg: msg.into(),
            check,
            timestamp: SystemTime::now(),
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    pub fn check(&self) -> &'a CheckDescriptor {
        self.check
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// Renders as `PASS <label> <msg>` or `FAIL <label> <msg>`.
impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            if self.ok { "PASS" } else { "FAIL" },
            self.check.label(),
            self.msg
        )
    }
}

impl Serialize for Report<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timestamp = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let mut state = serializer.serialize_struct("Report", 5)?;
        state.serialize_field("ok", &self.ok)?;
        state.serialize_field("msg", &self.msg)?;
        state.serialize_field("url", &self.check.url)?;
        state.serialize_field("plugin", &self.check.plugin_name)?;
        state.serialize_field("timestamp", &timestamp)?;
        state.end()
    }
}

/// Aggregate view over the reports of one run.
pub struct Summary<'r, 'a> {
    reports: &'r [Report<'a>],
}

impl<'r, 'a> Summary<'r, 'a> {
    pub fn new(reports: &'r [Report<'a>]) -> Self {
        Summary { reports }
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| !r.ok()).count()
    }

    pub fn all_ok(&self) -> bool {
        self.failed() == 0
    }

    /// Returns one line per report, in run order.
    pub fn to_text(&self) -> String {
        self.reports
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self.reports)
    }
}

impl fmt::Display for Summary<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} checks, {} failed", self.total(), self.failed())
    }
}
