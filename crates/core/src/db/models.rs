use serde::{Deserialize, Serialize};

use crate::analysis::{Cluster, ClusterReport, FaultedLibrary, Predicate, Verdict};
use crate::model::{Gap, IncompletenessReport};

/// RFC 3339 UTC timestamp used for every stored row.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// One `build` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRunRecord {
    /// Row id; `None` until stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub created_at: String,
    /// SHA-256 of the builder config file.
    pub config_hash: String,
    pub blob_path: String,
    pub complete: bool,
    pub gaps: Vec<Gap>,
}

impl BuildRunRecord {
    pub fn new(
        config_hash: impl Into<String>,
        blob_path: impl Into<String>,
        report: &IncompletenessReport,
    ) -> Self {
        Self {
            id: None,
            created_at: now_timestamp(),
            config_hash: config_hash.into(),
            blob_path: blob_path.into(),
            complete: report.is_empty(),
            gaps: report.gaps.clone(),
        }
    }
}

/// One analyzed run of a harness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub created_at: String,
    pub function: String,
    /// Free-form label identifying the engine run (e.g. a test case name).
    pub run_label: String,
    pub predicate: String,
    pub verdict: Verdict,
    pub clusters: Vec<Cluster>,
    pub faulted: Vec<FaultedLibrary>,
}

impl FindingRecord {
    pub fn new(
        function: impl Into<String>,
        run_label: impl Into<String>,
        predicate: &Predicate,
        report: &ClusterReport,
    ) -> Self {
        Self {
            id: None,
            created_at: now_timestamp(),
            function: function.into(),
            run_label: run_label.into(),
            predicate: predicate.to_string(),
            verdict: report.verdict,
            clusters: report.clusters.clone(),
            faulted: report.faulted.clone(),
        }
    }
}
