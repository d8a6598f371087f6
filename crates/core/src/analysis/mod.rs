//! Equivalence clustering of per-library execution results.
//!
//! One run of a harness yields one value (or one engine fault) per library.
//! [`cluster`] partitions the library indices with a caller-supplied
//! equality predicate; [`analyze`] wraps it with fault isolation and a
//! verdict.
//!
//! The clustering is a single greedy pass: library `i` joins the cluster of
//! the first already-assigned `j` with `equal(i, j)`. This is only a true
//! partition when `equal` is an equivalence relation. With a non-transitive
//! predicate such as [`Predicate::Tolerance`] the result depends on input
//! order and may split or merge classes. Callers choosing such a predicate
//! accept that.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read results at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse results at {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("invalid predicate '{0}' (expected exact, tol:<eps> or prefix:<n>)")]
    InvalidPredicate(String),
    #[error("verifier message names unknown library '{0}'")]
    UnknownLibrary(String),
    #[error("verifier message does not mention library '{0}'")]
    MissingLibrary(String),
}

/// Fault reported by the execution engine for one library's wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFault {
    /// Engine category, e.g. `ptr` or `abort`.
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Value(serde_json::Value),
    Fault(EngineFault),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub library: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ExecutionResult {
    pub fn value(library: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self { library: library.into(), outcome: Outcome::Value(value.into()) }
    }

    pub fn fault(library: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            outcome: Outcome::Fault(EngineFault { kind: kind.into(), message: message.into() }),
        }
    }
}

/// All results of one run, index = library index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultVector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub results: Vec<ExecutionResult>,
}

impl ResultVector {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self { function: None, results }
    }

    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let body = std::fs::read_to_string(path)
            .map_err(|source| AnalysisError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&body).map_err(|source| AnalysisError::Parse { path: path.to_path_buf(), source })
    }
}

/// `index -> representative index` for every clustered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    representatives: Vec<usize>,
}

impl ClusterAssignment {
    pub fn representative(&self, index: usize) -> Option<usize> {
        self.representatives.get(index).copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.representatives
    }

    pub fn len(&self) -> usize {
        self.representatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representatives.is_empty()
    }

    /// Clusters as `(representative, members)`, ordered by representative.
    pub fn clusters(&self) -> Vec<(usize, Vec<usize>)> {
        let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, rep) in self.representatives.iter().enumerate() {
            grouped.entry(*rep).or_default().push(index);
        }
        grouped.into_iter().collect()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters().len()
    }
}

/// Greedy first-match clustering over `n` items. Calls `equal` O(n²) times.
pub fn cluster(n: usize, mut equal: impl FnMut(usize, usize) -> bool) -> ClusterAssignment {
    let mut assigned: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        if assigned[i].is_some() {
            continue;
        }
        let mut found = None;
        for j in 0..n {
            if j == i {
                continue;
            }
            if let Some(rep) = assigned[j] {
                if equal(i, j) {
                    found = Some(rep);
                    break;
                }
            }
        }
        assigned[i] = Some(found.unwrap_or(i));
    }
    ClusterAssignment { representatives: assigned.into_iter().enumerate().map(|(i, r)| r.unwrap_or(i)).collect() }
}

/// Equality used to compare two libraries' return values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Predicate {
    #[default]
    Exact,
    /// `|a - b| <= eps` on numbers. Not transitive.
    Tolerance(f64),
    /// First `n` elements of arrays or characters of strings, like the
    /// driver's byte-buffer comparison.
    Prefix(usize),
}

impl Predicate {
    pub fn equal(&self, a: &serde_json::Value, b: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            Predicate::Exact => a == b,
            Predicate::Tolerance(eps) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() <= *eps,
                _ => a == b,
            },
            Predicate::Prefix(n) => match (a, b) {
                (Value::Array(x), Value::Array(y)) => {
                    x.len().min(*n) == y.len().min(*n) && x.iter().zip(y).take(*n).all(|(l, r)| l == r)
                }
                (Value::String(x), Value::String(y)) => x.chars().take(*n).eq(y.chars().take(*n)),
                _ => a == b,
            },
        }
    }
}

impl FromStr for Predicate {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AnalysisError::InvalidPredicate(s.to_string());
        match s.split_once(':') {
            None if s == "exact" => Ok(Predicate::Exact),
            Some(("tol", eps)) => {
                let eps: f64 = eps.parse().map_err(|_| invalid())?;
                if eps.is_finite() && eps >= 0.0 {
                    Ok(Predicate::Tolerance(eps))
                } else {
                    Err(invalid())
                }
            }
            Some(("prefix", n)) => n.parse().map(Predicate::Prefix).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Exact => write!(f, "exact"),
            Predicate::Tolerance(eps) => write!(f, "tol:{eps}"),
            Predicate::Prefix(n) => write!(f, "prefix:{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Agreement,
    Divergence,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Agreement => "agreement",
            Verdict::Divergence => "divergence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub representative: String,
    /// Library ids, in result order.
    pub members: Vec<String>,
    /// Indices into the result vector.
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultedLibrary {
    pub library: String,
    pub index: usize,
    pub fault: EngineFault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub verdict: Verdict,
    pub clusters: Vec<Cluster>,
    /// Each faulted library is a class of its own and takes no part in clustering.
    pub faulted: Vec<FaultedLibrary>,
}

impl ClusterReport {
    pub fn has_faults(&self) -> bool {
        !self.faulted.is_empty()
    }

    /// Report for an assignment over `libs`, e.g. one parsed from a verifier message.
    pub fn from_assignment(assignment: &ClusterAssignment, libs: &[String]) -> Self {
        let name = |i: usize| libs.get(i).cloned().unwrap_or_else(|| format!("#{i}"));
        let clusters: Vec<Cluster> = assignment
            .clusters()
            .into_iter()
            .map(|(rep, members)| Cluster {
                representative: name(rep),
                members: members.iter().map(|m| name(*m)).collect(),
                indices: members,
            })
            .collect();
        let verdict = if clusters.len() > 1 { Verdict::Divergence } else { Verdict::Agreement };
        ClusterReport { verdict, clusters, faulted: Vec::new() }
    }
}

impl fmt::Display for ClusterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verdict: {} ({} cluster(s))", self.verdict.as_str(), self.clusters.len())?;
        for cluster in &self.clusters {
            writeln!(f, "- [{}] {}", cluster.representative, cluster.members.join(", "))?;
        }
        for faulted in &self.faulted {
            writeln!(f, "- fault {}: {} {}", faulted.library, faulted.fault.kind, faulted.fault.message)?;
        }
        Ok(())
    }
}

/// Cluster the non-faulted results of one run.
pub fn analyze(results: &ResultVector, predicate: &Predicate) -> ClusterReport {
    let mut values = Vec::new();
    let mut faulted = Vec::new();
    for (index, result) in results.results.iter().enumerate() {
        match &result.outcome {
            Outcome::Value(value) => values.push((index, result.library.as_str(), value)),
            Outcome::Fault(fault) => {
                tracing::warn!(library = %result.library, kind = %fault.kind, "engine fault");
                faulted.push(FaultedLibrary { library: result.library.clone(), index, fault: fault.clone() });
            }
        }
    }

    let assignment = cluster(values.len(), |i, j| predicate.equal(values[i].2, values[j].2));
    let clusters: Vec<Cluster> = assignment
        .clusters()
        .into_iter()
        .map(|(rep, members)| Cluster {
            representative: values[rep].1.to_string(),
            members: members.iter().map(|m| values[*m].1.to_string()).collect(),
            indices: members.iter().map(|m| values[*m].0).collect(),
        })
        .collect();

    let verdict = if clusters.len() > 1 { Verdict::Divergence } else { Verdict::Agreement };
    tracing::debug!(clusters = clusters.len(), faulted = faulted.len(), predicate = %predicate, "clustered results");
    ClusterReport { verdict, clusters, faulted }
}

/// Rebuild the assignment from a driver abort message (`<lib>:<representative>` lines).
///
/// Only lines whose two halves are library ids and whose left half names one
/// of `libs` are read; engine decoration around the message is ignored. A
/// known library pointing at an unknown representative is an error.
pub fn parse_verifier_message(text: &str, libs: &[String]) -> Result<ClusterAssignment, AnalysisError> {
    let index_of = |name: &str| libs.iter().position(|l| l == name);
    let mut representatives: Vec<Option<usize>> = vec![None; libs.len()];
    for line in text.lines() {
        let Some((lib, rep)) = line.trim().split_once(':') else {
            continue;
        };
        if naming::validate_library_id(lib).is_err() || naming::validate_library_id(rep).is_err() {
            continue;
        }
        let Some(lib_index) = index_of(lib) else {
            continue;
        };
        let rep_index = index_of(rep).ok_or_else(|| AnalysisError::UnknownLibrary(rep.to_string()))?;
        representatives[lib_index] = Some(rep_index);
    }
    let representatives = representatives
        .into_iter()
        .zip(libs)
        .map(|(rep, lib)| rep.ok_or_else(|| AnalysisError::MissingLibrary(lib.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ClusterAssignment { representatives })
}
