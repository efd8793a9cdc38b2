//! The results model: typed, serializable records of test execution.
//!
//! Results round-trip through `results.yaml` / `results.json` with stable
//! semantics; unknown fields are preserved on read-modify-write.  The merger
//! folds per-test custom result files into the plan's final results, and the
//! outcome algebra reduces results to plan and run outcomes and exit codes.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result, Warning};
use crate::metadata::ResultInterpret;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Outcome of a single result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultOutcome {
    Pass,
    Fail,
    Info,
    Warn,
    Error,
    Skip,
}

impl ResultOutcome {
    /// Position in the reduction ordering `pass < info < warn < fail <
    /// error`; higher wins.  `skip` sits outside the ordering.
    fn severity(self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Info => 1,
            Self::Warn => 2,
            Self::Fail => 3,
            Self::Error => 4,
            Self::Skip => 0,
        }
    }

    /// Reduce a set of outcomes to one.
    ///
    /// `skip` is absorbing only if every entry is `skip`; otherwise the
    /// most severe non-skip outcome wins.  An empty set reduces to nothing.
    pub fn reduce(outcomes: impl IntoIterator<Item = Self>) -> Option<Self> {
        let outcomes: Vec<Self> = outcomes.into_iter().collect();
        if outcomes.is_empty() {
            return None;
        }
        let non_skip: Vec<Self> = outcomes
            .iter()
            .copied()
            .filter(|o| *o != Self::Skip)
            .collect();
        if non_skip.is_empty() {
            return Some(Self::Skip);
        }
        non_skip.into_iter().max_by_key(|o| o.severity())
    }

    /// Apply a test's outcome-interpretation policy.
    ///
    /// Returns the interpreted outcome plus a note recording the original
    /// one whenever interpretation changed it.
    pub fn interpret(self, policy: ResultInterpret) -> (Self, Option<String>) {
        let interpreted = match policy {
            ResultInterpret::Respect => self,
            ResultInterpret::Xfail => match self {
                Self::Pass => Self::Fail,
                Self::Fail => Self::Pass,
                other => other,
            },
            ResultInterpret::Pass => Self::Pass,
            ResultInterpret::Fail => Self::Fail,
            ResultInterpret::Info => Self::Info,
        };
        if interpreted == self {
            (self, None)
        } else {
            (interpreted, Some(format!("original result: {}", spell(self))))
        }
    }
}

fn spell(outcome: ResultOutcome) -> &'static str {
    match outcome {
        ResultOutcome::Pass => "pass",
        ResultOutcome::Fail => "fail",
        ResultOutcome::Info => "info",
        ResultOutcome::Warn => "warn",
        ResultOutcome::Error => "error",
        ResultOutcome::Skip => "skip",
    }
}

/// Exit code for a whole run.
///
/// `0`: at least one pass, no fail/warn/error.  `1`: fail or warn, no
/// error.  `2`: error occurred.  `3`: no results.  `4`: all skipped.
pub fn exit_code(outcomes: &[ResultOutcome]) -> i32 {
    if outcomes.is_empty() {
        return 3;
    }
    if outcomes.contains(&ResultOutcome::Error) {
        return 2;
    }
    if outcomes
        .iter()
        .any(|o| matches!(o, ResultOutcome::Fail | ResultOutcome::Warn))
    {
        return 1;
    }
    if outcomes.iter().all(|o| *o == ResultOutcome::Skip) {
        return 4;
    }
    0
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Guest the test ran on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultGuest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Identity of the test's source node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FmfId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Outcome of a single test check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCheck {
    pub name: String,
    pub result: ResultOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// One record of the results document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub result: ResultOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<BTreeMap<String, String>>,
    #[serde(rename = "start-time", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(rename = "end-time", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(rename = "serial-number", default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<ResultGuest>,
    #[serde(rename = "data-path", default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmf_id: Option<FmfId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check: Vec<ResultCheck>,
    /// Fields this build does not know; preserved on read-modify-write.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, result: ResultOutcome) -> Self {
        Self {
            name: name.into(),
            result,
            note: Vec::new(),
            log: Vec::new(),
            ids: None,
            start_time: None,
            end_time: None,
            duration: None,
            serial_number: None,
            guest: None,
            data_path: None,
            fmf_id: None,
            check: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Runner-observed facts about one executed test.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub name: String,
    pub serial_number: u64,
    pub outcome: Option<ResultOutcome>,
    pub guest: Option<ResultGuest>,
    pub fmf_id: Option<FmfId>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<String>,
    /// Test data directory, relative to the plan's results-file directory.
    pub data_path: Option<String>,
    pub checks: Vec<ResultCheck>,
}

impl Invocation {
    /// Synthesize a result from runner observation alone.
    pub fn to_result(&self, interpret: ResultInterpret) -> TestResult {
        let mut outcome = self.outcome.unwrap_or(ResultOutcome::Error);
        let mut notes = Vec::new();

        // A failing check drags the test outcome down with it.
        for check in &self.checks {
            if matches!(check.result, ResultOutcome::Fail | ResultOutcome::Error)
                && matches!(outcome, ResultOutcome::Pass | ResultOutcome::Info)
            {
                outcome = ResultOutcome::Fail;
                notes.push(format!("check '{}' failed", check.name));
            }
        }

        let (outcome, note) = outcome.interpret(interpret);
        notes.extend(note);

        let mut result = TestResult::new(self.name.clone(), outcome);
        result.note = notes;
        result.start_time = self.start_time.clone();
        result.end_time = self.end_time.clone();
        result.duration = self.duration.clone();
        result.serial_number = Some(self.serial_number);
        result.guest = self.guest.clone();
        result.fmf_id = self.fmf_id.clone();
        result.data_path = self.data_path.clone();
        result.check = self.checks.clone();
        result
    }
}

/// Merge a test's custom result file into the plan's results.
///
/// Every custom entry contributes one result, its name prefixed by the
/// parent test's name; `name: /` stands for the parent test itself.  The
/// runner-observed identity fields always win; for the parent entry the
/// timing fields do too.  Log paths are rebased from the test's data
/// directory to the results-file directory.
pub fn merge_custom_results(
    invocation: &Invocation,
    custom: Option<Vec<TestResult>>,
    interpret: ResultInterpret,
) -> Result<(Vec<TestResult>, Vec<Warning>)> {
    let mut warnings = Vec::new();

    let Some(entries) = custom else {
        return Ok((vec![invocation.to_result(interpret)], warnings));
    };

    if entries.is_empty() {
        let mut result = invocation.to_result(interpret);
        result.result = ResultOutcome::Error;
        result.note.push("no custom results were provided".to_string());
        return Ok((vec![result], warnings));
    }

    let mut merged = Vec::new();
    for mut entry in entries {
        let is_parent = entry.name == "/";
        if is_parent {
            entry.name = invocation.name.clone();
        } else {
            if !entry.name.starts_with('/') {
                entry.note.push("custom result name should start with '/'".to_string());
                warnings.push(Warning::new(format!(
                    "custom result name '{}' under '{}' should start with '/'",
                    entry.name, invocation.name
                )));
                entry.name.insert(0, '/');
            }
            entry.name = format!("{}{}", invocation.name, entry.name);
        }

        // Identity always reflects the runner's view.
        entry.serial_number = Some(invocation.serial_number);
        entry.guest = invocation.guest.clone();
        entry.fmf_id = invocation.fmf_id.clone();

        // Rebase log paths from the test data directory.
        if let Some(data_path) = &invocation.data_path {
            entry.log = entry
                .log
                .iter()
                .map(|log| format!("{data_path}/{log}"))
                .collect();
        }

        if is_parent {
            entry.start_time = invocation.start_time.clone();
            entry.end_time = invocation.end_time.clone();
            entry.duration = invocation.duration.clone();
            entry.data_path = invocation.data_path.clone();

            let (outcome, note) = entry.result.interpret(interpret);
            entry.result = outcome;
            entry.note.extend(note);
        }

        merged.push(entry);
    }

    Ok((merged, warnings))
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Load a results document; the format follows the file extension.
pub fn load_results(path: &Path) -> Result<Vec<TestResult>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::result_file(format!("cannot read {}: {e}", path.display())))?;
    parse_results(&content, is_json(path))
}

/// Parse a results document from text.
pub fn parse_results(content: &str, json: bool) -> Result<Vec<TestResult>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    if json {
        serde_json::from_str(content)
            .map_err(|e| Error::result_file(format!("malformed results document: {e}")))
    } else {
        serde_yaml::from_str(content)
            .map_err(|e| Error::result_file(format!("malformed results document: {e}")))
    }
}

/// Write a results document atomically.
pub fn save_results(path: &Path, results: &[TestResult]) -> Result<()> {
    let contents = if is_json(path) {
        let mut s = serde_json::to_string_pretty(results)?;
        s.push('\n');
        s
    } else {
        serde_yaml::to_string(results)?
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| {
        Error::result_file(format!(
            "failed to persist results to {}: {}",
            path.display(),
            err.error
        ))
    })?;

    Ok(())
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Render a duration as `hh:mm:ss`.
pub fn format_duration(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Duration between two ISO-8601 timestamps, as `hh:mm:ss`.
pub fn duration_between(start: &str, end: &str) -> Result<String> {
    let start = DateTime::parse_from_rfc3339(start)
        .map_err(|e| Error::result_file(format!("invalid start time '{start}': {e}")))?;
    let end = DateTime::parse_from_rfc3339(end)
        .map_err(|e| Error::result_file(format!("invalid end time '{end}': {e}")))?;
    let seconds = (end - start).num_seconds();
    if seconds < 0 {
        return Err(Error::result_file(format!(
            "end time '{end}' precedes start time '{start}'"
        )));
    }
    Ok(format_duration(seconds as u64))
}
