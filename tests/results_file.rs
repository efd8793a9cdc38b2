//! Results merging and the on-disk results document working together.

use tema::metadata::ResultInterpret;
use tema::results::{
    exit_code, load_results, merge_custom_results, parse_results, save_results, Invocation,
    ResultGuest, ResultOutcome, TestResult,
};

fn invocation(name: &str, serial: u64) -> Invocation {
    Invocation {
        name: name.to_string(),
        serial_number: serial,
        outcome: Some(ResultOutcome::Pass),
        guest: Some(ResultGuest {
            name: Some("default-0".to_string()),
            role: None,
        }),
        fmf_id: None,
        start_time: Some("2026-08-02T10:00:00+00:00".to_string()),
        end_time: Some("2026-08-02T10:00:30+00:00".to_string()),
        duration: Some("00:00:30".to_string()),
        data_path: Some(format!("{}-{serial}/data", name.trim_start_matches('/'))),
        checks: Vec::new(),
    }
}

#[test]
fn custom_file_merge_lands_in_final_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.yaml");

    // The test wrote its own results file.
    let custom = parse_results(
        "- name: /\n  result: pass\n  duration: '00:99:99'\n- name: /sub\n  result: fail\n",
        false,
    )
    .unwrap();

    let (merged, warnings) =
        merge_custom_results(&invocation("/t", 1), Some(custom), ResultInterpret::Respect)
            .unwrap();
    assert!(warnings.is_empty());
    save_results(&path, &merged).unwrap();

    let loaded = load_results(&path).unwrap();
    assert_eq!(loaded.len(), 2);

    assert_eq!(loaded[0].name, "/t");
    assert_eq!(loaded[0].result, ResultOutcome::Pass);
    assert_eq!(loaded[0].duration.as_deref(), Some("00:00:30"));

    assert_eq!(loaded[1].name, "/t/sub");
    assert_eq!(loaded[1].result, ResultOutcome::Fail);
    assert_eq!(loaded[1].serial_number, Some(1));
    assert_eq!(
        loaded[1].guest.as_ref().and_then(|g| g.name.as_deref()),
        Some("default-0")
    );
}

#[test]
fn plan_outcome_and_exit_codes_from_merged_results() {
    let mut all = Vec::new();
    for (name, serial, outcome) in [
        ("/a", 1, ResultOutcome::Pass),
        ("/b", 2, ResultOutcome::Info),
        ("/c", 3, ResultOutcome::Warn),
    ] {
        let mut inv = invocation(name, serial);
        inv.outcome = Some(outcome);
        let (results, _) = merge_custom_results(&inv, None, ResultInterpret::Respect).unwrap();
        all.extend(results);
    }

    let outcomes: Vec<ResultOutcome> = all.iter().map(|r| r.result).collect();
    assert_eq!(
        ResultOutcome::reduce(outcomes.iter().copied()),
        Some(ResultOutcome::Warn)
    );
    assert_eq!(exit_code(&outcomes), 1);
}

#[test]
fn exit_code_scenarios() {
    use ResultOutcome::*;
    assert_eq!(exit_code(&[Info, Info]), 0);
    assert_eq!(exit_code(&[Info, Warn]), 1);
    assert_eq!(exit_code(&[Fail, Error]), 2);
    assert_eq!(exit_code(&[]), 3);
    assert_eq!(exit_code(&[Skip, Skip]), 4);
}

#[test]
fn read_modify_write_preserves_future_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.yaml");
    std::fs::write(
        &path,
        "- name: /t\n  result: pass\n  serial-number: 1\n  not-yet-invented: [1, 2]\n",
    )
    .unwrap();

    let mut results = load_results(&path).unwrap();
    results.push(TestResult::new("/u", ResultOutcome::Skip));
    save_results(&path, &results).unwrap();

    let reloaded = load_results(&path).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert!(reloaded[0].extra.contains_key("not-yet-invented"));
}

#[test]
fn json_and_yaml_carry_the_same_records() {
    let dir = tempfile::tempdir().unwrap();
    let yaml_path = dir.path().join("results.yaml");
    let json_path = dir.path().join("results.json");

    let (results, _) =
        merge_custom_results(&invocation("/t", 9), None, ResultInterpret::Respect).unwrap();
    save_results(&yaml_path, &results).unwrap();
    save_results(&json_path, &results).unwrap();

    assert_eq!(load_results(&yaml_path).unwrap(), load_results(&json_path).unwrap());
}
