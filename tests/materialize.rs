//! End-to-end materialization: tree loading, context adjustment,
//! normalization and the policy rewrite working together.

use std::path::Path;

use tema::config::Overrides;
use tema::context::Context;
use tema::materialize::{materialize, Options};
use tema::metadata::SourceTag;
use tema::policy::Policy;
use tema::tree::Tree;

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
}

#[test]
fn tree_to_materialized_tests() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            (
                "main.fmf",
                "duration: 5m\ntag: [core]\n",
            ),
            (
                "smoke/main.fmf",
                "test: ./smoke.sh\ntag+: [smoke]\nadjust:\n  - when: distro < fedora-33\n    enabled: false\n    because: unsupported release\n",
            ),
            (
                "full/main.fmf",
                "test: ./full.sh\nduration: 1h\n",
            ),
        ],
    );

    let tree = Tree::load(dir.path()).unwrap();
    let options = Options {
        context: Context::from_pairs(&["distro=fedora-32"]).unwrap(),
        ..Options::default()
    };
    let output = materialize(&tree, &options);

    assert!(output.errors.is_empty());
    assert_eq!(output.tests.len(), 2);

    let smoke = output.tests.iter().find(|t| t.name() == "/smoke").unwrap();
    assert!(!smoke.enabled(), "adjust rule should disable on old distro");
    assert_eq!(smoke.tags(), ["core", "smoke"]);
    assert_eq!(smoke.duration().unwrap().seconds, 300);

    let full = output.tests.iter().find(|t| t.name() == "/full").unwrap();
    assert!(full.enabled());
    assert_eq!(full.duration().unwrap().seconds, 3600);
}

#[test]
fn adjustment_depends_only_on_context() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[(
            "t/main.fmf",
            "test: ./t.sh\nadjust:\n  - when: distro < fedora-33\n    enabled: false\n",
        )],
    );
    let tree = Tree::load(dir.path()).unwrap();

    let old = Options {
        context: Context::from_pairs(&["distro=fedora-32"]).unwrap(),
        ..Options::default()
    };
    let new = Options {
        context: Context::from_pairs(&["distro=fedora-40"]).unwrap(),
        ..Options::default()
    };

    assert!(!materialize(&tree, &old).tests[0].enabled());
    assert!(materialize(&tree, &new).tests[0].enabled());
    // Same inputs, same outputs.
    assert!(!materialize(&tree, &old).tests[0].enabled());
}

#[test]
fn policy_pass_rewrites_after_adjustment() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            ("t/main.fmf", "test: ./t.sh\ncheck: []\n"),
            (
                "policies/ci/checks.yaml",
                "test-policy:\n  - check: \"{% if 'avc' not in VALUE | map(attribute='how') %}- how: avc\\n  result: respect\\n{% endif %}\"\n",
            ),
        ],
    );

    let root = dir.path().join("policies");
    let path = tema::policy::resolve(None, Some("ci.checks"), Some(&root)).unwrap();
    let policy = Policy::load(&path).unwrap();

    let tree = Tree::load(dir.path()).unwrap();
    let options = Options {
        policy: Some(&policy),
        ..Options::default()
    };
    let output = materialize(&tree, &options);

    assert!(output.errors.is_empty());
    let test = &output.tests[0];
    assert_eq!(test.checks().len(), 1);
    assert_eq!(test.checks()[0].how, "avc");
    assert_eq!(test.source("check"), SourceTag::Policy);
}

#[test]
fn cli_overrides_beat_tree_data() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path(), &[("t/main.fmf", "test: ./t.sh\nduration: 1h\n")]);

    let mut overrides = Overrides::new();
    overrides.set_cli("duration", serde_yaml::Value::from("2m"));

    let tree = Tree::load(dir.path()).unwrap();
    let options = Options {
        overrides: Some(&overrides),
        ..Options::default()
    };
    let output = materialize(&tree, &options);

    let test = &output.tests[0];
    assert_eq!(test.duration().unwrap().seconds, 120);
    assert_eq!(test.source("duration"), SourceTag::Cli);
}

#[test]
fn broken_node_does_not_break_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[
            ("ok/main.fmf", "test: ./ok.sh\n"),
            (
                "broken/main.fmf",
                "test: ./broken.sh\nadjust:\n  - when: 'distro <'\n    enabled: false\n",
            ),
        ],
    );

    let tree = Tree::load(dir.path()).unwrap();
    let options = Options {
        context: Context::from_pairs(&["distro=fedora-40"]).unwrap(),
        ..Options::default()
    };
    let output = materialize(&tree, &options);

    assert_eq!(output.tests.len(), 1);
    assert_eq!(output.tests[0].name(), "/ok");
    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].0, "/broken");
    assert!(output.errors[0].1.to_string().contains("distro <"));
}

#[test]
fn materialized_output_is_plain_structured_data() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(
        dir.path(),
        &[(
            "t/main.fmf",
            "test: ./t.sh\nrequire: wget\nlink:\n  - verifies: /bugs/42\ncustom-key: kept\n",
        )],
    );

    let tree = Tree::load(dir.path()).unwrap();
    let output = materialize(&tree, &Options::default());
    let value = output.tests[0].to_value();
    let mapping = value.as_mapping().unwrap();

    // Scalar shorthand comes out as a sequence.
    let require = mapping.get(&serde_yaml::Value::from("require")).unwrap();
    assert!(require.is_sequence());
    // Links are explicit records.
    let link = mapping.get(&serde_yaml::Value::from("link")).unwrap();
    let first = link.as_sequence().unwrap()[0].as_mapping().unwrap();
    assert_eq!(
        first.get(&serde_yaml::Value::from("relation")),
        Some(&serde_yaml::Value::from("verifies"))
    );
    // Unknown keys survive.
    assert_eq!(
        mapping.get(&serde_yaml::Value::from("custom-key")),
        Some(&serde_yaml::Value::from("kept"))
    );
}
