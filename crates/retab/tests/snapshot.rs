//! Snapshot tests
//!
//! Evaluates each *.retab file in /tests/ individually and compares the
//! ordered output of its gen blocks, keyed by output path.
use indexmap::IndexMap;
use retab::source::BodyBuilder;
use retab::value::Value;

#[test]
fn snapshots() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("RETAB_LOG"))
        .with_writer(std::io::stderr)
        .try_init();

    insta::glob!("*.retab", |path| {
        let mut files = BodyBuilder::default();
        let source = std::fs::read_to_string(path).unwrap();
        let name = path.file_name().unwrap().to_string_lossy();
        files
            .insert(&name, &source, Some(path.to_owned()))
            .expect("must be valid hcl");

        let (results, diags) = retab::evaluate(&files, &IndexMap::new());
        assert!(!diags.has_errors(), "{diags}");

        let rendered = Value::Object(
            results
                .into_iter()
                .map(|result| (result.path, result.ordered_output))
                .collect(),
        );

        insta::assert_yaml_snapshot!(rendered);
    });
}
