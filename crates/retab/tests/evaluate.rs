//! End to end evaluation of in-memory file sets
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use retab::body_builder;
use retab::diagnostics::DiagnosticKind;
use retab::gen::GenBlockResult;
use retab::schema::{JsonSchema, Schema, SchemaError, SchemaLoader};
use retab::source::BodyBuilder;
use serde_json::json;

struct InlineSchemas(IndexMap<&'static str, serde_json::Value>);

impl SchemaLoader for InlineSchemas {
    fn load_schema(&self, reference: &str) -> Result<Box<dyn Schema>, SchemaError> {
        let schema = self
            .0
            .get(reference)
            .ok_or_else(|| SchemaError::Invalid(format!("unknown schema {reference}")))?;
        Ok(Box::new(JsonSchema::new(schema)?))
    }
}

fn generate(files: &BodyBuilder) -> Vec<GenBlockResult> {
    let (results, diags) = retab::evaluate(files, &IndexMap::new());
    assert!(!diags.has_errors(), "{diags}");
    results
}

#[test]
fn gen_blocks_reference_other_files() {
    let files = body_builder! {
        "ci.retab" => r#"
gen "ci" {
  path = "ci.yaml"
  data = {
    steps = [step.checkout, step.test]
  }
}
"#,
        "steps.retab" => r#"
step "test" {
  run = "cargo test"
}

step "checkout" {
  uses = "actions/checkout@v4"
}
"#,
    };

    let results = generate(&files);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, "ci.retab");
    assert_eq!(
        results[0].raw_output,
        json!({"steps": [{"uses": "actions/checkout@v4"}, {"run": "cargo test"}]})
    );
}

#[test]
fn declaration_order_does_not_matter() {
    let forward = body_builder!(
        r#"
gen "out" {
  path = "out.json"
  data = { greeting = "${prefix.value} world" }
}
prefix = { value = base }
base = "hello"
"#
    );
    let backward = body_builder!(
        r#"
base = "hello"
prefix = { value = base }
gen "out" {
  path = "out.json"
  data = { greeting = "${prefix.value} world" }
}
"#
    );

    let forward = generate(&forward);
    let backward = generate(&backward);
    assert_eq!(forward[0].raw_output, json!({"greeting": "hello world"}));
    assert_eq!(forward[0].raw_output, backward[0].raw_output);
}

#[test]
fn merged_keys_keep_declaration_order() {
    let files = body_builder!(
        r#"
base = {
  name = "base"
  image = "alpine"
}

gen "out" {
  path = "out.yaml"
  data = merge({ extra = 1 }, base, { image = "debian" })
}
"#
    );

    let results = generate(&files);
    assert_eq!(results[0].ordered_output.keys(), vec!["name", "extra", "image"]);
    assert_eq!(
        results[0].raw_output,
        json!({"name": "base", "extra": 1, "image": "debian"})
    );
}

#[test]
fn cyclic_references_report_diagnostics() {
    let files = body_builder!(
        r#"
a = b
b = a
gen "out" {
  path = "out.yaml"
  data = { value = a }
}
"#
    );

    let (results, diags) = retab::evaluate(&files, &IndexMap::new());
    assert!(results.is_empty());
    assert!(diags.has_errors());
    assert!(diags
        .errors()
        .all(|diag| diag.kind != DiagnosticKind::Structural));
}

#[test]
fn schema_violations_point_into_other_files() {
    let files = body_builder! {
        "ci.retab" => r#"
gen "ci" {
  path = "ci.json"
  schema = "steps"
  data = {
    steps = [step.checkout]
  }
}
"#,
        "steps.retab" => r#"
step "checkout" {
  uses = 4
}
"#,
    };

    let schema = json!({
        "properties": {
            "steps": {
                "type": "array",
                "items": {"properties": {"uses": {"type": "string"}}}
            }
        }
    });
    let loader = InlineSchemas(IndexMap::from([("steps", schema)]));

    let (results, diags) = retab::evaluate_with_loader(&files, &IndexMap::new(), &loader);
    assert_eq!(results.len(), 1);

    let errors: Vec<_> = diags.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, DiagnosticKind::Schema);
    let subject = errors[0].subject.as_ref().unwrap();
    assert_eq!(&*subject.filename, "steps.retab");
    assert_eq!((subject.start.line, subject.start.column), (3, 10));
}

#[test]
fn env_values_can_be_used() {
    let files = body_builder!(
        r#"
gen "out" {
  path = "out.yaml"
  data = { registry = env.REGISTRY }
}
"#
    );
    let env = IndexMap::from([("REGISTRY".to_string(), "ghcr.io".to_string())]);

    let (results, diags) = retab::evaluate(&files, &env);
    assert!(diags.is_empty(), "{diags}");
    assert_eq!(results[0].raw_output, json!({"registry": "ghcr.io"}));
}

#[test]
fn file_order_does_not_matter() {
    let gen_file = r#"gen "out.yaml" {
  path = "./out.yaml"
  data = { steps = [ref.checkout] }
}"#;
    let block = r#"ref "checkout" { name = "Checkout" }"#;

    let first = body_builder! { "a.retab" => gen_file, "b.retab" => block };
    let second = body_builder! { "b.retab" => block, "a.retab" => gen_file };

    for files in [first, second] {
        let results = generate(&files);
        assert_eq!(results[0].path, "out.yaml");
        assert_eq!(results[0].raw_output, json!({"steps": [{"name": "Checkout"}]}));
    }
}

#[test]
fn missing_blocks_are_never_empty() {
    let files = body_builder!(
        r#"
gen "out" {
  path = "out.yaml"
  data = { names = keys(allof("service")) }
}
"#
    );

    let (results, diags) = retab::evaluate(&files, &IndexMap::new());
    assert!(results.is_empty());
    assert!(diags
        .errors()
        .any(|diag| diag.detail.contains("block service not found")));
}

#[test]
fn missing_required_keys_point_at_the_object() {
    let files = body_builder!(
        r#"
gen "ci" {
  path = "ci.json"
  schema = "jobs"
  data = {
    jobs = {
      build = { runs-on = "ubuntu" }
    }
  }
}
"#
    );

    let schema = json!({
        "properties": {
            "jobs": {
                "additionalProperties": {"required": ["steps"]}
            }
        }
    });
    let loader = InlineSchemas(IndexMap::from([("jobs", schema)]));

    let (_, diags) = retab::evaluate_with_loader(&files, &IndexMap::new(), &loader);
    let errors: Vec<_> = diags.errors().collect();
    assert_eq!(errors.len(), 1);
    let subject = errors[0].subject.as_ref().unwrap();
    assert_eq!((subject.start.line, subject.start.column), (7, 15));
}

#[test]
fn builtins_decide_the_order_of_their_results() {
    let files = body_builder!(
        r#"
names = ["a", "b", "c"]

gen "out" {
  path = "out.yaml"
  data = {
    reversed = reverse([1, 2, 3])
    looped   = [for name in reverse(names) : upper(name)]
    sorted   = sort(["b", "c", "a"])
    merged   = merge({ first = 1 }, { second = 2 })
  }
}
"#
    );

    let results = generate(&files);
    assert_eq!(
        results[0].raw_output,
        json!({
            "reversed": [3, 2, 1],
            "looped": ["C", "B", "A"],
            "sorted": ["a", "b", "c"],
            "merged": {"first": 1, "second": 2},
        })
    );
    assert_eq!(
        results[0].ordered_output.keys(),
        vec!["reversed", "looped", "sorted", "merged"]
    );
}

#[test]
fn unrelated_blocks_do_not_change_the_output_order() {
    let gen_file = |unrelated: &str| {
        format!(
            r#"gen "out" {{
  path = "out.yaml"
  data = {{
    zeta  = "declared first"
    alpha = step.checkout
    mid   = [for n in ["c", "a", "b"] : n]
  }}
}}

{unrelated}
"#
        )
    };
    let steps_file = |unrelated: &str| {
        format!(
            r#"step "checkout" {{
  uses = "actions/checkout@v4"
  name = "Checkout"
}}

{unrelated}
"#
        )
    };

    let first = body_builder! {
        "gen.retab" => &gen_file("unrelated \"one\" { value = 1 }\nunrelated \"two\" { value = 2 }"),
        "steps.retab" => &steps_file("other \"b\" { x = 1 }\nother \"a\" { y = 2 }"),
    };
    let second = body_builder! {
        "steps.retab" => &steps_file("other \"a\" { y = 2 }\nother \"b\" { x = 1 }"),
        "gen.retab" => &gen_file("unrelated \"two\" { value = 2 }\nunrelated \"one\" { value = 1 }"),
    };

    let first = generate(&first);
    let second = generate(&second);

    let output = &first[0].ordered_output;
    assert_eq!(output.keys(), vec!["zeta", "alpha", "mid"]);
    assert_eq!(output.get("alpha").map(|alpha| alpha.keys()), Some(vec!["uses", "name"]));
    assert_eq!(first[0].raw_output["mid"], json!(["c", "a", "b"]));

    let bytes = first[0].encode().unwrap();
    assert_eq!(bytes, first[0].encode().unwrap());
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        String::from_utf8(second[0].encode().unwrap()).unwrap()
    );
}

#[test]
fn every_unexpected_key_is_reported() {
    let files = body_builder!(
        r#"
gen "ci" {
  path = "ci.json"
  schema = "closed"
  data = {
    name  = "ci"
    extra = 1
    other = 2
  }
}
"#
    );

    let schema = json!({
        "properties": {"name": {"type": "string"}},
        "additionalProperties": false
    });
    let loader = InlineSchemas(IndexMap::from([("closed", schema)]));

    let (_, diags) = retab::evaluate_with_loader(&files, &IndexMap::new(), &loader);
    let mut subjects: Vec<(usize, usize)> = diags
        .errors()
        .filter_map(|diag| diag.subject.as_ref())
        .map(|subject| (subject.start.line, subject.start.column))
        .collect();
    subjects.sort();
    assert_eq!(subjects, vec![(7, 5), (8, 5)]);
}
