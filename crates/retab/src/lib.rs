//! # retab - declarative document generation
//!
//! `retab` evaluates a directory of `.retab` files (HCL syntax) and writes the documents declared by their
//! `gen` blocks as YAML or JSON.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `retab` works internally.
//!
//! ### HCL Terms
//!
//! In hcl terms...
//! - a file gets parsed as a `body`
//! - ...which is just a list of `structures`
//! - ...where there are two kinds:
//!   - `attribute`: a "key = value" pair
//!   - or `block`:
//!     - 1 `identifier`
//!     - followed by 0 or more `labels`
//!     - and a `body` enclosed in `{` and `}`
//!
//! ```hcl
//! step "checkout" {
//!   uses = "actions/checkout@v4"
//! }
//!
//! gen "ci" {
//!   path = ".github/workflows/ci.yaml"
//!   data = {
//!     jobs = { build = { steps = [step.checkout] } }
//!   }
//! }
//! ```
//!
//! ### Loading files
//!
//! Every file is parsed into a [source::SourceFile] held by a [source::BodyBuilder]. Files are known by their
//! base name, which is also what diagnostics point at. At this point the files only have to be valid HCL.
//!
//! ### Evaluation
//!
//! see [engine::Evaluator]
//!
//! All top level blocks and attributes of all files share one namespace. Nothing is sorted topologically.
//! Instead every body is evaluated in passes until no more progress is made; whatever could not be resolved
//! yet is attempted again in the next pass.
//!
//! Results are stored in a [context::ContextTree], one node per key path. Each value carries
//! [marks::Mark]s: the source range it was produced at, lineage through `merge`, whether it was read from a
//! block that is not fully evaluated yet.
//!
//! Expressions are evaluated with [hcl::eval]. Function calls and `for` expressions are taken out of the
//! expression and evaluated first ([rewrite]) so the functions in [funcs] see marked values and user defined
//! `func` blocks ([userfunc]) can be called.
//!
//! ### Output
//!
//! [gen::evaluate_gen_blocks] collects the `data` of every `gen` block. [encode] orders object keys and list
//! elements by where they were declared. Documents referencing a `schema` are validated and violations are
//! mapped back to source ranges ([schema::location]).
//!
//! Problems with the input are never returned as errors but as [diagnostics::Diagnostics].
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::gen::GenBlockResult;
use crate::schema::{FileSchemaLoader, SchemaLoader};
use crate::source::{BodyBuilder, LoadError};
use indexmap::IndexMap;
use std::path::Path;

pub mod context;
pub mod diagnostics;
pub mod encode;
pub mod engine;
pub mod env;
pub mod funcs;
pub mod gen;
pub mod marks;
mod rewrite;
pub mod schema;
pub mod source;
pub mod userfunc;
mod util;
pub mod value;
mod visit;

/// Evaluate all files and collect the gen block results
///
/// Schemas are resolved relative to the current directory.
pub fn evaluate(
    files: &BodyBuilder,
    env: &IndexMap<String, String>,
) -> (Vec<GenBlockResult>, Diagnostics) {
    evaluate_with_loader(files, env, &FileSchemaLoader::new("."))
}

#[tracing::instrument(level = "debug", skip_all, fields(files = files.file_count()))]
pub fn evaluate_with_loader(
    files: &BodyBuilder,
    env: &IndexMap<String, String>,
    loader: &dyn SchemaLoader,
) -> (Vec<GenBlockResult>, Diagnostics) {
    let mut evaluator = engine::Evaluator::new(files, env);
    let mut diags = evaluator.run();

    let (results, gen_diags) = gen::evaluate_gen_blocks(&evaluator, loader);
    diags.extend(gen_diags);
    (results, diags)
}

/// Load all `.retab` files in `dir`, parse errors become diagnostics
pub fn load_directory(dir: &Path) -> Result<BodyBuilder, Diagnostics> {
    let mut files = BodyBuilder::default();
    files.load_directory(dir).map_err(|err| {
        let kind = match &err {
            LoadError::HclParseFailed(_) => DiagnosticKind::Parse,
            _ => DiagnosticKind::Structural,
        };
        Diagnostics::from(Diagnostic::error(
            kind,
            "unable to load files",
            format!("{}: {err}", dir.display()),
            None,
        ))
    })?;
    Ok(files)
}

/// Evaluate every `.retab` file in `dir` with `.env` and the process environment
pub fn evaluate_directory(dir: &Path) -> (Vec<GenBlockResult>, Diagnostics) {
    let files = match load_directory(dir) {
        Ok(files) => files,
        Err(diags) => return (vec![], diags),
    };

    let env = env::load_env(dir);
    evaluate_with_loader(&files, &env, &FileSchemaLoader::new(dir))
}
