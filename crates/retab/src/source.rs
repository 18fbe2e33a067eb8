//! collection of parsed source files ([Body] per logical file name)
//!
//! [BodyBuilder] tracks
//! - the sanitized file name (used for cross-file lookups and diagnostics)
//! - the original path, if loaded from disk
//! - a line index to turn parser byte spans into [SourceRange]s
//!
//! Files are kept sorted by name so evaluation does not depend on load order.
use hcl_edit::structure::{Block, Body, Structure};
use hcl_edit::Span;
use indexmap::IndexMap;
use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const FILE_EXTENSION: &str = ".retab";

/// A position inside a source file. `line` and `column` start at 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRange {
    pub filename: Arc<str>,
    pub start: Pos,
    pub end: Pos,
}

impl SourceRange {
    pub fn new(filename: impl Into<Arc<str>>, start: Pos, end: Pos) -> Self {
        Self {
            filename: filename.into(),
            start,
            end,
        }
    }

    /// Zero width range at the very beginning of a file
    pub fn file_start(filename: impl Into<Arc<str>>) -> Self {
        let start = Pos {
            line: 1,
            column: 1,
            byte: 0,
        };
        Self::new(filename, start, start)
    }

    /// Total order by position: line, column, then file name and end position
    pub fn cmp_position(&self, other: &Self) -> std::cmp::Ordering {
        (self.start.line, self.start.column)
            .cmp(&(other.start.line, other.start.column))
            .then_with(|| self.filename.cmp(&other.filename))
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl Display for SourceRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{},{}-{},{}",
            self.filename, self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

#[derive(Debug, Clone)]
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(index, _)| index + 1));
        Self { starts }
    }

    fn pos(&self, byte: usize) -> Pos {
        let line = match self.starts.binary_search(&byte) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        };

        Pos {
            line: line + 1,
            column: byte - self.starts[line] + 1,
            byte,
        }
    }
}

/// A single parsed file
#[derive(Debug)]
pub struct SourceFile {
    name: Arc<str>,
    path: Option<PathBuf>,
    lines: LineIndex,
    body: Body,
}

impl SourceFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn range(&self, span: Option<Range<usize>>) -> Option<SourceRange> {
        let span = span?;
        Some(SourceRange::new(
            self.name.clone(),
            self.lines.pos(span.start),
            self.lines.pos(span.end),
        ))
    }

    /// Range of a parsed element, or the start of the file for synthesized elements
    pub fn range_of(&self, node: &impl Span) -> SourceRange {
        self.range(node.span())
            .unwrap_or_else(|| SourceRange::file_start(self.name.clone()))
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.body.iter().filter_map(|structure| match structure {
            Structure::Block(block) => Some(block),
            Structure::Attribute(_) => None,
        })
    }
}

#[derive(Default, Debug)]
pub struct BodyBuilder {
    files: IndexMap<Arc<str>, SourceFile>,
}

impl BodyBuilder {
    /// Parses and inserts a document under its sanitized name
    pub fn insert(
        &mut self,
        name: &str,
        source: &str,
        path: impl Into<Option<PathBuf>>,
    ) -> Result<(), LoadError> {
        let name: Arc<str> = sanitize_file_name(name).into();
        if self.files.contains_key(&name) {
            return Err(LoadError::DuplicateFile(name.to_string()));
        }

        let body = hcl_edit::parser::parse_body(source)?;
        tracing::debug!(file = %name, "inserted file");

        self.files.insert(
            name.clone(),
            SourceFile {
                name,
                path: path.into(),
                lines: LineIndex::new(source),
                body,
            },
        );
        self.files.sort_keys();
        Ok(())
    }

    pub fn load_file(&mut self, file_path: &Path) -> Result<(), LoadError> {
        let file_path = file_path.canonicalize()?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path)?;
        let name = file_path.to_string_lossy().to_string();
        self.insert(&name, &file_contents, Some(file_path))
    }

    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let mut any_files_loaded = false;

        let mut entries = std::fs::read_dir(dir_path)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for dir_entry in entries {
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            let is_retab_file = dir_entry
                .file_name()
                .to_string_lossy()
                .ends_with(FILE_EXTENSION);
            if !is_retab_file {
                continue;
            }

            self.load_file(&dir_entry.path())?;
            any_files_loaded = true;
        }

        if !any_files_loaded {
            return Err(LoadError::NoFilesFound);
        }

        Ok(())
    }

    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values()
    }

    pub fn file(&self, name: &str) -> Option<&SourceFile> {
        self.files.get(name)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|name| name.as_ref())
    }

    /// All top level blocks of the given type across all files
    pub fn blocks_of_type<'a>(
        &'a self,
        ident: &'a str,
    ) -> impl Iterator<Item = (&'a SourceFile, &'a Block)> + 'a {
        self.files().flat_map(move |file| {
            file.blocks()
                .filter(move |block| block.ident.as_str() == ident)
                .map(move |block| (file, block))
        })
    }

    /// Find the top level block that was parsed at `range`
    pub fn find_block(&self, range: &SourceRange) -> Option<(&SourceFile, &Block)> {
        let file = self.file(&range.filename)?;
        file.blocks()
            .find(|block| file.range(block.span()).as_ref() == Some(range))
            .map(|block| (file, block))
    }
}

/// Logical file name: the base name, always ending in `.retab`
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|base| base.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());

    if base.ends_with(FILE_EXTENSION) {
        base
    } else {
        format!("{base}{FILE_EXTENSION}")
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No files found in directory")]
    NoFilesFound,
    #[error("file {0} was loaded twice")]
    DuplicateFile(String),
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse hcl file: {0}")]
    HclParseFailed(#[from] hcl_edit::parser::Error),
}

/// Utility macro to create a [BodyBuilder]
///
/// Create from a single document (named `main.retab`)
/// ```
/// # use retab::body_builder;
/// body_builder!("attribute = 42");
/// ```
///
/// Create from multiple documents
/// ```
/// # use retab::body_builder;
/// body_builder! {
///   "one.retab" => "attribute_one = 1",
///   "two" => "attribute_two = 2"
/// };
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use retab::body_builder;
/// body_builder!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! body_builder {
    // single document
    { $expr:expr } => {
        $crate::body_builder! { "main.retab" => $expr }
    };
    // multiple named documents
    { $($name:expr => $expr:expr),+ $(,)? } => {{
        let mut files = $crate::source::BodyBuilder::default();
        $(
            files.insert($name, $expr, None).expect("source must parse");
        )+
        files
    }};
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn file_names_are_sanitized_and_sorted() {
        let files = body_builder! {
            "dir/zeta" => "a = 1",
            "alpha.retab" => "b = 2",
        };

        assert_eq!(
            files.file_names().collect::<Vec<_>>(),
            vec!["alpha.retab", "zeta.retab"]
        );
    }

    #[test]
    fn duplicate_file_names_are_rejected() {
        let mut files = BodyBuilder::default();
        files.insert("a.retab", "", None).unwrap();
        let err = files.insert("other/a", "", None).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateFile(name) if name == "a.retab"));
    }

    #[test]
    fn ranges_use_lines_and_columns() {
        let files = body_builder!("one = 1\n  two = 2\n");
        let file = files.file("main.retab").unwrap();
        let attribute = file.body().attributes().nth(1).unwrap();
        let range = file.range_of(&attribute.key);

        assert_eq!(range.start.line, 2);
        assert_eq!(range.start.column, 3);
        assert_eq!(range.end.column, 6);
        assert_eq!(range.to_string(), "main.retab:2,3-2,6");
    }

    #[test]
    fn blocks_of_type_spans_files() {
        let files = body_builder! {
            "a" => "step \"one\" {}\nother {}",
            "b" => "step \"two\" {}",
        };

        let labels: Vec<_> = files
            .blocks_of_type("step")
            .map(|(file, block)| (file.name().to_string(), block.labels[0].as_str().to_string()))
            .collect();

        assert_eq!(
            labels,
            vec![
                ("a.retab".to_string(), "one".to_string()),
                ("b.retab".to_string(), "two".to_string())
            ]
        );
    }
}
