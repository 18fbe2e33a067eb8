//! fixed-point evaluation of all files
//!
//! Blocks may reference each other in any order and across files. Instead of building a dependency graph
//! every body is evaluated in passes ([converge]): each pass attempts every attribute and block that is not
//! resolved yet. Whatever fails because something it needs is not there yet is retried in the next pass.
//! Evaluation stops once a pass makes no more progress.
//!
//! Values are committed into the [ContextTree]. Expressions read them back as variables:
//!
//! - variables bound by the current scope (loop variables, function parameters)
//! - top level blocks and attributes of all files (the current file wins on conflicts)
//! - `env`, the environment passed in by the caller
//!
//! Simple references like `step.checkout.name` are resolved directly against the tree so the result keeps its
//! provenance marks. Everything else is handed to [hcl::eval] after function calls and `for` expressions
//! were evaluated separately, see [crate::rewrite].
use crate::context::{BlockInfo, ContextTree, Meta, NodeId, FILES_KEY, TEMPORARY_PREFIX};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::funcs::{self, FuncError, ScopedFunction};
use crate::marks::{Mark, MarkedValue, ValueKind};
use crate::source::{BodyBuilder, SourceFile, SourceRange};
use crate::userfunc::{decode_user_functions, UserFunction, FUNC_BLOCK};
use crate::util::TraversalExt;
use crate::visit::VisitTraversalsMut;
use hcl::eval::Evaluate;
use hcl_edit::expr::Expression;
use hcl_edit::structure::{Attribute, Block, Body, Structure};
use indexmap::IndexMap;
use std::rc::Rc;

pub const GEN_BLOCK: &str = "gen";
pub const ENV_VARIABLE: &str = "env";
/// Key a temporary node stores its single value under
const VALUE_KEY: &str = "value";
const WARMUP_PASSES: usize = 3;
const MAX_CALL_DEPTH: usize = 32;

/// Variables and functions visible to one expression
#[derive(Debug, Clone)]
pub(crate) struct Scope<'s> {
    pub file: &'s SourceFile,
    pub variables: IndexMap<String, MarkedValue>,
    pub functions: IndexMap<String, ScopedFunction>,
    pub depth: usize,
}

impl<'s> Scope<'s> {
    pub fn new(file: &'s SourceFile) -> Self {
        Self {
            file,
            variables: Default::default(),
            functions: Default::default(),
            depth: 0,
        }
    }
}

/// An expression that gets committed into the tree under `name`
#[derive(derive_new::new)]
pub(crate) struct Attr<'e> {
    pub name: String,
    pub expr: &'e Expression,
    pub range: SourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    File,
    Block,
    Gen,
}

enum Item<'b> {
    Attribute(&'b Attribute),
    Block(&'b Block),
}

pub struct Evaluator<'a> {
    pub(crate) files: &'a BodyBuilder,
    pub(crate) tree: ContextTree,
    files_node: NodeId,
    env: MarkedValue,
    temporaries: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(files: &'a BodyBuilder, env: &IndexMap<String, String>) -> Self {
        let mut tree = ContextTree::new(SourceRange::file_start(""));
        let root = tree.root();
        let files_node = tree.new_child(root, FILES_KEY, Meta::Name(SourceRange::file_start("")));

        let env = MarkedValue::object(
            env.iter()
                .map(|(key, value)| (key.clone(), MarkedValue::from(value.as_str())))
                .collect(),
        );

        Self {
            files,
            tree,
            files_node,
            env,
            temporaries: 0,
        }
    }

    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    pub fn files(&self) -> &'a BodyBuilder {
        self.files
    }

    pub fn file_node(&self, name: &str) -> Option<NodeId> {
        self.tree.child(self.files_node, name)
    }

    /// Evaluate every file until nothing changes anymore
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&mut self) -> Diagnostics {
        let files = self.files;
        for file in files.files() {
            self.prepare_file(file);
        }

        converge(files.files().collect(), |file| self.evaluate_file(file))
    }

    /// Evaluate a standalone expression as if it was written at the top of `file`
    pub fn evaluate_in_context(
        &mut self,
        file: &str,
        expr: &Expression,
    ) -> Result<MarkedValue, Diagnostics> {
        let files = self.files;
        let Some(file) = files.file(file) else {
            return Err(Diagnostic::unresolved(
                "file not found",
                format!("there is no file named {file}"),
                None,
            )
            .into());
        };
        let node = self.prepare_file(file);
        let range = file.range_of(expr);
        self.evaluate_value(expr, node, &Scope::new(file), &range)
    }

    fn prepare_file(&mut self, file: &SourceFile) -> NodeId {
        let node = self.tree.new_child(
            self.files_node,
            file.name(),
            Meta::Incomplete(BlockInfo::for_file(file)),
        );
        self.prepare_blocks(file.body(), node, file);
        node
    }

    /// Create every block node upfront so lookups see blocks that were not evaluated yet as incomplete
    fn prepare_blocks(&mut self, body: &Body, node: NodeId, file: &SourceFile) {
        for block in body
            .blocks()
            .filter(|block| block.ident.as_str() != FUNC_BLOCK)
        {
            // collisions are reported once the block itself is evaluated
            let _ = self.tree.new_block_child(node, &BlockInfo::new(block, file));
        }
    }

    #[tracing::instrument(level = "trace", skip_all, fields(file = file.name()))]
    fn evaluate_file(&mut self, file: &'a SourceFile) -> Diagnostics {
        let node = self.prepare_file(file);
        let diags = self.evaluate_body(file.body(), node, &Scope::new(file), BodyKind::File);
        if !diags.has_errors() {
            self.tree.set_meta(node, Meta::Block(BlockInfo::for_file(file)));
        }
        diags
    }

    fn evaluate_body(
        &mut self,
        body: &Body,
        node: NodeId,
        scope: &Scope<'_>,
        kind: BodyKind,
    ) -> Diagnostics {
        let (functions, diags) = decode_user_functions(body, scope.file);
        if diags.has_errors() {
            return diags;
        }
        self.tree.get_mut(node).local_functions = functions;
        self.prepare_blocks(body, node, scope.file);

        let items = body
            .iter()
            .filter_map(|structure| match structure {
                Structure::Attribute(attribute) => Some(Item::Attribute(attribute)),
                Structure::Block(block) if block.ident.as_str() != FUNC_BLOCK => {
                    Some(Item::Block(block))
                }
                Structure::Block(_) => None,
            })
            .collect();

        converge(items, |item| match item {
            Item::Attribute(attribute) => {
                let scope = self.attribute_scope(attribute, node, scope, kind);
                self.evaluate_attribute(attribute, node, &scope)
            }
            Item::Block(block) => self.evaluate_block(block, node, scope),
        })
    }

    /// `data` of a gen block can use `ref` once `path` is known
    fn attribute_scope<'s>(
        &self,
        attribute: &Attribute,
        node: NodeId,
        scope: &Scope<'s>,
        kind: BodyKind,
    ) -> Scope<'s> {
        let mut scope = scope.clone();
        if kind == BodyKind::Gen && attribute.key.as_str() == "data" {
            if let Some(path) = self.string_attribute(node, "path") {
                scope.functions.insert(
                    "ref".to_string(),
                    ScopedFunction::RelativePath(funcs::path::sanitize_gen_path(&path)),
                );
            }
        }
        scope
    }

    pub(crate) fn string_attribute(&self, node: NodeId, key: &str) -> Option<String> {
        let child = self.tree.child(node, key)?;
        self.tree
            .get(child)
            .value
            .as_ref()
            .and_then(MarkedValue::as_str)
            .map(str::to_string)
    }

    fn evaluate_block(
        &mut self,
        block: &Block,
        parent: NodeId,
        scope: &Scope<'_>,
    ) -> Diagnostics {
        let info = BlockInfo::new(block, scope.file);
        let node = match self.tree.new_block_child(parent, &info) {
            Ok(node) => node,
            Err(err) => {
                return Diagnostic::structural("invalid block", err.to_string(), info.ident_range)
                    .into()
            }
        };

        if !self.tree.get(node).meta.is_incomplete() {
            return Diagnostics::default();
        }

        let is_gen = info.ident == GEN_BLOCK;
        let kind = if is_gen { BodyKind::Gen } else { BodyKind::Block };
        let diags = self.evaluate_body(&block.body, node, scope, kind);
        if diags.has_errors() {
            return diags;
        }

        let meta = if is_gen {
            let Some(path) = self.string_attribute(node, "path") else {
                return Diagnostic::structural(
                    "missing attribute",
                    "a gen block must have a path attribute of type string",
                    info.ident_range,
                )
                .into();
            };
            Meta::GenBlock {
                output_path: funcs::path::sanitize_gen_path(&path),
                block: info,
            }
        } else {
            Meta::Block(info)
        };

        tracing::trace!(path = ?self.tree.path(node), "block resolved");
        self.tree.set_meta(node, meta);
        diags
    }

    fn evaluate_attribute(
        &mut self,
        attribute: &Attribute,
        parent: NodeId,
        scope: &Scope<'_>,
    ) -> Diagnostics {
        let attr = Attr::new(
            attribute.key.as_str().to_string(),
            &attribute.value,
            scope.file.range_of(&attribute.key),
        );
        self.evaluate_attr(&attr, parent, scope)
    }

    /// Evaluate `attr` and commit the result as child `attr.name` of `parent`
    pub(crate) fn evaluate_attr(
        &mut self,
        attr: &Attr<'_>,
        parent: NodeId,
        scope: &Scope<'_>,
    ) -> Diagnostics {
        if scope.depth > MAX_CALL_DEPTH {
            return Diagnostic::structural(
                "maximum call depth exceeded",
                format!("user functions nested deeper than {MAX_CALL_DEPTH} calls"),
                attr.range.clone(),
            )
            .into();
        }

        match attr.expr {
            Expression::Object(object) => {
                let node = match self.tree.new_non_block_child(
                    parent,
                    &attr.name,
                    Meta::Attribute(attr.range.clone()),
                ) {
                    Ok(node) => node,
                    Err(err) => {
                        return Diagnostic::structural(
                            "invalid attribute",
                            err.to_string(),
                            attr.range.clone(),
                        )
                        .into()
                    }
                };

                let mut diags = Diagnostics::default();
                for (key, value) in object.iter() {
                    let key_range = key_range(scope.file, key);
                    let name = match self.object_key(key, node, scope, &key_range) {
                        Ok(name) => name,
                        Err(errors) => {
                            diags.extend(errors);
                            continue;
                        }
                    };

                    let item = Attr::new(name, value.expr(), key_range);
                    diags.extend(self.evaluate_attr(&item, node, scope));
                }
                self.discard_partial(parent, &attr.name, &diags);
                diags
            }
            Expression::Array(array) => {
                let node = match self.tree.new_non_block_child(
                    parent,
                    &attr.name,
                    Meta::Attribute(attr.range.clone()),
                ) {
                    Ok(node) => node,
                    Err(err) => {
                        return Diagnostic::structural(
                            "invalid attribute",
                            err.to_string(),
                            attr.range.clone(),
                        )
                        .into()
                    }
                };
                self.tree.get_mut(node).is_array = true;

                let mut diags = Diagnostics::default();
                for (index, element) in array.iter().enumerate() {
                    let item = Attr::new(index.to_string(), element, scope.file.range_of(element));
                    diags.extend(self.evaluate_attr(&item, node, scope));
                }
                self.discard_partial(parent, &attr.name, &diags);
                diags
            }
            Expression::ForExpr(for_expr) => self.evaluate_for(attr, for_expr, parent, scope),
            Expression::FuncCall(call) => self.evaluate_call(attr, call, parent, scope),
            Expression::Parenthesis(parenthesis) => {
                let inner = Attr::new(attr.name.clone(), parenthesis.inner(), attr.range.clone());
                self.evaluate_attr(&inner, parent, scope)
            }
            expr => match self.evaluate_expression(expr, parent, scope, &attr.range) {
                Ok(value) => self.commit(parent, &attr.name, value, &attr.range),
                Err(diags) => diags,
            },
        }
    }

    /// A failed object or array is attempted again as a whole, readers must not see the parts that worked
    fn discard_partial(&mut self, parent: NodeId, name: &str, diags: &Diagnostics) {
        if diags.has_errors() {
            self.tree.remove(parent, name);
        }
    }

    fn object_key(
        &mut self,
        key: &hcl_edit::expr::ObjectKey,
        node: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<String, Diagnostics> {
        let expr = match key {
            hcl_edit::expr::ObjectKey::Ident(ident) => return Ok(ident.as_str().to_string()),
            hcl_edit::expr::ObjectKey::Expression(expr) => expr,
        };

        let value = self.evaluate_value(expr, node, scope, range)?;
        match value.kind {
            ValueKind::String(string) => Ok(string),
            ValueKind::Number(number) => Ok(number.to_string()),
            ValueKind::Bool(bool) => Ok(bool.to_string()),
            _ => Err(Diagnostic::unresolved(
                "invalid object key",
                format!("object keys must be strings, got {}", value.type_name()),
                range.clone(),
            )
            .into()),
        }
    }

    /// Store a finished value, rejecting values read from incomplete blocks
    pub(crate) fn commit(
        &mut self,
        parent: NodeId,
        name: &str,
        value: MarkedValue,
        range: &SourceRange,
    ) -> Diagnostics {
        if let Some(incomplete) = value.find_incomplete() {
            let origin = incomplete
                .first_range()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Diagnostic::incomplete(
                format!("{name} reads the block at {origin} before it was fully evaluated"),
                range.clone(),
            )
            .into();
        }

        match self.tree.apply_key_val(parent, name, value, range) {
            Ok(_) => Diagnostics::default(),
            Err(err) => {
                Diagnostic::structural("invalid attribute", err.to_string(), range.clone()).into()
            }
        }
    }

    fn temporary(&mut self, parent: NodeId, range: &SourceRange) -> (NodeId, String) {
        let key = format!("{TEMPORARY_PREFIX}:{}", self.temporaries);
        self.temporaries += 1;
        let node = self.tree.new_child(parent, &key, Meta::Name(range.clone()));
        (node, key)
    }

    /// Evaluate an expression without keeping its result in the tree
    pub(crate) fn evaluate_value(
        &mut self,
        expr: &Expression,
        parent: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, Diagnostics> {
        if !matches!(
            expr,
            Expression::Object(_)
                | Expression::Array(_)
                | Expression::ForExpr(_)
                | Expression::FuncCall(_)
                | Expression::Parenthesis(_)
        ) {
            return self.evaluate_expression(expr, parent, scope, range);
        }

        let (temporary, key) = self.temporary(parent, range);
        let attr = Attr::new(VALUE_KEY.to_string(), expr, range.clone());
        let diags = self.evaluate_attr(&attr, temporary, scope);

        let result = if diags.has_errors() {
            Err(diags)
        } else {
            match self.tree.child(temporary, VALUE_KEY) {
                Some(child) => Ok(self.tree.to_value(child).without_ranges()),
                None => Err(Diagnostic::unresolved(
                    "missing value",
                    "the expression did not produce a value",
                    range.clone(),
                )
                .into()),
            }
        };

        self.tree.remove(parent, &key);
        result
    }

    /// Evaluate anything that is not an object, array, function call or `for` expression
    fn evaluate_expression(
        &mut self,
        expr: &Expression,
        parent: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, Diagnostics> {
        let mut expr = expr.clone();
        let placeholders = self.substitute_nested(&mut expr, parent, scope, range)?;
        let expression = hcl::Expression::from(expr);

        if placeholders.is_empty() {
            if let Some(resolved) = self.resolve_reference(&expression, scope, range) {
                return resolved;
            }
        }

        self.evaluate_plain(expression, placeholders, scope, range)
    }

    /// Resolve `a.b[0].c` style references directly, keeping marks
    fn resolve_reference(
        &self,
        expression: &hcl::Expression,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Option<Result<MarkedValue, Diagnostics>> {
        let (root, operators) = match expression {
            hcl::Expression::Variable(variable) => (variable.as_str(), &[][..]),
            hcl::Expression::Traversal(traversal) => match &traversal.expr {
                hcl::Expression::Variable(variable) => {
                    (variable.as_str(), traversal.operators.as_slice())
                }
                _ => return None,
            },
            _ => return None,
        };

        let mut segments = Vec::with_capacity(operators.len());
        for operator in operators {
            let segment = match operator {
                hcl::TraversalOperator::GetAttr(ident) => Segment::Key(ident.to_string()),
                hcl::TraversalOperator::Index(hcl::Expression::String(key)) => {
                    Segment::Key(key.clone())
                }
                hcl::TraversalOperator::Index(hcl::Expression::Number(index)) => {
                    Segment::Index(usize::try_from(index.as_u64()?).ok()?)
                }
                hcl::TraversalOperator::LegacyIndex(index) => {
                    Segment::Index(usize::try_from(*index).ok()?)
                }
                _ => return None,
            };
            segments.push(segment);
        }

        Some(self.lookup(root, &segments, scope, range))
    }

    fn lookup(
        &self,
        root: &str,
        segments: &[Segment],
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, Diagnostics> {
        let Some(value) = self.variable(root, scope) else {
            return Err(Diagnostic::unresolved(
                "unknown variable",
                format!("there is no variable named {root:?}"),
                range.clone(),
            )
            .into());
        };

        let mut current = &value;
        let mut traversed = root.to_string();
        for segment in segments {
            let next = match (&current.kind, segment) {
                (ValueKind::Object(entries), Segment::Key(key)) => entries.get(key),
                (ValueKind::Object(entries), Segment::Index(index)) => {
                    entries.get(&index.to_string())
                }
                (ValueKind::Array(items), Segment::Index(index)) => items.get(*index),
                _ => None,
            };

            let Some(next) = next else {
                if current.is_incomplete() {
                    return Err(Diagnostic::incomplete(
                        format!("{traversed} is not fully evaluated yet"),
                        range.clone(),
                    )
                    .into());
                }

                return Err(Diagnostic::unresolved(
                    "unsupported attribute",
                    format!("{traversed} has no element {segment}"),
                    range.clone(),
                )
                .into());
            };

            current = next;
            traversed = format!("{traversed}{segment}");
        }

        // reading a value explicitly makes it part of the output again
        let mut value = current.clone();
        value.marks.retain(|mark| *mark != Mark::Ignore);
        Ok(value)
    }

    /// Everything an expression can read through variable `name`
    pub(crate) fn variable(&self, name: &str, scope: &Scope<'_>) -> Option<MarkedValue> {
        if let Some(value) = scope.variables.get(name) {
            return Some(value.clone());
        }

        let mut found: Option<MarkedValue> = None;
        let others = self
            .files
            .files()
            .filter(|file| file.name() != scope.file.name());
        for file in others.chain(std::iter::once(scope.file)) {
            let Some(node) = self
                .file_node(file.name())
                .and_then(|node| self.tree.child(node, name))
            else {
                continue;
            };

            let value = self.tree.to_value_with_extra_context(node, file.name());
            found = Some(match found {
                Some(existing) => existing.deep_merge(value),
                None => value,
            });
        }

        if found.is_none() && name == ENV_VARIABLE {
            return Some(self.env.clone());
        }

        found
    }

    fn evaluate_plain(
        &self,
        mut expression: hcl::Expression,
        placeholders: IndexMap<String, MarkedValue>,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, Diagnostics> {
        let mut paths = vec![];
        expression.visit_traversals_mut(&mut |traversal: &mut hcl::Traversal| {
            paths.push(traversal.get_longest_path());
        });

        let mut context = hcl::eval::Context::new();
        for (name, value) in &placeholders {
            context.declare_var(hcl::Identifier::unchecked(name), value.to_hcl());
        }

        let mut declared: Vec<&str> = vec![];
        for path in &paths {
            let Some(root) = path.first() else {
                continue;
            };
            if placeholders.contains_key(root.as_str()) {
                continue;
            }
            let Some(value) = self.variable(root, scope) else {
                continue;
            };

            if reads_incomplete(&value, &path[1..]) {
                let path: Vec<&str> = path.iter().map(|ident| ident.as_str()).collect();
                return Err(Diagnostic::incomplete(
                    format!("{} is not fully evaluated yet", path.join(".")),
                    range.clone(),
                )
                .into());
            }

            if !declared.contains(&root.as_str()) {
                declared.push(root.as_str());
                context.declare_var(root.clone(), value.to_hcl());
            }
        }

        expression
            .evaluate(&context)
            .map(MarkedValue::from)
            .map_err(|errors| {
                Diagnostic::unresolved(
                    "failed to evaluate expression",
                    errors.to_string(),
                    range.clone(),
                )
                .into()
            })
    }

    /// Resolve a function name and call it
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        args: Vec<MarkedValue>,
        parent: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, FuncError> {
        if let Some(function) = scope.functions.get(name) {
            return function.call(args);
        }

        if funcs::CONTEXTUAL.contains(&name) {
            return self.call_contextual(name, args, parent, scope);
        }

        if let Some((declared_in, function)) = self.tree.user_function(parent, name) {
            return self.call_user_function(function, declared_in, args, scope, range);
        }

        let Some(builtin) = funcs::builtin(name) else {
            return Err(FuncError::Unknown(name.to_string()));
        };
        if funcs::KEEPS_PROVENANCE.contains(&name) {
            return builtin(args);
        }

        // only the result as a whole is traced back to the arguments
        let mut ranges = vec![];
        let args = args
            .into_iter()
            .map(|arg| {
                ranges.extend(arg.ranges().cloned().map(Mark::Range));
                arg.without_nested_provenance()
            })
            .collect();
        Ok(builtin(args)?.without_nested_provenance().with_marks(ranges))
    }

    fn call_user_function(
        &mut self,
        function: Rc<UserFunction>,
        declared_in: NodeId,
        args: Vec<MarkedValue>,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, FuncError> {
        let arity_matches = match function.variadic_param {
            Some(_) => args.len() >= function.params.len(),
            None => args.len() == function.params.len(),
        };
        if !arity_matches {
            return Err(FuncError::Arity {
                name: function.name.clone(),
                expected: function.params.len(),
                got: args.len(),
            });
        }

        let files = self.files;
        let file = files
            .file(&function.file)
            .ok_or_else(|| FuncError::Message(format!("file {} not found", function.file)))?;

        let mut call_scope = Scope::new(file);
        call_scope.depth = scope.depth + 1;
        let mut args = args.into_iter();
        for param in &function.params {
            if let Some(arg) = args.next() {
                call_scope.variables.insert(param.clone(), arg);
            }
        }
        if let Some(variadic) = &function.variadic_param {
            call_scope
                .variables
                .insert(variadic.clone(), MarkedValue::array(args.collect()));
        }

        tracing::trace!(name = %function.name, depth = call_scope.depth, "calling user function");
        self.evaluate_value(&function.result, declared_in, &call_scope, range)
            .map_err(FuncError::Diagnostics)
    }
}

/// True if `path` ends at, or stops inside, a value that is not fully evaluated
fn reads_incomplete(value: &MarkedValue, path: &[hcl::Identifier]) -> bool {
    let mut current = value;
    for key in path {
        match current.as_object().and_then(|entries| entries.get(key.as_str())) {
            Some(next) => current = next,
            None => return current.is_incomplete(),
        }
    }
    current.find_incomplete().is_some()
}

fn key_range(file: &SourceFile, key: &hcl_edit::expr::ObjectKey) -> SourceRange {
    match key {
        hcl_edit::expr::ObjectKey::Ident(ident) => file.range_of(ident),
        hcl_edit::expr::ObjectKey::Expression(expr) => file.range_of(expr),
    }
}

#[derive(Debug)]
enum Segment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Key(key) => write!(f, ".{key}"),
            Segment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Attempt `items` in passes until no more progress is made
///
/// A pass attempts every item that is not resolved yet. Items failing with structural errors are not
/// retried. The loop keeps going while items resolve, while the number of diagnostics shrinks below
/// everything seen so far, or during the first few warm-up passes.
/// Returns the structural errors and the diagnostics of the last pass.
pub(crate) fn converge<T>(items: Vec<T>, mut attempt: impl FnMut(&T) -> Diagnostics) -> Diagnostics {
    let mut pending = items;
    let mut settled = Diagnostics::default();
    let mut last = Diagnostics::default();
    let mut fewest_diagnostics = usize::MAX;
    let mut warmup = WARMUP_PASSES;
    let mut pass = 0;

    while !pending.is_empty() {
        pass += 1;
        warmup = warmup.saturating_sub(1);

        let attempted = pending.len();
        let mut blocked = Vec::with_capacity(attempted);
        let mut diags = Diagnostics::default();

        for item in pending {
            let result = attempt(&item);
            if !result.has_errors() {
                settled.extend(result);
            } else if result.is_structural() {
                settled.extend(result);
            } else {
                diags.extend(result);
                blocked.push(item);
            }
        }

        let progressed = blocked.len() < attempted;
        if diags.len() < fewest_diagnostics {
            fewest_diagnostics = diags.len();
            if pass > 1 {
                warmup = WARMUP_PASSES;
            }
        }

        tracing::debug!(
            pass,
            attempted,
            blocked = blocked.len(),
            diagnostics = diags.len(),
            "evaluation pass"
        );

        pending = blocked;
        last = diags;

        if !progressed && warmup == 0 {
            tracing::debug!(pass, remaining = pending.len(), "evaluation is stuck");
            break;
        }
    }

    settled.extend(last);
    settled
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::body_builder;
    use pretty_assertions::assert_eq;

    fn evaluate(files: &BodyBuilder) -> (Evaluator<'_>, Diagnostics) {
        let mut evaluator = Evaluator::new(files, &IndexMap::new());
        let diags = evaluator.run();
        (evaluator, diags)
    }

    fn json_at(evaluator: &Evaluator<'_>, file: &str, path: &[&str]) -> serde_json::Value {
        let node = evaluator.file_node(file).unwrap();
        let node = evaluator.tree().identify_child(node, path).unwrap();
        evaluator.tree().to_value(node).to_json()
    }

    #[test]
    fn forward_references_resolve() {
        let files = body_builder!(
            r#"
            first = second.value
            second = { value = third }
            third = "done"
            "#
        );
        let (evaluator, diags) = evaluate(&files);

        assert!(diags.is_empty(), "{diags}");
        assert_eq!(json_at(&evaluator, "main.retab", &["first"]), "done");
    }

    #[test]
    fn temporary_nodes_are_freed() {
        let files = body_builder!(
            r#"
            names = ["a", "b"]
            out = [for name in reverse(names) : { upper = upper(name) }]
            "#
        );
        let (mut evaluator, diags) = evaluate(&files);
        assert!(diags.is_empty(), "{diags}");

        let expr: Expression = "[for n in concat(names, out) : tostring(length(n))]"
            .parse()
            .unwrap();
        let before = evaluator.tree().len();
        for _ in 0..3 {
            evaluator.evaluate_in_context("main.retab", &expr).unwrap();
        }
        assert_eq!(evaluator.tree().len(), before);
    }

    #[test]
    fn builtin_results_are_marked_as_a_whole() {
        let files = body_builder!(
            r#"
            names = ["a", "b", "c"]
            out = reverse(names)
            "#
        );
        let (evaluator, diags) = evaluate(&files);
        assert!(diags.is_empty(), "{diags}");

        let node = evaluator.file_node("main.retab").unwrap();
        let out = evaluator.tree().identify_child(node, &["out"]).unwrap();
        let value = evaluator.tree().to_value(out);
        let items = value.as_array().unwrap();
        assert!(items.iter().all(|item| item.marks.is_empty()));
        assert_eq!(crate::encode::encode(&value), crate::value::Value::from(vec!["c", "b", "a"]));
    }

    #[test]
    fn references_work_across_files() {
        let files = body_builder! {
            "a.retab" => r#"out = { steps = [ref.checkout] }"#,
            "b.retab" => r#"ref "checkout" { name = "Checkout" }"#,
        };
        let (evaluator, diags) = evaluate(&files);

        assert!(diags.is_empty(), "{diags}");
        assert_eq!(
            json_at(&evaluator, "a.retab", &["out"]),
            serde_json::json!({"steps": [{"name": "Checkout"}]})
        );
    }

    #[test]
    fn unresolved_references_are_reported() {
        let files = body_builder!("a = missing.value\nb = 1");
        let (_, diags) = evaluate(&files);

        let summaries: Vec<_> = diags.iter().map(|diag| diag.summary.as_str()).collect();
        assert_eq!(summaries, vec!["unknown variable"]);
    }

    #[test]
    fn expressions_use_hcl_evaluation() {
        let files = body_builder!(
            r#"
            count = 2
            name = "x"
            total = count * 21
            label = "${name}-${upper(name)}"
            check = count > 1 ? "big" : "small"
            "#
        );
        let (evaluator, diags) = evaluate(&files);

        assert!(diags.is_empty(), "{diags}");
        assert_eq!(json_at(&evaluator, "main.retab", &["total"]), 42);
        assert_eq!(json_at(&evaluator, "main.retab", &["label"]), "x-X");
        assert_eq!(json_at(&evaluator, "main.retab", &["check"]), "big");
    }

    #[test]
    fn blocks_and_attributes_cannot_share_names() {
        let files = body_builder!("step \"a\" {}\nstep = 1");
        let (_, diags) = evaluate(&files);

        assert!(diags.is_structural());
        assert!(diags
            .iter()
            .any(|diag| diag.detail.contains("block already exists with this name")));
    }

    #[test]
    fn env_is_available() {
        let files = body_builder!("user = env.USER_NAME");
        let env = IndexMap::from([("USER_NAME".to_string(), "tester".to_string())]);
        let mut evaluator = Evaluator::new(&files, &env);
        let diags = evaluator.run();

        assert!(diags.is_empty(), "{diags}");
        assert_eq!(json_at(&evaluator, "main.retab", &["user"]), "tester");
    }

    #[test]
    fn block_attributes_can_reference_each_other() {
        let files = body_builder!(
            r#"
            job "build" {
              image = "alpine:${job.build.version}"
              version = "3"
            }
            "#
        );
        let (evaluator, diags) = evaluate(&files);

        assert!(diags.is_empty(), "{diags}");
        assert_eq!(
            json_at(&evaluator, "main.retab", &["job", "build", "image"]),
            "alpine:3"
        );
    }

    #[test]
    fn converge_stops_without_progress() {
        let mut attempts = 0;
        let diags = converge(vec![()], |_| {
            attempts += 1;
            Diagnostic::unresolved("never", "", None).into()
        });

        assert_eq!(diags.len(), 1);
        assert_eq!(attempts, WARMUP_PASSES);
    }

    #[test]
    fn converge_does_not_retry_structural_errors() {
        let mut attempts = 0;
        let diags = converge(vec![()], |_| {
            attempts += 1;
            Diagnostic::structural("broken", "", None).into()
        });

        assert_eq!(diags.len(), 1);
        assert_eq!(attempts, 1);
    }
}
