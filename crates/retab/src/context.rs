//! evaluated values, organized like the source ([ContextTree])
//!
//! Every distinct key path gets one [SudoContext] node. Nodes live in an arena and refer to each other by
//! [NodeId]. A node is either a container under construction (it has children) or a leaf holding a value.
//!
//! ```hcl
//! step "checkout" {
//!   name = "Checkout"
//! }
//! ```
//!
//! becomes
//!
//! ```text
//! <root>
//! └── ____files
//!     └── main.retab        Block (the file itself)
//!         └── step          Label
//!             └── checkout  Block
//!                 └── name  Attribute = "Checkout"
//! ```
//!
//! Blocks stay [Meta::Incomplete] until their whole body is evaluated. Reading them before that marks
//! the value with [Mark::Incomplete].
use crate::marks::{Mark, MarkedValue};
use crate::source::{SourceFile, SourceRange};
use crate::userfunc::UserFunction;
use hcl_edit::Span;
use indexmap::IndexMap;
use std::rc::Rc;

/// Holds one child per source file
pub const FILES_KEY: &str = "____files";
/// Prefix of nodes that only exist while a single expression is evaluated
pub const TEMPORARY_PREFIX: &str = "____tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// The parts of a parsed block needed after parsing
#[derive(Debug, Clone, PartialEq)]
pub struct BlockInfo {
    pub ident: String,
    pub labels: Vec<String>,
    pub label_ranges: Vec<SourceRange>,
    pub ident_range: SourceRange,
    pub range: SourceRange,
}

impl BlockInfo {
    pub fn new(block: &hcl_edit::structure::Block, file: &SourceFile) -> Self {
        Self {
            ident: block.ident.as_str().to_string(),
            labels: block
                .labels
                .iter()
                .map(|label| label.as_str().to_string())
                .collect(),
            label_ranges: block
                .labels
                .iter()
                .map(|label| file.range_of(label))
                .collect(),
            ident_range: file.range_of(&block.ident),
            range: file.range(block.span()).unwrap_or_else(|| file.range_of(&block.ident)),
        }
    }

    /// A file is evaluated like a block without labels
    pub fn for_file(file: &SourceFile) -> Self {
        let range = SourceRange::file_start(file.shared_name());
        Self {
            ident: file.name().to_string(),
            labels: vec![],
            label_ranges: vec![],
            ident_range: range.clone(),
            range,
        }
    }

    pub fn label(&self) -> String {
        self.labels.join(".")
    }
}

/// Provenance of a node
#[derive(Debug, Clone, PartialEq)]
pub enum Meta {
    Block(BlockInfo),
    GenBlock {
        block: BlockInfo,
        output_path: String,
    },
    Attribute(SourceRange),
    Label(SourceRange),
    Name(SourceRange),
    Incomplete(BlockInfo),
}

impl Meta {
    pub fn range(&self) -> &SourceRange {
        match self {
            Meta::Block(block) | Meta::GenBlock { block, .. } | Meta::Incomplete(block) => {
                &block.range
            }
            Meta::Attribute(range) | Meta::Label(range) | Meta::Name(range) => range,
        }
    }

    pub fn block(&self) -> Option<&BlockInfo> {
        match self {
            Meta::Block(block) | Meta::GenBlock { block, .. } | Meta::Incomplete(block) => {
                Some(block)
            }
            _ => None,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Meta::Incomplete(_))
    }

    /// Ignore-marked values a block adds next to its attributes
    fn variables(&self, file: &str) -> Vec<(&'static str, MarkedValue)> {
        let mut variables = vec![];
        if let Some(block) = self.block() {
            variables.push(("label", MarkedValue::from(block.label())));
            variables.push(("type", MarkedValue::from(block.ident.as_str())));
        }
        if let Meta::GenBlock { output_path, .. } = self {
            variables.push(("resolved_output", MarkedValue::from(output_path.as_str())));
            variables.push(("source", MarkedValue::from(file)));
        }
        variables
    }
}

#[derive(Debug)]
pub struct SudoContext {
    pub key: String,
    pub parent: Option<NodeId>,
    pub children: IndexMap<String, NodeId>,
    pub is_array: bool,
    pub value: Option<MarkedValue>,
    pub local_functions: IndexMap<String, Rc<UserFunction>>,
    pub meta: Meta,
}

impl SudoContext {
    fn new(key: String, parent: Option<NodeId>, meta: Meta) -> Self {
        Self {
            key,
            parent,
            children: Default::default(),
            is_array: false,
            value: None,
            local_functions: Default::default(),
            meta,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.key.starts_with(TEMPORARY_PREFIX)
    }
}

#[derive(Debug)]
pub struct ContextTree {
    nodes: Vec<SudoContext>,
}

impl ContextTree {
    pub fn new(range: SourceRange) -> Self {
        Self {
            nodes: vec![SudoContext::new(String::new(), None, Meta::Name(range))],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn get(&self, id: NodeId) -> &SudoContext {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut SudoContext {
        &mut self.nodes[id.0]
    }

    pub fn child(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.get(id).children.get(key).copied()
    }

    /// Follow a path of keys starting at `id`
    pub fn identify_child(&self, id: NodeId, path: &[&str]) -> Option<NodeId> {
        path.iter()
            .try_fold(id, |current, key| self.child(current, key))
    }

    /// Returns the existing child at `key` or creates it
    pub fn new_child(&mut self, parent: NodeId, key: &str, meta: Meta) -> NodeId {
        if let Some(existing) = self.child(parent, key) {
            return existing;
        }

        let id = NodeId(self.nodes.len());
        self.nodes
            .push(SudoContext::new(key.to_string(), Some(parent), meta));
        self.get_mut(parent).children.insert(key.to_string(), id);
        id
    }

    /// Like [ContextTree::new_child], but `key` must not be taken by a block
    pub fn new_non_block_child(
        &mut self,
        parent: NodeId,
        key: &str,
        meta: Meta,
    ) -> Result<NodeId, ContextError> {
        if let Some(existing) = self.child(parent, key) {
            return match &self.get(existing).meta {
                Meta::Label(_) | Meta::Block(_) | Meta::GenBlock { .. } | Meta::Incomplete(_) => {
                    Err(ContextError::BlockExists(key.to_string()))
                }
                _ => Ok(existing),
            };
        }

        Ok(self.new_child(parent, key, meta))
    }

    /// Appends a child at the next free index
    pub fn new_array_child(&mut self, parent: NodeId, meta: Meta) -> NodeId {
        let index = self.get(parent).children.len().to_string();
        self.new_child(parent, &index, meta)
    }

    fn new_label_child(
        &mut self,
        parent: NodeId,
        label: &str,
        range: &SourceRange,
    ) -> Result<NodeId, ContextError> {
        let id = self.new_child(parent, label, Meta::Label(range.clone()));
        match &self.get(id).meta {
            Meta::Label(_) => Ok(id),
            _ => Err(ContextError::BlockExists(label.to_string())),
        }
    }

    /// Creates the nodes for a block: one per type and label
    ///
    /// The returned node is [Meta::Incomplete] until [ContextTree::set_meta] marks it done.
    /// Requesting the same block again returns the same node.
    pub fn new_block_child(
        &mut self,
        parent: NodeId,
        block: &BlockInfo,
    ) -> Result<NodeId, ContextError> {
        let mut segments: Vec<(&String, &SourceRange)> =
            std::iter::once((&block.ident, &block.ident_range))
                .chain(block.labels.iter().zip(&block.label_ranges))
                .collect();
        let Some((key, _)) = segments.pop() else {
            return Err(ContextError::NotABlock(block.ident.clone()));
        };

        let mut current = parent;
        for (label, range) in segments {
            current = self.new_label_child(current, label, range)?;
        }

        let Some(existing) = self.child(current, key) else {
            return Ok(self.new_child(current, key, Meta::Incomplete(block.clone())));
        };

        match self.get(existing).meta.block() {
            Some(known) if known.range == block.range => Ok(existing),
            Some(known) => Err(ContextError::DuplicateBlock {
                name: key.to_string(),
                existing: known.range.clone(),
            }),
            None => Err(ContextError::BlockExists(key.to_string())),
        }
    }

    pub fn set_meta(&mut self, id: NodeId, meta: Meta) {
        self.get_mut(id).meta = meta;
    }

    /// Turns a node into a leaf
    pub fn set_value(&mut self, id: NodeId, value: MarkedValue, range: SourceRange) {
        let node = self.get_mut(id);
        node.value = Some(value);
        if node.meta.block().is_none() {
            node.meta = Meta::Attribute(range);
        }
    }

    /// Stores a value at `key`, dropping its top level marks
    pub fn apply_key_val(
        &mut self,
        parent: NodeId,
        key: &str,
        value: MarkedValue,
        range: &SourceRange,
    ) -> Result<NodeId, ContextError> {
        let id = self.new_non_block_child(parent, key, Meta::Attribute(range.clone()))?;
        self.set_value(id, value.unmarked(), range.clone());
        Ok(id)
    }

    /// Detach a child
    ///
    /// When the child and its descendants are the newest nodes of the arena they are freed, otherwise they
    /// stay unreachable.
    pub fn remove(&mut self, parent: NodeId, key: &str) {
        let Some(id) = self.get_mut(parent).children.shift_remove(key) else {
            return;
        };

        let owns_tail = (id.0..self.nodes.len()).all(|index| self.descends_from(NodeId(index), id));
        if owns_tail {
            self.nodes.truncate(id.0);
        }
    }

    /// Parents are always created before their children
    fn descends_from(&self, mut id: NodeId, ancestor: NodeId) -> bool {
        while id.0 > ancestor.0 {
            match self.get(id).parent {
                Some(parent) => id = parent,
                None => return false,
            }
        }
        id == ancestor
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Children in a stable order: by index for arrays, otherwise by key
    pub fn list(&self, id: NodeId) -> Vec<NodeId> {
        let node = self.get(id);
        let mut children: Vec<(&String, NodeId)> = node
            .children
            .iter()
            .filter(|(_, child)| !self.get(**child).is_temporary())
            .map(|(key, child)| (key, *child))
            .collect();

        if node.is_array {
            children.sort_by_key(|(key, _)| key.parse::<usize>().unwrap_or(usize::MAX));
        } else {
            children.sort_by(|(a, _), (b, _)| a.cmp(b));
        }

        children.into_iter().map(|(_, child)| child).collect()
    }

    /// Collapse a subtree into one value, each part marked with its origin
    pub fn to_value(&self, id: NodeId) -> MarkedValue {
        self.collect(id, None)
    }

    /// Like [ContextTree::to_value], blocks additionally expose `label`, `type`, ...
    pub fn to_value_with_extra_context(&self, id: NodeId, file: &str) -> MarkedValue {
        self.collect(id, Some(file))
    }

    fn collect(&self, id: NodeId, extra_context: Option<&str>) -> MarkedValue {
        let node = self.get(id);
        let mut value = match &node.value {
            Some(value) => value.clone(),
            None if node.is_array => MarkedValue::array(
                self.list(id)
                    .into_iter()
                    .map(|child| self.collect(child, extra_context))
                    .collect(),
            ),
            None => {
                let mut entries: IndexMap<String, MarkedValue> = self
                    .list(id)
                    .into_iter()
                    .map(|child| (self.get(child).key.clone(), self.collect(child, extra_context)))
                    .collect();

                if let Some(file) = extra_context {
                    for (key, variable) in node.meta.variables(file) {
                        entries
                            .entry(key.to_string())
                            .or_insert_with(|| variable.with_mark(Mark::Ignore));
                    }
                }

                MarkedValue::object(entries)
            }
        };

        value.mark(Mark::Range(node.meta.range().clone()));
        if node.meta.is_incomplete() {
            value.mark(Mark::Incomplete);
        }
        value
    }

    /// Block nodes of the given type below `id`, looking through label nodes
    pub fn blocks_of_type(&self, id: NodeId, ident: &str) -> Result<Vec<NodeId>, ContextError> {
        let Some(type_node) = self.child(id, ident) else {
            return Ok(vec![]);
        };

        let mut blocks = vec![];
        self.collect_blocks(type_node, &mut blocks)?;
        Ok(blocks)
    }

    fn collect_blocks(&self, id: NodeId, blocks: &mut Vec<NodeId>) -> Result<(), ContextError> {
        let node = self.get(id);
        match &node.meta {
            Meta::Label(_) => {
                for child in self.list(id) {
                    self.collect_blocks(child, blocks)?;
                }
                Ok(())
            }
            Meta::Block(_) | Meta::GenBlock { .. } | Meta::Incomplete(_) => {
                blocks.push(id);
                Ok(())
            }
            _ => Err(ContextError::NotABlock(node.key.clone())),
        }
    }

    /// The `n`-th parent of `id`, not counting temporary nodes
    pub fn ancestor(&self, id: NodeId, n: usize) -> Option<NodeId> {
        let mut current = self.persistent(id)?;
        for _ in 0..n {
            current = self.persistent(self.get(current).parent?)?;
        }
        Some(current)
    }

    fn persistent(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        while self.get(current).is_temporary() {
            current = self.get(current).parent?;
        }
        Some(current)
    }

    /// Nearest user function with this name, searching up from `id`
    pub fn user_function(&self, id: NodeId, name: &str) -> Option<(NodeId, Rc<UserFunction>)> {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.get(id);
            if let Some(function) = node.local_functions.get(name) {
                return Some((id, function.clone()));
            }
            current = node.parent;
        }
        None
    }

    /// Keys from the root down to `id`
    pub fn path(&self, id: NodeId) -> Vec<&str> {
        let mut path = vec![];
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.get(id);
            if node.parent.is_some() {
                path.push(node.key.as_str());
            }
            current = node.parent;
        }
        path.reverse();
        path
    }
}

/// Bookkeeping keys that never show up in output documents
pub fn is_internal_key(key: &str) -> bool {
    key.starts_with("____")
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ContextError {
    #[error("block already exists with this name: {0}")]
    BlockExists(String),
    #[error("duplicate block {name}, first declared at {existing}")]
    DuplicateBlock { name: String, existing: SourceRange },
    #[error("{0} is not a block")]
    NotABlock(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::body_builder;
    use pretty_assertions::assert_eq;

    fn block_info(files: &crate::source::BodyBuilder, index: usize) -> BlockInfo {
        let file = files.file("main.retab").unwrap();
        let block = file.blocks().nth(index).unwrap();
        BlockInfo::new(block, file)
    }

    fn tree() -> ContextTree {
        ContextTree::new(SourceRange::file_start("main.retab"))
    }

    #[test]
    fn new_child_is_idempotent() {
        let mut tree = tree();
        let root = tree.root();
        let range = SourceRange::file_start("main.retab");
        let first = tree.new_child(root, "a", Meta::Name(range.clone()));
        let second = tree.new_child(root, "a", Meta::Name(range));
        assert_eq!(first, second);
    }

    #[test]
    fn block_and_attribute_names_collide() {
        let files = body_builder!("step \"one\" {}\nstep = 1");
        let mut tree = tree();
        let root = tree.root();

        tree.new_block_child(root, &block_info(&files, 0)).unwrap();
        let err = tree
            .new_non_block_child(root, "step", Meta::Attribute(SourceRange::file_start("x")))
            .unwrap_err();
        assert_eq!(err, ContextError::BlockExists("step".to_string()));
    }

    #[test]
    fn duplicate_blocks_are_rejected() {
        let files = body_builder!("step \"one\" {}\nstep \"one\" {}");
        let mut tree = tree();
        let root = tree.root();

        let first = tree.new_block_child(root, &block_info(&files, 0)).unwrap();
        assert_eq!(
            tree.new_block_child(root, &block_info(&files, 0)).unwrap(),
            first
        );
        assert!(matches!(
            tree.new_block_child(root, &block_info(&files, 1)),
            Err(ContextError::DuplicateBlock { .. })
        ));
    }

    #[test]
    fn incomplete_blocks_are_marked() {
        let files = body_builder!("step \"one\" { name = \"x\" }");
        let mut tree = tree();
        let root = tree.root();
        let info = block_info(&files, 0);

        let block = tree.new_block_child(root, &info).unwrap();
        let range = info.range.clone();
        tree.apply_key_val(block, "name", MarkedValue::from("x"), &range)
            .unwrap();

        let step = tree.child(root, "step").unwrap();
        assert!(tree.to_value(block).is_incomplete());
        assert!(tree.to_value(step).find_incomplete().is_some());

        tree.set_meta(block, Meta::Block(info));
        assert!(tree.to_value(step).find_incomplete().is_none());
    }

    #[test]
    fn extra_context_is_ignored() {
        let files = body_builder!("step \"one\" \"two\" { name = \"x\" }");
        let mut tree = tree();
        let root = tree.root();
        let info = block_info(&files, 0);

        let block = tree.new_block_child(root, &info).unwrap();
        tree.set_meta(block, Meta::Block(info));

        let value = tree.to_value_with_extra_context(block, "main.retab");
        let entries = value.as_object().unwrap();
        assert_eq!(entries["label"].as_str(), Some("one.two"));
        assert_eq!(entries["type"].as_str(), Some("step"));
        assert!(entries["label"].is_ignored());

        let blocks = tree.blocks_of_type(root, "step").unwrap();
        assert_eq!(blocks, vec![block]);
        assert_eq!(tree.path(block), vec!["step", "one", "two"]);
    }

    #[test]
    fn removed_children_free_the_arena_tail() {
        let mut tree = tree();
        let root = tree.root();
        let range = SourceRange::file_start("main.retab");
        let kept = tree.new_child(root, "kept", Meta::Name(range.clone()));

        let before = tree.len();
        let temporary = tree.new_child(root, "____tmp:0", Meta::Name(range.clone()));
        let value = tree.new_child(temporary, "value", Meta::Name(range.clone()));
        tree.new_child(value, "nested", Meta::Name(range.clone()));
        tree.remove(root, "____tmp:0");
        assert_eq!(tree.len(), before);
        assert_eq!(tree.child(root, "____tmp:0"), None);

        // a later node outside the removed subtree keeps it allocated
        let temporary = tree.new_child(root, "____tmp:1", Meta::Name(range.clone()));
        tree.new_child(kept, "late", Meta::Name(range.clone()));
        let len = tree.len();
        tree.remove(root, "____tmp:1");
        assert_eq!(tree.len(), len);
        assert_eq!(tree.child(root, "____tmp:1"), None);
        assert_eq!(tree.get(temporary).key, "____tmp:1");
        assert!(tree.child(kept, "late").is_some());
    }

    #[test]
    fn arrays_are_ordered_by_index() {
        let mut tree = tree();
        let root = tree.root();
        let range = SourceRange::file_start("main.retab");
        let list = tree.new_child(root, "list", Meta::Attribute(range.clone()));
        tree.get_mut(list).is_array = true;
        for index in 0..11 {
            let item = tree.new_array_child(list, Meta::Name(range.clone()));
            tree.get_mut(item).value = Some(MarkedValue::from(index as i64));
        }

        assert_eq!(
            tree.to_value(list).to_json(),
            serde_json::json!([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        );
    }
}
