//! The schema: a rule engine answering which children and attributes are
//! valid in a given context.
//!
//! Rules are registered as raw fragments and compiled lazily into flat
//! per-item records; every `register`/`extend` drops the compiled cache.
//! Checks run an ordered list of pre-check hooks first (first `Some` wins)
//! and fall back to the compiled default resolution. Registration misuse is
//! an error at registration time; queries on unknown names degrade to a
//! negative answer so partially-configured schemas stay usable.

mod context;

pub use context::{ContextRef, SchemaContext, SchemaContextItem};

use std::cell::{Ref, RefCell};
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use thiserror::Error;

use crate::document::{Document, ModelError};
use crate::node::NodeId;
use crate::position::Position;
use crate::range::Range;
use crate::selection::Selection;
use crate::tree_walker::{TreeWalker, WalkerDirection, WalkerItem, WalkerStep, WalkerValue};
use crate::writer::Writer;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema-cannot-register-item-twice: {0}")]
    AlreadyRegistered(String),
    #[error("schema-cannot-extend-missing-item: {0}")]
    CannotExtendMissing(String),
    #[error("schema-check-merge-no-element-before: no element ends at the merge position")]
    NoElementBefore,
    #[error("schema-check-merge-no-element-after: no element starts at the merge position")]
    NoElementAfter,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Scan direction for [`Schema::nearest_selection_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Both,
    Forward,
    Backward,
}

/// A raw definition fragment as passed to `register`/`extend`. Lists name
/// other items; `None` flags inherit, `Some` flags are the item's own word.
#[derive(Debug, Clone, Default)]
pub struct SchemaItemDefinition {
    pub allow_in: Vec<String>,
    pub allow_children: Vec<String>,
    pub allow_where: Vec<String>,
    pub allow_content_of: Vec<String>,
    pub allow_attributes: Vec<String>,
    pub allow_attributes_of: Vec<String>,
    pub inherit_types_from: Vec<String>,
    pub inherit_all_from: Option<String>,
    pub disallow_in: Vec<String>,
    pub disallow_children: Vec<String>,
    pub disallow_attributes: Vec<String>,
    pub is_block: Option<bool>,
    pub is_inline: Option<bool>,
    pub is_object: Option<bool>,
    pub is_limit: Option<bool>,
    pub is_selectable: Option<bool>,
    pub is_content: Option<bool>,
}

macro_rules! list_setter {
    ($name:ident) => {
        pub fn $name<I, S>(mut self, items: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.$name.extend(items.into_iter().map(Into::into));
            self
        }
    };
}

impl SchemaItemDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    list_setter!(allow_in);
    list_setter!(allow_children);
    list_setter!(allow_where);
    list_setter!(allow_content_of);
    list_setter!(allow_attributes);
    list_setter!(allow_attributes_of);
    list_setter!(inherit_types_from);
    list_setter!(disallow_in);
    list_setter!(disallow_children);
    list_setter!(disallow_attributes);

    pub fn inherit_all_from(mut self, name: impl Into<String>) -> Self {
        self.inherit_all_from = Some(name.into());
        self
    }

    pub fn block(mut self) -> Self {
        self.is_block = Some(true);
        self
    }

    pub fn inline(mut self) -> Self {
        self.is_inline = Some(true);
        self
    }

    pub fn object(mut self) -> Self {
        self.is_object = Some(true);
        self
    }

    pub fn limit(mut self) -> Self {
        self.is_limit = Some(true);
        self
    }

    pub fn selectable(mut self) -> Self {
        self.is_selectable = Some(true);
        self
    }

    pub fn content(mut self) -> Self {
        self.is_content = Some(true);
        self
    }
}

/// Fully resolved record for one registered item. Flags are the resolved
/// *explicit* values; the composite semantics (an item acting as a limit
/// because it is an object, and so on) live in the [`Schema`] queries.
#[derive(Debug, Clone, Default)]
pub struct CompiledDefinition {
    pub name: String,
    pub allow_in: HashSet<String>,
    pub disallow_in: HashSet<String>,
    pub allow_attributes: HashSet<String>,
    pub disallow_attributes: HashSet<String>,
    pub is_block: bool,
    pub is_inline: bool,
    pub is_object: bool,
    pub is_limit: bool,
    pub is_selectable: bool,
    pub is_content: bool,
}

type ChildCheck = Box<dyn Fn(&Schema, &SchemaContext, &str) -> Option<bool> + Send>;
type AttributeCheck = Box<dyn Fn(&Schema, &SchemaContext, &str) -> Option<bool> + Send>;

pub struct Schema {
    rules: IndexMap<String, Vec<SchemaItemDefinition>>,
    compiled: RefCell<Option<HashMap<String, CompiledDefinition>>>,
    child_checks: Vec<ChildCheck>,
    attribute_checks: Vec<AttributeCheck>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .field("child_checks", &self.child_checks.len())
            .field("attribute_checks", &self.attribute_checks.len())
            .finish()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    pub fn new() -> Self {
        Self {
            rules: IndexMap::new(),
            compiled: RefCell::new(None),
            child_checks: Vec::new(),
            attribute_checks: Vec::new(),
        }
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Registers a new item. The fragment is stored by value, so later
    /// changes to the caller's copy are not observed.
    pub fn register(
        &mut self,
        name: &str,
        definition: SchemaItemDefinition,
    ) -> Result<(), SchemaError> {
        if self.rules.contains_key(name) {
            return Err(SchemaError::AlreadyRegistered(name.to_string()));
        }
        self.rules.insert(name.to_string(), vec![definition]);
        *self.compiled.borrow_mut() = None;
        Ok(())
    }

    /// Appends a fragment to an already registered item.
    pub fn extend(
        &mut self,
        name: &str,
        definition: SchemaItemDefinition,
    ) -> Result<(), SchemaError> {
        let Some(fragments) = self.rules.get_mut(name) else {
            return Err(SchemaError::CannotExtendMissing(name.to_string()));
        };
        fragments.push(definition);
        *self.compiled.borrow_mut() = None;
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Installs a pre-check hook for child checks. Hooks run in
    /// registration order; the first returning `Some` short-circuits both
    /// the remaining hooks and the default resolution.
    pub fn add_child_check<F>(&mut self, check: F)
    where
        F: Fn(&Schema, &SchemaContext, &str) -> Option<bool> + Send + 'static,
    {
        self.child_checks.push(Box::new(check));
    }

    pub fn add_attribute_check<F>(&mut self, check: F)
    where
        F: Fn(&Schema, &SchemaContext, &str) -> Option<bool> + Send + 'static,
    {
        self.attribute_checks.push(Box::new(check));
    }

    // ── Compiled definitions ─────────────────────────────────────────────

    /// Compiled record for one item; `None` for never-registered names.
    pub fn definition(&self, name: &str) -> Option<CompiledDefinition> {
        self.compiled().get(name).cloned()
    }

    pub fn definitions(&self) -> HashMap<String, CompiledDefinition> {
        self.compiled().clone()
    }

    fn compiled(&self) -> Ref<'_, HashMap<String, CompiledDefinition>> {
        if self.compiled.borrow().is_none() {
            let built = self.build();
            *self.compiled.borrow_mut() = Some(built);
        }
        Ref::map(self.compiled.borrow(), |cache| {
            cache.as_ref().expect("compiled right above")
        })
    }

    fn build(&self) -> HashMap<String, CompiledDefinition> {
        // Merge fragments per item: lists concatenate, later explicit flags
        // win, the last inherit_all_from wins.
        let mut merged: IndexMap<String, SchemaItemDefinition> = IndexMap::new();
        for (name, fragments) in &self.rules {
            let mut acc = SchemaItemDefinition::default();
            for frag in fragments {
                acc.allow_in.extend(frag.allow_in.iter().cloned());
                acc.allow_children.extend(frag.allow_children.iter().cloned());
                acc.allow_where.extend(frag.allow_where.iter().cloned());
                acc.allow_content_of
                    .extend(frag.allow_content_of.iter().cloned());
                acc.allow_attributes
                    .extend(frag.allow_attributes.iter().cloned());
                acc.allow_attributes_of
                    .extend(frag.allow_attributes_of.iter().cloned());
                acc.inherit_types_from
                    .extend(frag.inherit_types_from.iter().cloned());
                acc.disallow_in.extend(frag.disallow_in.iter().cloned());
                acc.disallow_children
                    .extend(frag.disallow_children.iter().cloned());
                acc.disallow_attributes
                    .extend(frag.disallow_attributes.iter().cloned());
                if frag.inherit_all_from.is_some() {
                    acc.inherit_all_from = frag.inherit_all_from.clone();
                }
                for (own, other) in [
                    (&mut acc.is_block, frag.is_block),
                    (&mut acc.is_inline, frag.is_inline),
                    (&mut acc.is_object, frag.is_object),
                    (&mut acc.is_limit, frag.is_limit),
                    (&mut acc.is_selectable, frag.is_selectable),
                    (&mut acc.is_content, frag.is_content),
                ] {
                    if other.is_some() {
                        *own = other;
                    }
                }
            }
            merged.insert(name.clone(), acc);
        }

        let registered: HashSet<String> = merged.keys().cloned().collect();
        let keep = |list: &mut Vec<String>| list.retain(|name| registered.contains(name));

        // Expand inherit_all_from, then silently drop every reference to an
        // unregistered item.
        for raw in merged.values_mut() {
            if let Some(base) = raw.inherit_all_from.clone() {
                if registered.contains(&base) {
                    raw.allow_where.push(base.clone());
                    raw.allow_content_of.push(base.clone());
                    raw.allow_attributes_of.push(base.clone());
                    raw.inherit_types_from.push(base);
                } else {
                    raw.inherit_all_from = None;
                }
            }
            keep(&mut raw.allow_in);
            keep(&mut raw.allow_children);
            keep(&mut raw.allow_where);
            keep(&mut raw.allow_content_of);
            keep(&mut raw.allow_attributes_of);
            keep(&mut raw.inherit_types_from);
            keep(&mut raw.disallow_in);
            keep(&mut raw.disallow_children);
        }

        let names: Vec<String> = merged.keys().cloned().collect();

        // Allowed-parents sets: own rules, symmetric allow_children grants,
        // then a fixed point over allow_where / allow_content_of. Sets only
        // ever grow, so the iteration terminates.
        let mut allow_in: HashMap<String, HashSet<String>> = names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    merged[name].allow_in.iter().cloned().collect(),
                )
            })
            .collect();
        for name in &names {
            for child in merged[name].allow_children.clone() {
                if let Some(set) = allow_in.get_mut(&child) {
                    set.insert(name.clone());
                }
            }
        }
        loop {
            let mut changed = false;
            for name in &names {
                for proto in merged[name].allow_where.clone() {
                    let inherited: Vec<String> =
                        allow_in[&proto].iter().cloned().collect();
                    let set = allow_in.get_mut(name).expect("all names seeded");
                    for parent in inherited {
                        changed |= set.insert(parent);
                    }
                }
            }
            for name in &names {
                for source in merged[name].allow_content_of.clone() {
                    // Whatever may sit inside `source` may sit inside `name`.
                    for child in &names {
                        if allow_in[child].contains(&source) && !allow_in[child].contains(name) {
                            allow_in
                                .get_mut(child)
                                .expect("all names seeded")
                                .insert(name.clone());
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }

        // Attribute sets, same fixed-point shape.
        let mut allow_attributes: HashMap<String, HashSet<String>> = names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    merged[name].allow_attributes.iter().cloned().collect(),
                )
            })
            .collect();
        loop {
            let mut changed = false;
            for name in &names {
                for source in merged[name].allow_attributes_of.clone() {
                    let inherited: Vec<String> =
                        allow_attributes[&source].iter().cloned().collect();
                    let set = allow_attributes.get_mut(name).expect("all names seeded");
                    for key in inherited {
                        changed |= set.insert(key);
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let mut out = HashMap::new();
        for name in &names {
            let chain = inherit_chain(&merged, name);
            out.insert(
                name.clone(),
                CompiledDefinition {
                    name: name.clone(),
                    allow_in: allow_in.remove(name).unwrap_or_default(),
                    disallow_in: effective_disallowed_parents(&merged, &chain, name),
                    allow_attributes: allow_attributes.remove(name).unwrap_or_default(),
                    disallow_attributes: effective_disallowed_attributes(&merged, &chain),
                    is_block: resolve_flag(&merged, name, |raw| raw.is_block),
                    is_inline: resolve_flag(&merged, name, |raw| raw.is_inline),
                    is_object: resolve_flag(&merged, name, |raw| raw.is_object),
                    is_limit: resolve_flag(&merged, name, |raw| raw.is_limit),
                    is_selectable: resolve_flag(&merged, name, |raw| raw.is_selectable),
                    is_content: resolve_flag(&merged, name, |raw| raw.is_content),
                },
            );
        }
        out
    }

    // ── Type-flag queries (composite semantics) ──────────────────────────

    /// Explicit object flag, or an item that simultaneously behaves as a
    /// limit, is selectable and counts as content.
    pub fn is_object(&self, name: &str) -> bool {
        self.compiled()
            .get(name)
            .map(|def| {
                def.is_object || (def.is_limit && def.is_selectable && def.is_content)
            })
            .unwrap_or(false)
    }

    pub fn is_limit(&self, name: &str) -> bool {
        self.compiled()
            .get(name)
            .map(|def| def.is_limit)
            .unwrap_or(false)
            || self.is_object(name)
    }

    pub fn is_selectable(&self, name: &str) -> bool {
        self.compiled()
            .get(name)
            .map(|def| def.is_selectable)
            .unwrap_or(false)
            || self.is_object(name)
    }

    pub fn is_content(&self, name: &str) -> bool {
        self.compiled()
            .get(name)
            .map(|def| def.is_content)
            .unwrap_or(false)
            || self.is_object(name)
    }

    pub fn is_block(&self, name: &str) -> bool {
        self.compiled()
            .get(name)
            .map(|def| def.is_block)
            .unwrap_or(false)
    }

    pub fn is_inline(&self, name: &str) -> bool {
        self.compiled()
            .get(name)
            .map(|def| def.is_inline)
            .unwrap_or(false)
    }

    // ── Child / attribute checks ─────────────────────────────────────────

    /// May an item named `child` sit at the end of `context`?
    pub fn check_child<'a>(
        &self,
        doc: &Document,
        context: impl Into<ContextRef<'a>>,
        child: &str,
    ) -> bool {
        let Some(ctx) = context.into().normalize(doc) else {
            return false;
        };
        self.check_child_in_context(&ctx, child)
    }

    /// Node-flavoured variant of [`check_child`](Schema::check_child).
    pub fn check_child_node<'a>(
        &self,
        doc: &Document,
        context: impl Into<ContextRef<'a>>,
        child: NodeId,
    ) -> bool {
        match doc.schema_name_of(child) {
            Some(name) => {
                let name = name.to_string();
                self.check_child(doc, context, &name)
            }
            None => false,
        }
    }

    pub fn check_child_in_context(&self, context: &SchemaContext, child: &str) -> bool {
        for hook in &self.child_checks {
            if let Some(answer) = hook(self, context, child) {
                return answer;
            }
        }
        let compiled = self.compiled();
        let Some(def) = compiled.get(child) else {
            return false;
        };
        let Some(parent) = context.last_name() else {
            return false;
        };
        def.allow_in.contains(parent) && !def.disallow_in.contains(parent)
    }

    /// May the attribute `key` be set on the item at the end of `context`?
    pub fn check_attribute<'a>(
        &self,
        doc: &Document,
        context: impl Into<ContextRef<'a>>,
        key: &str,
    ) -> bool {
        let Some(ctx) = context.into().normalize(doc) else {
            return false;
        };
        self.check_attribute_in_context(&ctx, key)
    }

    pub fn check_attribute_in_context(&self, context: &SchemaContext, key: &str) -> bool {
        for hook in &self.attribute_checks {
            if let Some(answer) = hook(self, context, key) {
                return answer;
            }
        }
        let compiled = self.compiled();
        let Some(item) = context.last_name() else {
            return false;
        };
        let Some(def) = compiled.get(item) else {
            return false;
        };
        def.allow_attributes.contains(key) && !def.disallow_attributes.contains(key)
    }

    // ── Structure queries ────────────────────────────────────────────────

    /// Is merging the elements around `position` structurally valid?
    pub fn check_merge(&self, doc: &Document, position: &Position) -> Result<bool, SchemaError> {
        let before = position
            .node_before(doc)?
            .filter(|&node| doc.is_element(node))
            .ok_or(SchemaError::NoElementBefore)?;
        let after = position
            .node_after(doc)?
            .filter(|&node| doc.is_element(node))
            .ok_or(SchemaError::NoElementAfter)?;
        Ok(self.check_merge_elements(doc, before, after))
    }

    /// Is merging `to_merge` into `base` structurally valid? Objects never
    /// merge; otherwise every direct child of `to_merge` must be allowed
    /// inside `base`.
    pub fn check_merge_elements(&self, doc: &Document, base: NodeId, to_merge: NodeId) -> bool {
        let base_name = doc.schema_name_of(base).unwrap_or_default();
        let merge_name = doc.schema_name_of(to_merge).unwrap_or_default();
        if self.is_object(base_name) || self.is_object(merge_name) {
            return false;
        }
        let children: Vec<NodeId> = doc.children_of(to_merge).to_vec();
        children
            .iter()
            .all(|&child| self.check_child_node(doc, base, child))
    }

    /// Nearest ancestor flagged as a limit that covers all given ranges;
    /// the root when nothing closer qualifies.
    pub fn limit_element(&self, doc: &Document, ranges: &[Range]) -> Option<NodeId> {
        let mut element: Option<NodeId> = None;
        for range in ranges {
            let range_ancestor = range
                .common_ancestor(doc)
                .unwrap_or(range.start.root);
            element = Some(match element {
                None => range_ancestor,
                Some(found) => lowest_common_ancestor(doc, found, range_ancestor)?,
            });
        }
        let mut element = element?;
        loop {
            let name = doc.schema_name_of(element).unwrap_or_default();
            if doc.is_element(element) && self.is_limit(name) {
                return Some(element);
            }
            match doc.parent_of(element) {
                Some(parent) => element = parent,
                None => return Some(element),
            }
        }
    }

    pub fn limit_element_for_selection(
        &self,
        doc: &Document,
        selection: &Selection,
    ) -> Option<NodeId> {
        self.limit_element(doc, selection.ranges())
    }

    /// Scans outward from `position` for the nearest spot a collapsed text
    /// selection or an object element could validly sit. The scan never
    /// leaves the nearest limit element; `None` when nothing is found.
    /// When scanning both ways the closer candidate wins, the backward one
    /// on an exact tie.
    pub fn nearest_selection_range(
        &self,
        doc: &Document,
        position: &Position,
        direction: ScanDirection,
    ) -> Option<Range> {
        if self.check_child(doc, position, "$text") {
            return Some(Range::collapsed(position.clone()));
        }
        let mut limit = position.root;
        if let Ok(ancestors) = position.ancestors(doc) {
            for &ancestor in ancestors.iter().rev() {
                let name = doc.schema_name_of(ancestor).unwrap_or_default();
                if self.is_limit(name) {
                    limit = ancestor;
                    break;
                }
            }
        }
        let boundaries = Range::inside(doc, limit).ok()?;
        let mut backward = matches!(direction, ScanDirection::Both | ScanDirection::Backward)
            .then(|| {
                TreeWalker::new(doc, position.clone(), WalkerDirection::Backward)
                    .with_boundaries(boundaries.clone())
            });
        let mut forward = matches!(direction, ScanDirection::Both | ScanDirection::Forward)
            .then(|| {
                TreeWalker::new(doc, position.clone(), WalkerDirection::Forward)
                    .with_boundaries(boundaries)
            });
        loop {
            let mut progressed = false;
            if let Some(walker) = backward.as_mut() {
                match walker.next() {
                    Some(step) => {
                        progressed = true;
                        if let Some(found) =
                            self.selection_candidate(doc, &step, WalkerValue::ElementEnd)
                        {
                            return Some(found);
                        }
                    }
                    None => backward = None,
                }
            }
            if let Some(walker) = forward.as_mut() {
                match walker.next() {
                    Some(step) => {
                        progressed = true;
                        if let Some(found) =
                            self.selection_candidate(doc, &step, WalkerValue::ElementStart)
                        {
                            return Some(found);
                        }
                    }
                    None => forward = None,
                }
            }
            if !progressed {
                return None;
            }
        }
    }

    fn selection_candidate(
        &self,
        doc: &Document,
        step: &WalkerStep,
        entering: WalkerValue,
    ) -> Option<Range> {
        if step.value == entering {
            if let WalkerItem::Element(element) = step.item {
                let name = doc.schema_name_of(element).unwrap_or_default();
                if self.is_object(name) {
                    return Range::on_node(doc, element).ok();
                }
            }
        }
        if self.check_child(doc, &step.next_position, "$text") {
            return Some(Range::collapsed(step.next_position.clone()));
        }
        None
    }

    /// Walks ancestors from `position` upward to the first one that allows
    /// `child`; `None` once a limit boundary is crossed or no ancestor
    /// qualifies.
    pub fn find_allowed_parent(
        &self,
        doc: &Document,
        position: &Position,
        child: &str,
    ) -> Option<NodeId> {
        let mut parent = position.parent(doc).ok()?;
        loop {
            if self.check_child(doc, parent, child) {
                return Some(parent);
            }
            let name = doc.schema_name_of(parent).unwrap_or_default();
            if self.is_limit(name) {
                return None;
            }
            parent = doc.parent_of(parent)?;
        }
    }

    /// Whether the attribute may be set anywhere in the selection. For a
    /// collapsed selection the check runs against a phantom text item at
    /// the caret.
    pub fn check_attribute_in_selection(
        &self,
        doc: &Document,
        selection: &Selection,
        key: &str,
    ) -> bool {
        if selection.is_collapsed() {
            let Some(position) = selection.first_position() else {
                return false;
            };
            let Some(ctx) = SchemaContext::from_position(doc, position) else {
                return false;
            };
            let ctx = ctx.with(SchemaContextItem::named("$text"));
            return self.check_attribute_in_context(&ctx, key);
        }
        for range in selection.ranges() {
            for item in range.items(doc) {
                let allowed = match item {
                    WalkerItem::Element(element) => self.check_attribute(doc, element, key),
                    WalkerItem::Text(proxy) => {
                        self.check_attribute(doc, proxy.text_node(), key)
                    }
                };
                if allowed {
                    return true;
                }
            }
        }
        false
    }

    /// Fragments the given ranges into the maximal sub-ranges whose every
    /// contained item allows the attribute.
    pub fn valid_ranges(
        &self,
        doc: &Document,
        ranges: &[Range],
        key: &str,
    ) -> Result<Vec<Range>, ModelError> {
        let mut out = Vec::new();
        for range in ranges {
            for flat in range.minimal_flat_ranges(doc)? {
                self.valid_ranges_for_flat(doc, &flat, key, &mut out)?;
            }
        }
        Ok(out)
    }

    fn valid_ranges_for_flat(
        &self,
        doc: &Document,
        range: &Range,
        key: &str,
        out: &mut Vec<Range>,
    ) -> Result<(), ModelError> {
        let steps: Vec<WalkerStep> = TreeWalker::new(
            doc,
            range.start.clone(),
            WalkerDirection::Forward,
        )
        .with_boundaries(range.clone())
        .shallow()
        .collect();
        let mut start = range.start.clone();
        let mut end = range.start.clone();
        for step in steps {
            let allowed = match step.item {
                WalkerItem::Element(element) => {
                    self.valid_ranges_for_flat(doc, &Range::inside(doc, element)?, key, out)?;
                    self.check_attribute(doc, element, key)
                }
                WalkerItem::Text(proxy) => self.check_attribute(doc, proxy.text_node(), key),
            };
            if !allowed {
                if !start.is_equal(&end) {
                    out.push(Range::new(start, end.clone()));
                }
                start = step.next_position.clone();
            }
            end = step.next_position;
        }
        if !start.is_equal(&end) {
            out.push(Range::new(start, end));
        }
        Ok(())
    }

    /// Strips every attribute the schema rejects in the node's actual
    /// context, recursively, issuing the removals through the writer so
    /// adjacent runs that become identical merge back together.
    pub fn remove_disallowed_attributes(
        &self,
        writer: &mut Writer<'_>,
        nodes: &[NodeId],
    ) -> Result<(), ModelError> {
        for &node in nodes {
            let keys: Vec<String> = writer
                .document()
                .attributes(node)
                .map(|attrs| attrs.keys().cloned().collect())
                .unwrap_or_default();
            for key in keys {
                if !self.check_attribute(writer.document(), node, &key) {
                    writer.remove_attribute(node, &key)?;
                }
            }
            let children: Vec<NodeId> = writer.document().children_of(node).to_vec();
            self.remove_disallowed_attributes(writer, &children)?;
        }
        Ok(())
    }
}

/// Inheritance chain of `name`, outermost ancestor first, ending with the
/// item itself. Follows `inherit_all_from` links, cycle-guarded.
fn inherit_chain<'a>(
    merged: &'a IndexMap<String, SchemaItemDefinition>,
    name: &'a str,
) -> Vec<&'a str> {
    let mut chain = vec![name];
    let mut seen: HashSet<&str> = HashSet::from([name]);
    let mut cursor = name;
    while let Some(base) = merged
        .get(cursor)
        .and_then(|raw| raw.inherit_all_from.as_deref())
    {
        if !seen.insert(base) || !merged.contains_key(base) {
            break;
        }
        chain.push(base);
        cursor = base;
    }
    chain.reverse();
    chain
}

/// Effective disallowed-parents set after layering: symmetric
/// `disallow_children` grants first, then each inheritance layer from the
/// outermost ancestor to the item itself. Within a layer allows lift
/// inherited disallows before the layer's own disallows land, so the last
/// explicit word on the most specific definition wins.
fn effective_disallowed_parents(
    merged: &IndexMap<String, SchemaItemDefinition>,
    chain: &[&str],
    name: &str,
) -> HashSet<String> {
    let mut disallowed: HashSet<String> = HashSet::new();
    for (parent, raw) in merged {
        if raw.allow_children.iter().any(|child| child == name) {
            disallowed.remove(parent);
        }
        if raw.disallow_children.iter().any(|child| child == name) {
            disallowed.insert(parent.clone());
        }
    }
    for layer in chain {
        let raw = &merged[*layer];
        for parent in &raw.allow_in {
            disallowed.remove(parent);
        }
        for parent in &raw.disallow_in {
            disallowed.insert(parent.clone());
        }
    }
    disallowed
}

fn effective_disallowed_attributes(
    merged: &IndexMap<String, SchemaItemDefinition>,
    chain: &[&str],
) -> HashSet<String> {
    let mut disallowed: HashSet<String> = HashSet::new();
    for layer in chain {
        let raw = &merged[*layer];
        for key in &raw.allow_attributes {
            disallowed.remove(key);
        }
        for key in &raw.disallow_attributes {
            disallowed.insert(key.clone());
        }
    }
    disallowed
}

/// Own explicit flag, else the first explicit answer up the
/// `inherit_types_from` edges (depth-first, cycle-guarded).
fn resolve_flag(
    merged: &IndexMap<String, SchemaItemDefinition>,
    name: &str,
    flag: fn(&SchemaItemDefinition) -> Option<bool>,
) -> bool {
    fn walk(
        merged: &IndexMap<String, SchemaItemDefinition>,
        name: &str,
        flag: fn(&SchemaItemDefinition) -> Option<bool>,
        seen: &mut HashSet<String>,
    ) -> Option<bool> {
        if !seen.insert(name.to_string()) {
            return None;
        }
        let raw = merged.get(name)?;
        if let Some(value) = flag(raw) {
            return Some(value);
        }
        for source in &raw.inherit_types_from {
            if let Some(value) = walk(merged, source, flag, seen) {
                return Some(value);
            }
        }
        None
    }
    walk(merged, name, flag, &mut HashSet::new()).unwrap_or(false)
}

fn lowest_common_ancestor(doc: &Document, a: NodeId, b: NodeId) -> Option<NodeId> {
    if a == b {
        return Some(a);
    }
    let mut chain_a = doc.ancestors_of(a);
    chain_a.push(a);
    let mut chain_b = doc.ancestors_of(b);
    chain_b.push(b);
    let mut common = None;
    for (x, y) in chain_a.iter().zip(chain_b.iter()) {
        if x == y {
            common = Some(*x);
        } else {
            break;
        }
    }
    common
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with(items: &[(&str, SchemaItemDefinition)]) -> Schema {
        let mut schema = Schema::new();
        for (name, def) in items {
            schema.register(name, def.clone()).unwrap();
        }
        schema
    }

    fn ctx(names: &[&str]) -> SchemaContext {
        SchemaContext::from_names(names.iter().copied())
    }

    #[test]
    fn register_twice_fails() {
        let mut schema = Schema::new();
        schema.register("paragraph", SchemaItemDefinition::new()).unwrap();
        assert!(matches!(
            schema.register("paragraph", SchemaItemDefinition::new()),
            Err(SchemaError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn extend_missing_fails() {
        let mut schema = Schema::new();
        assert!(matches!(
            schema.extend("ghost", SchemaItemDefinition::new()),
            Err(SchemaError::CannotExtendMissing(_))
        ));
    }

    #[test]
    fn definition_of_unknown_name_is_none() {
        let schema = Schema::new();
        assert!(schema.definition("ghost").is_none());
        assert!(!schema.is_registered("ghost"));
    }

    #[test]
    fn plain_allow_in() {
        let schema = schema_with(&[
            ("$root", SchemaItemDefinition::new()),
            (
                "paragraph",
                SchemaItemDefinition::new().allow_in(["$root"]),
            ),
        ]);
        assert!(schema.check_child_in_context(&ctx(&["$root"]), "paragraph"));
        assert!(!schema.check_child_in_context(&ctx(&["$root"]), "$text"));
        assert!(!schema.check_child_in_context(&ctx(&["paragraph"]), "paragraph"));
    }

    #[test]
    fn allow_children_is_symmetric() {
        let schema = schema_with(&[
            ("table", SchemaItemDefinition::new().allow_children(["row"])),
            ("row", SchemaItemDefinition::new()),
        ]);
        assert!(schema.check_child_in_context(&ctx(&["table"]), "row"));
    }

    #[test]
    fn allow_where_inherits_parents_transitively() {
        let schema = schema_with(&[
            ("$root", SchemaItemDefinition::new()),
            ("$block", SchemaItemDefinition::new().allow_in(["$root"])),
            (
                "paragraph",
                SchemaItemDefinition::new().allow_where(["$block"]),
            ),
            (
                "heading",
                SchemaItemDefinition::new().allow_where(["paragraph"]),
            ),
        ]);
        assert!(schema.check_child_in_context(&ctx(&["$root"]), "paragraph"));
        assert!(schema.check_child_in_context(&ctx(&["$root"]), "heading"));
    }

    #[test]
    fn allow_content_of_copies_allowed_children() {
        let schema = schema_with(&[
            ("$root", SchemaItemDefinition::new()),
            ("paragraph", SchemaItemDefinition::new().allow_in(["$root"])),
            ("$text", SchemaItemDefinition::new().allow_in(["paragraph"])),
            (
                "blockQuote",
                SchemaItemDefinition::new()
                    .allow_in(["$root"])
                    .allow_content_of(["$root"]),
            ),
        ]);
        assert!(schema.check_child_in_context(&ctx(&["blockQuote"]), "paragraph"));
        assert!(!schema.check_child_in_context(&ctx(&["blockQuote"]), "$text"));
    }

    #[test]
    fn self_referential_rules_terminate() {
        let schema = schema_with(&[
            (
                "listItem",
                SchemaItemDefinition::new()
                    .allow_in(["listItem"])
                    .allow_content_of(["listItem"]),
            ),
        ]);
        assert!(schema.check_child_in_context(&ctx(&["listItem"]), "listItem"));
    }

    #[test]
    fn rules_about_unregistered_items_are_dropped() {
        let schema = schema_with(&[
            ("$root", SchemaItemDefinition::new()),
            (
                "paragraph",
                SchemaItemDefinition::new()
                    .allow_in(["$root", "notRegistered"])
                    .allow_where(["alsoMissing"]),
            ),
        ]);
        let def = schema.definition("paragraph").unwrap();
        assert!(def.allow_in.contains("$root"));
        assert!(!def.allow_in.contains("notRegistered"));
    }

    #[test]
    fn disallow_beats_allow_on_the_same_item() {
        let schema = schema_with(&[
            ("p", SchemaItemDefinition::new()),
            (
                "a",
                SchemaItemDefinition::new().allow_in(["p"]).disallow_in(["p"]),
            ),
        ]);
        assert!(!schema.check_child_in_context(&ctx(&["p"]), "a"));
    }

    #[test]
    fn explicit_reallow_overrides_inherited_disallow_and_is_inherited() {
        let schema = schema_with(&[
            ("p", SchemaItemDefinition::new()),
            (
                "a",
                SchemaItemDefinition::new().allow_in(["p"]).disallow_in(["p"]),
            ),
            (
                "b",
                SchemaItemDefinition::new()
                    .inherit_all_from("a")
                    .allow_in(["p"]),
            ),
            ("c", SchemaItemDefinition::new().inherit_all_from("b")),
        ]);
        assert!(!schema.check_child_in_context(&ctx(&["p"]), "a"));
        assert!(schema.check_child_in_context(&ctx(&["p"]), "b"));
        assert!(schema.check_child_in_context(&ctx(&["p"]), "c"));
    }

    #[test]
    fn attribute_rules_with_inheritance() {
        let schema = schema_with(&[
            (
                "$text",
                SchemaItemDefinition::new().allow_attributes(["bold", "italic"]),
            ),
            (
                "caption",
                SchemaItemDefinition::new()
                    .allow_attributes_of(["$text"])
                    .disallow_attributes(["italic"]),
            ),
        ]);
        assert!(schema.check_attribute_in_context(&ctx(&["$text"]), "bold"));
        assert!(schema.check_attribute_in_context(&ctx(&["caption"]), "bold"));
        assert!(!schema.check_attribute_in_context(&ctx(&["caption"]), "italic"));
        assert!(!schema.check_attribute_in_context(&ctx(&["$text"]), "underline"));
    }

    #[test]
    fn implicit_object_needs_all_three_flags() {
        let schema = schema_with(&[
            (
                "full",
                SchemaItemDefinition::new().limit().selectable().content(),
            ),
            ("partial", SchemaItemDefinition::new().limit().selectable()),
            ("explicit", SchemaItemDefinition::new().object()),
        ]);
        assert!(schema.is_object("full"));
        assert!(!schema.is_object("partial"));
        assert!(schema.is_object("explicit"));
        // Objects imply the other composite flags.
        assert!(schema.is_limit("explicit"));
        assert!(schema.is_selectable("explicit"));
        assert!(schema.is_content("explicit"));
    }

    #[test]
    fn type_flags_inherit_but_own_word_wins() {
        let mut schema = schema_with(&[
            ("base", SchemaItemDefinition::new().block().limit()),
            (
                "child",
                SchemaItemDefinition::new().inherit_types_from(["base"]),
            ),
        ]);
        assert!(schema.is_block("child"));
        assert!(schema.is_limit("child"));
        schema
            .register(
                "loud",
                SchemaItemDefinition {
                    inherit_types_from: vec!["base".to_string()],
                    is_limit: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(schema.is_block("loud"));
        assert!(!schema.is_limit("loud"));
    }

    #[test]
    fn child_check_hooks_short_circuit() {
        let mut schema = schema_with(&[
            ("$root", SchemaItemDefinition::new()),
            ("paragraph", SchemaItemDefinition::new().allow_in(["$root"])),
        ]);
        schema.add_child_check(|_, context, child| {
            (child == "paragraph" && context.last_name() == Some("$root")).then_some(false)
        });
        schema.add_child_check(|_, _, _| Some(true));
        // First hook answers; the second never gets a say.
        assert!(!schema.check_child_in_context(&ctx(&["$root"]), "paragraph"));
        // First hook abstains; second answers.
        assert!(schema.check_child_in_context(&ctx(&["$root"]), "anything"));
    }

    #[test]
    fn compiled_cache_invalidated_by_extend() {
        let mut schema = schema_with(&[
            ("$root", SchemaItemDefinition::new()),
            ("paragraph", SchemaItemDefinition::new()),
        ]);
        assert!(!schema.check_child_in_context(&ctx(&["$root"]), "paragraph"));
        schema
            .extend("paragraph", SchemaItemDefinition::new().allow_in(["$root"]))
            .unwrap();
        assert!(schema.check_child_in_context(&ctx(&["$root"]), "paragraph"));
    }

    #[test]
    fn stored_definition_is_a_copy() {
        let mut schema = Schema::new();
        let mut def = SchemaItemDefinition::new().allow_in(["$root"]);
        schema.register("$root", SchemaItemDefinition::new()).unwrap();
        schema.register("paragraph", def.clone()).unwrap();
        // Caller keeps mutating its fragment; the schema must not notice.
        def.allow_in.clear();
        assert!(schema.check_child_in_context(&ctx(&["$root"]), "paragraph"));
    }
}
