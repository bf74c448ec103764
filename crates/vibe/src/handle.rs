//! Element handles
//!
//! A [`Handle`] is a node id plus the context it lives in. All library
//! behavior hangs off it: plain DOM access here, templating, scheduling,
//! listeners, observers and fetch helpers in their own modules.
//!
//! Mutators return `Result<&Self>` so calls chain with `?`:
//!
//! ```ignore
//! card.add_class("open")?.set_attr("aria-expanded", "true")?.append("<p>hi</p>")?;
//! ```

use std::collections::BTreeMap;
use std::fmt;

use dom::{Document, NodeId};
use serde_json::Value;

use crate::context::{PluginFn, Vibe};
use crate::error::Result;
use crate::events::{MutationKind, VibeEvent};
use crate::ident::unique_id;
use crate::mount::{Position, Target};
use crate::probe;

/// Something to insert relative to a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    /// Parsed as a fragment; every top-level node is inserted
    Markup(String),
    Node(NodeId),
}

impl Content {
    /// Markup when the string contains an element, text otherwise
    pub fn parse(value: &str) -> Self {
        if probe::is_html(value) {
            Content::Markup(value.to_string())
        } else {
            Content::Text(value.to_string())
        }
    }

    fn materialize(&self, doc: &mut Document) -> dom::Result<Vec<NodeId>> {
        match self {
            Content::Text(text) => Ok(vec![doc.create_text(text)]),
            Content::Markup(markup) => doc.parse_fragment(markup),
            Content::Node(node) => Ok(vec![*node]),
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::parse(value)
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::parse(&value)
    }
}

impl From<&Handle> for Content {
    fn from(handle: &Handle) -> Self {
        Content::Node(handle.node)
    }
}

impl From<NodeId> for Content {
    fn from(node: NodeId) -> Self {
        Content::Node(node)
    }
}

/// Options for [`Handle::clone_to`]
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Mount the copy here once ready; left detached when `None`
    pub to: Option<Target>,
    pub position: Position,
}

/// Options for [`Vibe::create_node`]
#[derive(Debug, Clone, Default)]
pub struct CreateNodeOptions {
    /// Allow tags outside the built-in list (custom elements)
    pub allow_any_tag: bool,
    pub to: Option<Target>,
    /// The node is only inserted when a position is given
    pub position: Option<Position>,
}

const ALLOWED_TAGS: &[&str] = &[
    "html", "head", "link", "meta", "script", "style", "title", "body", "article", "aside",
    "footer", "header", "h1", "h2", "h3", "h4", "h5", "h6", "main", "nav", "section",
    "blockquote", "div", "figure", "hr", "li", "ol", "p", "pre", "ul", "a", "code", "data",
    "time", "em", "i", "span", "strong", "audio", "source", "img", "track", "video", "iframe",
    "svg", "canvas", "noscript", "col", "colgroup", "button", "option", "fieldset", "label",
    "form", "input", "select", "textarea", "menu", "template",
];

#[derive(Clone)]
pub struct Handle {
    pub(crate) vibe: Vibe,
    pub(crate) node: NodeId,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.node).finish()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && std::sync::Arc::ptr_eq(&self.vibe.inner, &other.vibe.inner)
    }
}

impl Eq for Handle {}

impl Handle {
    pub(crate) fn new(vibe: Vibe, node: NodeId) -> Self {
        Self { vibe, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn vibe(&self) -> &Vibe {
        &self.vibe
    }

    fn mutate<R>(&self, kind: MutationKind, f: impl FnOnce(&mut Document) -> dom::Result<R>) -> Result<R> {
        self.vibe.mutate(self.node, kind, f)
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn id(&self) -> Result<Option<String>> {
        self.attr("id")
    }

    pub fn is_connected(&self) -> bool {
        self.vibe.read(|doc| doc.is_connected(self.node))
    }

    pub fn parent(&self) -> Result<Option<Handle>> {
        let parent = self.vibe.read(|doc| doc.parent(self.node))?;
        Ok(parent.map(|node| self.vibe.handle(node)))
    }

    pub fn tag_name(&self) -> Result<Option<String>> {
        self.vibe
            .read(|doc| Ok(doc.node(self.node)?.tag_name().map(str::to_string)))
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    pub fn text(&self) -> Result<String> {
        Ok(self.vibe.read(|doc| doc.text_content(self.node))?)
    }

    pub fn set_text(&self, text: &str) -> Result<&Self> {
        let is_text = self.vibe.read(|doc| doc.node(self.node).map(|n| n.is_text()))?;
        let kind = if is_text {
            MutationKind::CharacterData
        } else {
            MutationKind::ChildList
        };
        self.mutate(kind, |doc| doc.set_text_content(self.node, text))?;
        Ok(self)
    }

    pub fn html(&self) -> Result<String> {
        Ok(self.vibe.read(|doc| doc.inner_html(self.node))?)
    }

    pub fn set_html(&self, html: &str) -> Result<&Self> {
        self.mutate(MutationKind::ChildList, |doc| doc.set_inner_html(self.node, html))?;
        Ok(self)
    }

    pub fn outer_html(&self) -> Result<String> {
        Ok(self.vibe.read(|doc| doc.outer_html(self.node))?)
    }

    // ------------------------------------------------------------------
    // Style
    // ------------------------------------------------------------------

    /// Replace the whole inline style. An empty string is ignored.
    pub fn css(&self, text: &str) -> Result<&Self> {
        if text.is_empty() {
            return Ok(self);
        }
        self.set_attr("style", text)
    }

    /// One inline style property
    pub fn style(&self, name: &str) -> Result<Option<String>> {
        let style = self.attr("style")?.unwrap_or_default();
        let name = name.trim().to_ascii_lowercase();
        Ok(parse_style(&style)
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value))
    }

    /// Set one inline style property; an empty value removes it
    pub fn set_style(&self, name: &str, value: &str) -> Result<&Self> {
        let mut decls = parse_style(&self.attr("style")?.unwrap_or_default());
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match decls.iter().position(|(key, _)| *key == name) {
            Some(i) if value.is_empty() => {
                decls.remove(i);
            }
            Some(i) => decls[i].1 = value.to_string(),
            None if value.is_empty() => return Ok(self),
            None => decls.push((name, value.to_string())),
        }

        if decls.is_empty() {
            self.remove_attr("style")?;
            return Ok(self);
        }
        self.set_attr("style", &format_style(&decls))
    }

    // ------------------------------------------------------------------
    // Classes and attributes
    // ------------------------------------------------------------------

    /// Add whitespace-separated classes
    pub fn add_class(&self, classes: &str) -> Result<&Self> {
        self.mutate(attr_kind("class"), |doc| doc.add_class(self.node, classes))?;
        Ok(self)
    }

    pub fn remove_class(&self, classes: &str) -> Result<&Self> {
        self.mutate(attr_kind("class"), |doc| doc.remove_class(self.node, classes))?;
        Ok(self)
    }

    pub fn has_class(&self, class: &str) -> Result<bool> {
        Ok(self.vibe.read(|doc| doc.has_class(self.node, class))?)
    }

    pub fn toggle_class(&self, class: &str) -> Result<&Self> {
        if self.has_class(class)? {
            self.remove_class(class)
        } else {
            self.add_class(class)
        }
    }

    pub fn attr(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .vibe
            .read(|doc| doc.get_attribute(self.node, name).map(|v| v.map(str::to_string)))?)
    }

    pub fn set_attr(&self, name: &str, value: &str) -> Result<&Self> {
        self.mutate(attr_kind(name), |doc| doc.set_attribute(self.node, name, value))?;
        Ok(self)
    }

    pub fn remove_attr(&self, name: &str) -> Result<Option<String>> {
        self.mutate(attr_kind(name), |doc| doc.remove_attribute(self.node, name))
    }

    /// `data-{key}`
    pub fn data(&self, key: &str) -> Result<Option<String>> {
        self.attr(&format!("data-{key}"))
    }

    pub fn set_data(&self, key: &str, value: &str) -> Result<&Self> {
        self.set_attr(&format!("data-{key}"), value)
    }

    pub fn remove_data(&self, key: &str) -> Result<Option<String>> {
        self.remove_attr(&format!("data-{key}"))
    }

    /// All `data-*` attributes keyed by their suffix
    pub fn dataset(&self) -> Result<BTreeMap<String, String>> {
        self.vibe.read(|doc| {
            let node = doc.node(self.node)?;
            Ok(node
                .attributes
                .iter()
                .filter_map(|(name, value)| {
                    name.strip_prefix("data-")
                        .map(|key| (key.to_string(), value.clone()))
                })
                .collect())
        })
    }

    // ------------------------------------------------------------------
    // Insertion relative to self
    // ------------------------------------------------------------------

    /// Insert content as the last child
    pub fn append(&self, content: impl Into<Content>) -> Result<&Self> {
        let content = content.into();
        self.mutate(MutationKind::ChildList, |doc| {
            for node in content.materialize(doc)? {
                doc.append_child(self.node, node)?;
            }
            Ok(())
        })?;
        Ok(self)
    }

    /// Insert content as the first child
    pub fn prepend(&self, content: impl Into<Content>) -> Result<&Self> {
        let content = content.into();
        self.mutate(MutationKind::ChildList, |doc| {
            for node in content.materialize(doc)?.into_iter().rev() {
                doc.prepend_child(self.node, node)?;
            }
            Ok(())
        })?;
        Ok(self)
    }

    /// Insert content as the previous sibling
    pub fn before(&self, content: impl Into<Content>) -> Result<&Self> {
        let content = content.into();
        let parent = self.parent_id()?;
        self.vibe.mutate(parent, MutationKind::ChildList, |doc| {
            for node in content.materialize(doc)? {
                doc.insert_before(self.node, node)?;
            }
            Ok(())
        })?;
        Ok(self)
    }

    /// Insert content as the next sibling
    pub fn after(&self, content: impl Into<Content>) -> Result<&Self> {
        let content = content.into();
        let parent = self.parent_id()?;
        self.vibe.mutate(parent, MutationKind::ChildList, |doc| {
            for node in content.materialize(doc)?.into_iter().rev() {
                doc.insert_after(self.node, node)?;
            }
            Ok(())
        })?;
        Ok(self)
    }

    fn parent_id(&self) -> Result<NodeId> {
        Ok(self
            .vibe
            .read(|doc| doc.parent(self.node))?
            .unwrap_or(self.node))
    }

    // ------------------------------------------------------------------
    // Insertion of self relative to a target
    // ------------------------------------------------------------------

    /// Move self to the end of `target`. Unresolved targets are a no-op.
    pub fn append_to(&self, target: impl Into<Target>) -> Result<&Self> {
        self.place(target.into(), Position::Append)
    }

    pub fn prepend_to(&self, target: impl Into<Target>) -> Result<&Self> {
        self.place(target.into(), Position::Prepend)
    }

    /// Move self to just before `target`
    pub fn insert_before(&self, target: impl Into<Target>) -> Result<&Self> {
        self.place(target.into(), Position::Before)
    }

    pub fn insert_after(&self, target: impl Into<Target>) -> Result<&Self> {
        self.place(target.into(), Position::After)
    }

    fn place(&self, target: Target, position: Position) -> Result<&Self> {
        match self.vibe.read(|doc| target.resolve(doc))? {
            Some(node) => self.vibe.insert(self.node, node, position)?,
            None => tracing::debug!("{} not found, node {} left in place", target, self.node),
        }
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// First descendant matching `selector`
    pub fn select(&self, selector: &str) -> Result<Option<Handle>> {
        let found = self.vibe.read(|doc| doc.query_selector(self.node, selector))?;
        Ok(found.map(|node| self.vibe.handle(node)))
    }

    pub fn select_all(&self, selector: &str) -> Result<Vec<Handle>> {
        let found = self
            .vibe
            .read(|doc| doc.query_selector_all(self.node, selector))?;
        Ok(found.into_iter().map(|node| self.vibe.handle(node)).collect())
    }

    /// Element children, optionally only those matching `filter`
    pub fn children(&self, filter: Option<&str>) -> Result<Vec<Handle>> {
        let nodes = self.vibe.read(|doc| -> dom::Result<Vec<NodeId>> {
            let children = doc.element_children(self.node)?;
            let Some(selector) = filter else {
                return Ok(children);
            };
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                if doc.matches(child, selector)? {
                    out.push(child);
                }
            }
            Ok(out)
        })?;
        Ok(nodes.into_iter().map(|node| self.vibe.handle(node)).collect())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Remove self from the tree. With `keep`, also return a detached deep
    /// copy carrying the same id for later re-insertion.
    ///
    /// Without `keep` the element is done with: observers, pending queue
    /// entries, listeners and state of self and its descendants are
    /// released. With `keep` they stay, so self can be put back as is.
    pub fn detach(&self, keep: bool) -> Result<Option<Handle>> {
        let parent = self.parent_id()?;
        self.vibe
            .mutate(parent, MutationKind::ChildList, |doc| doc.remove(self.node))?;
        self.vibe
            .events()
            .publish(VibeEvent::Detached { node: self.node });
        tracing::debug!("node {} detached", self.node);

        if !keep {
            self.release_subtree()?;
            return Ok(None);
        }
        let copy = self.vibe.write(|doc| doc.clone_node(self.node, true))?;
        Ok(Some(self.vibe.handle(copy)))
    }

    fn release_subtree(&self) -> Result<()> {
        let mut nodes = self.vibe.read(|doc| doc.arena().descendants(self.node))?;
        nodes.push(self.node);
        for node in nodes {
            self.vibe.forget_element(node);
        }
        Ok(())
    }

    /// Deep copy with a fresh id, mounted once ready when `to` is given
    pub fn clone_to(&self, options: CloneOptions) -> Result<Handle> {
        let id = unique_id(&self.vibe.config().id_prefix);
        let copy = self.vibe.write(|doc| -> dom::Result<NodeId> {
            let copy = doc.clone_node(self.node, true)?;
            doc.set_attribute(copy, "id", &id)?;
            Ok(copy)
        })?;
        let copy = self.vibe.handle(copy);

        if let Some(to) = options.to {
            match self.vibe.read(|doc| to.resolve(doc))? {
                Some(target) => {
                    let pending = copy.clone();
                    let position = options.position;
                    self.vibe.ready(move || pending.finish_mount(target, position));
                }
                None => tracing::debug!("clone target {} not found, copy left detached", to),
            }
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // State, props and plugins
    // ------------------------------------------------------------------

    pub fn state(&self) -> Value {
        self.vibe.with_element(self.node, |el| el.state.clone())
    }

    pub fn set_state(&self, state: Value) -> &Self {
        self.vibe.with_element(self.node, |el| el.state = state);
        self
    }

    /// One key of an object state
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.vibe
            .with_element(self.node, |el| el.state.get(key).cloned())
    }

    /// Merge one key into an object state
    pub fn update_state(&self, key: &str, value: Value) -> &Self {
        self.vibe.with_element(self.node, |el| {
            if !el.state.is_object() {
                el.state = Value::Object(Default::default());
            }
            if let Some(map) = el.state.as_object_mut() {
                map.insert(key.to_string(), value);
            }
        });
        self
    }

    /// Back to the state the element was rendered with
    pub fn reset_state(&self) -> &Self {
        self.vibe
            .with_element(self.node, |el| el.state = el.orig_state.clone());
        self
    }

    pub fn props(&self) -> Value {
        self.vibe.with_element(self.node, |el| el.props.clone())
    }

    pub fn add_plugin(
        &self,
        name: impl Into<String>,
        f: impl Fn(&Handle, &[Value]) -> Value + Send + Sync + 'static,
    ) -> &Self {
        let f: PluginFn = std::sync::Arc::new(f);
        self.vibe
            .with_element(self.node, |el| el.plugins.insert(name.into(), f));
        self
    }

    /// Plugin by name, falling back to the context's function table
    pub fn plugin(&self, name: &str) -> Option<PluginFn> {
        self.vibe
            .with_element(self.node, |el| el.plugins.get(name).cloned())
            .or_else(|| self.vibe.function(name))
    }

    pub fn plugin_names(&self) -> Vec<String> {
        let mut names = self
            .vibe
            .with_element(self.node, |el| el.plugins.keys().cloned().collect::<Vec<_>>());
        names.sort();
        names
    }

    pub fn call_plugin(&self, name: &str, args: &[Value]) -> Option<Value> {
        let f = self.plugin(name)?;
        Some(f(self, args))
    }

    /// Run `f` with this handle, for inline chains
    pub fn run(&self, f: impl FnOnce(&Handle)) -> &Self {
        f(self);
        self
    }

    /// Run the component initializer again, if there is one
    pub fn rerun_init(&self) -> bool {
        match self.vibe.with_element(self.node, |el| el.init.clone()) {
            Some(init) => {
                init(self);
                true
            }
            None => false,
        }
    }
}

impl Vibe {
    /// Create an element with a fresh id and the context class.
    ///
    /// Tags outside the built-in list become `div` unless
    /// `allow_any_tag` is set. The node is inserted only when a position is
    /// given; at document level only append and prepend are honored.
    pub fn create_node(&self, tag: &str, options: CreateNodeOptions) -> Result<Handle> {
        let tag = if options.allow_any_tag || ALLOWED_TAGS.contains(&tag) {
            tag
        } else {
            "div"
        };
        let id = unique_id(&self.config().id_prefix);
        let class = self.config().class_name.clone();
        let node = self.write(|doc| -> dom::Result<NodeId> {
            let node = doc.create_element(tag)?;
            doc.set_attribute(node, "id", &id)?;
            doc.add_class(node, &class)?;
            Ok(node)
        })?;
        let handle = self.handle(node);

        if let Some(position) = options.position {
            let position = match position {
                Position::Prepend => Position::Prepend,
                _ => Position::Append,
            };
            let to = options.to.unwrap_or_default();
            handle.place(to, position)?;
        }
        Ok(handle)
    }
}

fn attr_kind(name: &str) -> MutationKind {
    MutationKind::Attributes {
        name: name.to_ascii_lowercase(),
    }
}

fn parse_style(text: &str) -> Vec<(String, String)> {
    text.split(';')
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn format_style(decls: &[(String, String)]) -> String {
    decls
        .iter()
        .map(|(name, value)| format!("{name}: {value};"))
        .collect::<Vec<_>>()
        .join(" ")
}
