//! Document - the mutable tree the component library drives
//!
//! This handles:
//! - Skeleton construction (`#document` → `html` → `head` + `body`)
//! - Tree mutation (append, prepend, sibling insertion, detach, clone)
//! - Content access (text, inner/outer markup)
//! - Attribute, class and id bookkeeping
//! - Selector queries

use ahash::AHashMap;

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::markup;
use crate::selector::SelectorList;
use crate::types::*;
use crate::utils;

/// Owned document tree
#[derive(Debug, Clone)]
pub struct Document {
    arena: DomArena,
    document_id: NodeId,
    head_id: NodeId,
    body_id: NodeId,
    ready_state: ReadyState,

    /// `id` attribute → node, verified on lookup
    id_index: AHashMap<String, NodeId>,
}

impl Document {
    /// Create a fully loaded empty document
    pub fn new() -> Self {
        Self::with_ready_state(ReadyState::Complete)
    }

    /// Create an empty document in the given loading state
    pub fn with_ready_state(ready_state: ReadyState) -> Self {
        let mut arena = DomArena::new();
        let document_id = arena.add_node(DomNode::new(0, NodeType::Document, "#document"));
        let html_id = arena.add_node(DomNode::element(0, "html"));
        let head_id = arena.add_node(DomNode::element(0, "head"));
        let body_id = arena.add_node(DomNode::element(0, "body"));

        let mut doc = Self {
            arena,
            document_id,
            head_id,
            body_id,
            ready_state,
            id_index: AHashMap::new(),
        };

        // The skeleton ids are fresh, these cannot fail
        for (parent, child) in [(document_id, html_id), (html_id, head_id), (html_id, body_id)] {
            let _ = doc.link_last(parent, child);
        }
        doc
    }

    /// Parse a body fragment into a new, fully loaded document
    pub fn from_body_html(html: &str) -> Result<Self> {
        let mut doc = Self::new();
        doc.set_inner_html(doc.body_id, html)?;
        Ok(doc)
    }

    pub fn arena(&self) -> &DomArena {
        &self.arena
    }

    pub fn document_id(&self) -> NodeId {
        self.document_id
    }

    pub fn head(&self) -> NodeId {
        self.head_id
    }

    pub fn body(&self) -> NodeId {
        self.body_id
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn set_ready_state(&mut self, state: ReadyState) {
        self.ready_state = state;
    }

    pub fn node(&self, node_id: NodeId) -> Result<&DomNode> {
        self.arena.get(node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.arena.contains(node_id)
    }

    /// Create a detached element
    pub fn create_element(&mut self, tag: &str) -> Result<NodeId> {
        let valid = !tag.is_empty()
            && tag.starts_with(|c: char| c.is_ascii_alphabetic())
            && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(DomError::InvalidTagName(tag.to_string()));
        }
        Ok(self.arena.add_node(DomNode::element(0, tag)))
    }

    /// Create a detached text node
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.arena.add_node(DomNode::text(0, text))
    }

    /// Whether the node is reachable from the document root
    pub fn is_connected(&self, node_id: NodeId) -> bool {
        if node_id == self.document_id {
            return true;
        }
        self.arena
            .ancestors(node_id)
            .is_ok_and(|ancestors| ancestors.last() == Some(&self.document_id))
    }

    pub fn parent(&self, node_id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.arena.get(node_id)?.parent_id)
    }

    /// Element children in order
    pub fn element_children(&self, node_id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .arena
            .children(node_id)?
            .into_iter()
            .filter(|child| child.is_element())
            .map(|child| child.node_id)
            .collect())
    }

    // ------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------

    /// Append `child` as the last child of `parent`, moving it if attached elsewhere
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insertion(parent, child)?;
        self.remove(child)?;
        self.link_last(parent, child)
    }

    /// Insert `child` as the first child of `parent`
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_insertion(parent, child)?;
        self.remove(child)?;
        self.link_at(parent, 0, child)
    }

    /// Insert `node` immediately before `reference` (`reference.before(node)`)
    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) -> Result<()> {
        self.insert_sibling(reference, node, 0)
    }

    /// Insert `node` immediately after `reference` (`reference.after(node)`)
    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> Result<()> {
        self.insert_sibling(reference, node, 1)
    }

    fn insert_sibling(&mut self, reference: NodeId, node: NodeId, offset: usize) -> Result<()> {
        if reference == node {
            return Ok(());
        }
        let parent = self.arena.get(reference)?.parent_id.ok_or_else(|| {
            DomError::HierarchyRequest(format!("node {reference} has no parent"))
        })?;
        self.check_insertion(parent, node)?;
        self.remove(node)?;

        let index = self.child_index(parent, reference)?;
        self.link_at(parent, index + offset, node)
    }

    /// Detach a node from its parent. Detached nodes are a no-op.
    pub fn remove(&mut self, node_id: NodeId) -> Result<()> {
        let Some(parent) = self.arena.get(node_id)?.parent_id else {
            return Ok(());
        };
        self.arena
            .get_mut(parent)?
            .children_ids
            .retain(|id| *id != node_id);
        self.arena.get_mut(node_id)?.parent_id = None;
        Ok(())
    }

    /// Remove all children of a node
    pub fn clear_children(&mut self, node_id: NodeId) -> Result<()> {
        let children = std::mem::take(&mut self.arena.get_mut(node_id)?.children_ids);
        for child in children {
            self.arena.get_mut(child)?.parent_id = None;
        }
        Ok(())
    }

    /// Copy a node, optionally with its subtree. The copy is detached.
    pub fn clone_node(&mut self, node_id: NodeId, deep: bool) -> Result<NodeId> {
        let source = self.arena.get(node_id)?;
        let mut copy = DomNode::new(0, source.node_type, source.node_name.clone());
        copy.node_value = source.node_value.clone();
        copy.attributes = source.attributes.clone();
        let children = source.children_ids.clone();

        let copy_id = self.arena.add_node(copy);
        self.index_id(copy_id);

        if deep {
            for child in children {
                let child_copy = self.clone_node(child, true)?;
                self.link_last(copy_id, child_copy)?;
            }
        }
        Ok(copy_id)
    }

    fn check_insertion(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let parent_node = self.arena.get(parent)?;
        if !parent_node.node_type.is_container() {
            return Err(DomError::HierarchyRequest(format!(
                "{} cannot have children",
                parent_node.node_name
            )));
        }
        if child == self.document_id {
            return Err(DomError::HierarchyRequest(
                "the document cannot be inserted".to_string(),
            ));
        }
        if child == parent || self.arena.ancestors(parent)?.contains(&child) {
            return Err(DomError::HierarchyRequest(format!(
                "node {child} is an ancestor of {parent}"
            )));
        }
        Ok(())
    }

    fn child_index(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.arena
            .get(parent)?
            .children_ids
            .iter()
            .position(|id| *id == child)
            .ok_or_else(|| DomError::HierarchyRequest(format!("{child} is not a child of {parent}")))
    }

    fn link_last(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let len = self.arena.get(parent)?.children_ids.len();
        self.link_at(parent, len, child)
    }

    fn link_at(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.arena.get_mut(child)?.parent_id = Some(parent);
        let children = &mut self.arena.get_mut(parent)?.children_ids;
        let index = index.min(children.len());
        children.insert(index, child);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    /// Concatenated text of the node and its descendants
    pub fn text_content(&self, node_id: NodeId) -> Result<String> {
        utils::get_text_content(&self.arena, node_id)
    }

    /// Replace all children with a single text node (none for empty text)
    pub fn set_text_content(&mut self, node_id: NodeId, text: &str) -> Result<()> {
        let node = self.arena.get_mut(node_id)?;
        if matches!(node.node_type, NodeType::Text | NodeType::Comment) {
            node.node_value = text.to_string();
            return Ok(());
        }

        self.clear_children(node_id)?;
        if !text.is_empty() {
            let text_id = self.create_text(text);
            self.link_last(node_id, text_id)?;
        }
        Ok(())
    }

    pub fn inner_html(&self, node_id: NodeId) -> Result<String> {
        markup::serialize_children(&self.arena, node_id)
    }

    pub fn outer_html(&self, node_id: NodeId) -> Result<String> {
        markup::serialize_node(&self.arena, node_id)
    }

    /// Replace all children with the parsed markup
    pub fn set_inner_html(&mut self, node_id: NodeId, html: &str) -> Result<()> {
        if !self.arena.get(node_id)?.node_type.is_container() {
            return self.set_text_content(node_id, html);
        }
        self.clear_children(node_id)?;
        for child in self.parse_fragment(html)? {
            self.link_last(node_id, child)?;
        }
        Ok(())
    }

    /// Parse markup into detached nodes owned by this document
    pub fn parse_fragment(&mut self, html: &str) -> Result<Vec<NodeId>> {
        let first_new = self.arena.next_id();
        let roots = markup::parse_fragment(&mut self.arena, html)?;
        for id in first_new..self.arena.next_id() {
            self.index_id(id);
        }
        Ok(roots)
    }

    // ------------------------------------------------------------------
    // Attributes and classes
    // ------------------------------------------------------------------

    pub fn get_attribute(&self, node_id: NodeId, name: &str) -> Result<Option<&str>> {
        Ok(self.arena.get(node_id)?.attr(name))
    }

    pub fn set_attribute(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let node = self.arena.get_mut(node_id)?;
        if !node.is_element() {
            return Err(DomError::InvalidNodeType {
                expected: "element".to_string(),
                actual: node.node_name.clone(),
            });
        }
        node.set_attr(&name.to_ascii_lowercase(), value);
        if name.eq_ignore_ascii_case("id") {
            self.index_id(node_id);
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, node_id: NodeId, name: &str) -> Result<Option<String>> {
        let removed = self
            .arena
            .get_mut(node_id)?
            .remove_attr(&name.to_ascii_lowercase());
        if let (Some(old), true) = (&removed, name.eq_ignore_ascii_case("id")) {
            if self.id_index.get(old) == Some(&node_id) {
                self.id_index.remove(old);
            }
        }
        Ok(removed)
    }

    /// Add whitespace separated class tokens, skipping ones already present
    pub fn add_class(&mut self, node_id: NodeId, classes: &str) -> Result<()> {
        let node = self.arena.get(node_id)?;
        let mut list: Vec<String> = node.classes().map(String::from).collect();
        for class in classes.split_ascii_whitespace() {
            if !list.iter().any(|c| c == class) {
                list.push(class.to_string());
            }
        }
        self.set_attribute(node_id, "class", &list.join(" "))
    }

    pub fn remove_class(&mut self, node_id: NodeId, classes: &str) -> Result<()> {
        let node = self.arena.get(node_id)?;
        if node.attr("class").is_none() {
            return Ok(());
        }
        let remove: Vec<&str> = classes.split_ascii_whitespace().collect();
        let list: Vec<String> = node
            .classes()
            .filter(|c| !remove.contains(c))
            .map(String::from)
            .collect();
        self.set_attribute(node_id, "class", &list.join(" "))
    }

    pub fn has_class(&self, node_id: NodeId, class: &str) -> Result<bool> {
        Ok(self.arena.get(node_id)?.has_class(class))
    }

    fn index_id(&mut self, node_id: NodeId) {
        if let Some(id) = self.arena.get(node_id).ok().and_then(|n| n.attr("id")) {
            self.id_index.insert(id.to_string(), node_id);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// First connected element carrying `id`
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        if let Some(&node_id) = self.id_index.get(id) {
            let indexed = self
                .arena
                .get(node_id)
                .is_ok_and(|n| n.attr("id") == Some(id));
            if indexed && self.is_connected(node_id) {
                return Some(node_id);
            }
        }
        // Index is a hint only: duplicates and moved ids fall back to a scan
        self.arena
            .descendants(self.document_id)
            .ok()?
            .into_iter()
            .find(|&n| self.arena.get(n).is_ok_and(|node| node.attr("id") == Some(id)))
    }

    /// First descendant of `scope` matching `selector`, in document order
    pub fn query_selector(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .arena
            .descendants(scope)?
            .into_iter()
            .find(|&id| list.matches(&self.arena, id)))
    }

    /// All descendants of `scope` matching `selector`, in document order
    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .arena
            .descendants(scope)?
            .into_iter()
            .filter(|&id| list.matches(&self.arena, id))
            .collect())
    }

    pub fn matches(&self, node_id: NodeId, selector: &str) -> Result<bool> {
        let list = SelectorList::parse(selector)?;
        self.arena.get(node_id)?;
        Ok(list.matches(&self.arena, node_id))
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skeleton() {
        let doc = Document::new();
        assert_eq!(doc.outer_html(doc.document_id()).unwrap(), "<html><head></head><body></body></html>");
        assert!(doc.is_connected(doc.body()));
        assert_eq!(doc.ready_state(), ReadyState::Complete);
    }

    #[test]
    fn test_insertion_positions() {
        let mut doc = Document::from_body_html("<div id=\"c\"><p id=\"mid\"></p></div>").unwrap();
        let c = doc.get_element_by_id("c").unwrap();
        let mid = doc.get_element_by_id("mid").unwrap();

        let last = doc.create_element("i").unwrap();
        let first = doc.create_element("b").unwrap();
        let before = doc.create_element("em").unwrap();
        let after = doc.create_element("u").unwrap();

        doc.append_child(c, last).unwrap();
        doc.prepend_child(c, first).unwrap();
        doc.insert_before(mid, before).unwrap();
        doc.insert_after(mid, after).unwrap();

        assert_eq!(
            doc.inner_html(c).unwrap(),
            "<b></b><em></em><p id=\"mid\"></p><u></u><i></i>"
        );

        // moving an attached node detaches it from its old position
        doc.append_child(c, first).unwrap();
        assert_eq!(doc.element_children(c).unwrap().last(), Some(&first));
        assert_eq!(doc.element_children(c).unwrap().len(), 5);
    }

    #[test]
    fn test_hierarchy_errors() {
        let mut doc = Document::from_body_html("<div id=\"outer\"><div id=\"inner\"></div></div>").unwrap();
        let outer = doc.get_element_by_id("outer").unwrap();
        let inner = doc.get_element_by_id("inner").unwrap();
        let loose = doc.create_element("span").unwrap();

        assert!(matches!(doc.append_child(inner, outer), Err(DomError::HierarchyRequest(_))));
        assert!(matches!(doc.insert_before(loose, inner), Err(DomError::HierarchyRequest(_))));
        assert!(matches!(doc.create_element("1bad"), Err(DomError::InvalidTagName(_))));
    }

    #[test]
    fn test_text_and_html_content() {
        let mut doc = Document::from_body_html("<p>Hello <b>world</b></p>").unwrap();
        let p = doc.query_selector(doc.document_id(), "p").unwrap().unwrap();
        assert_eq!(doc.text_content(p).unwrap(), "Hello world");

        doc.set_text_content(p, "<plain>").unwrap();
        assert_eq!(doc.inner_html(p).unwrap(), "&lt;plain&gt;");

        doc.set_inner_html(p, "<span id=\"late\">x</span>").unwrap();
        assert_eq!(doc.get_element_by_id("late"), doc.query_selector(p, "#late").unwrap());
    }

    #[test]
    fn test_classes_and_ids() {
        let mut doc = Document::from_body_html("<div id=\"a\" class=\"x\"></div>").unwrap();
        let a = doc.get_element_by_id("a").unwrap();

        doc.add_class(a, "y x z").unwrap();
        assert_eq!(doc.get_attribute(a, "class").unwrap(), Some("x y z"));
        doc.remove_class(a, "x z").unwrap();
        assert_eq!(doc.get_attribute(a, "class").unwrap(), Some("y"));

        doc.set_attribute(a, "id", "b").unwrap();
        assert_eq!(doc.get_element_by_id("a"), None);
        assert_eq!(doc.get_element_by_id("b"), Some(a));

        doc.remove(a).unwrap();
        assert_eq!(doc.get_element_by_id("b"), None);
        assert!(!doc.is_connected(a));
    }

    #[test]
    fn test_clone_is_detached_and_deep() {
        let mut doc = Document::from_body_html("<ul id=\"l\"><li>1</li><li>2</li></ul>").unwrap();
        let l = doc.get_element_by_id("l").unwrap();
        let copy = doc.clone_node(l, true).unwrap();

        assert!(!doc.is_connected(copy));
        assert_eq!(doc.inner_html(copy).unwrap(), "<li>1</li><li>2</li>");
        assert_eq!(doc.query_selector_all(doc.document_id(), "li").unwrap().len(), 2);
    }
}
