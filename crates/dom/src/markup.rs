//! Markup parsing and serialization
//!
//! A lenient fragment parser in the spirit of `innerHTML`: it never fails on
//! malformed input. Unknown end tags are ignored, unclosed elements are closed
//! at the end of input, and a `<` that does not open a tag is plain text.
//!
//! ```text
//! "<p class=a>hi</p>" → [Element p {class=a} → [Text "hi"]] → "<p class=\"a\">hi</p>"
//! ```

use crate::arena::DomArena;
use crate::error::Result;
use crate::types::{is_void_element, DomNode, NodeId, NodeType, RAW_TEXT_ELEMENTS};
use crate::utils::{decode_entities, escape_attr, escape_text};

/// Parse `html` into detached nodes stored in `arena`.
///
/// Returns the top-level nodes in source order.
pub fn parse_fragment(arena: &mut DomArena, html: &str) -> Result<Vec<NodeId>> {
    let mut parser = FragmentParser {
        arena,
        roots: Vec::new(),
        stack: Vec::new(),
        text: String::new(),
    };
    parser.run(html)?;
    Ok(parser.roots)
}

/// True when the string contains at least one element
pub fn is_html(input: &str) -> bool {
    let mut scratch = DomArena::with_capacity(16);
    parse_fragment(&mut scratch, input)
        .map(|roots| {
            roots
                .iter()
                .any(|&id| scratch.get(id).is_ok_and(DomNode::is_element))
        })
        .unwrap_or(false)
}

/// Tag name and inner markup of the first top-level element, if any
pub fn first_element(input: &str) -> Option<(String, String)> {
    let mut scratch = DomArena::with_capacity(16);
    let roots = parse_fragment(&mut scratch, input).ok()?;
    let first = roots
        .into_iter()
        .find(|&id| scratch.get(id).is_ok_and(DomNode::is_element))?;
    let tag = scratch.get(first).ok()?.node_name.clone();
    let inner = serialize_children(&scratch, first).ok()?;
    Some((tag, inner))
}

/// Serialize the children of a node (`innerHTML`)
pub fn serialize_children(arena: &DomArena, node_id: NodeId) -> Result<String> {
    let node = arena.get(node_id)?;
    let raw = is_raw_text(node);
    let mut out = String::new();
    for &child in &node.children_ids {
        write_node(arena, child, raw, &mut out)?;
    }
    Ok(out)
}

/// Serialize a node including itself (`outerHTML`)
pub fn serialize_node(arena: &DomArena, node_id: NodeId) -> Result<String> {
    let mut out = String::new();
    write_node(arena, node_id, false, &mut out)?;
    Ok(out)
}

fn is_raw_text(node: &DomNode) -> bool {
    matches!(node.node_name.as_str(), "script" | "style")
}

fn write_node(arena: &DomArena, node_id: NodeId, raw: bool, out: &mut String) -> Result<()> {
    let node = arena.get(node_id)?;

    match node.node_type {
        NodeType::Element => {
            out.push('<');
            out.push_str(&node.node_name);
            for (name, value) in &node.attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');

            if is_void_element(&node.node_name) {
                return Ok(());
            }

            let raw_children = is_raw_text(node);
            for &child in &node.children_ids {
                write_node(arena, child, raw_children, out)?;
            }

            out.push_str("</");
            out.push_str(&node.node_name);
            out.push('>');
        }
        NodeType::Text if raw => out.push_str(&node.node_value),
        NodeType::Text => out.push_str(&escape_text(&node.node_value)),
        NodeType::Comment => {
            out.push_str("<!--");
            out.push_str(&node.node_value);
            out.push_str("-->");
        }
        NodeType::Document | NodeType::DocumentFragment => {
            for &child in &node.children_ids {
                write_node(arena, child, false, out)?;
            }
        }
    }

    Ok(())
}

struct FragmentParser<'a> {
    arena: &'a mut DomArena,
    roots: Vec<NodeId>,
    /// Currently open elements
    stack: Vec<NodeId>,
    /// Pending character data
    text: String,
}

struct StartTag {
    name: String,
    attributes: Vec<(String, String)>,
    self_closing: bool,
    consumed: usize,
}

impl FragmentParser<'_> {
    fn run(&mut self, html: &str) -> Result<()> {
        let mut pos = 0;

        while pos < html.len() {
            let rest = &html[pos..];

            if let Some(body) = rest.strip_prefix("<!--") {
                self.flush_text()?;
                pos += body.find("-->").map_or(rest.len(), |end| 4 + end + 3);
                continue;
            }

            if rest.starts_with("<!") || rest.starts_with("<?") {
                self.flush_text()?;
                pos += rest.find('>').map_or(rest.len(), |end| end + 1);
                continue;
            }

            if let Some(body) = rest.strip_prefix("</") {
                if let Some(end) = body.find('>') {
                    self.flush_text()?;
                    self.close(body[..end].trim());
                    pos += 2 + end + 1;
                    continue;
                }
            }

            if rest.len() > 1 && rest.as_bytes()[1].is_ascii_alphabetic() && rest.starts_with('<') {
                if let Some(tag) = parse_start_tag(rest) {
                    self.flush_text()?;
                    pos += tag.consumed;
                    pos += self.open(tag, &html[pos..])?;
                    continue;
                }
            }

            // Character data up to the next possible tag
            let skip = usize::from(rest.starts_with('<'));
            let next = rest[skip..].find('<').map_or(rest.len(), |i| i + skip);
            self.text.push_str(&rest[..next]);
            pos += next;
        }

        self.flush_text()
    }

    /// Open an element; returns how much of `after` was consumed as raw text
    fn open(&mut self, tag: StartTag, after: &str) -> Result<usize> {
        let mut node = DomNode::element(0, &tag.name);
        for (name, value) in tag.attributes {
            if node.attr(&name).is_none() {
                node.set_attr(&name, value);
            }
        }
        let id = self.arena.add_node(node);
        self.attach(id)?;

        if tag.self_closing || is_void_element(&tag.name) {
            return Ok(0);
        }

        if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
            let closing = format!("</{}", tag.name);
            let lower = after.to_ascii_lowercase();
            let (content, consumed) = match lower.find(&closing) {
                Some(start) => {
                    let end = after[start..].find('>').map_or(after.len(), |i| start + i + 1);
                    (&after[..start], end)
                }
                None => (after, after.len()),
            };
            if !content.is_empty() {
                let value = if matches!(tag.name.as_str(), "script" | "style") {
                    content.to_string()
                } else {
                    decode_entities(content)
                };
                let text = self.arena.add_node(DomNode::text(0, value));
                self.append_to(id, text)?;
            }
            return Ok(consumed);
        }

        self.stack.push(id);
        Ok(0)
    }

    fn close(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        let arena = &*self.arena;
        if let Some(pos) = self
            .stack
            .iter()
            .rposition(|&id| arena.get(id).is_ok_and(|n| n.node_name == name))
        {
            self.stack.truncate(pos);
        }
    }

    fn flush_text(&mut self) -> Result<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        let value = decode_entities(&std::mem::take(&mut self.text));
        let id = self.arena.add_node(DomNode::text(0, value));
        self.attach(id)
    }

    fn attach(&mut self, id: NodeId) -> Result<()> {
        match self.stack.last().copied() {
            Some(parent) => self.append_to(parent, id),
            None => {
                self.roots.push(id);
                Ok(())
            }
        }
    }

    fn append_to(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.arena.get_mut(parent)?.children_ids.push(child);
        self.arena.get_mut(child)?.parent_id = Some(parent);
        Ok(())
    }
}

/// Parse `<name attr=value ...>` at the start of `input`.
///
/// Returns `None` when the tag is unterminated, in which case the caller
/// treats the `<` as text.
fn parse_start_tag(input: &str) -> Option<StartTag> {
    let mut chars = input.char_indices().peekable();
    chars.next(); // '<'

    let mut name = String::new();
    while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_alphanumeric() || c == '-' || c == ':') {
        name.push(c.to_ascii_lowercase());
    }

    let mut attributes = Vec::new();
    let mut self_closing = false;

    let consumed = loop {
        while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}

        let (i, c) = *chars.peek()?;
        match c {
            '>' => break i + 1,
            '/' => {
                chars.next();
                if let Some((i, '>')) = chars.peek().copied() {
                    self_closing = true;
                    break i + 1;
                }
            }
            _ => {
                let mut attr = String::new();
                while let Some((_, c)) =
                    chars.next_if(|&(_, c)| !c.is_whitespace() && !matches!(c, '=' | '>' | '/'))
                {
                    attr.push(c.to_ascii_lowercase());
                }
                while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}

                let mut value = String::new();
                if chars.next_if(|&(_, c)| c == '=').is_some() {
                    while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
                    match chars.peek().copied() {
                        Some((_, q @ ('"' | '\''))) => {
                            chars.next();
                            loop {
                                let (_, c) = chars.next()?;
                                if c == q {
                                    break;
                                }
                                value.push(c);
                            }
                        }
                        _ => {
                            while let Some((_, c)) =
                                chars.next_if(|&(_, c)| !c.is_whitespace() && c != '>')
                            {
                                value.push(c);
                            }
                        }
                    }
                }

                if !attr.is_empty() {
                    attributes.push((attr, decode_entities(&value)));
                }
            }
        }
    };

    Some(StartTag {
        name,
        attributes,
        self_closing,
        consumed,
    })
}
