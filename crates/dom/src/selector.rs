//! CSS selector subset
//!
//! Supported:
//! - type (`div`), universal (`*`), id (`#app`), class (`.card`)
//! - attribute presence (`[hidden]`) and equality (`[type=text]`, `[data-x="y"]`)
//! - compound selectors (`li.item.active`)
//! - descendant (`ul li`) and child (`ul > li`) combinators
//! - selector lists (`h1, h2`)
//!
//! Matching runs right-to-left from the candidate node up through its ancestors.

use std::iter::Peekable;
use std::str::Chars;

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::types::{DomNode, NodeId};

/// A parsed, comma-separated selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    /// Compounds left to right
    parts: Vec<Compound>,
    /// `combinators[i]` joins `parts[i]` and `parts[i + 1]`
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    value: Option<String>,
}

impl SelectorList {
    pub fn parse(input: &str) -> Result<Self> {
        let selectors = split_list(input)
            .into_iter()
            .map(|part| parse_complex(part).map_err(|msg| invalid(input, msg)))
            .collect::<Result<Vec<_>>>()?;

        if selectors.is_empty() {
            return Err(invalid(input, "empty selector"));
        }
        Ok(Self { selectors })
    }

    /// Whether `node_id` matches any selector in the list
    pub fn matches(&self, arena: &DomArena, node_id: NodeId) -> bool {
        self.selectors
            .iter()
            .any(|selector| selector.matches_at(arena, node_id, selector.parts.len() - 1))
    }
}

impl std::str::FromStr for SelectorList {
    type Err = DomError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl ComplexSelector {
    fn matches_at(&self, arena: &DomArena, node_id: NodeId, idx: usize) -> bool {
        let Ok(node) = arena.get(node_id) else {
            return false;
        };
        if !self.parts[idx].matches(node) {
            return false;
        }
        if idx == 0 {
            return true;
        }

        match self.combinators[idx - 1] {
            Combinator::Child => node
                .parent_id
                .is_some_and(|parent| self.matches_at(arena, parent, idx - 1)),
            Combinator::Descendant => {
                let mut current = node.parent_id;
                while let Some(ancestor) = current {
                    if self.matches_at(arena, ancestor, idx - 1) {
                        return true;
                    }
                    current = arena.get(ancestor).ok().and_then(|n| n.parent_id);
                }
                false
            }
        }
    }
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
    }

    fn matches(&self, node: &DomNode) -> bool {
        if !node.is_element() {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !node.node_name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|class| node.has_class(class)) {
            return false;
        }
        self.attrs.iter().all(|attr| match (&attr.value, node.attr(&attr.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => expected == actual,
        })
    }
}

fn invalid(input: &str, msg: &str) -> DomError {
    DomError::InvalidSelector(format!("{input:?}: {msg}"))
}

/// Split on top-level commas, ignoring commas inside brackets or quotes
fn split_list(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_complex(input: &str) -> std::result::Result<ComplexSelector, &'static str> {
    let mut chars = input.trim().chars().peekable();
    let mut parts = Vec::new();
    let mut combinators = Vec::new();
    let mut pending: Option<Combinator> = None;

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        match chars.peek() {
            None => break,
            Some('>') => {
                chars.next();
                if parts.is_empty() || pending.is_some() {
                    return Err("dangling combinator");
                }
                pending = Some(Combinator::Child);
            }
            Some(_) => {
                if !parts.is_empty() {
                    combinators.push(pending.take().unwrap_or(Combinator::Descendant));
                }
                parts.push(parse_compound(&mut chars)?);
            }
        }
    }

    if parts.is_empty() {
        return Err("empty selector");
    }
    if pending.is_some() {
        return Err("dangling combinator");
    }
    Ok(ComplexSelector { parts, combinators })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &mut Peekable<Chars<'_>>) -> std::result::Result<String, &'static str> {
    let mut ident = String::new();
    while let Some(c) = chars.next_if(|&c| is_ident_char(c)) {
        ident.push(c);
    }
    if ident.is_empty() {
        Err("expected identifier")
    } else {
        Ok(ident)
    }
}

fn parse_compound(chars: &mut Peekable<Chars<'_>>) -> std::result::Result<Compound, &'static str> {
    let mut compound = Compound::default();
    let mut universal = false;

    if chars.next_if_eq(&'*').is_some() {
        universal = true;
    } else if chars.peek().is_some_and(|&c| is_ident_char(c)) {
        compound.tag = Some(read_ident(chars)?.to_ascii_lowercase());
    }

    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                chars.next();
                compound.id = Some(read_ident(chars)?);
            }
            '.' => {
                chars.next();
                compound.classes.push(read_ident(chars)?);
            }
            '[' => {
                chars.next();
                compound.attrs.push(parse_attr(chars)?);
            }
            c if c.is_whitespace() || c == '>' => break,
            _ => return Err("unsupported selector syntax"),
        }
    }

    if compound.is_empty() && !universal {
        return Err("expected selector");
    }
    Ok(compound)
}

fn parse_attr(chars: &mut Peekable<Chars<'_>>) -> std::result::Result<AttrMatch, &'static str> {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
    let name = read_ident(chars)?.to_ascii_lowercase();
    while chars.next_if(|c| c.is_whitespace()).is_some() {}

    let value = match chars.next() {
        Some(']') => return Ok(AttrMatch { name, value: None }),
        Some('=') => {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            match chars.peek().copied() {
                Some(q @ ('"' | '\'')) => {
                    chars.next();
                    let mut value = String::new();
                    loop {
                        match chars.next() {
                            Some(c) if c == q => break,
                            Some(c) => value.push(c),
                            None => return Err("unterminated attribute value"),
                        }
                    }
                    value
                }
                _ => read_ident(chars)?,
            }
        }
        _ => return Err("malformed attribute selector"),
    };

    while chars.next_if(|c| c.is_whitespace()).is_some() {}
    if chars.next() != Some(']') {
        return Err("malformed attribute selector");
    }
    Ok(AttrMatch {
        name,
        value: Some(value),
    })
}
