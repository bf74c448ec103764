//! `{{key}}` template substitution
//!
//! Each element keeps the first markup (and text) it was rendered from as its
//! original template. Every render substitutes the current data record into
//! that original, so values never compound: setting `a` to `1` and then to `2`
//! yields content with `2` only.
//!
//! In concat mode the freshly substituted original is appended to whatever
//! the element currently shows, which is how feed-style components grow.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::handle::Handle;

static LOOSE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid regex"));
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("valid regex"));
static KEY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_$][\w$]*)\s*\}\}").expect("valid regex"));

/// `{{ key }}` → `{{key}}`
pub fn normalize_tokens(template: &str) -> String {
    LOOSE_TOKEN.replace_all(template, "{{$1}}").into_owned()
}

/// Placeholder keys in first-seen order. Keys starting with a digit are skipped.
pub fn extract_keys(text: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for caps in KEY_TOKEN.captures_iter(text) {
        let key = &caps[1];
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// Replace every `{{key}}` whose key is in `data`; unknown tokens stay as is.
///
/// Single pass, so a value that itself contains `{{other}}` is not expanded.
pub fn substitute(template: &str, data: &Map<String, Value>) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures| match data.get(&caps[1]) {
            Some(value) => value_to_string(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Strings verbatim, `null` as empty, everything else as JSON
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Which content variant a render reads and writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateTarget {
    #[default]
    Html,
    Text,
}

/// Data record plus the captured originals for one element
#[derive(Debug, Clone, Default)]
pub struct TemplateState {
    data: Map<String, Value>,
    original_html: Option<String>,
    original_text: Option<String>,
    target: TemplateTarget,
}

impl TemplateState {
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    pub fn target(&self) -> TemplateTarget {
        self.target
    }

    pub fn original(&self, target: TemplateTarget) -> Option<&str> {
        match target {
            TemplateTarget::Html => self.original_html.as_deref(),
            TemplateTarget::Text => self.original_text.as_deref(),
        }
    }

    /// Store `current` as the original for `target` unless one is stored already
    pub fn capture(&mut self, target: TemplateTarget, current: &str) -> &str {
        let slot = match target {
            TemplateTarget::Html => &mut self.original_html,
            TemplateTarget::Text => &mut self.original_text,
        };
        slot.get_or_insert_with(|| normalize_tokens(current))
    }

    /// Substitute the data record into the original for `target`.
    ///
    /// `current` is the element's content right now; it becomes the original
    /// on first use and is the prefix in concat mode.
    pub fn render(&mut self, target: TemplateTarget, current: &str, concat: bool) -> String {
        self.target = target;
        let original = self.capture(target, current).to_string();
        let fresh = substitute(&original, &self.data);
        if concat {
            format!("{current}{fresh}")
        } else {
            fresh
        }
    }
}

impl Handle {
    /// Seed the data record at render time and run the first substitution.
    ///
    /// An empty `vdata` seeds empty values for every key found in the
    /// element's text.
    pub(crate) fn init_template(&self, vdata: Map<String, Value>) -> Result<()> {
        let data = if vdata.is_empty() {
            extract_keys(&self.text()?)
                .into_iter()
                .map(|key| (key, Value::String(String::new())))
                .collect()
        } else {
            vdata
        };

        let current = self.html()?;
        if data.is_empty() {
            self.vibe.with_element(self.node, |el| {
                el.template.capture(TemplateTarget::Html, &current);
            });
            return Ok(());
        }

        let rendered = self.vibe.with_element(self.node, |el| {
            el.template.data = data;
            el.template.render(TemplateTarget::Html, &current, false)
        });
        self.set_html(&rendered)?;
        Ok(())
    }

    fn current(&self, target: TemplateTarget) -> Result<String> {
        match target {
            TemplateTarget::Html => self.html(),
            TemplateTarget::Text => self.text(),
        }
    }

    fn show(&self, target: TemplateTarget, content: &str) -> Result<()> {
        match target {
            TemplateTarget::Html => self.set_html(content)?,
            TemplateTarget::Text => self.set_text(content)?,
        };
        Ok(())
    }

    fn assign(&self, values: Vec<(String, Value)>, concat: bool) -> Result<&Self> {
        let target = self
            .vibe
            .with_element(self.node, |el| el.template.target());
        let current = self.current(target)?;
        let rendered = self.vibe.with_element(self.node, |el| {
            for (key, value) in values {
                el.template.insert(key, value);
            }
            el.template.render(target, &current, concat)
        });
        self.show(target, &rendered)?;
        Ok(self)
    }

    /// Set one template value and re-render from the original
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<&Self> {
        self.assign(vec![(key.to_string(), value.into())], false)
    }

    /// Set one template value and append a fresh rendering to the content
    pub fn set_concat(&self, key: &str, value: impl Into<Value>) -> Result<&Self> {
        self.assign(vec![(key.to_string(), value.into())], true)
    }

    /// Collect several values and render once:
    ///
    /// ```ignore
    /// card.vdata().set("name", "Ada").set("age", 36).apply()?;
    /// ```
    pub fn vdata(&self) -> VData<'_> {
        VData {
            handle: self,
            values: Vec::new(),
            concat: false,
        }
    }

    /// Callable accessor for a key already in the data record
    pub fn accessor(&self, key: &str) -> Option<Accessor> {
        let known = self
            .vibe
            .with_element(self.node, |el| el.template.contains(key));
        known.then(|| Accessor {
            handle: self.clone(),
            key: key.to_string(),
        })
    }

    pub fn template_data(&self) -> Map<String, Value> {
        self.vibe
            .with_element(self.node, |el| el.template.data().clone())
    }

    pub fn template_keys(&self) -> Vec<String> {
        self.vibe.with_element(self.node, |el| el.template.keys())
    }

    /// Re-render the current data record into `target`
    pub fn render_template(&self, target: TemplateTarget, concat: bool) -> Result<&Self> {
        let current = self.current(target)?;
        let rendered = self
            .vibe
            .with_element(self.node, |el| el.template.render(target, &current, concat));
        self.show(target, &rendered)?;
        Ok(self)
    }
}

/// Pending template assignments, applied with one render
#[must_use = "nothing is rendered until apply() is called"]
pub struct VData<'a> {
    handle: &'a Handle,
    values: Vec<(String, Value)>,
    concat: bool,
}

impl<'a> VData<'a> {
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.push((key.to_string(), value.into()));
        self
    }

    /// Append the rendering instead of replacing the content
    pub fn concat(mut self) -> Self {
        self.concat = true;
        self
    }

    pub fn apply(self) -> Result<&'a Handle> {
        self.handle.assign(self.values, self.concat)
    }
}

/// One template key bound to its element
#[derive(Debug, Clone)]
pub struct Accessor {
    handle: Handle,
    key: String,
}

impl Accessor {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Option<Value> {
        self.handle
            .vibe
            .with_element(self.handle.node, |el| el.template.data().get(&self.key).cloned())
    }

    pub fn call(&self, value: impl Into<Value>) -> Result<()> {
        self.handle.set(&self.key, value)?;
        Ok(())
    }

    pub fn concat(&self, value: impl Into<Value>) -> Result<()> {
        self.handle.set_concat(&self.key, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_normalize_tokens() {
        assert_eq!(
            normalize_tokens("<b>{{ name }}</b> {{age}} {{  x}}"),
            "<b>{{name}}</b> {{age}} {{x}}"
        );
    }

    #[test]
    fn test_extract_keys_skips_leading_digit() {
        let keys = extract_keys("Hello {{name}}, you are {{age}} {{2fast}} {{ name }}");
        assert_eq!(keys, ["name", "age"]);
    }

    #[test]
    fn test_substitute_leaves_unknown_tokens() {
        let out = substitute(
            "{{a}} and {{b}} and {{a}}",
            &data(json!({"a": 1, "c": "{{b}}"})),
        );
        assert_eq!(out, "1 and {{b}} and 1");
        assert_eq!(substitute("{{c}}", &data(json!({"c": "{{b}}", "b": "x"}))), "{{b}}");
    }

    #[test]
    fn test_render_is_idempotent_against_original() {
        let mut state = TemplateState::default();
        state.insert("a", json!("1"));
        let first = state.render(TemplateTarget::Html, "<i>{{ a }}</i>", false);
        assert_eq!(first, "<i>1</i>");

        state.insert("a", json!("2"));
        let second = state.render(TemplateTarget::Html, &first, false);
        assert_eq!(second, "<i>2</i>");
        assert_eq!(state.original(TemplateTarget::Html), Some("<i>{{a}}</i>"));
    }

    #[test]
    fn test_concat_appends_fresh_rendering() {
        let mut state = TemplateState::default();
        state.insert("msg", json!("one"));
        let shown = state.render(TemplateTarget::Html, "<li>{{msg}}</li>", false);

        state.insert("msg", json!("two"));
        let shown = state.render(TemplateTarget::Html, &shown, true);
        assert_eq!(shown, "<li>one</li><li>two</li>");
    }

    #[test]
    fn test_auto_extracted_keys_become_accessors() {
        let vibe = fixture(r#"<p id="t">Hello {{name}}, you are {{age}} {{2fast}}</p>"#);
        let p = vibe.get_by_id("t").unwrap();
        p.init_template(Map::new()).unwrap();

        assert_eq!(p.template_keys(), ["age", "name"]);
        assert_eq!(p.text().unwrap(), "Hello , you are  {{2fast}}");
        assert!(p.accessor("2fast").is_none());

        p.accessor("name").unwrap().call("Ada").unwrap();
        p.set("age", 36).unwrap();
        assert_eq!(p.text().unwrap(), "Hello Ada, you are 36 {{2fast}}");
        assert_eq!(p.accessor("age").unwrap().get(), Some(json!(36)));
    }

    #[test]
    fn test_vdata_builder_renders_once() {
        let vibe = fixture(r#"<div id="t"><b>{{a}}</b><i>{{b}}</i></div>"#);
        let t = vibe.get_by_id("t").unwrap();
        t.init_template(Map::new()).unwrap();

        let mut rx = vibe.subscribe();
        t.vdata().set("a", "x").set("b", "y").apply().unwrap();
        assert_eq!(t.html().unwrap(), "<b>x</b><i>y</i>");

        let mut renders = 0;
        while rx.try_recv().is_ok() {
            renders += 1;
        }
        assert_eq!(renders, 1);
    }

    #[test]
    fn test_text_target() {
        let vibe = fixture(r#"<p id="t">n={{n}}</p>"#);
        let p = vibe.get_by_id("t").unwrap();
        p.render_template(TemplateTarget::Text, false).unwrap();
        assert_eq!(p.text().unwrap(), "n={{n}}");

        p.set("n", 1).unwrap();
        assert_eq!(p.text().unwrap(), "n=1");
        p.set_concat("n", 2).unwrap();
        assert_eq!(p.text().unwrap(), "n=1n=2");
    }
}
