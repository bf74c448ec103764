//! In-memory DOM for the Vibe component library
//!
//! A small, owned document tree: enough DOM to mount components into,
//! query with selectors, and read back as markup.
//!
//! ## Core Design
//!
//! ```text
//! markup ──parse──→ DomArena (Vec<DomNode>) ──serialize──→ markup
//!                        ↑
//!                  NodeId (u32) ←── SelectorList::matches
//! ```

pub mod arena;
pub mod document;
pub mod error;
pub mod markup;
pub mod selector;
pub mod types;
pub mod utils;

pub use arena::DomArena;
pub use document::Document;
pub use error::{DomError, Result};
pub use selector::SelectorList;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_after_parse() {
        let doc = Document::from_body_html(
            "<main><ul class=\"feed\"><li>a</li><li class=\"hot\">b</li></ul></main>",
        )
        .unwrap();

        let hot = doc
            .query_selector(doc.document_id(), "main .feed > li.hot")
            .unwrap()
            .unwrap();
        assert_eq!(doc.text_content(hot).unwrap(), "b");
        assert!(doc.matches(hot, "li").unwrap());
    }
}
