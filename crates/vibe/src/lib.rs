//! Vibe - component helpers over an in-memory DOM
//!
//! A [`Vibe`] context owns a [`dom::Document`]. It renders components into
//! it and hands out [`Handle`]s carrying the per-element machinery:
//! templates, a run-queue for timed operations, listeners, observers and
//! plugin functions.
//!
//! ## Core Design
//!
//! ```text
//!                 ┌──────────── Vibe (Arc) ─────────────┐
//!  render() ────→ │ RwLock<Document>   ReadyGate        │
//!                 │ DashMap<NodeId, ElementState>       │ ──→ EventBus
//!                 │   template · queue · state · ...    │     (Ready, Mounted,
//!                 │ DashMap<NodeId, Vec<Listener>>      │      Mutation, ...)
//!                 └─────────────────────────────────────┘
//!                          ↑ Handle { vibe, node }
//! ```
//!
//! The document lock is only held for single DOM operations; user callbacks
//! never run under it. Timers (mount waits, delays, fades, observers, the
//! ready fallback) are tokio tasks.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fetch;
pub mod handle;
pub mod ident;
pub mod listeners;
pub mod mount;
pub mod observe;
pub mod probe;
pub mod queue;
pub mod ready;
pub mod scheduler;
pub mod template;

pub use config::VibeConfig;
pub use context::{InitFn, PluginFn, Vibe};
pub use error::{Result, VibeError};
pub use events::{EventBus, Mutation, MutationKind, VibeEvent};
pub use fetch::{FetchData, ResponseType};
pub use handle::{CloneOptions, Content, CreateNodeOptions, Handle};
pub use listeners::{handler, Event, EventHandler, EventPhase};
pub use mount::{Component, ComponentSpec, MountFailure, MountOptions, MountStatus, Position, Target};
pub use observe::ObserveOptions;
pub use queue::{BatchId, Completion, RunQueue};
pub use scheduler::{delay_fn, DelayFn, DelayStep, Timing};
pub use template::{Accessor, TemplateTarget, VData};

#[cfg(test)]
pub(crate) mod test_support {
    use dom::{Document, ReadyState};

    use crate::{Vibe, VibeConfig};

    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    /// Fully loaded context whose body holds `body_html`
    pub fn fixture(body_html: &str) -> Vibe {
        Vibe::new(Document::from_body_html(body_html).unwrap())
    }

    /// Context over a document that is still loading
    pub fn loading_vibe() -> Vibe {
        Vibe::with_config(
            Document::with_ready_state(ReadyState::Loading),
            VibeConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use test_support::*;

    #[tokio::test(start_paused = true)]
    async fn test_feed_component() {
        init_tracing();
        let vibe = fixture(r#"<main id="feed"></main>"#);
        let mut events = vibe.subscribe();

        let clicks = Arc::new(Mutex::new(0));
        let counter = clicks.clone();
        let item = vibe
            .render(
                Component::factory(|| {
                    ComponentSpec::new()
                        .template("<li>{{ text }}</li>")
                        .class_name("item")
                        .state(json!({"seen": 0}))
                }),
                MountOptions::default()
                    .to("#feed")
                    .element_type("ul")
                    .vdata("text", "first")
                    .on("click", handler(move |_| *counter.lock().unwrap() += 1)),
            )
            .unwrap();
        item.mounted().await.unwrap();

        item.set_concat("text", "second").unwrap();
        assert_eq!(item.html().unwrap(), "<li>first</li><li>second</li>");
        assert!(item.has_class("item").unwrap() && item.has_class("vibe").unwrap());

        item.trigger("click").unwrap();
        assert_eq!(*clicks.lock().unwrap(), 1);

        item.fade_out(Duration::from_millis(50)).queue(|h| {
            h.detach(false).unwrap();
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!item.is_connected());

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                VibeEvent::Ready => "ready",
                VibeEvent::Rendered { .. } => "rendered",
                VibeEvent::Mounted { .. } => "mounted",
                VibeEvent::MountFailed { .. } => "failed",
                VibeEvent::Detached { .. } => "detached",
                VibeEvent::Mutation(_) => continue,
            });
        }
        assert_eq!(kinds, ["rendered", "mounted", "detached"]);
    }
}
