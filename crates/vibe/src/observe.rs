//! Named mutation observers
//!
//! Each observer is a task fed by the context's lifecycle bus. It filters
//! mutation records for its element and runs the callback after a short
//! delay. Observers are keyed by name per element; observing under a name
//! that is already taken replaces the old observer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use crate::events::{Mutation, MutationKind, VibeEvent};
use crate::handle::Handle;

pub type ObserverFn = Arc<dyn Fn(&Handle) + Send + Sync>;

/// What an observer reacts to
#[derive(Debug, Clone)]
pub struct ObserveOptions {
    /// Delay before the callback; the context default when `None`
    pub delay: Option<Duration>,
    pub child_list: bool,
    pub character_data: bool,
    /// `Some` switches the observer to attribute changes only, limited to
    /// the listed names (any attribute when the list is empty)
    pub attributes: Option<Vec<String>>,
    /// Also watch descendants
    pub subtree: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            delay: None,
            child_list: true,
            character_data: false,
            attributes: None,
            subtree: false,
        }
    }
}

impl ObserveOptions {
    /// Attribute-only observer for the given names
    pub fn attributes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    fn accepts(&self, kind: &MutationKind) -> bool {
        match (&self.attributes, kind) {
            (Some(filter), MutationKind::Attributes { name }) => {
                filter.is_empty() || filter.iter().any(|f| f.eq_ignore_ascii_case(name))
            }
            (Some(_), _) => false,
            (None, MutationKind::ChildList) => self.child_list,
            (None, MutationKind::CharacterData) => self.character_data,
            (None, MutationKind::Attributes { .. }) => false,
        }
    }
}

impl Handle {
    /// Register `callback` under `name`, replacing any observer of that name.
    ///
    /// Needs a tokio runtime; without one the call only logs a warning.
    pub fn observe(
        &self,
        name: &str,
        options: ObserveOptions,
        callback: impl Fn(&Handle) + Send + Sync + 'static,
    ) -> &Self {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("[observe] no runtime, observer {} not started", name);
            return self;
        };

        let callback: ObserverFn = Arc::new(callback);
        let delay = options.delay.unwrap_or_else(|| self.vibe.config().observer_delay());
        let mut rx = self.vibe.subscribe();
        let handle = self.clone();
        let label = name.to_string();

        // the task holds a handle and so the bus; it ends when unobserve,
        // detach or teardown aborts it
        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(VibeEvent::Mutation(mutation)) => {
                        if !options.accepts(&mutation.kind) || !handle.covers(&mutation, options.subtree) {
                            continue;
                        }
                        tokio::time::sleep(delay).await;
                        callback(&handle);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("[observe] {} lagged, {} records skipped", label, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let replaced = self.vibe.with_element(self.node, |el| {
            el.observers.insert(name.to_string(), task)
        });
        if let Some(old) = replaced {
            old.abort();
            tracing::debug!("[observe] observer {} on node {} replaced", name, self.node);
        }
        self
    }

    fn covers(&self, mutation: &Mutation, subtree: bool) -> bool {
        if mutation.target == self.node {
            return true;
        }
        subtree
            && self.vibe.read(|doc| {
                doc.arena()
                    .ancestors(mutation.target)
                    .is_ok_and(|ancestors| ancestors.contains(&self.node))
            })
    }

    /// Stop the observer registered under `name`
    pub fn unobserve(&self, name: &str) -> &Self {
        let removed = self
            .vibe
            .with_element(self.node, |el| el.observers.remove(name));
        if let Some(task) = removed {
            task.abort();
        }
        self
    }

    pub fn unobserve_all(&self) -> &Self {
        let tasks: Vec<_> = self
            .vibe
            .with_element(self.node, |el| el.observers.drain().map(|(_, t)| t).collect());
        for task in tasks {
            task.abort();
        }
        self
    }

    /// Names of the active observers, sorted
    pub fn observers(&self) -> Vec<String> {
        let mut names = self
            .vibe
            .peek_element(self.node, |el| el.observers.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Handle) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        (hits, move |_: &Handle| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_list_observer_fires_after_delay() {
        let vibe = fixture(r#"<ul id="list"></ul>"#);
        let list = vibe.get_by_id("list").unwrap();
        let (hits, cb) = counter();

        list.observe("items", ObserveOptions::default(), cb);
        list.append("<li>a</li>").unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // attribute changes are not node changes
        list.set_attr("title", "x").unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attribute_filter() {
        let vibe = fixture(r#"<div id="box"></div>"#);
        let bx = vibe.get_by_id("box").unwrap();
        let (hits, cb) = counter();

        bx.observe("cls", ObserveOptions::attributes(["class"]), cb);
        bx.set_attr("title", "ignored").unwrap();
        bx.append("ignored").unwrap();
        bx.add_class("on").unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subtree() {
        let vibe = fixture(r#"<div id="outer"><p id="inner"></p></div>"#);
        let outer = vibe.get_by_id("outer").unwrap();
        let inner = vibe.get_by_id("inner").unwrap();
        let (shallow, cb) = counter();
        let (deep, deep_cb) = counter();

        outer.observe("shallow", ObserveOptions::default(), cb);
        outer.observe(
            "deep",
            ObserveOptions {
                subtree: true,
                ..Default::default()
            },
            deep_cb,
        );
        inner.append("text").unwrap();
        settle().await;
        assert_eq!(shallow.load(Ordering::SeqCst), 0);
        assert_eq!(deep.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_name_replaces_and_unobserve() {
        let vibe = fixture(r#"<div id="box"></div>"#);
        let bx = vibe.get_by_id("box").unwrap();
        let (first, cb1) = counter();
        let (second, cb2) = counter();

        bx.observe("watch", ObserveOptions::default(), cb1);
        bx.observe("watch", ObserveOptions::default(), cb2);
        bx.observe("other", ObserveOptions::default(), |_| {});
        assert_eq!(bx.observers(), ["other", "watch"]);

        bx.append("x").unwrap();
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        bx.unobserve("watch");
        bx.append("y").unwrap();
        settle().await;
        assert_eq!(second.load(Ordering::SeqCst), 1);

        bx.unobserve_all();
        assert!(bx.observers().is_empty());
    }
}
