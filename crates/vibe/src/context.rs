//! The capability object
//!
//! A [`Vibe`] owns one document plus everything the library tracks next to
//! it: per-element state, listener tables, the function table, the ready
//! gate and the lifecycle bus. It is cheap to clone; every clone and every
//! [`Handle`] it hands out share the same inner state.
//!
//! The document sits behind an `RwLock` that is only held for the duration
//! of a single DOM operation, never while user callbacks run.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use dom::{Document, NodeId, ReadyState};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::VibeConfig;
use crate::error::Result;
use crate::events::{EventBus, Mutation, MutationKind, VibeEvent};
use crate::handle::Handle;
use crate::listeners::Listener;
use crate::mount::{MountStatus, Target};
use crate::queue::RunQueue;
use crate::ready::ReadyGate;
use crate::template::TemplateState;

/// Named function callable on a handle, stored in the function table or a
/// handle's plugin table
pub type PluginFn = Arc<dyn Fn(&Handle, &[Value]) -> Value + Send + Sync>;

/// Component initializer; kept so it can be re-run
pub type InitFn = Arc<dyn Fn(&Handle) + Send + Sync>;

/// Everything the library keeps for one element
pub(crate) struct ElementState {
    pub template: TemplateState,
    pub queue: RunQueue,
    pub state: Value,
    pub orig_state: Value,
    pub props: Value,
    pub plugins: HashMap<String, PluginFn>,
    pub init: Option<InitFn>,
    pub mounted_to: Option<Target>,
    pub mount_status: watch::Sender<MountStatus>,
    pub mount_task: Option<JoinHandle<()>>,
    pub observers: HashMap<String, JoinHandle<()>>,
}

impl Default for ElementState {
    fn default() -> Self {
        Self {
            template: TemplateState::default(),
            queue: RunQueue::new(),
            state: Value::Object(Default::default()),
            orig_state: Value::Object(Default::default()),
            props: Value::Object(Default::default()),
            plugins: HashMap::new(),
            init: None,
            mounted_to: None,
            mount_status: watch::Sender::new(MountStatus::Unmounted),
            mount_task: None,
            observers: HashMap::new(),
        }
    }
}

impl ElementState {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.mount_task.take() {
            task.abort();
        }
        for (_, task) in self.observers.drain() {
            task.abort();
        }
        self.queue.clear();
    }
}

pub(crate) struct VibeInner {
    config: VibeConfig,
    document: RwLock<Document>,
    elements: DashMap<NodeId, ElementState>,
    pub(crate) listeners: DashMap<NodeId, Vec<Listener>>,
    functions: DashMap<String, PluginFn>,
    ready: ReadyGate,
    events: EventBus,
    /// Generation counter bumped after every tree mutation
    tree: watch::Sender<u64>,
    fallback: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Vibe {
    pub(crate) inner: Arc<VibeInner>,
}

impl fmt::Debug for Vibe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vibe")
            .field("elements", &self.inner.elements.len())
            .field("ready", &self.inner.ready.is_open())
            .finish()
    }
}

impl Vibe {
    pub fn new(document: Document) -> Self {
        Self::with_config(document, VibeConfig::default())
    }

    /// Build a context around `document`.
    ///
    /// If the document is still loading the ready gate stays closed until
    /// [`finish_loading`](Self::finish_loading) or the fallback timer fires.
    /// Without a tokio runtime there is no fallback timer.
    pub fn with_config(document: Document, config: VibeConfig) -> Self {
        let loading = document.ready_state() == ReadyState::Loading;
        let vibe = Self {
            inner: Arc::new(VibeInner {
                config,
                document: RwLock::new(document),
                elements: DashMap::new(),
                listeners: DashMap::new(),
                functions: DashMap::new(),
                ready: ReadyGate::new(),
                events: EventBus::new(),
                tree: watch::Sender::new(0),
                fallback: Mutex::new(None),
            }),
        };

        if !loading {
            vibe.open_gate();
        } else {
            vibe.arm_fallback();
        }
        vibe
    }

    fn arm_fallback(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, ready gate waits for finish_loading");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let after = self.inner.config.ready_fallback();
        let task = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = weak.upgrade() {
                tracing::debug!("ready fallback after {:?}", after);
                Vibe { inner }.open_gate();
            }
        });
        *self
            .inner
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    fn open_gate(&self) {
        if self.inner.ready.open() {
            self.inner.events.publish(VibeEvent::Ready);
        }
    }

    pub fn config(&self) -> &VibeConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VibeEvent> {
        self.inner.events.subscribe()
    }

    /// The host's load-completion notification
    pub fn finish_loading(&self) {
        self.write(|doc| doc.set_ready_state(ReadyState::Complete));
        self.open_gate();
    }

    /// Run `f` once the document is ready; immediately if it already is
    pub fn ready(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.ready.when_ready(Box::new(f));
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_open()
    }

    pub async fn wait_ready(&self) {
        self.inner.ready.wait().await
    }

    /// Read-only access to the document
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        let doc = self
            .inner
            .document
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&doc)
    }

    /// Write access without a mutation record. For detached nodes and
    /// bookkeeping only.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut doc = self
            .inner
            .document
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut doc)
    }

    /// Write access that records a mutation on `target` when `f` succeeds
    pub(crate) fn mutate<R>(
        &self,
        target: NodeId,
        kind: MutationKind,
        f: impl FnOnce(&mut Document) -> dom::Result<R>,
    ) -> Result<R> {
        let out = self.write(f)?;
        self.inner.tree.send_modify(|generation| *generation += 1);
        self.inner
            .events
            .publish(VibeEvent::Mutation(Mutation { target, kind }));
        Ok(out)
    }

    /// Receiver that changes after every recorded mutation
    pub(crate) fn tree_changes(&self) -> watch::Receiver<u64> {
        self.inner.tree.subscribe()
    }

    pub fn root(&self) -> Handle {
        self.handle(self.read(|doc| doc.document_id()))
    }

    pub fn body(&self) -> Handle {
        self.handle(self.read(|doc| doc.body()))
    }

    /// Wrap a node without checking it exists
    pub fn handle(&self, node: NodeId) -> Handle {
        Handle::new(self.clone(), node)
    }

    /// First match in the whole document
    pub fn select(&self, selector: &str) -> Result<Option<Handle>> {
        let found = self.read(|doc| doc.query_selector(doc.document_id(), selector))?;
        Ok(found.map(|node| self.handle(node)))
    }

    pub fn select_all(&self, selector: &str) -> Result<Vec<Handle>> {
        let found = self.read(|doc| doc.query_selector_all(doc.document_id(), selector))?;
        Ok(found.into_iter().map(|node| self.handle(node)).collect())
    }

    pub fn get_by_id(&self, id: &str) -> Option<Handle> {
        self.read(|doc| doc.get_element_by_id(id))
            .map(|node| self.handle(node))
    }

    /// Merge a function into the context's function table
    pub fn register_function(
        &self,
        name: impl Into<String>,
        f: impl Fn(&Handle, &[Value]) -> Value + Send + Sync + 'static,
    ) {
        self.inner.functions.insert(name.into(), Arc::new(f));
    }

    pub fn function(&self, name: &str) -> Option<PluginFn> {
        self.inner.functions.get(name).map(|f| f.value().clone())
    }

    /// Call a table function against `handle`. `None` when no such function.
    pub fn call_function(&self, name: &str, handle: &Handle, args: &[Value]) -> Option<Value> {
        let f = self.function(name)?;
        Some(f(handle, args))
    }

    /// Run `f` on the element's state entry, creating it on first use.
    ///
    /// The entry is locked while `f` runs, so `f` must not call back into
    /// anything that touches the same element's state.
    pub(crate) fn with_element<R>(&self, node: NodeId, f: impl FnOnce(&mut ElementState) -> R) -> R {
        let mut entry = self.inner.elements.entry(node).or_default();
        f(entry.value_mut())
    }

    /// Like [`with_element`](Self::with_element) but never creates an entry
    pub(crate) fn peek_element<R>(&self, node: NodeId, f: impl FnOnce(&ElementState) -> R) -> Option<R> {
        self.inner.elements.get(&node).map(|entry| f(entry.value()))
    }

    pub(crate) fn forget_element(&self, node: NodeId) {
        if let Some((_, mut state)) = self.inner.elements.remove(&node) {
            state.abort_tasks();
        }
        self.inner.listeners.remove(&node);
    }

    /// Number of elements with library state attached
    pub fn tracked_elements(&self) -> usize {
        self.inner.elements.len()
    }

    /// Abort every background task and drop all element state, listeners
    /// and functions. Handles stay valid for plain DOM access.
    pub fn teardown(&self) {
        if let Some(task) = self
            .inner
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let nodes: Vec<NodeId> = self.inner.elements.iter().map(|e| *e.key()).collect();
        for node in &nodes {
            self.forget_element(*node);
        }
        self.inner.listeners.clear();
        self.inner.functions.clear();
        tracing::debug!("context torn down, {} elements released", nodes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_complete_document_is_ready_at_once() {
        let vibe = Vibe::new(Document::new());
        assert!(vibe.is_ready());
        vibe.wait_ready().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_fallback_opens_gate() {
        init_tracing();
        let vibe = loading_vibe();
        let mut rx = vibe.subscribe();
        assert!(!vibe.is_ready());

        let mut wait = task::spawn(vibe.wait_ready());
        assert_pending!(wait.poll());

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_pending!(wait.poll());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(vibe.is_ready());
        assert_ready!(wait.poll());
        assert!(matches!(rx.recv().await, Ok(VibeEvent::Ready)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_loading_beats_fallback() {
        let vibe = loading_vibe();
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        vibe.ready(move || *counter.lock().unwrap() += 1);

        vibe.finish_loading();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(vibe.read(|doc| doc.ready_state()), ReadyState::Complete);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_function_table() {
        let vibe = Vibe::new(Document::new());
        vibe.register_function("double", |_, args| {
            json!(args.first().and_then(Value::as_i64).unwrap_or(0) * 2)
        });

        let body = vibe.body();
        assert_eq!(vibe.call_function("double", &body, &[json!(21)]), Some(json!(42)));
        assert_eq!(vibe.call_function("missing", &body, &[]), None);
    }

    #[test]
    fn test_select_and_invalid_selector() {
        let vibe = fixture(r#"<div id="app"><p class="x">a</p><p class="x">b</p></div>"#);
        assert_eq!(vibe.select_all("p.x").unwrap().len(), 2);
        assert!(vibe.select("#app").unwrap().is_some());
        assert!(vibe.get_by_id("app").is_some());
        assert!(vibe.select("[").is_err());
    }

    #[test]
    fn test_mutations_bump_generation() {
        let vibe = fixture("<div id=\"app\"></div>");
        let rx = vibe.tree_changes();
        let app = vibe.get_by_id("app").unwrap();
        app.set_attr("title", "x").unwrap();
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_teardown_drops_state() {
        let vibe = fixture("<div id=\"app\"></div>");
        let app = vibe.get_by_id("app").unwrap();
        app.set_state(json!({"n": 1}));
        vibe.register_function("f", |_, _| Value::Null);
        assert_eq!(vibe.tracked_elements(), 1);

        vibe.teardown();
        assert_eq!(vibe.tracked_elements(), 0);
        assert!(vibe.function("f").is_none());
        assert_eq!(app.attr("id").unwrap().as_deref(), Some("app"));
    }
}
