//! Mount / render pipeline
//!
//! `render` turns a component into an element handle and returns it right
//! away. Insertion into the tree follows:
//!
//! ```text
//! render ──→ build element ──→ class / state / events / id / template
//!                                        │
//!                       target resolves? ├── yes ──→ insert when ready ──→ Mounted
//!                                        └── no ───→ wait task:
//!                                                    re-check on every tree mutation
//!                                                    and every poll tick;
//!                                                    60 failed ticks ──→ Failed
//! ```
//!
//! An existing element that is already in the tree stays where it is.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dom::{Document, DomError, NodeId, SelectorList};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::{InitFn, PluginFn, Vibe};
use crate::error::{Result, VibeError};
use crate::events::{MutationKind, VibeEvent};
use crate::handle::Handle;
use crate::ident::unique_id;
use crate::listeners::EventHandler;

/// Where an element goes relative to its target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Last child
    #[default]
    Append,
    /// First child
    Prepend,
    /// Previous sibling
    Before,
    /// Next sibling
    After,
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Position::Append),
            "prepend" => Ok(Position::Prepend),
            "before" => Ok(Position::Before),
            "after" => Ok(Position::After),
            other => Err(format!("unknown position: {other}")),
        }
    }
}

/// Mount target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Target {
    #[default]
    Body,
    Selector(String),
    Node(NodeId),
}

impl Target {
    /// Resolve against the current tree. `Ok(None)` means not there yet.
    pub fn resolve(&self, doc: &Document) -> dom::Result<Option<NodeId>> {
        match self {
            Target::Body => Ok(Some(doc.body())),
            Target::Selector(selector) => doc.query_selector(doc.document_id(), selector),
            Target::Node(node) => Ok(doc.is_connected(*node).then_some(*node)),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Body => f.write_str("body"),
            Target::Selector(selector) => f.write_str(selector),
            Target::Node(node) => write!(f, "node {node}"),
        }
    }
}

impl From<&str> for Target {
    fn from(selector: &str) -> Self {
        match selector.trim() {
            "body" => Target::Body,
            other => Target::Selector(other.to_string()),
        }
    }
}

impl From<String> for Target {
    fn from(selector: String) -> Self {
        Target::from(selector.as_str())
    }
}

impl From<&Handle> for Target {
    fn from(handle: &Handle) -> Self {
        Target::Node(handle.node())
    }
}

impl From<NodeId> for Target {
    fn from(node: NodeId) -> Self {
        Target::Node(node)
    }
}

/// What a component factory returns
#[derive(Default, Clone)]
pub struct ComponentSpec {
    pub template: Option<String>,
    pub class_name: Option<String>,
    /// Replaces the state given in the mount options
    pub state: Option<Value>,
    pub events: Vec<(String, EventHandler)>,
    pub functions: Vec<(String, PluginFn)>,
    pub init: Option<InitFn>,
}

impl ComponentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn on(mut self, types: impl Into<String>, handler: EventHandler) -> Self {
        self.events.push((types.into(), handler));
        self
    }

    pub fn function(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Handle, &[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.functions.push((name.into(), Arc::new(f)));
        self
    }

    pub fn init(mut self, f: impl Fn(&Handle) + Send + Sync + 'static) -> Self {
        self.init = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("template", &self.template)
            .field("class_name", &self.class_name)
            .field("state", &self.state)
            .field("events", &self.events.iter().map(|(t, _)| t).collect::<Vec<_>>())
            .field("functions", &self.functions.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("init", &self.init.is_some())
            .finish()
    }
}

/// Something `render` can turn into an element
pub enum Component {
    Factory(Box<dyn FnOnce() -> ComponentSpec + Send>),
    /// An element already owned by the document
    Element(NodeId),
    /// The first element in the markup is built; plain text goes into a new
    /// element of the mount's `element_type`
    Markup(String),
}

impl Component {
    pub fn factory(f: impl FnOnce() -> ComponentSpec + Send + 'static) -> Self {
        Component::Factory(Box::new(f))
    }
}

impl From<ComponentSpec> for Component {
    fn from(spec: ComponentSpec) -> Self {
        Component::factory(move || spec)
    }
}

impl From<&Handle> for Component {
    fn from(handle: &Handle) -> Self {
        Component::Element(handle.node())
    }
}

impl From<&str> for Component {
    fn from(markup: &str) -> Self {
        Component::Markup(markup.to_string())
    }
}

impl From<String> for Component {
    fn from(markup: String) -> Self {
        Component::Markup(markup)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Factory(_) => f.write_str("Factory"),
            Component::Element(node) => f.debug_tuple("Element").field(node).finish(),
            Component::Markup(markup) => f.debug_tuple("Markup").field(markup).finish(),
        }
    }
}

/// Render options
#[derive(Clone)]
pub struct MountOptions {
    pub to: Target,
    /// Tag for factory components and plain-text markup
    pub element_type: String,
    pub position: Position,
    pub state: Value,
    pub props: Value,
    pub plugins: Vec<(String, PluginFn)>,
    pub events: Vec<(String, EventHandler)>,
    pub vdata: Map<String, Value>,
    /// Falls back to the context's class name
    pub class_name: Option<String>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            to: Target::Body,
            element_type: "div".to_string(),
            position: Position::Append,
            state: Value::Object(Map::new()),
            props: Value::Object(Map::new()),
            plugins: Vec::new(),
            events: Vec::new(),
            vdata: Map::new(),
            class_name: None,
        }
    }
}

impl MountOptions {
    pub fn to(mut self, to: impl Into<Target>) -> Self {
        self.to = to.into();
        self
    }

    pub fn position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn element_type(mut self, tag: impl Into<String>) -> Self {
        self.element_type = tag.into();
        self
    }

    pub fn vdata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vdata.insert(key.into(), value.into());
        self
    }

    pub fn state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }

    pub fn plugin(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Handle, &[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.plugins.push((name.into(), Arc::new(f)));
        self
    }

    pub fn on(mut self, types: impl Into<String>, handler: EventHandler) -> Self {
        self.events.push((types.into(), handler));
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }
}

/// Why a mount did not happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountFailure {
    TargetNotFound { target: String, attempts: u32 },
    Insert(DomError),
    /// No runtime to wait for the target on
    NoRuntime { target: String },
}

impl From<MountFailure> for VibeError {
    fn from(failure: MountFailure) -> Self {
        match failure {
            MountFailure::TargetNotFound { target, attempts } => {
                VibeError::MountTargetNotFound { target, attempts }
            }
            MountFailure::Insert(err) => VibeError::Dom(err),
            MountFailure::NoRuntime { target } => VibeError::MountTargetNotFound { target, attempts: 0 },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MountStatus {
    #[default]
    Unmounted,
    Pending,
    Mounted,
    Failed(MountFailure),
}

impl Vibe {
    /// Build, initialize and mount a component.
    ///
    /// The handle is returned before insertion completes; await
    /// [`Handle::mounted`] to observe the outcome.
    pub fn render(&self, component: impl Into<Component>, options: MountOptions) -> Result<Handle> {
        let MountOptions {
            to,
            element_type,
            position,
            state,
            props,
            plugins,
            events,
            vdata,
            class_name,
        } = options;

        // a malformed selector can never resolve; fail before building anything
        if let Target::Selector(selector) = &to {
            SelectorList::parse(selector)?;
        }

        let component = component.into();
        let existing = matches!(component, Component::Element(_));
        let (handle, spec) = match component {
            Component::Factory(factory) => {
                let spec = factory();
                let node = self.write(|doc| doc.create_element(&element_type))?;
                let handle = self.handle(node);
                if let Some(template) = spec.template.as_deref().filter(|t| !t.is_empty()) {
                    handle.set_html(template)?;
                }
                if let Some(class) = spec.class_name.as_deref().filter(|c| !c.trim().is_empty()) {
                    handle.add_class(class)?;
                }
                (handle, spec)
            }
            Component::Element(node) => {
                self.read(|doc| doc.node(node).map(|_| ()))?;
                (self.handle(node), ComponentSpec::default())
            }
            Component::Markup(markup) => {
                let node = self.write(|doc| -> dom::Result<NodeId> {
                    let (tag, inner) = dom::markup::first_element(&markup)
                        .unwrap_or_else(|| (element_type.clone(), markup.clone()));
                    let node = doc.create_element(&tag)?;
                    doc.set_inner_html(node, &inner)?;
                    Ok(node)
                })?;
                (self.handle(node), ComponentSpec::default())
            }
        };

        let class_name = class_name.unwrap_or_else(|| self.config().class_name.clone());
        if !class_name.trim().is_empty() {
            handle.add_class(&class_name)?;
        }

        let ComponentSpec {
            state: spec_state,
            events: spec_events,
            functions,
            init,
            ..
        } = spec;
        let state = spec_state.unwrap_or(state);
        self.with_element(handle.node, |el| {
            el.orig_state = state.clone();
            el.state = state;
            el.props = props;
            el.plugins.extend(functions);
            el.plugins.extend(plugins);
            el.init = init.clone();
            el.mounted_to = Some(to.clone());
        });

        for (types, handler) in spec_events.into_iter().chain(events) {
            handle.on(&types, handler, true);
        }

        let keeps_id = existing && handle.id()?.is_some_and(|id| !id.is_empty());
        if !keeps_id {
            handle.set_attr("id", &unique_id(&self.config().id_prefix))?;
        }
        let id = handle.id()?.unwrap_or_default();

        handle.init_template(vdata)?;
        tracing::debug!("rendered {} as node {}", id, handle.node);
        self.events().publish(VibeEvent::Rendered {
            node: handle.node,
            id,
        });

        if existing && handle.is_connected() {
            handle.set_mount_status(MountStatus::Mounted);
        } else {
            self.schedule_mount(&handle, to, position);
        }

        if let Some(init) = init {
            let pending = handle.clone();
            self.ready(move || init(&pending));
        }
        Ok(handle)
    }

    fn schedule_mount(&self, handle: &Handle, to: Target, position: Position) {
        handle.set_mount_status(MountStatus::Pending);

        match self.read(|doc| to.resolve(doc)) {
            Ok(Some(target)) => {
                let pending = handle.clone();
                self.ready(move || pending.finish_mount(target, position));
            }
            Ok(None) => self.spawn_mount_wait(handle, to, position),
            Err(err) => handle.fail_mount(MountFailure::Insert(err)),
        }
    }

    fn spawn_mount_wait(&self, handle: &Handle, to: Target, position: Position) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("cannot wait for mount target {} outside a tokio runtime", to);
            handle.fail_mount(MountFailure::NoRuntime {
                target: to.to_string(),
            });
            return;
        };

        let vibe = self.clone();
        let pending = handle.clone();
        let task = runtime.spawn(async move {
            match vibe.await_target(&to).await {
                Ok(target) => {
                    let mounted = pending.clone();
                    vibe.ready(move || mounted.finish_mount(target, position));
                }
                Err(failure) => {
                    tracing::error!("{}", VibeError::from(failure.clone()));
                    pending.fail_mount(failure);
                }
            }
        });
        self.with_element(handle.node, |el| {
            if let Some(old) = el.mount_task.replace(task) {
                old.abort();
            }
        });
    }

    /// Wait until `to` resolves, re-checking on tree mutations and on each
    /// poll tick. Gives up after the configured number of failed ticks.
    async fn await_target(&self, to: &Target) -> std::result::Result<NodeId, MountFailure> {
        let mut tree = self.tree_changes();
        let mut ticker = tokio::time::interval(self.config().mount_poll_interval());
        ticker.tick().await;
        let max_attempts = self.config().mount_max_attempts;
        let mut attempts = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => attempts += 1,
                changed = tree.changed() => {
                    // the sender lives in the context we hold
                    if changed.is_err() {
                        return Err(MountFailure::TargetNotFound { target: to.to_string(), attempts });
                    }
                }
            }

            match self.read(|doc| to.resolve(doc)) {
                Ok(Some(node)) => {
                    tracing::debug!("mount target {} found after {} ticks", to, attempts);
                    return Ok(node);
                }
                Ok(None) => {}
                Err(err) => return Err(MountFailure::Insert(err)),
            }

            if attempts >= max_attempts {
                return Err(MountFailure::TargetNotFound {
                    target: to.to_string(),
                    attempts,
                });
            }
        }
    }

    /// Insert `node` at `position` relative to `target`
    pub(crate) fn insert(&self, node: NodeId, target: NodeId, position: Position) -> Result<()> {
        let parent = match position {
            Position::Append | Position::Prepend => target,
            Position::Before | Position::After => {
                self.read(|doc| doc.parent(target))?.unwrap_or(target)
            }
        };
        self.mutate(parent, MutationKind::ChildList, |doc| match position {
            Position::Append => doc.append_child(target, node),
            Position::Prepend => doc.prepend_child(target, node),
            Position::Before => doc.insert_before(target, node),
            Position::After => doc.insert_after(target, node),
        })
    }
}

impl Handle {
    pub(crate) fn set_mount_status(&self, status: MountStatus) {
        self.vibe.with_element(self.node, |el| {
            el.mount_status.send_replace(status);
        });
    }

    pub(crate) fn finish_mount(&self, target: NodeId, position: Position) {
        match self.vibe.insert(self.node, target, position) {
            Ok(()) => {
                let id = self.id().ok().flatten().unwrap_or_default();
                tracing::debug!("mounted {} ({:?} node {})", id, position, target);
                self.set_mount_status(MountStatus::Mounted);
                self.vibe
                    .events()
                    .publish(VibeEvent::Mounted { node: self.node, id });
            }
            Err(err) => {
                tracing::error!("mount of node {} failed: {}", self.node, err);
                let failure = match err {
                    VibeError::Dom(err) => MountFailure::Insert(err),
                    other => MountFailure::Insert(DomError::HierarchyRequest(other.to_string())),
                };
                self.fail_mount(failure);
            }
        }
    }

    fn fail_mount(&self, failure: MountFailure) {
        let target = match &failure {
            MountFailure::TargetNotFound { target, .. } | MountFailure::NoRuntime { target } => target.clone(),
            MountFailure::Insert(_) => self.mounted_to().map(|t| t.to_string()).unwrap_or_default(),
        };
        self.set_mount_status(MountStatus::Failed(failure));
        self.vibe.events().publish(VibeEvent::MountFailed {
            node: self.node,
            target,
        });
    }

    pub fn mount_status(&self) -> MountStatus {
        self.vibe
            .peek_element(self.node, |el| el.mount_status.borrow().clone())
            .unwrap_or_default()
    }

    pub fn mounted_to(&self) -> Option<Target> {
        self.vibe
            .peek_element(self.node, |el| el.mounted_to.clone())
            .flatten()
    }

    /// Resolves once the element is mounted, or with the reason it never will be
    pub async fn mounted(&self) -> Result<()> {
        let mut rx = self
            .vibe
            .peek_element(self.node, |el| el.mount_status.subscribe())
            .ok_or(VibeError::NotMounted(self.node))?;

        let status = rx
            .wait_for(|status| !matches!(status, MountStatus::Pending))
            .await
            .map_err(|_| VibeError::Closed)?
            .clone();

        match status {
            MountStatus::Mounted => Ok(()),
            MountStatus::Failed(failure) => Err(failure.into()),
            MountStatus::Unmounted | MountStatus::Pending => Err(VibeError::NotMounted(self.node)),
        }
    }
}
