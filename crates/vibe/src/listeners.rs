//! Element event listeners
//!
//! Dispatch follows the DOM's three phases: capturing listeners from the
//! root down to the parent, every listener on the target, then bubbling
//! listeners from the parent back up to the root. Listener lists are
//! snapshotted per node, so handlers may add or remove listeners freely.

use std::fmt;
use std::sync::Arc;

use dom::NodeId;

use crate::error::Result;
use crate::handle::Handle;

pub type EventHandler = Arc<dyn Fn(&mut Event) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`]
pub fn handler(f: impl Fn(&mut Event) + Send + Sync + 'static) -> EventHandler {
    Arc::new(f)
}

#[derive(Clone)]
pub(crate) struct Listener {
    kind: String,
    handler: EventHandler,
    capture: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Capturing,
    AtTarget,
    Bubbling,
}

pub struct Event {
    kind: String,
    target: Handle,
    current_target: NodeId,
    phase: EventPhase,
    propagation_stopped: bool,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("target", &self.target.node())
            .field("current_target", &self.current_target)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Event {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The element the event was triggered on
    pub fn target(&self) -> &Handle {
        &self.target
    }

    /// The element whose listener is running
    pub fn current_target(&self) -> Handle {
        self.target.vibe().handle(self.current_target)
    }

    pub fn phase(&self) -> EventPhase {
        self.phase
    }

    /// Finish the current node's listeners, then stop
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

fn split_types(types: &str) -> impl Iterator<Item = &str> {
    types.split(',').map(str::trim).filter(|t| !t.is_empty())
}

impl Handle {
    /// Listen for one or more comma-separated event types. Registering the
    /// same handler twice for a type and phase is a no-op.
    pub fn on(&self, types: &str, handler: EventHandler, capture: bool) -> &Self {
        let mut list = self.vibe.inner.listeners.entry(self.node).or_default();
        for kind in split_types(types) {
            let duplicate = list
                .iter()
                .any(|l| l.kind == kind && l.capture == capture && Arc::ptr_eq(&l.handler, &handler));
            if !duplicate {
                list.push(Listener {
                    kind: kind.to_string(),
                    handler: handler.clone(),
                    capture,
                });
            }
        }
        self
    }

    /// Remove a handler registered with [`on`](Self::on)
    pub fn off(&self, types: &str, handler: &EventHandler, capture: bool) -> &Self {
        if let Some(mut list) = self.vibe.inner.listeners.get_mut(&self.node) {
            for kind in split_types(types) {
                list.retain(|l| !(l.kind == kind && l.capture == capture && Arc::ptr_eq(&l.handler, handler)));
            }
        }
        self
    }

    pub fn listener_count(&self, kind: &str) -> usize {
        self.vibe
            .inner
            .listeners
            .get(&self.node)
            .map(|list| list.iter().filter(|l| l.kind == kind).count())
            .unwrap_or(0)
    }

    /// Dispatch a synthetic event of type `kind` from this element
    pub fn trigger(&self, kind: &str) -> Result<&Self> {
        let ancestors = self
            .vibe
            .read(|doc| doc.arena().ancestors(self.node))?;

        let mut event = Event {
            kind: kind.to_string(),
            target: self.clone(),
            current_target: self.node,
            phase: EventPhase::Capturing,
            propagation_stopped: false,
        };

        let path = ancestors
            .iter()
            .rev()
            .map(|node| (*node, EventPhase::Capturing))
            .chain(std::iter::once((self.node, EventPhase::AtTarget)))
            .chain(ancestors.iter().map(|node| (*node, EventPhase::Bubbling)));

        for (node, phase) in path {
            let handlers = self.snapshot(node, kind, phase);
            if handlers.is_empty() {
                continue;
            }
            event.current_target = node;
            event.phase = phase;
            for handler in handlers {
                handler(&mut event);
            }
            if event.propagation_stopped {
                break;
            }
        }
        Ok(self)
    }

    fn snapshot(&self, node: NodeId, kind: &str, phase: EventPhase) -> Vec<EventHandler> {
        let Some(list) = self.vibe.inner.listeners.get(&node) else {
            return Vec::new();
        };
        list.iter()
            .filter(|l| l.kind == kind)
            .filter(|l| match phase {
                EventPhase::Capturing => l.capture,
                EventPhase::AtTarget => true,
                EventPhase::Bubbling => !l.capture,
            })
            .map(|l| l.handler.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> EventHandler {
        let log = log.clone();
        handler(move |e| log.lock().unwrap().push(format!("{name}:{:?}", e.phase())))
    }

    #[test]
    fn test_dispatch_phases() {
        let vibe = fixture(r#"<div id="outer"><button id="btn"></button></div>"#);
        let outer = vibe.get_by_id("outer").unwrap();
        let btn = vibe.get_by_id("btn").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        outer.on("click", recorder(&log, "outer-bubble"), false);
        outer.on("click", recorder(&log, "outer-capture"), true);
        btn.on("click", recorder(&log, "btn"), false);

        btn.trigger("click").unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["outer-capture:Capturing", "btn:AtTarget", "outer-bubble:Bubbling"]
        );
    }

    #[test]
    fn test_stop_propagation() {
        let vibe = fixture(r#"<div id="outer"><button id="btn"></button></div>"#);
        let outer = vibe.get_by_id("outer").unwrap();
        let btn = vibe.get_by_id("btn").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        outer.on("click", recorder(&log, "outer"), false);
        btn.on("click", handler(|e| e.stop_propagation()), false);
        btn.on("click", recorder(&log, "btn-second"), false);

        btn.trigger("click").unwrap();
        assert_eq!(*log.lock().unwrap(), ["btn-second:AtTarget"]);
    }

    #[test]
    fn test_multi_type_on_and_off() {
        let vibe = fixture(r#"<input id="field">"#);
        let field = vibe.get_by_id("field").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let h = recorder(&log, "h");

        field.on("focus, blur", h.clone(), false).on("focus", h.clone(), false);
        assert_eq!(field.listener_count("focus"), 1);
        assert_eq!(field.listener_count("blur"), 1);

        field.off("focus", &h, false);
        field.trigger("focus").unwrap().trigger("blur").unwrap();
        assert_eq!(*log.lock().unwrap(), ["h:AtTarget"]);
    }

    #[test]
    fn test_handler_sees_targets() {
        let vibe = fixture(r#"<ul id="list"><li id="item"></li></ul>"#);
        let list = vibe.get_by_id("list").unwrap();
        let item = vibe.get_by_id("item").unwrap();
        let seen = Arc::new(Mutex::new(None));

        let slot = seen.clone();
        list.on(
            "select",
            handler(move |e| {
                *slot.lock().unwrap() = Some((e.target().node(), e.current_target().node()));
            }),
            false,
        );
        item.trigger("select").unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((item.node(), list.node())));
    }
}
