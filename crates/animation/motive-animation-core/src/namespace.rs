#![allow(dead_code)]
//! Namespaces: one isolation scope's triggers, listeners and pending queue.
//!
//! A namespace owns the trigger definitions registered for one embedding
//! scope (one component instance), the listener registry for its nodes, and
//! the queue of transitions waiting for the next flush. The orchestration
//! that spans engine tables lives on the engine itself.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hashbrown::HashMap;

use motive_api_core::ast::AnimationOptions;
use motive_api_core::events::{AnimationEvent, PlayerPhase};
use motive_api_core::style::StyleValue;

use crate::ids::{NamespaceId, NodeId};
use crate::transition_player::PlayerRc;
use crate::trigger::{AnimationTrigger, TransitionFactory, VOID_STATE};

/// A state-change payload handed to `trigger()`.
#[derive(Clone, Debug)]
pub enum TriggerValue {
    Value(String),
    Bool(bool),
    Number(f32),
    Void,
    /// Value plus per-invocation options (params).
    WithOptions {
        value: Box<TriggerValue>,
        options: AnimationOptions,
    },
}

impl TriggerValue {
    fn normalize(&self) -> String {
        match self {
            TriggerValue::Value(v) => v.clone(),
            TriggerValue::Bool(true) => "1".to_string(),
            TriggerValue::Bool(false) => "0".to_string(),
            TriggerValue::Number(n) => StyleValue::Number(*n).as_text(),
            TriggerValue::Void => VOID_STATE.to_string(),
            TriggerValue::WithOptions { value, .. } => value.normalize(),
        }
    }
}

/// One live state value per (node, namespace, trigger).
#[derive(Clone, Debug)]
pub struct StateValue {
    pub value: String,
    pub options: AnimationOptions,
    pub namespace_id: Option<NamespaceId>,
}

impl StateValue {
    pub fn new(input: &TriggerValue, namespace_id: Option<NamespaceId>) -> Self {
        let options = match input {
            TriggerValue::WithOptions { options, .. } => {
                let mut options = options.clone();
                options.params.get_or_insert_with(HashMap::new);
                options
            }
            _ => AnimationOptions {
                params: Some(HashMap::new()),
                ..Default::default()
            },
        };
        Self {
            value: input.normalize(),
            options,
            namespace_id,
        }
    }

    pub fn void() -> Self {
        Self::new(&TriggerValue::Void, None)
    }

    pub fn params(&self) -> &HashMap<String, StyleValue> {
        self.options
            .params
            .as_ref()
            .expect("state value params are always initialized")
    }

    /// Adopt any parameter from the prior value that this one leaves unset.
    pub fn absorb_options(&mut self, prior: &AnimationOptions) {
        if let Some(prior_params) = &prior.params {
            let params = self.options.params.get_or_insert_with(HashMap::new);
            for (key, value) in prior_params {
                if !params.contains_key(key) {
                    params.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// A transition that could not apply before the next flush.
pub struct QueuedTransition {
    pub element: NodeId,
    pub trigger_name: String,
    pub transition: Rc<TransitionFactory>,
    pub from_state: StateValue,
    pub to_state: StateValue,
    pub player: PlayerRc,
    pub is_fallback: bool,
}

pub type ListenerCallback = Rc<RefCell<dyn FnMut(AnimationEvent)>>;

pub struct ListenerEntry {
    pub id: u64,
    pub name: String,
    pub phase: PlayerPhase,
    pub callback: ListenerCallback,
}

pub struct Namespace {
    pub id: NamespaceId,
    pub host_element: NodeId,
    /// Marker placed on the host and every node inserted under this scope.
    pub host_marker: String,
    pub(crate) triggers: RefCell<HashMap<String, Rc<AnimationTrigger>>>,
    pub(crate) queue: RefCell<Vec<QueuedTransition>>,
    pub(crate) listeners: RefCell<HashMap<NodeId, Vec<Rc<ListenerEntry>>>>,
    pub(crate) players: RefCell<Vec<PlayerRc>>,
    next_listener_id: Cell<u64>,
}

impl Namespace {
    pub fn new(id: NamespaceId, host_element: NodeId) -> Rc<Self> {
        Rc::new(Self {
            id,
            host_element,
            host_marker: format!("mv-ns-{}", id.0),
            triggers: RefCell::new(HashMap::new()),
            queue: RefCell::new(Vec::new()),
            listeners: RefCell::new(HashMap::new()),
            players: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(0),
        })
    }

    /// Register a trigger definition; false when the name is already taken.
    pub fn register(&self, name: &str, trigger: Rc<AnimationTrigger>) -> bool {
        let mut triggers = self.triggers.borrow_mut();
        if triggers.contains_key(name) {
            return false;
        }
        triggers.insert(name.to_string(), trigger);
        true
    }

    /// Drop a trigger and every piece of per-trigger state it owns.
    pub fn deregister(&self, name: &str) {
        self.triggers.borrow_mut().remove(name);
        let mut listeners = self.listeners.borrow_mut();
        for entries in listeners.values_mut() {
            entries.retain(|entry| entry.name != name);
        }
    }

    pub fn has_trigger(&self, name: &str) -> bool {
        self.triggers.borrow().contains_key(name)
    }

    pub fn get_trigger(&self, name: &str) -> Option<Rc<AnimationTrigger>> {
        self.triggers.borrow().get(name).cloned()
    }

    pub(crate) fn alloc_listener_id(&self) -> u64 {
        let id = self.next_listener_id.get();
        self.next_listener_id.set(id.wrapping_add(1));
        id
    }

    pub fn queue_len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// True when the node still owns listener, queue or player state here.
    pub fn element_contains_data(&self, element: NodeId) -> bool {
        if self.listeners.borrow().contains_key(&element) {
            return true;
        }
        if self.queue.borrow().iter().any(|q| q.element == element) {
            return true;
        }
        self.players.borrow().iter().any(|p| p.element == element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// it should normalize boolean and void trigger values
    #[test]
    fn trigger_value_normalization() {
        assert_eq!(TriggerValue::Bool(true).normalize(), "1");
        assert_eq!(TriggerValue::Bool(false).normalize(), "0");
        assert_eq!(TriggerValue::Void.normalize(), "void");
        assert_eq!(TriggerValue::Number(3.0).normalize(), "3");
        assert_eq!(TriggerValue::Value("open".into()).normalize(), "open");
    }

    /// it should absorb unset params from the prior state only
    #[test]
    fn state_value_absorbs_prior_params() {
        let mut prior_params = HashMap::new();
        prior_params.insert("a".to_string(), StyleValue::Number(1.0));
        prior_params.insert("b".to_string(), StyleValue::Number(2.0));
        let prior = AnimationOptions {
            params: Some(prior_params),
            ..Default::default()
        };

        let mut params = HashMap::new();
        params.insert("b".to_string(), StyleValue::Number(9.0));
        let mut next = StateValue::new(
            &TriggerValue::WithOptions {
                value: Box::new(TriggerValue::Value("open".into())),
                options: AnimationOptions {
                    params: Some(params),
                    ..Default::default()
                },
            },
            Some(NamespaceId(1)),
        );
        next.absorb_options(&prior);

        assert_eq!(next.params().get("a"), Some(&StyleValue::Number(1.0)));
        assert_eq!(next.params().get("b"), Some(&StyleValue::Number(9.0)));
    }
}
