#![allow(dead_code)]
//! Transition runtime: the per-session state machine that owns every
//! namespace, resolves which transition applies to a state change, builds and
//! merges players, manages insertion/removal choreography, and flushes all
//! pending work once per rendering cycle.
//!
//! The engine is one explicit context object (`Rc<EngineCtx>` behind
//! `TransitionEngine`); tables use interior mutability and borrows are never
//! held across driver, player or listener calls.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;

use motive_api_core::ast::TriggerAst;
use motive_api_core::error::{EngineError, TransitionFailure};
use motive_api_core::events::{AnimationEvent, PlayerPhase};
use motive_api_core::player::{AnimationPlayer, NoopAnimationPlayer, PlayerCallback};
use motive_api_core::style::{style_map, StyleMap, StyleValue, AUTO_STYLE, PRE_STYLE};
use motive_api_core::tasks::Microtasks;

use crate::driver::AnimationDriver;
use crate::group_player::optimize_group_player;
use crate::ids::{NamespaceId, NodeId};
use crate::instruction::{ElementInstructionMap, Keyframe, TransitionInstruction};
use crate::namespace::{
    ListenerCallback, ListenerEntry, Namespace, QueuedTransition, StateValue, TriggerValue,
};
use crate::transition_player::{
    sync_player_events, PlayerRc, SharedPlayer, TransitionAnimationPlayer,
};
use crate::trigger::{build_trigger, VOID_STATE};

pub const TRIGGER_MARKER: &str = "mv-trigger";
pub const TRIGGER_SELECTOR: &str = ".mv-trigger";
pub const QUEUED_MARKER: &str = "mv-animate-queued";
pub const QUEUED_SELECTOR: &str = ".mv-animate-queued";
pub const DISABLED_MARKER: &str = "mv-animate-disabled";
pub const DISABLED_SELECTOR: &str = ".mv-animate-disabled";
pub const ANIMATING_MARKER: &str = "mv-animating";
pub const ANIMATING_SELECTOR: &str = ".mv-animating";
pub const STAR_MARKER: &str = "mv-inserted";
pub const ENTER_MARKER: &str = "mv-enter";
pub const LEAVE_MARKER: &str = "mv-leave";

/// Opaque payload carried from `remove_node` to the removal-complete hook.
pub type RemovalContext = Option<Rc<dyn Any>>;

/// Removal descriptor for a node leaving the tree. A value with
/// `set_for_removal == false` is the cleared ("already processed") form.
#[derive(Clone, Default)]
pub struct RemovalState {
    pub namespace_id: Option<NamespaceId>,
    pub set_for_removal: bool,
    pub removal_context: RemovalContext,
    pub set_for_move: bool,
    pub has_animation: bool,
    pub removed_before_queried: bool,
    pub previous_triggers_values: Option<HashMap<String, String>>,
}

/// A boxed player shared between owners (a wrapper's real player also serves
/// as the consumed-subtree player of its queried nodes).
#[derive(Clone)]
pub struct RcPlayer(Rc<RefCell<Box<dyn AnimationPlayer>>>);

impl RcPlayer {
    pub fn new(player: Box<dyn AnimationPlayer>) -> Self {
        Self(Rc::new(RefCell::new(player)))
    }

    fn register(&self, phase: PlayerPhase, cb: PlayerCallback) {
        let mut inner = self.0.borrow_mut();
        match phase {
            PlayerPhase::Start => inner.on_start(cb),
            PlayerPhase::Done => inner.on_done(cb),
            PlayerPhase::Destroy => inner.on_destroy(cb),
        }
    }
}

impl AnimationPlayer for RcPlayer {
    fn on_start(&mut self, f: PlayerCallback) {
        self.register(PlayerPhase::Start, f);
    }

    fn on_done(&mut self, f: PlayerCallback) {
        self.register(PlayerPhase::Done, f);
    }

    fn on_destroy(&mut self, f: PlayerCallback) {
        self.register(PlayerPhase::Destroy, f);
    }

    fn init(&mut self) {
        self.0.borrow_mut().init();
    }

    fn has_started(&self) -> bool {
        self.0.borrow().has_started()
    }

    fn play(&mut self) {
        self.0.borrow_mut().play();
    }

    fn pause(&mut self) {
        self.0.borrow_mut().pause();
    }

    fn restart(&mut self) {
        self.0.borrow_mut().restart();
    }

    fn finish(&mut self) {
        self.0.borrow_mut().finish();
    }

    fn destroy(&mut self) {
        self.0.borrow_mut().destroy();
    }

    fn reset(&mut self) {
        self.0.borrow_mut().reset();
    }

    fn set_position(&mut self, position: f32) {
        self.0.borrow_mut().set_position(position);
    }

    fn get_position(&self) -> f32 {
        self.0.borrow().get_position()
    }

    fn total_time(&self) -> f32 {
        self.0.borrow().total_time()
    }

    fn before_destroy(&mut self) {
        self.0.borrow_mut().before_destroy();
    }

    fn trigger_callback(&mut self, phase: PlayerPhase) {
        self.0.borrow_mut().trigger_callback(phase);
    }
}

pub struct EngineCtx {
    self_weak: Weak<EngineCtx>,
    driver: Rc<dyn AnimationDriver>,
    root: Option<NodeId>,

    namespaces: RefCell<HashMap<NamespaceId, Rc<Namespace>>>,
    /// DOM-ordered: an ancestor's namespace sorts before its descendants'.
    namespace_list: RefCell<Vec<Rc<Namespace>>>,
    namespaces_by_host: RefCell<HashMap<NodeId, NamespaceId>>,
    new_host_elements: RefCell<Vec<(NodeId, NamespaceId)>>,

    players: RefCell<Vec<PlayerRc>>,
    players_by_element: RefCell<HashMap<NodeId, Vec<PlayerRc>>>,
    players_by_queried_element: RefCell<HashMap<NodeId, Vec<PlayerRc>>>,
    states_by_element: RefCell<HashMap<NodeId, HashMap<String, StateValue>>>,
    disabled_nodes: RefCell<HashSet<NodeId>>,
    removal_states: RefCell<HashMap<NodeId, RemovalState>>,

    collected_enter_elements: RefCell<Vec<NodeId>>,
    collected_leave_elements: RefCell<Vec<NodeId>>,

    total_animations: Cell<usize>,
    total_queued_players: Cell<usize>,
    marker_seq: Cell<usize>,

    flush_fns: RefCell<Vec<Box<dyn FnOnce()>>>,
    when_quiet_fns: RefCell<Vec<Box<dyn FnOnce()>>>,
    microtasks: Microtasks,

    on_removal_complete: RefCell<Option<Box<dyn FnMut(NodeId, RemovalContext)>>>,
    error_reporter: RefCell<Option<Box<dyn FnMut(EngineError)>>>,
}

/// The public runtime handle. Cheap to clone; dropped handles tear the
/// session down once the last one goes.
#[derive(Clone)]
pub struct TransitionEngine {
    ctx: Rc<EngineCtx>,
}

impl TransitionEngine {
    pub fn new(driver: Rc<dyn AnimationDriver>, root: Option<NodeId>) -> Self {
        Self {
            ctx: Rc::new_cyclic(|self_weak| EngineCtx {
                self_weak: self_weak.clone(),
                driver,
                root,
                namespaces: RefCell::new(HashMap::new()),
                namespace_list: RefCell::new(Vec::new()),
                namespaces_by_host: RefCell::new(HashMap::new()),
                new_host_elements: RefCell::new(Vec::new()),
                players: RefCell::new(Vec::new()),
                players_by_element: RefCell::new(HashMap::new()),
                players_by_queried_element: RefCell::new(HashMap::new()),
                states_by_element: RefCell::new(HashMap::new()),
                disabled_nodes: RefCell::new(HashSet::new()),
                removal_states: RefCell::new(HashMap::new()),
                collected_enter_elements: RefCell::new(Vec::new()),
                collected_leave_elements: RefCell::new(Vec::new()),
                total_animations: Cell::new(0),
                total_queued_players: Cell::new(0),
                marker_seq: Cell::new(0),
                flush_fns: RefCell::new(Vec::new()),
                when_quiet_fns: RefCell::new(Vec::new()),
                microtasks: Microtasks::new(),
                on_removal_complete: RefCell::new(None),
                error_reporter: RefCell::new(None),
            }),
        }
    }

    pub fn set_on_removal_complete(&self, hook: Box<dyn FnMut(NodeId, RemovalContext)>) {
        *self.ctx.on_removal_complete.borrow_mut() = Some(hook);
    }

    /// Override the aggregate failure reporter; the default panics.
    pub fn set_error_reporter(&self, hook: Box<dyn FnMut(EngineError)>) {
        *self.ctx.error_reporter.borrow_mut() = Some(hook);
    }

    pub fn register(&self, namespace_id: NamespaceId, host: NodeId) {
        self.ctx.register(namespace_id, host);
    }

    pub fn register_trigger(&self, namespace_id: NamespaceId, name: &str, ast: &TriggerAst) {
        self.ctx.register_trigger(namespace_id, name, ast);
    }

    pub fn trigger(
        &self,
        namespace_id: NamespaceId,
        element: NodeId,
        name: &str,
        value: TriggerValue,
    ) -> bool {
        match self.ctx.namespace(namespace_id) {
            Some(ns) => {
                self.ctx.ns_trigger(&ns, element, name, value, true);
                true
            }
            None => false,
        }
    }

    pub fn insert_node(
        &self,
        namespace_id: Option<NamespaceId>,
        element: NodeId,
        _parent: Option<NodeId>,
        is_direct_insert: bool,
    ) {
        self.ctx.insert_node(namespace_id, element, is_direct_insert);
    }

    pub fn remove_node(
        &self,
        namespace_id: Option<NamespaceId>,
        element: NodeId,
        context: RemovalContext,
    ) {
        self.ctx.remove_node(namespace_id, element, context);
    }

    pub fn mark_element_as_disabled(&self, element: NodeId, value: bool) {
        self.ctx.mark_element_as_disabled(element, value);
    }

    pub fn listen(
        &self,
        namespace_id: NamespaceId,
        element: NodeId,
        name: &str,
        phase: &str,
        callback: Box<dyn FnMut(AnimationEvent)>,
    ) -> Box<dyn FnOnce()> {
        let ns = self
            .ctx
            .namespace(namespace_id)
            .unwrap_or_else(|| panic!("namespace {namespace_id} has not been registered"));
        self.ctx.ns_listen(&ns, element, name, phase, callback)
    }

    pub fn flush(&self, tick: i64) {
        self.ctx.flush(tick);
    }

    /// Invoke `done` once every running animation has finished. The callback
    /// analog of the original awaitable.
    pub fn when_rendering_done(&self, done: Box<dyn FnOnce()>) {
        self.ctx.microtasks.drain();
        let players: Vec<PlayerRc> = self.ctx.players.borrow().clone();
        let live: Vec<PlayerRc> = players.into_iter().filter(|p| !p.destroyed()).collect();
        if live.is_empty() {
            done();
        } else {
            let boxed: Vec<Box<dyn AnimationPlayer>> = live
                .into_iter()
                .map(|p| Box::new(SharedPlayer(p)) as Box<dyn AnimationPlayer>)
                .collect();
            let mut group = optimize_group_player(boxed);
            let mut done = Some(done);
            group.on_done(Box::new(move || {
                if let Some(done) = done.take() {
                    done();
                }
            }));
        }
    }

    pub fn destroy(&self, namespace_id: NamespaceId, context: RemovalContext) {
        self.ctx.destroy_namespace_deferred(namespace_id, context);
    }

    pub fn process_leave_node(&self, element: NodeId) {
        self.ctx.process_leave_node(element);
    }

    pub fn element_contains_data(&self, namespace_id: NamespaceId, element: NodeId) -> bool {
        self.ctx.element_contains_data(namespace_id, element)
    }

    pub fn players_count(&self) -> usize {
        self.ctx.players.borrow().len()
    }

    pub fn total_animations(&self) -> usize {
        self.ctx.total_animations.get()
    }

    pub fn queued_players_count(&self) -> usize {
        self.ctx.total_queued_players.get()
    }

    pub fn microtasks(&self) -> Microtasks {
        self.ctx.microtasks.clone()
    }
}

fn make_event(
    element: NodeId,
    trigger_name: &str,
    from_state: &str,
    to_state: &str,
    tick: i64,
) -> AnimationEvent {
    AnimationEvent {
        element: element.0,
        trigger_name: trigger_name.to_string(),
        from_state: from_state.to_string(),
        to_state: to_state.to_string(),
        phase: PlayerPhase::Start,
        total_time: 0.0,
        disabled: false,
        tick: Some(tick),
    }
}

fn listen_on_player(
    player: &PlayerRc,
    phase: PlayerPhase,
    event: AnimationEvent,
    callback: ListenerCallback,
) {
    let p = player.clone();
    player.register(
        phase,
        Box::new(move || {
            let mut e = event.clone();
            e.phase = phase;
            e.total_time = p.total_time();
            e.disabled = p.disabled.get();
            (callback.borrow_mut())(e);
        }),
    );
}

fn shared_group(players: &[PlayerRc]) -> Box<dyn AnimationPlayer> {
    optimize_group_player(
        players
            .iter()
            .map(|p| Box::new(SharedPlayer(p.clone())) as Box<dyn AnimationPlayer>)
            .collect(),
    )
}

impl EngineCtx {
    fn namespace(&self, id: NamespaceId) -> Option<Rc<Namespace>> {
        self.namespaces.borrow().get(&id).cloned()
    }

    fn weak(&self) -> Weak<Self> {
        self.self_weak.clone()
    }

    fn after_flush(&self, f: impl FnOnce() + 'static) {
        self.flush_fns.borrow_mut().push(Box::new(f));
    }

    fn after_flush_animations_done(&self, f: impl FnOnce() + 'static) {
        self.when_quiet_fns.borrow_mut().push(Box::new(f));
    }

    fn report_error(&self, error: EngineError) {
        let reporter = self.error_reporter.borrow_mut().take();
        match reporter {
            Some(mut hook) => {
                hook(error);
                *self.error_reporter.borrow_mut() = Some(hook);
            }
            None => panic!("{error}"),
        }
    }

    fn fire_removal_complete(&self, element: NodeId, context: RemovalContext) {
        let mut hook = self.on_removal_complete.borrow_mut().take();
        if let Some(hook_fn) = &mut hook {
            hook_fn(element, context);
        }
        if self.on_removal_complete.borrow().is_none() {
            *self.on_removal_complete.borrow_mut() = hook;
        }
    }

    // ---------------------------------------------------------------- setup

    fn register(&self, namespace_id: NamespaceId, host: NodeId) {
        if self.namespaces.borrow().contains_key(&namespace_id) {
            return;
        }
        let ns = Namespace::new(namespace_id, host);
        self.driver.add_marker(host, &ns.host_marker);
        self.namespaces.borrow_mut().insert(namespace_id, ns.clone());

        let in_tree = match self.root {
            Some(root) => self.driver.contains_element(root, host),
            None => false,
        };
        if in_tree {
            self.balance_namespace_list(&ns, host);
        } else {
            // The host may itself be mid-insertion; place it in the ordered
            // list during the next flush, when ancestry is known.
            self.new_host_elements.borrow_mut().push((host, namespace_id));
            self.collect_enter_element(host);
        }
    }

    fn balance_namespace_list(&self, ns: &Rc<Namespace>, host: NodeId) {
        let mut list = self.namespace_list.borrow_mut();
        let by_host = self.namespaces_by_host.borrow();
        if !list.is_empty() {
            let mut found = false;
            let mut ancestor = self.driver.get_parent_element(host);
            while let Some(a) = ancestor {
                if let Some(ancestor_ns) = by_host.get(&a) {
                    if let Some(index) = list.iter().position(|n| n.id == *ancestor_ns) {
                        list.insert(index + 1, ns.clone());
                        found = true;
                        break;
                    }
                }
                ancestor = self.driver.get_parent_element(a);
            }
            if !found {
                // No ancestor namespace: existing descendants must order
                // after this one.
                list.insert(0, ns.clone());
            }
        } else {
            list.push(ns.clone());
        }
        drop(by_host);
        self.namespaces_by_host.borrow_mut().insert(host, ns.id);
    }

    fn register_trigger(&self, namespace_id: NamespaceId, name: &str, ast: &TriggerAst) {
        if let Some(ns) = self.namespace(namespace_id) {
            if ns.register(name, Rc::new(build_trigger(name, ast))) {
                self.total_animations.set(self.total_animations.get() + 1);
            }
        }
    }

    fn destroy_namespace_deferred(&self, namespace_id: NamespaceId, context: RemovalContext) {
        let Some(ns) = self.namespace(namespace_id) else {
            return;
        };
        let weak = self.weak();
        let ns2 = ns.clone();
        self.after_flush(move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.namespaces_by_host.borrow_mut().remove(&ns2.host_element);
                ctx.namespaces.borrow_mut().remove(&ns2.id);
                ctx.namespace_list
                    .borrow_mut()
                    .retain(|n| n.id != ns2.id);
            }
        });
        let weak = self.weak();
        self.after_flush_animations_done(move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.destroy_namespace_now(&ns, context.clone());
            }
        });
    }

    fn destroy_namespace_now(&self, ns: &Rc<Namespace>, context: RemovalContext) {
        self.clear_element_cache(Some(ns), ns.host_element);
        self.signal_removal_for_inner_triggers(ns, ns.host_element, context);
        let players: Vec<PlayerRc> = ns.players.borrow_mut().drain(..).collect();
        for p in players {
            p.destroy();
        }
    }

    // ------------------------------------------------------------- triggers

    fn ns_trigger(
        &self,
        ns: &Rc<Namespace>,
        element: NodeId,
        name: &str,
        value: TriggerValue,
        default_to_fallback: bool,
    ) -> Option<PlayerRc> {
        let trigger = ns.get_trigger(name).unwrap_or_else(|| {
            panic!("the provided animation trigger \"{name}\" has not been registered")
        });
        let player = TransitionAnimationPlayer::new(ns.id, name, element);

        let is_first_state = !self.states_by_element.borrow().contains_key(&element);
        if is_first_state {
            self.driver.add_marker(element, TRIGGER_MARKER);
            self.driver
                .add_marker(element, &format!("{TRIGGER_MARKER}-{name}"));
            self.states_by_element
                .borrow_mut()
                .insert(element, HashMap::new());
        }

        let from_state = self
            .states_by_element
            .borrow()
            .get(&element)
            .and_then(|m| m.get(name).cloned());
        let mut to_state = StateValue::new(&value, Some(ns.id));
        let carries_options = matches!(value, TriggerValue::WithOptions { .. });
        if let (false, Some(from)) = (carries_options, &from_state) {
            to_state.absorb_options(&from.options);
        }
        self.states_by_element
            .borrow_mut()
            .get_mut(&element)
            .expect("state map created above")
            .insert(name.to_string(), to_state.clone());

        let from_state = from_state.unwrap_or_else(StateValue::void);
        let is_removal = to_state.value == VOID_STATE;

        // Same value: no transition. A param-only change patches the end
        // styles directly during the next flush.
        if !is_removal && from_state.value == to_state.value {
            if from_state.params() != to_state.params() {
                let mut errors = Vec::new();
                let from_styles = trigger.match_styles(&from_state.value, from_state.params(), &mut errors);
                let to_styles = trigger.match_styles(&to_state.value, to_state.params(), &mut errors);
                if !errors.is_empty() {
                    self.report_error(EngineError::TransitionFailures(vec![TransitionFailure {
                        trigger_name: name.to_string(),
                        errors,
                    }]));
                } else {
                    let driver = self.driver.clone();
                    self.after_flush(move || {
                        driver.erase_styles(element, &from_styles);
                        driver.apply_styles(element, &to_styles);
                    });
                }
            }
            return None;
        }

        // At most one in-flight replacement per (node, namespace, trigger):
        // a not-yet-started player for the same key is cancelled outright.
        let stale: Vec<PlayerRc> = self
            .players_by_element
            .borrow()
            .get(&element)
            .map(|players| {
                players
                    .iter()
                    .filter(|p| p.namespace_id == ns.id && p.trigger_name == name && p.queued())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for p in stale {
            p.destroy();
        }

        let mut transition = trigger.match_transition(&from_state.value, &to_state.value);
        let mut is_fallback = false;
        if transition.is_none() {
            if !default_to_fallback {
                return None;
            }
            transition = Some(trigger.fallback_transition.clone());
            is_fallback = true;
        }

        self.total_queued_players
            .set(self.total_queued_players.get() + 1);
        ns.queue.borrow_mut().push(QueuedTransition {
            element,
            trigger_name: name.to_string(),
            transition: transition.expect("resolved above"),
            from_state,
            to_state,
            player: player.clone(),
            is_fallback,
        });

        if !is_fallback {
            self.driver.add_marker(element, QUEUED_MARKER);
            let driver = self.driver.clone();
            player.on_start(Box::new(move || {
                driver.remove_marker(element, QUEUED_MARKER);
            }));
        }

        let weak = self.weak();
        let weak_ns = Rc::downgrade(ns);
        let done_player = Rc::downgrade(&player);
        player.on_done(Box::new(move || {
            let Some(player) = done_player.upgrade() else {
                return;
            };
            if let Some(ns) = weak_ns.upgrade() {
                ns.players
                    .borrow_mut()
                    .retain(|p| !Rc::ptr_eq(p, &player));
            }
            if let Some(ctx) = weak.upgrade() {
                if let Some(list) = ctx.players_by_element.borrow_mut().get_mut(&player.element) {
                    list.retain(|p| !Rc::ptr_eq(p, &player));
                }
            }
        }));

        ns.players.borrow_mut().push(player.clone());
        self.players_by_element
            .borrow_mut()
            .entry(element)
            .or_default()
            .push(player.clone());
        Some(player)
    }

    fn ns_listen(
        &self,
        ns: &Rc<Namespace>,
        element: NodeId,
        name: &str,
        phase: &str,
        callback: Box<dyn FnMut(AnimationEvent)>,
    ) -> Box<dyn FnOnce()> {
        if !ns.has_trigger(name) {
            panic!(
                "unable to listen on the animation trigger event \"{phase}\" because the animation trigger \"{name}\" doesn't exist"
            );
        }
        if phase.is_empty() {
            panic!(
                "unable to listen on the animation trigger \"{name}\" because the provided event is undefined"
            );
        }
        let phase = PlayerPhase::parse(phase).unwrap_or_else(|| {
            panic!(
                "the provided animation trigger event \"{phase}\" for the animation trigger \"{name}\" is not supported"
            )
        });

        let entry = Rc::new(ListenerEntry {
            id: ns.alloc_listener_id(),
            name: name.to_string(),
            phase,
            callback: Rc::new(RefCell::new(callback)),
        });
        ns.listeners
            .borrow_mut()
            .entry(element)
            .or_default()
            .push(entry.clone());

        let mut states = self.states_by_element.borrow_mut();
        let triggers_with_states = states.entry(element).or_default();
        if !triggers_with_states.contains_key(name) {
            self.driver.add_marker(element, TRIGGER_MARKER);
            self.driver
                .add_marker(element, &format!("{TRIGGER_MARKER}-{name}"));
            triggers_with_states.insert(name.to_string(), StateValue::void());
        }
        drop(states);

        // Deregistration happens after the flush so leave-animation callbacks
        // can still fire for removed nodes.
        let weak = self.weak();
        let weak_ns = Rc::downgrade(ns);
        let entry_id = entry.id;
        let trigger_name = entry.name.clone();
        Box::new(move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.after_flush(move || {
                    let Some(ns) = weak_ns.upgrade() else { return };
                    if let Some(entries) = ns.listeners.borrow_mut().get_mut(&element) {
                        entries.retain(|e| e.id != entry_id);
                    }
                    if !ns.has_trigger(&trigger_name) {
                        let Some(ctx) = weak.upgrade() else { return };
                        let mut states = ctx.states_by_element.borrow_mut();
                        if let Some(map) = states.get_mut(&element) {
                            map.remove(&trigger_name);
                        }
                    }
                });
            }
        })
    }

    // ------------------------------------------------------ insert / remove

    fn collect_enter_element(&self, element: NodeId) {
        self.collected_enter_elements.borrow_mut().push(element);
    }

    fn insert_node(&self, namespace_id: Option<NamespaceId>, element: NodeId, is_direct_insert: bool) {
        // A removed-then-reinserted node is a move, not a removal.
        if let Some(state) = self.removal_states.borrow_mut().get_mut(&element) {
            if state.set_for_removal {
                state.set_for_removal = false;
                state.removal_context = None;
                state.set_for_move = true;
                self.collected_leave_elements
                    .borrow_mut()
                    .retain(|e| *e != element);
            }
        }
        if let Some(id) = namespace_id {
            if let Some(ns) = self.namespace(id) {
                self.driver.add_marker(element, &ns.host_marker);
            }
        }
        if is_direct_insert {
            self.collect_enter_element(element);
        }
    }

    fn mark_element_as_disabled(&self, element: NodeId, value: bool) {
        let mut disabled = self.disabled_nodes.borrow_mut();
        if value {
            if disabled.insert(element) {
                self.driver.add_marker(element, DISABLED_MARKER);
            }
        } else if disabled.remove(&element) {
            self.driver.remove_marker(element, DISABLED_MARKER);
        }
    }

    fn remove_node(&self, namespace_id: Option<NamespaceId>, element: NodeId, context: RemovalContext) {
        let ns = namespace_id.and_then(|id| self.namespace(id));
        match &ns {
            Some(ns) => self.ns_remove_node(ns, element, context.clone()),
            None => self.mark_element_as_removed(None, element, false, context.clone(), None),
        }
        // A host node may carry a second namespace registered on it.
        let host_ns = self
            .namespaces_by_host
            .borrow()
            .get(&element)
            .copied()
            .and_then(|id| if Some(id) != namespace_id { self.namespace(id) } else { None });
        if let Some(host_ns) = host_ns {
            self.ns_remove_node(&host_ns, element, context);
        }
    }

    fn mark_element_as_removed(
        &self,
        namespace_id: Option<NamespaceId>,
        element: NodeId,
        has_animation: bool,
        context: RemovalContext,
        previous_triggers_values: Option<HashMap<String, String>>,
    ) {
        self.collected_leave_elements.borrow_mut().push(element);
        self.removal_states.borrow_mut().insert(
            element,
            RemovalState {
                namespace_id,
                set_for_removal: true,
                removal_context: context,
                set_for_move: false,
                has_animation,
                removed_before_queried: false,
                previous_triggers_values,
            },
        );
    }

    fn ns_remove_node(&self, ns: &Rc<Namespace>, element: NodeId, context: RemovalContext) {
        self.signal_removal_for_inner_triggers(ns, element, context.clone());

        // A transition to void (matched or fallback) owns the removal
        // choreography from here.
        if self.trigger_leave_animation(ns, element, context.clone(), true, true) {
            return;
        }

        let mut contains_potential_parent_transition = false;
        if self.total_animations.get() > 0 {
            let queried = if self.players.borrow().is_empty() {
                false
            } else {
                self.players_by_queried_element
                    .borrow()
                    .get(&element)
                    .map(|ps| !ps.is_empty())
                    .unwrap_or(false)
            };
            if queried {
                contains_potential_parent_transition = true;
            } else {
                let mut parent = self.driver.get_parent_element(element);
                while let Some(p) = parent {
                    if self.states_by_element.borrow().contains_key(&p) {
                        contains_potential_parent_transition = true;
                        break;
                    }
                    parent = self.driver.get_parent_element(p);
                }
            }
        }

        // Whatever happens next, listeners for this node must still fire when
        // it finally leaves.
        self.prepare_leave_animation_listeners(ns, element);

        if contains_potential_parent_transition {
            self.mark_element_as_removed(Some(ns.id), element, false, context, None);
        } else {
            let flagged = self
                .removal_states
                .borrow()
                .get(&element)
                .map(|r| r.set_for_removal)
                .unwrap_or(false);
            if !flagged {
                let weak = self.weak();
                let weak_ns = Rc::downgrade(ns);
                self.after_flush(move || {
                    if let (Some(ctx), Some(ns)) = (weak.upgrade(), weak_ns.upgrade()) {
                        ctx.clear_element_cache(Some(&ns), element);
                    }
                });
                self.destroy_inner_animations(element);
                self.fire_removal_complete(element, context);
            }
        }
    }

    fn trigger_leave_animation(
        &self,
        ns: &Rc<Namespace>,
        element: NodeId,
        context: RemovalContext,
        destroy_after_complete: bool,
        default_to_fallback: bool,
    ) -> bool {
        let trigger_states: Vec<(String, String)> = self
            .states_by_element
            .borrow()
            .get(&element)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.value.clone())).collect())
            .unwrap_or_default();
        if trigger_states.is_empty() {
            return false;
        }

        let mut previous_values = HashMap::new();
        let mut players: Vec<PlayerRc> = Vec::new();
        for (name, value) in trigger_states {
            previous_values.insert(name.clone(), value);
            if ns.has_trigger(&name) {
                if let Some(p) =
                    self.ns_trigger(ns, element, &name, TriggerValue::Void, default_to_fallback)
                {
                    players.push(p);
                }
            }
        }

        if players.is_empty() {
            return false;
        }
        self.mark_element_as_removed(Some(ns.id), element, true, context, Some(previous_values));
        if destroy_after_complete {
            let mut group = shared_group(&players);
            let weak = self.weak();
            let mut fired = false;
            group.on_done(Box::new(move || {
                if fired {
                    return;
                }
                fired = true;
                if let Some(ctx) = weak.upgrade() {
                    ctx.process_leave_node(element);
                }
            }));
        }
        true
    }

    fn signal_removal_for_inner_triggers(
        &self,
        ns: &Rc<Namespace>,
        root_element: NodeId,
        context: RemovalContext,
    ) {
        let elements = self.driver.query(root_element, TRIGGER_SELECTOR, true);
        for element in &elements {
            // An inner remove() already started a removal on this node.
            if self.removal_states.borrow().contains_key(element) {
                continue;
            }
            let namespaces = self.fetch_namespaces_by_element(*element);
            if namespaces.is_empty() {
                self.clear_element_cache(Some(ns), *element);
            } else {
                for inner_ns in namespaces {
                    self.trigger_leave_animation(&inner_ns, *element, context.clone(), false, true);
                }
            }
        }
        if !elements.is_empty() {
            let weak = self.weak();
            let weak_ns = Rc::downgrade(ns);
            self.after_flush_animations_done(move || {
                if let (Some(ctx), Some(ns)) = (weak.upgrade(), weak_ns.upgrade()) {
                    for element in elements {
                        ctx.clear_element_cache(Some(&ns), element);
                    }
                }
            });
        }
    }

    fn prepare_leave_animation_listeners(&self, ns: &Rc<Namespace>, element: NodeId) {
        let listener_names: Vec<String> = ns
            .listeners
            .borrow()
            .get(&element)
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default();
        let states = self.states_by_element.borrow().get(&element).cloned();
        let Some(states) = states else { return };

        let mut visited: HashSet<String> = HashSet::new();
        for name in listener_names {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(trigger) = ns.get_trigger(&name) else {
                continue;
            };
            let from_state = states.get(&name).cloned().unwrap_or_else(StateValue::void);
            let to_state = StateValue::void();
            let player = TransitionAnimationPlayer::new(ns.id, &name, element);
            self.total_queued_players
                .set(self.total_queued_players.get() + 1);
            ns.queue.borrow_mut().push(QueuedTransition {
                element,
                trigger_name: name,
                transition: trigger.fallback_transition.clone(),
                from_state,
                to_state,
                player,
                is_fallback: true,
            });
        }
    }

    fn fetch_namespaces_by_element(&self, element: NodeId) -> Vec<Rc<Namespace>> {
        let ids: Vec<NamespaceId> = self
            .states_by_element
            .borrow()
            .get(&element)
            .map(|m| m.values().filter_map(|s| s.namespace_id).collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.namespace(id))
            .collect()
    }

    fn clear_element_cache(&self, ns: Option<&Rc<Namespace>>, element: NodeId) {
        self.states_by_element.borrow_mut().remove(&element);
        if let Some(ns) = ns {
            ns.listeners.borrow_mut().remove(&element);
        }
        let players = self.players_by_element.borrow_mut().remove(&element);
        if let Some(players) = players {
            for p in players {
                p.destroy();
            }
        }
    }

    fn destroy_inner_animations(&self, container: NodeId) {
        let elements = self.driver.query(container, TRIGGER_SELECTOR, true);
        for element in elements {
            self.destroy_active_animations_for_element(element);
        }
        if self.players_by_queried_element.borrow().is_empty() {
            return;
        }
        let elements = self.driver.query(container, ANIMATING_SELECTOR, true);
        for element in elements {
            self.finish_active_queried_animation_on_element(element);
        }
    }

    fn destroy_active_animations_for_element(&self, element: NodeId) {
        let players: Vec<PlayerRc> = self
            .players_by_element
            .borrow()
            .get(&element)
            .cloned()
            .unwrap_or_default();
        for p in players {
            if p.queued() {
                // Destruction is delayed until the flush so listeners
                // attached to the queued player still fire.
                p.mark_for_destroy.set(true);
            } else {
                p.destroy();
            }
        }
    }

    fn finish_active_queried_animation_on_element(&self, element: NodeId) {
        let players: Vec<PlayerRc> = self
            .players_by_queried_element
            .borrow()
            .get(&element)
            .cloned()
            .unwrap_or_default();
        for p in players {
            p.finish();
        }
    }

    fn process_leave_node(&self, element: NodeId) {
        let removal = {
            let mut states = self.removal_states.borrow_mut();
            match states.get_mut(&element) {
                Some(state) if state.set_for_removal => {
                    let taken = state.clone();
                    *state = RemovalState::default();
                    Some(taken)
                }
                _ => None,
            }
        };
        if let Some(state) = removal {
            if let Some(ns_id) = state.namespace_id {
                self.destroy_inner_animations(element);
                if let Some(ns) = self.namespace(ns_id) {
                    self.clear_element_cache(Some(&ns), element);
                }
            }
            self.fire_removal_complete(element, state.removal_context);
        }

        if self.disabled_nodes.borrow().contains(&element) {
            self.mark_element_as_disabled(element, false);
        }
        for node in self.driver.query(element, DISABLED_SELECTOR, true) {
            self.mark_element_as_disabled(node, false);
        }
    }

    fn element_contains_data(&self, namespace_id: NamespaceId, element: NodeId) -> bool {
        if self
            .removal_states
            .borrow()
            .get(&element)
            .map(|r| r.set_for_removal)
            .unwrap_or(false)
        {
            return true;
        }
        if self.players_by_element.borrow().contains_key(&element) {
            return true;
        }
        if self.players_by_queried_element.borrow().contains_key(&element) {
            return true;
        }
        self.namespace(namespace_id)
            .map(|ns| ns.element_contains_data(element))
            .unwrap_or(false)
    }

    // ---------------------------------------------------------------- flush

    fn flush(&self, tick: i64) {
        let mut played_roots: Vec<PlayerRc> = Vec::new();

        let new_hosts: Vec<(NodeId, NamespaceId)> =
            self.new_host_elements.borrow_mut().drain(..).collect();
        for (host, id) in new_hosts {
            if let Some(ns) = self.namespace(id) {
                self.balance_namespace_list(&ns, host);
            }
        }

        if self.total_animations.get() > 0 {
            let entered: Vec<NodeId> = self.collected_enter_elements.borrow().clone();
            for element in entered {
                self.driver.add_marker(element, STAR_MARKER);
            }
        }

        let has_queue_work = self.total_queued_players.get() > 0
            || !self.collected_leave_elements.borrow().is_empty();
        if !self.namespace_list.borrow().is_empty() && has_queue_work {
            let mut cleanup_fns: Vec<Box<dyn FnOnce()>> = Vec::new();
            played_roots = self.flush_animations(&mut cleanup_fns, tick);
            for f in cleanup_fns {
                f();
            }
        } else {
            let leave: Vec<NodeId> = self.collected_leave_elements.borrow_mut().drain(..).collect();
            for element in leave {
                self.process_leave_node(element);
            }
        }

        self.total_queued_players.set(0);
        self.collected_enter_elements.borrow_mut().clear();
        self.collected_leave_elements.borrow_mut().clear();

        let flush_fns: Vec<Box<dyn FnOnce()>> = self.flush_fns.borrow_mut().drain(..).collect();
        for f in flush_fns {
            f();
        }

        let quiet: Vec<Box<dyn FnOnce()>> = self.when_quiet_fns.borrow_mut().drain(..).collect();
        if !quiet.is_empty() {
            if played_roots.is_empty() {
                for f in quiet {
                    f();
                }
            } else {
                let mut group = shared_group(&played_roots);
                let mut quiet = Some(quiet);
                group.on_done(Box::new(move || {
                    if let Some(fns) = quiet.take() {
                        for f in fns {
                            f();
                        }
                    }
                }));
            }
        }

        // No-op auto-completion and deferred lifecycle work run once the
        // synchronous part of the flush has unwound.
        self.microtasks.drain();
    }

    fn next_marker(&self, base: &str) -> String {
        let n = self.marker_seq.get();
        self.marker_seq.set(n + 1);
        format!("{base}{n}")
    }

    fn build_root_map(&self, roots: &[NodeId], nodes: &[NodeId]) -> IndexMap<NodeId, Vec<NodeId>> {
        let mut root_map: IndexMap<NodeId, Vec<NodeId>> =
            roots.iter().map(|r| (*r, Vec::new())).collect();
        if nodes.is_empty() {
            return root_map;
        }
        let node_set: HashSet<NodeId> = nodes.iter().copied().collect();
        let mut memo: HashMap<NodeId, Option<NodeId>> = HashMap::new();

        for &node in nodes {
            let mut chain: Vec<NodeId> = Vec::new();
            let mut cursor = node;
            let root: Option<NodeId> = loop {
                let Some(parent) = self.driver.get_parent_element(cursor) else {
                    break None;
                };
                if let Some(found) = memo.get(&parent) {
                    break *found;
                }
                if root_map.contains_key(&parent) {
                    break Some(parent);
                }
                if node_set.contains(&parent) {
                    // Covered by the parent's own entry.
                    break None;
                }
                chain.push(parent);
                cursor = parent;
            };
            for c in chain {
                memo.insert(c, root);
            }
            memo.insert(node, root);
            if let Some(r) = root {
                root_map.get_mut(&r).expect("root key exists").push(node);
            }
        }
        root_map
    }

    fn drain_queued_transitions(&self, ns: &Rc<Namespace>, tick: i64) -> Vec<QueuedTransition> {
        let drained: Vec<QueuedTransition> = ns.queue.borrow_mut().drain(..).collect();
        let mut instructions: Vec<QueuedTransition> = Vec::new();
        for entry in drained {
            if entry.player.destroyed() {
                continue;
            }
            let listeners: Vec<Rc<ListenerEntry>> = ns
                .listeners
                .borrow()
                .get(&entry.element)
                .cloned()
                .unwrap_or_default();
            for listener in listeners {
                if listener.name == entry.trigger_name {
                    let event = make_event(
                        entry.element,
                        &entry.trigger_name,
                        &entry.from_state.value,
                        &entry.to_state.value,
                        tick,
                    );
                    listen_on_player(&entry.player, listener.phase, event, listener.callback.clone());
                }
            }
            if entry.player.mark_for_destroy.get() {
                let p = entry.player.clone();
                self.after_flush(move || p.destroy());
            } else {
                instructions.push(entry);
            }
        }

        // Zero-dependency transitions first; among the rest, containers sort
        // after their contents so children are built before parents consume
        // them.
        instructions.sort_by(|a, b| {
            let d0 = a.transition.ast.dep_count;
            let d1 = b.transition.ast.dep_count;
            if d0 == 0 || d1 == 0 {
                d0.cmp(&d1)
            } else if self.driver.contains_element(a.element, b.element) {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        });
        instructions
    }

    fn get_previous_players(
        &self,
        element: NodeId,
        is_queried_element: bool,
        namespace_id: Option<NamespaceId>,
        trigger_name: Option<&str>,
        to_state: Option<&str>,
    ) -> Vec<PlayerRc> {
        let mut players: Vec<PlayerRc> = if is_queried_element {
            self.players_by_queried_element
                .borrow()
                .get(&element)
                .cloned()
                .unwrap_or_default()
        } else {
            let is_removal = to_state.map(|s| s == VOID_STATE).unwrap_or(true);
            self.players_by_element
                .borrow()
                .get(&element)
                .map(|ps| {
                    ps.iter()
                        .filter(|p| {
                            if p.queued() {
                                return false;
                            }
                            if !is_removal && Some(p.trigger_name.as_str()) != trigger_name {
                                return false;
                            }
                            true
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        if namespace_id.is_some() || trigger_name.is_some() {
            players.retain(|p| {
                if let Some(ns) = namespace_id {
                    if ns != p.namespace_id {
                        return false;
                    }
                }
                if let Some(name) = trigger_name {
                    if name != p.trigger_name {
                        return false;
                    }
                }
                true
            });
        }
        players
    }

    fn before_animation_build(
        &self,
        namespace_id: NamespaceId,
        instruction: &TransitionInstruction,
        previous_players_map: &mut HashMap<NodeId, Vec<PlayerRc>>,
    ) {
        // A removal collects and cancels every previous player on the node,
        // even ones owned by other namespaces/triggers.
        let target_ns = (!instruction.is_removal_transition).then_some(namespace_id);
        let target_trigger =
            (!instruction.is_removal_transition).then_some(instruction.trigger_name.as_str());

        for tl in &instruction.timelines {
            let element = tl.element;
            let is_queried = element != instruction.element;
            let previous = self.get_previous_players(
                element,
                is_queried,
                target_ns,
                target_trigger,
                Some(instruction.to_state.as_str()),
            );
            for p in previous {
                p.before_destroy();
                p.destroy();
                previous_players_map.entry(element).or_default().push(p);
            }
        }
        // Keeps PRE/POST style computation from reading mid-animation values.
        self.driver
            .erase_styles(instruction.element, &instruction.from_styles);
    }

    fn cloak_and_compute_styles(
        &self,
        values_map: &mut HashMap<NodeId, StyleMap>,
        elements_to_cloak: &HashSet<NodeId>,
        props_map: &HashMap<NodeId, HashSet<String>>,
        default_style: &str,
    ) -> Vec<NodeId> {
        let cloak = style_map([("display", StyleValue::Text("none".into()))]);
        for e in elements_to_cloak {
            self.driver.apply_styles(*e, &cloak);
        }
        let mut failed: Vec<NodeId> = Vec::new();
        for (element, props) in props_map {
            let mut styles = StyleMap::new();
            for prop in props {
                let value = self.driver.compute_style(*element, prop, default_style);
                if value.is_empty() {
                    // The node likely left the tree mid-flight; degraded, not
                    // fatal.
                    log::warn!("computed style for {prop} unresolvable on removed node {element}");
                    self.removal_states.borrow_mut().insert(
                        *element,
                        RemovalState {
                            removed_before_queried: true,
                            ..Default::default()
                        },
                    );
                    if !failed.contains(element) {
                        failed.push(*element);
                    }
                }
                styles.insert(prop.clone(), StyleValue::Text(value));
            }
            values_map.insert(*element, styles);
        }
        for e in elements_to_cloak {
            self.driver.erase_styles(*e, &cloak);
        }
        failed
    }

    fn build_animation(
        &self,
        namespace_id: NamespaceId,
        instruction: &TransitionInstruction,
        previous_players_map: &HashMap<NodeId, Vec<PlayerRc>>,
        skipped_players_map: &mut HashMap<NodeId, Vec<RcPlayer>>,
        pre_styles_map: &HashMap<NodeId, StyleMap>,
        post_styles_map: &HashMap<NodeId, StyleMap>,
    ) -> RcPlayer {
        let root_element = instruction.element;
        let mut queried_players: Vec<PlayerRc> = Vec::new();
        let mut consumed: Vec<NodeId> = Vec::new();
        let mut sub_elements: Vec<NodeId> = Vec::new();
        let mut new_players: Vec<Box<dyn AnimationPlayer>> = Vec::new();

        for tl in &instruction.timelines {
            let element = tl.element;
            if !consumed.contains(&element) {
                consumed.push(element);
            }

            let removed_before_queried = self
                .removal_states
                .borrow()
                .get(&element)
                .map(|r| r.removed_before_queried)
                .unwrap_or(false);
            if removed_before_queried {
                new_players.push(Box::new(NoopAnimationPlayer::deferred(
                    tl.duration,
                    tl.delay,
                    self.microtasks.clone(),
                )));
                continue;
            }

            let previous: Vec<PlayerRc> = previous_players_map
                .get(&element)
                .map(|ps| ps.iter().filter(|p| p.element == element).cloned().collect())
                .unwrap_or_default();

            let keyframes = normalize_keyframes(
                &tl.keyframes,
                pre_styles_map.get(&element),
                post_styles_map.get(&element),
            );

            let player: Box<dyn AnimationPlayer> = if tl.duration > 0.0 {
                self.driver.animate(
                    element,
                    &keyframes,
                    tl.duration,
                    tl.delay,
                    tl.easing.as_deref(),
                    previous,
                )
            } else {
                // An empty step only places styles; nothing to render.
                Box::new(NoopAnimationPlayer::deferred(
                    0.0,
                    tl.delay,
                    self.microtasks.clone(),
                ))
            };

            if tl.is_sub_timeline && !sub_elements.contains(&element) {
                sub_elements.push(element);
            }

            if element != root_element {
                let shared = RcPlayer::new(player);
                let wrapper =
                    TransitionAnimationPlayer::new(namespace_id, &instruction.trigger_name, element);
                wrapper.set_real_player(Box::new(shared.clone()));
                queried_players.push(wrapper);
                new_players.push(Box::new(shared));
            } else {
                new_players.push(player);
            }
        }

        for qp in &queried_players {
            self.players_by_queried_element
                .borrow_mut()
                .entry(qp.element)
                .or_default()
                .push(qp.clone());
            let weak = self.weak();
            let weak_player = Rc::downgrade(qp);
            qp.on_done(Box::new(move || {
                let (Some(ctx), Some(player)) = (weak.upgrade(), weak_player.upgrade()) else {
                    return;
                };
                let mut map = ctx.players_by_queried_element.borrow_mut();
                if let Some(list) = map.get_mut(&player.element) {
                    list.retain(|p| !Rc::ptr_eq(p, &player));
                    if list.is_empty() {
                        map.remove(&player.element);
                    }
                }
            }));
        }

        for e in &consumed {
            self.driver.add_marker(*e, ANIMATING_MARKER);
        }

        let group = RcPlayer::new(optimize_group_player(new_players));
        let driver = self.driver.clone();
        let to_styles = instruction.to_styles.clone();
        let consumed_for_destroy = consumed.clone();
        group.register(
            PlayerPhase::Destroy,
            Box::new(move || {
                for e in &consumed_for_destroy {
                    driver.remove_marker(*e, ANIMATING_MARKER);
                }
                driver.apply_styles(root_element, &to_styles);
            }),
        );

        // Sub-trigger callbacks hang off the player that owns the subtree.
        for e in sub_elements {
            skipped_players_map.entry(e).or_default().push(group.clone());
        }
        group
    }

    fn flush_animations(&self, cleanup_fns: &mut Vec<Box<dyn FnOnce()>>, tick: i64) -> Vec<PlayerRc> {
        let mut sub_timelines = ElementInstructionMap::new();
        // (player, parent player that owns its subtree, if any)
        let mut skipped_players: Vec<(PlayerRc, Option<Box<dyn AnimationPlayer>>)> = Vec::new();
        let mut fallback_players: Vec<PlayerRc> = Vec::new();
        let mut queued_instructions: Vec<(TransitionInstruction, PlayerRc)> = Vec::new();
        let mut queried_elements_map: HashMap<NodeId, Vec<PlayerRc>> = HashMap::new();
        let mut all_pre_style_elements: HashMap<NodeId, HashSet<String>> = HashMap::new();
        let mut all_post_style_elements: HashMap<NodeId, HashSet<String>> = HashMap::new();

        // Disabled nodes cover their queued descendants too.
        let mut disabled_elements: HashSet<NodeId> = HashSet::new();
        for node in self.disabled_nodes.borrow().iter() {
            disabled_elements.insert(*node);
            for child in self.driver.query(*node, QUEUED_SELECTOR, true) {
                disabled_elements.insert(child);
            }
        }

        let all_trigger_elements: Vec<NodeId> =
            self.states_by_element.borrow().keys().copied().collect();
        let enter_nodes: Vec<NodeId> = self.collected_enter_elements.borrow().clone();
        let enter_node_map = self.build_root_map(&all_trigger_elements, &enter_nodes);
        let mut enter_map_ids: HashMap<NodeId, String> = HashMap::new();
        for (root, nodes) in &enter_node_map {
            let marker = self.next_marker(ENTER_MARKER);
            enter_map_ids.insert(*root, marker.clone());
            for node in nodes {
                self.driver.add_marker(*node, &marker);
            }
        }

        let collected_leave: Vec<NodeId> = self.collected_leave_elements.borrow().clone();
        let all_leave_nodes = Rc::new(RefCell::new(Vec::<NodeId>::new()));
        let mut merged_leave_nodes: Vec<NodeId> = Vec::new();
        let mut leave_nodes_without_animations: HashSet<NodeId> = HashSet::new();
        for element in collected_leave {
            let Some(state) = self.removal_states.borrow().get(&element).cloned() else {
                continue;
            };
            if !state.set_for_removal {
                continue;
            }
            all_leave_nodes.borrow_mut().push(element);
            if !merged_leave_nodes.contains(&element) {
                merged_leave_nodes.push(element);
            }
            if state.has_animation {
                for inner in self.driver.query(element, &format!(".{STAR_MARKER}"), true) {
                    if !merged_leave_nodes.contains(&inner) {
                        merged_leave_nodes.push(inner);
                    }
                }
            } else {
                leave_nodes_without_animations.insert(element);
            }
        }

        let leave_node_map = self.build_root_map(&all_trigger_elements, &merged_leave_nodes);
        let mut leave_map_ids: HashMap<NodeId, String> = HashMap::new();
        for (root, nodes) in &leave_node_map {
            let marker = self.next_marker(LEAVE_MARKER);
            leave_map_ids.insert(*root, marker.clone());
            for node in nodes {
                self.driver.add_marker(*node, &marker);
            }
        }

        {
            let driver = self.driver.clone();
            let enter_pairs: Vec<(NodeId, String)> = enter_node_map
                .iter()
                .flat_map(|(root, nodes)| {
                    let marker = enter_map_ids[root].clone();
                    nodes.iter().map(move |n| (*n, marker.clone()))
                })
                .collect();
            let leave_pairs: Vec<(NodeId, String)> = leave_node_map
                .iter()
                .flat_map(|(root, nodes)| {
                    let marker = leave_map_ids[root].clone();
                    nodes.iter().map(move |n| (*n, marker.clone()))
                })
                .collect();
            let weak = self.weak();
            let leftovers = all_leave_nodes.clone();
            cleanup_fns.push(Box::new(move || {
                for (node, marker) in enter_pairs {
                    driver.remove_marker(node, &marker);
                }
                for (node, marker) in leave_pairs {
                    driver.remove_marker(node, &marker);
                }
                if let Some(ctx) = weak.upgrade() {
                    for node in leftovers.borrow_mut().drain(..) {
                        ctx.process_leave_node(node);
                    }
                }
            }));
        }

        let mut all_players: Vec<PlayerRc> = Vec::new();
        let mut erroneous: Vec<TransitionFailure> = Vec::new();

        let namespaces: Vec<Rc<Namespace>> = self.namespace_list.borrow().clone();
        for ns in namespaces.iter().rev() {
            for entry in self.drain_queued_transitions(ns, tick) {
                let player = entry.player.clone();
                all_players.push(player.clone());
                let element = entry.element;

                // Orphaned nodes cannot be animated.
                if let Some(root) = self.root {
                    if !self.driver.contains_element(root, element) {
                        player.destroy();
                        continue;
                    }
                }

                let enter_marker = enter_map_ids
                    .get(&element)
                    .cloned()
                    .unwrap_or_else(|| ENTER_MARKER.to_string());
                let leave_marker = leave_map_ids
                    .get(&element)
                    .cloned()
                    .unwrap_or_else(|| LEAVE_MARKER.to_string());
                let mut instruction = entry.transition.build(
                    &*self.driver,
                    element,
                    &entry.from_state.value,
                    &entry.to_state.value,
                    &enter_marker,
                    &leave_marker,
                    &entry.from_state.options,
                    &entry.to_state.options,
                    Some(&sub_timelines),
                    false,
                );
                if !instruction.errors.is_empty() {
                    erroneous.push(TransitionFailure {
                        trigger_name: instruction.trigger_name.clone(),
                        errors: instruction.errors.clone(),
                    });
                    continue;
                }

                // An unmatched transition should not render an animation nor
                // cancel in-flight ones; it only manages styles.
                if entry.is_fallback {
                    let driver = self.driver.clone();
                    let from_styles = instruction.from_styles.clone();
                    player.on_start(Box::new(move || {
                        driver.erase_styles(element, &from_styles);
                    }));
                    let driver = self.driver.clone();
                    let to_styles = instruction.to_styles.clone();
                    player.on_destroy(Box::new(move || {
                        driver.apply_styles(element, &to_styles);
                    }));
                    fallback_players.push(player.clone());
                    skipped_players.push((player, None));
                    continue;
                }

                // Sub-triggers stretch their first keyframe across the delay
                // window instead of delaying playback.
                let mut timelines = Vec::new();
                for mut tl in instruction.timelines.drain(..) {
                    tl.stretch_starting_keyframe = true;
                    if !self.disabled_nodes.borrow().contains(&tl.element) {
                        timelines.push(tl);
                    }
                }
                instruction.timelines = timelines;
                sub_timelines.append(element, instruction.timelines.clone());

                for queried in &instruction.queried_elements {
                    queried_elements_map
                        .entry(*queried)
                        .or_default()
                        .push(player.clone());
                }
                for (elm, props) in &instruction.pre_style_props {
                    if !props.is_empty() {
                        all_pre_style_elements
                            .entry(*elm)
                            .or_default()
                            .extend(props.iter().cloned());
                    }
                }
                for (elm, props) in &instruction.post_style_props {
                    all_post_style_elements
                        .entry(*elm)
                        .or_default()
                        .extend(props.iter().cloned());
                }
                queued_instructions.push((instruction, player));
            }
        }

        if !erroneous.is_empty() {
            for p in &all_players {
                p.destroy();
            }
            self.report_error(EngineError::TransitionFailures(erroneous));
            return Vec::new();
        }

        // Map every animated element (and, lazily, its ancestors) to the
        // element whose animation owns it.
        let mut animation_element_map: HashMap<NodeId, Option<NodeId>> = HashMap::new();
        let mut previous_players_map: HashMap<NodeId, Vec<PlayerRc>> = HashMap::new();
        for (instruction, player) in &queued_instructions {
            if sub_timelines.has(instruction.element) {
                animation_element_map.insert(instruction.element, Some(instruction.element));
                self.before_animation_build(player.namespace_id, instruction, &mut previous_players_map);
            }
        }
        for player in &fallback_players {
            let previous = self.get_previous_players(
                player.element,
                false,
                Some(player.namespace_id),
                Some(player.trigger_name.as_str()),
                None,
            );
            for p in previous {
                p.destroy();
                previous_players_map
                    .entry(player.element)
                    .or_default()
                    .push(p);
            }
        }

        // Nodes leaving the tree must see identical `*` and `!` styles, since
        // their destination no longer exists to measure.
        let mut replace_nodes: Vec<NodeId> = Vec::new();
        for node in all_leave_nodes.borrow().iter() {
            if replace_post_styles_as_pre(*node, &mut all_pre_style_elements, &mut all_post_style_elements)
            {
                replace_nodes.push(*node);
            }
        }

        let mut post_styles_map: HashMap<NodeId, StyleMap> = HashMap::new();
        let failed = self.cloak_and_compute_styles(
            &mut post_styles_map,
            &leave_nodes_without_animations,
            &all_post_style_elements,
            AUTO_STYLE,
        );
        for node in failed {
            if replace_post_styles_as_pre(node, &mut all_pre_style_elements, &mut all_post_style_elements)
            {
                replace_nodes.push(node);
            }
        }

        let mut pre_styles_map: HashMap<NodeId, StyleMap> = HashMap::new();
        let enter_cloak: HashSet<NodeId> = enter_node_map
            .values()
            .flat_map(|nodes| nodes.iter().copied())
            .collect();
        self.cloak_and_compute_styles(
            &mut pre_styles_map,
            &enter_cloak,
            &all_pre_style_elements,
            PRE_STYLE,
        );

        for node in replace_nodes {
            let pre = pre_styles_map.get(&node).cloned().unwrap_or_default();
            let mut merged = post_styles_map.remove(&node).unwrap_or_default();
            for (prop, value) in pre {
                merged.insert(prop, value);
            }
            post_styles_map.insert(node, merged);
        }

        let mut root_players: Vec<PlayerRc> = Vec::new();
        let mut sub_players: Vec<PlayerRc> = Vec::new();
        let mut skipped_players_map: HashMap<NodeId, Vec<RcPlayer>> = HashMap::new();

        for (instruction, player) in &queued_instructions {
            let element = instruction.element;
            if sub_timelines.has(element) {
                if disabled_elements.contains(&element) {
                    let driver = self.driver.clone();
                    let to_styles = instruction.to_styles.clone();
                    player.on_destroy(Box::new(move || {
                        driver.apply_styles(element, &to_styles);
                    }));
                    player.disabled.set(true);
                    player.override_total_time(instruction.total_time);
                    skipped_players.push((player.clone(), None));
                    continue;
                }

                // Walk up to find a parent animation that consumes this node;
                // fill in the gaps for later walks.
                let mut parent_with_animation: Option<NodeId> = None;
                if animation_element_map.len() > 1 {
                    let mut cursor = element;
                    let mut parents_to_add: Vec<NodeId> = Vec::new();
                    while let Some(parent) = self.driver.get_parent_element(cursor) {
                        if let Some(detected) = animation_element_map.get(&parent) {
                            parent_with_animation = *detected;
                            break;
                        }
                        parents_to_add.push(parent);
                        cursor = parent;
                    }
                    for p in parents_to_add {
                        animation_element_map.insert(p, parent_with_animation);
                    }
                }

                let inner_player = self.build_animation(
                    player.namespace_id,
                    instruction,
                    &previous_players_map,
                    &mut skipped_players_map,
                    &pre_styles_map,
                    &post_styles_map,
                );
                player.set_real_player(Box::new(inner_player));

                match parent_with_animation {
                    None => root_players.push(player.clone()),
                    Some(parent_element) => {
                        let parent_players: Vec<PlayerRc> = self
                            .players_by_element
                            .borrow()
                            .get(&parent_element)
                            .cloned()
                            .unwrap_or_default();
                        let parent = (!parent_players.is_empty())
                            .then(|| shared_group(&parent_players));
                        skipped_players.push((player.clone(), parent));
                    }
                }
            } else {
                self.driver.erase_styles(element, &instruction.from_styles);
                let driver = self.driver.clone();
                let to_styles = instruction.to_styles.clone();
                player.on_destroy(Box::new(move || {
                    driver.apply_styles(element, &to_styles);
                }));
                // An ancestor may still be animating this node, so it stays a
                // sub player even while disabled.
                sub_players.push(player.clone());
                if disabled_elements.contains(&element) {
                    skipped_players.push((player.clone(), None));
                }
            }
        }

        // Consumed nodes: callback wiring only, playback owned by the
        // consuming ancestor.
        for player in &sub_players {
            if let Some(players_within) = skipped_players_map.get(&player.element) {
                if !players_within.is_empty() {
                    let inner = optimize_group_player(
                        players_within
                            .iter()
                            .map(|p| Box::new(p.clone()) as Box<dyn AnimationPlayer>)
                            .collect(),
                    );
                    player.set_real_player(inner);
                }
            }
        }

        for (player, parent) in skipped_players {
            match parent {
                Some(mut parent) => sync_player_events(&player, &mut parent, &self.microtasks),
                None => player.destroy(),
            }
        }

        // Queued removals not picked up by any query are processed now;
        // queried ones wait for their consuming players.
        let leave_nodes: Vec<NodeId> = all_leave_nodes.borrow().clone();
        for element in &leave_nodes {
            let has_animation = self
                .removal_states
                .borrow()
                .get(element)
                .map(|r| r.has_animation)
                .unwrap_or(false);
            if has_animation {
                continue;
            }
            let mut players: Vec<PlayerRc> = Vec::new();
            if !queried_elements_map.is_empty() {
                if let Some(qs) = queried_elements_map.get(element) {
                    players.extend(qs.iter().cloned());
                }
                for inner in self.driver.query(*element, ANIMATING_SELECTOR, true) {
                    if let Some(qs) = queried_elements_map.get(&inner) {
                        players.extend(qs.iter().cloned());
                    }
                }
            }
            let active: Vec<PlayerRc> = players.into_iter().filter(|p| !p.destroyed()).collect();
            if active.is_empty() {
                self.process_leave_node(*element);
            } else {
                let weak = self.weak();
                let element = *element;
                self.after_flush_animations_done(move || {
                    let Some(ctx) = weak.upgrade() else { return };
                    let mut group = shared_group(&active);
                    let weak = ctx.weak();
                    let mut fired = false;
                    group.on_done(Box::new(move || {
                        if fired {
                            return;
                        }
                        fired = true;
                        if let Some(ctx) = weak.upgrade() {
                            ctx.process_leave_node(element);
                        }
                    }));
                });
            }
        }
        all_leave_nodes.borrow_mut().clear();

        log::debug!(
            "flush {tick}: {} root players, {} sub players, {} queued instructions",
            root_players.len(),
            sub_players.len(),
            queued_instructions.len()
        );

        for player in &root_players {
            self.players.borrow_mut().push(player.clone());
            let weak = self.weak();
            let weak_player = Rc::downgrade(player);
            player.on_done(Box::new(move || {
                let Some(player) = weak_player.upgrade() else {
                    return;
                };
                player.destroy();
                if let Some(ctx) = weak.upgrade() {
                    ctx.players
                        .borrow_mut()
                        .retain(|p| !Rc::ptr_eq(p, &player));
                }
            }));
            player.play();
        }

        root_players
    }
}

fn replace_post_styles_as_pre(
    element: NodeId,
    all_pre_style_elements: &mut HashMap<NodeId, HashSet<String>>,
    all_post_style_elements: &mut HashMap<NodeId, HashSet<String>>,
) -> bool {
    let Some(post) = all_post_style_elements.remove(&element) else {
        return false;
    };
    all_pre_style_elements
        .entry(element)
        .or_default()
        .extend(post);
    true
}

fn normalize_keyframes(
    keyframes: &[Keyframe],
    pre_styles: Option<&StyleMap>,
    post_styles: Option<&StyleMap>,
) -> Vec<Keyframe> {
    keyframes
        .iter()
        .map(|kf| {
            let mut out = kf.clone();
            for (prop, value) in out.styles.iter_mut() {
                if value.is_pre() {
                    if let Some(v) = pre_styles.and_then(|m| m.get(prop)) {
                        *value = v.clone();
                    } else {
                        *value = StyleValue::Text(AUTO_STYLE.into());
                    }
                } else if value.is_auto() {
                    if let Some(v) = post_styles.and_then(|m| m.get(prop)) {
                        *value = v.clone();
                    }
                }
            }
            out
        })
        .collect()
}
