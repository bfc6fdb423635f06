//! Test fixtures for the Motive animation crates: an in-memory host tree with
//! a recording mock driver, finishable mock players, and builders for
//! validated animation trees (the counts a real validator would compute are
//! derived here by walking the tree).

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};

use motive_api_core::ast::{
    AnimateAst, AnimationNode, AnimationOptions, GroupAst, KeyframesAst, QueryAst, SequenceAst,
    StaggerAst, StateAst, StateMatch, StyleAst, StyleTuple, Timing, TimingAst, TransitionAst,
    TransitionMatcher, TriggerAst,
};
use motive_api_core::events::PlayerPhase;
use motive_api_core::json::parse_animation_json;
use motive_api_core::player::{AnimationPlayer, PlayerCallback};
use motive_api_core::style::{style_map, StyleMap, StyleValue};
use motive_animation_core::driver::AnimationDriver;
use motive_animation_core::ids::NodeId;
use motive_animation_core::instruction::Keyframe;
use motive_animation_core::timing::parse_timing_expr;
use motive_animation_core::transition_player::PlayerRc;

// ---------------------------------------------------------------- mock host

#[derive(Default)]
struct NodeData {
    parent: Option<u64>,
    tag: String,
    markers: Vec<String>,
    styles: StyleMap,
    children: Vec<u64>,
}

#[derive(Default)]
struct HostInner {
    next_id: u64,
    nodes: hashbrown::HashMap<u64, NodeData>,
    order: Vec<u64>,
}

/// An in-memory node tree standing in for the real rendering surface.
#[derive(Clone, Default)]
pub struct MockHost {
    inner: Rc<RefCell<HostInner>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, parent: Option<NodeId>, tag: &str, classes: &[&str]) -> NodeId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.nodes.insert(
            id,
            NodeData {
                parent: parent.map(|p| p.0),
                tag: tag.to_string(),
                markers: classes.iter().map(|c| c.to_string()).collect(),
                styles: StyleMap::new(),
                children: Vec::new(),
            },
        );
        inner.order.push(id);
        if let Some(p) = parent {
            if let Some(parent_node) = inner.nodes.get_mut(&p.0) {
                parent_node.children.push(id);
            }
        }
        NodeId(id)
    }

    pub fn set_style(&self, node: NodeId, prop: &str, value: &str) {
        if let Some(data) = self.inner.borrow_mut().nodes.get_mut(&node.0) {
            data.styles
                .insert(prop.to_string(), StyleValue::Text(value.to_string()));
        }
    }

    pub fn detach(&self, node: NodeId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(data) = inner.nodes.get_mut(&node.0) {
            let parent = data.parent.take();
            if let Some(p) = parent {
                if let Some(parent_node) = inner.nodes.get_mut(&p) {
                    parent_node.children.retain(|c| *c != node.0);
                }
            }
        }
    }

    pub fn has_marker(&self, node: NodeId, marker: &str) -> bool {
        self.inner
            .borrow()
            .nodes
            .get(&node.0)
            .map(|d| d.markers.iter().any(|m| m == marker))
            .unwrap_or(false)
    }

    pub fn style_of(&self, node: NodeId, prop: &str) -> Option<StyleValue> {
        self.inner
            .borrow()
            .nodes
            .get(&node.0)
            .and_then(|d| d.styles.get(prop).cloned())
    }

    fn is_ancestor(&self, ancestor: u64, node: u64) -> bool {
        let inner = self.inner.borrow();
        let mut cursor = inner.nodes.get(&node).and_then(|d| d.parent);
        while let Some(p) = cursor {
            if p == ancestor {
                return true;
            }
            cursor = inner.nodes.get(&p).and_then(|d| d.parent);
        }
        false
    }

    fn matches_compound(&self, node: u64, compound: &str) -> bool {
        if compound == "*" {
            return true;
        }
        let inner = self.inner.borrow();
        let Some(data) = inner.nodes.get(&node) else {
            return false;
        };
        let mut rest = compound;
        if !rest.starts_with('.') {
            let end = rest.find('.').unwrap_or(rest.len());
            let tag = &rest[..end];
            if !tag.is_empty() && tag != data.tag {
                return false;
            }
            rest = &rest[end..];
        }
        for class in rest.split('.').filter(|c| !c.is_empty()) {
            if !data.markers.iter().any(|m| m == class) {
                return false;
            }
        }
        true
    }

    /// Match `selector` (whitespace-combined compounds of `tag.class...`)
    /// against the descendants of `root`, in insertion order.
    fn query(&self, root: u64, selector: &str, multi: bool) -> Vec<NodeId> {
        let compounds: Vec<&str> = selector.split_whitespace().collect();
        if compounds.is_empty() {
            return Vec::new();
        }
        let order = self.inner.borrow().order.clone();
        let mut out = Vec::new();
        'nodes: for id in order {
            if id == root || !self.is_ancestor(root, id) {
                continue;
            }
            if !self.matches_compound(id, compounds[compounds.len() - 1]) {
                continue;
            }
            // Remaining compounds must match some ancestor chain inside root.
            let mut cursor = self.inner.borrow().nodes.get(&id).and_then(|d| d.parent);
            let mut idx = compounds.len() - 1;
            while idx > 0 {
                let Some(p) = cursor else { continue 'nodes };
                if p == root {
                    continue 'nodes;
                }
                if self.matches_compound(p, compounds[idx - 1]) {
                    idx -= 1;
                }
                cursor = self.inner.borrow().nodes.get(&p).and_then(|d| d.parent);
            }
            out.push(NodeId(id));
            if !multi {
                break;
            }
        }
        out
    }
}

// -------------------------------------------------------------- mock player

#[derive(Default)]
struct MockPlayerState {
    on_start: Vec<PlayerCallback>,
    on_done: Vec<PlayerCallback>,
    on_destroy: Vec<PlayerCallback>,
    started: bool,
    finished: bool,
    destroyed: bool,
    position: f32,
}

/// A driver player that only completes when a test finishes it.
#[derive(Clone)]
pub struct MockPlayer {
    pub element: NodeId,
    state: Rc<RefCell<MockPlayerState>>,
    total_time: f32,
    log: Rc<RefCell<Vec<String>>>,
}

impl MockPlayer {
    fn new(element: NodeId, duration: f32, delay: f32) -> Self {
        Self {
            element,
            state: Rc::new(RefCell::new(MockPlayerState::default())),
            total_time: duration + delay,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn fire(&self, phase: PlayerPhase) {
        let mut callbacks = {
            let mut s = self.state.borrow_mut();
            match phase {
                PlayerPhase::Start => mem::take(&mut s.on_start),
                PlayerPhase::Done => mem::take(&mut s.on_done),
                PlayerPhase::Destroy => mem::take(&mut s.on_destroy),
            }
        };
        for cb in callbacks.iter_mut() {
            cb();
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn has_finished(&self) -> bool {
        self.state.borrow().finished
    }

    pub fn was_destroyed(&self) -> bool {
        self.state.borrow().destroyed
    }
}

impl AnimationPlayer for MockPlayer {
    fn on_start(&mut self, f: PlayerCallback) {
        self.state.borrow_mut().on_start.push(f);
    }

    fn on_done(&mut self, f: PlayerCallback) {
        self.state.borrow_mut().on_done.push(f);
    }

    fn on_destroy(&mut self, f: PlayerCallback) {
        self.state.borrow_mut().on_destroy.push(f);
    }

    fn init(&mut self) {
        self.log.borrow_mut().push("init".into());
    }

    fn has_started(&self) -> bool {
        self.state.borrow().started
    }

    fn play(&mut self) {
        let first = !self.state.borrow().started;
        self.state.borrow_mut().started = true;
        self.log.borrow_mut().push("play".into());
        if first {
            self.fire(PlayerPhase::Start);
        }
    }

    fn pause(&mut self) {
        self.log.borrow_mut().push("pause".into());
    }

    fn restart(&mut self) {
        self.log.borrow_mut().push("restart".into());
    }

    fn finish(&mut self) {
        let first = !self.state.borrow().finished;
        self.state.borrow_mut().finished = true;
        self.log.borrow_mut().push("finish".into());
        if first {
            self.fire(PlayerPhase::Done);
        }
    }

    fn destroy(&mut self) {
        let first = !self.state.borrow().destroyed;
        self.state.borrow_mut().destroyed = true;
        self.log.borrow_mut().push("destroy".into());
        if first {
            if !self.has_started() {
                self.state.borrow_mut().started = true;
                self.fire(PlayerPhase::Start);
            }
            self.finish();
            self.fire(PlayerPhase::Destroy);
        }
    }

    fn reset(&mut self) {
        let mut s = self.state.borrow_mut();
        s.started = false;
        s.finished = false;
    }

    fn set_position(&mut self, position: f32) {
        self.state.borrow_mut().position = position;
    }

    fn get_position(&self) -> f32 {
        self.state.borrow().position
    }

    fn total_time(&self) -> f32 {
        self.total_time
    }
}

// -------------------------------------------------------------- mock driver

/// One recorded `animate()` invocation.
pub struct AnimateCall {
    pub element: NodeId,
    pub keyframes: Vec<Keyframe>,
    pub duration: f32,
    pub delay: f32,
    pub easing: Option<String>,
    pub previous_players: usize,
    pub player: MockPlayer,
}

/// Driver over a [`MockHost`], recording every animate call.
pub struct MockAnimationDriver {
    pub host: MockHost,
    log: RefCell<Vec<AnimateCall>>,
    invalid_properties: RefCell<Vec<String>>,
    missing_computed: Cell<bool>,
}

impl MockAnimationDriver {
    pub fn new(host: MockHost) -> Rc<Self> {
        Rc::new(Self {
            host,
            log: RefCell::new(Vec::new()),
            invalid_properties: RefCell::new(Vec::new()),
            missing_computed: Cell::new(false),
        })
    }

    /// Declare a style property the driver should reject.
    pub fn reject_property(&self, prop: &str) {
        self.invalid_properties.borrow_mut().push(prop.to_string());
    }

    /// Make every computed-style lookup fail (detached-node simulation).
    pub fn fail_computed_styles(&self, value: bool) {
        self.missing_computed.set(value);
    }

    pub fn calls(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn call(&self, index: usize) -> AnimateCall {
        let log = self.log.borrow();
        let c = &log[index];
        AnimateCall {
            element: c.element,
            keyframes: c.keyframes.clone(),
            duration: c.duration,
            delay: c.delay,
            easing: c.easing.clone(),
            previous_players: c.previous_players,
            player: c.player.clone(),
        }
    }

    pub fn players_for(&self, element: NodeId) -> Vec<MockPlayer> {
        self.log
            .borrow()
            .iter()
            .filter(|c| c.element == element)
            .map(|c| c.player.clone())
            .collect()
    }

    pub fn finish_all(&self) {
        let players: Vec<MockPlayer> = self.log.borrow().iter().map(|c| c.player.clone()).collect();
        for mut p in players {
            p.finish();
        }
    }
}

impl AnimationDriver for MockAnimationDriver {
    fn validate_style_property(&self, prop: &str) -> bool {
        !self.invalid_properties.borrow().iter().any(|p| p == prop)
    }

    fn contains_element(&self, elm1: NodeId, elm2: NodeId) -> bool {
        elm1 == elm2 || self.host.is_ancestor(elm1.0, elm2.0)
    }

    fn get_parent_element(&self, element: NodeId) -> Option<NodeId> {
        self.host
            .inner
            .borrow()
            .nodes
            .get(&element.0)
            .and_then(|d| d.parent)
            .map(NodeId)
    }

    fn query(&self, element: NodeId, selector: &str, multi: bool) -> Vec<NodeId> {
        self.host.query(element.0, selector, multi)
    }

    fn compute_style(&self, element: NodeId, prop: &str, default_value: &str) -> String {
        if self.missing_computed.get() {
            return String::new();
        }
        self.host
            .style_of(element, prop)
            .map(|v| v.as_text())
            .unwrap_or_else(|| default_value.to_string())
    }

    fn animate(
        &self,
        element: NodeId,
        keyframes: &[Keyframe],
        duration: f32,
        delay: f32,
        easing: Option<&str>,
        previous_players: Vec<PlayerRc>,
    ) -> Box<dyn AnimationPlayer> {
        let player = MockPlayer::new(element, duration, delay);
        self.log.borrow_mut().push(AnimateCall {
            element,
            keyframes: keyframes.to_vec(),
            duration,
            delay,
            easing: easing.map(|e| e.to_string()),
            previous_players: previous_players.len(),
            player: player.clone(),
        });
        Box::new(player)
    }

    fn add_marker(&self, element: NodeId, marker: &str) {
        let mut inner = self.host.inner.borrow_mut();
        if let Some(data) = inner.nodes.get_mut(&element.0) {
            if !data.markers.iter().any(|m| m == marker) {
                data.markers.push(marker.to_string());
            }
        }
    }

    fn remove_marker(&self, element: NodeId, marker: &str) {
        let mut inner = self.host.inner.borrow_mut();
        if let Some(data) = inner.nodes.get_mut(&element.0) {
            data.markers.retain(|m| m != marker);
        }
    }

    fn apply_styles(&self, element: NodeId, styles: &StyleMap) {
        let mut inner = self.host.inner.borrow_mut();
        if let Some(data) = inner.nodes.get_mut(&element.0) {
            for (prop, value) in styles {
                data.styles.insert(prop.clone(), value.clone());
            }
        }
    }

    fn erase_styles(&self, element: NodeId, styles: &StyleMap) {
        let mut inner = self.host.inner.borrow_mut();
        if let Some(data) = inner.nodes.get_mut(&element.0) {
            for prop in styles.keys() {
                data.styles.shift_remove(prop);
            }
        }
    }
}

// ------------------------------------------------------------- AST builders

pub fn styles(entries: &[(&str, StyleValue)]) -> StyleAst {
    StyleAst {
        styles: vec![StyleTuple::Styles(style_map(
            entries.iter().map(|(k, v)| (k.to_string(), v.clone())),
        ))],
        easing: None,
        offset: None,
        is_empty_step: false,
    }
}

pub fn num(v: f32) -> StyleValue {
    StyleValue::Number(v)
}

pub fn text(v: &str) -> StyleValue {
    StyleValue::Text(v.to_string())
}

pub fn style(entries: &[(&str, StyleValue)]) -> AnimationNode {
    AnimationNode::Style(styles(entries))
}

pub fn kf_step(offset: Option<f32>, entries: &[(&str, StyleValue)]) -> StyleAst {
    StyleAst {
        offset,
        ..styles(entries)
    }
}

fn parse_timing(timing: &str) -> Timing {
    let mut errors = Vec::new();
    let t = parse_timing_expr(timing, &mut errors);
    assert!(errors.is_empty(), "fixture timing should parse: {timing}");
    t
}

pub fn animate(timing: &str, style: AnimationNode) -> AnimationNode {
    AnimationNode::Animate(AnimateAst {
        timings: TimingAst::Fixed(parse_timing(timing)),
        style: Box::new(style),
    })
}

pub fn animate_keyframes(timing: &str, steps: Vec<StyleAst>) -> AnimationNode {
    AnimationNode::Animate(AnimateAst {
        timings: TimingAst::Fixed(parse_timing(timing)),
        style: Box::new(AnimationNode::Keyframes(KeyframesAst { steps })),
    })
}

pub fn animate_empty(timing: &str) -> AnimationNode {
    AnimationNode::Animate(AnimateAst {
        timings: TimingAst::Fixed(parse_timing(timing)),
        style: Box::new(AnimationNode::Style(StyleAst {
            is_empty_step: true,
            ..Default::default()
        })),
    })
}

pub fn sequence(steps: Vec<AnimationNode>) -> AnimationNode {
    AnimationNode::Sequence(SequenceAst {
        steps,
        options: None,
    })
}

pub fn group_of(steps: Vec<AnimationNode>) -> AnimationNode {
    AnimationNode::Group(GroupAst {
        steps,
        options: None,
    })
}

pub fn query(selector: &str, animation: AnimationNode) -> AnimationNode {
    query_opt(selector, animation, None, 0, false)
}

pub fn query_opt(
    selector: &str,
    animation: AnimationNode,
    options: Option<AnimationOptions>,
    limit: i32,
    optional: bool,
) -> AnimationNode {
    let include_self = selector.contains(":self");
    let stripped = selector.replace(":self", "");
    AnimationNode::Query(QueryAst {
        selector: stripped.trim().to_string(),
        original_selector: selector.to_string(),
        limit,
        optional,
        include_self,
        animation: Box::new(animation),
        options,
    })
}

pub fn stagger(timing: &str, animation: AnimationNode) -> AnimationNode {
    let timings = match timing {
        "full" => Timing {
            duration: 0.0,
            delay: 0.0,
            easing: Some("full".into()),
        },
        other => parse_timing(other),
    };
    AnimationNode::Stagger(StaggerAst {
        timings,
        animation: Box::new(animation),
    })
}

fn parse_state_match(s: &str) -> StateMatch {
    match s {
        "*" => StateMatch::Any,
        "void" | ":leave-state" => StateMatch::Void,
        other => StateMatch::Value(other.to_string()),
    }
}

/// Count the query/dep statistics a real validator would annotate.
fn count_nodes(node: &AnimationNode, queries: &mut usize, deps: &mut usize) {
    match node {
        AnimationNode::Query(q) => {
            *queries += 1;
            count_nodes(&q.animation, queries, deps);
        }
        AnimationNode::AnimateChild(_) => *deps += 1,
        AnimationNode::AnimateRef(r) => {
            *deps += 1;
            count_nodes(&r.animation.animation, queries, deps);
        }
        AnimationNode::Sequence(s) => {
            for step in &s.steps {
                count_nodes(step, queries, deps);
            }
        }
        AnimationNode::Group(g) => {
            for step in &g.steps {
                count_nodes(step, queries, deps);
            }
        }
        AnimationNode::Stagger(s) => count_nodes(&s.animation, queries, deps),
        AnimationNode::Reference(r) => count_nodes(&r.animation, queries, deps),
        AnimationNode::Animate(_)
        | AnimationNode::Style(_)
        | AnimationNode::Keyframes(_)
        | AnimationNode::Trigger(_)
        | AnimationNode::State(_)
        | AnimationNode::Transition(_) => {}
    }
}

pub fn transition(from: &str, to: &str, animation: AnimationNode) -> TransitionAst {
    transition_opt(from, to, animation, None)
}

pub fn transition_opt(
    from: &str,
    to: &str,
    animation: AnimationNode,
    options: Option<AnimationOptions>,
) -> TransitionAst {
    let mut queries = 0;
    let mut deps = 0;
    count_nodes(&animation, &mut queries, &mut deps);
    TransitionAst {
        matchers: vec![TransitionMatcher {
            from: parse_state_match(from),
            to: parse_state_match(to),
        }],
        animation: Box::new(animation),
        options,
        query_count: queries,
        dep_count: deps,
    }
}

pub fn state_def(name: &str, style: StyleAst) -> StateAst {
    StateAst {
        name: name.to_string(),
        style,
        options: None,
    }
}

pub fn trigger_def(name: &str, states: Vec<StateAst>, transitions: Vec<TransitionAst>) -> TriggerAst {
    TriggerAst {
        name: name.to_string(),
        states,
        transitions,
    }
}

/// Load a JSON-authored animation tree, with fixture-grade error context.
pub fn load_animation_fixture(json: &str) -> Result<AnimationNode> {
    parse_animation_json(json)
        .map_err(|e| anyhow!(e))
        .context("failed to load animation fixture")
}
