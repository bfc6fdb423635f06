//! Validated animation syntax tree.
//!
//! The tree is produced by an external validator/builder and is read-only
//! input to the compiler and runtime. It is a closed tagged union so every
//! visitor can match exhaustively; adding a node kind is a compile error in
//! each visitor until handled.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::style::{StyleMap, StyleValue};

/// Resolved animate timings in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub duration: f32,
    #[serde(default)]
    pub delay: f32,
    #[serde(default)]
    pub easing: Option<String>,
}

impl Timing {
    pub fn new(duration: f32, delay: f32, easing: Option<&str>) -> Self {
        Self {
            duration,
            delay,
            easing: easing.map(|e| e.to_string()),
        }
    }
}

/// Timing attached to an `animate()` step. The dynamic variant carries a
/// templated expression (e.g. `"{{ time }} ease-out"`) resolved against
/// runtime parameters on every invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingAst {
    Fixed(Timing),
    Dynamic { expr: String },
}

/// A single option-level timing value (`delay: 200` or `delay: "{{ d }}"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimingValue {
    Number(f32),
    Expr(String),
}

/// Options carried by sequences, groups, transitions, queries and references.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationOptions {
    #[serde(default)]
    pub delay: Option<TimingValue>,
    /// Duration override, honored when splicing child animations; a zero
    /// value skips the spliced animation entirely.
    #[serde(default)]
    pub duration: Option<TimingValue>,
    #[serde(default)]
    pub params: Option<HashMap<String, StyleValue>>,
}

/// One side of a transition matcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateMatch {
    /// `*` — any state.
    Any,
    /// The implicit initial/removal-terminal state.
    Void,
    /// A literal state name.
    Value(String),
}

impl StateMatch {
    /// Does this side accept the (already normalized) state value?
    pub fn accepts(&self, state: &str) -> bool {
        match self {
            StateMatch::Any => true,
            StateMatch::Void => state == "void",
            StateMatch::Value(v) => v == state,
        }
    }
}

/// A `(from, to)` edge matcher. Bidirectional (`<=>`) expressions are expanded
/// by the validator into two matchers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatcher {
    pub from: StateMatch,
    pub to: StateMatch,
}

impl TransitionMatcher {
    pub fn matches(&self, from: &str, to: &str) -> bool {
        self.from.accepts(from) && self.to.accepts(to)
    }
}

/// The closed animation node union.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnimationNode {
    Trigger(TriggerAst),
    State(StateAst),
    Transition(TransitionAst),
    Sequence(SequenceAst),
    Group(GroupAst),
    Animate(AnimateAst),
    Style(StyleAst),
    Keyframes(KeyframesAst),
    Reference(ReferenceAst),
    AnimateChild(AnimateChildAst),
    AnimateRef(AnimateRefAst),
    Query(QueryAst),
    Stagger(StaggerAst),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerAst {
    pub name: String,
    #[serde(default)]
    pub states: Vec<StateAst>,
    #[serde(default)]
    pub transitions: Vec<TransitionAst>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateAst {
    /// State name; may be a comma-separated list, split at trigger build.
    pub name: String,
    pub style: StyleAst,
    #[serde(default)]
    pub options: Option<AnimationOptions>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionAst {
    pub matchers: Vec<TransitionMatcher>,
    pub animation: Box<AnimationNode>,
    #[serde(default)]
    pub options: Option<AnimationOptions>,
    /// Number of `query()` nodes beneath this transition (validator-counted).
    #[serde(default)]
    pub query_count: usize,
    /// Number of `animate_child()`/`animate_ref()` nodes beneath it.
    #[serde(default)]
    pub dep_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceAst {
    pub steps: Vec<AnimationNode>,
    #[serde(default)]
    pub options: Option<AnimationOptions>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupAst {
    pub steps: Vec<AnimationNode>,
    #[serde(default)]
    pub options: Option<AnimationOptions>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimateAst {
    pub timings: TimingAst,
    /// Either a Style node or a Keyframes node.
    pub style: Box<AnimationNode>,
}

/// One entry of a style step: either a literal map or the `*` wildcard that
/// expands to every property known so far on the timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleTuple {
    Wildcard(String),
    Styles(StyleMap),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleAst {
    #[serde(default)]
    pub styles: Vec<StyleTuple>,
    #[serde(default)]
    pub easing: Option<String>,
    /// Explicit keyframe offset when used inside `keyframes()`.
    #[serde(default)]
    pub offset: Option<f32>,
    /// True for the `animate(500)` shorthand with no destination styles.
    #[serde(default)]
    pub is_empty_step: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyframesAst {
    pub steps: Vec<StyleAst>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAst {
    pub animation: Box<AnimationNode>,
    #[serde(default)]
    pub options: Option<AnimationOptions>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimateChildAst {
    #[serde(default)]
    pub options: Option<AnimationOptions>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimateRefAst {
    pub animation: ReferenceAst,
    #[serde(default)]
    pub options: Option<AnimationOptions>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryAst {
    /// Selector with `:enter`/`:leave` tokens already isolated; the compiler
    /// substitutes the per-flush synthetic markers.
    pub selector: String,
    /// The selector as written, for error reporting.
    pub original_selector: String,
    /// 0 = unlimited; negative counts from the tail.
    #[serde(default)]
    pub limit: i32,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub include_self: bool,
    pub animation: Box<AnimationNode>,
    #[serde(default)]
    pub options: Option<AnimationOptions>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaggerAst {
    /// Negative duration reverses the order; easing `"full"` reuses the
    /// parent context's accumulated stagger time.
    pub timings: Timing,
    pub animation: Box<AnimationNode>,
}

impl AnimationNode {
    /// Coarse kind name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AnimationNode::Trigger(_) => "trigger",
            AnimationNode::State(_) => "state",
            AnimationNode::Transition(_) => "transition",
            AnimationNode::Sequence(_) => "sequence",
            AnimationNode::Group(_) => "group",
            AnimationNode::Animate(_) => "animate",
            AnimationNode::Style(_) => "style",
            AnimationNode::Keyframes(_) => "keyframes",
            AnimationNode::Reference(_) => "reference",
            AnimationNode::AnimateChild(_) => "animate_child",
            AnimationNode::AnimateRef(_) => "animate_ref",
            AnimationNode::Query(_) => "query",
            AnimationNode::Stagger(_) => "stagger",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// it should match wildcard, void and literal states
    #[test]
    fn matcher_semantics() {
        let m = TransitionMatcher {
            from: StateMatch::Value("open".into()),
            to: StateMatch::Any,
        };
        assert!(m.matches("open", "closed"));
        assert!(!m.matches("closed", "open"));

        let leave = TransitionMatcher {
            from: StateMatch::Any,
            to: StateMatch::Void,
        };
        assert!(leave.matches("open", "void"));
        assert!(!leave.matches("open", "closed"));
    }
}
