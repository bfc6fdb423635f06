//! motive-api-core: shared animation data model (engine-agnostic)
//!
//! This crate defines the contracts between the animation compiler/runtime
//! and its collaborators: style values and ordered style maps, the validated
//! animation syntax tree, timing metadata, the player seam, lifecycle events,
//! and the error taxonomy. The heavy lifting (timeline compilation and the
//! transition runtime) lives in motive-animation-core.

pub mod ast;
pub mod error;
pub mod events;
pub mod json;
pub mod player;
pub mod style;
pub mod tasks;

pub use ast::{
    AnimateAst, AnimateChildAst, AnimateRefAst, AnimationNode, AnimationOptions, GroupAst,
    KeyframesAst, QueryAst, ReferenceAst, SequenceAst, StaggerAst, StateAst, StateMatch, StyleAst,
    StyleTuple, Timing, TimingAst, TimingValue, TransitionAst, TransitionMatcher, TriggerAst,
};
pub use error::{BuildError, EngineError, TransitionFailure};
pub use events::{AnimationEvent, PlayerPhase};
pub use json::parse_animation_json;
pub use player::{AnimationPlayer, NoopAnimationPlayer, PlayerCallback};
pub use style::{StyleMap, StyleValue, AUTO_STYLE, PRE_STYLE};
pub use tasks::Microtasks;
