//! Motive Animation Core (engine-agnostic)
//!
//! The timeline compiler turns a validated animation syntax tree into ordered
//! per-node keyframe instructions; the transition runtime decides which
//! transition applies to a state change, builds and merges players through
//! the platform driver, and flushes pending work once per rendering cycle.
//! Shared data contracts (styles, AST, player trait, events, errors) live in
//! motive-api-core.

pub mod builder;
pub mod compiler;
pub mod driver;
pub mod engine;
pub mod group_player;
pub mod ids;
pub mod instruction;
pub mod namespace;
pub mod timing;
pub mod transition_player;
pub mod trigger;

// Re-exports for consumers (renderers/adapters)
pub use builder::{GlobalStyles, SubTimelineBuilder, TimelineBuilder};
pub use compiler::build_animation_timelines;
pub use driver::{AnimationDriver, NoopAnimationDriver};
pub use engine::{RcPlayer, RemovalContext, RemovalState, TransitionEngine};
pub use group_player::{optimize_group_player, AnimationGroupPlayer};
pub use ids::{NamespaceId, NodeId};
pub use instruction::{ElementInstructionMap, Keyframe, TimelineInstruction, TransitionInstruction};
pub use namespace::{Namespace, QueuedTransition, StateValue, TriggerValue};
pub use timing::{interpolate_params, parse_timing_expr, resolve_timing, round_offset};
pub use transition_player::{PlayerRc, SharedPlayer, TransitionAnimationPlayer};
pub use trigger::{build_trigger, AnimationTrigger, TransitionFactory, VOID_STATE};
pub use motive_api_core::{
    AnimationEvent, AnimationNode, AnimationOptions, AnimationPlayer, BuildError, EngineError,
    Microtasks, NoopAnimationPlayer, PlayerPhase, StyleMap, StyleValue, AUTO_STYLE, PRE_STYLE,
};
