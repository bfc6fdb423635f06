#![allow(dead_code)]
//! The platform driver seam.
//!
//! The host implements this trait against its rendering layer. The engine
//! never touches nodes directly: queries, computed styles, real players,
//! marker tags and direct style writes all go through here.

use motive_api_core::player::{AnimationPlayer, NoopAnimationPlayer};
use motive_api_core::style::StyleMap;

use crate::ids::NodeId;
use crate::instruction::Keyframe;
use crate::transition_player::PlayerRc;

pub trait AnimationDriver {
    /// True when the property name is animatable on this platform.
    fn validate_style_property(&self, prop: &str) -> bool;

    fn contains_element(&self, elm1: NodeId, elm2: NodeId) -> bool;

    fn get_parent_element(&self, element: NodeId) -> Option<NodeId>;

    /// Query descendants of `element` matching `selector`; `multi` false
    /// means the first match suffices.
    fn query(&self, element: NodeId, selector: &str, multi: bool) -> Vec<NodeId>;

    /// Computed style for one property, with a fallback when missing.
    fn compute_style(&self, element: NodeId, prop: &str, default_value: &str) -> String;

    /// Build a real player for a compiled keyframe sequence. Handles of
    /// overlapping in-flight players are passed so the platform can merge
    /// their current positions into the new animation.
    #[allow(clippy::too_many_arguments)]
    fn animate(
        &self,
        element: NodeId,
        keyframes: &[Keyframe],
        duration: f32,
        delay: f32,
        easing: Option<&str>,
        previous_players: Vec<PlayerRc>,
    ) -> Box<dyn AnimationPlayer>;

    /// Marker tags are the engine's only externally observable state
    /// (queued/animating/disabled/entering/leaving and per-namespace tags).
    fn add_marker(&self, element: NodeId, marker: &str);

    fn remove_marker(&self, element: NodeId, marker: &str);

    /// Write styles directly onto a node (end-style restoration).
    fn apply_styles(&self, element: NodeId, styles: &StyleMap);

    /// Remove previously written styles from a node.
    fn erase_styles(&self, element: NodeId, styles: &StyleMap);
}

/// Driver for embeddings without a rendering layer: every property is valid,
/// queries match nothing and playback completes immediately.
#[derive(Default)]
pub struct NoopAnimationDriver;

impl NoopAnimationDriver {
    pub fn new() -> Self {
        Self
    }
}

impl AnimationDriver for NoopAnimationDriver {
    fn validate_style_property(&self, _prop: &str) -> bool {
        true
    }

    fn contains_element(&self, _elm1: NodeId, _elm2: NodeId) -> bool {
        true
    }

    fn get_parent_element(&self, _element: NodeId) -> Option<NodeId> {
        None
    }

    fn query(&self, _element: NodeId, _selector: &str, _multi: bool) -> Vec<NodeId> {
        Vec::new()
    }

    fn compute_style(&self, _element: NodeId, _prop: &str, default_value: &str) -> String {
        default_value.to_string()
    }

    fn animate(
        &self,
        _element: NodeId,
        _keyframes: &[Keyframe],
        duration: f32,
        delay: f32,
        _easing: Option<&str>,
        _previous_players: Vec<PlayerRc>,
    ) -> Box<dyn AnimationPlayer> {
        Box::new(NoopAnimationPlayer::new(duration, delay))
    }

    fn add_marker(&self, _element: NodeId, _marker: &str) {}

    fn remove_marker(&self, _element: NodeId, _marker: &str) {}

    fn apply_styles(&self, _element: NodeId, _styles: &StyleMap) {}

    fn erase_styles(&self, _element: NodeId, _styles: &StyleMap) {}
}
