#![allow(dead_code)]
//! Compiled instruction contracts between the compiler and the runtime.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use motive_api_core::error::BuildError;
use motive_api_core::style::StyleMap;

use crate::ids::NodeId;

/// One offset + style-snapshot pair in a compiled timeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Normalized offset in [0, 1], rounded to 3 decimals.
    pub offset: f32,
    #[serde(default)]
    pub easing: Option<String>,
    pub styles: StyleMap,
}

/// Per-node keyframe sequence plus its timing window — the unit the compiler
/// emits and the runtime consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineInstruction {
    pub element: NodeId,
    pub keyframes: Vec<Keyframe>,
    /// Properties whose `!` sentinel must be resolved before playback.
    pub pre_style_props: Vec<String>,
    /// Properties whose `*` sentinel must be resolved after styles land.
    pub post_style_props: Vec<String>,
    pub duration: f32,
    pub delay: f32,
    #[serde(default)]
    pub easing: Option<String>,
    /// True when spliced out of an already-compiled child instruction.
    pub is_sub_timeline: bool,
    /// When reused as a sub-trigger inside a parent, stretch the first
    /// keyframe across the initial delay window instead of delaying playback.
    #[serde(default)]
    pub stretch_starting_keyframe: bool,
}

impl TimelineInstruction {
    #[inline]
    pub fn total_time(&self) -> f32 {
        self.duration + self.delay
    }
}

#[allow(clippy::too_many_arguments)]
pub fn create_timeline_instruction(
    element: NodeId,
    keyframes: Vec<Keyframe>,
    pre_style_props: Vec<String>,
    post_style_props: Vec<String>,
    duration: f32,
    delay: f32,
    easing: Option<String>,
    is_sub_timeline: bool,
) -> TimelineInstruction {
    TimelineInstruction {
        element,
        keyframes,
        pre_style_props,
        post_style_props,
        duration,
        delay,
        easing,
        is_sub_timeline,
        stretch_starting_keyframe: false,
    }
}

/// Everything the runtime needs to play one matched transition.
#[derive(Clone, Debug)]
pub struct TransitionInstruction {
    pub element: NodeId,
    pub trigger_name: String,
    pub from_state: String,
    pub to_state: String,
    pub is_removal_transition: bool,
    pub from_styles: StyleMap,
    pub to_styles: StyleMap,
    pub timelines: Vec<TimelineInstruction>,
    /// Descendant nodes pulled in by `query()`.
    pub queried_elements: Vec<NodeId>,
    pub pre_style_props: HashMap<NodeId, HashSet<String>>,
    pub post_style_props: HashMap<NodeId, HashSet<String>>,
    pub total_time: f32,
    pub errors: Vec<BuildError>,
}

/// Already-compiled sub-instructions, keyed by the node whose
/// `animate_child()` may consume them.
#[derive(Default, Debug)]
pub struct ElementInstructionMap {
    map: HashMap<NodeId, Vec<TimelineInstruction>>,
}

impl ElementInstructionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, element: NodeId) -> Option<&Vec<TimelineInstruction>> {
        self.map.get(&element)
    }

    pub fn has(&self, element: NodeId) -> bool {
        self.map.contains_key(&element)
    }

    pub fn append(&mut self, element: NodeId, instructions: Vec<TimelineInstruction>) {
        self.map.entry(element).or_default().extend(instructions);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
