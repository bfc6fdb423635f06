#![allow(dead_code)]
//! Timeline builders: per-node, per-window style accumulation.
//!
//! A builder owns its local and backfill tables; the style history a node
//! accumulates across forked timelines lives in a `GlobalStyles` arena shared
//! by reference. This two-level store replaces the source design's implicit
//! parent/child table sharing with an explicit one keyed by node id.

use hashbrown::HashMap;
use indexmap::IndexMap;

use motive_api_core::ast::{AnimationOptions, StyleTuple, Timing};
use motive_api_core::error::BuildError;
use motive_api_core::style::{StyleMap, StyleValue};

use crate::ids::NodeId;
use crate::instruction::{create_timeline_instruction, Keyframe, TimelineInstruction};
use crate::timing::{interpolate_params, round_offset, ONE_FRAME_IN_MS};

/// Shared per-node style history for one compile pass.
#[derive(Default, Debug)]
pub struct GlobalStyles {
    by_node: HashMap<NodeId, StyleMap>,
}

impl GlobalStyles {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, node: NodeId) -> &mut StyleMap {
        self.by_node.entry(node).or_default()
    }

    fn map(&self, node: NodeId) -> Option<&StyleMap> {
        self.by_node.get(&node)
    }
}

#[derive(Clone, Debug)]
struct TimedValue {
    time: f32,
    value: StyleValue,
}

#[derive(Default, Debug)]
struct KeyframeDraft {
    time: f32,
    easing: Option<String>,
    styles: StyleMap,
}

pub struct TimelineBuilder {
    pub element: NodeId,
    pub start_time: f32,
    pub current_time: f32,
    /// Timeline-level easing, set for the inner timeline of `keyframes()`.
    pub easing: Option<String>,
    drafts: Vec<KeyframeDraft>,
    current: usize,
    previous: Option<usize>,
    /// Index of the draft produced by an empty `animate(n)` step, if that is
    /// still the current one.
    empty_step_draft: Option<usize>,
    style_summary: IndexMap<String, TimedValue>,
    local: StyleMap,
    backfill: StyleMap,
    pending: StyleMap,
}

impl TimelineBuilder {
    pub fn new(element: NodeId, start_time: f32) -> Self {
        let mut builder = Self {
            element,
            start_time,
            current_time: start_time,
            easing: None,
            drafts: Vec::new(),
            current: 0,
            previous: None,
            empty_step_draft: None,
            style_summary: IndexMap::new(),
            local: StyleMap::new(),
            backfill: StyleMap::new(),
            pending: StyleMap::new(),
        };
        builder.load_keyframe();
        builder
    }

    /// Elapsed time inside this window.
    #[inline]
    pub fn duration(&self) -> f32 {
        self.current_time - self.start_time
    }

    pub fn contains_animation(&self) -> bool {
        match self.drafts.len() {
            0 => false,
            1 => self.has_current_style_properties(),
            _ => true,
        }
    }

    pub fn has_current_style_properties(&self) -> bool {
        !self.drafts[self.current].styles.is_empty()
    }

    /// False only while the current keyframe is an untouched empty step,
    /// which must not receive destination state styles.
    pub fn allow_only_timeline_styles(&self) -> bool {
        self.empty_step_draft != Some(self.current)
    }

    fn load_keyframe(&mut self) {
        if !self.drafts.is_empty() {
            self.previous = Some(self.current);
        }
        match self.drafts.iter().position(|d| d.time == self.current_time) {
            Some(i) => self.current = i,
            None => {
                self.drafts.push(KeyframeDraft {
                    time: self.current_time,
                    ..Default::default()
                });
                self.current = self.drafts.len() - 1;
            }
        }
    }

    /// Advance by the minimal schedulable unit, forcing a held frame before
    /// an immediately following style step.
    pub fn forward_frame(&mut self) {
        self.current_time += ONE_FRAME_IN_MS;
        self.load_keyframe();
    }

    pub fn forward_time(&mut self, time: f32) {
        self.apply_styles_to_keyframe();
        self.current_time = time;
        self.load_keyframe();
    }

    /// Shift the window start if nothing committed yet; otherwise advance
    /// time so the delay window holds the last known value.
    pub fn delay_next_step(&mut self, globals: &mut GlobalStyles, delay: f32) {
        // A style() step that is the very first value on this timeline must
        // survive the delay: snapshot it so the window holds its styles.
        let has_pre_style_step = self.drafts.len() == 1 && !self.pending.is_empty();
        if self.duration() > 0.0 || has_pre_style_step {
            self.forward_time(self.current_time + delay);
            if has_pre_style_step {
                self.snapshot_current_styles(globals);
            }
        } else {
            self.start_time += delay;
            self.drafts[self.current].time = self.start_time;
            self.current_time = self.start_time;
        }
    }

    /// Child builder sharing the node's global style history but with fresh
    /// local/backfill tables.
    pub fn fork(&mut self, element: NodeId, current_time: Option<f32>) -> TimelineBuilder {
        self.apply_styles_to_keyframe();
        TimelineBuilder::new(element, current_time.unwrap_or(self.current_time))
    }

    fn update_style(&mut self, globals: &mut GlobalStyles, prop: &str, value: StyleValue) {
        self.local.insert(prop.to_string(), value.clone());
        globals
            .entry(self.element)
            .insert(prop.to_string(), value.clone());
        self.style_summary.insert(
            prop.to_string(),
            TimedValue {
                time: self.current_time,
                value,
            },
        );
    }

    /// Re-commit every locally known style at the current time.
    pub fn snapshot_current_styles(&mut self, globals: &mut GlobalStyles) {
        let entries: Vec<(String, StyleValue)> = self
            .local
            .iter()
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect();
        for (prop, value) in entries {
            self.pending.insert(prop.clone(), value.clone());
            self.update_style(globals, &prop, value);
        }
    }

    /// An `animate(n)` with no destination: every globally known property is
    /// pinned to the auto sentinel and backfilled.
    pub fn apply_empty_step(&mut self, globals: &mut GlobalStyles, easing: Option<&str>) {
        if let (Some(e), Some(prev)) = (easing, self.previous) {
            self.drafts[prev].easing = Some(e.to_string());
        }
        let known: Vec<(String, StyleValue)> = globals
            .map(self.element)
            .map(|m| m.iter().map(|(p, v)| (p.clone(), v.clone())).collect())
            .unwrap_or_default();
        for (prop, value) in known {
            self.backfill.insert(prop.clone(), value);
            self.drafts[self.current]
                .styles
                .insert(prop, StyleValue::auto());
        }
        self.empty_step_draft = Some(self.current);
    }

    /// Merge snapshots (wildcard entries expand to all known properties),
    /// interpolate params, and record backfill values for properties not yet
    /// locally set so earlier keyframes see a held value rather than a gap.
    pub fn set_styles(
        &mut self,
        globals: &mut GlobalStyles,
        input: &[StyleTuple],
        easing: Option<&str>,
        errors: &mut Vec<BuildError>,
        options: &AnimationOptions,
    ) {
        if let (Some(e), Some(prev)) = (easing, self.previous) {
            self.drafts[prev].easing = Some(e.to_string());
        }
        let empty_params = HashMap::new();
        let params = options.params.as_ref().unwrap_or(&empty_params);

        let mut flattened = StyleMap::new();
        for tuple in input {
            match tuple {
                StyleTuple::Wildcard(_) => {
                    if let Some(all) = globals.map(self.element) {
                        for prop in all.keys() {
                            flattened.insert(prop.clone(), StyleValue::auto());
                        }
                    }
                }
                StyleTuple::Styles(map) => {
                    for (prop, value) in map {
                        flattened.insert(prop.clone(), value.clone());
                    }
                }
            }
        }

        for (prop, value) in flattened {
            let value = interpolate_params(&value, params, errors);
            self.pending.insert(prop.clone(), value.clone());
            if !self.local.contains_key(&prop) {
                let held = globals
                    .map(self.element)
                    .and_then(|m| m.get(&prop).cloned())
                    .unwrap_or_else(StyleValue::auto);
                self.backfill.insert(prop.clone(), held);
            }
            self.update_style(globals, &prop, value);
        }
    }

    /// Commit pending styles into the keyframe at the current elapsed time.
    pub fn apply_styles_to_keyframe(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let draft = &mut self.drafts[self.current];
        for (prop, value) in pending {
            draft.styles.insert(prop, value);
        }
        for (prop, value) in &self.local {
            if !draft.styles.contains_key(prop) {
                draft.styles.insert(prop.clone(), value.clone());
            }
        }
    }

    /// Most-recent-write-wins across siblings: adopt the other timeline's
    /// value for every property whose last write is newer than ours.
    pub fn merge_timeline_collected_styles(
        &mut self,
        globals: &mut GlobalStyles,
        other: &TimelineBuilder,
    ) {
        let updates: Vec<(String, StyleValue)> = other
            .style_summary
            .iter()
            .filter(|(prop, theirs)| match self.style_summary.get(*prop) {
                Some(ours) => theirs.time > ours.time,
                None => true,
            })
            .map(|(prop, theirs)| (prop.clone(), theirs.value.clone()))
            .collect();
        for (prop, value) in updates {
            self.update_style(globals, &prop, value);
        }
    }

    /// Emit the ordered keyframe list, classifying sentinel properties into
    /// the pre/post-style sets the runtime resolves via the driver.
    pub fn build_keyframes(&mut self) -> TimelineInstruction {
        self.apply_styles_to_keyframe();

        let duration = self.duration();
        let is_empty = self.drafts.len() == 1 && duration == 0.0;
        let mut pre_props: Vec<String> = Vec::new();
        let mut post_props: Vec<String> = Vec::new();
        let mut keyframes: Vec<Keyframe> = Vec::new();

        for draft in &self.drafts {
            let mut styles = self.backfill.clone();
            for (prop, value) in &draft.styles {
                styles.insert(prop.clone(), value.clone());
            }
            for (prop, value) in &styles {
                if value.is_pre() {
                    if !pre_props.contains(prop) {
                        pre_props.push(prop.clone());
                    }
                } else if value.is_auto() && !post_props.contains(prop) {
                    post_props.push(prop.clone());
                }
            }
            let offset = if is_empty {
                0.0
            } else {
                round_offset((draft.time - self.start_time) / duration)
            };
            keyframes.push(Keyframe {
                offset,
                easing: draft.easing.clone(),
                styles,
            });
        }

        // A single-instant timeline collapses to the explicit 2-keyframe
        // zero-duration form.
        if is_empty {
            let mut last = keyframes[0].clone();
            last.offset = 1.0;
            keyframes.push(last);
        }

        create_timeline_instruction(
            self.element,
            keyframes,
            pre_props,
            post_props,
            duration,
            self.start_time,
            self.easing.clone(),
            false,
        )
    }
}

/// Reuses an already-compiled instruction as a sub-trigger inside a parent
/// timeline. When flagged, the first keyframe is stretched across the initial
/// delay window so the parent needs no special case for nested delays.
pub struct SubTimelineBuilder {
    pub element: NodeId,
    keyframes: Vec<Keyframe>,
    pre_style_props: Vec<String>,
    post_style_props: Vec<String>,
    pub timings: Timing,
    stretch_starting_keyframe: bool,
}

impl SubTimelineBuilder {
    pub fn new(instruction: &TimelineInstruction, timings: Timing) -> Self {
        Self {
            element: instruction.element,
            keyframes: instruction.keyframes.clone(),
            pre_style_props: instruction.pre_style_props.clone(),
            post_style_props: instruction.post_style_props.clone(),
            timings,
            stretch_starting_keyframe: instruction.stretch_starting_keyframe,
        }
    }

    pub fn contains_animation(&self) -> bool {
        self.keyframes.len() > 1
    }

    pub fn build_keyframes(&self) -> TimelineInstruction {
        let mut keyframes = self.keyframes.clone();
        let Timing {
            mut duration,
            mut delay,
            mut easing,
        } = self.timings.clone();

        if self.stretch_starting_keyframe && delay > 0.0 {
            let mut stretched: Vec<Keyframe> = Vec::with_capacity(keyframes.len() + 1);
            let total_time = duration + delay;
            let starting_gap = delay / total_time;

            // The original first keyframe now starts once the delay is done;
            // a copy pinned at offset 0 holds its styles through the gap.
            let mut held = keyframes[0].clone();
            held.offset = 0.0;
            stretched.push(held);

            let mut first = keyframes[0].clone();
            first.offset = round_offset(starting_gap);
            stretched.push(first);

            // Remaining offsets are warped into the combined window.
            for kf in keyframes.iter().skip(1) {
                let mut kf = kf.clone();
                let time_at_keyframe = delay + kf.offset * duration;
                kf.offset = round_offset(time_at_keyframe / total_time);
                stretched.push(kf);
            }

            duration = total_time;
            delay = 0.0;
            easing = None;
            keyframes = stretched;
        }

        create_timeline_instruction(
            self.element,
            keyframes,
            self.pre_style_props.clone(),
            self.post_style_props.clone(),
            duration,
            delay,
            easing,
            true,
        )
    }
}

/// One slot in the compile arena: a live builder or a spliced sub-timeline.
pub enum TimelineSlot {
    Builder(TimelineBuilder),
    Sub(SubTimelineBuilder),
}

impl TimelineSlot {
    pub fn element(&self) -> NodeId {
        match self {
            TimelineSlot::Builder(b) => b.element,
            TimelineSlot::Sub(s) => s.element,
        }
    }

    pub fn contains_animation(&self) -> bool {
        match self {
            TimelineSlot::Builder(b) => b.contains_animation(),
            TimelineSlot::Sub(s) => s.contains_animation(),
        }
    }

    pub fn build_keyframes(&mut self) -> TimelineInstruction {
        match self {
            TimelineSlot::Builder(b) => b.build_keyframes(),
            TimelineSlot::Sub(s) => s.build_keyframes(),
        }
    }

    pub fn as_builder_mut(&mut self) -> &mut TimelineBuilder {
        match self {
            TimelineSlot::Builder(b) => b,
            TimelineSlot::Sub(_) => unreachable!("sub-timelines are never the active context"),
        }
    }

    pub fn as_builder(&self) -> &TimelineBuilder {
        match self {
            TimelineSlot::Builder(b) => b,
            TimelineSlot::Sub(_) => unreachable!("sub-timelines are never the active context"),
        }
    }
}
