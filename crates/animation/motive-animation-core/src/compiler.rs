#![allow(dead_code)]
//! Timeline compiler: a single-pass, depth-first visitor over the validated
//! animation tree, driving one or more timeline builders and emitting
//! per-node instructions.
//!
//! The visitor forks its context at sequences with their own options, groups,
//! keyframes, queries and reference/child splices. Tree-shape validation is
//! the external builder's job; only build-time-unresolvable structural
//! problems (a non-optional query matching nothing, a missing parameter) are
//! recorded into the supplied error list and compilation continues
//! best-effort.

use std::cell::Cell;
use std::rc::Rc;

use hashbrown::HashMap;

use motive_api_core::ast::{
    AnimateAst, AnimateChildAst, AnimateRefAst, AnimationNode, AnimationOptions, GroupAst,
    KeyframesAst, QueryAst, ReferenceAst, SequenceAst, StaggerAst, StyleAst, StyleTuple, Timing,
    TimingValue,
};
use motive_api_core::error::BuildError;
use motive_api_core::style::{StyleMap, StyleValue};

use crate::builder::{GlobalStyles, SubTimelineBuilder, TimelineBuilder, TimelineSlot};
use crate::driver::AnimationDriver;
use crate::ids::NodeId;
use crate::instruction::{
    create_timeline_instruction, ElementInstructionMap, TimelineInstruction,
};
use crate::timing::{interpolate_params, resolve_timing, resolve_timing_value};

/// The kind of the previously visited node, where it changes behavior.
#[derive(Copy, Clone, Debug, PartialEq)]
enum PrevNode {
    Noop,
    Style,
    Other,
}

#[derive(Clone)]
struct TimelineContext {
    element: NodeId,
    current_timeline: usize,
    sub_context_count: usize,
    options: AnimationOptions,
    current_query_index: usize,
    current_query_total: usize,
    /// Accumulated stagger time of this context's own query branches.
    stagger_time: Rc<Cell<f32>>,
    parent_stagger: Option<Rc<Cell<f32>>>,
    parent_timeline: Option<usize>,
    previous_node: PrevNode,
    current_animate_timings: Option<Timing>,
}

struct Compilation<'a> {
    driver: &'a dyn AnimationDriver,
    sub_instructions: Option<&'a ElementInstructionMap>,
    enter_marker: &'a str,
    leave_marker: &'a str,
    timelines: Vec<TimelineSlot>,
    globals: GlobalStyles,
    errors: Vec<BuildError>,
}

/// Compile one transition's animation tree into per-node instructions.
#[allow(clippy::too_many_arguments)]
pub fn build_animation_timelines(
    driver: &dyn AnimationDriver,
    root_element: NodeId,
    ast: &AnimationNode,
    enter_marker: &str,
    leave_marker: &str,
    starting_styles: &StyleMap,
    final_styles: &StyleMap,
    options: &AnimationOptions,
    sub_instructions: Option<&ElementInstructionMap>,
    errors: &mut Vec<BuildError>,
) -> Vec<TimelineInstruction> {
    let mut comp = Compilation {
        driver,
        sub_instructions,
        enter_marker,
        leave_marker,
        timelines: vec![TimelineSlot::Builder(TimelineBuilder::new(root_element, 0.0))],
        globals: GlobalStyles::new(),
        errors: Vec::new(),
    };

    let mut ctx = TimelineContext {
        element: root_element,
        current_timeline: 0,
        sub_context_count: 0,
        options: options.clone(),
        current_query_index: 0,
        current_query_total: 0,
        stagger_time: Rc::new(Cell::new(0.0)),
        parent_stagger: None,
        parent_timeline: None,
        previous_node: PrevNode::Noop,
        current_animate_timings: None,
    };

    let delay = match &options.delay {
        Some(d) => resolve_timing_value(d, &mut comp.errors),
        None => 0.0,
    };
    {
        let Compilation {
            timelines,
            globals,
            errors: comp_errors,
            ..
        } = &mut comp;
        let tl = timelines[0].as_builder_mut();
        if delay > 0.0 {
            tl.delay_next_step(globals, delay);
        }
        tl.set_styles(
            globals,
            &[StyleTuple::Styles(starting_styles.clone())],
            None,
            comp_errors,
            options,
        );
    }

    comp.visit(ast, &mut ctx);

    let containing: Vec<usize> = (0..comp.timelines.len())
        .filter(|&i| comp.timelines[i].contains_animation())
        .collect();

    // Final state styles apply only to the root element's last timeline, and
    // never onto an untouched empty-step keyframe.
    if !containing.is_empty() && !final_styles.is_empty() {
        let last_root = containing
            .iter()
            .rev()
            .find(|&&i| {
                matches!(&comp.timelines[i], TimelineSlot::Builder(b) if b.element == root_element)
            })
            .copied();
        if let Some(i) = last_root {
            let Compilation {
                timelines,
                globals,
                errors: comp_errors,
                ..
            } = &mut comp;
            let tl = timelines[i].as_builder_mut();
            if tl.allow_only_timeline_styles() {
                tl.set_styles(
                    globals,
                    &[StyleTuple::Styles(final_styles.clone())],
                    None,
                    comp_errors,
                    options,
                );
            }
        }
    }

    errors.append(&mut comp.errors);

    if containing.is_empty() {
        return vec![create_timeline_instruction(
            root_element,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            0.0,
            delay,
            None,
            false,
        )];
    }
    containing
        .into_iter()
        .map(|i| comp.timelines[i].build_keyframes())
        .collect()
}

impl<'a> Compilation<'a> {
    fn builder(&mut self, idx: usize) -> &mut TimelineBuilder {
        self.timelines[idx].as_builder_mut()
    }

    fn current_time(&self, idx: usize) -> f32 {
        self.timelines[idx].as_builder().current_time
    }

    fn create_sub_context(
        &mut self,
        ctx: &mut TimelineContext,
        options: Option<&AnimationOptions>,
        element: Option<NodeId>,
        new_time: Option<f32>,
    ) -> TimelineContext {
        let target = element.unwrap_or(ctx.element);
        let forked = self.builder(ctx.current_timeline).fork(target, new_time);
        self.timelines.push(TimelineSlot::Builder(forked));
        let idx = self.timelines.len() - 1;

        let mut child = TimelineContext {
            element: target,
            current_timeline: idx,
            sub_context_count: 0,
            options: ctx.options.clone(),
            current_query_index: ctx.current_query_index,
            current_query_total: ctx.current_query_total,
            stagger_time: Rc::new(Cell::new(0.0)),
            parent_stagger: Some(ctx.stagger_time.clone()),
            parent_timeline: Some(ctx.current_timeline),
            previous_node: ctx.previous_node,
            current_animate_timings: ctx.current_animate_timings.clone(),
        };
        update_options(&mut child.options, options, &mut self.errors, false);
        ctx.sub_context_count += 1;
        child
    }

    fn transform_into_new_timeline(&mut self, ctx: &mut TimelineContext, new_time: Option<f32>) {
        ctx.previous_node = PrevNode::Noop;
        let forked = self.builder(ctx.current_timeline).fork(ctx.element, new_time);
        self.timelines.push(TimelineSlot::Builder(forked));
        ctx.current_timeline = self.timelines.len() - 1;
    }

    fn increment_time(&mut self, ctx: &TimelineContext, time: f32) {
        let tl = self.builder(ctx.current_timeline);
        let target = tl.current_time + time;
        tl.forward_time(target);
    }

    fn delay_on_context(&mut self, ctx: &TimelineContext, delay: f32) {
        if delay > 0.0 {
            let Compilation {
                timelines, globals, ..
            } = self;
            timelines[ctx.current_timeline]
                .as_builder_mut()
                .delay_next_step(globals, delay);
        }
    }

    fn merge_into(&mut self, target: usize, source: usize) {
        if target == source {
            return;
        }
        let Compilation {
            timelines, globals, ..
        } = self;
        let (dst, src) = two_builders(timelines, target, source);
        dst.merge_timeline_collected_styles(globals, src);
    }

    fn visit(&mut self, node: &AnimationNode, ctx: &mut TimelineContext) {
        match node {
            AnimationNode::Trigger(_) | AnimationNode::State(_) | AnimationNode::Transition(_) => {
                // Container nodes are consumed by the trigger builder; hitting
                // one here means the validator let a malformed tree through.
                self.errors.push(BuildError::MisplacedNode { kind: node.kind() });
            }
            AnimationNode::Sequence(ast) => self.visit_sequence(ast, ctx),
            AnimationNode::Group(ast) => self.visit_group(ast, ctx),
            AnimationNode::Animate(ast) => self.visit_animate(ast, ctx),
            AnimationNode::Style(ast) => self.visit_style(ast, ctx),
            AnimationNode::Keyframes(ast) => self.visit_keyframes(ast, ctx),
            AnimationNode::Reference(ast) => self.visit_reference(ast, ctx),
            AnimationNode::AnimateChild(ast) => self.visit_animate_child(ast, ctx),
            AnimationNode::AnimateRef(ast) => self.visit_animate_ref(ast, ctx),
            AnimationNode::Query(ast) => self.visit_query(ast, ctx),
            AnimationNode::Stagger(ast) => self.visit_stagger(ast, ctx),
        }
    }

    fn visit_sequence(&mut self, ast: &SequenceAst, ctx: &mut TimelineContext) {
        let has_own_options = ast
            .options
            .as_ref()
            .map(|o| o.params.is_some() || o.delay.is_some())
            .unwrap_or(false);

        if has_own_options {
            let mut sub = self.create_sub_context(ctx, ast.options.as_ref(), None, None);
            self.transform_into_new_timeline(&mut sub, None);
            if let Some(delay_value) = ast.options.as_ref().and_then(|o| o.delay.as_ref()) {
                if sub.previous_node == PrevNode::Style {
                    let Compilation {
                        timelines, globals, ..
                    } = self;
                    timelines[sub.current_timeline]
                        .as_builder_mut()
                        .snapshot_current_styles(globals);
                    sub.previous_node = PrevNode::Noop;
                }
                let delay = resolve_timing_value(delay_value, &mut self.errors);
                self.delay_on_context(&sub, delay);
            }
            self.run_sequence_steps(ast, &mut sub);
        } else {
            self.run_sequence_steps(ast, ctx);
        }
        ctx.previous_node = PrevNode::Other;
    }

    fn run_sequence_steps(&mut self, ast: &SequenceAst, ctx: &mut TimelineContext) {
        if ast.steps.is_empty() {
            return;
        }
        let before = ctx.sub_context_count;
        for step in &ast.steps {
            self.visit(step, ctx);
        }
        // The inner steps may end with a bare style() call; commit it. And if
        // anything in here spawned a sub timeline, nothing scheduled after
        // the sequence may overlap its contents.
        self.builder(ctx.current_timeline).apply_styles_to_keyframe();
        if ctx.sub_context_count > before {
            self.transform_into_new_timeline(ctx, None);
        }
    }

    fn visit_group(&mut self, ast: &GroupAst, ctx: &mut TimelineContext) {
        let mut inner_timelines: Vec<usize> = Vec::new();
        let mut furthest = self.current_time(ctx.current_timeline);
        let delay = match ast.options.as_ref().and_then(|o| o.delay.as_ref()) {
            Some(d) => resolve_timing_value(d, &mut self.errors),
            None => 0.0,
        };

        for step in &ast.steps {
            let mut inner = self.create_sub_context(ctx, ast.options.as_ref(), None, None);
            if delay > 0.0 {
                self.delay_on_context(&inner, delay);
            }
            self.visit(step, &mut inner);
            furthest = furthest.max(self.current_time(inner.current_timeline));
            inner_timelines.push(inner.current_timeline);
        }

        // Merging runs after the full loop so no branch observes a partially
        // merged parent through the shared style history.
        for idx in inner_timelines {
            self.merge_into(ctx.current_timeline, idx);
        }
        self.transform_into_new_timeline(ctx, Some(furthest));
        ctx.previous_node = PrevNode::Other;
    }

    fn visit_animate(&mut self, ast: &AnimateAst, ctx: &mut TimelineContext) {
        let empty_params = HashMap::new();
        let params = ctx.options.params.as_ref().unwrap_or(&empty_params);
        let timings = resolve_timing(&ast.timings, params, &mut self.errors);
        ctx.current_animate_timings = Some(timings.clone());

        if timings.delay > 0.0 {
            self.increment_time(ctx, timings.delay);
            let Compilation {
                timelines, globals, ..
            } = self;
            timelines[ctx.current_timeline]
                .as_builder_mut()
                .snapshot_current_styles(globals);
        }

        match &*ast.style {
            AnimationNode::Keyframes(kf) => self.visit_keyframes(kf, ctx),
            AnimationNode::Style(style) => {
                self.increment_time(ctx, timings.duration);
                self.visit_style(style, ctx);
                self.builder(ctx.current_timeline).apply_styles_to_keyframe();
            }
            other => {
                self.errors.push(BuildError::MisplacedNode { kind: other.kind() });
            }
        }

        ctx.current_animate_timings = None;
        ctx.previous_node = PrevNode::Other;
    }

    fn visit_style(&mut self, ast: &StyleAst, ctx: &mut TimelineContext) {
        // A style() directly following an animate() (outside of one) needs a
        // held frame between the two.
        if ctx.current_animate_timings.is_none()
            && self.timelines[ctx.current_timeline]
                .as_builder()
                .has_current_style_properties()
        {
            self.builder(ctx.current_timeline).forward_frame();
        }

        let easing = ctx
            .current_animate_timings
            .as_ref()
            .and_then(|t| t.easing.clone())
            .or_else(|| ast.easing.clone());

        let Compilation {
            timelines,
            globals,
            errors,
            ..
        } = self;
        let tl = timelines[ctx.current_timeline].as_builder_mut();
        if ast.is_empty_step {
            tl.apply_empty_step(globals, easing.as_deref());
        } else {
            tl.set_styles(globals, &ast.styles, easing.as_deref(), errors, &ctx.options);
        }
        ctx.previous_node = PrevNode::Style;
    }

    fn visit_keyframes(&mut self, ast: &KeyframesAst, ctx: &mut TimelineContext) {
        let Some(timings) = ctx.current_animate_timings.clone() else {
            self.errors.push(BuildError::MisplacedNode { kind: "keyframes" });
            return;
        };
        let entry_time = self.current_time(ctx.current_timeline);
        let duration = timings.duration;

        let mut inner = self.create_sub_context(ctx, None, None, None);
        let inner_start = self.timelines[inner.current_timeline].as_builder().start_time;
        self.builder(inner.current_timeline).easing = timings.easing.clone();

        let step_count = ast.steps.len();
        for (i, step) in ast.steps.iter().enumerate() {
            let offset = step.offset.unwrap_or(if step_count > 1 {
                i as f32 / (step_count - 1) as f32
            } else {
                0.0
            });
            let Compilation {
                timelines,
                globals,
                errors,
                ..
            } = self;
            let tl = timelines[inner.current_timeline].as_builder_mut();
            tl.forward_time(inner_start + offset * duration);
            tl.set_styles(
                globals,
                &step.styles,
                step.easing.as_deref(),
                errors,
                &ctx.options,
            );
            tl.apply_styles_to_keyframe();
        }

        // The parent sees the child's collected end styles even when nothing
        // after the keyframes uses this timeline again.
        self.merge_into(ctx.current_timeline, inner.current_timeline);
        self.transform_into_new_timeline(ctx, Some(entry_time + duration));
        ctx.previous_node = PrevNode::Other;
    }

    fn visit_reference(&mut self, ast: &ReferenceAst, ctx: &mut TimelineContext) {
        update_options(&mut ctx.options, ast.options.as_ref(), &mut self.errors, true);
        self.visit(&ast.animation, ctx);
        ctx.previous_node = PrevNode::Other;
    }

    fn visit_animate_child(&mut self, ast: &AnimateChildAst, ctx: &mut TimelineContext) {
        let instructions = self
            .sub_instructions
            .and_then(|m| m.get(ctx.element))
            .cloned();
        if let Some(instructions) = instructions {
            let mut inner = self.create_sub_context(ctx, ast.options.as_ref(), None, None);
            let start_time = self.current_time(ctx.current_timeline);
            let end_time = self.visit_sub_instructions(&instructions, &mut inner);
            if start_time != end_time {
                self.transform_into_new_timeline(ctx, Some(end_time));
            }
        }
        ctx.previous_node = PrevNode::Other;
    }

    fn visit_animate_ref(&mut self, ast: &AnimateRefAst, ctx: &mut TimelineContext) {
        let mut inner = self.create_sub_context(ctx, ast.options.as_ref(), None, None);
        self.transform_into_new_timeline(&mut inner, None);

        for options in [ast.options.as_ref(), ast.animation.options.as_ref()] {
            let Some(options) = options else { continue };
            let Some(delay_value) = options.delay.as_ref() else {
                continue;
            };
            let delay = match delay_value {
                TimingValue::Number(n) => *n,
                TimingValue::Expr(expr) => {
                    let empty = HashMap::new();
                    let params = options.params.as_ref().unwrap_or(&empty);
                    let substituted =
                        interpolate_params(&StyleValue::Text(expr.clone()), params, &mut self.errors);
                    resolve_timing_value(&TimingValue::Expr(substituted.as_text()), &mut self.errors)
                }
            };
            self.delay_on_context(&inner, delay);
        }

        self.visit_reference(&ast.animation, &mut inner);
        let end = self.current_time(inner.current_timeline);
        self.transform_into_new_timeline(ctx, Some(end));
        ctx.previous_node = PrevNode::Other;
    }

    fn visit_sub_instructions(
        &mut self,
        instructions: &[TimelineInstruction],
        ctx: &mut TimelineContext,
    ) -> f32 {
        let start_time = self.current_time(ctx.current_timeline);
        let mut furthest = start_time;

        let duration = ctx
            .options
            .duration
            .as_ref()
            .map(|d| resolve_timing_value(d, &mut self.errors));
        let delay = ctx
            .options
            .delay
            .as_ref()
            .map(|d| resolve_timing_value(d, &mut self.errors));

        // duration: 0 is the explicit "skip the child animation" form.
        if duration != Some(0.0) {
            for instruction in instructions {
                let timings = self.append_instruction_to_timeline(ctx, instruction, duration, delay);
                furthest = furthest.max(timings.duration + timings.delay);
            }
        }
        furthest
    }

    fn append_instruction_to_timeline(
        &mut self,
        ctx: &TimelineContext,
        instruction: &TimelineInstruction,
        duration: Option<f32>,
        delay: Option<f32>,
    ) -> Timing {
        let updated = Timing {
            duration: duration.unwrap_or(instruction.duration),
            delay: self.current_time(ctx.current_timeline) + delay.unwrap_or(0.0) + instruction.delay,
            easing: None,
        };
        self.timelines.push(TimelineSlot::Sub(SubTimelineBuilder::new(
            instruction,
            updated.clone(),
        )));
        updated
    }

    fn visit_query(&mut self, ast: &QueryAst, ctx: &mut TimelineContext) {
        let start_time = self.current_time(ctx.current_timeline);
        let delay = match ast.options.as_ref().and_then(|o| o.delay.as_ref()) {
            Some(d) => resolve_timing_value(d, &mut self.errors),
            None => 0.0,
        };

        // A style step right before a delayed query must land before the
        // queried children animate.
        if delay > 0.0
            && (ctx.previous_node == PrevNode::Style
                || (start_time == 0.0
                    && self.timelines[ctx.current_timeline]
                        .as_builder()
                        .has_current_style_properties()))
        {
            let Compilation {
                timelines, globals, ..
            } = self;
            timelines[ctx.current_timeline]
                .as_builder_mut()
                .snapshot_current_styles(globals);
            ctx.previous_node = PrevNode::Noop;
        }

        let mut furthest = start_time;
        let elms = self.invoke_query(ctx, ast);
        ctx.current_query_total = elms.len();
        let mut same_element_timeline: Option<usize> = None;

        for (i, element) in elms.iter().enumerate() {
            ctx.current_query_index = i;
            let mut inner = self.create_sub_context(ctx, ast.options.as_ref(), Some(*element), None);
            if delay > 0.0 {
                self.delay_on_context(&inner, delay);
            }
            if *element == ctx.element {
                same_element_timeline = Some(inner.current_timeline);
            }
            self.visit(&ast.animation, &mut inner);
            // Branches that end on a bare style() still commit.
            self.builder(inner.current_timeline).apply_styles_to_keyframe();
            furthest = furthest.max(self.current_time(inner.current_timeline));
        }

        ctx.current_query_total = 0;
        ctx.current_query_index = 0;
        self.transform_into_new_timeline(ctx, Some(furthest));

        if let Some(same_tl) = same_element_timeline {
            self.merge_into(ctx.current_timeline, same_tl);
            let Compilation {
                timelines, globals, ..
            } = self;
            timelines[ctx.current_timeline]
                .as_builder_mut()
                .snapshot_current_styles(globals);
        }
        ctx.previous_node = PrevNode::Other;
    }

    fn invoke_query(&mut self, ctx: &TimelineContext, ast: &QueryAst) -> Vec<NodeId> {
        let mut results: Vec<NodeId> = Vec::new();
        if ast.include_self {
            results.push(ctx.element);
        }
        if !ast.selector.is_empty() {
            let selector = ast
                .selector
                .replace(":enter", &format!(".{}", self.enter_marker))
                .replace(":leave", &format!(".{}", self.leave_marker));
            let multi = ast.limit != 1;
            let mut elements = self.driver.query(ctx.element, &selector, multi);
            if ast.limit != 0 {
                if ast.limit < 0 {
                    let keep = (-ast.limit) as usize;
                    let start = elements.len().saturating_sub(keep);
                    elements.drain(..start);
                } else {
                    elements.truncate(ast.limit as usize);
                }
            }
            results.extend(elements);
        }
        if !ast.optional && results.is_empty() {
            self.errors.push(BuildError::QueryMatchedNoElements {
                selector: ast.original_selector.clone(),
            });
        }
        results
    }

    fn visit_stagger(&mut self, ast: &StaggerAst, ctx: &mut TimelineContext) {
        let timeline_at_entry = ctx.current_timeline;
        let duration = ast.timings.duration.abs();
        let max_time = duration * (ctx.current_query_total.saturating_sub(1)) as f32;
        let mut delay = duration * ctx.current_query_index as f32;

        if ast.timings.duration < 0.0 {
            delay = max_time - delay;
        } else if ast.timings.easing.as_deref() == Some("full") {
            delay = ctx
                .parent_stagger
                .as_ref()
                .map(|s| s.get())
                .unwrap_or(0.0);
        }

        if delay > 0.0 {
            let Compilation {
                timelines, globals, ..
            } = self;
            timelines[ctx.current_timeline]
                .as_builder_mut()
                .delay_next_step(globals, delay);
        }
        let starting_time = self.current_time(ctx.current_timeline);

        self.visit(&ast.animation, ctx);
        ctx.previous_node = PrevNode::Other;

        // The accumulated time covers both a timeline delay and a stretched
        // starting keyframe, whichever the inner animation produced.
        if let Some(parent_stagger) = &ctx.parent_stagger {
            let tl = self.timelines[timeline_at_entry].as_builder();
            let parent_start = ctx
                .parent_timeline
                .map(|i| self.timelines[i].as_builder().start_time)
                .unwrap_or(0.0);
            parent_stagger
                .set((tl.current_time - starting_time) + (tl.start_time - parent_start));
        }
    }
}

fn update_options(
    target: &mut AnimationOptions,
    incoming: Option<&AnimationOptions>,
    errors: &mut Vec<BuildError>,
    skip_if_exists: bool,
) {
    let Some(incoming) = incoming else { return };
    if let Some(d) = &incoming.duration {
        target.duration = Some(TimingValue::Number(resolve_timing_value(d, errors)));
    }
    if let Some(d) = &incoming.delay {
        target.delay = Some(TimingValue::Number(resolve_timing_value(d, errors)));
    }
    if let Some(new_params) = &incoming.params {
        let params = target.params.get_or_insert_with(HashMap::new);
        for (name, value) in new_params {
            if !skip_if_exists || !params.contains_key(name) {
                let existing = params.clone();
                let value = interpolate_params(value, &existing, errors);
                params.insert(name.clone(), value);
            }
        }
    }
}

fn two_builders(
    timelines: &mut [TimelineSlot],
    target: usize,
    source: usize,
) -> (&mut TimelineBuilder, &TimelineBuilder) {
    debug_assert_ne!(target, source);
    if target < source {
        let (left, right) = timelines.split_at_mut(source);
        (left[target].as_builder_mut(), right[0].as_builder())
    } else {
        let (left, right) = timelines.split_at_mut(target);
        (right[0].as_builder_mut(), left[source].as_builder())
    }
}
