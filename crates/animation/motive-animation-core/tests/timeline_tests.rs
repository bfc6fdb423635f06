use hashbrown::HashMap;

use motive_animation_core::{
    build_animation_timelines, AnimationNode, AnimationOptions, NodeId, NoopAnimationDriver,
    StyleMap, StyleValue, TimelineInstruction,
};
use motive_api_core::ast::TimingValue;
use motive_test_fixtures as fx;

fn compile(node: &AnimationNode) -> Vec<TimelineInstruction> {
    compile_with_options(node, AnimationOptions::default())
}

fn compile_with_options(
    node: &AnimationNode,
    options: AnimationOptions,
) -> Vec<TimelineInstruction> {
    let driver = NoopAnimationDriver::new();
    let mut errors = Vec::new();
    let instructions = build_animation_timelines(
        &driver,
        NodeId(1),
        node,
        "mv-enter",
        "mv-leave",
        &StyleMap::new(),
        &StyleMap::new(),
        &options,
        None,
        &mut errors,
    );
    assert!(errors.is_empty(), "unexpected build errors: {errors:?}");
    instructions
}

fn offsets(instruction: &TimelineInstruction) -> Vec<f32> {
    instruction.keyframes.iter().map(|k| k.offset).collect()
}

/// it should backfill a property that appears late so earlier keyframes hold
/// a value instead of a gap
#[test]
fn backfill_completeness() {
    let animation = fx::sequence(vec![
        fx::style(&[("width", fx::num(0.0))]),
        fx::animate("1s", fx::style(&[("width", fx::num(100.0))])),
        fx::animate(
            "1s",
            fx::style(&[("width", fx::num(200.0)), ("height", fx::num(50.0))]),
        ),
    ]);
    let instructions = compile(&animation);
    assert_eq!(instructions.len(), 1);
    let instruction = &instructions[0];
    assert_eq!(instruction.duration, 2000.0);
    assert_eq!(offsets(instruction), vec![0.0, 0.5, 1.0]);

    let first = &instruction.keyframes[0];
    let held = first.styles.get("height").expect("height is backfilled");
    assert!(held.is_auto(), "backfill uses the auto sentinel");
    assert!(instruction
        .post_style_props
        .contains(&"height".to_string()));
    assert_eq!(
        instruction.keyframes[2].styles.get("height"),
        Some(&StyleValue::Number(50.0))
    );
}

/// it should emit non-decreasing offsets with 0 and 1 at the ends, and
/// recomputing time from offsets round-trips within 3 decimals
#[test]
fn offset_monotonicity_and_round_trip() {
    let animation = fx::sequence(vec![
        fx::style(&[("opacity", fx::num(0.0))]),
        fx::animate("250ms", fx::style(&[("opacity", fx::num(0.25))])),
        fx::animate("750ms", fx::style(&[("opacity", fx::num(0.75))])),
        fx::animate("1s", fx::style(&[("opacity", fx::num(1.0))])),
    ]);
    let instructions = compile(&animation);
    let instruction = &instructions[0];
    let offs = offsets(instruction);

    assert_eq!(*offs.first().unwrap(), 0.0);
    assert_eq!(*offs.last().unwrap(), 1.0);
    for pair in offs.windows(2) {
        assert!(pair[0] <= pair[1], "offsets must be non-decreasing: {offs:?}");
    }

    let expected_times = [0.0, 250.0, 1000.0, 2000.0];
    for (offset, expected) in offs.iter().zip(expected_times) {
        let recomputed = offset * instruction.duration;
        assert!(
            (recomputed - expected).abs() <= instruction.duration * 0.001 + 0.5,
            "offset {offset} should map back to {expected}ms"
        );
    }
}

fn merged_end_styles(instructions: &[TimelineInstruction]) -> HashMap<String, StyleValue> {
    let mut out = HashMap::new();
    for instruction in instructions {
        if let Some(last) = instruction.keyframes.last() {
            for (prop, value) in &last.styles {
                out.insert(prop.clone(), value.clone());
            }
        }
    }
    out
}

/// it should produce identical merged end styles for a group regardless of
/// branch declaration order
#[test]
fn group_merge_idempotence() {
    let a = fx::animate("1s", fx::style(&[("width", fx::num(100.0))]));
    let b = fx::animate("1s", fx::style(&[("height", fx::num(50.0))]));

    let forward = compile(&fx::sequence(vec![fx::group_of(vec![a.clone(), b.clone()])]));
    let reverse = compile(&fx::sequence(vec![fx::group_of(vec![b, a])]));

    assert_eq!(merged_end_styles(&forward), merged_end_styles(&reverse));
}

/// it should collapse a single-instant timeline into the 2-keyframe
/// zero-duration form
#[test]
fn zero_duration_instant() {
    let instructions = compile(&fx::sequence(vec![fx::style(&[("opacity", fx::num(0.0))])]));
    assert_eq!(instructions.len(), 1);
    let instruction = &instructions[0];
    assert_eq!(instruction.duration, 0.0);
    assert_eq!(offsets(instruction), vec![0.0, 1.0]);
    assert_eq!(
        instruction.keyframes[0].styles.get("opacity"),
        Some(&StyleValue::Number(0.0))
    );
}

/// it should map keyframe steps into the enclosing animate window
#[test]
fn keyframes_offsets() {
    let animation = fx::sequence(vec![fx::animate_keyframes(
        "1s",
        vec![
            fx::kf_step(Some(0.0), &[("opacity", fx::num(0.0))]),
            fx::kf_step(Some(0.25), &[("opacity", fx::num(0.5))]),
            fx::kf_step(Some(1.0), &[("opacity", fx::num(1.0))]),
        ],
    )]);
    let instructions = compile(&animation);
    assert_eq!(instructions.len(), 1);
    let instruction = &instructions[0];
    assert_eq!(instruction.duration, 1000.0);
    assert_eq!(offsets(instruction), vec![0.0, 0.25, 1.0]);
}

/// it should space keyframe steps evenly when offsets are omitted
#[test]
fn keyframes_even_spacing() {
    let animation = fx::sequence(vec![fx::animate_keyframes(
        "1s",
        vec![
            fx::kf_step(None, &[("opacity", fx::num(0.0))]),
            fx::kf_step(None, &[("opacity", fx::num(0.5))]),
            fx::kf_step(None, &[("opacity", fx::num(1.0))]),
        ],
    )]);
    let instructions = compile(&animation);
    assert_eq!(offsets(&instructions[0]), vec![0.0, 0.5, 1.0]);
}

/// it should pin all known properties to auto for an empty animate step
#[test]
fn empty_step_pins_auto() {
    let animation = fx::sequence(vec![
        fx::style(&[("width", fx::num(0.0))]),
        fx::animate_empty("1s"),
    ]);
    let instructions = compile(&animation);
    let instruction = &instructions[0];
    assert_eq!(instruction.keyframes.len(), 2);
    assert_eq!(
        instruction.keyframes[0].styles.get("width"),
        Some(&StyleValue::Number(0.0))
    );
    assert!(instruction.keyframes[1]
        .styles
        .get("width")
        .expect("width pinned")
        .is_auto());
    assert!(instruction.post_style_props.contains(&"width".to_string()));
}

/// it should fold a sequence-level delay into the instruction delay
#[test]
fn sequence_options_delay() {
    let animation = AnimationNode::Sequence(motive_api_core::ast::SequenceAst {
        steps: vec![fx::animate("1s", fx::style(&[("width", fx::num(10.0))]))],
        options: Some(AnimationOptions {
            delay: Some(TimingValue::Number(500.0)),
            ..Default::default()
        }),
    });
    let instructions = compile(&animation);
    assert_eq!(instructions.len(), 1);
    assert_eq!(instructions[0].delay, 500.0);
    assert_eq!(instructions[0].duration, 1000.0);
}

/// it should substitute animation params into style values and timings
#[test]
fn params_substitution() {
    let mut params = HashMap::new();
    params.insert("target".to_string(), StyleValue::Number(320.0));
    let animation = fx::sequence(vec![fx::animate(
        "1s",
        fx::style(&[("width", fx::text("{{ target }}px"))]),
    )]);
    let instructions = compile_with_options(
        &animation,
        AnimationOptions {
            params: Some(params),
            ..Default::default()
        },
    );
    let last = instructions[0].keyframes.last().unwrap();
    assert_eq!(
        last.styles.get("width"),
        Some(&StyleValue::Text("320px".into()))
    );
}

/// it should report a missing param instead of aborting the pass
#[test]
fn missing_param_is_recorded() {
    let driver = NoopAnimationDriver::new();
    let mut errors = Vec::new();
    let animation = fx::sequence(vec![fx::animate(
        "1s",
        fx::style(&[("width", fx::text("{{ nope }}px"))]),
    )]);
    let instructions = build_animation_timelines(
        &driver,
        NodeId(1),
        &animation,
        "mv-enter",
        "mv-leave",
        &StyleMap::new(),
        &StyleMap::new(),
        &AnimationOptions::default(),
        None,
        &mut errors,
    );
    assert!(!instructions.is_empty());
    assert!(errors
        .iter()
        .any(|e| matches!(e, motive_animation_core::BuildError::MissingParameter { name } if name == "nope")));
}
