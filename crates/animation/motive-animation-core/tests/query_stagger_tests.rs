use std::rc::Rc;

use motive_animation_core::{
    build_animation_timelines, AnimationNode, AnimationOptions, BuildError, NodeId, StyleMap,
    TimelineInstruction,
};
use motive_test_fixtures as fx;
use motive_test_fixtures::{MockAnimationDriver, MockHost};

struct QueryWorld {
    driver: Rc<MockAnimationDriver>,
    container: NodeId,
    items: Vec<NodeId>,
}

fn world(item_count: usize) -> QueryWorld {
    let host = MockHost::new();
    let body = host.add_node(None, "body", &[]);
    let container = host.add_node(Some(body), "ul", &["list"]);
    let items = (0..item_count)
        .map(|_| host.add_node(Some(container), "li", &["item"]))
        .collect();
    QueryWorld {
        driver: MockAnimationDriver::new(host),
        container,
        items,
    }
}

fn compile(world: &QueryWorld, node: &AnimationNode) -> (Vec<TimelineInstruction>, Vec<BuildError>) {
    let mut errors = Vec::new();
    let instructions = build_animation_timelines(
        &*world.driver,
        world.container,
        node,
        "mv-enter",
        "mv-leave",
        &StyleMap::new(),
        &StyleMap::new(),
        &AnimationOptions::default(),
        None,
        &mut errors,
    );
    (instructions, errors)
}

fn delay_for(instructions: &[TimelineInstruction], element: NodeId) -> f32 {
    instructions
        .iter()
        .find(|i| i.element == element)
        .unwrap_or_else(|| panic!("no instruction for {element}"))
        .delay
}

/// it should delay node i by perNodeDuration * i
#[test]
fn stagger_ordering() {
    let w = world(3);
    let animation = fx::sequence(vec![fx::query(
        ".item",
        fx::stagger("100ms", fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))]))),
    )]);
    let (instructions, errors) = compile(&w, &animation);
    assert!(errors.is_empty());

    assert_eq!(delay_for(&instructions, w.items[0]), 0.0);
    assert_eq!(delay_for(&instructions, w.items[1]), 100.0);
    assert_eq!(delay_for(&instructions, w.items[2]), 200.0);
    for i in &instructions {
        if w.items.contains(&i.element) {
            assert_eq!(i.duration, 500.0);
        }
    }
}

/// it should reverse the stagger order for a negative duration
#[test]
fn stagger_reversed() {
    let w = world(3);
    let animation = fx::sequence(vec![fx::query(
        ".item",
        fx::stagger("-100ms", fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))]))),
    )]);
    let (instructions, errors) = compile(&w, &animation);
    assert!(errors.is_empty());

    assert_eq!(delay_for(&instructions, w.items[0]), 200.0);
    assert_eq!(delay_for(&instructions, w.items[1]), 100.0);
    assert_eq!(delay_for(&instructions, w.items[2]), 0.0);
}

/// it should chain each node after the previous one with stagger("full")
#[test]
fn stagger_full_accumulates() {
    let w = world(3);
    let animation = fx::sequence(vec![fx::query(
        ".item",
        fx::stagger("full", fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))]))),
    )]);
    let (instructions, errors) = compile(&w, &animation);
    assert!(errors.is_empty());

    assert_eq!(delay_for(&instructions, w.items[0]), 0.0);
    assert_eq!(delay_for(&instructions, w.items[1]), 500.0);
    assert_eq!(delay_for(&instructions, w.items[2]), 1000.0);
}

/// it should honor a positive limit and count negative limits from the tail
#[test]
fn query_limits() {
    let w = world(4);
    let limited = fx::sequence(vec![fx::query_opt(
        ".item",
        fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))])),
        None,
        2,
        false,
    )]);
    let (instructions, errors) = compile(&w, &limited);
    assert!(errors.is_empty());
    let targets: Vec<NodeId> = instructions.iter().map(|i| i.element).collect();
    assert_eq!(targets, vec![w.items[0], w.items[1]]);

    let from_tail = fx::sequence(vec![fx::query_opt(
        ".item",
        fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))])),
        None,
        -1,
        false,
    )]);
    let (instructions, errors) = compile(&w, &from_tail);
    assert!(errors.is_empty());
    let targets: Vec<NodeId> = instructions.iter().map(|i| i.element).collect();
    assert_eq!(targets, vec![w.items[3]]);
}

/// it should record an error for a non-optional query with no matches and
/// stay silent for an optional one
#[test]
fn query_optionality() {
    let w = world(0);
    let required = fx::sequence(vec![fx::query(
        ".missing",
        fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))])),
    )]);
    let (_, errors) = compile(&w, &required);
    assert!(errors
        .iter()
        .any(|e| matches!(e, BuildError::QueryMatchedNoElements { selector } if selector == ".missing")));

    let optional = fx::sequence(vec![fx::query_opt(
        ".missing",
        fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))])),
        None,
        0,
        true,
    )]);
    let (_, errors) = compile(&w, &optional);
    assert!(errors.is_empty());
}

/// it should substitute the synthetic enter marker for :enter queries
#[test]
fn enter_marker_substitution() {
    let w = world(3);
    use motive_animation_core::AnimationDriver;
    w.driver.add_marker(w.items[0], "mv-enter7");
    w.driver.add_marker(w.items[2], "mv-enter7");

    let animation = fx::sequence(vec![fx::query_opt(
        ":enter",
        fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))])),
        None,
        0,
        true,
    )]);
    let mut errors = Vec::new();
    let instructions = build_animation_timelines(
        &*w.driver,
        w.container,
        &animation,
        "mv-enter7",
        "mv-leave7",
        &StyleMap::new(),
        &StyleMap::new(),
        &AnimationOptions::default(),
        None,
        &mut errors,
    );
    assert!(errors.is_empty());
    let targets: Vec<NodeId> = instructions.iter().map(|i| i.element).collect();
    assert_eq!(targets, vec![w.items[0], w.items[2]]);
}

/// it should include the queried root itself with :self
#[test]
fn query_includes_self() {
    let w = world(2);
    let animation = fx::sequence(vec![fx::query(
        ":self .item",
        fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))])),
    )]);
    let (instructions, errors) = compile(&w, &animation);
    assert!(errors.is_empty());
    let targets: Vec<NodeId> = instructions.iter().map(|i| i.element).collect();
    assert_eq!(targets, vec![w.container, w.items[0], w.items[1]]);
}
