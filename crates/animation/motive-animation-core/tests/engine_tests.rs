use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

use motive_animation_core::driver::AnimationDriver;
use motive_animation_core::{
    NamespaceId, NodeId, StyleValue, TransitionEngine, TriggerValue,
};
use motive_api_core::ast::{AnimationOptions, StateAst, StyleAst, StyleTuple};
use motive_api_core::events::PlayerPhase;
use motive_api_core::style::style_map;
use motive_test_fixtures as fx;
use motive_test_fixtures::{MockAnimationDriver, MockHost};

const NS: NamespaceId = NamespaceId(1);

struct World {
    engine: TransitionEngine,
    driver: Rc<MockAnimationDriver>,
    host: MockHost,
    body: NodeId,
}

fn world() -> World {
    let host = MockHost::new();
    let body = host.add_node(None, "body", &[]);
    let driver = MockAnimationDriver::new(host.clone());
    let dyn_driver: Rc<dyn AnimationDriver> = driver.clone();
    let engine = TransitionEngine::new(dyn_driver, Some(body));
    engine.register(NS, body);
    World {
        engine,
        driver,
        host,
        body,
    }
}

fn open_close_trigger() -> motive_api_core::ast::TriggerAst {
    fx::trigger_def(
        "openClose",
        vec![
            fx::state_def("open", fx::styles(&[("height", fx::num(100.0))])),
            fx::state_def("closed", fx::styles(&[("height", fx::num(0.0))])),
        ],
        vec![fx::transition(
            "open",
            "closed",
            fx::animate("1s", fx::style(&[("height", fx::num(0.0))])),
        )],
    )
}

/// it should apply state styles without a player when no transition matches,
/// and animate through the driver when one does
#[test]
fn matched_and_fallback_transitions() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    w.engine.register_trigger(NS, "openClose", &open_close_trigger());

    assert!(w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into())));
    w.engine.flush(1);
    assert_eq!(w.driver.calls(), 0, "unmatched transition renders nothing");
    assert_eq!(w.host.style_of(el, "height"), Some(StyleValue::Number(100.0)));

    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("closed".into()));
    w.engine.flush(2);
    assert_eq!(w.driver.calls(), 1);
    let call = w.driver.call(0);
    assert_eq!(call.element, el);
    assert_eq!(call.duration, 1000.0);
    assert_eq!(w.engine.players_count(), 1);

    w.driver.finish_all();
    assert_eq!(w.engine.players_count(), 0, "done players self-unregister");
    assert_eq!(w.host.style_of(el, "height"), Some(StyleValue::Number(0.0)));
}

/// it should produce no queue entry and no player for a same-value trigger
#[test]
fn state_no_op() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    w.engine.register_trigger(NS, "openClose", &open_close_trigger());

    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into()));
    w.engine.flush(1);
    let styled = w.host.style_of(el, "height");

    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into()));
    assert_eq!(w.engine.queued_players_count(), 0);
    w.engine.flush(2);

    assert_eq!(w.driver.calls(), 0);
    assert_eq!(w.engine.players_count(), 0);
    assert_eq!(w.host.style_of(el, "height"), styled);
}

/// it should patch end styles directly for a param-only change
#[test]
fn param_only_change_patches_styles() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);

    let sized = StyleAst {
        styles: vec![StyleTuple::Styles(style_map([(
            "width",
            StyleValue::Text("{{ w }}px".into()),
        )]))],
        ..Default::default()
    };
    let trigger = fx::trigger_def(
        "size",
        vec![StateAst {
            name: "open".into(),
            style: sized,
            options: Some(AnimationOptions {
                params: Some(HashMap::from_iter([(
                    "w".to_string(),
                    StyleValue::Number(0.0),
                )])),
                ..Default::default()
            }),
        }],
        vec![],
    );
    w.engine.register_trigger(NS, "size", &trigger);

    let with_params = |v: f32| TriggerValue::WithOptions {
        value: Box::new(TriggerValue::Value("open".into())),
        options: AnimationOptions {
            params: Some(HashMap::from_iter([("w".to_string(), StyleValue::Number(v))])),
            ..Default::default()
        },
    };

    w.engine.trigger(NS, el, "size", with_params(100.0));
    w.engine.flush(1);
    assert_eq!(w.host.style_of(el, "width"), Some(StyleValue::Text("100px".into())));

    w.engine.trigger(NS, el, "size", with_params(200.0));
    assert_eq!(w.engine.queued_players_count(), 0, "no transition is queued");
    w.engine.flush(2);
    assert_eq!(w.driver.calls(), 0);
    assert_eq!(w.host.style_of(el, "width"), Some(StyleValue::Text("200px".into())));
}

/// it should cancel a still-queued player when the same trigger fires again
/// before the flush
#[test]
fn later_trigger_cancels_queued_player() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    w.engine.register_trigger(NS, "openClose", &open_close_trigger());

    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into()));
    w.engine.flush(1);

    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("closed".into()));
    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into()));
    w.engine.flush(2);

    assert_eq!(w.driver.calls(), 0, "the matched transition was cancelled");
    assert_eq!(
        w.host.style_of(el, "height"),
        Some(StyleValue::Number(100.0)),
        "the later state's styles win"
    );
}

/// it should deliver start and done listener events with state values
#[test]
fn listener_phases() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    w.engine.register_trigger(NS, "openClose", &open_close_trigger());

    let events: Rc<RefCell<Vec<(PlayerPhase, String, String)>>> = Rc::new(RefCell::new(Vec::new()));
    for phase in ["start", "done"] {
        let sink = events.clone();
        let _unlisten = w.engine.listen(
            NS,
            el,
            "openClose",
            phase,
            Box::new(move |e| {
                sink.borrow_mut()
                    .push((e.phase, e.from_state.clone(), e.to_state.clone()));
            }),
        );
    }

    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into()));
    w.engine.flush(1);
    {
        let seen = events.borrow();
        assert_eq!(seen.len(), 2, "fallback still reports start/done");
        assert_eq!(seen[0], (PlayerPhase::Start, "void".into(), "open".into()));
        assert_eq!(seen[1], (PlayerPhase::Done, "void".into(), "open".into()));
    }

    events.borrow_mut().clear();
    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("closed".into()));
    w.engine.flush(2);
    assert_eq!(events.borrow().len(), 1, "start fires when playback begins");
    w.driver.finish_all();
    let seen = events.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, PlayerPhase::Start);
    assert_eq!(seen[1], (PlayerPhase::Done, "open".into(), "closed".into()));
}

/// it should run the leave animation before reporting removal completion
#[test]
fn removal_waits_for_leave_animation() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    let trigger = fx::trigger_def(
        "host",
        vec![fx::state_def("shown", fx::styles(&[("opacity", fx::num(1.0))]))],
        vec![fx::transition(
            "*",
            "void",
            fx::animate("1s", fx::style(&[("opacity", fx::num(0.0))])),
        )],
    );
    w.engine.register_trigger(NS, "host", &trigger);

    let removed: Rc<RefCell<Vec<NodeId>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = removed.clone();
    w.engine
        .set_on_removal_complete(Box::new(move |node, _| sink.borrow_mut().push(node)));

    w.engine.trigger(NS, el, "host", TriggerValue::Value("shown".into()));
    w.engine.flush(1);

    w.engine.remove_node(Some(NS), el, None);
    w.engine.flush(2);
    assert_eq!(w.driver.calls(), 1, "the leave animation runs");
    assert!(removed.borrow().is_empty(), "removal waits for the player");

    w.driver.finish_all();
    assert_eq!(removed.borrow().as_slice(), &[el]);
}

/// it should report removal immediately when no leave state exists
#[test]
fn removal_without_state_is_immediate() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);

    let removed: Rc<RefCell<Vec<NodeId>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = removed.clone();
    w.engine
        .set_on_removal_complete(Box::new(move |node, _| sink.borrow_mut().push(node)));

    w.engine.remove_node(Some(NS), el, None);
    assert_eq!(removed.borrow().as_slice(), &[el]);
}

/// it should build descendant instructions before the ancestor consumes them
#[test]
fn descendant_built_before_ancestor_consumes() {
    let w = world();
    let parent = w.host.add_node(Some(w.body), "div", &["parent"]);
    let child = w.host.add_node(Some(parent), "div", &["child"]);

    let parent_trigger = fx::trigger_def(
        "parentT",
        vec![],
        vec![fx::transition(
            "a",
            "b",
            fx::sequence(vec![fx::query(
                ".child",
                motive_api_core::ast::AnimationNode::AnimateChild(Default::default()),
            )]),
        )],
    );
    let child_trigger = fx::trigger_def(
        "childT",
        vec![],
        vec![fx::transition(
            "a",
            "b",
            fx::animate("1s", fx::style(&[("opacity", fx::num(0.0))])),
        )],
    );
    w.engine.register_trigger(NS, "parentT", &parent_trigger);
    w.engine.register_trigger(NS, "childT", &child_trigger);

    w.engine.trigger(NS, parent, "parentT", TriggerValue::Value("a".into()));
    w.engine.trigger(NS, child, "childT", TriggerValue::Value("a".into()));
    w.engine.flush(1);
    assert_eq!(w.driver.calls(), 0);

    // Parent queued first; the flush must still build the child first so the
    // parent's query can splice it.
    w.engine.trigger(NS, parent, "parentT", TriggerValue::Value("b".into()));
    w.engine.trigger(NS, child, "childT", TriggerValue::Value("b".into()));
    w.engine.flush(2);

    let child_calls = w.driver.players_for(child);
    assert_eq!(child_calls.len(), 2, "own build plus the spliced copy");
    let played: Vec<_> = child_calls
        .iter()
        .filter(|p| p.log().contains(&"play".to_string()))
        .collect();
    assert_eq!(played.len(), 1, "only the consuming ancestor plays the child");
    assert_eq!(w.engine.players_count(), 1, "one root player for the parent");

    let spliced = w.driver.call(
        (0..w.driver.calls())
            .find(|i| {
                let c = w.driver.call(*i);
                c.element == child && c.player.log().contains(&"play".to_string())
            })
            .expect("a played child animation"),
    );
    let last = spliced.keyframes.last().expect("spliced keyframes present");
    assert_eq!(last.styles.get("opacity"), Some(&StyleValue::Number(0.0)));
}

/// it should animate entering nodes found by :enter queries in the same flush
#[test]
fn enter_query_in_flush() {
    let w = world();
    let list = w.host.add_node(Some(w.body), "ul", &[]);
    let trigger = fx::trigger_def(
        "items",
        vec![],
        vec![fx::transition(
            "*",
            "*",
            fx::query_opt(
                ":enter",
                fx::animate("500ms", fx::style(&[("opacity", fx::num(1.0))])),
                None,
                0,
                true,
            ),
        )],
    );
    w.engine.register_trigger(NS, "items", &trigger);

    w.engine.trigger(NS, list, "items", TriggerValue::Value("zero".into()));
    w.engine.flush(1);
    assert_eq!(w.driver.calls(), 0);

    let a = w.host.add_node(Some(list), "li", &["item"]);
    let b = w.host.add_node(Some(list), "li", &["item"]);
    w.engine.insert_node(Some(NS), a, Some(list), true);
    w.engine.insert_node(Some(NS), b, Some(list), true);
    w.engine.trigger(NS, list, "items", TriggerValue::Value("two".into()));
    w.engine.flush(2);

    let targets: Vec<NodeId> = (0..w.driver.calls()).map(|i| w.driver.call(i).element).collect();
    assert_eq!(targets, vec![a, b]);
}

/// it should skip animations under a disabled node but still land end styles
#[test]
fn disabled_subtree_skips_animation() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    w.engine.register_trigger(NS, "openClose", &open_close_trigger());
    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into()));
    w.engine.flush(1);

    w.engine.mark_element_as_disabled(el, true);
    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("closed".into()));
    w.engine.flush(2);

    assert_eq!(w.driver.calls(), 0, "disabled nodes render no animation");
    assert_eq!(w.host.style_of(el, "height"), Some(StyleValue::Number(0.0)));
}

/// it should run when_rendering_done callbacks once all players finish
#[test]
fn when_rendering_done() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    w.engine.register_trigger(NS, "openClose", &open_close_trigger());

    let done = Rc::new(RefCell::new(false));
    let flag = done.clone();
    w.engine.when_rendering_done(Box::new(move || *flag.borrow_mut() = true));
    assert!(*done.borrow(), "resolves immediately with no players");

    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("open".into()));
    w.engine.flush(1);
    w.engine.trigger(NS, el, "openClose", TriggerValue::Value("closed".into()));
    w.engine.flush(2);

    let done = Rc::new(RefCell::new(false));
    let flag = done.clone();
    w.engine.when_rendering_done(Box::new(move || *flag.borrow_mut() = true));
    assert!(!*done.borrow());
    w.driver.finish_all();
    assert!(*done.borrow());
}

/// it should aggregate structural errors through the reporter hook and start
/// nothing from the failed batch
#[test]
fn erroneous_flush_reports_and_starts_nothing() {
    let w = world();
    let el = w.host.add_node(Some(w.body), "div", &[]);
    let trigger = fx::trigger_def(
        "bad",
        vec![],
        vec![fx::transition(
            "a",
            "b",
            fx::query(
                ".missing",
                fx::animate("1s", fx::style(&[("opacity", fx::num(0.0))])),
            ),
        )],
    );
    w.engine.register_trigger(NS, "bad", &trigger);

    let reports = Rc::new(RefCell::new(0usize));
    let sink = reports.clone();
    w.engine
        .set_error_reporter(Box::new(move |_| *sink.borrow_mut() += 1));

    w.engine.trigger(NS, el, "bad", TriggerValue::Value("a".into()));
    w.engine.flush(1);
    assert_eq!(*reports.borrow(), 0, "the fallback first move is clean");

    w.engine.trigger(NS, el, "bad", TriggerValue::Value("b".into()));
    w.engine.flush(2);
    assert_eq!(*reports.borrow(), 1);
    assert_eq!(w.driver.calls(), 0);
    assert_eq!(w.engine.players_count(), 0);
}
