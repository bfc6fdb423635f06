use criterion::{criterion_group, criterion_main, Criterion};

use motive_animation_core::{
    build_animation_timelines, AnimationNode, AnimationOptions, NodeId, NoopAnimationDriver,
    StyleMap,
};
use motive_test_fixtures as fx;

fn medium_tree() -> AnimationNode {
    fx::sequence(vec![
        fx::style(&[("opacity", fx::num(0.0)), ("width", fx::num(0.0))]),
        fx::group_of(vec![
            fx::animate("250ms", fx::style(&[("opacity", fx::num(1.0))])),
            fx::animate("1s", fx::style(&[("width", fx::num(320.0))])),
        ]),
        fx::animate_keyframes(
            "500ms",
            vec![
                fx::kf_step(Some(0.0), &[("height", fx::num(0.0))]),
                fx::kf_step(Some(0.5), &[("height", fx::num(80.0))]),
                fx::kf_step(Some(1.0), &[("height", fx::num(64.0))]),
            ],
        ),
        fx::animate("250ms", fx::style(&[("opacity", fx::num(0.9))])),
    ])
}

fn bench_compile(c: &mut Criterion) {
    let driver = NoopAnimationDriver::new();
    let tree = medium_tree();
    let options = AnimationOptions::default();

    c.bench_function("compile_transition", |b| {
        b.iter(|| {
            let mut errors = Vec::new();
            let instructions = build_animation_timelines(
                &driver,
                NodeId(1),
                &tree,
                "mv-enter",
                "mv-leave",
                &StyleMap::new(),
                &StyleMap::new(),
                &options,
                None,
                &mut errors,
            );
            assert!(errors.is_empty());
            instructions
        })
    });
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
