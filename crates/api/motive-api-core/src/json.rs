//! JSON loader for authored animation trees.
//!
//! Validated trees normally arrive from the external builder; tooling and
//! fixtures author them as JSON using the serde shape of the AST types
//! (tagged by `"type"`).

use crate::ast::AnimationNode;

/// Parse an authored animation tree. Light invariants only; full shape
/// validation belongs to the external builder.
pub fn parse_animation_json(s: &str) -> Result<AnimationNode, String> {
    let node: AnimationNode = serde_json::from_str(s).map_err(|e| format!("parse error: {e}"))?;
    validate_basic(&node)?;
    Ok(node)
}

fn validate_basic(node: &AnimationNode) -> Result<(), String> {
    if let AnimationNode::Keyframes(kf) = node {
        let mut last = -f32::INFINITY;
        for step in &kf.steps {
            if let Some(offset) = step.offset {
                if !(0.0..=1.0).contains(&offset) || !offset.is_finite() {
                    return Err("keyframe offsets must be finite and in [0,1]".into());
                }
                if offset < last {
                    return Err("keyframe offsets must be non-decreasing".into());
                }
                last = offset;
            }
        }
    }
    match node {
        AnimationNode::Sequence(s) => s.steps.iter().try_for_each(validate_basic),
        AnimationNode::Group(g) => g.steps.iter().try_for_each(validate_basic),
        AnimationNode::Animate(a) => validate_basic(&a.style),
        AnimationNode::Query(q) => validate_basic(&q.animation),
        AnimationNode::Stagger(s) => validate_basic(&s.animation),
        AnimationNode::Reference(r) => validate_basic(&r.animation),
        AnimationNode::Transition(t) => validate_basic(&t.animation),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// it should parse a tagged sequence with style and animate steps
    #[test]
    fn parse_sequence() {
        let raw = r#"{
            "type": "sequence",
            "steps": [
                {"type": "style", "styles": [{"opacity": 0}]},
                {"type": "animate",
                 "timings": {"kind": "fixed", "duration": 500.0},
                 "style": {"type": "style", "styles": [{"opacity": 1}]}}
            ]
        }"#;
        let node = parse_animation_json(raw).expect("tree should parse");
        match node {
            AnimationNode::Sequence(s) => assert_eq!(s.steps.len(), 2),
            other => panic!("expected sequence, got {}", other.kind()),
        }
    }

    /// it should reject decreasing keyframe offsets
    #[test]
    fn reject_bad_offsets() {
        let raw = r#"{
            "type": "keyframes",
            "steps": [
                {"styles": [{"opacity": 0}], "offset": 0.8},
                {"styles": [{"opacity": 1}], "offset": 0.2}
            ]
        }"#;
        assert!(parse_animation_json(raw).is_err());
    }
}
