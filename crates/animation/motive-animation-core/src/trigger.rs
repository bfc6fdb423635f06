#![allow(dead_code)]
//! Trigger construction and transition matching.
//!
//! A trigger owns its state-style map and one transition factory per declared
//! edge, plus a fallback factory that matches anything and animates nothing
//! (used for forced removals and unmatched state changes).

use std::rc::Rc;

use hashbrown::HashMap;

use motive_api_core::ast::{
    AnimationNode, AnimationOptions, SequenceAst, StateMatch, StyleAst, StyleTuple, TransitionAst,
    TransitionMatcher, TriggerAst,
};
use motive_api_core::error::BuildError;
use motive_api_core::style::{StyleMap, StyleValue};

use crate::compiler::build_animation_timelines;
use crate::driver::AnimationDriver;
use crate::ids::NodeId;
use crate::instruction::{ElementInstructionMap, TransitionInstruction};
use crate::timing::interpolate_params;

/// The implicit initial and removal-terminal state.
pub const VOID_STATE: &str = "void";

/// One state's styles with its default params.
pub struct AnimationStateStyles {
    style: StyleAst,
    default_params: HashMap<String, StyleValue>,
}

impl AnimationStateStyles {
    fn new(style: StyleAst, default_params: HashMap<String, StyleValue>) -> Self {
        Self {
            style,
            default_params,
        }
    }

    pub fn build_styles(
        &self,
        params: &HashMap<String, StyleValue>,
        errors: &mut Vec<BuildError>,
    ) -> StyleMap {
        let mut combined = self.default_params.clone();
        for (key, value) in params {
            combined.insert(key.clone(), value.clone());
        }
        let mut out = StyleMap::new();
        for tuple in &self.style.styles {
            if let StyleTuple::Styles(map) = tuple {
                for (prop, value) in map {
                    out.insert(prop.clone(), interpolate_params(value, &combined, errors));
                }
            }
        }
        out
    }
}

pub struct TransitionFactory {
    trigger_name: String,
    pub ast: TransitionAst,
    state_styles: Rc<HashMap<String, AnimationStateStyles>>,
}

impl TransitionFactory {
    pub fn matches(&self, from: &str, to: &str) -> bool {
        self.ast.matchers.iter().any(|m| m.matches(from, to))
    }

    pub fn build_styles(
        &self,
        state: &str,
        params: &HashMap<String, StyleValue>,
        errors: &mut Vec<BuildError>,
    ) -> StyleMap {
        let styler = self
            .state_styles
            .get(state)
            .or_else(|| self.state_styles.get("*"));
        styler
            .map(|s| s.build_styles(params, errors))
            .unwrap_or_default()
    }

    /// Compile this transition for one node, aggregating per-node pre/post
    /// style requirements and the set of queried descendants.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        driver: &dyn AnimationDriver,
        element: NodeId,
        current_state: &str,
        next_state: &str,
        enter_marker: &str,
        leave_marker: &str,
        current_options: &AnimationOptions,
        next_options: &AnimationOptions,
        sub_instructions: Option<&ElementInstructionMap>,
        skip_ast_build: bool,
    ) -> TransitionInstruction {
        let mut errors: Vec<BuildError> = Vec::new();
        let empty = HashMap::new();
        let transition_params = self
            .ast
            .options
            .as_ref()
            .and_then(|o| o.params.as_ref())
            .unwrap_or(&empty);
        let current_params = current_options.params.as_ref().unwrap_or(&empty);
        let next_params = next_options.params.as_ref().unwrap_or(&empty);

        let current_state_styles = self.build_styles(current_state, current_params, &mut errors);
        let next_state_styles = self.build_styles(next_state, next_params, &mut errors);

        // Transition-level params act as defaults underneath the next state's.
        let mut animation_params = transition_params.clone();
        for (key, value) in next_params {
            animation_params.insert(key.clone(), value.clone());
        }
        let animation_options = AnimationOptions {
            delay: self.ast.options.as_ref().and_then(|o| o.delay.clone()),
            duration: None,
            params: Some(animation_params),
        };

        let timelines = if skip_ast_build {
            Vec::new()
        } else {
            build_animation_timelines(
                driver,
                element,
                &self.ast.animation,
                enter_marker,
                leave_marker,
                &current_state_styles,
                &next_state_styles,
                &animation_options,
                sub_instructions,
                &mut errors,
            )
        };

        let mut total_time = 0.0f32;
        for tl in &timelines {
            total_time = total_time.max(tl.total_time());
        }

        let mut instruction = TransitionInstruction {
            element,
            trigger_name: self.trigger_name.clone(),
            from_state: current_state.to_string(),
            to_state: next_state.to_string(),
            is_removal_transition: next_state == VOID_STATE,
            from_styles: current_state_styles,
            to_styles: next_state_styles,
            timelines: Vec::new(),
            queried_elements: Vec::new(),
            pre_style_props: HashMap::new(),
            post_style_props: HashMap::new(),
            total_time,
            errors,
        };
        if !instruction.errors.is_empty() {
            return instruction;
        }

        for tl in &timelines {
            let pre = instruction.pre_style_props.entry(tl.element).or_default();
            pre.extend(tl.pre_style_props.iter().cloned());
            let post = instruction.post_style_props.entry(tl.element).or_default();
            post.extend(tl.post_style_props.iter().cloned());
            if tl.element != element && !instruction.queried_elements.contains(&tl.element) {
                instruction.queried_elements.push(tl.element);
            }
        }
        instruction.timelines = timelines;
        instruction
    }
}

pub struct AnimationTrigger {
    pub name: String,
    states: Rc<HashMap<String, AnimationStateStyles>>,
    pub transition_factories: Vec<Rc<TransitionFactory>>,
    pub fallback_transition: Rc<TransitionFactory>,
}

impl AnimationTrigger {
    pub fn contains_queries(&self) -> bool {
        self.transition_factories
            .iter()
            .any(|f| f.ast.query_count > 0)
    }

    pub fn match_transition(&self, from: &str, to: &str) -> Option<Rc<TransitionFactory>> {
        self.transition_factories
            .iter()
            .find(|f| f.matches(from, to))
            .cloned()
    }

    /// State styles for a given value, via the fallback factory (which sees
    /// every state).
    pub fn match_styles(
        &self,
        state: &str,
        params: &HashMap<String, StyleValue>,
        errors: &mut Vec<BuildError>,
    ) -> StyleMap {
        self.fallback_transition.build_styles(state, params, errors)
    }
}

/// Build the runtime trigger from its validated definition.
pub fn build_trigger(name: &str, ast: &TriggerAst) -> AnimationTrigger {
    let mut states: HashMap<String, AnimationStateStyles> = HashMap::new();
    for state in &ast.states {
        let params = state
            .options
            .as_ref()
            .and_then(|o| o.params.clone())
            .unwrap_or_default();
        // A definition may name several states at once ("on, off").
        for state_name in state.name.split(',') {
            states.insert(
                state_name.trim().to_string(),
                AnimationStateStyles::new(state.style.clone(), params.clone()),
            );
        }
    }
    balance_properties(&mut states, "true", "1");
    balance_properties(&mut states, "false", "0");
    let states = Rc::new(states);

    let transition_factories = ast
        .transitions
        .iter()
        .map(|t| {
            Rc::new(TransitionFactory {
                trigger_name: name.to_string(),
                ast: t.clone(),
                state_styles: states.clone(),
            })
        })
        .collect();

    let fallback_transition = Rc::new(TransitionFactory {
        trigger_name: name.to_string(),
        ast: TransitionAst {
            matchers: vec![TransitionMatcher {
                from: StateMatch::Any,
                to: StateMatch::Any,
            }],
            animation: Box::new(AnimationNode::Sequence(SequenceAst {
                steps: Vec::new(),
                options: None,
            })),
            options: None,
            query_count: 0,
            dep_count: 0,
        },
        state_styles: states.clone(),
    });

    AnimationTrigger {
        name: name.to_string(),
        states,
        transition_factories,
        fallback_transition,
    }
}

/// Boolean state values come in as `1`/`0`; keep them interchangeable with
/// declared `true`/`false` state names.
fn balance_properties(
    states: &mut HashMap<String, AnimationStateStyles>,
    key1: &str,
    key2: &str,
) {
    let has1 = states.contains_key(key1);
    let has2 = states.contains_key(key2);
    if has1 && !has2 {
        let aliased = {
            let s = &states[key1];
            AnimationStateStyles::new(s.style.clone(), s.default_params.clone())
        };
        states.insert(key2.to_string(), aliased);
    } else if has2 && !has1 {
        let aliased = {
            let s = &states[key2];
            AnimationStateStyles::new(s.style.clone(), s.default_params.clone())
        };
        states.insert(key1.to_string(), aliased);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motive_api_core::style::style_map;

    fn style_ast(entries: &[(&str, f32)]) -> StyleAst {
        StyleAst {
            styles: vec![StyleTuple::Styles(style_map(
                entries.iter().map(|(k, v)| (k.to_string(), *v)),
            ))],
            easing: None,
            offset: None,
            is_empty_step: false,
        }
    }

    fn trigger_ast() -> TriggerAst {
        TriggerAst {
            name: "box".into(),
            states: vec![
                motive_api_core::ast::StateAst {
                    name: "open".into(),
                    style: style_ast(&[("height", 100.0)]),
                    options: None,
                },
                motive_api_core::ast::StateAst {
                    name: "closed".into(),
                    style: style_ast(&[("height", 0.0)]),
                    options: None,
                },
                motive_api_core::ast::StateAst {
                    name: "true".into(),
                    style: style_ast(&[("opacity", 1.0)]),
                    options: None,
                },
            ],
            transitions: vec![TransitionAst {
                matchers: vec![TransitionMatcher {
                    from: StateMatch::Value("open".into()),
                    to: StateMatch::Value("closed".into()),
                }],
                animation: Box::new(AnimationNode::Sequence(SequenceAst {
                    steps: vec![],
                    options: None,
                })),
                options: None,
                query_count: 0,
                dep_count: 0,
            }],
        }
    }

    /// it should match declared transitions and fall through otherwise
    #[test]
    fn match_transition_edges() {
        let trigger = build_trigger("box", &trigger_ast());
        assert!(trigger.match_transition("open", "closed").is_some());
        assert!(trigger.match_transition("closed", "open").is_none());
        assert!(trigger.fallback_transition.matches("closed", "open"));
    }

    /// it should balance boolean state aliases both ways
    #[test]
    fn boolean_alias_balanced() {
        let trigger = build_trigger("box", &trigger_ast());
        let mut errors = Vec::new();
        let styles = trigger.match_styles("1", &HashMap::new(), &mut errors);
        assert_eq!(styles.get("opacity"), Some(&StyleValue::Number(1.0)));
        assert!(errors.is_empty());
    }

    /// it should build state styles with param substitution
    #[test]
    fn state_styles_with_params() {
        let mut states: HashMap<String, AnimationStateStyles> = HashMap::new();
        let style = StyleAst {
            styles: vec![StyleTuple::Styles(style_map([(
                "width",
                StyleValue::Text("{{ w }}px".into()),
            )]))],
            easing: None,
            offset: None,
            is_empty_step: false,
        };
        let mut defaults = HashMap::new();
        defaults.insert("w".to_string(), StyleValue::Number(10.0));
        states.insert("open".into(), AnimationStateStyles::new(style, defaults));

        let mut errors = Vec::new();
        let styles = states["open"].build_styles(&HashMap::new(), &mut errors);
        assert_eq!(styles.get("width"), Some(&StyleValue::Text("10px".into())));

        let mut params = HashMap::new();
        params.insert("w".to_string(), StyleValue::Number(40.0));
        let styles = states["open"].build_styles(&params, &mut errors);
        assert_eq!(styles.get("width"), Some(&StyleValue::Text("40px".into())));
        assert!(errors.is_empty());
    }
}
