//! Error taxonomy.
//!
//! Structural problems discovered while compiling a transition are collected
//! into error lists and aggregated once per flush; they never abort unrelated
//! transitions in the same pass. Programmer-contract violations (unknown
//! trigger, invalid listener phase) are hard failures raised at the call site
//! and are not represented here.

use thiserror::Error;

/// A build-time structural problem recorded during one compile pass.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BuildError {
    #[error("`query(\"{selector}\")` returned zero elements")]
    QueryMatchedNoElements { selector: String },

    #[error("please provide a value for the animation param {name}")]
    MissingParameter { name: String },

    #[error("the provided style property `{property}` is not supported by the driver")]
    UnsupportedStyleProperty { property: String },

    #[error("the timing expression `{expr}` could not be parsed")]
    InvalidTiming { expr: String },

    #[error("`{kind}` is not allowed at this point in an animation definition")]
    MisplacedNode { kind: &'static str },
}

/// Aggregated runtime failure. One value per flush describes every erroneous
/// transition; the flush destroys the players it built before reporting so a
/// bad batch never partially starts.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("animation failures detected during flush:\n{}", format_failures(.0))]
    TransitionFailures(Vec<TransitionFailure>),
}

/// The errors of one failed transition.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionFailure {
    pub trigger_name: String,
    pub errors: Vec<BuildError>,
}

fn format_failures(failures: &[TransitionFailure]) -> String {
    let mut out = String::new();
    for failure in failures {
        out.push_str(&format!("@{} failed:\n", failure.trigger_name));
        for err in &failure.errors {
            out.push_str(&format!(" - {err}\n"));
        }
    }
    out
}
