//! Lifecycle events delivered to registered listeners.

use serde::{Deserialize, Serialize};

/// Player lifecycle phases a listener can subscribe to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    Start,
    Done,
    Destroy,
}

impl PlayerPhase {
    /// Parse a listener phase name. Listener registration treats anything
    /// unparsable as a contract violation.
    pub fn parse(phase: &str) -> Option<PlayerPhase> {
        match phase {
            "start" => Some(PlayerPhase::Start),
            "done" => Some(PlayerPhase::Done),
            "destroy" => Some(PlayerPhase::Destroy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerPhase::Start => "start",
            PlayerPhase::Done => "done",
            PlayerPhase::Destroy => "destroy",
        }
    }
}

/// One event handed to a trigger listener.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimationEvent {
    /// Host handle of the node the trigger lives on.
    pub element: u64,
    pub trigger_name: String,
    pub from_state: String,
    pub to_state: String,
    pub phase: PlayerPhase,
    pub total_time: f32,
    /// True when the animation was skipped because the subtree is disabled.
    #[serde(default)]
    pub disabled: bool,
    /// Flush tick that produced the event, when known.
    #[serde(default)]
    pub tick: Option<i64>,
}
