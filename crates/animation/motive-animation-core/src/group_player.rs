#![allow(dead_code)]
//! Composite player: N players driven as one.
//!
//! Phase forwarding is counter-based: the group reports started/done/destroyed
//! only once every child has reached that phase.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use motive_api_core::events::PlayerPhase;
use motive_api_core::player::{AnimationPlayer, NoopAnimationPlayer, PlayerCallback};

#[derive(Default)]
struct GroupState {
    on_start: RefCell<Vec<PlayerCallback>>,
    on_done: RefCell<Vec<PlayerCallback>>,
    on_destroy: RefCell<Vec<PlayerCallback>>,
    started: Cell<bool>,
    finished: Cell<bool>,
    destroyed: Cell<bool>,
}

impl GroupState {
    fn fire(list: &RefCell<Vec<PlayerCallback>>) {
        let mut callbacks = mem::take(&mut *list.borrow_mut());
        for cb in callbacks.iter_mut() {
            cb();
        }
    }

    fn mark_started(&self) {
        if !self.started.replace(true) {
            Self::fire(&self.on_start);
        }
    }

    fn mark_finished(&self) {
        if !self.finished.replace(true) {
            Self::fire(&self.on_done);
        }
    }

    fn mark_destroyed(&self) {
        if !self.destroyed.replace(true) {
            self.mark_finished();
            Self::fire(&self.on_destroy);
        }
    }
}

pub struct AnimationGroupPlayer {
    state: Rc<GroupState>,
    players: Vec<Box<dyn AnimationPlayer>>,
    total_time: f32,
}

impl AnimationGroupPlayer {
    pub fn new(mut players: Vec<Box<dyn AnimationPlayer>>) -> Self {
        let state = Rc::new(GroupState::default());
        let total = players.len();
        let total_time = players
            .iter()
            .map(|p| p.total_time())
            .fold(0.0f32, f32::max);

        if total == 0 {
            state.mark_finished();
        } else {
            let done_count = Rc::new(Cell::new(0usize));
            let start_count = Rc::new(Cell::new(0usize));
            let destroy_count = Rc::new(Cell::new(0usize));
            for player in players.iter_mut() {
                let (st, c) = (state.clone(), done_count.clone());
                player.on_done(Box::new(move || {
                    c.set(c.get() + 1);
                    if c.get() == total {
                        st.mark_finished();
                    }
                }));
                let (st, c) = (state.clone(), start_count.clone());
                player.on_start(Box::new(move || {
                    c.set(c.get() + 1);
                    if c.get() == total {
                        st.mark_started();
                    }
                }));
                let (st, c) = (state.clone(), destroy_count.clone());
                player.on_destroy(Box::new(move || {
                    c.set(c.get() + 1);
                    if c.get() == total {
                        st.mark_destroyed();
                    }
                }));
            }
        }

        Self {
            state,
            players,
            total_time,
        }
    }

    pub fn players(&self) -> &[Box<dyn AnimationPlayer>] {
        &self.players
    }
}

impl AnimationPlayer for AnimationGroupPlayer {
    fn on_start(&mut self, f: PlayerCallback) {
        self.state.on_start.borrow_mut().push(f);
    }

    fn on_done(&mut self, f: PlayerCallback) {
        self.state.on_done.borrow_mut().push(f);
    }

    fn on_destroy(&mut self, f: PlayerCallback) {
        self.state.on_destroy.borrow_mut().push(f);
    }

    fn init(&mut self) {
        for p in &mut self.players {
            p.init();
        }
    }

    fn has_started(&self) -> bool {
        self.state.started.get()
    }

    fn play(&mut self) {
        self.init();
        self.state.mark_started();
        for p in &mut self.players {
            p.play();
        }
    }

    fn pause(&mut self) {
        for p in &mut self.players {
            p.pause();
        }
    }

    fn restart(&mut self) {
        for p in &mut self.players {
            p.restart();
        }
    }

    fn finish(&mut self) {
        self.state.mark_finished();
        for p in &mut self.players {
            p.finish();
        }
    }

    fn destroy(&mut self) {
        if self.players.is_empty() {
            self.state.mark_destroyed();
        } else {
            for p in &mut self.players {
                p.destroy();
            }
            // Children that were already destroyed never re-fire their
            // callbacks, so the counter may not reach the total here.
            self.state.mark_destroyed();
        }
    }

    fn reset(&mut self) {
        for p in &mut self.players {
            p.reset();
        }
        self.state.started.set(false);
        self.state.finished.set(false);
        self.state.destroyed.set(false);
    }

    fn set_position(&mut self, position: f32) {
        let time_at_position = position * self.total_time;
        for p in &mut self.players {
            let child_total = p.total_time();
            let child_position = if child_total > 0.0 {
                (time_at_position / child_total).min(1.0)
            } else {
                1.0
            };
            p.set_position(child_position);
        }
    }

    fn get_position(&self) -> f32 {
        let longest = self
            .players
            .iter()
            .max_by(|a, b| a.total_time().total_cmp(&b.total_time()));
        longest.map(|p| p.get_position()).unwrap_or(0.0)
    }

    fn total_time(&self) -> f32 {
        self.total_time
    }

    fn before_destroy(&mut self) {
        for p in &mut self.players {
            p.before_destroy();
        }
    }

    fn trigger_callback(&mut self, phase: PlayerPhase) {
        let list = match phase {
            PlayerPhase::Start => &self.state.on_start,
            PlayerPhase::Done => &self.state.on_done,
            PlayerPhase::Destroy => &self.state.on_destroy,
        };
        GroupState::fire(list);
    }
}

/// Collapse a player list into the cheapest equivalent single player.
pub fn optimize_group_player(players: Vec<Box<dyn AnimationPlayer>>) -> Box<dyn AnimationPlayer> {
    match players.len() {
        0 => Box::new(NoopAnimationPlayer::default()),
        1 => players.into_iter().next().unwrap(),
        _ => Box::new(AnimationGroupPlayer::new(players)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finishable() -> Box<dyn AnimationPlayer> {
        Box::new(NoopAnimationPlayer::new(100.0, 0.0))
    }

    /// it should forward done only once every child is done
    #[test]
    fn done_after_all_children() {
        let mut group = AnimationGroupPlayer::new(vec![finishable(), finishable()]);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        group.on_done(Box::new(move || h.set(h.get() + 1)));

        group.players[0].finish();
        assert_eq!(hits.get(), 0);
        group.players[1].finish();
        assert_eq!(hits.get(), 1);
        group.finish();
        assert_eq!(hits.get(), 1, "done fires exactly once");
    }

    /// it should report the max child total time
    #[test]
    fn total_time_is_max() {
        let group = AnimationGroupPlayer::new(vec![
            Box::new(NoopAnimationPlayer::new(100.0, 0.0)),
            Box::new(NoopAnimationPlayer::new(300.0, 50.0)),
        ]);
        assert_eq!(group.total_time(), 350.0);
    }

    /// it should fire destroy callbacks when destroyed as a whole
    #[test]
    fn destroy_fires_callbacks() {
        let mut group = AnimationGroupPlayer::new(vec![finishable(), finishable()]);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        group.on_destroy(Box::new(move || h.set(h.get() + 1)));
        group.destroy();
        assert_eq!(hits.get(), 1);
    }
}
