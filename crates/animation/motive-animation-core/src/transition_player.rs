#![allow(dead_code)]
//! The per-transition player wrapper.
//!
//! Between `trigger()` and the flush that builds real players, a transition
//! is represented by a queued wrapper keyed by (node, namespace, trigger).
//! Callback registrations made while queued are buffered and drained onto the
//! real player exactly once at attach; destroying a never-attached wrapper is
//! a driver no-op that still runs the buffered lifecycle.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use motive_api_core::events::PlayerPhase;
use motive_api_core::player::{AnimationPlayer, PlayerCallback};
use motive_api_core::tasks::Microtasks;

use crate::ids::{NamespaceId, NodeId};

pub type PlayerRc = Rc<TransitionAnimationPlayer>;

enum InnerPlayer {
    Queued {
        buffered: Vec<(PlayerPhase, PlayerCallback)>,
    },
    Attached {
        /// None only while an operation is in flight on the player, so that
        /// callbacks fired by the player may re-enter this wrapper.
        player: Option<Box<dyn AnimationPlayer>>,
    },
}

pub struct TransitionAnimationPlayer {
    pub namespace_id: NamespaceId,
    pub trigger_name: String,
    pub element: NodeId,
    inner: RefCell<InnerPlayer>,
    deferred: RefCell<Vec<(PlayerPhase, PlayerCallback)>>,
    destroyed: Cell<bool>,
    inner_destroyed: Cell<bool>,
    pub mark_for_destroy: Cell<bool>,
    pub disabled: Cell<bool>,
    total_time: Cell<f32>,
}

fn listen_on(player: &mut Box<dyn AnimationPlayer>, phase: PlayerPhase, cb: PlayerCallback) {
    match phase {
        PlayerPhase::Start => player.on_start(cb),
        PlayerPhase::Done => player.on_done(cb),
        PlayerPhase::Destroy => player.on_destroy(cb),
    }
}

impl TransitionAnimationPlayer {
    pub fn new(namespace_id: NamespaceId, trigger_name: &str, element: NodeId) -> PlayerRc {
        Rc::new(Self {
            namespace_id,
            trigger_name: trigger_name.to_string(),
            element,
            inner: RefCell::new(InnerPlayer::Queued {
                buffered: Vec::new(),
            }),
            deferred: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
            inner_destroyed: Cell::new(false),
            mark_for_destroy: Cell::new(false),
            disabled: Cell::new(false),
            total_time: Cell::new(0.0),
        })
    }

    pub fn queued(&self) -> bool {
        matches!(&*self.inner.borrow(), InnerPlayer::Queued { .. })
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn total_time(&self) -> f32 {
        self.total_time.get()
    }

    pub fn override_total_time(&self, total_time: f32) {
        self.total_time.set(total_time);
    }

    /// The single queued -> attached transition. Buffered registrations are
    /// drained onto the real player; repeat calls are ignored.
    pub fn set_real_player(&self, mut player: Box<dyn AnimationPlayer>) {
        let buffered = {
            let mut inner = self.inner.borrow_mut();
            match &mut *inner {
                InnerPlayer::Attached { .. } => return,
                InnerPlayer::Queued { buffered } => mem::take(buffered),
            }
        };
        for (phase, cb) in buffered {
            listen_on(&mut player, phase, cb);
        }
        self.total_time.set(player.total_time());
        *self.inner.borrow_mut() = InnerPlayer::Attached {
            player: Some(player),
        };
        if self.destroyed.get() && !self.inner_destroyed.get() {
            self.inner_destroyed.set(true);
            self.with_player(|p| p.destroy());
        }
    }

    pub fn register(&self, phase: PlayerPhase, cb: PlayerCallback) {
        let mut inner = self.inner.borrow_mut();
        match &mut *inner {
            InnerPlayer::Queued { buffered } => buffered.push((phase, cb)),
            InnerPlayer::Attached { player: Some(p) } => listen_on(p, phase, cb),
            InnerPlayer::Attached { player: None } => {
                drop(inner);
                self.deferred.borrow_mut().push((phase, cb));
            }
        }
    }

    pub fn on_start(&self, cb: PlayerCallback) {
        self.register(PlayerPhase::Start, cb);
    }

    pub fn on_done(&self, cb: PlayerCallback) {
        self.register(PlayerPhase::Done, cb);
    }

    pub fn on_destroy(&self, cb: PlayerCallback) {
        self.register(PlayerPhase::Destroy, cb);
    }

    fn with_player(&self, op: impl FnOnce(&mut Box<dyn AnimationPlayer>)) {
        let taken = {
            let mut inner = self.inner.borrow_mut();
            match &mut *inner {
                InnerPlayer::Attached { player } => player.take(),
                InnerPlayer::Queued { .. } => None,
            }
        };
        if let Some(mut player) = taken {
            op(&mut player);
            self.restore(player);
        }
    }

    fn restore(&self, mut player: Box<dyn AnimationPlayer>) {
        loop {
            let deferred = mem::take(&mut *self.deferred.borrow_mut());
            if deferred.is_empty() {
                break;
            }
            for (phase, cb) in deferred {
                listen_on(&mut player, phase, cb);
            }
        }
        if let InnerPlayer::Attached { player: slot } = &mut *self.inner.borrow_mut() {
            *slot = Some(player);
        }
        if self.destroyed.get() && !self.inner_destroyed.get() {
            self.inner_destroyed.set(true);
            self.with_player(|p| p.destroy());
        }
    }

    pub fn init(&self) {
        self.with_player(|p| p.init());
    }

    pub fn has_started(&self) -> bool {
        match &*self.inner.borrow() {
            InnerPlayer::Queued { .. } => false,
            InnerPlayer::Attached { player: Some(p) } => p.has_started(),
            InnerPlayer::Attached { player: None } => false,
        }
    }

    pub fn play(&self) {
        self.with_player(|p| p.play());
    }

    pub fn pause(&self) {
        self.with_player(|p| p.pause());
    }

    pub fn restart(&self) {
        self.with_player(|p| p.restart());
    }

    pub fn finish(&self) {
        let queued_done = {
            let mut inner = self.inner.borrow_mut();
            match &mut *inner {
                InnerPlayer::Queued { buffered } => {
                    let (done, rest): (Vec<_>, Vec<_>) = mem::take(buffered)
                        .into_iter()
                        .partition(|(phase, _)| *phase == PlayerPhase::Done);
                    *buffered = rest;
                    Some(done)
                }
                InnerPlayer::Attached { .. } => None,
            }
        };
        match queued_done {
            Some(done) => {
                for (_, mut cb) in done {
                    cb();
                }
            }
            None => self.with_player(|p| p.finish()),
        }
    }

    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        let queued = {
            let mut inner = self.inner.borrow_mut();
            match &mut *inner {
                InnerPlayer::Queued { buffered } => Some(mem::take(buffered)),
                InnerPlayer::Attached { .. } => None,
            }
        };
        match queued {
            Some(mut buffered) => {
                // Replay the no-op lifecycle the buffered callbacks would
                // have seen: start, done, then destroy.
                self.inner_destroyed.set(true);
                for wanted in [PlayerPhase::Start, PlayerPhase::Done, PlayerPhase::Destroy] {
                    for (phase, cb) in buffered.iter_mut() {
                        if *phase == wanted {
                            cb();
                        }
                    }
                }
            }
            None => {
                self.inner_destroyed.set(true);
                self.with_player(|p| p.destroy());
            }
        }
    }

    pub fn reset(&self) {
        self.with_player(|p| p.reset());
    }

    pub fn set_position(&self, position: f32) {
        self.with_player(|p| p.set_position(position));
    }

    pub fn get_position(&self) -> f32 {
        match &*self.inner.borrow() {
            InnerPlayer::Queued { .. } => 0.0,
            InnerPlayer::Attached { player: Some(p) } => p.get_position(),
            InnerPlayer::Attached { player: None } => 0.0,
        }
    }

    pub fn before_destroy(&self) {
        self.with_player(|p| p.before_destroy());
    }

    pub fn trigger_callback(&self, phase: PlayerPhase) {
        self.with_player(|p| p.trigger_callback(phase));
    }
}

/// Chain a parent player's lifecycle into `this`: consumed (skipped) players
/// follow the player that actually animates their subtree. Each forward runs
/// deferred so it never lands while the parent is mid-callback.
pub fn sync_player_events(
    this: &PlayerRc,
    parent: &mut Box<dyn AnimationPlayer>,
    microtasks: &Microtasks,
) {
    let me = this.clone();
    let mt = microtasks.clone();
    parent.on_start(Box::new(move || {
        let me = me.clone();
        mt.schedule(move || me.trigger_callback(PlayerPhase::Start));
    }));
    let me = this.clone();
    let mt = microtasks.clone();
    parent.on_done(Box::new(move || {
        let me = me.clone();
        mt.schedule(move || me.finish());
    }));
    let me = this.clone();
    let mt = microtasks.clone();
    parent.on_destroy(Box::new(move || {
        let me = me.clone();
        mt.schedule(move || me.destroy());
    }));
}

/// Adapter letting a shared transition player stand in wherever a boxed
/// player is required (composite players, previous-player lists).
pub struct SharedPlayer(pub PlayerRc);

impl AnimationPlayer for SharedPlayer {
    fn on_start(&mut self, f: PlayerCallback) {
        self.0.on_start(f);
    }

    fn on_done(&mut self, f: PlayerCallback) {
        self.0.on_done(f);
    }

    fn on_destroy(&mut self, f: PlayerCallback) {
        self.0.on_destroy(f);
    }

    fn init(&mut self) {
        self.0.init();
    }

    fn has_started(&self) -> bool {
        self.0.has_started()
    }

    fn play(&mut self) {
        self.0.play();
    }

    fn pause(&mut self) {
        self.0.pause();
    }

    fn restart(&mut self) {
        self.0.restart();
    }

    fn finish(&mut self) {
        self.0.finish();
    }

    fn destroy(&mut self) {
        self.0.destroy();
    }

    fn reset(&mut self) {
        self.0.reset();
    }

    fn set_position(&mut self, position: f32) {
        self.0.set_position(position);
    }

    fn get_position(&self) -> f32 {
        self.0.get_position()
    }

    fn total_time(&self) -> f32 {
        self.0.total_time()
    }

    fn before_destroy(&mut self) {
        self.0.before_destroy();
    }

    fn trigger_callback(&mut self, phase: PlayerPhase) {
        self.0.trigger_callback(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motive_api_core::player::NoopAnimationPlayer;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, PlayerCallback) {
        let c = Rc::new(Cell::new(0));
        let c2 = c.clone();
        (c, Box::new(move || c2.set(c2.get() + 1)))
    }

    /// it should buffer callbacks while queued and replay them exactly once
    /// on real-player attach
    #[test]
    fn queued_callbacks_replay_once() {
        let player = TransitionAnimationPlayer::new(NamespaceId(0), "t", NodeId(1));
        let (done, on_done) = counter();
        player.on_done(on_done);
        assert!(player.queued());

        player.set_real_player(Box::new(NoopAnimationPlayer::new(100.0, 0.0)));
        assert!(!player.queued());
        assert_eq!(done.get(), 0);
        player.finish();
        assert_eq!(done.get(), 1);
        player.finish();
        assert_eq!(done.get(), 1);
    }

    /// it should fire destroy callbacks exactly once when destroyed while
    /// still queued
    #[test]
    fn queued_destroy_symmetry() {
        let player = TransitionAnimationPlayer::new(NamespaceId(0), "t", NodeId(1));
        let (destroyed, on_destroy) = counter();
        let (done, on_done) = counter();
        player.on_destroy(on_destroy);
        player.on_done(on_done);
        player.destroy();
        player.destroy();
        assert_eq!(destroyed.get(), 1);
        assert_eq!(done.get(), 1);
        assert!(player.destroyed());
    }

    /// it should destroy the real player when destroy was requested from a
    /// callback fired during finish
    #[test]
    fn reentrant_destroy_during_finish() {
        let player = TransitionAnimationPlayer::new(NamespaceId(0), "t", NodeId(1));
        player.set_real_player(Box::new(NoopAnimationPlayer::new(100.0, 0.0)));
        let me = player.clone();
        player.on_done(Box::new(move || me.destroy()));
        let (destroyed, on_destroy) = counter();
        player.on_destroy(on_destroy);
        player.finish();
        assert!(player.destroyed());
        assert_eq!(destroyed.get(), 1);
    }
}
