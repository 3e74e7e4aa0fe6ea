//! Function-pointer finite state machine driving the server controller.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  StateTable                                                     │
//! │  ┌──────────────────┬───────────┬──────────┬──────────────────┐ │
//! │  │ StateId          │ on_enter  │ on_exit  │ on_update        │ │
//! │  ├──────────────────┼───────────┼──────────┼──────────────────┤ │
//! │  │ Init             │ -         │ -        │ fn(ctx)->Option  │ │
//! │  │ Idle             │ -         │ -        │ fn(ctx)->Option  │ │
//! │  │ Working          │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ EmergencyDisable │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ Error            │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option  │ │
//! │  └──────────────────┴───────────┴──────────┴──────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the current state.  A
//! `Some(next)` result runs `on_exit` of the current state, then
//! `on_enter` of the next one.  Handlers only see the
//! [`ControllerContext`] blackboard.

pub mod context;
pub mod states;

use context::ControllerContext;
use log::info;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Controller states.  Must stay in sync with [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StateId {
    Init = 0,
    Idle = 1,
    Working = 2,
    EmergencyDisable = 3,
    Error = 4,
}

impl StateId {
    pub const COUNT: usize = 5;

    /// Convert an index back to `StateId`.  Out-of-range asserts in debug
    /// builds and falls back to `Idle`, the state the controller recovers to.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Init,
            1 => Self::Idle,
            2 => Self::Working,
            3 => Self::EmergencyDisable,
            4 => Self::Error,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Idle
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// `on_enter` / `on_exit` action, run once per transition.
pub type StateActionFn = fn(&mut ControllerContext);

/// Per-tick handler.  `Some(next)` requests a transition.
pub type StateUpdateFn = fn(&mut ControllerContext) -> Option<StateId>;

/// One row of the state table.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    /// Indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        debug_assert!(
            table.iter().enumerate().all(|(i, d)| d.id as usize == i),
            "state table out of order"
        );
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Run the initial `on_enter`.  Call once before the first `tick()`.
    pub fn start(&mut self, ctx: &mut ControllerContext) {
        info!(target: "srvr_ctrl", "FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance one tick, running at most one transition.
    pub fn tick(&mut self, ctx: &mut ControllerContext) {
        let next = (self.table[self.current].on_update)(ctx);

        if let Some(next_id) = next {
            if next_id as usize != self.current {
                self.transition(next_id, ctx);
            }
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    fn transition(&mut self, next_id: StateId, ctx: &mut ControllerContext) {
        let next_idx = next_id as usize;

        info!(
            target: "srvr_ctrl",
            "Change state: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
