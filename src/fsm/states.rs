//! Controller state handlers and table builder.
//!
//! ```text
//!  INIT ──▶ IDLE ──[start ∧ peer]──▶ WORKING
//!            ▲ ▲                       │ │ │
//!            │ └────[¬start ∨ ¬peer]───┘ │ │
//!            │                           │ │
//!            ├──[errors = 0]── ERROR ◀───┘ │ [errors ≠ 0]
//!            │                             │
//!            └──[flag clear]── EMERGENCY ◀─┘ [emergency]   (also from IDLE)
//! ```

use super::context::ControllerContext;
use super::{StateDescriptor, StateId};
use crate::pins::WATER_VALVE_INDEX;
use log::{info, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the controller state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Init,
            name: "Init",
            on_enter: None,
            on_exit: None,
            on_update: init_update,
        },
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: None,
            on_exit: None,
            on_update: idle_update,
        },
        StateDescriptor {
            id: StateId::Working,
            name: "Working",
            on_enter: Some(working_enter),
            on_exit: None,
            on_update: working_update,
        },
        StateDescriptor {
            id: StateId::EmergencyDisable,
            name: "EmergencyDisable",
            on_enter: Some(emergency_enter),
            on_exit: None,
            on_update: emergency_update,
        },
        StateDescriptor {
            id: StateId::Error,
            name: "Error",
            on_enter: Some(error_enter),
            on_exit: Some(error_exit),
            on_update: error_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  INIT
// ═══════════════════════════════════════════════════════════════════════════

fn init_update(ctx: &mut ControllerContext) -> Option<StateId> {
    ctx.requests.init_hardware = true;
    Some(StateId::Idle)
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE
// ═══════════════════════════════════════════════════════════════════════════

fn idle_update(ctx: &mut ControllerContext) -> Option<StateId> {
    ctx.emergency_disable = ctx.inputs.emergency_request;
    if ctx.emergency_disable {
        return Some(StateId::EmergencyDisable);
    }

    if ctx.inputs.start_request && ctx.inputs.peer_connected {
        ctx.requests.calibrate = true;
        ctx.requests.settle = true;
        return Some(StateId::Working);
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  WORKING
// ═══════════════════════════════════════════════════════════════════════════

fn working_enter(_ctx: &mut ControllerContext) {
    info!(target: "srvr_ctrl", "WORKING: following remote valve commands");
}

fn working_update(ctx: &mut ControllerContext) -> Option<StateId> {
    let inputs = ctx.inputs;
    ctx.system_on = inputs.start_request;
    ctx.emergency_disable = inputs.emergency_request;

    if ctx.emergency_disable {
        return Some(StateId::EmergencyDisable);
    }

    if inputs.machine_errors != 0 {
        return Some(StateId::Error);
    }

    if !inputs.start_request || !inputs.peer_connected {
        if ctx.water_on {
            warn!(target: "srvr_ctrl", "WORKING: leaving with water on, closing water valve");
            ctx.stop_water();
            ctx.requests.clear_add_water = true;
        }
        return Some(StateId::Idle);
    }

    ctx.valves_on = inputs.valve_commands;

    // A new add-water request restarts the volume count.
    let started = !ctx.water_on && inputs.add_water;
    if started {
        ctx.requests.start_measure = true;
        ctx.water_read_cl = 0;
    } else {
        ctx.water_read_cl = inputs.flow_read_cl;
    }

    if ctx.water_on && !inputs.add_water {
        info!(
            target: "srvr_ctrl",
            "WORKING: add-water cancelled at {} cl",
            ctx.water_read_cl
        );
        ctx.stop_water();
    }
    ctx.water_on = inputs.add_water;

    // The ISR alert belongs to the previous run until the restart lands.
    let reached = ctx.water_read_cl >= ctx.target_cl()
        || (!started && inputs.flow_target_reached);
    if ctx.water_on && reached {
        info!(
            target: "srvr_ctrl",
            "WORKING: water target {} cl reached ({} cl)",
            ctx.target_cl(),
            ctx.water_read_cl
        );
        ctx.requests.stop_measure = true;
        ctx.requests.clear_add_water = true;
        ctx.water_on = false;
    }

    ctx.valves_on[WATER_VALVE_INDEX] = ctx.water_on;
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  EMERGENCY DISABLE
// ═══════════════════════════════════════════════════════════════════════════

fn emergency_enter(ctx: &mut ControllerContext) {
    warn!(target: "srvr_ctrl", "EMERGENCY: all outputs off");
    ctx.system_on = false;
    ctx.stop_water();
    ctx.all_valves_off();
}

fn emergency_update(ctx: &mut ControllerContext) -> Option<StateId> {
    ctx.system_on = false;
    ctx.all_valves_off();
    ctx.water_on = false;

    ctx.emergency_disable = ctx.inputs.emergency_request;
    if !ctx.emergency_disable {
        return Some(StateId::Idle);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  ERROR
// ═══════════════════════════════════════════════════════════════════════════

fn error_enter(ctx: &mut ControllerContext) {
    warn!(
        target: "srvr_ctrl",
        "ERROR: valves off, machine_errors=0b{:b}",
        ctx.inputs.machine_errors
    );
    ctx.stop_water();
    ctx.all_valves_off();
}

fn error_exit(_ctx: &mut ControllerContext) {
    info!(target: "srvr_ctrl", "ERROR: acknowledged, returning to idle");
}

fn error_update(ctx: &mut ControllerContext) -> Option<StateId> {
    ctx.all_valves_off();
    ctx.water_on = false;

    if ctx.inputs.machine_errors == 0 {
        return Some(StateId::Idle);
    }
    None
}
