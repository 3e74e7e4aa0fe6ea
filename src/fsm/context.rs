//! Blackboard threaded through every controller state handler.
//!
//! The controller fills [`ControllerInputs`] from one store snapshot before
//! each tick.  Handlers write the desired outputs and raise one-shot
//! [`ControllerRequests`]; the controller applies both after the tick.
//! Handlers never touch hardware or the store themselves.

use crate::pins::{VALVE_COUNT, WATER_VALVE_INDEX};

// ---------------------------------------------------------------------------
// Inputs (written by the controller before each tick)
// ---------------------------------------------------------------------------

/// One coherent view of everything the state handlers decide on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerInputs {
    /// `StartSystem` command.
    pub start_request: bool,
    /// `EmergencyDisable` command.
    pub emergency_request: bool,
    /// Control peer reachable.
    pub peer_connected: bool,
    /// `MachineErrors` bit set.
    pub machine_errors: u32,
    /// `Valve{1..7}State` commands.
    pub valve_commands: [bool; VALVE_COUNT],
    /// `AddWater` command.
    pub add_water: bool,
    /// `WaterVolAdd`, litres.
    pub water_volume_l: u32,
    /// Flow sensor volume since the last measurement start, centilitres.
    pub flow_read_cl: u32,
    /// The flow ISR saw the volume reach the armed target.
    pub flow_target_reached: bool,
}

// ---------------------------------------------------------------------------
// Requests (one-shot, consumed by the controller after each tick)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerRequests {
    /// Configure outputs and zero the command parameters.
    pub init_hardware: bool,
    /// Capture the motor-current zero.
    pub calibrate: bool,
    pub start_measure: bool,
    pub stop_measure: bool,
    /// Write `AddWater = 0`.
    pub clear_add_water: bool,
    /// Sleep `settle_ms` after reconciling outputs.
    pub settle: bool,
}

impl ControllerRequests {
    /// Hand the pending requests to the caller and clear them.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}

// ---------------------------------------------------------------------------
// ControllerContext
// ---------------------------------------------------------------------------

pub struct ControllerContext {
    pub inputs: ControllerInputs,
    pub requests: ControllerRequests,

    // -- Outputs --
    /// System-on relay.
    pub system_on: bool,
    /// Desired valve outputs, index 0 = valve 1.
    pub valves_on: [bool; VALVE_COUNT],
    /// Water is being added through the water valve.
    pub water_on: bool,
    /// Volume added so far in the current run, centilitres.
    pub water_read_cl: u32,
    /// Latched emergency-disable flag, exposed through the controller handle.
    pub emergency_disable: bool,
}

impl Default for ControllerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerContext {
    pub fn new() -> Self {
        Self {
            inputs: ControllerInputs::default(),
            requests: ControllerRequests::default(),
            system_on: false,
            valves_on: [false; VALVE_COUNT],
            water_on: false,
            water_read_cl: 0,
            emergency_disable: false,
        }
    }

    /// Requested volume in centilitres.
    pub fn target_cl(&self) -> u32 {
        self.inputs.water_volume_l.saturating_mul(100)
    }

    pub fn all_valves_off(&mut self) {
        self.valves_on = [false; VALVE_COUNT];
    }

    /// Close the water valve and end the running measurement, if any.
    pub fn stop_water(&mut self) {
        if self.water_on {
            self.requests.stop_measure = true;
        }
        self.water_on = false;
        self.valves_on[WATER_VALVE_INDEX] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_requests() {
        let mut ctx = ControllerContext::new();
        ctx.requests.calibrate = true;
        ctx.requests.settle = true;
        let taken = ctx.requests.take();
        assert!(taken.calibrate && taken.settle);
        assert_eq!(ctx.requests, ControllerRequests::default());
    }

    #[test]
    fn target_saturates() {
        let mut ctx = ControllerContext::new();
        ctx.inputs.water_volume_l = u32::MAX;
        assert_eq!(ctx.target_cl(), u32::MAX);
        ctx.inputs.water_volume_l = 100;
        assert_eq!(ctx.target_cl(), 10_000);
    }

    #[test]
    fn stop_water_requests_stop_only_when_running() {
        let mut ctx = ControllerContext::new();
        ctx.stop_water();
        assert!(!ctx.requests.stop_measure);

        ctx.water_on = true;
        ctx.valves_on[WATER_VALVE_INDEX] = true;
        ctx.stop_water();
        assert!(ctx.requests.stop_measure);
        assert!(!ctx.valves_on[WATER_VALVE_INDEX]);
    }
}
