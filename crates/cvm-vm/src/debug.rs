//! Debugger hooks (spec.md §4.8): a breakpoint table plus step flags
//! consumed by the dispatch loop. The interactive REPL itself is an
//! external collaborator, modeled here as the `DebugHost` trait.

use std::collections::BTreeSet;

/// What the dispatch loop should do after a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugAction {
    Continue,
    StepInto,
    StepOver,
    StepOut,
}

/// The external REPL a VM reports stop events to. `cvm-cli`'s `-g` flag
/// wires a real terminal REPL in; tests can stub this out.
pub trait DebugHost {
    fn on_stop(&mut self, pc: u64, reason: StopReason) -> DebugAction;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Step,
}

/// A `DebugHost` that always continues; used when `-g` is not passed.
pub struct NullHost;

impl DebugHost for NullHost {
    fn on_stop(&mut self, _pc: u64, _reason: StopReason) -> DebugAction {
        DebugAction::Continue
    }
}

#[derive(Debug, Default)]
pub struct Debugger {
    breakpoints: BTreeSet<u64>,
    single_step: bool,
    step_over_return_pc: Option<u64>,
    step_out_bp: Option<usize>,
}

impl Debugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_breakpoint(&mut self, pc: u64) {
        self.breakpoints.insert(pc);
    }

    pub fn remove_breakpoint(&mut self, pc: u64) {
        self.breakpoints.remove(&pc);
    }

    pub fn has_breakpoint(&self, pc: u64) -> bool {
        self.breakpoints.contains(&pc)
    }

    pub fn is_stopped_at(&self, pc: u64, current_bp: usize) -> Option<StopReason> {
        if self.breakpoints.contains(&pc) {
            return Some(StopReason::Breakpoint);
        }
        if self.single_step {
            return Some(StopReason::Step);
        }
        if self.step_over_return_pc == Some(pc) {
            return Some(StopReason::Step);
        }
        if self.step_out_bp.map(|bp| current_bp < bp).unwrap_or(false) {
            return Some(StopReason::Step);
        }
        None
    }

    pub fn apply(&mut self, action: DebugAction, next_pc: u64, bp: usize) {
        match action {
            DebugAction::Continue => {
                self.single_step = false;
                self.step_over_return_pc = None;
                self.step_out_bp = None;
            }
            DebugAction::StepInto => {
                self.single_step = true;
            }
            DebugAction::StepOver => {
                self.single_step = false;
                self.step_over_return_pc = Some(next_pc);
            }
            DebugAction::StepOut => {
                self.single_step = false;
                self.step_out_bp = Some(bp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_add_remove_round_trips() {
        let mut d = Debugger::new();
        d.add_breakpoint(100);
        assert!(d.has_breakpoint(100));
        d.remove_breakpoint(100);
        assert!(!d.has_breakpoint(100));
    }

    #[test]
    fn single_step_stops_every_instruction() {
        let mut d = Debugger::new();
        d.apply(DebugAction::StepInto, 0, 0);
        assert_eq!(d.is_stopped_at(42, 0), Some(StopReason::Step));
    }
}
