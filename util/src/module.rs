//! Cyclic module interface
//!
//! The processing stages of `follow_exec` (the tracker and follow control) are driven by the loop
//! through this trait. A stage is initialised once from its parameter table, and again whenever a
//! full reinitialisation is needed, then stepped once per cycle with that cycle's input.

// ---------------------------------------------------------------------------
// MODULE STATE
// ---------------------------------------------------------------------------

/// A processing stage stepped once per cycle.
pub trait State {
    /// Parameters the stage is initialised from.
    type InitData;
    /// Raised when the parameters are rejected.
    type InitError;

    /// Input of one cycle.
    type InputData;
    /// Output of one cycle.
    type OutputData;
    /// Counters and flags describing the last cycle, archived alongside the output.
    type StatusReport: Copy + Default;
    /// Raised when a cycle's input is rejected.
    type ProcError;

    /// Validate the parameters and reset the stage to its initial state.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError>;

    /// Run one cycle.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;
}
