pub mod relay;

pub use relay::{
    CallConnection, Direction, FrameSink, FrameSource, PumpExit, RelayError, RelayResult,
    RelaySession, SessionOutcome, SessionSettings, SiblingPolicy, TurnPhase, TurnState,
};
