// Debug session coordination core
//
// Serializes all debugger work onto one manager thread and keeps the debuggee's
// suspend state consistent while events, steps and evaluations interleave:
// - Prioritized command queue and manager thread
// - Suspend contexts with voting and per-thread accounting
// - Event pump dispatching JDWP event sets
// - Stepping engine with step hints and method filters
// - Event request registry for breakpoints and class prepare
// - Method invocation on worker tasks

pub mod command;
pub mod config;
pub mod context;
pub mod error;
mod evaluation;
mod event_pump;
pub mod jdwp;
pub mod listener;
pub mod manager;
pub mod mock;
pub mod position;
mod queue;
pub mod requests;
pub mod session;
pub mod stepping;
pub mod suspend;
pub mod vm;
pub mod worker;

pub use command::{command, DebuggerCommand, Priority, SuspendContextCommand};
pub use config::{ClassFilter, DebuggerSettings, SessionConfig};
pub use context::DebuggerContext;
pub use error::{DebuggerError, DebuggerResult};
pub use jdwp::JdwpVirtualMachine;
pub use listener::{DebugProcessListener, Listeners};
pub use manager::{ManagerId, ManagerThread};
pub use mock::MockVirtualMachine;
pub use position::{NoPositions, PositionManager, SourcePosition};
pub use requests::{BreakpointTarget, LineBreakpoint, RequestSpec, Requestor, RequestorId};
pub use session::{ContextSummary, Session, SessionState};
pub use stepping::{next_step_depth, MethodFilter, StepDecision, StepDepth, StepOptions, StepSize};
pub use suspend::{ContextId, ContextKind, SuspendContext, SuspendManager};
pub use vm::{InvokeRequest, InvokeTarget, MethodDescriptor, PreparedClass, RequestKind, VirtualMachine};
