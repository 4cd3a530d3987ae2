// JDWP client library for Java debugging
//
// Implements the subset of the JDWP protocol a debug session coordinator needs:
// - Connection management and event delivery
// - Event requests (breakpoints, steps, class prepare)
// - Thread control and stack inspection
// - Class, method and line table queries
// - Method invocation in the target VM

pub mod commands;
pub mod connection;
pub mod eventloop;
pub mod eventrequest;
pub mod events;
pub mod invoke;
pub mod method;
pub mod object;
pub mod protocol;
pub mod reader;
pub mod reftype;
pub mod thread;
pub mod types;
pub mod vm;

pub use connection::JdwpConnection;
pub use eventrequest::SuspendPolicy;
pub use events::{Event, EventKind, EventSet};
pub use protocol::{JdwpError, JdwpResult};
pub use types::{Location, RequestId, ThreadId, Value};
