// JDWP event handling
//
// Events are sent from the JVM to notify about breakpoints, steps, class loads, etc.
// A composite event packet carries one suspend policy for all events it contains.

use crate::commands::event_kinds;
use crate::eventrequest::SuspendPolicy;
use crate::protocol::JdwpResult;
use crate::reader::PacketReader;
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: SuspendPolicy,
    pub events: Vec<Event>,
}

impl EventSet {
    /// Thread shared by the events of this set, if any event names one
    pub fn thread(&self) -> Option<ThreadId> {
        self.events.iter().find_map(Event::thread)
    }

    /// Synthetic set delivered when the transport closes
    pub fn disconnected() -> Self {
        Self {
            suspend_policy: SuspendPolicy::None,
            events: vec![Event {
                kind: event_kinds::VM_DISCONNECTED,
                request_id: 0,
                details: EventKind::VMDisconnected,
            }],
        }
    }
}

/// Single event within an event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: u8,
    pub request_id: RequestId,
    pub details: EventKind,
}

impl Event {
    pub fn thread(&self) -> Option<ThreadId> {
        match &self.details {
            EventKind::VMStart { thread }
            | EventKind::ThreadStart { thread }
            | EventKind::ThreadDeath { thread }
            | EventKind::ClassPrepare { thread, .. }
            | EventKind::Breakpoint { thread, .. }
            | EventKind::Step { thread, .. }
            | EventKind::Exception { thread, .. }
            | EventKind::MethodEntry { thread, .. }
            | EventKind::MethodExit { thread, .. } => Some(*thread),
            EventKind::VMDeath
            | EventKind::VMDisconnected
            | EventKind::ClassUnload { .. }
            | EventKind::Unknown { .. } => None,
        }
    }

    /// Code position for events that occur at one
    pub fn location(&self) -> Option<&Location> {
        match &self.details {
            EventKind::Breakpoint { location, .. }
            | EventKind::Step { location, .. }
            | EventKind::Exception { location, .. }
            | EventKind::MethodEntry { location, .. }
            | EventKind::MethodExit { location, .. } => Some(location),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    VMStart {
        thread: ThreadId,
    },
    VMDeath,
    VMDisconnected,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        ref_type_tag: u8,
        ref_type: ReferenceTypeId,
        signature: String,
        status: i32,
    },
    ClassUnload {
        signature: String,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    Step {
        thread: ThreadId,
        location: Location,
    },
    Exception {
        thread: ThreadId,
        location: Location,
        exception: ObjectId,
        catch_location: Option<Location>,
    },
    MethodEntry {
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        thread: ThreadId,
        location: Location,
    },
    Unknown {
        kind: u8,
    },
}

/// Parse an event packet from JDWP
pub fn parse_event_packet(data: &[u8]) -> JdwpResult<EventSet> {
    let mut reader = PacketReader::new(data);

    let suspend_policy = SuspendPolicy::try_from(reader.read_u8()?)?;
    let event_count = reader.read_count()?;

    let mut events = Vec::with_capacity(event_count.min(64));

    for _ in 0..event_count {
        let kind = reader.read_u8()?;
        let request_id = reader.read_i32()?;

        let details = match kind {
            event_kinds::BREAKPOINT => EventKind::Breakpoint {
                thread: reader.read_u64()?,
                location: reader.read_location()?,
            },
            event_kinds::SINGLE_STEP => EventKind::Step {
                thread: reader.read_u64()?,
                location: reader.read_location()?,
            },
            event_kinds::METHOD_ENTRY => EventKind::MethodEntry {
                thread: reader.read_u64()?,
                location: reader.read_location()?,
            },
            event_kinds::METHOD_EXIT => EventKind::MethodExit {
                thread: reader.read_u64()?,
                location: reader.read_location()?,
            },
            event_kinds::EXCEPTION => {
                let thread = reader.read_u64()?;
                let location = reader.read_location()?;
                let exception = reader.read_tagged_value()?.object_id().unwrap_or(0);
                let catch_location = reader.read_location()?;
                EventKind::Exception {
                    thread,
                    location,
                    exception,
                    // Uncaught exceptions report a zeroed catch location
                    catch_location: (catch_location.class_id != 0).then_some(catch_location),
                }
            }
            event_kinds::CLASS_PREPARE => EventKind::ClassPrepare {
                thread: reader.read_u64()?,
                ref_type_tag: reader.read_u8()?,
                ref_type: reader.read_u64()?,
                signature: reader.read_string()?,
                status: reader.read_i32()?,
            },
            event_kinds::CLASS_UNLOAD => EventKind::ClassUnload {
                signature: reader.read_string()?,
            },
            event_kinds::VM_START => EventKind::VMStart {
                thread: reader.read_u64()?,
            },
            event_kinds::VM_DEATH => EventKind::VMDeath,
            event_kinds::THREAD_START => EventKind::ThreadStart {
                thread: reader.read_u64()?,
            },
            event_kinds::THREAD_DEATH => EventKind::ThreadDeath {
                thread: reader.read_u64()?,
            },
            _ => {
                // Payload size is unknown, nothing after this event can be decoded
                warn!("Unsupported event kind: {}", kind);
                events.push(Event {
                    kind,
                    request_id,
                    details: EventKind::Unknown { kind },
                });
                break;
            }
        };

        events.push(Event {
            kind,
            request_id,
            details,
        });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}
