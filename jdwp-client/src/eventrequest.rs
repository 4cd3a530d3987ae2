// EventRequest command implementations
//
// Set up event requests (breakpoints, steps, class prepare, etc.)

use crate::commands::{command_sets, event_commands, event_kinds, modifier_kinds};
use crate::connection::JdwpConnection;
use crate::protocol::{JdwpError, JdwpResult};
use crate::reader::{PacketReader, PacketWriter};
use crate::types::{Location, ObjectId, ReferenceTypeId, RequestId, ThreadId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Suspend policy for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SuspendPolicy {
    None = 0,
    EventThread = 1,
    All = 2,
}

impl TryFrom<u8> for SuspendPolicy {
    type Error = JdwpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SuspendPolicy::None),
            1 => Ok(SuspendPolicy::EventThread),
            2 => Ok(SuspendPolicy::All),
            other => Err(JdwpError::Protocol(format!(
                "Invalid suspend policy: {}",
                other
            ))),
        }
    }
}

// Event request modifiers
#[derive(Debug, Clone)]
pub enum EventModifier {
    Count(i32),
    ThreadOnly(ThreadId),
    ClassOnly(ReferenceTypeId),
    ClassMatch(String),
    ClassExclude(String),
    LocationOnly(Location),
    ExceptionOnly {
        ref_type: ReferenceTypeId,
        caught: bool,
        uncaught: bool,
    },
    Step {
        thread: ThreadId,
        size: i32,
        depth: i32,
    },
    InstanceOnly(ObjectId),
}

impl EventModifier {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            EventModifier::Count(count) => {
                buf.put_u8(modifier_kinds::COUNT);
                buf.put_i32(*count);
            }
            EventModifier::ThreadOnly(thread) => {
                buf.put_u8(modifier_kinds::THREAD_ONLY);
                buf.put_u64(*thread);
            }
            EventModifier::ClassOnly(class) => {
                buf.put_u8(modifier_kinds::CLASS_ONLY);
                buf.put_u64(*class);
            }
            EventModifier::ClassMatch(pattern) => {
                buf.put_u8(modifier_kinds::CLASS_MATCH);
                buf.put_jdwp_string(pattern);
            }
            EventModifier::ClassExclude(pattern) => {
                buf.put_u8(modifier_kinds::CLASS_EXCLUDE);
                buf.put_jdwp_string(pattern);
            }
            EventModifier::LocationOnly(location) => {
                buf.put_u8(modifier_kinds::LOCATION_ONLY);
                buf.put_location(location);
            }
            EventModifier::ExceptionOnly {
                ref_type,
                caught,
                uncaught,
            } => {
                buf.put_u8(modifier_kinds::EXCEPTION_ONLY);
                buf.put_u64(*ref_type);
                buf.put_u8(*caught as u8);
                buf.put_u8(*uncaught as u8);
            }
            EventModifier::Step {
                thread,
                size,
                depth,
            } => {
                buf.put_u8(modifier_kinds::STEP);
                buf.put_u64(*thread);
                buf.put_i32(*size);
                buf.put_i32(*depth);
            }
            EventModifier::InstanceOnly(object) => {
                buf.put_u8(modifier_kinds::INSTANCE_ONLY);
                buf.put_u64(*object);
            }
        }
    }
}

/// Encode an EventRequest.Set payload
pub fn encode_set_request(
    event_kind: u8,
    suspend_policy: SuspendPolicy,
    modifiers: &[EventModifier],
) -> Vec<u8> {
    let mut data = Vec::new();
    data.put_u8(event_kind);
    data.put_u8(suspend_policy as u8);
    data.put_i32(modifiers.len() as i32);
    for modifier in modifiers {
        modifier.encode(&mut data);
    }
    data
}

impl JdwpConnection {
    /// Register an event request (EventRequest.Set command)
    /// Returns the request ID assigned by the VM
    pub async fn set_event_request(
        &self,
        event_kind: u8,
        suspend_policy: SuspendPolicy,
        modifiers: &[EventModifier],
    ) -> JdwpResult<RequestId> {
        let data = encode_set_request(event_kind, suspend_policy, modifiers);
        let reply = self
            .send(command_sets::EVENT_REQUEST, event_commands::SET, data)
            .await?;
        PacketReader::new(&reply).read_i32()
    }

    /// Set a breakpoint at a specific location
    pub async fn set_breakpoint(
        &self,
        location: Location,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<RequestId> {
        self.set_event_request(
            event_kinds::BREAKPOINT,
            suspend_policy,
            &[EventModifier::LocationOnly(location)],
        )
        .await
    }

    /// Request a single step event on a thread
    ///
    /// The request fires once; class exclusion patterns keep the step out of filtered code.
    pub async fn set_step(
        &self,
        thread: ThreadId,
        size: i32,
        depth: i32,
        suspend_policy: SuspendPolicy,
        class_excludes: &[String],
    ) -> JdwpResult<RequestId> {
        let mut modifiers = vec![EventModifier::Step {
            thread,
            size,
            depth,
        }];
        modifiers.extend(
            class_excludes
                .iter()
                .map(|pattern| EventModifier::ClassExclude(pattern.clone())),
        );
        modifiers.push(EventModifier::Count(1));

        self.set_event_request(event_kinds::SINGLE_STEP, suspend_policy, &modifiers)
            .await
    }

    /// Request notification when classes matching a pattern are prepared
    pub async fn set_class_prepare(
        &self,
        pattern: &str,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<RequestId> {
        self.set_event_request(
            event_kinds::CLASS_PREPARE,
            suspend_policy,
            &[EventModifier::ClassMatch(pattern.to_string())],
        )
        .await
    }

    /// Clear an event request by kind and ID (EventRequest.Clear command)
    pub async fn clear_event_request(&self, event_kind: u8, request_id: RequestId) -> JdwpResult<()> {
        let mut data = Vec::new();
        data.put_u8(event_kind);
        data.put_i32(request_id);

        self.send(command_sets::EVENT_REQUEST, event_commands::CLEAR, data)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_request_layout() {
        let data = encode_set_request(
            event_kinds::SINGLE_STEP,
            SuspendPolicy::All,
            &[
                EventModifier::Step {
                    thread: 3,
                    size: 1,
                    depth: 1,
                },
                EventModifier::Count(1),
            ],
        );

        assert_eq!(data[0], event_kinds::SINGLE_STEP);
        assert_eq!(data[1], 2);
        assert_eq!(&data[2..6], &2i32.to_be_bytes());
        assert_eq!(data[6], modifier_kinds::STEP);
        // kind + policy + count + (tag + thread + size + depth) + (tag + count)
        assert_eq!(data.len(), 1 + 1 + 4 + (1 + 8 + 4 + 4) + (1 + 4));
    }

    #[test]
    fn test_policy_from_wire() {
        assert_eq!(SuspendPolicy::try_from(1).unwrap(), SuspendPolicy::EventThread);
        assert!(SuspendPolicy::try_from(3).is_err());
    }
}
