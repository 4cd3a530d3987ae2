// Method invocation in the target VM
//
// ClassType.InvokeMethod and ObjectReference.InvokeMethod share the reply layout:
// a tagged return value followed by a tagged exception object (0 when none).

use crate::commands::{class_type_commands, command_sets, invoke_options, object_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{PacketReader, PacketWriter};
use crate::types::{ClassId, MethodId, ObjectId, ThreadId, Value};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Outcome of an invocation: either a return value or a thrown exception
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResult {
    pub value: Value,
    pub exception: Option<ObjectId>,
}

fn put_invoke_tail(data: &mut Vec<u8>, thread: ThreadId, method: MethodId, args: &[Value], options: i32) {
    data.put_u64(thread);
    data.put_u64(method);
    data.put_i32(args.len() as i32);
    for arg in args {
        data.put_tagged_value(arg);
    }
    data.put_i32(options);
}

fn invoke_flags(single_threaded: bool) -> i32 {
    if single_threaded {
        invoke_options::SINGLE_THREADED
    } else {
        0
    }
}

fn read_invoke_result(reply: &[u8]) -> JdwpResult<InvokeResult> {
    let mut reader = PacketReader::new(reply);
    let value = reader.read_tagged_value()?;
    let exception = reader.read_tagged_value()?.object_id();
    Ok(InvokeResult { value, exception })
}

impl JdwpConnection {
    /// Invoke a static method on `thread` (ClassType.InvokeMethod)
    ///
    /// The thread must be suspended by an event; the VM resumes it for the duration of the call.
    pub async fn invoke_static_method(
        &self,
        class_id: ClassId,
        thread: ThreadId,
        method: MethodId,
        args: &[Value],
        single_threaded: bool,
    ) -> JdwpResult<InvokeResult> {
        let mut data = Vec::new();
        data.put_u64(class_id);
        put_invoke_tail(&mut data, thread, method, args, invoke_flags(single_threaded));

        let reply = self
            .send(command_sets::CLASS_TYPE, class_type_commands::INVOKE_METHOD, data)
            .await?;
        read_invoke_result(&reply)
    }

    /// Invoke an instance method on `object` (ObjectReference.InvokeMethod)
    pub async fn invoke_instance_method(
        &self,
        object: ObjectId,
        thread: ThreadId,
        class_id: ClassId,
        method: MethodId,
        args: &[Value],
        single_threaded: bool,
    ) -> JdwpResult<InvokeResult> {
        let mut data = Vec::new();
        data.put_u64(object);
        data.put_u64(thread);
        data.put_u64(class_id);
        data.put_u64(method);
        data.put_i32(args.len() as i32);
        for arg in args {
            data.put_tagged_value(arg);
        }
        data.put_i32(invoke_flags(single_threaded));

        let reply = self
            .send(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::INVOKE_METHOD,
                data,
            )
            .await?;
        read_invoke_result(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tags;

    #[test]
    fn test_exception_reply_is_detected() {
        let mut reply = Vec::new();
        reply.put_tagged_value(&Value::object(tags::OBJECT, 0));
        reply.put_tagged_value(&Value::object(tags::OBJECT, 0x77));

        let result = read_invoke_result(&reply).unwrap();
        assert_eq!(result.exception, Some(0x77));
    }

    #[test]
    fn test_normal_return_has_no_exception() {
        let mut reply = Vec::new();
        reply.put_tagged_value(&Value::int(42));
        reply.put_tagged_value(&Value::object(tags::OBJECT, 0));

        let result = read_invoke_result(&reply).unwrap();
        assert_eq!(result.value, Value::int(42));
        assert!(result.exception.is_none());
    }
}
