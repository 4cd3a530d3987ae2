// ReferenceType and ClassType command implementations
//
// Commands for working with classes, interfaces, and their hierarchy

use crate::commands::{class_type_commands, command_sets, reference_type_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::PacketReader;
use crate::types::{ClassId, MethodId, ReferenceTypeId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Method information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

fn type_payload(ref_type_id: ReferenceTypeId) -> Vec<u8> {
    let mut data = Vec::with_capacity(8);
    data.put_u64(ref_type_id);
    data
}

impl JdwpConnection {
    /// Get methods for a reference type (ReferenceType.Methods command)
    pub async fn get_methods(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<Vec<MethodInfo>> {
        let reply = self
            .send(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::METHODS,
                type_payload(ref_type_id),
            )
            .await?;
        let mut reader = PacketReader::new(&reply);

        let methods_count = reader.read_count()?;
        let mut methods = Vec::with_capacity(methods_count);

        for _ in 0..methods_count {
            methods.push(MethodInfo {
                method_id: reader.read_u64()?,
                name: reader.read_string()?,
                signature: reader.read_string()?,
                mod_bits: reader.read_i32()?,
            });
        }

        Ok(methods)
    }

    /// JNI signature of a reference type (ReferenceType.Signature)
    pub async fn get_signature(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<String> {
        let reply = self
            .send(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::SIGNATURE,
                type_payload(ref_type_id),
            )
            .await?;
        PacketReader::new(&reply).read_string()
    }

    /// Directly implemented interfaces (ReferenceType.Interfaces)
    pub async fn get_interfaces(&self, ref_type_id: ReferenceTypeId) -> JdwpResult<Vec<ReferenceTypeId>> {
        let reply = self
            .send(
                command_sets::REFERENCE_TYPE,
                reference_type_commands::INTERFACES,
                type_payload(ref_type_id),
            )
            .await?;
        let mut reader = PacketReader::new(&reply);

        let count = reader.read_count()?;
        let mut interfaces = Vec::with_capacity(count);
        for _ in 0..count {
            interfaces.push(reader.read_u64()?);
        }
        Ok(interfaces)
    }

    /// Immediate superclass, `None` for java.lang.Object and interfaces (ClassType.Superclass)
    pub async fn get_superclass(&self, class_id: ClassId) -> JdwpResult<Option<ClassId>> {
        let reply = self
            .send(
                command_sets::CLASS_TYPE,
                class_type_commands::SUPERCLASS,
                type_payload(class_id),
            )
            .await?;
        let superclass = PacketReader::new(&reply).read_u64()?;
        Ok((superclass != 0).then_some(superclass))
    }
}
