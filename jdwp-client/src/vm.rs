// VirtualMachine command implementations
//
// These are the fundamental commands for interacting with the JVM

use crate::commands::{command_sets, vm_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{PacketReader, PacketWriter};
use crate::types::{ReferenceTypeId, StringId};
use serde::{Deserialize, Serialize};

/// JVM version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

/// Class information from ClassesBySignature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub ref_type_tag: u8, // 1=class, 2=interface, 3=array
    pub type_id: ReferenceTypeId,
    pub signature: String,
    pub status: i32,
}

impl JdwpConnection {
    /// Get JVM version information (VirtualMachine.Version command)
    pub async fn get_version(&self) -> JdwpResult<VmVersion> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::VERSION, Vec::new())
            .await?;
        let mut reader = PacketReader::new(&reply);

        Ok(VmVersion {
            description: reader.read_string()?,
            jdwp_major: reader.read_i32()?,
            jdwp_minor: reader.read_i32()?,
            vm_version: reader.read_string()?,
            vm_name: reader.read_string()?,
        })
    }

    /// Find loaded classes by signature (VirtualMachine.ClassesBySignature command)
    /// Signature format: "Lcom/example/MyClass;" for classes
    pub async fn classes_by_signature(&self, signature: &str) -> JdwpResult<Vec<ClassInfo>> {
        let mut data = Vec::new();
        data.put_jdwp_string(signature);

        let reply = self
            .send(
                command_sets::VIRTUAL_MACHINE,
                vm_commands::CLASSES_BY_SIGNATURE,
                data,
            )
            .await?;
        let mut reader = PacketReader::new(&reply);

        let classes_count = reader.read_count()?;
        let mut classes = Vec::with_capacity(classes_count);

        for _ in 0..classes_count {
            classes.push(ClassInfo {
                ref_type_tag: reader.read_u8()?,
                type_id: reader.read_u64()?,
                signature: signature.to_string(),
                status: reader.read_i32()?,
            });
        }

        Ok(classes)
    }

    /// Every loaded reference type with its signature (VirtualMachine.AllClasses)
    pub async fn all_classes(&self) -> JdwpResult<Vec<ClassInfo>> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::ALL_CLASSES, Vec::new())
            .await?;
        let mut reader = PacketReader::new(&reply);

        let classes_count = reader.read_count()?;
        let mut classes = Vec::with_capacity(classes_count);

        for _ in 0..classes_count {
            let ref_type_tag = reader.read_u8()?;
            let type_id = reader.read_u64()?;
            let signature = reader.read_string()?;
            let status = reader.read_i32()?;
            classes.push(ClassInfo {
                ref_type_tag,
                type_id,
                signature,
                status,
            });
        }

        Ok(classes)
    }

    /// Create a string in the target VM (VirtualMachine.CreateString)
    pub async fn create_string(&self, value: &str) -> JdwpResult<StringId> {
        let mut data = Vec::new();
        data.put_jdwp_string(value);

        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::CREATE_STRING, data)
            .await?;
        PacketReader::new(&reply).read_u64()
    }

    /// Release the debugger connection, letting the VM continue (VirtualMachine.Dispose)
    pub async fn dispose(&self) -> JdwpResult<()> {
        self.send(command_sets::VIRTUAL_MACHINE, vm_commands::DISPOSE, Vec::new())
            .await?;
        Ok(())
    }
}
