// ObjectReference command implementations
//
// Commands for working with object instances

use crate::commands::{command_sets, object_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::PacketReader;
use crate::types::{ObjectId, ReferenceTypeId};
use bytes::BufMut;

fn object_payload(object_id: ObjectId) -> Vec<u8> {
    let mut data = Vec::with_capacity(8);
    data.put_u64(object_id);
    data
}

impl JdwpConnection {
    /// Get the reference type (class) of an object (ObjectReference.ReferenceType command)
    pub async fn get_object_reference_type(&self, object_id: ObjectId) -> JdwpResult<ReferenceTypeId> {
        let reply = self
            .send(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::REFERENCE_TYPE,
                object_payload(object_id),
            )
            .await?;
        let mut reader = PacketReader::new(&reply);

        let _type_tag = reader.read_u8()?;
        reader.read_u64()
    }

    /// Keep an object alive across resumes (ObjectReference.DisableCollection)
    pub async fn disable_collection(&self, object_id: ObjectId) -> JdwpResult<()> {
        self.send(
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::DISABLE_COLLECTION,
            object_payload(object_id),
        )
        .await?;
        Ok(())
    }

    /// Undo a previous `disable_collection` (ObjectReference.EnableCollection)
    pub async fn enable_collection(&self, object_id: ObjectId) -> JdwpResult<()> {
        self.send(
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::ENABLE_COLLECTION,
            object_payload(object_id),
        )
        .await?;
        Ok(())
    }
}
