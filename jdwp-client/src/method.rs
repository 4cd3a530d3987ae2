// Method command implementations
//
// Line tables map bytecode indices to source lines and back

use crate::commands::{command_sets, method_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::PacketReader;
use crate::types::{MethodId, ReferenceTypeId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Line table entry - maps source line to bytecode index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineTableEntry {
    pub line_code_index: u64, // bytecode index
    pub line_number: i32,     // source line number
}

/// Complete line table for a method
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineTable {
    pub start: u64, // starting bytecode index
    pub end: u64,   // ending bytecode index
    pub lines: Vec<LineTableEntry>,
}

impl LineTable {
    /// Source line covering a bytecode index
    ///
    /// Picks the entry with the greatest start index not past `index`.
    pub fn line_for_index(&self, index: u64) -> Option<i32> {
        self.lines
            .iter()
            .filter(|entry| entry.line_code_index <= index)
            .max_by_key(|entry| entry.line_code_index)
            .map(|entry| entry.line_number)
    }

    /// Every bytecode index where `line` begins, in ascending order
    pub fn indices_for_line(&self, line: i32) -> Vec<u64> {
        let mut indices: Vec<u64> = self
            .lines
            .iter()
            .filter(|entry| entry.line_number == line)
            .map(|entry| entry.line_code_index)
            .collect();
        indices.sort_unstable();
        indices
    }
}

impl JdwpConnection {
    /// Get line table for a method (Method.LineTable command)
    pub async fn get_line_table(
        &self,
        ref_type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> JdwpResult<LineTable> {
        let mut data = Vec::with_capacity(16);
        data.put_u64(ref_type_id);
        data.put_u64(method_id);

        let reply = self
            .send(command_sets::METHOD, method_commands::LINE_TABLE, data)
            .await?;
        let mut reader = PacketReader::new(&reply);

        let start = reader.read_u64()?;
        let end = reader.read_u64()?;

        let lines_count = reader.read_count()?;
        let mut lines = Vec::with_capacity(lines_count);

        for _ in 0..lines_count {
            lines.push(LineTableEntry {
                line_code_index: reader.read_u64()?,
                line_number: reader.read_i32()?,
            });
        }

        Ok(LineTable { start, end, lines })
    }
}
