// Cursor helpers for reading and writing JDWP data types
//
// Object, reference type, method and frame IDs are assumed to be 8 bytes wide,
// which is what every HotSpot-derived VM reports from VirtualMachine.IDSizes.

use crate::protocol::{JdwpError, JdwpResult};
use crate::types::{tags, Location, Value, ValueData};
use bytes::{Buf, BufMut};

/// Bounds-checked reader over a reply or event payload
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, len: usize, what: &str) -> JdwpResult<()> {
        if self.buf.remaining() < len {
            return Err(JdwpError::Protocol(format!(
                "Not enough data for {}: need {}, have {}",
                what,
                len,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> JdwpResult<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> JdwpResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> JdwpResult<u16> {
        self.need(2, "u16")?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self) -> JdwpResult<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    pub fn read_u32(&mut self) -> JdwpResult<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> JdwpResult<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64())
    }

    /// Read a count prefix, rejecting negative values
    pub fn read_count(&mut self) -> JdwpResult<usize> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| JdwpError::Protocol(format!("Negative element count: {}", count)))
    }

    /// Read a JDWP string (4-byte length prefix + UTF-8 bytes)
    pub fn read_string(&mut self) -> JdwpResult<String> {
        let len = self.read_u32()? as usize;
        self.need(len, "string")?;

        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len);

        String::from_utf8(bytes)
            .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
    }

    pub fn read_location(&mut self) -> JdwpResult<Location> {
        Ok(Location {
            type_tag: self.read_u8()?,
            class_id: self.read_u64()?,
            method_id: self.read_u64()?,
            index: self.read_u64()?,
        })
    }

    /// Read a tag byte followed by the value it describes
    pub fn read_tagged_value(&mut self) -> JdwpResult<Value> {
        let tag = self.read_u8()?;
        self.read_value(tag)
    }

    /// Read an untagged value whose type is already known
    pub fn read_value(&mut self, tag: u8) -> JdwpResult<Value> {
        let data = match tag {
            tags::BYTE => {
                self.need(1, "byte value")?;
                ValueData::Byte(self.buf.get_i8())
            }
            tags::CHAR => ValueData::Char(self.read_u16()?),
            tags::DOUBLE => {
                self.need(8, "double value")?;
                ValueData::Double(self.buf.get_f64())
            }
            tags::FLOAT => {
                self.need(4, "float value")?;
                ValueData::Float(self.buf.get_f32())
            }
            tags::INT => ValueData::Int(self.read_i32()?),
            tags::LONG => {
                self.need(8, "long value")?;
                ValueData::Long(self.buf.get_i64())
            }
            tags::SHORT => {
                self.need(2, "short value")?;
                ValueData::Short(self.buf.get_i16())
            }
            tags::BOOLEAN => ValueData::Boolean(self.read_bool()?),
            tags::VOID => ValueData::Void,
            t if tags::is_object(t) => ValueData::Object(self.read_u64()?),
            _ => return Err(JdwpError::Protocol(format!("Unknown value tag: {}", tag))),
        };
        Ok(Value { tag, data })
    }
}

/// Writer side of the codec, implemented for packet payload buffers
pub trait PacketWriter {
    fn put_jdwp_string(&mut self, value: &str);
    fn put_location(&mut self, location: &Location);
    fn put_tagged_value(&mut self, value: &Value);
}

impl PacketWriter for Vec<u8> {
    fn put_jdwp_string(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.put_slice(value.as_bytes());
    }

    fn put_location(&mut self, location: &Location) {
        self.put_u8(location.type_tag);
        self.put_u64(location.class_id);
        self.put_u64(location.method_id);
        self.put_u64(location.index);
    }

    fn put_tagged_value(&mut self, value: &Value) {
        self.put_u8(value.tag);
        match value.data {
            ValueData::Byte(v) => self.put_i8(v),
            ValueData::Char(v) => self.put_u16(v),
            ValueData::Float(v) => self.put_f32(v),
            ValueData::Double(v) => self.put_f64(v),
            ValueData::Int(v) => self.put_i32(v),
            ValueData::Long(v) => self.put_i64(v),
            ValueData::Short(v) => self.put_i16(v),
            ValueData::Boolean(v) => self.put_u8(v as u8),
            ValueData::Object(id) => self.put_u64(id),
            ValueData::Void => {}
        }
    }
}
