// ThreadReference command implementations
//
// Commands for working with threads (frames, status, suspend/resume)

use crate::commands::{command_sets, thread_commands, vm_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::PacketReader;
use crate::types::{FrameId, Location, ThreadId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Stack frame information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: FrameId,
    pub location: Location,
}

fn thread_payload(thread_id: ThreadId) -> Vec<u8> {
    let mut data = Vec::with_capacity(8);
    data.put_u64(thread_id);
    data
}

impl JdwpConnection {
    /// Get stack frames for a thread (ThreadReference.Frames command)
    ///
    /// `start_frame` 0 is the top frame; `length` -1 means all remaining frames.
    pub async fn get_frames(
        &self,
        thread_id: ThreadId,
        start_frame: i32,
        length: i32,
    ) -> JdwpResult<Vec<Frame>> {
        let mut data = thread_payload(thread_id);
        data.put_i32(start_frame);
        data.put_i32(length);

        let reply = self
            .send(command_sets::THREAD_REFERENCE, thread_commands::FRAMES, data)
            .await?;
        let mut reader = PacketReader::new(&reply);

        let frames_count = reader.read_count()?;
        let mut frames = Vec::with_capacity(frames_count);

        for _ in 0..frames_count {
            frames.push(Frame {
                frame_id: reader.read_u64()?,
                location: reader.read_location()?,
            });
        }

        Ok(frames)
    }

    /// Number of frames on a suspended thread's stack (ThreadReference.FrameCount)
    pub async fn get_frame_count(&self, thread_id: ThreadId) -> JdwpResult<i32> {
        let reply = self
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::FRAME_COUNT,
                thread_payload(thread_id),
            )
            .await?;
        PacketReader::new(&reply).read_i32()
    }

    /// Get thread name (ThreadReference.Name)
    pub async fn get_thread_name(&self, thread_id: ThreadId) -> JdwpResult<String> {
        let reply = self
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::NAME,
                thread_payload(thread_id),
            )
            .await?;
        PacketReader::new(&reply).read_string()
    }

    /// Suspend a single thread (ThreadReference.Suspend)
    pub async fn suspend_thread(&self, thread_id: ThreadId) -> JdwpResult<()> {
        self.send(
            command_sets::THREAD_REFERENCE,
            thread_commands::SUSPEND,
            thread_payload(thread_id),
        )
        .await?;
        Ok(())
    }

    /// Resume a single thread (ThreadReference.Resume)
    pub async fn resume_thread(&self, thread_id: ThreadId) -> JdwpResult<()> {
        self.send(
            command_sets::THREAD_REFERENCE,
            thread_commands::RESUME,
            thread_payload(thread_id),
        )
        .await?;
        Ok(())
    }

    /// VM-side suspend count of a thread (ThreadReference.SuspendCount)
    pub async fn get_suspend_count(&self, thread_id: ThreadId) -> JdwpResult<i32> {
        let reply = self
            .send(
                command_sets::THREAD_REFERENCE,
                thread_commands::SUSPEND_COUNT,
                thread_payload(thread_id),
            )
            .await?;
        PacketReader::new(&reply).read_i32()
    }

    /// Get all threads (VirtualMachine.AllThreads)
    pub async fn get_all_threads(&self) -> JdwpResult<Vec<ThreadId>> {
        let reply = self
            .send(command_sets::VIRTUAL_MACHINE, vm_commands::ALL_THREADS, Vec::new())
            .await?;
        let mut reader = PacketReader::new(&reply);

        let threads_count = reader.read_count()?;
        let mut threads = Vec::with_capacity(threads_count);

        for _ in 0..threads_count {
            threads.push(reader.read_u64()?);
        }

        Ok(threads)
    }

    /// Suspend all threads (VirtualMachine.Suspend)
    pub async fn suspend_all(&self) -> JdwpResult<()> {
        self.send(command_sets::VIRTUAL_MACHINE, vm_commands::SUSPEND, Vec::new())
            .await?;
        Ok(())
    }

    /// Resume all threads (VirtualMachine.Resume)
    pub async fn resume_all(&self) -> JdwpResult<()> {
        self.send(command_sets::VIRTUAL_MACHINE, vm_commands::RESUME, Vec::new())
            .await?;
        Ok(())
    }
}
