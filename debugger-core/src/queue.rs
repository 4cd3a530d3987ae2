// Priority lanes backing the manager thread's command queue

use crate::command::{DebuggerCommand, Priority};
use std::collections::VecDeque;

pub(crate) type BoxedCommand = Box<dyn DebuggerCommand>;

#[derive(Default)]
pub(crate) struct CommandLanes {
    lanes: [VecDeque<BoxedCommand>; 4],
    closed: bool,
}

impl CommandLanes {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append to the command's lane; hands the command back when closed
    pub fn push_back(&mut self, cmd: BoxedCommand) -> Result<(), BoxedCommand> {
        if self.closed && !cmd.is_forced() {
            return Err(cmd);
        }
        self.lanes[cmd.priority().lane()].push_back(cmd);
        Ok(())
    }

    /// Put a command ahead of everything waiting, regardless of priority
    pub fn push_front(&mut self, cmd: BoxedCommand) -> Result<(), BoxedCommand> {
        if self.closed && !cmd.is_forced() {
            return Err(cmd);
        }
        self.lanes[Priority::High.lane()].push_front(cmd);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<BoxedCommand> {
        self.lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    /// Mark closed and take every queued command that is not forced
    pub fn close(&mut self) -> Vec<BoxedCommand> {
        self.closed = true;
        let mut cancelled = Vec::new();
        for lane in self.lanes.iter_mut() {
            let (forced, rest): (VecDeque<_>, VecDeque<_>) =
                lane.drain(..).partition(|cmd| cmd.is_forced());
            *lane = forced;
            cancelled.extend(rest);
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::command;
    use futures::FutureExt;

    fn cmd(priority: Priority, name: &'static str) -> BoxedCommand {
        Box::new(command(priority, |_cx| async { Ok(()) }.boxed()).named(name))
    }

    fn drain_names(lanes: &mut CommandLanes) -> Vec<String> {
        std::iter::from_fn(|| lanes.pop())
            .map(|c| c.name().to_string())
            .collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut lanes = CommandLanes::default();
        for (priority, name) in [
            (Priority::Low, "low"),
            (Priority::Normal, "normal-1"),
            (Priority::Lowest, "lowest"),
            (Priority::High, "high"),
            (Priority::Normal, "normal-2"),
        ] {
            assert!(lanes.push_back(cmd(priority, name)).is_ok());
        }

        assert_eq!(
            drain_names(&mut lanes),
            vec!["high", "normal-1", "normal-2", "low", "lowest"]
        );
    }

    #[test]
    fn test_push_front_jumps_the_queue() {
        let mut lanes = CommandLanes::default();
        assert!(lanes.push_back(cmd(Priority::High, "queued")).is_ok());
        assert!(lanes.push_front(cmd(Priority::Lowest, "nested")).is_ok());
        assert_eq!(drain_names(&mut lanes), vec!["nested", "queued"]);
    }

    #[test]
    fn test_close_keeps_forced_commands() {
        let mut lanes = CommandLanes::default();
        assert!(lanes.push_back(cmd(Priority::Normal, "plain")).is_ok());
        let forced: BoxedCommand =
            Box::new(command(Priority::High, |_cx| async { Ok(()) }.boxed()).named("switch-back").forced());
        assert!(lanes.push_back(forced).is_ok());

        let cancelled = lanes.close();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].name(), "plain");
        assert_eq!(lanes.len(), 1);
        assert!(lanes.push_back(cmd(Priority::High, "late")).is_err());
    }
}
