// Step state carried from the step command to the step event

use super::{MethodFilter, StepDepth, StepSize};
use crate::position::SourcePosition;
use crate::vm::MethodDescriptor;
use jdwp_client::{Location, ThreadId};

/// Recorded when a step is issued, consumed when its event arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHint {
    pub thread: ThreadId,
    /// Depth the user asked for; re-issued steps may use another one
    pub depth: StepDepth,
    pub size: StepSize,
    /// Frame count when the step started
    pub frame_count: usize,
    pub origin: Location,
    pub origin_line: Option<u32>,
    pub method_filter: Option<MethodFilter>,
    pub ignore_filters: bool,
    pub restore_breakpoints: bool,
}

impl RequestHint {
    /// Still on the starting line of the starting frame
    pub fn at_origin(&self, location: &StepLocation) -> bool {
        self.size == StepSize::Line
            && location.frame_count == self.frame_count
            && location.location.same_method(&self.origin)
            && self.origin_line.is_some()
            && location.line == self.origin_line
    }
}

/// Facts about the location a step landed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLocation {
    pub location: Location,
    pub frame_count: usize,
    pub method: MethodDescriptor,
    pub caller_method: Option<MethodDescriptor>,
    /// Supertypes of the caller's declaring class, itself included
    pub caller_supertypes: Vec<String>,
    /// Supertypes of the declaring class, itself included
    pub supertypes: Vec<String>,
    pub line: Option<u32>,
    /// Declaring class matches an enabled class filter
    pub class_excluded: bool,
    pub source_position: Option<SourcePosition>,
}

impl StepLocation {
    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        self.method.declaring_type == type_name || self.supertypes.iter().any(|t| t == type_name)
    }
}
