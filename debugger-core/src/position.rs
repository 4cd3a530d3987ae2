// Source position lookup
//
// Mapping between code locations and source files lives outside the core. A
// lookup that finds nothing returns `None` and callers carry on without it.

use jdwp_client::Location;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    pub file: String,
    pub line: u32,
}

impl SourcePosition {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

pub trait PositionManager: Send + Sync {
    fn source_position(&self, location: &Location) -> Option<SourcePosition>;

    /// Class filter pattern covering the classes that may contain `position`
    fn class_prepare_pattern(&self, position: &SourcePosition) -> Option<String>;
}

/// Resolves nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPositions;

impl PositionManager for NoPositions {
    fn source_position(&self, _location: &Location) -> Option<SourcePosition> {
        None
    }

    fn class_prepare_pattern(&self, _position: &SourcePosition) -> Option<String> {
        None
    }
}
