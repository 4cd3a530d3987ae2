// Stepping
//
// A step is one protocol step request plus a `RequestHint`. When the step event
// arrives `next_step_depth` decides whether to stop there, issue another step or
// let the thread run.

mod engine;
mod filter;
mod hint;

pub use engine::SteppingEngine;
pub use filter::MethodFilter;
pub use hint::{RequestHint, StepLocation};

pub(crate) use engine::{handle_step_event, step_from_context, StepMode};

use crate::config::DebuggerSettings;
use jdwp_client::commands::{step_depths, step_sizes};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepDepth {
    Into,
    Over,
    Out,
}

impl StepDepth {
    pub fn code(self) -> i32 {
        match self {
            StepDepth::Into => step_depths::INTO,
            StepDepth::Over => step_depths::OVER,
            StepDepth::Out => step_depths::OUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepSize {
    Min,
    Line,
}

impl StepSize {
    pub fn code(self) -> i32 {
        match self {
            StepSize::Min => step_sizes::MIN,
            StepSize::Line => step_sizes::LINE,
        }
    }
}

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOptions {
    pub depth: StepDepth,
    pub size: StepSize,
    /// Step into filtered classes, constructors and initializers too
    pub ignore_filters: bool,
    /// Mute breakpoints until the step completes
    pub restore_breakpoints: bool,
    pub method_filter: Option<MethodFilter>,
}

impl StepOptions {
    pub fn new(depth: StepDepth) -> Self {
        Self {
            depth,
            size: StepSize::Line,
            ignore_filters: false,
            restore_breakpoints: false,
            method_filter: None,
        }
    }

    pub fn over() -> Self {
        Self::new(StepDepth::Over)
    }

    pub fn into() -> Self {
        Self::new(StepDepth::Into)
    }

    pub fn out() -> Self {
        Self::new(StepDepth::Out)
    }

    /// Smart step into a specific call on the current line
    pub fn smart_into(filter: MethodFilter) -> Self {
        Self {
            method_filter: Some(filter),
            ..Self::new(StepDepth::Into)
        }
    }

    pub fn with_size(mut self, size: StepSize) -> Self {
        self.size = size;
        self
    }

    pub fn ignoring_filters(mut self) -> Self {
        self.ignore_filters = true;
        self
    }

    pub fn restoring_breakpoints(mut self) -> Self {
        self.restore_breakpoints = true;
        self
    }
}

/// Outcome of a step event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepDecision {
    /// Stay suspended here
    Stop,
    /// Issue another step with this depth
    Continue(StepDepth),
    /// Let the thread run; nothing more to step to
    Resume,
}

/// Decide what to do at the location a step landed on
///
/// `location` is `None` when the location facts could not be resolved.
///
/// Stepping into a bridge method steps into again rather than resuming: the bridge
/// only forwards to the implementing method, which is where the step should land.
pub fn next_step_depth(
    hint: &RequestHint,
    location: Option<&StepLocation>,
    settings: &DebuggerSettings,
) -> StepDecision {
    let Some(location) = location else {
        return StepDecision::Stop;
    };
    let deeper = location.frame_count > hint.frame_count;
    let filter = hint.method_filter.as_ref();

    if let Some(filter) = filter {
        if filter.matches(location) && (deeper || filter.is_breakpoint()) {
            return StepDecision::Stop;
        }
    }

    if matches!(hint.depth, StepDepth::Over | StepDepth::Into) && hint.at_origin(location) {
        return StepDecision::Continue(hint.depth);
    }

    if hint.depth == StepDepth::Into && deeper {
        let method = &location.method;
        if settings.skip_synthetic_methods {
            if method.is_bridge() {
                return StepDecision::Continue(StepDepth::Into);
            }
            if method.is_synthetic() && !method.is_lambda() {
                return StepDecision::Continue(StepDepth::Out);
            }
        }
        if !hint.ignore_filters {
            if (settings.skip_constructors && method.is_constructor())
                || (settings.skip_class_initializers && method.is_static_initializer())
                || location.class_excluded
            {
                return StepDecision::Continue(StepDepth::Out);
            }
        }
        if filter.is_some() {
            return StepDecision::Continue(StepDepth::Out);
        }
    }

    if let Some(filter) = filter {
        if location.frame_count == hint.frame_count && location.location.same_method(&hint.origin) {
            if filter.is_breakpoint() {
                return StepDecision::Resume;
            }
            let in_call = match (filter.calling_lines(), location.line) {
                (Some(lines), Some(line)) => lines.contains(&line),
                _ => false,
            };
            return if in_call {
                StepDecision::Continue(StepDepth::Into)
            } else {
                StepDecision::Resume
            };
        }
    }

    StepDecision::Stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::MethodDescriptor;
    use jdwp_client::Location;

    const ORIGIN: Location = Location {
        type_tag: 1,
        class_id: 10,
        method_id: 100,
        index: 4,
    };

    fn hint(depth: StepDepth, filter: Option<MethodFilter>) -> RequestHint {
        RequestHint {
            thread: 1,
            depth,
            size: StepSize::Line,
            frame_count: 3,
            origin: ORIGIN,
            origin_line: Some(20),
            method_filter: filter,
            ignore_filters: false,
            restore_breakpoints: false,
        }
    }

    fn at(location: Location, frame_count: usize, method: MethodDescriptor, line: u32) -> StepLocation {
        StepLocation {
            location,
            frame_count,
            supertypes: vec![method.declaring_type.clone()],
            method,
            caller_method: None,
            caller_supertypes: Vec::new(),
            line: Some(line),
            class_excluded: false,
            source_position: None,
        }
    }

    fn origin_method() -> MethodDescriptor {
        MethodDescriptor::new("com.example.App", "main", "([Ljava/lang/String;)V")
    }

    fn callee(name: &str, modifiers: i32) -> (Location, MethodDescriptor) {
        (
            Location::new(11, 200, 0),
            MethodDescriptor::new("com.example.Service", name, "()V").with_modifiers(modifiers),
        )
    }

    #[test]
    fn test_unresolved_location_stops() {
        let settings = DebuggerSettings::default();
        assert_eq!(next_step_depth(&hint(StepDepth::Over, None), None, &settings), StepDecision::Stop);
    }

    #[test]
    fn test_same_line_continues() {
        let settings = DebuggerSettings::default();
        let here = at(Location { index: 9, ..ORIGIN }, 3, origin_method(), 20);
        assert_eq!(
            next_step_depth(&hint(StepDepth::Over, None), Some(&here), &settings),
            StepDecision::Continue(StepDepth::Over)
        );

        let next_line = at(Location { index: 12, ..ORIGIN }, 3, origin_method(), 21);
        assert_eq!(
            next_step_depth(&hint(StepDepth::Over, None), Some(&next_line), &settings),
            StepDecision::Stop
        );
    }

    #[test]
    fn test_step_into_skips_synthetic_and_filtered_code() {
        let settings = DebuggerSettings::default();
        let step = hint(StepDepth::Into, None);

        let (loc, bridge) = callee("compareTo", 0x1041);
        assert_eq!(
            next_step_depth(&step, Some(&at(loc, 4, bridge, 1)), &settings),
            StepDecision::Continue(StepDepth::Into)
        );

        let (loc, accessor) = callee("access$000", 0x1008);
        assert_eq!(
            next_step_depth(&step, Some(&at(loc, 4, accessor, 1)), &settings),
            StepDecision::Continue(StepDepth::Out)
        );

        let (loc, lambda) = callee("lambda$main$0", 0x100a);
        assert_eq!(next_step_depth(&step, Some(&at(loc, 4, lambda, 1)), &settings), StepDecision::Stop);

        let (loc, clinit) = callee("<clinit>", 0x8);
        assert_eq!(
            next_step_depth(&step, Some(&at(loc, 4, clinit, 1)), &settings),
            StepDecision::Continue(StepDepth::Out)
        );

        let (loc, ctor) = callee("<init>", 0x1);
        assert_eq!(next_step_depth(&step, Some(&at(loc, 4, ctor, 1)), &settings), StepDecision::Stop);

        let (loc, method) = callee("run", 0x1);
        let mut excluded = at(loc, 4, method, 1);
        excluded.class_excluded = true;
        assert_eq!(
            next_step_depth(&step, Some(&excluded), &settings),
            StepDecision::Continue(StepDepth::Out)
        );
        let mut forced = hint(StepDepth::Into, None);
        forced.ignore_filters = true;
        assert_eq!(next_step_depth(&forced, Some(&excluded), &settings), StepDecision::Stop);
    }

    #[test]
    fn test_synthetic_kept_when_not_skipping() {
        let settings = DebuggerSettings {
            skip_synthetic_methods: false,
            ..DebuggerSettings::default()
        };
        let (loc, accessor) = callee("access$000", 0x1008);
        assert_eq!(
            next_step_depth(&hint(StepDepth::Into, None), Some(&at(loc, 4, accessor, 1)), &settings),
            StepDecision::Stop
        );
    }

    #[test]
    fn test_method_filter_narrows_step_into() {
        let settings = DebuggerSettings::default();
        let filter = MethodFilter::method("com.example.Service", "target", None).with_calling_lines(20..=22);
        let step = hint(StepDepth::Into, Some(filter));

        let (loc, target) = callee("target", 0x1);
        assert_eq!(next_step_depth(&step, Some(&at(loc, 4, target, 5)), &settings), StepDecision::Stop);

        let (loc, other) = callee("other", 0x1);
        assert_eq!(
            next_step_depth(&step, Some(&at(loc, 4, other, 5)), &settings),
            StepDecision::Continue(StepDepth::Out)
        );

        let still_in_call = at(Location { index: 30, ..ORIGIN }, 3, origin_method(), 21);
        assert_eq!(
            next_step_depth(&step, Some(&still_in_call), &settings),
            StepDecision::Continue(StepDepth::Into)
        );

        let past_call = at(Location { index: 40, ..ORIGIN }, 3, origin_method(), 25);
        assert_eq!(next_step_depth(&step, Some(&past_call), &settings), StepDecision::Resume);
    }

    #[test]
    fn test_breakpoint_filter_resumes_at_origin_depth() {
        let settings = DebuggerSettings::default();
        let step = hint(StepDepth::Into, Some(MethodFilter::breakpoint("com.example.Service", "target")));

        let elsewhere = at(Location { index: 12, ..ORIGIN }, 3, origin_method(), 21);
        assert_eq!(next_step_depth(&step, Some(&elsewhere), &settings), StepDecision::Resume);

        let (loc, target) = callee("target", 0x1);
        assert_eq!(next_step_depth(&step, Some(&at(loc, 2, target, 5)), &settings), StepDecision::Stop);
    }

    #[test]
    fn test_decision_is_deterministic() {
        let settings = DebuggerSettings::default();
        let step = hint(StepDepth::Into, None);
        let (loc, accessor) = callee("access$000", 0x1008);
        let here = at(loc, 4, accessor, 1);
        let first = next_step_depth(&step, Some(&here), &settings);
        for _ in 0..10 {
            assert_eq!(next_step_depth(&step, Some(&here), &settings), first);
        }
    }
}
