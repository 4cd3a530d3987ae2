// Method filters for smart step into

use super::hint::StepLocation;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Narrows a step into to one call on the current line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodFilter {
    /// A regular method; the declaring type matches any subtype
    Method {
        declaring_type: String,
        name: String,
        signature: Option<String>,
        calling_lines: Option<RangeInclusive<u32>>,
    },
    /// A lambda body, entered through the functional interface method
    Lambda {
        /// Method the lambda is written in
        enclosing_method: String,
        /// Index of the lambda within the enclosing method
        ordinal: Option<u32>,
        interface: String,
        interface_method: String,
        calling_lines: Option<RangeInclusive<u32>>,
    },
    /// Run to a method through a breakpoint; the step itself just resumes
    Breakpoint { declaring_type: String, name: String },
}

impl MethodFilter {
    pub fn method(declaring_type: impl Into<String>, name: impl Into<String>, signature: Option<String>) -> Self {
        MethodFilter::Method {
            declaring_type: declaring_type.into(),
            name: name.into(),
            signature,
            calling_lines: None,
        }
    }

    pub fn lambda(
        enclosing_method: impl Into<String>,
        ordinal: Option<u32>,
        interface: impl Into<String>,
        interface_method: impl Into<String>,
    ) -> Self {
        MethodFilter::Lambda {
            enclosing_method: enclosing_method.into(),
            ordinal,
            interface: interface.into(),
            interface_method: interface_method.into(),
            calling_lines: None,
        }
    }

    pub fn breakpoint(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        MethodFilter::Breakpoint {
            declaring_type: declaring_type.into(),
            name: name.into(),
        }
    }

    /// Lines spanned by the call expression; ignored for breakpoint filters
    pub fn with_calling_lines(mut self, lines: RangeInclusive<u32>) -> Self {
        match &mut self {
            MethodFilter::Method { calling_lines, .. } | MethodFilter::Lambda { calling_lines, .. } => {
                *calling_lines = Some(lines);
            }
            MethodFilter::Breakpoint { .. } => {}
        }
        self
    }

    pub fn calling_lines(&self) -> Option<&RangeInclusive<u32>> {
        match self {
            MethodFilter::Method { calling_lines, .. } | MethodFilter::Lambda { calling_lines, .. } => {
                calling_lines.as_ref()
            }
            MethodFilter::Breakpoint { .. } => None,
        }
    }

    pub fn is_breakpoint(&self) -> bool {
        matches!(self, MethodFilter::Breakpoint { .. })
    }

    pub fn matches(&self, location: &StepLocation) -> bool {
        let method = &location.method;
        match self {
            MethodFilter::Method {
                declaring_type,
                name,
                signature,
                ..
            } => {
                !method.is_bridge()
                    && method.name == *name
                    && signature.as_ref().map_or(true, |s| *s == method.signature)
                    && location.is_assignable_to(declaring_type)
            }
            MethodFilter::Lambda {
                enclosing_method,
                ordinal,
                interface,
                interface_method,
                ..
            } => {
                if !method.is_lambda() {
                    return false;
                }
                let Some(suffix) = method
                    .name
                    .strip_prefix("lambda$")
                    .and_then(|rest| rest.strip_prefix(enclosing_method.as_str()))
                    .and_then(|rest| rest.strip_prefix('$'))
                else {
                    return false;
                };
                if let Some(ordinal) = ordinal {
                    if suffix.parse::<u32>().ok() != Some(*ordinal) {
                        return false;
                    }
                }
                match &location.caller_method {
                    Some(caller) => {
                        caller.name == *interface_method
                            && location.caller_supertypes.iter().any(|t| t == interface)
                    }
                    None => false,
                }
            }
            MethodFilter::Breakpoint { declaring_type, name } => {
                method.name == *name && location.is_assignable_to(declaring_type)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::MethodDescriptor;
    use jdwp_client::Location;

    fn location(method: MethodDescriptor, supertypes: &[&str]) -> StepLocation {
        StepLocation {
            location: Location::new(1, 1, 0),
            frame_count: 2,
            method,
            caller_method: None,
            caller_supertypes: Vec::new(),
            supertypes: supertypes.iter().map(|s| s.to_string()).collect(),
            line: Some(3),
            class_excluded: false,
            source_position: None,
        }
    }

    #[test]
    fn test_method_filter_accepts_subtypes() {
        let filter = MethodFilter::method("java.lang.Runnable", "run", Some("()V".to_string()));
        let impl_method = MethodDescriptor::new("com.example.Task", "run", "()V");
        assert!(filter.matches(&location(impl_method.clone(), &["com.example.Task", "java.lang.Runnable"])));
        assert!(!filter.matches(&location(impl_method, &["com.example.Task"])));

        let bridge = MethodDescriptor::new("com.example.Task", "run", "()V").with_modifiers(0x1041);
        assert!(!filter.matches(&location(bridge, &["com.example.Task", "java.lang.Runnable"])));
    }

    #[test]
    fn test_lambda_filter_requires_interface_caller() {
        let filter = MethodFilter::lambda("main", Some(1), "java.util.function.Function", "apply");
        let body = MethodDescriptor::new("com.example.App", "lambda$main$1", "(I)I").with_modifiers(0x100a);

        let mut loc = location(body.clone(), &["com.example.App"]);
        assert!(!filter.matches(&loc));

        loc.caller_method = Some(MethodDescriptor::new("com.example.App$$Lambda$14", "apply", "(Ljava/lang/Object;)Ljava/lang/Object;"));
        loc.caller_supertypes = vec!["com.example.App$$Lambda$14".into(), "java.util.function.Function".into()];
        assert!(filter.matches(&loc));

        let other = MethodDescriptor::new("com.example.App", "lambda$main$0", "(I)I").with_modifiers(0x100a);
        let mut other_loc = location(other, &["com.example.App"]);
        other_loc.caller_method = loc.caller_method.clone();
        other_loc.caller_supertypes = loc.caller_supertypes.clone();
        assert!(!filter.matches(&other_loc));
    }

    #[test]
    fn test_calling_lines_not_kept_for_breakpoint_filter() {
        let filter = MethodFilter::breakpoint("com.example.App", "target").with_calling_lines(1..=2);
        assert!(filter.calling_lines().is_none());
        assert!(filter.is_breakpoint());

        let filter = MethodFilter::method("com.example.App", "target", None).with_calling_lines(1..=2);
        assert_eq!(filter.calling_lines(), Some(&(1..=2)));
    }
}
