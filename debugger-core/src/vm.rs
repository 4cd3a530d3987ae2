// Remote VM abstraction
//
// Everything the coordination core asks of the debuggee goes through `VirtualMachine`.
// Methods return boxed futures so the trait stays object safe and one session can
// hold an `Arc<dyn VirtualMachine>` backed by JDWP or by the in-memory mock.

use crate::error::DebuggerResult;
use crate::stepping::{StepDepth, StepSize};
use futures::future::BoxFuture;
use jdwp_client::commands::event_kinds;
use jdwp_client::invoke::InvokeResult;
use jdwp_client::types::{MethodId, ObjectId, ReferenceTypeId};
use jdwp_client::{EventSet, Location, RequestId, SuspendPolicy, ThreadId, Value};
use serde::{Deserialize, Serialize};

pub type VmFuture<'a, T> = BoxFuture<'a, DebuggerResult<T>>;

const ACC_STATIC: i32 = 0x0008;
const ACC_BRIDGE: i32 = 0x0040;
const ACC_SYNTHETIC: i32 = 0x1000;
// JDWP sets this bit for VM-generated methods not marked synthetic in the class file
const JDWP_SYNTHETIC: i32 = 0xf000_0000_u32 as i32;

/// A method as seen at a code location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Dotted name of the declaring class
    pub declaring_type: String,
    pub name: String,
    pub signature: String,
    pub modifiers: i32,
}

impl MethodDescriptor {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            signature: signature.into(),
            modifiers: 0,
        }
    }

    pub fn with_modifiers(mut self, modifiers: i32) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn is_synthetic(&self) -> bool {
        self.modifiers & ACC_SYNTHETIC != 0 || self.modifiers & JDWP_SYNTHETIC == JDWP_SYNTHETIC
    }

    pub fn is_bridge(&self) -> bool {
        self.modifiers & ACC_BRIDGE != 0
    }

    pub fn is_static(&self) -> bool {
        self.modifiers & ACC_STATIC != 0
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    pub fn is_lambda(&self) -> bool {
        self.is_synthetic() && self.name.starts_with("lambda$")
    }
}

/// A loaded (prepared) reference type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreparedClass {
    pub id: ReferenceTypeId,
    /// Dotted class name
    pub name: String,
}

/// Kinds of event requests the core creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Breakpoint,
    Step,
    ClassPrepare,
}

impl RequestKind {
    pub fn event_kind(self) -> u8 {
        match self {
            RequestKind::Breakpoint => event_kinds::BREAKPOINT,
            RequestKind::Step => event_kinds::SINGLE_STEP,
            RequestKind::ClassPrepare => event_kinds::CLASS_PREPARE,
        }
    }
}

/// Parameters of a single-step request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequestSpec {
    pub thread: ThreadId,
    pub size: StepSize,
    pub depth: StepDepth,
    pub policy: SuspendPolicy,
    pub class_excludes: Vec<String>,
}

/// Receiver of an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeTarget {
    Static { class: ReferenceTypeId },
    Instance { object: ObjectId, class: ReferenceTypeId },
}

/// A method call to run on a suspended debuggee thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub thread: ThreadId,
    pub target: InvokeTarget,
    pub method: MethodId,
    pub args: Vec<Value>,
    /// Keep other threads suspended while the call runs
    pub single_threaded: bool,
}

/// The debuggee as a black-box RPC service
pub trait VirtualMachine: Send + Sync + 'static {
    fn all_threads(&self) -> VmFuture<'_, Vec<ThreadId>>;

    fn suspend(&self) -> VmFuture<'_, ()>;

    fn resume(&self) -> VmFuture<'_, ()>;

    fn suspend_thread(&self, thread: ThreadId) -> VmFuture<'_, ()>;

    fn resume_thread(&self, thread: ThreadId) -> VmFuture<'_, ()>;

    /// Number of frames on a suspended thread
    fn frame_count(&self, thread: ThreadId) -> VmFuture<'_, usize>;

    /// Frame locations, top first
    fn frames(&self, thread: ThreadId, start: usize, len: usize) -> VmFuture<'_, Vec<Location>>;

    fn method(&self, location: Location) -> VmFuture<'_, MethodDescriptor>;

    /// Dotted names of the class itself, its superclasses and every implemented interface
    fn supertypes(&self, class: ReferenceTypeId) -> VmFuture<'_, Vec<String>>;

    fn line_number(&self, location: Location) -> VmFuture<'_, Option<u32>>;

    /// Loaded classes whose dotted name matches a class filter pattern
    fn loaded_classes(&self, pattern: String) -> VmFuture<'_, Vec<PreparedClass>>;

    /// Code locations where `line` starts, optionally restricted to one method name
    fn locations_of_line(
        &self,
        class: ReferenceTypeId,
        line: u32,
        method_name: Option<String>,
    ) -> VmFuture<'_, Vec<Location>>;

    fn create_breakpoint_request(&self, location: Location, policy: SuspendPolicy) -> VmFuture<'_, RequestId>;

    fn create_step_request(&self, spec: StepRequestSpec) -> VmFuture<'_, RequestId>;

    fn create_class_prepare_request(&self, pattern: String, policy: SuspendPolicy) -> VmFuture<'_, RequestId>;

    fn delete_request(&self, kind: RequestKind, request: RequestId) -> VmFuture<'_, ()>;

    fn invoke_method(&self, request: InvokeRequest) -> VmFuture<'_, InvokeResult>;

    /// Force a class to load through the thread's context class loader
    fn load_class(&self, thread: ThreadId, class_name: String) -> VmFuture<'_, ()>;

    fn disable_collection(&self, object: ObjectId) -> VmFuture<'_, ()>;

    fn enable_collection(&self, object: ObjectId) -> VmFuture<'_, ()>;

    /// Next event batch; `ProtocolDisconnected` once the debuggee is gone
    fn next_event_set(&self) -> VmFuture<'_, EventSet>;

    fn dispose(&self) -> VmFuture<'_, ()>;

    /// Forget anything cached about classes that were redefined
    fn forget_classes(&self, _classes: &[PreparedClass]) {}
}
