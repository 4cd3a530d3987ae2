// JDWP binding of the VirtualMachine trait
//
// Type, method and line table lookups are cached per class; class redefinition is
// rare enough that the caches are simply invalidated for the redefined types.

use crate::config::ClassFilter;
use crate::error::{DebuggerError, DebuggerResult};
use crate::vm::{
    InvokeRequest, InvokeTarget, MethodDescriptor, PreparedClass, RequestKind, StepRequestSpec, VirtualMachine,
    VmFuture,
};
use futures::future::FutureExt;
use jdwp_client::commands::event_kinds;
use jdwp_client::invoke::InvokeResult;
use jdwp_client::method::LineTable;
use jdwp_client::protocol::error_codes;
use jdwp_client::reftype::MethodInfo;
use jdwp_client::types::{signature_to_class_name, tags, type_tags, MethodId, ObjectId, ReferenceTypeId};
use jdwp_client::{EventSet, JdwpConnection, JdwpError, Location, RequestId, SuspendPolicy, ThreadId, Value};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

const CLASS_SIGNATURE: &str = "Ljava/lang/Class;";
const FOR_NAME_SIGNATURE: &str = "(Ljava/lang/String;)Ljava/lang/Class;";

#[derive(Default)]
struct Caches {
    names: HashMap<ReferenceTypeId, String>,
    methods: HashMap<ReferenceTypeId, Arc<Vec<MethodInfo>>>,
    line_tables: HashMap<(ReferenceTypeId, MethodId), Arc<LineTable>>,
    supertypes: HashMap<ReferenceTypeId, Vec<String>>,
}

pub struct JdwpVirtualMachine {
    connection: JdwpConnection,
    caches: Mutex<Caches>,
}

impl JdwpVirtualMachine {
    /// Connect and request thread lifecycle events
    pub async fn connect(host: &str, port: u16, event_buffer: usize) -> DebuggerResult<Self> {
        let connection = JdwpConnection::connect_with_buffer(host, port, event_buffer).await?;
        let version = connection.get_version().await?;
        info!(
            "Connected to {} {} (JDWP {}.{})",
            version.vm_name, version.vm_version, version.jdwp_major, version.jdwp_minor
        );

        connection
            .set_event_request(event_kinds::THREAD_START, SuspendPolicy::None, &[])
            .await?;
        connection
            .set_event_request(event_kinds::THREAD_DEATH, SuspendPolicy::None, &[])
            .await?;

        Ok(Self {
            connection,
            caches: Mutex::new(Caches::default()),
        })
    }

    pub fn connection(&self) -> &JdwpConnection {
        &self.connection
    }

    fn invalidate(&self, classes: &[PreparedClass]) {
        let mut caches = self.caches.lock();
        for class in classes {
            caches.methods.remove(&class.id);
            caches.line_tables.retain(|(type_id, _), _| *type_id != class.id);
        }
        caches.supertypes.clear();
    }

    async fn class_name(&self, type_id: ReferenceTypeId) -> DebuggerResult<String> {
        if let Some(name) = self.caches.lock().names.get(&type_id) {
            return Ok(name.clone());
        }
        let name = signature_to_class_name(&self.connection.get_signature(type_id).await?);
        self.caches.lock().names.insert(type_id, name.clone());
        Ok(name)
    }

    async fn methods(&self, type_id: ReferenceTypeId) -> DebuggerResult<Arc<Vec<MethodInfo>>> {
        if let Some(methods) = self.caches.lock().methods.get(&type_id) {
            return Ok(methods.clone());
        }
        let methods = Arc::new(self.connection.get_methods(type_id).await?);
        self.caches.lock().methods.insert(type_id, methods.clone());
        Ok(methods)
    }

    /// Line table, or `None` for methods without line information
    async fn line_table(&self, type_id: ReferenceTypeId, method: MethodId) -> DebuggerResult<Option<Arc<LineTable>>> {
        if let Some(table) = self.caches.lock().line_tables.get(&(type_id, method)) {
            return Ok(Some(table.clone()));
        }
        let table = match self.connection.get_line_table(type_id, method).await {
            Ok(table) => Arc::new(table),
            Err(JdwpError::JdwpErrorCode(error_codes::ABSENT_INFORMATION, _)) => return Ok(None),
            Err(JdwpError::JdwpErrorCode(code, _)) if code == error_codes::NATIVE_METHOD => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.caches.lock().line_tables.insert((type_id, method), table.clone());
        Ok(Some(table))
    }

    async fn resolve_supertypes(&self, class: ReferenceTypeId) -> DebuggerResult<Vec<String>> {
        let mut names = Vec::new();
        let mut seen = Vec::new();
        let mut pending = VecDeque::from([class]);

        while let Some(type_id) = pending.pop_front() {
            if seen.contains(&type_id) {
                continue;
            }
            seen.push(type_id);
            names.push(self.class_name(type_id).await?);

            // Interfaces have no superclass; the VM answers INVALID_CLASS
            match self.connection.get_superclass(type_id).await {
                Ok(Some(superclass)) => pending.push_back(superclass),
                Ok(None) => {}
                Err(JdwpError::JdwpErrorCode(error_codes::INVALID_CLASS, _)) => {}
                Err(e) => return Err(e.into()),
            }
            pending.extend(self.connection.get_interfaces(type_id).await?);
        }
        Ok(names)
    }

    async fn invoke(&self, request: InvokeRequest) -> DebuggerResult<InvokeResult> {
        let (class, result) = match request.target {
            InvokeTarget::Static { class } => (
                class,
                self.connection
                    .invoke_static_method(class, request.thread, request.method, &request.args, request.single_threaded)
                    .await,
            ),
            InvokeTarget::Instance { object, class } => (
                class,
                self.connection
                    .invoke_instance_method(
                        object,
                        request.thread,
                        class,
                        request.method,
                        &request.args,
                        request.single_threaded,
                    )
                    .await,
            ),
        };
        match result {
            Ok(result) => Ok(result),
            Err(JdwpError::JdwpErrorCode(error_codes::CLASS_NOT_PREPARED, _)) => {
                Err(DebuggerError::ClassNotLoaded(self.class_name(class).await?))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Class.forName(name) on the thread
    async fn load(&self, thread: ThreadId, class_name: String) -> DebuggerResult<()> {
        let class = self
            .connection
            .classes_by_signature(CLASS_SIGNATURE)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DebuggerError::ClassNotLoaded("java.lang.Class".to_string()))?;
        let for_name = self
            .methods(class.type_id)
            .await?
            .iter()
            .find(|m| m.name == "forName" && m.signature == FOR_NAME_SIGNATURE)
            .map(|m| m.method_id)
            .ok_or_else(|| DebuggerError::Evaluation("Class.forName not found".to_string()))?;

        let name = self.connection.create_string(&class_name).await?;
        self.connection.disable_collection(name).await?;
        let result = self
            .connection
            .invoke_static_method(class.type_id, thread, for_name, &[Value::object(tags::STRING, name)], true)
            .await;
        self.connection.enable_collection(name).await.ok();

        let result = result?;
        if let Some(exception) = result.exception {
            return Err(DebuggerError::Evaluation(format!(
                "loading {} threw exception object {:x}",
                class_name, exception
            )));
        }
        debug!("Loaded {}", class_name);
        Ok(())
    }
}

impl VirtualMachine for JdwpVirtualMachine {
    fn all_threads(&self) -> VmFuture<'_, Vec<ThreadId>> {
        async move { Ok(self.connection.get_all_threads().await?) }.boxed()
    }

    fn suspend(&self) -> VmFuture<'_, ()> {
        async move { Ok(self.connection.suspend_all().await?) }.boxed()
    }

    fn resume(&self) -> VmFuture<'_, ()> {
        async move { Ok(self.connection.resume_all().await?) }.boxed()
    }

    fn suspend_thread(&self, thread: ThreadId) -> VmFuture<'_, ()> {
        async move { Ok(self.connection.suspend_thread(thread).await?) }.boxed()
    }

    fn resume_thread(&self, thread: ThreadId) -> VmFuture<'_, ()> {
        async move { Ok(self.connection.resume_thread(thread).await?) }.boxed()
    }

    fn frame_count(&self, thread: ThreadId) -> VmFuture<'_, usize> {
        async move { Ok(self.connection.get_frame_count(thread).await?.max(0) as usize) }.boxed()
    }

    fn frames(&self, thread: ThreadId, start: usize, len: usize) -> VmFuture<'_, Vec<Location>> {
        async move {
            if len == 0 {
                return Ok(Vec::new());
            }
            let frames = self
                .connection
                .get_frames(thread, start as i32, len as i32)
                .await?;
            Ok(frames.into_iter().map(|f| f.location).collect())
        }
        .boxed()
    }

    fn method(&self, location: Location) -> VmFuture<'_, MethodDescriptor> {
        async move {
            let declaring_type = self.class_name(location.class_id).await?;
            let methods = self.methods(location.class_id).await?;
            let method = methods
                .iter()
                .find(|m| m.method_id == location.method_id)
                .ok_or_else(|| {
                    DebuggerError::FilterResolution(format!(
                        "method {:x} not found in {}",
                        location.method_id, declaring_type
                    ))
                })?;
            Ok(MethodDescriptor::new(declaring_type, method.name.clone(), method.signature.clone())
                .with_modifiers(method.mod_bits))
        }
        .boxed()
    }

    fn supertypes(&self, class: ReferenceTypeId) -> VmFuture<'_, Vec<String>> {
        async move {
            if let Some(names) = self.caches.lock().supertypes.get(&class) {
                return Ok(names.clone());
            }
            let names = self.resolve_supertypes(class).await?;
            self.caches.lock().supertypes.insert(class, names.clone());
            Ok(names)
        }
        .boxed()
    }

    fn line_number(&self, location: Location) -> VmFuture<'_, Option<u32>> {
        async move {
            let table = self.line_table(location.class_id, location.method_id).await?;
            Ok(table
                .and_then(|t| t.line_for_index(location.index))
                .and_then(|line| u32::try_from(line).ok()))
        }
        .boxed()
    }

    fn loaded_classes(&self, pattern: String) -> VmFuture<'_, Vec<PreparedClass>> {
        async move {
            let filter = ClassFilter::new(pattern);
            let classes = self.connection.all_classes().await?;
            Ok(classes
                .into_iter()
                .filter(|c| c.ref_type_tag != type_tags::ARRAY)
                .map(|c| PreparedClass {
                    id: c.type_id,
                    name: signature_to_class_name(&c.signature),
                })
                .filter(|c| filter.matches(&c.name))
                .collect())
        }
        .boxed()
    }

    fn locations_of_line(
        &self,
        class: ReferenceTypeId,
        line: u32,
        method_name: Option<String>,
    ) -> VmFuture<'_, Vec<Location>> {
        async move {
            let methods = self.methods(class).await?;
            let mut locations = Vec::new();
            for method in methods.iter() {
                if method_name.as_ref().map_or(false, |name| *name != method.name) {
                    continue;
                }
                let Some(table) = self.line_table(class, method.method_id).await? else {
                    continue;
                };
                if let Some(index) = table.indices_for_line(line as i32).first() {
                    locations.push(Location::new(class, method.method_id, *index));
                }
            }
            Ok(locations)
        }
        .boxed()
    }

    fn create_breakpoint_request(&self, location: Location, policy: SuspendPolicy) -> VmFuture<'_, RequestId> {
        async move { Ok(self.connection.set_breakpoint(location, policy).await?) }.boxed()
    }

    fn create_step_request(&self, spec: StepRequestSpec) -> VmFuture<'_, RequestId> {
        async move {
            Ok(self
                .connection
                .set_step(spec.thread, spec.size.code(), spec.depth.code(), spec.policy, &spec.class_excludes)
                .await?)
        }
        .boxed()
    }

    fn create_class_prepare_request(&self, pattern: String, policy: SuspendPolicy) -> VmFuture<'_, RequestId> {
        async move { Ok(self.connection.set_class_prepare(&pattern, policy).await?) }.boxed()
    }

    fn delete_request(&self, kind: RequestKind, request: RequestId) -> VmFuture<'_, ()> {
        async move {
            Ok(self
                .connection
                .clear_event_request(kind.event_kind(), request)
                .await?)
        }
        .boxed()
    }

    fn invoke_method(&self, request: InvokeRequest) -> VmFuture<'_, InvokeResult> {
        self.invoke(request).boxed()
    }

    fn load_class(&self, thread: ThreadId, class_name: String) -> VmFuture<'_, ()> {
        self.load(thread, class_name).boxed()
    }

    fn disable_collection(&self, object: ObjectId) -> VmFuture<'_, ()> {
        async move { Ok(self.connection.disable_collection(object).await?) }.boxed()
    }

    fn enable_collection(&self, object: ObjectId) -> VmFuture<'_, ()> {
        async move { Ok(self.connection.enable_collection(object).await?) }.boxed()
    }

    fn next_event_set(&self) -> VmFuture<'_, EventSet> {
        async move {
            self.connection
                .recv_event()
                .await
                .ok_or(DebuggerError::ProtocolDisconnected)
        }
        .boxed()
    }

    fn dispose(&self) -> VmFuture<'_, ()> {
        async move { Ok(self.connection.dispose().await?) }.boxed()
    }

    fn forget_classes(&self, classes: &[PreparedClass]) {
        self.invalidate(classes);
    }
}
