//! One adapter conversation, end to end: connect, initialize, launch or
//! attach, pump events into the object graph, spawn children for
//! `startDebugging`, and tear everything down exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

use crate::client::Client;
use crate::errors::{ClientError, Result};
use crate::events::{EventBody, ExitedEventBody, TerminatedEventBody};
use crate::hookable::{Hookable, HookOptions};
use crate::manager::SessionManager;
use crate::requests::{
    Command, DisconnectArguments, InitializeArguments, SetExceptionBreakpointsArguments,
    TerminateArguments,
};
use crate::responses::Response;
use crate::reverse_requests::{
    ReverseCommand, RunInTerminalRequestArguments, StartDebuggingRequestArguments,
};
use crate::source::{Source, SourceId};
use crate::thread::Thread;
use crate::transport::{AdapterConfig, Message};
use crate::types::{Capabilities, LoadedSourceEventReason, StartDebuggingRequestKind, ThreadEventReason};

/// Startup must reach readiness within this window.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
/// `startDebugging` chains deeper than this are refused.
pub const MAX_SESSION_DEPTH: u32 = 5;

/// Internal listeners that must observe an event before user listeners.
pub(crate) const INTERNAL_PRIORITY: i32 = 100;
/// Internal listeners that must observe an event after user listeners.
pub(crate) const TEARDOWN_PRIORITY: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
pub enum SessionState {
    #[display(fmt = "starting")]
    Starting,
    #[display(fmt = "init-sent")]
    InitSent,
    #[display(fmt = "launch-sent")]
    LaunchSent,
    #[display(fmt = "initialized")]
    Initialized,
    #[display(fmt = "config-done-sent")]
    ConfigDoneSent,
    #[display(fmt = "ready")]
    Ready,
    #[display(fmt = "terminated")]
    Terminated,
}

pub type TerminalFuture = Pin<Box<dyn Future<Output = std::result::Result<i64, String>> + Send>>;
/// Handles `runInTerminal`: runs the command, returns the pid.
pub type RunInTerminalHandler =
    Arc<dyn Fn(RunInTerminalRequestArguments) -> TerminalFuture + Send + Sync>;

pub type ConfigureFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// Runs between the `initialized` event and `configurationDone`, while the
/// adapter is waiting for configuration. This is where breakpoints get
/// planted before the debuggee starts running.
pub type ConfigureHook = Arc<dyn Fn(Arc<Session>) -> ConfigureFuture + Send + Sync>;

#[derive(Clone)]
pub struct SessionOptions {
    /// The adapter identifier sent as `adapterID`.
    pub adapter_id: String,
    /// The launch or attach configuration, passed through verbatim. The
    /// only field this runtime reads is `request` (`"launch"`/`"attach"`,
    /// defaulting to launch).
    pub configuration: Value,
    /// Exception filter ids activated during the configuration phase.
    pub exception_filters: Vec<String>,
    pub run_in_terminal: Option<RunInTerminalHandler>,
    pub before_configuration_done: Option<ConfigureHook>,
}

impl SessionOptions {
    pub fn new(adapter_id: impl Into<String>, configuration: Value) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            configuration,
            exception_filters: Vec::new(),
            run_in_terminal: None,
            before_configuration_done: None,
        }
    }

    fn request_kind(&self) -> StartDebuggingRequestKind {
        match self.configuration.get("request").and_then(Value::as_str) {
            Some("attach") => StartDebuggingRequestKind::Attach,
            _ => StartDebuggingRequestKind::Launch,
        }
    }
}

pub struct Session {
    id: i64,
    depth: u32,
    client: Client,
    adapter: AdapterConfig,
    options: SessionOptions,
    request_kind: StartDebuggingRequestKind,
    state: Mutex<SessionState>,
    capabilities: Mutex<Capabilities>,
    events: Hookable<EventBody>,
    threads: Mutex<FxHashMap<i64, Arc<Thread>>>,
    sources: Mutex<FxHashMap<SourceId, Arc<Source>>>,
    parent: Mutex<Weak<Session>>,
    children: Mutex<Vec<Arc<Session>>>,
    manager: Weak<SessionManager>,
    saw_exited: AtomicBool,
    saw_terminated: AtomicBool,
    config_done: Notify,
    config_done_flag: AtomicBool,
}

impl Session {
    /// Connects to the adapter and builds the session shell: transport
    /// pumps running, handlers registered, nothing sent yet. Follow with
    /// [`Session::start`].
    pub(crate) async fn spawn(
        manager: &Arc<SessionManager>,
        adapter: AdapterConfig,
        options: SessionOptions,
        parent: Option<&Arc<Session>>,
    ) -> Result<Arc<Self>> {
        let depth = parent.map(|parent| parent.depth + 1).unwrap_or(0);
        let (transport, inbound) = adapter.connect().await?;
        let request_kind = options.request_kind();
        let session = Arc::new(Self {
            id: manager.next_id(),
            depth,
            client: Client::new(transport),
            adapter,
            options,
            request_kind,
            state: Mutex::new(SessionState::Starting),
            capabilities: Mutex::new(Capabilities::default()),
            events: Hookable::new(),
            threads: Mutex::new(FxHashMap::default()),
            sources: Mutex::new(FxHashMap::default()),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            manager: Arc::downgrade(manager),
            saw_exited: AtomicBool::new(false),
            saw_terminated: AtomicBool::new(false),
            config_done: Notify::new(),
            config_done_flag: AtomicBool::new(false),
        });
        session.install_internal_listeners();
        session.register_reverse_handlers();
        session.spawn_dispatch(inbound);
        manager.add(&session, parent);
        tracing::debug!(session = session.id, depth, "session created");
        Ok(session)
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// The session's event bus, keyed by DAP event name.
    pub fn events(&self) -> &Hookable<EventBody> {
        &self.events
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.lock().clone()
    }

    pub fn parent(&self) -> Option<Arc<Session>> {
        self.parent.lock().upgrade()
    }

    pub fn children(&self) -> Vec<Arc<Session>> {
        self.children.lock().clone()
    }

    pub fn adapter_id(&self) -> &str {
        &self.options.adapter_id
    }

    // Capability gates. Each returns false until the initialize response
    // has been stored.

    pub fn supports_configuration_done(&self) -> bool {
        self.capability(|caps| caps.supports_configuration_done_request)
    }

    pub fn supports_breakpoint_locations(&self) -> bool {
        self.capability(|caps| caps.supports_breakpoint_locations_request)
    }

    pub fn supports_conditional_breakpoints(&self) -> bool {
        self.capability(|caps| caps.supports_conditional_breakpoints)
    }

    pub fn supports_hit_conditional_breakpoints(&self) -> bool {
        self.capability(|caps| caps.supports_hit_conditional_breakpoints)
    }

    pub fn supports_log_points(&self) -> bool {
        self.capability(|caps| caps.supports_log_points)
    }

    pub fn supports_terminate(&self) -> bool {
        self.capability(|caps| caps.supports_terminate_request)
    }

    fn capability(&self, pick: impl Fn(&Capabilities) -> Option<bool>) -> bool {
        pick(&self.capabilities.lock()).unwrap_or(false)
    }

    /// Sends a request on this session's connection. Refused once the
    /// session has terminated.
    pub(crate) async fn request(&self, command: Command) -> Result<Option<Value>> {
        if self.state() == SessionState::Terminated {
            return Err(ClientError::Terminated);
        }
        self.client.send_request(command).await
    }

    // ------------------------------------------------------------------
    // Startup

    /// Runs the startup sequence: initialize, launch/attach, and the
    /// configuration phase triggered by the `initialized` event. Readiness
    /// requires both the launch/attach response and configurationDone,
    /// in whichever order the adapter produces them.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        match tokio::time::timeout(STARTUP_TIMEOUT, self.startup()).await {
            Ok(result) => {
                if result.is_err() {
                    self.destroy();
                }
                result
            }
            Err(_) => {
                tracing::error!(session = self.id, "startup timed out");
                self.destroy();
                Err(ClientError::StartupTimeout)
            }
        }
    }

    async fn startup(self: &Arc<Self>) -> Result<()> {
        self.advance_state(SessionState::InitSent);
        let body = self
            .request(Command::Initialize(InitializeArguments {
                adapter_id: self.options.adapter_id.clone(),
                ..Default::default()
            }))
            .await?;
        let capabilities: Capabilities = Response::parse(body)?;
        *self.capabilities.lock() = capabilities;

        let configuration = self.options.configuration.clone();
        let launch = match self.request_kind {
            StartDebuggingRequestKind::Launch => Command::Launch(configuration),
            StartDebuggingRequestKind::Attach => Command::Attach(configuration),
        };
        self.advance_state(SessionState::LaunchSent);
        let launch_result = {
            let launch_fut = self.request(launch);
            let config_fut = self.wait_configuration_done();
            let (launch_result, ()) = tokio::join!(launch_fut, config_fut);
            launch_result
        };
        launch_result?;
        self.advance_state(SessionState::Ready);
        tracing::debug!(session = self.id, "session ready");
        Ok(())
    }

    async fn wait_configuration_done(&self) {
        loop {
            let notified = self.config_done.notified();
            if self.config_done_flag.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    async fn run_configuration_phase(self: Arc<Self>) {
        self.advance_state(SessionState::Initialized);
        if let Some(hook) = self.options.before_configuration_done.clone() {
            hook(Arc::clone(&self)).await;
        }
        if !self.options.exception_filters.is_empty() {
            if let Err(err) = self
                .request(Command::SetExceptionBreakpoints(
                    SetExceptionBreakpointsArguments {
                        filters: self.options.exception_filters.clone(),
                        filter_options: None,
                    },
                ))
                .await
            {
                tracing::debug!(session = self.id, "setExceptionBreakpoints failed: {err}");
            }
        }
        if self.supports_configuration_done() {
            if let Err(err) = self.request(Command::ConfigurationDone).await {
                tracing::debug!(session = self.id, "configurationDone failed: {err}");
            }
        }
        self.advance_state(SessionState::ConfigDoneSent);
        self.config_done_flag.store(true, Ordering::SeqCst);
        self.config_done.notify_waiters();
    }

    fn advance_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state == SessionState::Terminated {
            return;
        }
        if next > *state {
            *state = next;
            tracing::trace!(session = self.id, state = %next, "state advanced");
        }
    }

    // ------------------------------------------------------------------
    // Message dispatch

    fn spawn_dispatch(self: &Arc<Self>, mut inbound: UnboundedReceiver<Message>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let Some(session) = weak.upgrade() else { break };
                session.dispatch(message);
            }
            if let Some(session) = weak.upgrade() {
                session.on_transport_closed();
            }
        });
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response(response) => self.client.handle_response(response),
            Message::Request(request) => self.client.handle_reverse_request(request),
            Message::Event(event) => {
                tracing::debug!(session = self.id, event = event.body.name(), "event");
                self.events.emit(event.body.name(), &event.body);
            }
        }
    }

    fn on_transport_closed(self: &Arc<Self>) {
        if self.state() == SessionState::Terminated {
            return;
        }
        if let Some(cause) = self.client.transport().failure() {
            tracing::error!(session = self.id, "connection lost: {cause}");
        } else {
            tracing::debug!(session = self.id, "connection closed");
        }
        self.destroy();
    }

    // ------------------------------------------------------------------
    // Internal listeners

    fn install_internal_listeners(self: &Arc<Self>) {
        self.install_thread_listeners();
        self.install_source_listeners();
        self.install_lifecycle_listeners();

        let weak = Arc::downgrade(self);
        self.events.on(
            "initialized",
            move |_| {
                if let Some(session) = weak.upgrade() {
                    tokio::spawn(session.run_configuration_phase());
                }
                None
            },
            HookOptions::named("session:configuration").priority(INTERNAL_PRIORITY),
        );
    }

    fn install_thread_listeners(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.events.on(
            "stopped",
            move |event| {
                let Some(session) = weak.upgrade() else { return None };
                let EventBody::Stopped(body) = event else { return None };
                if let Some(thread_id) = body.thread_id {
                    session.ensure_thread(thread_id, None).handle_stopped(body);
                }
                if body.all_threads_stopped.unwrap_or(false) {
                    for thread in session.known_threads() {
                        if Some(thread.id()) != body.thread_id && !thread.stopped() {
                            thread.handle_stopped(body);
                        }
                    }
                }
                None
            },
            HookOptions::named("session:threads:stopped").priority(INTERNAL_PRIORITY),
        );

        let weak = Arc::downgrade(self);
        self.events.on(
            "continued",
            move |event| {
                let Some(session) = weak.upgrade() else { return None };
                let EventBody::Continued(body) = event else { return None };
                session.ensure_thread(body.thread_id, None).handle_continued(body);
                if body.all_threads_continued.unwrap_or(false) {
                    for thread in session.known_threads() {
                        if thread.id() != body.thread_id && thread.stopped() {
                            thread.handle_continued(body);
                        }
                    }
                }
                None
            },
            HookOptions::named("session:threads:continued").priority(INTERNAL_PRIORITY),
        );

        let weak = Arc::downgrade(self);
        self.events.on(
            "thread",
            move |event| {
                let Some(session) = weak.upgrade() else { return None };
                let EventBody::Thread(body) = event else { return None };
                match body.reason {
                    ThreadEventReason::Started => {
                        session.ensure_thread(body.thread_id, None);
                    }
                    ThreadEventReason::Exited => {
                        let thread = session.threads.lock().remove(&body.thread_id);
                        if let Some(thread) = thread {
                            thread.handle_exited();
                        }
                    }
                    ThreadEventReason::Other(_) => {}
                }
                None
            },
            HookOptions::named("session:threads:lifecycle").priority(INTERNAL_PRIORITY),
        );
    }

    fn install_source_listeners(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.events.on(
            "loadedSource",
            move |event| {
                let Some(session) = weak.upgrade() else { return None };
                let EventBody::LoadedSource(body) = event else { return None };
                let Some(id) = SourceId::from_descriptor(session.id, &body.source) else {
                    return None;
                };
                match body.reason {
                    LoadedSourceEventReason::New => {
                        session.register_source(id, body.source.clone());
                    }
                    LoadedSourceEventReason::Changed => {
                        let existing = session.sources.lock().get(&id).cloned();
                        match existing {
                            Some(source) => source.update_descriptor(body.source.clone()),
                            None => {
                                session.register_source(id, body.source.clone());
                            }
                        }
                    }
                    LoadedSourceEventReason::Removed => {
                        session.sources.lock().remove(&id);
                    }
                }
                None
            },
            HookOptions::named("session:sources").priority(INTERNAL_PRIORITY),
        );
    }

    fn install_lifecycle_listeners(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.events.on(
            "exited",
            move |_| {
                if let Some(session) = weak.upgrade() {
                    session.saw_exited.store(true, Ordering::SeqCst);
                }
                None
            },
            HookOptions::named("session:exited").priority(INTERNAL_PRIORITY),
        );

        let weak = Arc::downgrade(self);
        self.events.on(
            "capabilities",
            move |event| {
                let Some(session) = weak.upgrade() else { return None };
                let EventBody::Capabilities(body) = event else { return None };
                session.merge_capabilities(&body.capabilities);
                None
            },
            HookOptions::named("session:capabilities").priority(INTERNAL_PRIORITY),
        );

        // Runs after user listeners so they observe `terminated` on a
        // session that is still intact.
        let weak = Arc::downgrade(self);
        self.events.on(
            "terminated",
            move |_| {
                let Some(session) = weak.upgrade() else { return None };
                session.saw_terminated.store(true, Ordering::SeqCst);
                if !session.saw_exited.swap(true, Ordering::SeqCst) {
                    session
                        .events
                        .emit("exited", &EventBody::Exited(ExitedEventBody { exit_code: 0 }));
                }
                session.destroy();
                None
            },
            HookOptions::named("session:terminated")
                .priority(TEARDOWN_PRIORITY)
                .permanent(),
        );
    }

    fn merge_capabilities(&self, update: &Capabilities) {
        let mut current = self.capabilities.lock();
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $( if update.$field.is_some() { current.$field = update.$field.clone(); } )*
            };
        }
        merge!(
            supports_configuration_done_request,
            supports_function_breakpoints,
            supports_conditional_breakpoints,
            supports_hit_conditional_breakpoints,
            supports_evaluate_for_hovers,
            exception_breakpoint_filters,
            supports_step_back,
            supports_set_variable,
            supports_restart_frame,
            supports_goto_targets_request,
            supports_step_in_targets_request,
            supports_completions_request,
            supports_modules_request,
            supported_checksum_algorithms,
            supports_restart_request,
            supports_exception_options,
            supports_value_formatting_options,
            supports_exception_info_request,
            support_terminate_debuggee,
            support_suspend_debuggee,
            supports_delayed_stack_trace_loading,
            supports_loaded_sources_request,
            supports_log_points,
            supports_terminate_threads_request,
            supports_set_expression,
            supports_terminate_request,
            supports_data_breakpoints,
            supports_read_memory_request,
            supports_write_memory_request,
            supports_disassemble_request,
            supports_cancel_request,
            supports_breakpoint_locations_request,
            supports_clipboard_context,
            supports_stepping_granularity,
            supports_instruction_breakpoints,
            supports_exception_filter_options,
            supports_single_thread_execution_requests,
        );
    }

    // ------------------------------------------------------------------
    // Reverse requests

    fn register_reverse_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.client.on_reverse_request(
            "startDebugging",
            Arc::new(move |request| -> crate::client::ReverseFuture {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(session) = weak.upgrade() else {
                        return Err("session terminated".to_string());
                    };
                    let ReverseCommand::StartDebugging(args) = request.command else {
                        return Err("malformed startDebugging request".to_string());
                    };
                    session
                        .start_child(args)
                        .await
                        .map(|_| None)
                        .map_err(|err| err.to_string())
                })
            }),
        );

        let weak = Arc::downgrade(self);
        self.client.on_reverse_request(
            "runInTerminal",
            Arc::new(move |request| -> crate::client::ReverseFuture {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(session) = weak.upgrade() else {
                        return Err("session terminated".to_string());
                    };
                    let ReverseCommand::RunInTerminal(args) = request.command else {
                        return Err("malformed runInTerminal request".to_string());
                    };
                    let handler = session
                        .options
                        .run_in_terminal
                        .clone()
                        .unwrap_or_else(default_run_in_terminal);
                    let pid = handler(args).await?;
                    Ok(Some(serde_json::json!({ "processId": pid })))
                })
            }),
        );
    }

    /// Creates a child session over a fresh connection to the same
    /// adapter. Returns once the child's transport is open; the child's
    /// own startup continues on its own task.
    async fn start_child(self: &Arc<Self>, args: StartDebuggingRequestArguments) -> Result<()> {
        if self.depth + 1 > MAX_SESSION_DEPTH {
            return Err(ClientError::DepthExceeded);
        }
        let manager = self.manager.upgrade().ok_or(ClientError::Terminated)?;
        let mut configuration = args.configuration;
        if let (Value::Object(map), StartDebuggingRequestKind::Attach) =
            (&mut configuration, args.request)
        {
            map.entry("request".to_string())
                .or_insert_with(|| Value::String("attach".to_string()));
        }
        let options = SessionOptions {
            adapter_id: self.options.adapter_id.clone(),
            configuration,
            exception_filters: self.options.exception_filters.clone(),
            run_in_terminal: self.options.run_in_terminal.clone(),
            before_configuration_done: self.options.before_configuration_done.clone(),
        };
        let child = Session::spawn(&manager, self.adapter.clone(), options, Some(self)).await?;
        tokio::spawn(async move {
            if let Err(err) = child.start().await {
                tracing::error!(session = child.id(), "child session failed to start: {err}");
            }
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Threads & sources

    pub(crate) fn ensure_thread(self: &Arc<Self>, id: i64, name: Option<String>) -> Arc<Thread> {
        let mut threads = self.threads.lock();
        match threads.get(&id) {
            Some(thread) => {
                if let Some(name) = name {
                    thread.set_name(name);
                }
                Arc::clone(thread)
            }
            None => {
                let thread = Thread::new(self, id, name.unwrap_or_else(|| format!("Thread {id}")));
                threads.insert(id, Arc::clone(&thread));
                thread
            }
        }
    }

    pub fn thread(&self, id: i64) -> Option<Arc<Thread>> {
        self.threads.lock().get(&id).cloned()
    }

    pub fn known_threads(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().values().cloned().collect()
    }

    /// Fetches the thread list from the adapter, folding it into the
    /// registry.
    pub async fn threads(self: &Arc<Self>) -> Result<Vec<Arc<Thread>>> {
        let body = self.request(Command::Threads).await?;
        let response: crate::responses::ThreadsResponse = Response::parse(body)?;
        Ok(response
            .threads
            .into_iter()
            .map(|info| self.ensure_thread(info.id, Some(info.name)))
            .collect())
    }

    pub(crate) fn register_source(
        self: &Arc<Self>,
        id: SourceId,
        descriptor: crate::types::Source,
    ) -> Arc<Source> {
        let mut sources = self.sources.lock();
        match sources.get(&id) {
            Some(source) => Arc::clone(source),
            None => {
                let source = Source::new(id.clone(), self, descriptor);
                sources.insert(id, Arc::clone(&source));
                source
            }
        }
    }

    pub fn source(&self, id: &SourceId) -> Option<Arc<Source>> {
        self.sources.lock().get(id).cloned()
    }

    pub fn sources(&self) -> Vec<Arc<Source>> {
        self.sources.lock().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Shutdown

    /// Every descendant, deepest first; the order terminations run in.
    fn descendants_post_order(self: &Arc<Self>) -> Vec<Arc<Session>> {
        let mut out = Vec::new();
        fn walk(session: &Arc<Session>, out: &mut Vec<Arc<Session>>) {
            for child in session.children() {
                walk(&child, out);
                out.push(child);
            }
        }
        walk(self, &mut out);
        out
    }

    /// Disconnects children first, then this session, then closes the
    /// transport.
    pub async fn disconnect(self: &Arc<Self>, terminate_debuggee: bool) -> Result<()> {
        for child in self.descendants_post_order() {
            child.disconnect_single(terminate_debuggee).await;
        }
        self.disconnect_single(terminate_debuggee).await;
        Ok(())
    }

    async fn disconnect_single(self: &Arc<Self>, terminate_debuggee: bool) {
        if self.state() != SessionState::Terminated {
            let _ = self
                .request(Command::Disconnect(DisconnectArguments {
                    restart: None,
                    terminate_debuggee: Some(terminate_debuggee),
                    suspend_debuggee: None,
                }))
                .await;
        }
        self.destroy();
    }

    /// Terminates children first, then this session: a graceful
    /// `terminate` (when supported) followed by a `disconnect` that takes
    /// the debuggee down.
    pub async fn terminate(self: &Arc<Self>) -> Result<()> {
        for child in self.descendants_post_order() {
            child.terminate_single().await;
        }
        self.terminate_single().await;
        Ok(())
    }

    async fn terminate_single(self: &Arc<Self>) {
        if self.state() != SessionState::Terminated && self.supports_terminate() {
            let _ = self
                .request(Command::Terminate(TerminateArguments { restart: None }))
                .await;
        }
        self.disconnect_single(true).await;
    }

    /// Releases everything this session owns. Idempotent; every path into
    /// termination funnels through here exactly once.
    pub(crate) fn destroy(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Terminated;
        }
        tracing::debug!(session = self.id, "destroying session");

        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            child.destroy();
        }

        // Tell listeners the session is over unless the adapter already
        // did; then run every cleanup.
        if !self.saw_terminated.swap(true, Ordering::SeqCst) {
            self.events.emit(
                "terminated",
                &EventBody::Terminated(TerminatedEventBody::default()),
            );
        }
        self.threads.lock().clear();
        self.sources.lock().clear();
        self.events.destroy();
        self.client.fail_all();
        self.client.transport().close();
        // Unblock a startup that is still waiting on the configuration
        // phase.
        self.config_done_flag.store(true, Ordering::SeqCst);
        self.config_done.notify_waiters();

        if let Some(parent) = self.parent.lock().upgrade() {
            parent.remove_child(self.id);
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister(self.id);
        }
    }

    /// Pulls this session out of the registry and the tree without
    /// terminating it. Its children are re-parented to this session's
    /// parent, or promoted to roots when it had none. The conversation
    /// stays open; the caller's handle now owns the session.
    pub fn detach(self: &Arc<Self>) {
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(self);
        }
    }

    // Tree bookkeeping used by the manager.

    pub(crate) fn set_parent(&self, parent: Option<&Arc<Session>>) {
        *self.parent.lock() = match parent {
            Some(parent) => Arc::downgrade(parent),
            None => Weak::new(),
        };
    }

    pub(crate) fn push_child(&self, child: Arc<Session>) {
        self.children.lock().push(child);
    }

    pub(crate) fn remove_child(&self, id: i64) {
        self.children.lock().retain(|child| child.id != id);
    }

    pub(crate) fn take_children(&self) -> Vec<Arc<Session>> {
        std::mem::take(&mut *self.children.lock())
    }
}

/// The fallback `runInTerminal` implementation: spawn the command
/// detached and report its pid.
fn default_run_in_terminal() -> RunInTerminalHandler {
    Arc::new(|args: RunInTerminalRequestArguments| -> TerminalFuture {
        Box::pin(async move {
            let Some((program, rest)) = args.args.split_first() else {
                return Err("runInTerminal without a command".to_string());
            };
            let mut command = std::process::Command::new(program);
            command
                .args(rest)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null());
            if !args.cwd.is_empty() {
                command.current_dir(&args.cwd);
            }
            if let Some(env) = &args.env {
                for (key, value) in env {
                    match value {
                        Some(value) => {
                            command.env(key, value);
                        }
                        None => {
                            command.env_remove(key);
                        }
                    }
                }
            }
            match command.spawn() {
                Ok(child) => Ok(child.id() as i64),
                Err(err) => Err(format!("could not run {program}: {err}")),
            }
        })
    })
}
