//! Caller-facing XR context: connection, session, event pump, and frame loop.
//!
//! Typical use is `initialise(driver)` then `initialise_session()`, followed
//! by `process`, `pre_render`, `pre_draw_viewport`, `post_draw_viewport` and
//! `end_frame` once per rendered frame, and `finish` on shutdown. Everything
//! runs on the render thread.

use crate::vr::catalog::CapabilityCatalog;
use crate::vr::extensions::{
    CompositionLayerProvider, ExtensionRegistry, ExtensionWrapper, GraphicsExtension,
    RenderTargetId,
};
use crate::vr::frame::{HeadPose, Matrix4, Transform3D};
use crate::vr::instance::RuntimeConnection;
use crate::vr::runtime::{
    CompositionLayer, FrameEndInfo, InstanceHandle, ProjectionLayer, ResultCode, RuntimeEvent,
    RuntimeResultExt, SessionHandle, SharedRuntime,
};
use crate::vr::session::Session;
use crate::vr::settings::XrSettings;
use crate::vr::state::StateMachine;
use crate::vr::swapchain::create_main_swapchain;
use crate::vr::{Extent2D, SessionState, VrError, VrResult};
use std::collections::VecDeque;

/// Why XR stopped being available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    SessionLost,
    SessionExited,
    InstanceLost,
}

/// Host-facing changes queued while events are pumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrNotification {
    SessionBegun,
    SessionStopping,
    FocusGained,
    FocusLost,
    XrUnavailable(UnavailableReason),
}

/// The five conditions that must all hold before a frame is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderReadiness {
    pub connected: bool,
    pub has_session: bool,
    pub running: bool,
    pub view_pose_valid: bool,
    pub should_render: bool,
}

impl RenderReadiness {
    pub fn allows_rendering(&self) -> bool {
        self.connected
            && self.has_session
            && self.running
            && self.view_pose_valid
            && self.should_render
    }
}

enum Hook {
    InstanceCreated(InstanceHandle, Vec<String>),
    InstanceDestroyed,
    SessionCreated(SessionHandle),
    SessionDestroyed,
    StateChanged(SessionState),
}

fn deliver<W: ExtensionWrapper + ?Sized>(wrapper: &mut W, hook: &Hook) {
    match hook {
        Hook::InstanceCreated(instance, enabled) => wrapper.on_instance_created(*instance, enabled),
        Hook::InstanceDestroyed => wrapper.on_instance_destroyed(),
        Hook::SessionCreated(session) => wrapper.on_session_created(*session),
        Hook::SessionDestroyed => wrapper.on_session_destroyed(),
        Hook::StateChanged(state) => wrapper.on_state_changed(*state),
    }
}

pub struct XrDevice {
    runtime: SharedRuntime,
    settings: XrSettings,
    catalog: CapabilityCatalog,
    registry: ExtensionRegistry,
    graphics: Option<Box<dyn GraphicsExtension>>,
    // Declared before the connection so it is always released first.
    session: Option<Session>,
    connection: Option<RuntimeConnection>,
    state: StateMachine,
    notifications: VecDeque<XrNotification>,
    last_error: Option<String>,
    terminal_handled: bool,
}

impl XrDevice {
    pub fn new(runtime: SharedRuntime, settings: XrSettings) -> Self {
        Self {
            runtime,
            settings,
            catalog: CapabilityCatalog::new(),
            registry: ExtensionRegistry::new(),
            graphics: None,
            session: None,
            connection: None,
            state: StateMachine::new(),
            notifications: VecDeque::new(),
            last_error: None,
            terminal_handled: false,
        }
    }

    pub fn settings(&self) -> &XrSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub fn connection(&self) -> Option<&RuntimeConnection> {
        self.connection.as_ref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_state(&self) -> SessionState {
        self.state.current()
    }

    pub fn register_extension_wrapper(
        &mut self,
        wrapper: Box<dyn ExtensionWrapper>,
    ) -> VrResult<()> {
        let result = self.registry.register_extension_wrapper(wrapper);
        self.record(result)
    }

    pub fn register_composition_layer_provider(
        &mut self,
        provider: Box<dyn CompositionLayerProvider>,
    ) {
        self.registry.register_composition_layer_provider(provider);
    }

    /// Installs the backend half; only allowed before `initialise`.
    pub fn set_graphics_extension(
        &mut self,
        graphics: Box<dyn GraphicsExtension>,
    ) -> VrResult<()> {
        if self.connection.is_some() {
            return self.record(Err(VrError::RegistryLocked));
        }
        log::debug!("[xr] graphics extension for {}", graphics.driver_name());
        self.graphics = Some(graphics);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_running)
    }

    /// Rendered message of the most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn drain_notifications(&mut self) -> Vec<XrNotification> {
        self.notifications.drain(..).collect()
    }

    pub fn render_readiness(&self) -> RenderReadiness {
        let session = self.session.as_ref();
        RenderReadiness {
            connected: self.connection.is_some(),
            has_session: session.is_some(),
            running: session.is_some_and(Session::is_running),
            view_pose_valid: session.is_some_and(|session| session.frame().view_pose_valid()),
            should_render: session
                .is_some_and(|session| session.frame().frame_state().should_render),
        }
    }

    pub fn can_render(&self) -> bool {
        self.render_readiness().allows_rendering()
    }

    /// Connects to the runtime, resolves the system and loads its capabilities.
    pub fn initialise(&mut self, driver_name: &str) -> VrResult<()> {
        let result = self.connect(driver_name);
        self.record(result)
    }

    pub fn initialise_session(&mut self) -> VrResult<()> {
        let result = self.open_session();
        if result.is_err() && self.session.is_none() {
            self.catalog.clear_session_capabilities();
        }
        self.record(result)
    }

    /// Pumps runtime events, then waits for the next frame if the session runs.
    pub fn process(&mut self) -> VrResult<()> {
        let result = self.process_frame();
        self.record(result)
    }

    pub fn poll_events(&mut self) -> VrResult<()> {
        let result = self.drain_events();
        self.record(result)
    }

    /// Begins the runtime frame and locates the views for it.
    pub fn pre_render(&mut self) -> VrResult<()> {
        let result = self.begin_rendering();
        self.record_runtime(result)
    }

    /// Acquires the swapchain image for this frame. `Ok(false)` means skip drawing.
    pub fn pre_draw_viewport(&mut self) -> VrResult<bool> {
        if !self.can_render() {
            return Ok(false);
        }
        let Some(swapchain) = self.session.as_mut().and_then(Session::swapchain_mut) else {
            return Ok(false);
        };
        let result = swapchain.acquire_image().map(|_| true);
        self.record_runtime(result)
    }

    /// Hands the drawn render target to the graphics extension.
    pub fn post_draw_viewport(&mut self, render_target: RenderTargetId) -> VrResult<()> {
        if !self.can_render() {
            return Ok(());
        }
        let result = match (
            self.session.as_ref().and_then(Session::swapchain),
            self.graphics.as_mut(),
        ) {
            (Some(swapchain), Some(graphics)) => {
                swapchain.copy_render_target(&mut **graphics, render_target)
            }
            _ => Ok(()),
        };
        self.record(result)
    }

    /// Releases the image and submits the frame's composition layers.
    pub fn end_frame(&mut self) -> VrResult<()> {
        let result = self.submit_frame();
        self.record_runtime(result)
    }

    pub fn request_exit(&mut self) -> VrResult<()> {
        let result = match self.session.as_mut() {
            Some(session) if session.is_running() => session.request_exit(),
            Some(_) => Err(VrError::NotRunning("request_exit")),
            None => Err(VrError::NoSession("request_exit")),
        };
        self.record(result)
    }

    /// View space relative to the play space at the predicted display time.
    pub fn get_head_center(&mut self) -> VrResult<HeadPose> {
        let result = self.locate_head();
        self.record_runtime(result)
    }

    pub fn get_view_transform(&self, view: usize) -> VrResult<Transform3D> {
        self.running_session("get_view_transform")?
            .frame()
            .view_transform(view)
    }

    pub fn get_view_projection(&self, view: usize, z_near: f64, z_far: f64) -> VrResult<Matrix4> {
        self.running_session("get_view_projection")?
            .frame()
            .view_projection(view, z_near, z_far)
    }

    pub fn get_recommended_target_size(&self) -> Option<Extent2D> {
        self.catalog
            .view_configuration_views()
            .first()
            .map(|view| Extent2D {
                width: view.recommended_image_rect_width,
                height: view.recommended_image_rect_height,
            })
    }

    /// Display time of the frame after the current one, if a session runs.
    pub fn get_next_frame_time(&self) -> Option<i64> {
        self.session
            .as_ref()
            .filter(|session| session.is_running())
            .map(|session| session.frame().next_frame_time())
    }

    /// Releases the swapchain, spaces and session. Safe to call repeatedly.
    pub fn destroy_session(&mut self) -> VrResult<()> {
        let result = self.teardown_session();
        self.record(result)
    }

    /// Releases everything including the runtime instance. Safe to call repeatedly.
    pub fn destroy_instance(&mut self) -> VrResult<()> {
        let result = self.teardown_instance();
        self.record(result)
    }

    pub fn finish(&mut self) -> VrResult<()> {
        log::info!("[xr] shutting down");
        self.destroy_instance()
    }

    fn record<T>(&mut self, result: VrResult<T>) -> VrResult<T> {
        if let Err(err) = &result {
            self.note_error(err);
        }
        result
    }

    /// Like `record`, but a lost session or instance also triggers teardown.
    fn record_runtime<T>(&mut self, result: VrResult<T>) -> VrResult<T> {
        if let Err(err) = &result {
            self.react_to_loss(err);
        }
        self.record(result)
    }

    fn note_error(&mut self, err: &VrError) {
        log::error!("[xr] {err}");
        self.last_error = Some(err.to_string());
    }

    fn connect(&mut self, driver_name: &str) -> VrResult<()> {
        if self.connection.is_some() {
            log::warn!("[xr] already initialised");
            return Ok(());
        }
        self.settings.validate()?;

        let graphics = match self.graphics.as_ref() {
            Some(graphics) if graphics.driver_name() == driver_name => graphics,
            _ => return Err(VrError::UnsupportedDriver(driver_name.to_string())),
        };
        let mut requests = graphics.requested_extensions();
        requests.extend(self.registry.requested_extensions());

        {
            let mut runtime = self.runtime.borrow_mut();
            log::info!("[xr] initialising {} runtime for {driver_name}", runtime.label());
            self.catalog.load_layer_properties(&mut *runtime)?;
            self.catalog.load_supported_extensions(&mut *runtime)?;
        }

        let mut connection =
            RuntimeConnection::create(&self.runtime, &self.catalog, &requests, &self.settings)?;
        if let Err(err) = self.negotiate_system(&mut connection) {
            self.catalog.clear_instance_capabilities();
            return Err(err);
        }

        let instance = connection.instance();
        let enabled = connection.enabled_extensions().to_vec();
        self.connection = Some(connection);
        self.registry.lock();
        self.terminal_handled = false;
        self.state.reset();
        self.broadcast(Hook::InstanceCreated(instance, enabled));
        Ok(())
    }

    fn negotiate_system(&mut self, connection: &mut RuntimeConnection) -> VrResult<()> {
        let system = connection.get_system_info(self.settings.form_factor)?.system_id;
        let instance = connection.instance();
        let view_configuration = self.settings.view_configuration;

        let mut runtime = self.runtime.borrow_mut();
        self.catalog
            .load_supported_view_configuration_types(&mut *runtime, instance, system)?;
        if !self
            .catalog
            .is_view_configuration_supported(view_configuration)
        {
            return Err(VrError::ViewConfigurationUnsupported(view_configuration));
        }
        self.catalog.load_supported_view_configuration_views(
            &mut *runtime,
            instance,
            system,
            view_configuration,
        )?;
        self.catalog.load_supported_environment_blend_modes(
            &mut *runtime,
            instance,
            system,
            view_configuration,
        )?;
        if !self
            .catalog
            .is_environment_blend_mode_supported(self.settings.environment_blend_mode)
        {
            return Err(VrError::BlendModeUnsupported(
                self.settings.environment_blend_mode,
            ));
        }
        Ok(())
    }

    fn open_session(&mut self) -> VrResult<()> {
        let connection = self
            .connection
            .as_ref()
            .ok_or(VrError::NotInitialized("initialise_session"))?;
        if self.session.is_some() {
            return Err(VrError::SessionExists);
        }
        let graphics = self
            .graphics
            .as_mut()
            .ok_or(VrError::NotInitialized("initialise_session"))?;

        let binding = graphics.session_binding()?;
        let mut session = Session::create(connection, &self.catalog, &binding, &self.settings)?;
        let handle = session.handle();
        {
            let mut runtime = self.runtime.borrow_mut();
            self.catalog
                .load_supported_reference_spaces(&mut *runtime, handle)?;
            self.catalog
                .load_supported_swapchain_formats(&mut *runtime, handle)?;
        }
        session.setup_spaces(&self.catalog, &self.settings.reference_space_preferences)?;

        self.state.reset();
        self.terminal_handled = false;
        self.session = Some(session);
        self.broadcast(Hook::SessionCreated(handle));
        Ok(())
    }

    fn broadcast(&mut self, hook: Hook) {
        if let Some(graphics) = self.graphics.as_mut() {
            deliver(&mut **graphics, &hook);
        }
        self.registry.for_each_wrapper(|wrapper| deliver(wrapper, &hook));
    }

    fn drain_events(&mut self) -> VrResult<()> {
        loop {
            let Some(instance) = self.connection.as_ref().map(RuntimeConnection::instance) else {
                return Ok(());
            };
            let polled = {
                let mut runtime = self.runtime.borrow_mut();
                runtime.poll_event(instance)
            }
            .call("xrPollEvent")?;
            match polled {
                Some(event) => self.handle_event(event),
                None => return Ok(()),
            }
        }
    }

    fn handle_event(&mut self, event: RuntimeEvent) {
        let mut handled = false;
        if let Some(graphics) = self.graphics.as_mut() {
            handled |= graphics.on_event_polled(&event);
        }
        handled |= self.registry.dispatch_event(&event);
        if handled {
            log::debug!("[xr] event {event:?} handled by an extension");
        }

        match event {
            RuntimeEvent::SessionStateChanged {
                session,
                state,
                time,
            } => {
                if self.session.as_ref().map(Session::handle) != Some(session) {
                    log::debug!("[xr-session] state {state} for unknown session {session:?}");
                    return;
                }
                self.on_session_state(state, time);
            }
            RuntimeEvent::InstanceLossPending { loss_time } => {
                log::warn!("[xr] instance loss pending at {loss_time}");
                self.on_instance_loss_pending();
            }
            RuntimeEvent::EventsLost { lost_count } => {
                log::warn!("[xr] runtime dropped {lost_count} events");
            }
            RuntimeEvent::ReferenceSpaceChangePending {
                space_type,
                change_time,
                ..
            } => {
                log::info!("[xr-session] {space_type} space changes at {change_time}");
            }
            RuntimeEvent::InteractionProfileChanged { .. } => {
                log::debug!("[xr-session] interaction profile changed");
            }
        }
    }

    fn on_session_state(&mut self, state: SessionState, time: i64) {
        let Some(transition) = self.state.apply(state) else {
            return;
        };
        log::info!(
            "[xr-session] {} -> {} at {time}",
            transition.from,
            transition.to
        );
        self.broadcast(Hook::StateChanged(state));

        let outcome = match state {
            SessionState::Unknown => Ok(()),
            SessionState::Idle => self.on_state_idle(),
            SessionState::Ready => self.on_state_ready(),
            SessionState::Synchronized => self.on_state_synchronized(),
            SessionState::Visible => self.on_state_visible(transition.from),
            SessionState::Focused => self.on_state_focused(),
            SessionState::Stopping => self.on_state_stopping(),
            SessionState::LossPending => self.on_state_loss_pending(),
            SessionState::Exiting => self.on_state_exiting(),
        };
        if let Err(err) = outcome {
            self.note_error(&err);
        }
    }

    fn on_state_idle(&mut self) -> VrResult<()> {
        log::debug!("[xr-session] idle");
        Ok(())
    }

    fn on_state_ready(&mut self) -> VrResult<()> {
        let session = self
            .session
            .as_mut()
            .ok_or(VrError::NoSession("on_state_ready"))?;
        session.begin()?;
        self.notifications.push_back(XrNotification::SessionBegun);

        if session.swapchain().is_none() {
            let system = self
                .connection
                .as_ref()
                .and_then(RuntimeConnection::system)
                .ok_or(VrError::NotInitialized("create_main_swapchain"))?;
            let graphics = self
                .graphics
                .as_mut()
                .ok_or(VrError::NotInitialized("create_main_swapchain"))?;
            let swapchain = create_main_swapchain(
                session.shared_runtime(),
                session.handle(),
                &self.catalog,
                system,
                &mut **graphics,
                &self.settings,
            )?;
            session.install_swapchain(swapchain);
        }
        Ok(())
    }

    fn on_state_synchronized(&mut self) -> VrResult<()> {
        log::debug!("[xr-session] synchronized with the compositor");
        Ok(())
    }

    fn on_state_visible(&mut self, from: SessionState) -> VrResult<()> {
        if from == SessionState::Focused {
            self.notifications.push_back(XrNotification::FocusLost);
        }
        Ok(())
    }

    fn on_state_focused(&mut self) -> VrResult<()> {
        self.notifications.push_back(XrNotification::FocusGained);
        Ok(())
    }

    fn on_state_stopping(&mut self) -> VrResult<()> {
        self.notifications.push_back(XrNotification::SessionStopping);
        match self.session.as_mut() {
            Some(session) if session.is_running() => session.end(),
            _ => Ok(()),
        }
    }

    fn on_state_loss_pending(&mut self) -> VrResult<()> {
        self.enter_terminal(UnavailableReason::SessionLost);
        Ok(())
    }

    fn on_state_exiting(&mut self) -> VrResult<()> {
        self.enter_terminal(UnavailableReason::SessionExited);
        Ok(())
    }

    fn on_instance_loss_pending(&mut self) {
        if self.session.is_some() && self.state.apply(SessionState::LossPending).is_some() {
            self.broadcast(Hook::StateChanged(SessionState::LossPending));
        }
        let connected = self.connection.is_some();
        // Still reported when a terminal session state already tore down the session.
        if !self.enter_terminal(UnavailableReason::InstanceLost) && connected {
            log::warn!("[xr] XR no longer available: {:?}", UnavailableReason::InstanceLost);
            self.notifications
                .push_back(XrNotification::XrUnavailable(UnavailableReason::InstanceLost));
        }
        if let Err(err) = self.teardown_instance() {
            self.note_error(&err);
        }
    }

    /// Session-owned teardown, run once per terminal state. Returns whether it ran.
    fn enter_terminal(&mut self, reason: UnavailableReason) -> bool {
        if self.terminal_handled {
            return false;
        }
        self.terminal_handled = true;
        log::warn!("[xr] XR no longer available: {reason:?}");
        if let Err(err) = self.teardown_session() {
            self.note_error(&err);
        }
        self.notifications
            .push_back(XrNotification::XrUnavailable(reason));
        true
    }

    fn react_to_loss(&mut self, err: &VrError) {
        match err.result_code() {
            Some(ResultCode::ERROR_SESSION_LOST) => {
                self.on_session_state(SessionState::LossPending, 0)
            }
            Some(ResultCode::ERROR_INSTANCE_LOST) => self.on_instance_loss_pending(),
            _ => {}
        }
    }

    fn process_frame(&mut self) -> VrResult<()> {
        self.drain_events()?;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if !session.is_running() {
            return Ok(());
        }
        let handle = session.handle();
        let waited = {
            let mut runtime = self.runtime.borrow_mut();
            session.frame_mut().wait_frame(&mut *runtime, handle)
        };
        if let Err(err) = waited {
            self.react_to_loss(&err);
            return Err(err);
        }
        Ok(())
    }

    fn begin_rendering(&mut self) -> VrResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if !session.is_running() || !session.frame().frame_ready() {
            return Ok(());
        }
        let handle = session.handle();
        let targets = session.frame_targets()?;

        let mut runtime = self.runtime.borrow_mut();
        session.frame_mut().begin_frame(&mut *runtime, handle)?;
        if !session.frame().frame_state().should_render {
            return Ok(());
        }
        session.frame_mut().locate_views(&mut *runtime, &targets)
    }

    fn submit_frame(&mut self) -> VrResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if !session.is_running() || !session.frame().frame_begun() {
            return Ok(());
        }
        let frame_state = *session.frame().frame_state();

        // Only an image acquired and released this frame holds the projection.
        let mut image_ready = false;
        if let Some(swapchain) = session.swapchain_mut() {
            if swapchain.is_image_acquired() {
                match swapchain.release_image() {
                    Ok(()) => image_ready = true,
                    Err(err) => log::warn!("[xr-swapchain] {err}"),
                }
            }
        }

        let mut layers = Vec::new();
        let views = session.frame().views().projection_views();
        if image_ready
            && frame_state.should_render
            && session.frame().view_pose_valid()
            && !views.is_empty()
        {
            let targets = session.frame_targets()?;
            layers.push(CompositionLayer::Projection(ProjectionLayer {
                space: targets.play_space,
                views,
            }));
            layers.extend(self.registry.collect_composition_layers(&frame_state));
        }

        let info = FrameEndInfo {
            display_time: frame_state.predicted_display_time,
            blend_mode: session.blend_mode(),
            layers,
        };
        session.frame_mut().mark_frame_ended();
        let ended = {
            let mut runtime = self.runtime.borrow_mut();
            runtime.end_frame(session.handle(), &info)
        };
        ended.call("xrEndFrame")
    }

    fn locate_head(&mut self) -> VrResult<HeadPose> {
        let session = self
            .session
            .as_mut()
            .filter(|session| session.is_running())
            .ok_or(VrError::NotRunning("get_head_center"))?;
        let targets = session.frame_targets()?;
        let mut runtime = self.runtime.borrow_mut();
        session.frame_mut().head_center(&mut *runtime, &targets)
    }

    fn running_session(&self, call: &'static str) -> VrResult<&Session> {
        match self.session.as_ref() {
            Some(session) if session.is_running() => Ok(session),
            Some(_) => Err(VrError::NotRunning(call)),
            None => Err(VrError::NoSession(call)),
        }
    }

    fn teardown_session(&mut self) -> VrResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let result = session.destroy(self.graphics.as_mut());
        self.catalog.clear_session_capabilities();
        self.broadcast(Hook::SessionDestroyed);
        result
    }

    fn teardown_instance(&mut self) -> VrResult<()> {
        let session_result = self.teardown_session();
        let Some(connection) = self.connection.take() else {
            return session_result;
        };
        self.broadcast(Hook::InstanceDestroyed);
        let result = connection.destroy();
        self.catalog.clear_instance_capabilities();
        self.registry.unlock();
        self.state.reset();
        log::info!("[xr] instance destroyed");
        session_result.and(result)
    }
}

impl Drop for XrDevice {
    fn drop(&mut self) {
        if self.runtime.try_borrow_mut().is_err() {
            log::error!("[xr] runtime busy while dropping the device; skipping teardown");
            return;
        }
        if let Err(err) = self.teardown_instance() {
            log::error!("[xr] teardown on drop failed: {err}");
        }
    }
}
