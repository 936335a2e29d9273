//! In-process runtime and graphics extension for hosts without a headset.
//!
//! `SimulatedRuntime` tracks every handle it hands out so tests can check
//! teardown order, and individual calls can be forced to fail with
//! [`SimulatedRuntime::fail_call`].

use crate::vr::extensions::{
    ExtensionRequest, ExtensionWrapper, GraphicsExtension, ImageSetHandle, RenderTargetId,
    SwapchainDescriptor,
};
use crate::vr::runtime::{
    ApiLayerProperties, ExtensionProperties, FrameEndInfo, FrameState, GraphicsBinding,
    InstanceCreateInfo, InstanceHandle, InstanceProperties, LocatedViews, LocationFlags,
    ResultCode, RuntimeEvent, RuntimeResult, SessionHandle, SpaceHandle, SpaceLocation,
    SpaceVelocity, SwapchainCreateInfo, SwapchainHandle, SystemGraphicsProperties, SystemId,
    SystemProperties, SystemTrackingProperties, View, ViewConfigurationView, XrRuntime,
};
use crate::vr::{
    EnvironmentBlendMode, FormFactor, Fov, Pose, ReferenceSpaceType, SessionState, Vec3,
    ViewConfigurationType, VrError, VrResult, make_version,
};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Runtime entry points that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeCall {
    EnumerateApiLayers,
    EnumerateExtensions,
    CreateInstance,
    InstanceProperties,
    GetSystem,
    SystemProperties,
    EnumerateViewConfigurations,
    EnumerateViewConfigurationViews,
    EnumerateEnvironmentBlendModes,
    CreateSession,
    BeginSession,
    EndSession,
    RequestExitSession,
    EnumerateReferenceSpaces,
    CreateReferenceSpace,
    LocateSpace,
    LocateViews,
    EnumerateSwapchainFormats,
    CreateSwapchain,
    EnumerateSwapchainImages,
    AcquireSwapchainImage,
    WaitSwapchainImage,
    ReleaseSwapchainImage,
    PollEvent,
    WaitFrame,
    BeginFrame,
    EndFrame,
}

#[derive(Debug, Clone, Copy, Default)]
struct SimSession {
    running: bool,
    exit_requested: bool,
}

#[derive(Debug, Clone)]
struct SimSwapchain {
    info: SwapchainCreateInfo,
    next_image: u32,
    acquired: Option<u32>,
    waited: bool,
}

#[derive(Debug, Clone)]
pub struct SimulatedRuntime {
    pub api_layers: Vec<ApiLayerProperties>,
    pub extensions: Vec<ExtensionProperties>,
    pub runtime_name: String,
    pub runtime_version: u64,
    pub system_available: bool,
    pub system_graphics: SystemGraphicsProperties,
    pub view_configurations: Vec<ViewConfigurationType>,
    /// Per-eye views reported for stereo; mono reports only the first.
    pub view_configuration_views: Vec<ViewConfigurationView>,
    pub blend_modes: Vec<EnvironmentBlendMode>,
    pub reference_spaces: Vec<ReferenceSpaceType>,
    pub swapchain_formats: Vec<i64>,
    pub swapchain_image_count: u32,
    /// Location of the view space relative to the play space.
    pub head_location: SpaceLocation,
    pub view_flags: LocationFlags,
    pub eye_fov: Fov,
    pub eye_separation: f32,
    pub display_period: i64,
    pub should_render: bool,
    failures: HashMap<RuntimeCall, ResultCode>,
    events: VecDeque<RuntimeEvent>,
    next_handle: u64,
    display_time: i64,
    instance: Option<InstanceHandle>,
    instance_info: Option<InstanceCreateInfo>,
    sessions: HashMap<SessionHandle, SimSession>,
    spaces: HashMap<SpaceHandle, ReferenceSpaceType>,
    swapchains: HashMap<SwapchainHandle, SimSwapchain>,
    frame_in_flight: bool,
    destroy_log: Vec<&'static str>,
    submitted_frames: Vec<FrameEndInfo>,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        let eye = ViewConfigurationView {
            recommended_image_rect_width: 1440,
            max_image_rect_width: 2880,
            recommended_image_rect_height: 1600,
            max_image_rect_height: 3200,
            recommended_swapchain_sample_count: 1,
            max_swapchain_sample_count: 4,
        };
        Self {
            api_layers: vec![ApiLayerProperties {
                layer_name: Self::VALIDATION_LAYER.to_string(),
                spec_version: make_version(1, 0, 0),
                layer_version: 1,
                description: "simulated validation layer".to_string(),
            }],
            extensions: vec![
                ExtensionProperties {
                    name: Self::HEADLESS_EXTENSION.to_string(),
                    version: 1,
                },
                ExtensionProperties {
                    name: "XR_KHR_composition_layer_depth".to_string(),
                    version: 6,
                },
            ],
            runtime_name: "Theta Simulated Runtime".to_string(),
            runtime_version: make_version(1, 0, 0),
            system_available: true,
            system_graphics: SystemGraphicsProperties {
                max_swapchain_image_width: 4096,
                max_swapchain_image_height: 4096,
                max_layer_count: 16,
            },
            view_configurations: vec![
                ViewConfigurationType::PrimaryStereo,
                ViewConfigurationType::PrimaryMono,
            ],
            view_configuration_views: vec![eye, eye],
            blend_modes: vec![EnvironmentBlendMode::Opaque],
            reference_spaces: vec![
                ReferenceSpaceType::View,
                ReferenceSpaceType::Local,
                ReferenceSpaceType::Stage,
            ],
            swapchain_formats: vec![
                Self::FORMAT_SRGBA8,
                Self::FORMAT_RGBA8,
                Self::FORMAT_RGBA16F,
            ],
            swapchain_image_count: 3,
            head_location: SpaceLocation {
                flags: LocationFlags::ALL,
                pose: Pose {
                    orientation: Default::default(),
                    position: Vec3::new(0.0, 1.6, 0.0),
                },
                velocity: Some(SpaceVelocity::default()),
            },
            view_flags: LocationFlags::ALL,
            eye_fov: Fov {
                angle_left: -0.87,
                angle_right: 0.78,
                angle_up: 0.84,
                angle_down: -0.92,
            },
            eye_separation: 0.064,
            display_period: 11_111_111,
            should_render: true,
            failures: HashMap::new(),
            events: VecDeque::new(),
            next_handle: 1,
            display_time: 0,
            instance: None,
            instance_info: None,
            sessions: HashMap::new(),
            spaces: HashMap::new(),
            swapchains: HashMap::new(),
            frame_in_flight: false,
            destroy_log: Vec::new(),
            submitted_frames: Vec::new(),
        }
    }
}

impl SimulatedRuntime {
    pub const HEADLESS_EXTENSION: &'static str = "XR_MND_headless";
    pub const VALIDATION_LAYER: &'static str = "XR_APILAYER_LUNARG_core_validation";
    pub const SYSTEM_NAME: &'static str = "Theta Simulated HMD";
    pub const VENDOR_ID: u32 = 0x7e7a;
    pub const FORMAT_RGBA8: i64 = 37;
    pub const FORMAT_SRGBA8: i64 = 43;
    pub const FORMAT_RGBA16F: i64 = 97;

    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal create info accepted by the simulated runtime.
    pub fn basic_instance_info() -> InstanceCreateInfo {
        InstanceCreateInfo {
            application_name: "theta-xr-test".to_string(),
            application_version: 1,
            engine_name: "Theta Engine".to_string(),
            engine_version: 1,
            api_version: make_version(1, 0, 0),
            enabled_api_layers: Vec::new(),
            enabled_extensions: Vec::new(),
        }
    }

    pub fn headless_binding() -> GraphicsBinding {
        GraphicsBinding {
            api: HeadlessGraphics::DRIVER.to_string(),
            native: Vec::new(),
        }
    }

    /// Makes every later call of `call` fail with `code` until cleared.
    pub fn fail_call(&mut self, call: RuntimeCall, code: ResultCode) {
        self.failures.insert(call, code);
    }

    pub fn clear_failure(&mut self, call: RuntimeCall) {
        self.failures.remove(&call);
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    /// Queues a state change for the first live session.
    pub fn push_state(&mut self, state: SessionState) {
        if let Some(session) = self.sessions.keys().min_by_key(|handle| handle.into_raw()) {
            let event = RuntimeEvent::SessionStateChanged {
                session: *session,
                state,
                time: self.display_time,
            };
            self.events.push_back(event);
        }
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn instance_alive(&self) -> bool {
        self.instance.is_some()
    }

    pub fn instance_info(&self) -> Option<&InstanceCreateInfo> {
        self.instance_info.as_ref()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_running(&self) -> bool {
        self.sessions.values().any(|session| session.running)
    }

    pub fn exit_requested(&self) -> bool {
        self.sessions.values().any(|session| session.exit_requested)
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    pub fn swapchain_count(&self) -> usize {
        self.swapchains.len()
    }

    pub fn swapchain_info(&self, swapchain: SwapchainHandle) -> Option<SwapchainCreateInfo> {
        self.swapchains.get(&swapchain).map(|state| state.info)
    }

    /// Kinds of destroyed handles, in destruction order.
    pub fn destroy_log(&self) -> &[&'static str] {
        &self.destroy_log
    }

    pub fn submitted_frames(&self) -> &[FrameEndInfo] {
        &self.submitted_frames
    }

    fn check(&self, call: RuntimeCall) -> RuntimeResult<()> {
        match self.failures.get(&call) {
            Some(code) => Err(*code),
            None => Ok(()),
        }
    }

    fn allocate(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn check_instance(&self, instance: InstanceHandle) -> RuntimeResult<()> {
        if self.instance == Some(instance) {
            Ok(())
        } else {
            Err(ResultCode::ERROR_HANDLE_INVALID)
        }
    }

    fn session_mut(&mut self, session: SessionHandle) -> RuntimeResult<&mut SimSession> {
        self.sessions
            .get_mut(&session)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)
    }

    fn running_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        if self.session_mut(session)?.running {
            Ok(())
        } else {
            Err(ResultCode::ERROR_SESSION_NOT_RUNNING)
        }
    }

    fn swapchain_mut(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<&mut SimSwapchain> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)
    }

    fn view_count(&self, view_configuration: ViewConfigurationType) -> usize {
        match view_configuration {
            ViewConfigurationType::PrimaryMono => 1,
            ViewConfigurationType::PrimaryStereo => 2,
        }
    }
}

impl XrRuntime for SimulatedRuntime {
    fn label(&self) -> &'static str {
        "simulated"
    }

    fn enumerate_api_layers(&mut self) -> RuntimeResult<Vec<ApiLayerProperties>> {
        self.check(RuntimeCall::EnumerateApiLayers)?;
        Ok(self.api_layers.clone())
    }

    fn enumerate_extensions(&mut self) -> RuntimeResult<Vec<ExtensionProperties>> {
        self.check(RuntimeCall::EnumerateExtensions)?;
        Ok(self.extensions.clone())
    }

    fn create_instance(&mut self, info: &InstanceCreateInfo) -> RuntimeResult<InstanceHandle> {
        self.check(RuntimeCall::CreateInstance)?;
        if self.instance.is_some() {
            return Err(ResultCode::ERROR_LIMIT_REACHED);
        }
        let unknown_extension = info
            .enabled_extensions
            .iter()
            .any(|name| !self.extensions.iter().any(|ext| &ext.name == name));
        if unknown_extension {
            return Err(ResultCode::ERROR_EXTENSION_NOT_PRESENT);
        }
        let unknown_layer = info
            .enabled_api_layers
            .iter()
            .any(|name| !self.api_layers.iter().any(|layer| &layer.layer_name == name));
        if unknown_layer {
            return Err(ResultCode::ERROR_API_LAYER_NOT_PRESENT);
        }

        let handle = InstanceHandle::from_raw(self.allocate());
        self.instance = Some(handle);
        self.instance_info = Some(info.clone());
        Ok(handle)
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()> {
        self.check_instance(instance)?;
        self.instance = None;
        self.events.clear();
        self.destroy_log.push("instance");
        Ok(())
    }

    fn instance_properties(
        &mut self,
        instance: InstanceHandle,
    ) -> RuntimeResult<InstanceProperties> {
        self.check(RuntimeCall::InstanceProperties)?;
        self.check_instance(instance)?;
        Ok(InstanceProperties {
            runtime_name: self.runtime_name.clone(),
            runtime_version: self.runtime_version,
        })
    }

    fn get_system(
        &mut self,
        instance: InstanceHandle,
        form_factor: FormFactor,
    ) -> RuntimeResult<SystemId> {
        self.check(RuntimeCall::GetSystem)?;
        self.check_instance(instance)?;
        match form_factor {
            FormFactor::HeadMountedDisplay if self.system_available => {
                Ok(SystemId::from_raw(Self::VENDOR_ID as u64))
            }
            FormFactor::HeadMountedDisplay => Err(ResultCode::ERROR_FORM_FACTOR_UNAVAILABLE),
            FormFactor::HandheldDisplay => Err(ResultCode::ERROR_FORM_FACTOR_UNSUPPORTED),
        }
    }

    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        self.check(RuntimeCall::SystemProperties)?;
        self.check_instance(instance)?;
        Ok(SystemProperties {
            system_id: system,
            vendor_id: Self::VENDOR_ID,
            system_name: Self::SYSTEM_NAME.to_string(),
            graphics: self.system_graphics,
            tracking: SystemTrackingProperties {
                orientation_tracking: true,
                position_tracking: true,
            },
        })
    }

    fn enumerate_view_configurations(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> RuntimeResult<Vec<ViewConfigurationType>> {
        self.check(RuntimeCall::EnumerateViewConfigurations)?;
        self.check_instance(instance)?;
        Ok(self.view_configurations.clone())
    }

    fn enumerate_view_configuration_views(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfigurationView>> {
        self.check(RuntimeCall::EnumerateViewConfigurationViews)?;
        self.check_instance(instance)?;
        if !self.view_configurations.contains(&view_configuration) {
            return Err(ResultCode::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
        }
        let count = self.view_count(view_configuration);
        Ok(self
            .view_configuration_views
            .iter()
            .take(count)
            .copied()
            .collect())
    }

    fn enumerate_environment_blend_modes(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<Vec<EnvironmentBlendMode>> {
        self.check(RuntimeCall::EnumerateEnvironmentBlendModes)?;
        self.check_instance(instance)?;
        if !self.view_configurations.contains(&view_configuration) {
            return Err(ResultCode::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
        }
        Ok(self.blend_modes.clone())
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        _binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle> {
        self.check(RuntimeCall::CreateSession)?;
        self.check_instance(instance)?;
        if !self.system_available {
            return Err(ResultCode::ERROR_SYSTEM_INVALID);
        }
        let handle = SessionHandle::from_raw(self.allocate());
        self.sessions.insert(handle, SimSession::default());
        self.events.push_back(RuntimeEvent::SessionStateChanged {
            session: handle,
            state: SessionState::Idle,
            time: self.display_time,
        });
        Ok(handle)
    }

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.sessions
            .remove(&session)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)?;
        self.destroy_log.push("session");
        Ok(())
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<()> {
        self.check(RuntimeCall::BeginSession)?;
        if !self.view_configurations.contains(&view_configuration) {
            return Err(ResultCode::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED);
        }
        let state = self.session_mut(session)?;
        if state.running {
            return Err(ResultCode::ERROR_SESSION_RUNNING);
        }
        state.running = true;
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.check(RuntimeCall::EndSession)?;
        let state = self.session_mut(session)?;
        if !state.running {
            return Err(ResultCode::ERROR_SESSION_NOT_RUNNING);
        }
        state.running = false;
        self.frame_in_flight = false;
        Ok(())
    }

    fn request_exit_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.check(RuntimeCall::RequestExitSession)?;
        self.running_session(session)?;
        self.session_mut(session)?.exit_requested = true;
        Ok(())
    }

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceType>> {
        self.check(RuntimeCall::EnumerateReferenceSpaces)?;
        self.session_mut(session)?;
        Ok(self.reference_spaces.clone())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        _pose_in_space: Pose,
    ) -> RuntimeResult<SpaceHandle> {
        self.check(RuntimeCall::CreateReferenceSpace)?;
        self.session_mut(session)?;
        if !self.reference_spaces.contains(&space_type) {
            return Err(ResultCode::ERROR_REFERENCE_SPACE_UNSUPPORTED);
        }
        let handle = SpaceHandle::from_raw(self.allocate());
        self.spaces.insert(handle, space_type);
        Ok(handle)
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
        self.spaces
            .remove(&space)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)?;
        self.destroy_log.push("space");
        Ok(())
    }

    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        _time: i64,
    ) -> RuntimeResult<SpaceLocation> {
        self.check(RuntimeCall::LocateSpace)?;
        let space_type = *self
            .spaces
            .get(&space)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)?;
        let base_type = *self
            .spaces
            .get(&base)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)?;
        if space_type == base_type {
            return Ok(SpaceLocation {
                flags: LocationFlags::ALL,
                pose: Pose::default(),
                velocity: Some(SpaceVelocity::default()),
            });
        }
        Ok(self.head_location)
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        _display_time: i64,
        space: SpaceHandle,
    ) -> RuntimeResult<LocatedViews> {
        self.check(RuntimeCall::LocateViews)?;
        self.running_session(session)?;
        if !self.spaces.contains_key(&space) {
            return Err(ResultCode::ERROR_HANDLE_INVALID);
        }

        let head = self.head_location.pose;
        let count = self.view_count(view_configuration);
        let half = self.eye_separation / 2.0;
        let views = (0..count)
            .map(|eye| {
                let offset = match (count, eye) {
                    (1, _) => 0.0,
                    (_, 0) => -half,
                    _ => half,
                };
                View {
                    pose: Pose {
                        orientation: head.orientation,
                        position: Vec3::new(
                            head.position.x + offset,
                            head.position.y,
                            head.position.z,
                        ),
                    },
                    fov: self.eye_fov,
                }
            })
            .collect();

        Ok(LocatedViews {
            flags: self.view_flags,
            views,
        })
    }

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> RuntimeResult<Vec<i64>> {
        self.check(RuntimeCall::EnumerateSwapchainFormats)?;
        self.session_mut(session)?;
        Ok(self.swapchain_formats.clone())
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<SwapchainHandle> {
        self.check(RuntimeCall::CreateSwapchain)?;
        self.session_mut(session)?;
        if !self.swapchain_formats.contains(&info.format) {
            return Err(ResultCode::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED);
        }
        if info.width == 0
            || info.height == 0
            || info.width > self.system_graphics.max_swapchain_image_width
            || info.height > self.system_graphics.max_swapchain_image_height
        {
            return Err(ResultCode::ERROR_VALIDATION_FAILURE);
        }
        let handle = SwapchainHandle::from_raw(self.allocate());
        self.swapchains.insert(
            handle,
            SimSwapchain {
                info: *info,
                next_image: 0,
                acquired: None,
                waited: false,
            },
        );
        Ok(handle)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.swapchains
            .remove(&swapchain)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)?;
        self.destroy_log.push("swapchain");
        Ok(())
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        self.check(RuntimeCall::EnumerateSwapchainImages)?;
        self.swapchain_mut(swapchain)?;
        Ok(self.swapchain_image_count)
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        self.check(RuntimeCall::AcquireSwapchainImage)?;
        let image_count = self.swapchain_image_count.max(1);
        let state = self.swapchain_mut(swapchain)?;
        if state.acquired.is_some() {
            return Err(ResultCode::ERROR_CALL_ORDER_INVALID);
        }
        let index = state.next_image;
        state.next_image = (index + 1) % image_count;
        state.acquired = Some(index);
        state.waited = false;
        Ok(index)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        _timeout: Duration,
    ) -> RuntimeResult<()> {
        self.check(RuntimeCall::WaitSwapchainImage)?;
        let state = self.swapchain_mut(swapchain)?;
        if state.acquired.is_none() || state.waited {
            return Err(ResultCode::ERROR_CALL_ORDER_INVALID);
        }
        state.waited = true;
        Ok(())
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        self.check(RuntimeCall::ReleaseSwapchainImage)?;
        let state = self.swapchain_mut(swapchain)?;
        if !state.waited {
            return Err(ResultCode::ERROR_CALL_ORDER_INVALID);
        }
        state.acquired = None;
        state.waited = false;
        Ok(())
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        self.check(RuntimeCall::PollEvent)?;
        self.check_instance(instance)?;
        Ok(self.events.pop_front())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameState> {
        self.check(RuntimeCall::WaitFrame)?;
        self.running_session(session)?;
        self.display_time += self.display_period;
        Ok(FrameState {
            predicted_display_time: self.display_time,
            predicted_display_period: self.display_period,
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        self.check(RuntimeCall::BeginFrame)?;
        self.running_session(session)?;
        self.frame_in_flight = true;
        Ok(())
    }

    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo) -> RuntimeResult<()> {
        self.check(RuntimeCall::EndFrame)?;
        self.running_session(session)?;
        if !self.frame_in_flight {
            return Err(ResultCode::ERROR_CALL_ORDER_INVALID);
        }
        if !self.blend_modes.contains(&info.blend_mode) {
            return Err(ResultCode::ERROR_ENVIRONMENT_BLEND_MODE_UNSUPPORTED);
        }
        self.frame_in_flight = false;
        self.submitted_frames.push(info.clone());
        Ok(())
    }
}

/// Graphics extension that keeps image sets as bookkeeping only.
#[derive(Debug, Default)]
pub struct HeadlessGraphics {
    next_image_set: u64,
    live_image_sets: Vec<ImageSetHandle>,
    freed_image_sets: Vec<ImageSetHandle>,
    copies: Vec<(RenderTargetId, ImageSetHandle, u32)>,
    preferred_formats: Vec<i64>,
    session_created: bool,
}

impl HeadlessGraphics {
    pub const DRIVER: &'static str = "headless";

    pub fn new() -> Self {
        Self {
            preferred_formats: vec![
                SimulatedRuntime::FORMAT_SRGBA8,
                SimulatedRuntime::FORMAT_RGBA8,
            ],
            ..Self::default()
        }
    }

    pub fn with_formats(formats: Vec<i64>) -> Self {
        Self {
            preferred_formats: formats,
            ..Self::default()
        }
    }

    pub fn live_image_sets(&self) -> &[ImageSetHandle] {
        &self.live_image_sets
    }

    pub fn freed_image_sets(&self) -> &[ImageSetHandle] {
        &self.freed_image_sets
    }

    pub fn copies(&self) -> &[(RenderTargetId, ImageSetHandle, u32)] {
        &self.copies
    }
}

impl ExtensionWrapper for HeadlessGraphics {
    fn label(&self) -> &str {
        "headless-graphics"
    }

    fn requested_extensions(&self) -> Vec<ExtensionRequest> {
        vec![ExtensionRequest::required(SimulatedRuntime::HEADLESS_EXTENSION)]
    }

    fn on_session_created(&mut self, _session: SessionHandle) {
        self.session_created = true;
    }

    fn on_session_destroyed(&mut self) {
        self.session_created = false;
    }
}

impl GraphicsExtension for HeadlessGraphics {
    fn driver_name(&self) -> &str {
        Self::DRIVER
    }

    fn session_binding(&mut self) -> VrResult<GraphicsBinding> {
        Ok(SimulatedRuntime::headless_binding())
    }

    fn usable_swapchain_formats(&self) -> Vec<i64> {
        self.preferred_formats.clone()
    }

    fn create_image_set(
        &mut self,
        runtime: &mut dyn XrRuntime,
        swapchain: SwapchainHandle,
        descriptor: &SwapchainDescriptor,
    ) -> VrResult<ImageSetHandle> {
        let image_count = runtime
            .enumerate_swapchain_images(swapchain)
            .map_err(|code| VrError::runtime("xrEnumerateSwapchainImages", code))?;
        if image_count == 0 {
            return Err(VrError::Graphics(format!(
                "swapchain {swapchain:?} has no images"
            )));
        }
        self.next_image_set += 1;
        let images = ImageSetHandle(self.next_image_set);
        log::debug!(
            "[xr-swapchain] headless image set {:?}: {} images of {}x{}",
            images,
            image_count,
            descriptor.extent.width,
            descriptor.extent.height
        );
        self.live_image_sets.push(images);
        Ok(images)
    }

    fn free_image_set(&mut self, images: ImageSetHandle) {
        self.live_image_sets.retain(|live| *live != images);
        self.freed_image_sets.push(images);
    }

    fn copy_render_target_to_image(
        &mut self,
        render_target: RenderTargetId,
        images: ImageSetHandle,
        image_index: u32,
    ) -> VrResult<()> {
        if !self.live_image_sets.contains(&images) {
            return Err(VrError::Graphics(format!("unknown image set {images:?}")));
        }
        self.copies.push((render_target, images, image_index));
        Ok(())
    }
}
