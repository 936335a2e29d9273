//! The seam between the core and the external XR runtime.
//!
//! Everything the core needs from a device runtime goes through [`XrRuntime`].
//! Handles returned by the runtime are opaque newtypes; the core owns each one
//! through a [`Scoped`] wrapper which destroys it when dropped.

use crate::vr::{
    EnvironmentBlendMode, Extent2D, FormFactor, Fov, Pose, ReferenceSpaceType, SessionState,
    Vec3, ViewConfigurationType, VrError, VrResult,
};
use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

macro_rules! runtime_handle {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(u64);

            impl $name {
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                pub const fn into_raw(self) -> u64 {
                    self.0
                }
            }
        )+
    };
}

runtime_handle!(
    /// Connection to the runtime instance.
    InstanceHandle,
    /// Physical device resolved for a form factor.
    SystemId,
    SessionHandle,
    SpaceHandle,
    SwapchainHandle,
);

/// Raw runtime result code. Negative values are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const TIMEOUT_EXPIRED: ResultCode = ResultCode(1);
    pub const SESSION_LOSS_PENDING: ResultCode = ResultCode(3);
    pub const EVENT_UNAVAILABLE: ResultCode = ResultCode(4);
    pub const ERROR_VALIDATION_FAILURE: ResultCode = ResultCode(-1);
    pub const ERROR_RUNTIME_FAILURE: ResultCode = ResultCode(-2);
    pub const ERROR_OUT_OF_MEMORY: ResultCode = ResultCode(-3);
    pub const ERROR_API_VERSION_UNSUPPORTED: ResultCode = ResultCode(-4);
    pub const ERROR_INITIALIZATION_FAILED: ResultCode = ResultCode(-6);
    pub const ERROR_FUNCTION_UNSUPPORTED: ResultCode = ResultCode(-7);
    pub const ERROR_FEATURE_UNSUPPORTED: ResultCode = ResultCode(-8);
    pub const ERROR_EXTENSION_NOT_PRESENT: ResultCode = ResultCode(-9);
    pub const ERROR_LIMIT_REACHED: ResultCode = ResultCode(-10);
    pub const ERROR_HANDLE_INVALID: ResultCode = ResultCode(-12);
    pub const ERROR_INSTANCE_LOST: ResultCode = ResultCode(-13);
    pub const ERROR_SESSION_RUNNING: ResultCode = ResultCode(-14);
    pub const ERROR_SESSION_NOT_RUNNING: ResultCode = ResultCode(-16);
    pub const ERROR_SESSION_LOST: ResultCode = ResultCode(-17);
    pub const ERROR_SYSTEM_INVALID: ResultCode = ResultCode(-18);
    pub const ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED: ResultCode = ResultCode(-26);
    pub const ERROR_REFERENCE_SPACE_UNSUPPORTED: ResultCode = ResultCode(-31);
    pub const ERROR_FORM_FACTOR_UNSUPPORTED: ResultCode = ResultCode(-34);
    pub const ERROR_FORM_FACTOR_UNAVAILABLE: ResultCode = ResultCode(-35);
    pub const ERROR_API_LAYER_NOT_PRESENT: ResultCode = ResultCode(-36);
    pub const ERROR_CALL_ORDER_INVALID: ResultCode = ResultCode(-37);
    pub const ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED: ResultCode = ResultCode(-41);
    pub const ERROR_ENVIRONMENT_BLEND_MODE_UNSUPPORTED: ResultCode = ResultCode(-42);
    pub const ERROR_RUNTIME_UNAVAILABLE: ResultCode = ResultCode(-51);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            ResultCode::SUCCESS => "XR_SUCCESS",
            ResultCode::TIMEOUT_EXPIRED => "XR_TIMEOUT_EXPIRED",
            ResultCode::SESSION_LOSS_PENDING => "XR_SESSION_LOSS_PENDING",
            ResultCode::EVENT_UNAVAILABLE => "XR_EVENT_UNAVAILABLE",
            ResultCode::ERROR_VALIDATION_FAILURE => "XR_ERROR_VALIDATION_FAILURE",
            ResultCode::ERROR_RUNTIME_FAILURE => "XR_ERROR_RUNTIME_FAILURE",
            ResultCode::ERROR_OUT_OF_MEMORY => "XR_ERROR_OUT_OF_MEMORY",
            ResultCode::ERROR_API_VERSION_UNSUPPORTED => "XR_ERROR_API_VERSION_UNSUPPORTED",
            ResultCode::ERROR_INITIALIZATION_FAILED => "XR_ERROR_INITIALIZATION_FAILED",
            ResultCode::ERROR_FUNCTION_UNSUPPORTED => "XR_ERROR_FUNCTION_UNSUPPORTED",
            ResultCode::ERROR_FEATURE_UNSUPPORTED => "XR_ERROR_FEATURE_UNSUPPORTED",
            ResultCode::ERROR_EXTENSION_NOT_PRESENT => "XR_ERROR_EXTENSION_NOT_PRESENT",
            ResultCode::ERROR_LIMIT_REACHED => "XR_ERROR_LIMIT_REACHED",
            ResultCode::ERROR_HANDLE_INVALID => "XR_ERROR_HANDLE_INVALID",
            ResultCode::ERROR_INSTANCE_LOST => "XR_ERROR_INSTANCE_LOST",
            ResultCode::ERROR_SESSION_RUNNING => "XR_ERROR_SESSION_RUNNING",
            ResultCode::ERROR_SESSION_NOT_RUNNING => "XR_ERROR_SESSION_NOT_RUNNING",
            ResultCode::ERROR_SESSION_LOST => "XR_ERROR_SESSION_LOST",
            ResultCode::ERROR_SYSTEM_INVALID => "XR_ERROR_SYSTEM_INVALID",
            ResultCode::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED => {
                "XR_ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED"
            }
            ResultCode::ERROR_REFERENCE_SPACE_UNSUPPORTED => "XR_ERROR_REFERENCE_SPACE_UNSUPPORTED",
            ResultCode::ERROR_FORM_FACTOR_UNSUPPORTED => "XR_ERROR_FORM_FACTOR_UNSUPPORTED",
            ResultCode::ERROR_FORM_FACTOR_UNAVAILABLE => "XR_ERROR_FORM_FACTOR_UNAVAILABLE",
            ResultCode::ERROR_API_LAYER_NOT_PRESENT => "XR_ERROR_API_LAYER_NOT_PRESENT",
            ResultCode::ERROR_CALL_ORDER_INVALID => "XR_ERROR_CALL_ORDER_INVALID",
            ResultCode::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED => {
                "XR_ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED"
            }
            ResultCode::ERROR_ENVIRONMENT_BLEND_MODE_UNSUPPORTED => {
                "XR_ERROR_ENVIRONMENT_BLEND_MODE_UNSUPPORTED"
            }
            ResultCode::ERROR_RUNTIME_UNAVAILABLE => "XR_ERROR_RUNTIME_UNAVAILABLE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "XR_UNKNOWN_RESULT({})", self.0),
        }
    }
}

pub type RuntimeResult<T> = Result<T, ResultCode>;

pub(crate) trait RuntimeResultExt<T> {
    /// Attaches the name of the failing runtime call.
    fn call(self, call: &'static str) -> VrResult<T>;
}

impl<T> RuntimeResultExt<T> for RuntimeResult<T> {
    fn call(self, call: &'static str) -> VrResult<T> {
        self.map_err(|code| VrError::runtime(call, code))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiLayerProperties {
    pub layer_name: String,
    pub spec_version: u64,
    pub layer_version: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionProperties {
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCreateInfo {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub api_version: u64,
    pub enabled_api_layers: Vec<String>,
    pub enabled_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProperties {
    pub runtime_name: String,
    pub runtime_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemGraphicsProperties {
    pub max_swapchain_image_width: u32,
    pub max_swapchain_image_height: u32,
    pub max_layer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemTrackingProperties {
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProperties {
    pub system_id: SystemId,
    pub vendor_id: u32,
    pub system_name: String,
    pub graphics: SystemGraphicsProperties,
    pub tracking: SystemTrackingProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewConfigurationView {
    pub recommended_image_rect_width: u32,
    pub max_image_rect_width: u32,
    pub recommended_image_rect_height: u32,
    pub max_image_rect_height: u32,
    pub recommended_swapchain_sample_count: u32,
    pub max_swapchain_sample_count: u32,
}

/// Backend-specific session creation payload produced by the graphics extension.
///
/// The core never interprets `native`; it is handed to the runtime untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsBinding {
    pub api: String,
    pub native: Vec<u64>,
}

pub const SWAPCHAIN_USAGE_COLOR_ATTACHMENT: u64 = 0x1;
pub const SWAPCHAIN_USAGE_SAMPLED: u64 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub usage_flags: u64,
    pub format: i64,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameState {
    /// Nanoseconds on the runtime clock.
    pub predicted_display_time: i64,
    pub predicted_display_period: i64,
    pub should_render: bool,
}

/// Location validity bits shared by space locations and view states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocationFlags(pub u64);

impl LocationFlags {
    pub const ORIENTATION_VALID: LocationFlags = LocationFlags(0x1);
    pub const POSITION_VALID: LocationFlags = LocationFlags(0x2);
    pub const ORIENTATION_TRACKED: LocationFlags = LocationFlags(0x4);
    pub const POSITION_TRACKED: LocationFlags = LocationFlags(0x8);
    pub const ALL: LocationFlags = LocationFlags(0xf);

    pub fn contains(self, other: LocationFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LocationFlags {
    type Output = LocationFlags;

    fn bitor(self, rhs: LocationFlags) -> LocationFlags {
        LocationFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpaceVelocity {
    pub linear_valid: bool,
    pub angular_valid: bool,
    pub linear: Vec3,
    pub angular: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpaceLocation {
    pub flags: LocationFlags,
    pub pose: Pose,
    /// Present when the runtime reports velocities alongside the pose.
    pub velocity: Option<SpaceVelocity>,
}

/// One joint of a tracked hand, located like a space plus the joint radius in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandJointLocation {
    pub flags: LocationFlags,
    pub pose: Pose,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocatedViews {
    pub flags: LocationFlags,
    pub views: Vec<View>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time: i64,
    },
    InstanceLossPending {
        loss_time: i64,
    },
    EventsLost {
        lost_count: u32,
    },
    ReferenceSpaceChangePending {
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        change_time: i64,
    },
    InteractionProfileChanged {
        session: SessionHandle,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2D {
    pub offset: (i32, i32),
    pub extent: Extent2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSubImage {
    pub swapchain: SwapchainHandle,
    pub image_rect: Rect2D,
    pub image_array_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub sub_image: SwapchainSubImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionLayer {
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeVisibility {
    Both,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadLayer {
    pub space: SpaceHandle,
    pub eye_visibility: EyeVisibility,
    pub sub_image: SwapchainSubImage,
    pub pose: Pose,
    pub size: (f32, f32),
}

/// A surface submitted to the runtime compositor.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositionLayer {
    Projection(ProjectionLayer),
    Quad(QuadLayer),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameEndInfo {
    pub display_time: i64,
    pub blend_mode: EnvironmentBlendMode,
    pub layers: Vec<CompositionLayer>,
}

/// Calls the core issues against the device runtime.
///
/// All methods run on the render thread; implementations are free to block
/// only inside [`XrRuntime::wait_swapchain_image`] and [`XrRuntime::wait_frame`].
pub trait XrRuntime {
    fn label(&self) -> &'static str;

    fn enumerate_api_layers(&mut self) -> RuntimeResult<Vec<ApiLayerProperties>>;
    fn enumerate_extensions(&mut self) -> RuntimeResult<Vec<ExtensionProperties>>;
    fn create_instance(&mut self, info: &InstanceCreateInfo) -> RuntimeResult<InstanceHandle>;
    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()>;
    fn instance_properties(&mut self, instance: InstanceHandle)
    -> RuntimeResult<InstanceProperties>;

    fn get_system(
        &mut self,
        instance: InstanceHandle,
        form_factor: FormFactor,
    ) -> RuntimeResult<SystemId>;
    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties>;
    fn enumerate_view_configurations(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<Vec<ViewConfigurationType>>;
    fn enumerate_view_configuration_views(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfigurationView>>;
    fn enumerate_environment_blend_modes(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<Vec<EnvironmentBlendMode>>;

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle>;
    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<()>;
    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    fn request_exit_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceType>>;
    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        pose_in_space: Pose,
    ) -> RuntimeResult<SpaceHandle>;
    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()>;
    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: i64,
    ) -> RuntimeResult<SpaceLocation>;
    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        display_time: i64,
        space: SpaceHandle,
    ) -> RuntimeResult<LocatedViews>;

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> RuntimeResult<Vec<i64>>;
    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<SwapchainHandle>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()>;
    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32>;
    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32>;
    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: Duration,
    ) -> RuntimeResult<()>;
    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()>;

    /// Returns `Ok(None)` once the event queue is drained.
    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>>;
    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameState>;
    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo) -> RuntimeResult<()>;
}

/// Runtime shared by every scoped handle. The core is single threaded.
pub type SharedRuntime = Rc<RefCell<dyn XrRuntime>>;

/// A runtime handle type with a matching destroy call.
pub trait RuntimeHandle: Copy + fmt::Debug {
    const KIND: &'static str;

    fn destroy(self, runtime: &mut dyn XrRuntime) -> RuntimeResult<()>;
}

impl RuntimeHandle for InstanceHandle {
    const KIND: &'static str = "instance";

    fn destroy(self, runtime: &mut dyn XrRuntime) -> RuntimeResult<()> {
        runtime.destroy_instance(self)
    }
}

impl RuntimeHandle for SessionHandle {
    const KIND: &'static str = "session";

    fn destroy(self, runtime: &mut dyn XrRuntime) -> RuntimeResult<()> {
        runtime.destroy_session(self)
    }
}

impl RuntimeHandle for SpaceHandle {
    const KIND: &'static str = "space";

    fn destroy(self, runtime: &mut dyn XrRuntime) -> RuntimeResult<()> {
        runtime.destroy_space(self)
    }
}

impl RuntimeHandle for SwapchainHandle {
    const KIND: &'static str = "swapchain";

    fn destroy(self, runtime: &mut dyn XrRuntime) -> RuntimeResult<()> {
        runtime.destroy_swapchain(self)
    }
}

/// Owns a runtime handle and destroys it exactly once.
///
/// Dropping a `Scoped` while the runtime is mutably borrowed leaks the handle
/// and logs an error instead of panicking.
pub struct Scoped<H: RuntimeHandle> {
    raw: H,
    live: bool,
    runtime: SharedRuntime,
}

impl<H: RuntimeHandle> Scoped<H> {
    pub fn new(raw: H, runtime: SharedRuntime) -> Self {
        Self {
            raw,
            live: true,
            runtime,
        }
    }

    pub fn raw(&self) -> H {
        self.raw
    }

    pub fn runtime(&self) -> RefMut<'_, dyn XrRuntime> {
        self.runtime.borrow_mut()
    }

    pub fn shared_runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    /// Destroys the handle now, reporting the runtime's answer.
    pub fn destroy(mut self) -> RuntimeResult<()> {
        self.live = false;
        let mut runtime = self.runtime.borrow_mut();
        self.raw.destroy(&mut *runtime)
    }
}

impl<H: RuntimeHandle> fmt::Debug for Scoped<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped")
            .field("kind", &H::KIND)
            .field("raw", &self.raw)
            .field("live", &self.live)
            .finish()
    }
}

impl<H: RuntimeHandle> Drop for Scoped<H> {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        match self.runtime.try_borrow_mut() {
            Ok(mut runtime) => {
                if let Err(code) = self.raw.destroy(&mut *runtime) {
                    log::error!("[xr] failed to destroy {} {:?}: {code}", H::KIND, self.raw);
                }
            }
            Err(_) => {
                log::error!(
                    "[xr] runtime busy while dropping {} {:?}; handle leaked",
                    H::KIND,
                    self.raw
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::simulated::SimulatedRuntime;

    #[test]
    fn result_code_display_names_known_codes() {
        assert_eq!(ResultCode::ERROR_SESSION_LOST.to_string(), "XR_ERROR_SESSION_LOST");
        assert_eq!(ResultCode(-9999).to_string(), "XR_UNKNOWN_RESULT(-9999)");
        assert!(ResultCode::TIMEOUT_EXPIRED.is_success());
        assert!(!ResultCode::ERROR_RUNTIME_FAILURE.is_success());
    }

    #[test]
    fn location_flags_contain_subsets() {
        let flags = LocationFlags::ORIENTATION_VALID | LocationFlags::POSITION_VALID;
        assert!(flags.contains(LocationFlags::POSITION_VALID));
        assert!(!flags.contains(LocationFlags::POSITION_TRACKED));
        assert!(LocationFlags::ALL.contains(flags));
    }

    #[test]
    fn scoped_handle_destroys_once_on_drop() {
        let sim = Rc::new(RefCell::new(SimulatedRuntime::default()));
        let shared: SharedRuntime = sim.clone();
        let instance = shared
            .borrow_mut()
            .create_instance(&SimulatedRuntime::basic_instance_info())
            .expect("instance");

        let scoped = Scoped::new(instance, shared.clone());
        assert!(sim.borrow().instance_alive());
        drop(scoped);
        assert!(!sim.borrow().instance_alive());
        assert_eq!(sim.borrow().destroy_log(), ["instance"]);
    }

    #[test]
    fn explicit_destroy_reports_result_and_skips_drop() {
        let sim = Rc::new(RefCell::new(SimulatedRuntime::default()));
        let shared: SharedRuntime = sim.clone();
        let instance = shared
            .borrow_mut()
            .create_instance(&SimulatedRuntime::basic_instance_info())
            .expect("instance");

        Scoped::new(instance, shared.clone())
            .destroy()
            .expect("destroy succeeds");
        assert_eq!(sim.borrow().destroy_log().len(), 1);
    }
}
