//! [`XrRuntime`] backed by the system OpenXR loader, plus the value
//! conversions between this crate's vocabulary and `openxr::sys`.
//!
//! The crate's vocabulary keeps the runtime's raw values, so every conversion
//! here goes through `from_raw`/`into_raw`. Enum conversions from the runtime
//! side return `None` for values this crate does not model.
//!
//! Instance creation, system queries and event polling use the `openxr`
//! wrapper. Everything below the instance goes through the raw function
//! table, because sessions here are keyed by handle rather than by graphics
//! API type. Our handles carry the runtime's handle values unchanged.

use crate::vr::runtime::{
    ApiLayerProperties, CompositionLayer, EyeVisibility, ExtensionProperties, FrameEndInfo,
    FrameState, GraphicsBinding, HandJointLocation, InstanceCreateInfo, InstanceHandle,
    InstanceProperties, LocatedViews, LocationFlags, ProjectionView, QuadLayer, ResultCode,
    RuntimeEvent, RuntimeResult, SessionHandle, SpaceHandle, SpaceLocation, SpaceVelocity,
    SwapchainCreateInfo, SwapchainHandle, SwapchainSubImage, SystemGraphicsProperties, SystemId,
    SystemProperties, SystemTrackingProperties, View, ViewConfigurationView, XrRuntime,
};
use crate::vr::{
    EnvironmentBlendMode, FormFactor, Fov, Pose, Quat, ReferenceSpaceType, SessionState, Vec3,
    ViewConfigurationType, VrError, VrResult,
};
use openxr::sys;
use std::ffi::{c_char, c_void};
use std::{mem, ptr};
use std::time::Duration;

macro_rules! raw_enum_interop {
    ($($ours:ident <=> $theirs:ident: $to:ident, $from:ident;)+) => {
        $(
            pub fn $to(value: $ours) -> sys::$theirs {
                sys::$theirs::from_raw(value.as_raw())
            }

            pub fn $from(value: sys::$theirs) -> Option<$ours> {
                $ours::from_raw(value.into_raw())
            }
        )+
    };
}

raw_enum_interop! {
    FormFactor <=> FormFactor: form_factor_to_sys, form_factor_from_sys;
    ViewConfigurationType <=> ViewConfigurationType: view_configuration_to_sys, view_configuration_from_sys;
    ReferenceSpaceType <=> ReferenceSpaceType: reference_space_to_sys, reference_space_from_sys;
    EnvironmentBlendMode <=> EnvironmentBlendMode: blend_mode_to_sys, blend_mode_from_sys;
    SessionState <=> SessionState: session_state_to_sys, session_state_from_sys;
}

pub fn result_from_sys(result: sys::Result) -> ResultCode {
    ResultCode(result.into_raw())
}

pub fn result_to_sys(code: ResultCode) -> sys::Result {
    sys::Result::from_raw(code.0)
}

/// Symbolic name plus the loader's description of a runtime result.
pub fn describe_result(code: ResultCode) -> String {
    let result = result_to_sys(code);
    format!("{result:?} ({result})")
}

pub fn location_flags_from_sys(flags: sys::SpaceLocationFlags) -> LocationFlags {
    LocationFlags(flags.into_raw())
}

pub fn pose_from_sys(pose: &sys::Posef) -> Pose {
    Pose {
        orientation: Quat {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: Vec3::new(pose.position.x, pose.position.y, pose.position.z),
    }
}

pub fn pose_to_sys(pose: &Pose) -> sys::Posef {
    sys::Posef {
        orientation: sys::Quaternionf {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: sys::Vector3f {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
    }
}

pub fn fov_from_sys(fov: &sys::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

/// Packed runtime version, as produced by [`crate::vr::make_version`].
pub fn version_from_sys(version: openxr::Version) -> u64 {
    version.into_raw()
}

pub fn fov_to_sys(fov: &Fov) -> sys::Fovf {
    sys::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn vec3_from_sys(v: &sys::Vector3f) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn hand_joint_from_sys(joint: &sys::HandJointLocationEXT) -> HandJointLocation {
    HandJointLocation {
        flags: location_flags_from_sys(joint.location_flags),
        pose: pose_from_sys(&joint.pose),
        radius: joint.radius,
    }
}

pub fn sub_image_to_sys(sub_image: &SwapchainSubImage) -> sys::SwapchainSubImage {
    let extent = sub_image.image_rect.extent;
    sys::SwapchainSubImage {
        swapchain: sys::Swapchain::from_raw(sub_image.swapchain.into_raw()),
        image_rect: sys::Rect2Di {
            offset: sys::Offset2Di {
                x: sub_image.image_rect.offset.0,
                y: sub_image.image_rect.offset.1,
            },
            extent: sys::Extent2Di {
                width: i32::try_from(extent.width).unwrap_or(i32::MAX),
                height: i32::try_from(extent.height).unwrap_or(i32::MAX),
            },
        },
        image_array_index: sub_image.image_array_index,
    }
}

/// Reads a NUL-terminated fixed-size name field.
fn fixed_str(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn check(result: sys::Result) -> RuntimeResult<()> {
    if result.into_raw() < 0 {
        Err(result_from_sys(result))
    } else {
        Ok(())
    }
}

/// Two-call enumeration: query the count, then fill `template` copies.
fn enumerate<T: Copy>(
    template: T,
    mut call: impl FnMut(u32, &mut u32, *mut T) -> sys::Result,
) -> RuntimeResult<Vec<T>> {
    let mut count = 0;
    check(call(0, &mut count, ptr::null_mut()))?;
    let mut items = vec![template; count as usize];
    if items.is_empty() {
        return Ok(items);
    }
    check(call(count, &mut count, items.as_mut_ptr()))?;
    items.truncate(count as usize);
    Ok(items)
}

enum SysLayer {
    Projection(sys::CompositionLayerProjection),
    Quad(sys::CompositionLayerQuad),
}

impl SysLayer {
    fn header(&self) -> *const sys::CompositionLayerBaseHeader {
        match self {
            SysLayer::Projection(layer) => {
                (layer as *const sys::CompositionLayerProjection).cast()
            }
            SysLayer::Quad(layer) => (layer as *const sys::CompositionLayerQuad).cast(),
        }
    }
}

/// Runtime-side copies of one frame's layers. The view arrays are heap
/// buffers that never grow, so projection layers may point into them.
struct SysFrameLayers {
    _views: Vec<Vec<sys::CompositionLayerProjectionView>>,
    layers: Vec<SysLayer>,
}

impl SysFrameLayers {
    fn build(layers: &[CompositionLayer]) -> Self {
        let views: Vec<Vec<sys::CompositionLayerProjectionView>> = layers
            .iter()
            .map(|layer| match layer {
                CompositionLayer::Projection(projection) => {
                    projection.views.iter().map(projection_view_to_sys).collect()
                }
                CompositionLayer::Quad(_) => Vec::new(),
            })
            .collect();
        let converted = layers
            .iter()
            .zip(&views)
            .map(|(layer, views)| match layer {
                CompositionLayer::Projection(projection) => {
                    SysLayer::Projection(sys::CompositionLayerProjection {
                        ty: sys::CompositionLayerProjection::TYPE,
                        next: ptr::null(),
                        layer_flags: sys::CompositionLayerFlags::EMPTY,
                        space: sys::Space::from_raw(projection.space.into_raw()),
                        view_count: views.len() as u32,
                        views: views.as_ptr(),
                    })
                }
                CompositionLayer::Quad(quad) => SysLayer::Quad(quad_to_sys(quad)),
            })
            .collect();
        Self {
            _views: views,
            layers: converted,
        }
    }

    fn headers(&self) -> Vec<*const sys::CompositionLayerBaseHeader> {
        self.layers.iter().map(SysLayer::header).collect()
    }
}

fn projection_view_to_sys(view: &ProjectionView) -> sys::CompositionLayerProjectionView {
    sys::CompositionLayerProjectionView {
        ty: sys::CompositionLayerProjectionView::TYPE,
        next: ptr::null(),
        pose: pose_to_sys(&view.pose),
        fov: fov_to_sys(&view.fov),
        sub_image: sub_image_to_sys(&view.sub_image),
    }
}

fn quad_to_sys(quad: &QuadLayer) -> sys::CompositionLayerQuad {
    sys::CompositionLayerQuad {
        ty: sys::CompositionLayerQuad::TYPE,
        next: ptr::null(),
        layer_flags: sys::CompositionLayerFlags::EMPTY,
        space: sys::Space::from_raw(quad.space.into_raw()),
        eye_visibility: match quad.eye_visibility {
            EyeVisibility::Both => sys::EyeVisibility::BOTH,
            EyeVisibility::Left => sys::EyeVisibility::LEFT,
            EyeVisibility::Right => sys::EyeVisibility::RIGHT,
        },
        sub_image: sub_image_to_sys(&quad.sub_image),
        pose: pose_to_sys(&quad.pose),
        size: sys::Extent2Df {
            width: quad.size.0,
            height: quad.size.1,
        },
    }
}

fn session_raw(session: SessionHandle) -> sys::Session {
    sys::Session::from_raw(session.into_raw())
}

fn space_raw(space: SpaceHandle) -> sys::Space {
    sys::Space::from_raw(space.into_raw())
}

fn swapchain_raw(swapchain: SwapchainHandle) -> sys::Swapchain {
    sys::Swapchain::from_raw(swapchain.into_raw())
}

/// The system OpenXR runtime, reached through the loader.
///
/// Holds at most one instance. Graphics extensions that need the instance
/// (to query graphics requirements before session creation) read it through
/// [`OpenXrRuntime::instance`]. They pass their session binding struct by
/// address in `GraphicsBinding::native[0]`; an empty `native` creates a
/// session without graphics.
pub struct OpenXrRuntime {
    entry: openxr::Entry,
    instance: Option<openxr::Instance>,
    events: openxr::EventDataBuffer,
}

impl OpenXrRuntime {
    pub fn load() -> VrResult<Self> {
        let entry = openxr::Entry::load()
            .map_err(|err| VrError::LoaderUnavailable(err.to_string()))?;
        Ok(Self {
            entry,
            instance: None,
            events: openxr::EventDataBuffer::new(),
        })
    }

    pub fn instance(&self) -> Option<&openxr::Instance> {
        self.instance.as_ref()
    }

    fn live(&self, handle: InstanceHandle) -> RuntimeResult<&openxr::Instance> {
        self.instance
            .as_ref()
            .filter(|instance| instance.as_raw().into_raw() == handle.into_raw())
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)
    }

    /// Function table for calls on handles below the instance.
    fn fp(&self) -> RuntimeResult<&openxr::raw::Instance> {
        self.instance
            .as_ref()
            .map(openxr::Instance::fp)
            .ok_or(ResultCode::ERROR_HANDLE_INVALID)
    }
}

impl XrRuntime for OpenXrRuntime {
    fn label(&self) -> &'static str {
        "openxr"
    }

    fn enumerate_api_layers(&mut self) -> RuntimeResult<Vec<ApiLayerProperties>> {
        let fp = self.entry.fp();
        let template = sys::ApiLayerProperties {
            ty: sys::ApiLayerProperties::TYPE,
            ..unsafe { mem::zeroed() }
        };
        let layers = enumerate(template, |capacity, count, out| unsafe {
            (fp.enumerate_api_layer_properties)(capacity, count, out)
        })?;
        Ok(layers
            .iter()
            .map(|layer| ApiLayerProperties {
                layer_name: fixed_str(&layer.layer_name),
                spec_version: version_from_sys(layer.spec_version),
                layer_version: layer.layer_version,
                description: fixed_str(&layer.description),
            })
            .collect())
    }

    fn enumerate_extensions(&mut self) -> RuntimeResult<Vec<ExtensionProperties>> {
        let fp = self.entry.fp();
        let template = sys::ExtensionProperties {
            ty: sys::ExtensionProperties::TYPE,
            ..unsafe { mem::zeroed() }
        };
        let extensions = enumerate(template, |capacity, count, out| unsafe {
            (fp.enumerate_instance_extension_properties)(ptr::null(), capacity, count, out)
        })?;
        Ok(extensions
            .iter()
            .map(|extension| ExtensionProperties {
                name: fixed_str(&extension.extension_name),
                version: extension.extension_version,
            })
            .collect())
    }

    fn create_instance(&mut self, info: &InstanceCreateInfo) -> RuntimeResult<InstanceHandle> {
        if self.instance.is_some() {
            return Err(ResultCode::ERROR_LIMIT_REACHED);
        }
        let app = openxr::ApplicationInfo {
            application_name: &info.application_name,
            application_version: info.application_version,
            engine_name: &info.engine_name,
            engine_version: info.engine_version,
        };
        let mut extensions = openxr::ExtensionSet::default();
        extensions.other = info.enabled_extensions.clone();
        let layers: Vec<&str> = info.enabled_api_layers.iter().map(String::as_str).collect();

        let instance = self
            .entry
            .create_instance(&app, &extensions, &layers)
            .map_err(result_from_sys)?;
        let handle = InstanceHandle::from_raw(instance.as_raw().into_raw());
        self.instance = Some(instance);
        Ok(handle)
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> RuntimeResult<()> {
        self.live(instance)?;
        // Dropping the wrapper destroys the runtime instance.
        self.instance = None;
        Ok(())
    }

    fn instance_properties(
        &mut self,
        instance: InstanceHandle,
    ) -> RuntimeResult<InstanceProperties> {
        let properties = self.live(instance)?.properties().map_err(result_from_sys)?;
        Ok(InstanceProperties {
            runtime_name: properties.runtime_name,
            runtime_version: version_from_sys(properties.runtime_version),
        })
    }

    fn get_system(
        &mut self,
        instance: InstanceHandle,
        form_factor: FormFactor,
    ) -> RuntimeResult<SystemId> {
        let system = self
            .live(instance)?
            .system(form_factor_to_sys(form_factor))
            .map_err(result_from_sys)?;
        Ok(SystemId::from_raw(system.into_raw()))
    }

    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        let instance = self.live(instance)?;
        let mut properties = sys::SystemProperties {
            ty: sys::SystemProperties::TYPE,
            ..unsafe { mem::zeroed() }
        };
        check(unsafe {
            (instance.fp().get_system_properties)(
                instance.as_raw(),
                sys::SystemId::from_raw(system.into_raw()),
                &mut properties,
            )
        })?;
        Ok(SystemProperties {
            system_id: system,
            vendor_id: properties.vendor_id,
            system_name: fixed_str(&properties.system_name),
            graphics: SystemGraphicsProperties {
                max_swapchain_image_width: properties.graphics_properties.max_swapchain_image_width,
                max_swapchain_image_height: properties
                    .graphics_properties
                    .max_swapchain_image_height,
                max_layer_count: properties.graphics_properties.max_layer_count,
            },
            tracking: SystemTrackingProperties {
                orientation_tracking: properties.tracking_properties.orientation_tracking.into(),
                position_tracking: properties.tracking_properties.position_tracking.into(),
            },
        })
    }

    fn enumerate_view_configurations(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RuntimeResult<Vec<ViewConfigurationType>> {
        let instance = self.live(instance)?;
        let system = sys::SystemId::from_raw(system.into_raw());
        let types = enumerate(
            sys::ViewConfigurationType::from_raw(0),
            |capacity, count, out| unsafe {
                (instance.fp().enumerate_view_configurations)(
                    instance.as_raw(),
                    system,
                    capacity,
                    count,
                    out,
                )
            },
        )?;
        Ok(types.into_iter().filter_map(view_configuration_from_sys).collect())
    }

    fn enumerate_view_configuration_views(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfigurationView>> {
        let instance = self.live(instance)?;
        let system = sys::SystemId::from_raw(system.into_raw());
        let template = sys::ViewConfigurationView {
            ty: sys::ViewConfigurationView::TYPE,
            ..unsafe { mem::zeroed() }
        };
        let views = enumerate(template, |capacity, count, out| unsafe {
            (instance.fp().enumerate_view_configuration_views)(
                instance.as_raw(),
                system,
                view_configuration_to_sys(view_configuration),
                capacity,
                count,
                out,
            )
        })?;
        Ok(views
            .iter()
            .map(|view| ViewConfigurationView {
                recommended_image_rect_width: view.recommended_image_rect_width,
                max_image_rect_width: view.max_image_rect_width,
                recommended_image_rect_height: view.recommended_image_rect_height,
                max_image_rect_height: view.max_image_rect_height,
                recommended_swapchain_sample_count: view.recommended_swapchain_sample_count,
                max_swapchain_sample_count: view.max_swapchain_sample_count,
            })
            .collect())
    }

    fn enumerate_environment_blend_modes(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<Vec<EnvironmentBlendMode>> {
        let instance = self.live(instance)?;
        let system = sys::SystemId::from_raw(system.into_raw());
        let modes = enumerate(
            sys::EnvironmentBlendMode::from_raw(0),
            |capacity, count, out| unsafe {
                (instance.fp().enumerate_environment_blend_modes)(
                    instance.as_raw(),
                    system,
                    view_configuration_to_sys(view_configuration),
                    capacity,
                    count,
                    out,
                )
            },
        )?;
        Ok(modes.into_iter().filter_map(blend_mode_from_sys).collect())
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<SessionHandle> {
        let instance = self.live(instance)?;
        let next = binding
            .native
            .first()
            .map_or(ptr::null(), |&address| address as usize as *const c_void);
        let info = sys::SessionCreateInfo {
            ty: sys::SessionCreateInfo::TYPE,
            next,
            create_flags: sys::SessionCreateFlags::EMPTY,
            system_id: sys::SystemId::from_raw(system.into_raw()),
        };
        let mut session = sys::Session::NULL;
        check(unsafe { (instance.fp().create_session)(instance.as_raw(), &info, &mut session) })?;
        log::debug!("[xr] openxr session created with {} binding", binding.api);
        Ok(SessionHandle::from_raw(session.into_raw()))
    }

    fn destroy_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        check(unsafe { (self.fp()?.destroy_session)(session_raw(session)) })
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> RuntimeResult<()> {
        let info = sys::SessionBeginInfo {
            ty: sys::SessionBeginInfo::TYPE,
            next: ptr::null(),
            primary_view_configuration_type: view_configuration_to_sys(view_configuration),
        };
        check(unsafe { (self.fp()?.begin_session)(session_raw(session), &info) })
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        check(unsafe { (self.fp()?.end_session)(session_raw(session)) })
    }

    fn request_exit_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        check(unsafe { (self.fp()?.request_exit_session)(session_raw(session)) })
    }

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceType>> {
        let fp = self.fp()?;
        let spaces = enumerate(
            sys::ReferenceSpaceType::from_raw(0),
            |capacity, count, out| unsafe {
                (fp.enumerate_reference_spaces)(session_raw(session), capacity, count, out)
            },
        )?;
        Ok(spaces.into_iter().filter_map(reference_space_from_sys).collect())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        pose_in_space: Pose,
    ) -> RuntimeResult<SpaceHandle> {
        let info = sys::ReferenceSpaceCreateInfo {
            ty: sys::ReferenceSpaceCreateInfo::TYPE,
            next: ptr::null(),
            reference_space_type: reference_space_to_sys(space_type),
            pose_in_reference_space: pose_to_sys(&pose_in_space),
        };
        let mut space = sys::Space::NULL;
        check(unsafe {
            (self.fp()?.create_reference_space)(session_raw(session), &info, &mut space)
        })?;
        Ok(SpaceHandle::from_raw(space.into_raw()))
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> RuntimeResult<()> {
        check(unsafe { (self.fp()?.destroy_space)(space_raw(space)) })
    }

    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: i64,
    ) -> RuntimeResult<SpaceLocation> {
        let mut velocity = sys::SpaceVelocity {
            ty: sys::SpaceVelocity::TYPE,
            ..unsafe { mem::zeroed() }
        };
        let mut location = sys::SpaceLocation {
            ty: sys::SpaceLocation::TYPE,
            next: (&mut velocity as *mut sys::SpaceVelocity).cast(),
            ..unsafe { mem::zeroed() }
        };
        check(unsafe {
            (self.fp()?.locate_space)(
                space_raw(space),
                space_raw(base),
                sys::Time::from_nanos(time),
                &mut location,
            )
        })?;
        let flags = velocity.velocity_flags;
        Ok(SpaceLocation {
            flags: location_flags_from_sys(location.location_flags),
            pose: pose_from_sys(&location.pose),
            velocity: Some(SpaceVelocity {
                linear_valid: flags.contains(sys::SpaceVelocityFlags::LINEAR_VALID),
                angular_valid: flags.contains(sys::SpaceVelocityFlags::ANGULAR_VALID),
                linear: vec3_from_sys(&velocity.linear_velocity),
                angular: vec3_from_sys(&velocity.angular_velocity),
            }),
        })
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        display_time: i64,
        space: SpaceHandle,
    ) -> RuntimeResult<LocatedViews> {
        let fp = self.fp()?;
        let info = sys::ViewLocateInfo {
            ty: sys::ViewLocateInfo::TYPE,
            next: ptr::null(),
            view_configuration_type: view_configuration_to_sys(view_configuration),
            display_time: sys::Time::from_nanos(display_time),
            space: space_raw(space),
        };
        let mut state = sys::ViewState {
            ty: sys::ViewState::TYPE,
            ..unsafe { mem::zeroed() }
        };
        let template = sys::View {
            ty: sys::View::TYPE,
            ..unsafe { mem::zeroed() }
        };
        let views = enumerate(template, |capacity, count, out| unsafe {
            (fp.locate_views)(session_raw(session), &info, &mut state, capacity, count, out)
        })?;
        Ok(LocatedViews {
            flags: LocationFlags(state.view_state_flags.into_raw()),
            views: views
                .iter()
                .map(|view| View {
                    pose: pose_from_sys(&view.pose),
                    fov: fov_from_sys(&view.fov),
                })
                .collect(),
        })
    }

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> RuntimeResult<Vec<i64>> {
        let fp = self.fp()?;
        enumerate(0i64, |capacity, count, out| unsafe {
            (fp.enumerate_swapchain_formats)(session_raw(session), capacity, count, out)
        })
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<SwapchainHandle> {
        let create_info = sys::SwapchainCreateInfo {
            ty: sys::SwapchainCreateInfo::TYPE,
            next: ptr::null(),
            create_flags: sys::SwapchainCreateFlags::EMPTY,
            usage_flags: sys::SwapchainUsageFlags::from_raw(info.usage_flags),
            format: info.format,
            sample_count: info.sample_count,
            width: info.width,
            height: info.height,
            face_count: info.face_count,
            array_size: info.array_size,
            mip_count: info.mip_count,
        };
        let mut swapchain = sys::Swapchain::NULL;
        check(unsafe {
            (self.fp()?.create_swapchain)(session_raw(session), &create_info, &mut swapchain)
        })?;
        Ok(SwapchainHandle::from_raw(swapchain.into_raw()))
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        check(unsafe { (self.fp()?.destroy_swapchain)(swapchain_raw(swapchain)) })
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        let mut count = 0;
        check(unsafe {
            (self.fp()?.enumerate_swapchain_images)(
                swapchain_raw(swapchain),
                0,
                &mut count,
                ptr::null_mut(),
            )
        })?;
        Ok(count)
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        let info = sys::SwapchainImageAcquireInfo {
            ty: sys::SwapchainImageAcquireInfo::TYPE,
            next: ptr::null(),
        };
        let mut index = 0;
        check(unsafe {
            (self.fp()?.acquire_swapchain_image)(swapchain_raw(swapchain), &info, &mut index)
        })?;
        Ok(index)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: Duration,
    ) -> RuntimeResult<()> {
        let info = sys::SwapchainImageWaitInfo {
            ty: sys::SwapchainImageWaitInfo::TYPE,
            next: ptr::null(),
            timeout: sys::Duration::from_nanos(
                i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX),
            ),
        };
        let result =
            unsafe { (self.fp()?.wait_swapchain_image)(swapchain_raw(swapchain), &info) };
        if result == sys::Result::TIMEOUT_EXPIRED {
            return Err(ResultCode::TIMEOUT_EXPIRED);
        }
        check(result)
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        let info = sys::SwapchainImageReleaseInfo {
            ty: sys::SwapchainImageReleaseInfo::TYPE,
            next: ptr::null(),
        };
        check(unsafe { (self.fp()?.release_swapchain_image)(swapchain_raw(swapchain), &info) })
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        self.live(instance)?;
        let Self {
            instance, events, ..
        } = self;
        let instance = instance.as_ref().ok_or(ResultCode::ERROR_HANDLE_INVALID)?;
        loop {
            let Some(event) = instance.poll_event(events).map_err(result_from_sys)? else {
                return Ok(None);
            };
            if let Some(event) = event_from_sys(event) {
                return Ok(Some(event));
            }
        }
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RuntimeResult<FrameState> {
        let info = sys::FrameWaitInfo {
            ty: sys::FrameWaitInfo::TYPE,
            next: ptr::null(),
        };
        let mut state = sys::FrameState {
            ty: sys::FrameState::TYPE,
            ..unsafe { mem::zeroed() }
        };
        check(unsafe { (self.fp()?.wait_frame)(session_raw(session), &info, &mut state) })?;
        Ok(FrameState {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            predicted_display_period: state.predicted_display_period.as_nanos(),
            should_render: state.should_render.into(),
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        let info = sys::FrameBeginInfo {
            ty: sys::FrameBeginInfo::TYPE,
            next: ptr::null(),
        };
        check(unsafe { (self.fp()?.begin_frame)(session_raw(session), &info) })
    }

    fn end_frame(&mut self, session: SessionHandle, info: &FrameEndInfo) -> RuntimeResult<()> {
        let layers = SysFrameLayers::build(&info.layers);
        let headers = layers.headers();
        let end_info = sys::FrameEndInfo {
            ty: sys::FrameEndInfo::TYPE,
            next: ptr::null(),
            display_time: sys::Time::from_nanos(info.display_time),
            environment_blend_mode: blend_mode_to_sys(info.blend_mode),
            layer_count: headers.len() as u32,
            layers: if headers.is_empty() {
                ptr::null()
            } else {
                headers.as_ptr()
            },
        };
        check(unsafe { (self.fp()?.end_frame)(session_raw(session), &end_info) })
    }
}

/// Maps the events the core reacts to; everything else is dropped.
fn event_from_sys(event: openxr::Event<'_>) -> Option<RuntimeEvent> {
    use openxr::Event;
    match event {
        Event::SessionStateChanged(changed) => Some(RuntimeEvent::SessionStateChanged {
            session: SessionHandle::from_raw(changed.session().into_raw()),
            state: session_state_from_sys(changed.state()).unwrap_or(SessionState::Unknown),
            time: changed.time().as_nanos(),
        }),
        Event::InstanceLossPending(pending) => Some(RuntimeEvent::InstanceLossPending {
            loss_time: pending.loss_time().as_nanos(),
        }),
        Event::EventsLost(lost) => Some(RuntimeEvent::EventsLost {
            lost_count: lost.lost_event_count(),
        }),
        Event::ReferenceSpaceChangePending(pending) => {
            let space_type = reference_space_from_sys(pending.reference_space_type())?;
            Some(RuntimeEvent::ReferenceSpaceChangePending {
                session: SessionHandle::from_raw(pending.session().into_raw()),
                space_type,
                change_time: pending.change_time().as_nanos(),
            })
        }
        Event::InteractionProfileChanged(changed) => {
            Some(RuntimeEvent::InteractionProfileChanged {
                session: SessionHandle::from_raw(changed.session().into_raw()),
            })
        }
        _ => {
            log::debug!("[xr] ignoring an openxr event this core does not handle");
            None
        }
    }
}
