//! Per-frame timing, pose location, and projection math.

use crate::vr::runtime::{
    FrameState, HandJointLocation, LocationFlags, ProjectionView, Rect2D, RuntimeResultExt, SessionHandle,
    SpaceHandle, SpaceLocation, SpaceVelocity, SwapchainHandle, SwapchainSubImage, View,
    XrRuntime,
};
use crate::vr::{
    Extent2D, Fov, Pose, TrackingConfidence, Vec3, ViewConfigurationType, VrError, VrResult,
};

/// Column-major 4x4 matrix, `m[column][row]`.
pub type Matrix4 = [[f32; 4]; 4];

pub fn identity_matrix() -> Matrix4 {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Rotation basis (row-major) plus translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub basis: [[f32; 3]; 3],
    pub origin: Vec3,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self {
            basis: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            origin: Vec3::ZERO,
        }
    }
}

impl Transform3D {
    pub fn to_matrix(&self) -> Matrix4 {
        let b = &self.basis;
        [
            [b[0][0], b[1][0], b[2][0], 0.0],
            [b[0][1], b[1][1], b[2][1], 0.0],
            [b[0][2], b[1][2], b[2][2], 0.0],
            [self.origin.x, self.origin.y, self.origin.z, 1.0],
        ]
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        let b = &self.basis;
        Vec3::new(
            b[0][0] * point.x + b[0][1] * point.y + b[0][2] * point.z + self.origin.x,
            b[1][0] * point.x + b[1][1] * point.y + b[1][2] * point.z + self.origin.y,
            b[2][0] * point.x + b[2][1] * point.y + b[2][2] * point.z + self.origin.z,
        )
    }
}

pub fn transform_from_pose(pose: &Pose) -> Transform3D {
    let q = pose.orientation.normalized();
    let (xx, yy, zz) = (q.x * q.x, q.y * q.y, q.z * q.z);
    let (xy, xz, yz) = (q.x * q.y, q.x * q.z, q.y * q.z);
    let (wx, wy, wz) = (q.w * q.x, q.w * q.y, q.w * q.z);

    Transform3D {
        basis: [
            [1.0 - 2.0 * (yy + zz), 2.0 * (xy - wz), 2.0 * (xz + wy)],
            [2.0 * (xy + wz), 1.0 - 2.0 * (xx + zz), 2.0 * (yz - wx)],
            [2.0 * (xz - wy), 2.0 * (yz + wx), 1.0 - 2.0 * (xx + yy)],
        ],
        origin: pose.position,
    }
}

/// HIGH needs both halves valid and tracked; valid but untracked is LOW.
pub fn confidence_from_flags(flags: LocationFlags) -> TrackingConfidence {
    let valid = LocationFlags::ORIENTATION_VALID | LocationFlags::POSITION_VALID;
    let tracked = LocationFlags::ORIENTATION_TRACKED | LocationFlags::POSITION_TRACKED;
    if !flags.contains(valid) {
        TrackingConfidence::None
    } else if flags.contains(tracked) {
        TrackingConfidence::High
    } else {
        TrackingConfidence::Low
    }
}

/// The transform is the identity whenever the confidence is `None`.
pub fn transform_from_location(location: &SpaceLocation) -> (TrackingConfidence, Transform3D) {
    let confidence = confidence_from_flags(location.flags);
    let transform = if confidence.is_usable() {
        transform_from_pose(&location.pose)
    } else {
        Transform3D::default()
    };
    (confidence, transform)
}

/// Hand-joint variant of [`transform_from_location`]; the radius is zero when
/// the joint cannot be used.
pub fn transform_from_joint_location(
    joint: &HandJointLocation,
) -> (TrackingConfidence, Transform3D, f32) {
    let confidence = confidence_from_flags(joint.flags);
    if !confidence.is_usable() {
        return (confidence, Transform3D::default(), 0.0);
    }
    (confidence, transform_from_pose(&joint.pose), joint.radius)
}

/// Returns `(linear, angular)`; components the runtime did not report are zero.
pub fn parse_velocities(velocity: Option<&SpaceVelocity>) -> (Vec3, Vec3) {
    match velocity {
        Some(velocity) => (
            if velocity.linear_valid {
                velocity.linear
            } else {
                Vec3::ZERO
            },
            if velocity.angular_valid {
                velocity.angular
            } else {
                Vec3::ZERO
            },
        ),
        None => (Vec3::ZERO, Vec3::ZERO),
    }
}

/// Off-axis projection built straight from the runtime's per-eye angles.
///
/// Uses a `-1..1` clip depth range. A far plane at or before the near plane
/// (or an infinite one) yields an infinite far projection.
pub fn projection_from_fov(fov: &Fov, z_near: f64, z_far: f64) -> VrResult<Matrix4> {
    if !(z_near > 0.0 && z_near.is_finite()) || z_far.is_nan() {
        return Err(VrError::InvalidClipPlanes {
            near: z_near,
            far: z_far,
        });
    }

    let tan_left = f64::from(fov.angle_left).tan();
    let tan_right = f64::from(fov.angle_right).tan();
    let tan_up = f64::from(fov.angle_up).tan();
    let tan_down = f64::from(fov.angle_down).tan();
    let width = tan_right - tan_left;
    let height = tan_up - tan_down;
    if !(width > 0.0 && height > 0.0) {
        return Err(VrError::DegenerateFov(*fov));
    }

    let (depth_scale, depth_offset) = if z_far <= z_near || z_far.is_infinite() {
        (-1.0, -2.0 * z_near)
    } else {
        (
            -(z_far + z_near) / (z_far - z_near),
            -(2.0 * z_far * z_near) / (z_far - z_near),
        )
    };

    Ok([
        [(2.0 / width) as f32, 0.0, 0.0, 0.0],
        [0.0, (2.0 / height) as f32, 0.0, 0.0],
        [
            ((tan_right + tan_left) / width) as f32,
            ((tan_up + tan_down) / height) as f32,
            depth_scale as f32,
            -1.0,
        ],
        [0.0, 0.0, depth_offset as f32, 0.0],
    ])
}

pub fn next_frame_time(frame_state: &FrameState) -> i64 {
    frame_state.predicted_display_time + frame_state.predicted_display_period
}

/// Head pose relative to the play space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadPose {
    pub transform: Transform3D,
    pub confidence: TrackingConfidence,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

/// Per-eye views; the length is fixed when the session is set up.
#[derive(Debug, Clone)]
pub struct ViewSet {
    views: Vec<View>,
    target: Option<(SwapchainHandle, Extent2D)>,
}

impl ViewSet {
    pub fn new(view_count: usize) -> Self {
        Self {
            views: vec![View::default(); view_count],
            target: None,
        }
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn view(&self, index: usize) -> VrResult<&View> {
        self.views.get(index).ok_or(VrError::ViewOutOfRange {
            index,
            count: self.views.len(),
        })
    }

    pub fn update(&mut self, located: &[View]) -> VrResult<()> {
        if located.len() != self.views.len() {
            return Err(VrError::ViewCountMismatch {
                expected: self.views.len(),
                got: located.len(),
            });
        }
        self.views.copy_from_slice(located);
        Ok(())
    }

    pub fn bind_swapchain(&mut self, swapchain: SwapchainHandle, extent: Extent2D) {
        self.target = Some((swapchain, extent));
    }

    pub fn unbind_swapchain(&mut self) {
        self.target = None;
    }

    /// One projection view per eye, each addressing its own array layer.
    pub fn projection_views(&self) -> Vec<ProjectionView> {
        let Some((swapchain, extent)) = self.target else {
            return Vec::new();
        };
        self.views
            .iter()
            .enumerate()
            .map(|(index, view)| ProjectionView {
                pose: view.pose,
                fov: view.fov,
                sub_image: SwapchainSubImage {
                    swapchain,
                    image_rect: Rect2D {
                        offset: (0, 0),
                        extent,
                    },
                    image_array_index: index as u32,
                },
            })
            .collect()
    }
}

/// Handles the frame pipeline needs from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTargets {
    pub session: SessionHandle,
    pub view_configuration: ViewConfigurationType,
    pub play_space: SpaceHandle,
    pub view_space: SpaceHandle,
}

#[derive(Debug, Clone)]
pub struct FramePipeline {
    frame_state: FrameState,
    views: ViewSet,
    view_pose_valid: bool,
    head_pose_confidence: TrackingConfidence,
    /// Set by a successful wait, consumed by the matching begin.
    frame_ready: bool,
    frame_begun: bool,
}

impl FramePipeline {
    pub fn new(view_count: usize) -> Self {
        Self {
            frame_state: FrameState::default(),
            views: ViewSet::new(view_count),
            view_pose_valid: false,
            head_pose_confidence: TrackingConfidence::None,
            frame_ready: false,
            frame_begun: false,
        }
    }

    pub fn frame_state(&self) -> &FrameState {
        &self.frame_state
    }

    pub fn views(&self) -> &ViewSet {
        &self.views
    }

    pub fn views_mut(&mut self) -> &mut ViewSet {
        &mut self.views
    }

    pub fn view_pose_valid(&self) -> bool {
        self.view_pose_valid
    }

    pub fn head_pose_confidence(&self) -> TrackingConfidence {
        self.head_pose_confidence
    }

    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn frame_begun(&self) -> bool {
        self.frame_begun
    }

    pub fn next_frame_time(&self) -> i64 {
        next_frame_time(&self.frame_state)
    }

    /// Blocks until the runtime hands out the next frame's timing.
    pub fn wait_frame(
        &mut self,
        runtime: &mut dyn XrRuntime,
        session: SessionHandle,
    ) -> VrResult<FrameState> {
        match runtime.wait_frame(session) {
            Ok(frame_state) => {
                self.frame_state = frame_state;
                self.frame_ready = true;
                log::debug!(
                    "[xr] frame at {} (+{}) render={}",
                    frame_state.predicted_display_time,
                    frame_state.predicted_display_period,
                    frame_state.should_render
                );
                Ok(frame_state)
            }
            Err(code) => {
                self.frame_state = FrameState::default();
                self.frame_ready = false;
                Err(VrError::runtime("xrWaitFrame", code))
            }
        }
    }

    pub fn begin_frame(
        &mut self,
        runtime: &mut dyn XrRuntime,
        session: SessionHandle,
    ) -> VrResult<()> {
        self.frame_ready = false;
        runtime.begin_frame(session).call("xrBeginFrame")?;
        self.frame_begun = true;
        Ok(())
    }

    pub fn mark_frame_ended(&mut self) {
        self.frame_begun = false;
    }

    /// Locates every eye at the predicted display time.
    pub fn locate_views(
        &mut self,
        runtime: &mut dyn XrRuntime,
        targets: &FrameTargets,
    ) -> VrResult<()> {
        let located = match runtime.locate_views(
            targets.session,
            targets.view_configuration,
            self.frame_state.predicted_display_time,
            targets.play_space,
        ) {
            Ok(located) => located,
            Err(code) => {
                self.view_pose_valid = false;
                return Err(VrError::runtime("xrLocateViews", code));
            }
        };

        let valid = located
            .flags
            .contains(LocationFlags::ORIENTATION_VALID | LocationFlags::POSITION_VALID);
        if let Err(err) = self.views.update(&located.views) {
            self.view_pose_valid = false;
            return Err(err);
        }
        self.view_pose_valid = valid;
        Ok(())
    }

    pub fn head_center(
        &mut self,
        runtime: &mut dyn XrRuntime,
        targets: &FrameTargets,
    ) -> VrResult<HeadPose> {
        let location = runtime
            .locate_space(
                targets.view_space,
                targets.play_space,
                self.frame_state.predicted_display_time,
            )
            .call("xrLocateSpace")?;

        let (confidence, transform) = transform_from_location(&location);
        let (linear_velocity, angular_velocity) = parse_velocities(location.velocity.as_ref());
        self.head_pose_confidence = confidence;
        Ok(HeadPose {
            transform,
            confidence,
            linear_velocity,
            angular_velocity,
        })
    }

    pub fn view_transform(&self, index: usize) -> VrResult<Transform3D> {
        let view = self.views.view(index)?;
        if !self.view_pose_valid {
            return Err(VrError::ViewPoseInvalid);
        }
        Ok(transform_from_pose(&view.pose))
    }

    pub fn view_projection(&self, index: usize, z_near: f64, z_far: f64) -> VrResult<Matrix4> {
        let view = self.views.view(index)?;
        if !self.view_pose_valid {
            return Err(VrError::ViewPoseInvalid);
        }
        projection_from_fov(&view.fov, z_near, z_far)
    }

    /// Forgets per-frame results once the session stops running.
    pub fn reset(&mut self) {
        self.frame_state = FrameState::default();
        self.view_pose_valid = false;
        self.head_pose_confidence = TrackingConfidence::None;
        self.frame_ready = false;
        self.frame_begun = false;
    }
}
