use std::cell::RefCell;
use std::rc::Rc;
use theta_xr::vr::extensions::{CompositionLayerProvider, RenderTargetId};
use theta_xr::vr::runtime::{
    CompositionLayer, EyeVisibility, FrameState, LocationFlags, QuadLayer, Rect2D, ResultCode,
    SpaceHandle, SwapchainHandle, SwapchainSubImage,
};
use theta_xr::vr::simulated::{HeadlessGraphics, RuntimeCall, SimulatedRuntime};
use theta_xr::vr::{
    Pose, SessionState, TrackingConfidence, VrError, XrDevice, XrNotification, XrSettings,
};

fn running_device() -> (Rc<RefCell<SimulatedRuntime>>, XrDevice) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sim = Rc::new(RefCell::new(SimulatedRuntime::default()));
    let mut device = XrDevice::new(sim.clone(), XrSettings::default());
    device
        .set_graphics_extension(Box::new(HeadlessGraphics::new()))
        .expect("graphics extension");
    device.initialise(HeadlessGraphics::DRIVER).expect("initialise");
    device.initialise_session().expect("session");
    sim.borrow_mut().push_state(SessionState::Ready);
    device.poll_events().expect("ready");
    device.drain_notifications();
    (sim, device)
}

/// One host frame; returns whether the viewport was drawn.
fn run_frame(device: &mut XrDevice, render_target: u64) -> bool {
    device.process().expect("process");
    device.pre_render().expect("pre_render");
    let drawing = device.pre_draw_viewport().expect("pre_draw");
    if drawing {
        device
            .post_draw_viewport(RenderTargetId(render_target))
            .expect("post_draw");
    }
    device.end_frame().expect("end_frame");
    drawing
}

struct OverlayProvider;

impl CompositionLayerProvider for OverlayProvider {
    fn label(&self) -> &str {
        "overlay"
    }

    fn composition_layers(&mut self, _frame: &FrameState) -> Vec<CompositionLayer> {
        vec![CompositionLayer::Quad(QuadLayer {
            space: SpaceHandle::from_raw(99),
            eye_visibility: EyeVisibility::Both,
            sub_image: SwapchainSubImage {
                swapchain: SwapchainHandle::from_raw(99),
                image_rect: Rect2D::default(),
                image_array_index: 0,
            },
            pose: Pose::default(),
            size: (0.5, 0.25),
        })]
    }
}

#[test]
fn rendered_frame_submits_one_projection_view_per_eye() {
    let (sim, mut device) = running_device();
    assert!(run_frame(&mut device, 7));

    let sim = sim.borrow();
    let frame = sim.submitted_frames().last().expect("submitted frame");
    assert!(frame.display_time > 0);
    assert_eq!(frame.layers.len(), 1);
    let CompositionLayer::Projection(projection) = &frame.layers[0] else {
        panic!("expected a projection layer, got {:?}", frame.layers[0]);
    };
    assert_eq!(projection.views.len(), 2);
    let indices: Vec<u32> = projection
        .views
        .iter()
        .map(|view| view.sub_image.image_array_index)
        .collect();
    assert_eq!(indices, [0, 1]);
    assert_eq!(projection.views[0].sub_image.image_rect.extent.width, 1440);
    assert_eq!(projection.views[0].sub_image.image_rect.extent.height, 1600);
}

#[test]
fn render_target_is_copied_into_the_acquired_image() {
    let (_sim, mut device) = running_device();
    for target in 1..=4 {
        assert!(run_frame(&mut device, target));
    }
    let swapchain = device
        .session()
        .and_then(|session| session.swapchain())
        .expect("swapchain");
    assert!(!swapchain.is_image_acquired());
    // Three images cycle, so the fourth frame reuses the first.
    assert_eq!(swapchain.image_index(), 0);
}

#[test]
fn second_acquire_in_one_frame_is_rejected() {
    let (_sim, mut device) = running_device();
    device.process().unwrap();
    device.pre_render().unwrap();
    assert!(device.pre_draw_viewport().unwrap());
    assert!(matches!(
        device.pre_draw_viewport(),
        Err(VrError::ImageAlreadyAcquired)
    ));
    device.end_frame().unwrap();
    assert!(
        !device
            .session()
            .and_then(|session| session.swapchain())
            .is_some_and(|swapchain| swapchain.is_image_acquired())
    );
}

#[test]
fn providers_add_layers_after_the_projection() {
    let (sim, mut device) = running_device();
    device.register_composition_layer_provider(Box::new(OverlayProvider));
    run_frame(&mut device, 1);

    let sim = sim.borrow();
    let layers = &sim.submitted_frames().last().expect("frame").layers;
    assert_eq!(layers.len(), 2);
    assert!(matches!(layers[0], CompositionLayer::Projection(_)));
    assert!(matches!(layers[1], CompositionLayer::Quad(quad) if quad.size == (0.5, 0.25)));
}

#[test]
fn frames_without_render_permission_submit_no_layers() {
    let (sim, mut device) = running_device();
    device.register_composition_layer_provider(Box::new(OverlayProvider));
    sim.borrow_mut().should_render = false;

    assert!(!run_frame(&mut device, 1));
    assert!(!device.can_render());
    let sim = sim.borrow();
    let frame = sim.submitted_frames().last().expect("frame still ends");
    assert!(frame.layers.is_empty());
}

#[test]
fn untracked_views_block_drawing() {
    let (sim, mut device) = running_device();
    sim.borrow_mut().view_flags = LocationFlags::ORIENTATION_VALID;

    assert!(!run_frame(&mut device, 1));
    let readiness = device.render_readiness();
    assert!(readiness.running);
    assert!(readiness.should_render);
    assert!(!readiness.view_pose_valid);
    assert!(matches!(
        device.get_view_transform(0),
        Err(VrError::ViewPoseInvalid)
    ));
    assert!(sim.borrow().submitted_frames().last().expect("frame").layers.is_empty());
}

#[test]
fn rendering_is_gated_across_the_whole_lifecycle() {
    let _ = env_logger::builder().is_test(true).try_init();
    let sim = Rc::new(RefCell::new(SimulatedRuntime::default()));
    let mut device = XrDevice::new(sim.clone(), XrSettings::default());
    device
        .set_graphics_extension(Box::new(HeadlessGraphics::new()))
        .unwrap();
    assert!(!device.can_render());
    assert!(!device.pre_draw_viewport().unwrap());

    device.initialise(HeadlessGraphics::DRIVER).unwrap();
    assert!(!device.can_render());
    device.initialise_session().unwrap();
    device.process().unwrap();
    assert_eq!(device.session_state(), SessionState::Idle);
    assert!(!device.can_render());

    sim.borrow_mut().push_state(SessionState::Ready);
    device.process().unwrap();
    // Waited but not yet located.
    assert!(!device.can_render());
    device.pre_render().unwrap();
    assert!(device.can_render());
    device.end_frame().unwrap();

    device.destroy_session().unwrap();
    assert!(!device.can_render());
    assert!(!device.pre_draw_viewport().unwrap());
}

#[test]
fn head_center_and_eye_transforms_follow_the_tracked_pose() {
    let (sim, mut device) = running_device();
    device.process().unwrap();
    device.pre_render().unwrap();

    let head = device.get_head_center().expect("head pose");
    assert_eq!(head.confidence, TrackingConfidence::High);
    assert!((head.transform.origin.y - 1.6).abs() < 1e-6);

    let half = sim.borrow().eye_separation / 2.0;
    let left = device.get_view_transform(0).expect("left eye");
    let right = device.get_view_transform(1).expect("right eye");
    assert!((left.origin.x + half).abs() < 1e-6);
    assert!((right.origin.x - half).abs() < 1e-6);
    assert!(matches!(
        device.get_view_transform(2),
        Err(VrError::ViewOutOfRange { index: 2, count: 2 })
    ));

    let projection = device.get_view_projection(0, 0.05, 100.0).expect("projection");
    assert_eq!(projection[2][3], -1.0);
    assert!(matches!(
        device.get_view_projection(0, 0.0, 100.0),
        Err(VrError::InvalidClipPlanes { .. })
    ));
    device.end_frame().unwrap();
}

#[test]
fn position_only_tracking_reports_low_confidence() {
    let (sim, mut device) = running_device();
    sim.borrow_mut().head_location.flags =
        LocationFlags::ORIENTATION_VALID | LocationFlags::POSITION_VALID;
    device.process().unwrap();
    let head = device.get_head_center().unwrap();
    assert_eq!(head.confidence, TrackingConfidence::Low);

    sim.borrow_mut().head_location.flags = LocationFlags::default();
    let head = device.get_head_center().unwrap();
    assert_eq!(head.confidence, TrackingConfidence::None);
    assert_eq!(head.transform.origin.y, 0.0);
}

#[test]
fn next_frame_time_advances_by_one_period() {
    let (sim, mut device) = running_device();
    device.process().unwrap();
    let period = sim.borrow().display_period;
    let first = device.get_next_frame_time().expect("running");
    device.pre_render().unwrap();
    device.end_frame().unwrap();
    device.process().unwrap();
    assert_eq!(device.get_next_frame_time(), Some(first + period));
}

#[test]
fn lost_session_during_wait_tears_down_once() {
    let (sim, mut device) = running_device();
    sim.borrow_mut()
        .fail_call(RuntimeCall::WaitFrame, ResultCode::ERROR_SESSION_LOST);

    let err = device.process().expect_err("wait fails");
    assert_eq!(err.result_code(), Some(ResultCode::ERROR_SESSION_LOST));
    assert_eq!(device.session_state(), SessionState::LossPending);
    assert!(device.session().is_none());
    assert_eq!(
        device.drain_notifications(),
        [XrNotification::XrUnavailable(
            theta_xr::vr::device::UnavailableReason::SessionLost
        )]
    );

    // Later frames are no-ops until a new session exists.
    device.process().unwrap();
    device.pre_render().unwrap();
    device.end_frame().unwrap();
    assert!(device.drain_notifications().is_empty());
    assert_eq!(
        sim.borrow().destroy_log(),
        ["swapchain", "space", "space", "session"]
    );
}

#[test]
fn stopping_ends_the_session_and_ready_restarts_it() {
    let (sim, mut device) = running_device();
    run_frame(&mut device, 1);

    for state in [SessionState::Synchronized, SessionState::Stopping] {
        sim.borrow_mut().push_state(state);
    }
    device.process().unwrap();
    assert!(!device.is_running());
    assert!(!sim.borrow().session_running());
    assert_eq!(
        device.drain_notifications(),
        [XrNotification::SessionStopping]
    );
    assert!(device.get_next_frame_time().is_none());

    for state in [SessionState::Idle, SessionState::Ready] {
        sim.borrow_mut().push_state(state);
    }
    device.process().unwrap();
    assert!(device.is_running());
    assert_eq!(sim.borrow().swapchain_count(), 1);
    assert!(run_frame(&mut device, 2));
}

#[test]
fn request_exit_reaches_the_runtime() {
    let (sim, mut device) = running_device();
    device.request_exit().expect("exit");
    assert!(sim.borrow().exit_requested());

    device.destroy_session().unwrap();
    assert!(matches!(device.request_exit(), Err(VrError::NoSession(_))));
}

#[test]
fn stopping_alone_blocks_rendering() {
    let (sim, mut device) = running_device();
    assert!(run_frame(&mut device, 1));
    device.process().unwrap();
    device.pre_render().unwrap();
    assert!(device.can_render());
    device.end_frame().unwrap();

    for state in [SessionState::Synchronized, SessionState::Stopping] {
        sim.borrow_mut().push_state(state);
    }
    device.poll_events().unwrap();

    let readiness = device.render_readiness();
    assert!(readiness.connected);
    assert!(readiness.has_session);
    assert!(!readiness.running);
    assert!(!readiness.allows_rendering());
    assert!(!device.can_render());
    assert!(!device.pre_draw_viewport().unwrap());
}

#[test]
fn frames_without_a_drawn_image_submit_no_projection() {
    let (sim, mut device) = running_device();
    device.register_composition_layer_provider(Box::new(OverlayProvider));
    device.process().unwrap();
    device.pre_render().unwrap();
    assert!(device.can_render());
    device.end_frame().unwrap();
    assert!(sim.borrow().submitted_frames().last().expect("frame").layers.is_empty());

    sim.borrow_mut()
        .fail_call(RuntimeCall::WaitSwapchainImage, ResultCode::TIMEOUT_EXPIRED);
    device.process().unwrap();
    device.pre_render().unwrap();
    let err = device.pre_draw_viewport().expect_err("image never ready");
    assert_eq!(err.result_code(), Some(ResultCode::TIMEOUT_EXPIRED));
    device.end_frame().unwrap();
    assert!(sim.borrow().submitted_frames().last().expect("frame").layers.is_empty());
    assert!(device.session().is_some());

    sim.borrow_mut().clear_failure(RuntimeCall::WaitSwapchainImage);
    assert!(run_frame(&mut device, 3));
    let sim = sim.borrow();
    let layers = &sim.submitted_frames().last().expect("frame").layers;
    assert_eq!(layers.len(), 2);
}

#[test]
fn session_lost_while_acquiring_tears_down_the_session() {
    let (sim, mut device) = running_device();
    sim.borrow_mut().fail_call(
        RuntimeCall::AcquireSwapchainImage,
        ResultCode::ERROR_SESSION_LOST,
    );
    device.process().unwrap();
    device.pre_render().unwrap();

    let err = device.pre_draw_viewport().expect_err("acquire fails");
    assert_eq!(err.result_code(), Some(ResultCode::ERROR_SESSION_LOST));
    assert_eq!(device.session_state(), SessionState::LossPending);
    assert!(device.session().is_none());
    assert!(device.is_initialized());
    assert_eq!(
        device.drain_notifications(),
        [XrNotification::XrUnavailable(
            theta_xr::vr::device::UnavailableReason::SessionLost
        )]
    );
    device.end_frame().unwrap();
    assert_eq!(
        sim.borrow().destroy_log(),
        ["swapchain", "space", "space", "session"]
    );
}

#[test]
fn instance_lost_while_locating_the_head_releases_everything() {
    let (sim, mut device) = running_device();
    device.process().unwrap();
    sim.borrow_mut()
        .fail_call(RuntimeCall::LocateSpace, ResultCode::ERROR_INSTANCE_LOST);

    let err = device.get_head_center().expect_err("locate fails");
    assert_eq!(err.result_code(), Some(ResultCode::ERROR_INSTANCE_LOST));
    assert!(!device.is_initialized());
    assert!(device.session().is_none());
    assert_eq!(
        device.drain_notifications(),
        [XrNotification::XrUnavailable(
            theta_xr::vr::device::UnavailableReason::InstanceLost
        )]
    );
    assert!(!sim.borrow().instance_alive());
}
