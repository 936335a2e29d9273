use std::cell::RefCell;
use std::rc::Rc;
use theta_xr::vr::device::UnavailableReason;
use theta_xr::vr::runtime::RuntimeEvent;
use theta_xr::vr::simulated::{HeadlessGraphics, SimulatedRuntime};
use theta_xr::vr::{SessionState, XrDevice, XrNotification, XrSettings};

fn device_with_session() -> (Rc<RefCell<SimulatedRuntime>>, XrDevice) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sim = Rc::new(RefCell::new(SimulatedRuntime::default()));
    let mut device = XrDevice::new(sim.clone(), XrSettings::default());
    device
        .set_graphics_extension(Box::new(HeadlessGraphics::new()))
        .expect("graphics extension");
    device.initialise(HeadlessGraphics::DRIVER).expect("initialise");
    device.initialise_session().expect("session");
    (sim, device)
}

fn push_states(sim: &Rc<RefCell<SimulatedRuntime>>, states: &[SessionState]) {
    let mut sim = sim.borrow_mut();
    for state in states {
        sim.push_state(*state);
    }
}

#[test]
fn focus_changes_are_reported_both_ways() {
    let (sim, mut device) = device_with_session();
    push_states(
        &sim,
        &[
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
            SessionState::Visible,
        ],
    );
    device.poll_events().unwrap();

    assert_eq!(device.session_state(), SessionState::Visible);
    assert_eq!(
        device.drain_notifications(),
        [
            XrNotification::SessionBegun,
            XrNotification::FocusGained,
            XrNotification::FocusLost,
        ]
    );
}

#[test]
fn exiting_tears_down_the_session_but_keeps_the_instance() {
    let (sim, mut device) = device_with_session();
    push_states(
        &sim,
        &[
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Stopping,
            SessionState::Exiting,
        ],
    );
    device.process().unwrap();

    assert_eq!(
        device.drain_notifications(),
        [
            XrNotification::SessionBegun,
            XrNotification::SessionStopping,
            XrNotification::XrUnavailable(UnavailableReason::SessionExited),
        ]
    );
    assert_eq!(device.session_state(), SessionState::Exiting);
    assert!(device.session().is_none());
    assert!(device.is_initialized());
    assert!(device.catalog().reference_spaces().is_empty());
    {
        let sim = sim.borrow();
        assert_eq!(sim.destroy_log(), ["swapchain", "space", "space", "session"]);
        assert!(sim.instance_alive());
    }

    device.initialise_session().expect("new session after exit");
    device.process().unwrap();
    assert_eq!(device.session_state(), SessionState::Idle);
}

#[test]
fn terminal_teardown_runs_once() {
    let (sim, mut device) = device_with_session();
    push_states(
        &sim,
        &[
            SessionState::Ready,
            SessionState::LossPending,
            SessionState::Exiting,
        ],
    );
    device.process().unwrap();

    let unavailable: Vec<XrNotification> = device
        .drain_notifications()
        .into_iter()
        .filter(|notification| matches!(notification, XrNotification::XrUnavailable(_)))
        .collect();
    assert_eq!(
        unavailable,
        [XrNotification::XrUnavailable(UnavailableReason::SessionLost)]
    );
    assert_eq!(device.session_state(), SessionState::LossPending);

    device.destroy_session().unwrap();
    device.finish().unwrap();
    let sim = sim.borrow();
    let sessions = sim
        .destroy_log()
        .iter()
        .filter(|kind| **kind == "session")
        .count();
    assert_eq!(sessions, 1);
    assert!(!sim.session_running());
}

#[test]
fn instance_loss_releases_everything() {
    let (sim, mut device) = device_with_session();
    push_states(&sim, &[SessionState::Ready]);
    device.process().unwrap();
    device.drain_notifications();

    sim.borrow_mut()
        .push_event(RuntimeEvent::InstanceLossPending { loss_time: 5 });
    device.poll_events().unwrap();

    assert_eq!(
        device.drain_notifications(),
        [XrNotification::XrUnavailable(UnavailableReason::InstanceLost)]
    );
    assert!(!device.is_initialized());
    assert!(!device.can_render());
    {
        let sim = sim.borrow();
        assert!(!sim.instance_alive());
        assert_eq!(
            sim.destroy_log(),
            ["swapchain", "space", "space", "session", "instance"]
        );
    }

    device.finish().expect("finish after loss");
    device.initialise(HeadlessGraphics::DRIVER).expect("reconnect");
    assert!(sim.borrow().instance_alive());
}

#[test]
fn instance_loss_after_session_loss_is_still_reported() {
    let (sim, mut device) = device_with_session();
    push_states(&sim, &[SessionState::Ready, SessionState::LossPending]);
    sim.borrow_mut()
        .push_event(RuntimeEvent::InstanceLossPending { loss_time: 9 });
    device.poll_events().unwrap();

    assert_eq!(
        device.drain_notifications(),
        [
            XrNotification::SessionBegun,
            XrNotification::XrUnavailable(UnavailableReason::SessionLost),
            XrNotification::XrUnavailable(UnavailableReason::InstanceLost),
        ]
    );
    assert!(!device.is_initialized());
    assert!(device.session().is_none());
    {
        let sim = sim.borrow();
        assert!(!sim.instance_alive());
        assert_eq!(
            sim.destroy_log(),
            ["swapchain", "space", "space", "session", "instance"]
        );
    }

    device.poll_events().unwrap();
    assert!(device.drain_notifications().is_empty());

    device.initialise(HeadlessGraphics::DRIVER).expect("reconnect");
    device.initialise_session().expect("session after reconnect");
}

#[test]
fn state_reports_for_other_sessions_are_ignored() {
    let (sim, mut device) = device_with_session();
    device.poll_events().unwrap();
    let stale = theta_xr::vr::runtime::SessionHandle::from_raw(4242);
    sim.borrow_mut().push_event(RuntimeEvent::SessionStateChanged {
        session: stale,
        state: SessionState::Exiting,
        time: 0,
    });
    device.poll_events().unwrap();

    assert_eq!(device.session_state(), SessionState::Idle);
    assert!(device.session().is_some());
    assert!(device.drain_notifications().is_empty());
}

#[test]
fn informational_events_leave_the_state_alone() {
    let (sim, mut device) = device_with_session();
    push_states(&sim, &[SessionState::Ready]);
    device.poll_events().unwrap();
    let session = device.session().expect("session").handle();
    {
        let mut sim = sim.borrow_mut();
        sim.push_event(RuntimeEvent::EventsLost { lost_count: 3 });
        sim.push_event(RuntimeEvent::ReferenceSpaceChangePending {
            session,
            space_type: theta_xr::vr::ReferenceSpaceType::Stage,
            change_time: 10,
        });
        sim.push_event(RuntimeEvent::InteractionProfileChanged { session });
    }
    device.poll_events().unwrap();

    assert_eq!(sim.borrow().pending_events(), 0);
    assert_eq!(device.session_state(), SessionState::Ready);
    assert!(device.is_running());
}
