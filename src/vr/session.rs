//! Session handle, play/view spaces, and their teardown.

use crate::vr::catalog::CapabilityCatalog;
use crate::vr::extensions::GraphicsExtension;
use crate::vr::frame::{FramePipeline, FrameTargets};
use crate::vr::instance::RuntimeConnection;
use crate::vr::runtime::{
    GraphicsBinding, RuntimeResultExt, Scoped, SessionHandle, SharedRuntime, SpaceHandle,
};
use crate::vr::settings::XrSettings;
use crate::vr::swapchain::Swapchain;
use crate::vr::{
    EnvironmentBlendMode, Pose, ReferenceSpaceType, ViewConfigurationType, VrError, VrResult,
};

/// First preference the runtime supports. No fallback outside `preferences`.
pub fn select_reference_space(
    preferences: &[ReferenceSpaceType],
    catalog: &CapabilityCatalog,
) -> Option<ReferenceSpaceType> {
    preferences
        .iter()
        .copied()
        .find(|space| catalog.is_reference_space_supported(*space))
}

#[derive(Debug)]
pub struct Spaces {
    play_space: Scoped<SpaceHandle>,
    view_space: Scoped<SpaceHandle>,
    play_space_type: ReferenceSpaceType,
}

impl Spaces {
    pub fn play_space(&self) -> SpaceHandle {
        self.play_space.raw()
    }

    pub fn view_space(&self) -> SpaceHandle {
        self.view_space.raw()
    }

    pub fn play_space_type(&self) -> ReferenceSpaceType {
        self.play_space_type
    }

    fn destroy(self) {
        // Head-locked space first, it was created last.
        if let Err(code) = self.view_space.destroy() {
            log::error!("[xr-session] failed to destroy view space: {code}");
        }
        if let Err(code) = self.play_space.destroy() {
            log::error!("[xr-session] failed to destroy play space: {code}");
        }
    }
}

// Field order is drop order: swapchain, spaces, then the session handle.
#[derive(Debug)]
pub struct Session {
    swapchain: Option<Swapchain>,
    spaces: Option<Spaces>,
    handle: Scoped<SessionHandle>,
    view_configuration: ViewConfigurationType,
    blend_mode: EnvironmentBlendMode,
    running: bool,
    frame: FramePipeline,
}

impl Session {
    pub fn create(
        connection: &RuntimeConnection,
        catalog: &CapabilityCatalog,
        binding: &GraphicsBinding,
        settings: &XrSettings,
    ) -> VrResult<Self> {
        let system = connection
            .system_id()
            .ok_or(VrError::NotInitialized("create_session"))?;
        let view_configuration = settings.view_configuration;
        if !catalog.is_view_configuration_supported(view_configuration) {
            return Err(VrError::ViewConfigurationUnsupported(view_configuration));
        }
        let blend_mode = settings.environment_blend_mode;
        if !catalog.is_environment_blend_mode_supported(blend_mode) {
            return Err(VrError::BlendModeUnsupported(blend_mode));
        }
        let view_count = catalog.view_configuration_views().len();
        if view_count == 0 {
            return Err(VrError::ViewConfigurationUnsupported(view_configuration));
        }

        let runtime = connection.shared_runtime();
        let raw = {
            let mut runtime = runtime.borrow_mut();
            runtime.create_session(connection.instance(), system, binding)
        }
        .call("xrCreateSession")?;

        log::info!(
            "[xr-session] session created for {} ({view_count} views, {})",
            binding.api,
            blend_mode
        );

        Ok(Self {
            swapchain: None,
            spaces: None,
            handle: Scoped::new(raw, runtime.clone()),
            view_configuration,
            blend_mode,
            running: false,
            frame: FramePipeline::new(view_count),
        })
    }

    /// Creates the play space from `preferences` plus a head-locked view space.
    pub fn setup_spaces(
        &mut self,
        catalog: &CapabilityCatalog,
        preferences: &[ReferenceSpaceType],
    ) -> VrResult<ReferenceSpaceType> {
        let play_space_type = select_reference_space(preferences, catalog)
            .ok_or_else(|| VrError::NoSupportedReferenceSpace(preferences.to_vec()))?;
        if let Some(old) = self.spaces.take() {
            old.destroy();
        }

        let session = self.handle.raw();
        let runtime = self.handle.shared_runtime();
        let play = {
            let mut runtime = runtime.borrow_mut();
            runtime.create_reference_space(session, play_space_type, Pose::default())
        }
        .call("xrCreateReferenceSpace")?;
        let play_space = Scoped::new(play, runtime.clone());

        let view = {
            let mut runtime = runtime.borrow_mut();
            runtime.create_reference_space(session, ReferenceSpaceType::View, Pose::default())
        }
        .call("xrCreateReferenceSpace")?;
        let view_space = Scoped::new(view, runtime.clone());

        log::info!("[xr-session] play space is {play_space_type}");
        self.spaces = Some(Spaces {
            play_space,
            view_space,
            play_space_type,
        });
        Ok(play_space_type)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.raw()
    }

    pub fn shared_runtime(&self) -> &SharedRuntime {
        self.handle.shared_runtime()
    }

    pub fn view_configuration(&self) -> ViewConfigurationType {
        self.view_configuration
    }

    pub fn blend_mode(&self) -> EnvironmentBlendMode {
        self.blend_mode
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn spaces(&self) -> Option<&Spaces> {
        self.spaces.as_ref()
    }

    pub fn view_count(&self) -> usize {
        self.frame.views().view_count()
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn swapchain_mut(&mut self) -> Option<&mut Swapchain> {
        self.swapchain.as_mut()
    }

    pub fn install_swapchain(&mut self, swapchain: Swapchain) {
        self.frame
            .views_mut()
            .bind_swapchain(swapchain.handle(), swapchain.extent());
        self.swapchain = Some(swapchain);
    }

    pub fn frame(&self) -> &FramePipeline {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FramePipeline {
        &mut self.frame
    }

    pub fn frame_targets(&self) -> VrResult<FrameTargets> {
        let spaces = self.spaces.as_ref().ok_or(VrError::NoSession("frame_targets"))?;
        Ok(FrameTargets {
            session: self.handle.raw(),
            view_configuration: self.view_configuration,
            play_space: spaces.play_space(),
            view_space: spaces.view_space(),
        })
    }

    pub fn begin(&mut self) -> VrResult<()> {
        let session = self.handle.raw();
        let begun = self
            .handle
            .runtime()
            .begin_session(session, self.view_configuration);
        begun.call("xrBeginSession")?;
        self.running = true;
        log::info!("[xr-session] session running");
        Ok(())
    }

    /// Stops the session but keeps every handle for a later restart.
    pub fn end(&mut self) -> VrResult<()> {
        self.running = false;
        self.frame.reset();
        if let Some(swapchain) = self.swapchain.as_mut() {
            if swapchain.is_image_acquired() {
                if let Err(err) = swapchain.release_image() {
                    log::warn!("[xr-session] releasing image while stopping: {err}");
                }
            }
        }
        let ended = self.handle.runtime().end_session(self.handle.raw());
        ended.call("xrEndSession")
    }

    pub fn request_exit(&mut self) -> VrResult<()> {
        let requested = self.handle.runtime().request_exit_session(self.handle.raw());
        requested.call("xrRequestExitSession")
    }

    /// Releases the swapchain, both spaces, then the session handle.
    pub fn destroy(mut self, graphics: Option<&mut Box<dyn GraphicsExtension>>) -> VrResult<()> {
        if let Some(swapchain) = self.swapchain.take() {
            if let Err(err) = swapchain.destroy(graphics) {
                log::error!("[xr-session] {err}");
            }
        }
        if let Some(spaces) = self.spaces.take() {
            spaces.destroy();
        }
        if self.running {
            self.running = false;
            let ended = self.handle.runtime().end_session(self.handle.raw());
            if let Err(code) = ended {
                log::warn!("[xr-session] xrEndSession during teardown: {code}");
            }
        }
        self.handle.destroy().call("xrDestroySession")?;
        log::info!("[xr-session] session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::FormFactor;
    use crate::vr::extensions::ExtensionRequest;
    use crate::vr::runtime::XrRuntime;
    use crate::vr::simulated::{HeadlessGraphics, SimulatedRuntime};
    use crate::vr::swapchain::create_main_swapchain;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn catalog_with_spaces(spaces: &[ReferenceSpaceType]) -> CapabilityCatalog {
        let mut runtime = SimulatedRuntime::default();
        runtime.reference_spaces = spaces.to_vec();
        let instance = runtime
            .create_instance(&SimulatedRuntime::basic_instance_info())
            .unwrap();
        let system = runtime
            .get_system(instance, FormFactor::HeadMountedDisplay)
            .unwrap();
        let session = runtime
            .create_session(instance, system, &SimulatedRuntime::headless_binding())
            .unwrap();
        let mut catalog = CapabilityCatalog::new();
        catalog
            .load_supported_reference_spaces(&mut runtime, session)
            .unwrap();
        catalog
    }

    struct Fixture {
        sim: Rc<RefCell<SimulatedRuntime>>,
        connection: RuntimeConnection,
        catalog: CapabilityCatalog,
    }

    fn connected() -> Fixture {
        let sim = Rc::new(RefCell::new(SimulatedRuntime::default()));
        let shared: SharedRuntime = sim.clone();
        let mut catalog = CapabilityCatalog::new();
        catalog
            .load_supported_extensions(&mut *sim.borrow_mut())
            .unwrap();
        let mut connection = RuntimeConnection::create(
            &shared,
            &catalog,
            &[ExtensionRequest::required(SimulatedRuntime::HEADLESS_EXTENSION)],
            &XrSettings::default(),
        )
        .unwrap();
        let system = connection
            .get_system_info(FormFactor::HeadMountedDisplay)
            .unwrap()
            .system_id;
        {
            let mut rt = sim.borrow_mut();
            let instance = connection.instance();
            catalog
                .load_supported_view_configuration_types(&mut *rt, instance, system)
                .unwrap();
            catalog
                .load_supported_view_configuration_views(
                    &mut *rt,
                    instance,
                    system,
                    ViewConfigurationType::PrimaryStereo,
                )
                .unwrap();
            catalog
                .load_supported_environment_blend_modes(
                    &mut *rt,
                    instance,
                    system,
                    ViewConfigurationType::PrimaryStereo,
                )
                .unwrap();
        }
        Fixture {
            sim,
            connection,
            catalog,
        }
    }

    #[test]
    fn first_supported_preference_is_chosen() {
        let catalog = catalog_with_spaces(&[ReferenceSpaceType::Local, ReferenceSpaceType::View]);
        assert_eq!(
            select_reference_space(
                &[ReferenceSpaceType::Stage, ReferenceSpaceType::Local],
                &catalog
            ),
            Some(ReferenceSpaceType::Local)
        );
    }

    #[test]
    fn unmatched_preferences_do_not_fall_back() {
        let catalog = catalog_with_spaces(&[ReferenceSpaceType::View, ReferenceSpaceType::Local]);
        assert_eq!(
            select_reference_space(&[ReferenceSpaceType::Stage], &catalog),
            None
        );
    }

    #[test]
    fn unsupported_blend_mode_blocks_session_creation() {
        let f = connected();
        let settings = XrSettings {
            environment_blend_mode: EnvironmentBlendMode::AlphaBlend,
            ..XrSettings::default()
        };
        let err = Session::create(
            &f.connection,
            &f.catalog,
            &SimulatedRuntime::headless_binding(),
            &settings,
        )
        .expect_err("alpha blend unsupported");
        assert!(matches!(
            err,
            VrError::BlendModeUnsupported(EnvironmentBlendMode::AlphaBlend)
        ));
        assert_eq!(f.sim.borrow().session_count(), 0);
    }

    #[test]
    fn setup_spaces_fails_without_a_supported_preference() {
        let mut f = connected();
        f.sim.borrow_mut().reference_spaces = vec![ReferenceSpaceType::View];
        let mut session = Session::create(
            &f.connection,
            &f.catalog,
            &SimulatedRuntime::headless_binding(),
            &XrSettings::default(),
        )
        .unwrap();
        f.catalog
            .load_supported_reference_spaces(&mut *f.sim.borrow_mut(), session.handle())
            .unwrap();

        let err = session
            .setup_spaces(&f.catalog, &[ReferenceSpaceType::Stage, ReferenceSpaceType::Local])
            .expect_err("no play space");
        assert!(matches!(err, VrError::NoSupportedReferenceSpace(_)));
        assert!(session.spaces().is_none());
        assert_eq!(f.sim.borrow().space_count(), 0);
    }

    #[test]
    fn failed_view_space_releases_the_play_space() {
        let mut f = connected();
        let mut session = Session::create(
            &f.connection,
            &f.catalog,
            &SimulatedRuntime::headless_binding(),
            &XrSettings::default(),
        )
        .unwrap();
        f.catalog
            .load_supported_reference_spaces(&mut *f.sim.borrow_mut(), session.handle())
            .unwrap();
        // Stage still works, the head-locked space no longer does.
        f.sim.borrow_mut().reference_spaces = vec![ReferenceSpaceType::Stage];

        assert!(
            session
                .setup_spaces(&f.catalog, &[ReferenceSpaceType::Stage])
                .is_err()
        );
        assert_eq!(f.sim.borrow().space_count(), 0);
    }

    #[test]
    fn destroy_runs_in_reverse_creation_order() {
        let mut f = connected();
        let mut graphics: Box<dyn GraphicsExtension> = Box::new(HeadlessGraphics::new());
        let binding = graphics.session_binding().unwrap();
        let mut session =
            Session::create(&f.connection, &f.catalog, &binding, &XrSettings::default()).unwrap();
        {
            let mut rt = f.sim.borrow_mut();
            f.catalog
                .load_supported_reference_spaces(&mut *rt, session.handle())
                .unwrap();
            f.catalog
                .load_supported_swapchain_formats(&mut *rt, session.handle())
                .unwrap();
        }
        assert_eq!(
            session
                .setup_spaces(&f.catalog, &[ReferenceSpaceType::Stage])
                .unwrap(),
            ReferenceSpaceType::Stage
        );
        session.begin().unwrap();

        let swapchain = create_main_swapchain(
            session.shared_runtime(),
            session.handle(),
            &f.catalog,
            f.connection.system().unwrap(),
            graphics.as_mut(),
            &XrSettings::default(),
        )
        .unwrap();
        session.install_swapchain(swapchain);
        assert_eq!(session.frame().views().projection_views().len(), 2);

        session.destroy(Some(&mut graphics)).unwrap();
        let sim = f.sim.borrow();
        assert_eq!(
            sim.destroy_log(),
            ["swapchain", "space", "space", "session"]
        );
        assert!(!sim.session_running());
        assert!(sim.instance_alive());
    }

    #[test]
    fn session_can_be_recreated_after_destroy() {
        let f = connected();
        for _ in 0..2 {
            let session = Session::create(
                &f.connection,
                &f.catalog,
                &SimulatedRuntime::headless_binding(),
                &XrSettings::default(),
            )
            .unwrap();
            session.destroy(None).unwrap();
        }
        assert_eq!(f.sim.borrow().session_count(), 0);
        assert_eq!(f.sim.borrow().destroy_log(), ["session", "session"]);
    }
}
