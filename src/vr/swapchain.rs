//! The shared render-target swapchain and its per-frame image cursor.

use crate::vr::catalog::CapabilityCatalog;
use crate::vr::extensions::{
    GraphicsExtension, ImageSetHandle, RenderTargetId, SwapchainDescriptor,
};
use crate::vr::instance::SystemInfo;
use crate::vr::runtime::{
    RuntimeResultExt, SWAPCHAIN_USAGE_COLOR_ATTACHMENT, SWAPCHAIN_USAGE_SAMPLED, Scoped,
    SessionHandle, SharedRuntime, SwapchainCreateInfo, SwapchainHandle,
};
use crate::vr::settings::XrSettings;
use crate::vr::{Extent2D, VrError, VrResult};
use std::time::Duration;

/// First preferred format the runtime also supports.
pub fn select_swapchain_format(preferences: &[i64], catalog: &CapabilityCatalog) -> Option<i64> {
    preferences
        .iter()
        .copied()
        .find(|format| catalog.is_swapchain_format_supported(*format))
}

/// Works out the main swapchain's shape from the cached view configuration.
///
/// The settings' format list wins over the graphics extension's when it is
/// non-empty. Every view renders into its own array layer.
pub fn plan_main_swapchain(
    catalog: &CapabilityCatalog,
    system: &SystemInfo,
    graphics_formats: &[i64],
    settings: &XrSettings,
) -> VrResult<SwapchainDescriptor> {
    let views = catalog.view_configuration_views();
    let Some(first) = views.first() else {
        return Err(VrError::ViewConfigurationUnsupported(
            settings.view_configuration,
        ));
    };

    let preferences = if settings.preferred_swapchain_formats.is_empty() {
        graphics_formats
    } else {
        settings.preferred_swapchain_formats.as_slice()
    };
    let format = select_swapchain_format(preferences, catalog)
        .ok_or_else(|| VrError::NoSupportedSwapchainFormat(preferences.to_vec()))?;

    let mut width = first.recommended_image_rect_width;
    let mut height = first.recommended_image_rect_height;
    let max = &system.graphics;
    if max.max_swapchain_image_width > 0 {
        width = width.min(max.max_swapchain_image_width);
    }
    if max.max_swapchain_image_height > 0 {
        height = height.min(max.max_swapchain_image_height);
    }

    let sample_count = first
        .recommended_swapchain_sample_count
        .clamp(1, first.max_swapchain_sample_count.max(1));

    Ok(SwapchainDescriptor {
        format,
        extent: Extent2D { width, height },
        sample_count,
        array_size: views.len() as u32,
    })
}

#[derive(Debug)]
pub struct Swapchain {
    handle: Scoped<SwapchainHandle>,
    images: Option<ImageSetHandle>,
    descriptor: SwapchainDescriptor,
    image_index: u32,
    image_acquired: bool,
    /// Image acquired from the runtime whose wait timed out.
    awaiting: Option<u32>,
    wait_timeout: Duration,
}

impl Swapchain {
    /// Creates the runtime swapchain and has `graphics` build its image set.
    pub fn create(
        runtime: &SharedRuntime,
        session: SessionHandle,
        descriptor: SwapchainDescriptor,
        graphics: &mut dyn GraphicsExtension,
        wait_timeout: Duration,
    ) -> VrResult<Self> {
        let info = SwapchainCreateInfo {
            usage_flags: SWAPCHAIN_USAGE_COLOR_ATTACHMENT | SWAPCHAIN_USAGE_SAMPLED,
            format: descriptor.format,
            sample_count: descriptor.sample_count,
            width: descriptor.extent.width,
            height: descriptor.extent.height,
            face_count: 1,
            array_size: descriptor.array_size,
            mip_count: 1,
        };
        let raw = {
            let mut runtime = runtime.borrow_mut();
            runtime.create_swapchain(session, &info)
        }
        .call("xrCreateSwapchain")?;
        let handle = Scoped::new(raw, runtime.clone());

        let images = {
            let mut runtime = runtime.borrow_mut();
            graphics.create_image_set(&mut *runtime, raw, &descriptor)
        }?;

        log::info!(
            "[xr-swapchain] created {}x{} format {} x{} samples, {} layers",
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.format,
            descriptor.sample_count,
            descriptor.array_size
        );

        Ok(Self {
            handle,
            images: Some(images),
            descriptor,
            image_index: 0,
            image_acquired: false,
            awaiting: None,
            wait_timeout,
        })
    }

    pub fn handle(&self) -> SwapchainHandle {
        self.handle.raw()
    }

    pub fn images(&self) -> Option<ImageSetHandle> {
        self.images
    }

    pub fn descriptor(&self) -> &SwapchainDescriptor {
        &self.descriptor
    }

    pub fn extent(&self) -> Extent2D {
        self.descriptor.extent
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn is_image_acquired(&self) -> bool {
        self.image_acquired
    }

    /// Acquires the next image and waits until the runtime hands it over.
    ///
    /// A timed-out wait keeps the image reserved; the next call waits on it
    /// again instead of acquiring another one.
    pub fn acquire_image(&mut self) -> VrResult<u32> {
        if self.image_acquired {
            return Err(VrError::ImageAlreadyAcquired);
        }
        let raw = self.handle.raw();

        let index = match self.awaiting.take() {
            Some(index) => index,
            None => {
                let acquired = self.handle.runtime().acquire_swapchain_image(raw);
                acquired.call("xrAcquireSwapchainImage")?
            }
        };

        let waited = self
            .handle
            .runtime()
            .wait_swapchain_image(raw, self.wait_timeout);
        if let Err(code) = waited {
            log::warn!("[xr-swapchain] image {index} not ready: {code}");
            self.awaiting = Some(index);
            return Err(VrError::runtime("xrWaitSwapchainImage", code));
        }

        self.image_index = index;
        self.image_acquired = true;
        Ok(index)
    }

    /// Hands the acquired image back; the flag clears even if the runtime objects.
    pub fn release_image(&mut self) -> VrResult<()> {
        if !self.image_acquired {
            return Err(VrError::ImageNotAcquired);
        }
        self.image_acquired = false;
        let released = self.handle.runtime().release_swapchain_image(self.handle.raw());
        released.call("xrReleaseSwapchainImage")
    }

    pub fn copy_render_target(
        &self,
        graphics: &mut dyn GraphicsExtension,
        render_target: RenderTargetId,
    ) -> VrResult<()> {
        if !self.image_acquired {
            return Err(VrError::ImageNotAcquired);
        }
        let images = self
            .images
            .ok_or_else(|| VrError::Graphics("swapchain has no image set".to_string()))?;
        graphics.copy_render_target_to_image(render_target, images, self.image_index)
    }

    /// Frees the backend image set, then the runtime swapchain.
    pub fn destroy(mut self, graphics: Option<&mut Box<dyn GraphicsExtension>>) -> VrResult<()> {
        if let Some(images) = self.images.take() {
            match graphics {
                Some(graphics) => graphics.free_image_set(images),
                None => log::warn!("[xr-swapchain] no graphics extension to free {images:?}"),
            }
        }
        self.handle.destroy().call("xrDestroySwapchain")
    }
}

/// Builds the main swapchain from the catalog and hands it to the caller.
pub fn create_main_swapchain(
    runtime: &SharedRuntime,
    session: SessionHandle,
    catalog: &CapabilityCatalog,
    system: &SystemInfo,
    graphics: &mut dyn GraphicsExtension,
    settings: &XrSettings,
) -> VrResult<Swapchain> {
    let descriptor = plan_main_swapchain(
        catalog,
        system,
        &graphics.usable_swapchain_formats(),
        settings,
    )?;
    Swapchain::create(
        runtime,
        session,
        descriptor,
        graphics,
        settings.image_wait_timeout(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::runtime::{ResultCode, XrRuntime};
    use crate::vr::simulated::{HeadlessGraphics, RuntimeCall, SimulatedRuntime};
    use crate::vr::{FormFactor, ViewConfigurationType};
    use std::cell::RefCell;
    use std::rc::Rc;

    const A: i64 = 10;
    const B: i64 = 20;
    const C: i64 = 30;

    struct Fixture {
        sim: Rc<RefCell<SimulatedRuntime>>,
        shared: SharedRuntime,
        session: SessionHandle,
        catalog: CapabilityCatalog,
        system: SystemInfo,
    }

    fn fixture(formats: Vec<i64>) -> Fixture {
        let sim = Rc::new(RefCell::new(SimulatedRuntime::default()));
        sim.borrow_mut().swapchain_formats = formats;
        let shared: SharedRuntime = sim.clone();
        let mut catalog = CapabilityCatalog::new();

        let (session, system) = {
            let mut rt = sim.borrow_mut();
            let instance = rt
                .create_instance(&SimulatedRuntime::basic_instance_info())
                .unwrap();
            let system_id = rt.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
            let properties = rt.system_properties(instance, system_id).unwrap();
            let session = rt
                .create_session(instance, system_id, &SimulatedRuntime::headless_binding())
                .unwrap();
            rt.begin_session(session, ViewConfigurationType::PrimaryStereo)
                .unwrap();
            catalog
                .load_supported_view_configuration_views(
                    &mut *rt,
                    instance,
                    system_id,
                    ViewConfigurationType::PrimaryStereo,
                )
                .unwrap();
            catalog
                .load_supported_swapchain_formats(&mut *rt, session)
                .unwrap();
            let system = SystemInfo {
                system_id,
                vendor_id: properties.vendor_id,
                system_name: properties.system_name,
                graphics: properties.graphics,
                tracking: properties.tracking,
            };
            (session, system)
        };

        Fixture {
            sim,
            shared,
            session,
            catalog,
            system,
        }
    }

    #[test]
    fn preferred_format_wins_and_images_alternate() {
        let f = fixture(vec![A, B, C]);
        let mut graphics = HeadlessGraphics::with_formats(vec![A, C]);
        let settings = XrSettings {
            preferred_swapchain_formats: vec![B, A],
            ..XrSettings::default()
        };

        let mut swapchain = create_main_swapchain(
            &f.shared,
            f.session,
            &f.catalog,
            &f.system,
            &mut graphics,
            &settings,
        )
        .expect("swapchain");
        assert_eq!(swapchain.descriptor().format, B);
        assert_eq!(swapchain.descriptor().array_size, 2);

        for _ in 0..2 {
            swapchain.acquire_image().expect("acquire");
            swapchain.release_image().expect("release");
        }
        swapchain.acquire_image().expect("third acquire");
        assert!(matches!(
            swapchain.acquire_image(),
            Err(VrError::ImageAlreadyAcquired)
        ));
    }

    #[test]
    fn graphics_order_applies_without_settings_override() {
        let f = fixture(vec![A, B, C]);
        let mut graphics = HeadlessGraphics::with_formats(vec![C, B]);
        let swapchain = create_main_swapchain(
            &f.shared,
            f.session,
            &f.catalog,
            &f.system,
            &mut graphics,
            &XrSettings::default(),
        )
        .unwrap();
        assert_eq!(swapchain.descriptor().format, C);
        assert_eq!(swapchain.extent().width, 1440);
        assert_eq!(swapchain.descriptor().sample_count, 1);
    }

    #[test]
    fn no_common_format_fails() {
        let f = fixture(vec![A]);
        let mut graphics = HeadlessGraphics::with_formats(vec![B, C]);
        let err = create_main_swapchain(
            &f.shared,
            f.session,
            &f.catalog,
            &f.system,
            &mut graphics,
            &XrSettings::default(),
        )
        .expect_err("no overlap");
        assert!(matches!(err, VrError::NoSupportedSwapchainFormat(formats) if formats == [B, C]));
        assert_eq!(f.sim.borrow().swapchain_count(), 0);
    }

    #[test]
    fn release_without_acquire_fails() {
        let f = fixture(vec![A]);
        let mut graphics = HeadlessGraphics::with_formats(vec![A]);
        let mut swapchain = create_main_swapchain(
            &f.shared,
            f.session,
            &f.catalog,
            &f.system,
            &mut graphics,
            &XrSettings::default(),
        )
        .unwrap();
        assert!(matches!(
            swapchain.release_image(),
            Err(VrError::ImageNotAcquired)
        ));
    }

    #[test]
    fn timed_out_wait_retries_the_same_image() {
        let f = fixture(vec![A]);
        let mut graphics = HeadlessGraphics::with_formats(vec![A]);
        let mut swapchain = create_main_swapchain(
            &f.shared,
            f.session,
            &f.catalog,
            &f.system,
            &mut graphics,
            &XrSettings::default(),
        )
        .unwrap();

        f.sim
            .borrow_mut()
            .fail_call(RuntimeCall::WaitSwapchainImage, ResultCode::TIMEOUT_EXPIRED);
        let err = swapchain.acquire_image().expect_err("timeout");
        assert_eq!(err.result_code(), Some(ResultCode::TIMEOUT_EXPIRED));
        assert!(!swapchain.is_image_acquired());

        f.sim
            .borrow_mut()
            .clear_failure(RuntimeCall::WaitSwapchainImage);
        assert_eq!(swapchain.acquire_image().unwrap(), 0);
        swapchain.release_image().unwrap();
        assert_eq!(swapchain.acquire_image().unwrap(), 1);
    }

    #[test]
    fn destroy_frees_images_before_the_swapchain() {
        let f = fixture(vec![A]);
        let mut graphics: Box<dyn GraphicsExtension> =
            Box::new(HeadlessGraphics::with_formats(vec![A]));
        let swapchain = create_main_swapchain(
            &f.shared,
            f.session,
            &f.catalog,
            &f.system,
            graphics.as_mut(),
            &XrSettings::default(),
        )
        .unwrap();
        let images = swapchain.images();
        assert!(images.is_some());

        swapchain.destroy(Some(&mut graphics)).unwrap();
        assert_eq!(f.sim.borrow().swapchain_count(), 0);
        assert_eq!(f.sim.borrow().destroy_log(), ["swapchain"]);
    }

    #[test]
    fn oversized_recommendation_is_clamped_to_system_limits() {
        let mut f = fixture(vec![A]);
        f.system.graphics.max_swapchain_image_width = 1024;
        let descriptor = plan_main_swapchain(&f.catalog, &f.system, &[A], &XrSettings::default())
            .unwrap();
        assert_eq!(descriptor.extent.width, 1024);
        assert_eq!(descriptor.extent.height, 1600);
    }
}
