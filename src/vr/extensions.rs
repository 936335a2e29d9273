//! Pluggable capability add-ons and composition-layer providers.
//!
//! The core never knows concrete extension types. Add-ons are consulted in
//! registration order, both when building the enabled-extension list and when
//! lifecycle callbacks are dispatched.

use crate::vr::runtime::{
    CompositionLayer, FrameState, GraphicsBinding, InstanceHandle, RuntimeEvent, SessionHandle,
    SwapchainHandle, XrRuntime,
};
use crate::vr::{Extent2D, SessionState, VrError, VrResult};

/// An extension name an add-on wants enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRequest {
    pub name: String,
    /// Instance creation fails when a required extension is unsupported.
    pub required: bool,
}

impl ExtensionRequest {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Lifecycle hooks for a runtime feature add-on.
pub trait ExtensionWrapper {
    fn label(&self) -> &str;

    fn requested_extensions(&self) -> Vec<ExtensionRequest> {
        Vec::new()
    }

    /// Called with the names that were actually enabled on the instance.
    fn on_instance_created(&mut self, _instance: InstanceHandle, _enabled: &[String]) {}

    fn on_instance_destroyed(&mut self) {}

    fn on_session_created(&mut self, _session: SessionHandle) {}

    fn on_session_destroyed(&mut self) {}

    fn on_state_changed(&mut self, _state: SessionState) {}

    /// Sees every polled event before the core does. Returning `true` marks
    /// the event as handled; the core still applies session state changes.
    fn on_event_polled(&mut self, _event: &RuntimeEvent) -> bool {
        false
    }
}

/// Contributes extra layers on top of the primary projection layer.
pub trait CompositionLayerProvider {
    fn label(&self) -> &str;

    fn composition_layers(&mut self, frame: &FrameState) -> Vec<CompositionLayer>;
}

/// Opaque backend image set owned by a graphics extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSetHandle(pub u64);

/// Identifies an engine render target handed to the draw hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    pub format: i64,
    pub extent: Extent2D,
    pub sample_count: u32,
    pub array_size: u32,
}

/// Backend-specific half of session and swapchain management.
pub trait GraphicsExtension: ExtensionWrapper {
    /// Name of the rendering driver this extension serves, e.g. `"vulkan"`.
    fn driver_name(&self) -> &str;

    fn session_binding(&mut self) -> VrResult<GraphicsBinding>;

    /// Pixel formats in preference order.
    fn usable_swapchain_formats(&self) -> Vec<i64>;

    fn create_image_set(
        &mut self,
        runtime: &mut dyn XrRuntime,
        swapchain: SwapchainHandle,
        descriptor: &SwapchainDescriptor,
    ) -> VrResult<ImageSetHandle>;

    fn free_image_set(&mut self, images: ImageSetHandle);

    /// Copies the engine render target into the acquired swapchain image.
    fn copy_render_target_to_image(
        &mut self,
        render_target: RenderTargetId,
        images: ImageSetHandle,
        image_index: u32,
    ) -> VrResult<()>;
}

#[derive(Default)]
pub struct ExtensionRegistry {
    wrappers: Vec<Box<dyn ExtensionWrapper>>,
    layer_providers: Vec<Box<dyn CompositionLayerProvider>>,
    locked: bool,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extension_wrapper(
        &mut self,
        wrapper: Box<dyn ExtensionWrapper>,
    ) -> VrResult<()> {
        if self.locked {
            return Err(VrError::RegistryLocked);
        }
        log::debug!("[xr] registered extension wrapper {}", wrapper.label());
        self.wrappers.push(wrapper);
        Ok(())
    }

    pub fn register_composition_layer_provider(
        &mut self,
        provider: Box<dyn CompositionLayerProvider>,
    ) {
        log::debug!("[xr] registered composition layer provider {}", provider.label());
        self.layer_providers.push(provider);
    }

    /// Freezes the wrapper list once the instance exists.
    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn wrapper_count(&self) -> usize {
        self.wrappers.len()
    }

    pub fn layer_provider_count(&self) -> usize {
        self.layer_providers.len()
    }

    pub fn requested_extensions(&self) -> Vec<ExtensionRequest> {
        self.wrappers
            .iter()
            .flat_map(|wrapper| wrapper.requested_extensions())
            .collect()
    }

    pub fn for_each_wrapper(&mut self, mut visit: impl FnMut(&mut dyn ExtensionWrapper)) {
        for wrapper in &mut self.wrappers {
            visit(wrapper.as_mut());
        }
    }

    /// Offers an event to every wrapper; true if any of them handled it.
    pub fn dispatch_event(&mut self, event: &RuntimeEvent) -> bool {
        let mut handled = false;
        for wrapper in &mut self.wrappers {
            handled |= wrapper.on_event_polled(event);
        }
        handled
    }

    pub fn collect_composition_layers(&mut self, frame: &FrameState) -> Vec<CompositionLayer> {
        self.layer_providers
            .iter_mut()
            .flat_map(|provider| provider.composition_layers(frame))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::runtime::{
        EyeVisibility, QuadLayer, Rect2D, SpaceHandle, SwapchainSubImage,
    };
    use crate::vr::Pose;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl ExtensionWrapper for Recorder {
        fn label(&self) -> &str {
            self.name
        }

        fn requested_extensions(&self) -> Vec<ExtensionRequest> {
            vec![ExtensionRequest::optional(format!("XR_TEST_{}", self.name))]
        }

        fn on_state_changed(&mut self, state: SessionState) {
            self.log.borrow_mut().push(format!("{}:{state}", self.name));
        }
    }

    struct QuadProvider(u64);

    impl CompositionLayerProvider for QuadProvider {
        fn label(&self) -> &str {
            "quad"
        }

        fn composition_layers(&mut self, _frame: &FrameState) -> Vec<CompositionLayer> {
            vec![CompositionLayer::Quad(QuadLayer {
                space: SpaceHandle::from_raw(self.0),
                eye_visibility: EyeVisibility::Both,
                sub_image: SwapchainSubImage {
                    swapchain: SwapchainHandle::from_raw(self.0),
                    image_rect: Rect2D::default(),
                    image_array_index: 0,
                },
                pose: Pose::default(),
                size: (1.0, 1.0),
            })]
        }
    }

    #[test]
    fn wrappers_are_consulted_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ExtensionRegistry::new();
        for name in ["first", "second"] {
            registry
                .register_extension_wrapper(Box::new(Recorder {
                    name,
                    log: log.clone(),
                }))
                .unwrap();
        }

        let names: Vec<String> = registry
            .requested_extensions()
            .into_iter()
            .map(|request| request.name)
            .collect();
        assert_eq!(names, ["XR_TEST_first", "XR_TEST_second"]);

        registry.for_each_wrapper(|wrapper| wrapper.on_state_changed(SessionState::Ready));
        assert_eq!(
            log.borrow().as_slice(),
            ["first:XR_SESSION_STATE_READY", "second:XR_SESSION_STATE_READY"]
        );
    }

    #[test]
    fn locked_registry_rejects_new_wrappers() {
        let mut registry = ExtensionRegistry::new();
        registry.lock();
        let err = registry
            .register_extension_wrapper(Box::new(Recorder {
                name: "late",
                log: Rc::default(),
            }))
            .expect_err("locked");
        assert!(matches!(err, VrError::RegistryLocked));
        assert_eq!(registry.wrapper_count(), 0);
    }

    #[test]
    fn layer_providers_contribute_in_order() {
        let mut registry = ExtensionRegistry::new();
        registry.register_composition_layer_provider(Box::new(QuadProvider(7)));
        registry.register_composition_layer_provider(Box::new(QuadProvider(9)));

        let layers = registry.collect_composition_layers(&FrameState::default());
        let spaces: Vec<u64> = layers
            .iter()
            .map(|layer| match layer {
                CompositionLayer::Quad(quad) => quad.space.into_raw(),
                CompositionLayer::Projection(_) => unreachable!(),
            })
            .collect();
        assert_eq!(spaces, [7, 9]);
    }
}
