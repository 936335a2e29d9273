//! Cached lists of what the runtime supports.
//!
//! Each `load_*` call queries the runtime once and replaces the cached list
//! only when the query succeeds; a failed query leaves the previous list in
//! place. The `is_*_supported` checks are plain membership tests.

use crate::vr::runtime::{
    ApiLayerProperties, ExtensionProperties, InstanceHandle, RuntimeResultExt, SessionHandle,
    SystemId, ViewConfigurationView, XrRuntime,
};
use crate::vr::{EnvironmentBlendMode, ReferenceSpaceType, ViewConfigurationType, VrResult};

#[derive(Debug, Clone, Default)]
pub struct CapabilityCatalog {
    layers: Vec<ApiLayerProperties>,
    extensions: Vec<ExtensionProperties>,
    view_configurations: Vec<ViewConfigurationType>,
    view_configuration_views: Vec<ViewConfigurationView>,
    blend_modes: Vec<EnvironmentBlendMode>,
    reference_spaces: Vec<ReferenceSpaceType>,
    swapchain_formats: Vec<i64>,
}

impl CapabilityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_layer_properties(&mut self, runtime: &mut dyn XrRuntime) -> VrResult<()> {
        let layers = runtime
            .enumerate_api_layers()
            .call("xrEnumerateApiLayerProperties")?;
        for layer in &layers {
            log::debug!(
                "[xr] api layer {} v{}: {}",
                layer.layer_name,
                layer.layer_version,
                layer.description
            );
        }
        self.layers = layers;
        Ok(())
    }

    pub fn load_supported_extensions(&mut self, runtime: &mut dyn XrRuntime) -> VrResult<()> {
        let extensions = runtime
            .enumerate_extensions()
            .call("xrEnumerateInstanceExtensionProperties")?;
        log::debug!("[xr] runtime offers {} extensions", extensions.len());
        self.extensions = extensions;
        Ok(())
    }

    pub fn load_supported_view_configuration_types(
        &mut self,
        runtime: &mut dyn XrRuntime,
        instance: InstanceHandle,
        system: SystemId,
    ) -> VrResult<()> {
        self.view_configurations = runtime
            .enumerate_view_configurations(instance, system)
            .call("xrEnumerateViewConfigurations")?;
        Ok(())
    }

    pub fn load_supported_view_configuration_views(
        &mut self,
        runtime: &mut dyn XrRuntime,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> VrResult<()> {
        let views = runtime
            .enumerate_view_configuration_views(instance, system, view_configuration)
            .call("xrEnumerateViewConfigurationViews")?;
        for (index, view) in views.iter().enumerate() {
            log::debug!(
                "[xr] view {index}: recommended {}x{} (max {}x{}), samples {} (max {})",
                view.recommended_image_rect_width,
                view.recommended_image_rect_height,
                view.max_image_rect_width,
                view.max_image_rect_height,
                view.recommended_swapchain_sample_count,
                view.max_swapchain_sample_count
            );
        }
        self.view_configuration_views = views;
        Ok(())
    }

    pub fn load_supported_environment_blend_modes(
        &mut self,
        runtime: &mut dyn XrRuntime,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> VrResult<()> {
        self.blend_modes = runtime
            .enumerate_environment_blend_modes(instance, system, view_configuration)
            .call("xrEnumerateEnvironmentBlendModes")?;
        Ok(())
    }

    pub fn load_supported_reference_spaces(
        &mut self,
        runtime: &mut dyn XrRuntime,
        session: SessionHandle,
    ) -> VrResult<()> {
        self.reference_spaces = runtime
            .enumerate_reference_spaces(session)
            .call("xrEnumerateReferenceSpaces")?;
        Ok(())
    }

    pub fn load_supported_swapchain_formats(
        &mut self,
        runtime: &mut dyn XrRuntime,
        session: SessionHandle,
    ) -> VrResult<()> {
        self.swapchain_formats = runtime
            .enumerate_swapchain_formats(session)
            .call("xrEnumerateSwapchainFormats")?;
        Ok(())
    }

    pub fn is_layer_supported(&self, name: &str) -> bool {
        self.layers.iter().any(|layer| layer.layer_name == name)
    }

    pub fn is_extension_supported(&self, name: &str) -> bool {
        self.extensions.iter().any(|extension| extension.name == name)
    }

    pub fn is_view_configuration_supported(&self, view_configuration: ViewConfigurationType) -> bool {
        self.view_configurations.contains(&view_configuration)
    }

    pub fn is_environment_blend_mode_supported(&self, blend_mode: EnvironmentBlendMode) -> bool {
        self.blend_modes.contains(&blend_mode)
    }

    pub fn is_reference_space_supported(&self, space_type: ReferenceSpaceType) -> bool {
        self.reference_spaces.contains(&space_type)
    }

    pub fn is_swapchain_format_supported(&self, format: i64) -> bool {
        self.swapchain_formats.contains(&format)
    }

    pub fn layers(&self) -> &[ApiLayerProperties] {
        &self.layers
    }

    pub fn extensions(&self) -> &[ExtensionProperties] {
        &self.extensions
    }

    pub fn view_configurations(&self) -> &[ViewConfigurationType] {
        &self.view_configurations
    }

    pub fn view_configuration_views(&self) -> &[ViewConfigurationView] {
        &self.view_configuration_views
    }

    pub fn environment_blend_modes(&self) -> &[EnvironmentBlendMode] {
        &self.blend_modes
    }

    pub fn reference_spaces(&self) -> &[ReferenceSpaceType] {
        &self.reference_spaces
    }

    pub fn swapchain_formats(&self) -> &[i64] {
        &self.swapchain_formats
    }

    /// Drops lists tied to a session that no longer exists.
    pub fn clear_session_capabilities(&mut self) {
        self.reference_spaces.clear();
        self.swapchain_formats.clear();
    }

    /// Drops lists tied to the runtime connection.
    pub fn clear_instance_capabilities(&mut self) {
        self.view_configurations.clear();
        self.view_configuration_views.clear();
        self.blend_modes.clear();
        self.clear_session_capabilities();
    }
}
