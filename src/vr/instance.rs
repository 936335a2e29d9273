use crate::vr::catalog::CapabilityCatalog;
use crate::vr::extensions::ExtensionRequest;
use crate::vr::runtime::{
    InstanceCreateInfo, InstanceHandle, ResultCode, RuntimeResultExt, Scoped, SharedRuntime,
    SystemGraphicsProperties, SystemId, SystemTrackingProperties,
};
use crate::vr::settings::XrSettings;
use crate::vr::{FormFactor, VrError, VrResult, make_version, make_version_string};

/// API version the core is written against.
pub const API_VERSION: u64 = make_version(1, 0, 0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub system_id: SystemId,
    pub vendor_id: u32,
    pub system_name: String,
    pub graphics: SystemGraphicsProperties,
    pub tracking: SystemTrackingProperties,
}

/// Intersects add-on requests with what the runtime supports.
///
/// Order follows the requests, duplicates are collapsed, and an unsupported
/// required extension fails the whole negotiation.
pub fn build_enabled_extensions(
    requests: &[ExtensionRequest],
    catalog: &CapabilityCatalog,
) -> VrResult<Vec<String>> {
    let mut enabled: Vec<String> = Vec::new();
    for request in requests {
        if enabled.contains(&request.name) {
            continue;
        }
        if catalog.is_extension_supported(&request.name) {
            enabled.push(request.name.clone());
        } else if request.required {
            return Err(VrError::RequiredExtensionUnsupported(request.name.clone()));
        } else {
            log::warn!(
                "[xr] optional extension {} not supported by the runtime",
                request.name
            );
        }
    }
    // A later required request for a name already skipped as optional still fails.
    for request in requests.iter().filter(|request| request.required) {
        if !enabled.contains(&request.name) {
            return Err(VrError::RequiredExtensionUnsupported(request.name.clone()));
        }
    }
    Ok(enabled)
}

/// Live connection to the runtime instance and the resolved system.
#[derive(Debug)]
pub struct RuntimeConnection {
    instance: Scoped<InstanceHandle>,
    enabled_extensions: Vec<String>,
    enabled_api_layers: Vec<String>,
    runtime_name: String,
    runtime_version: u64,
    system: Option<SystemInfo>,
}

impl RuntimeConnection {
    pub fn create(
        runtime: &SharedRuntime,
        catalog: &CapabilityCatalog,
        requests: &[ExtensionRequest],
        settings: &XrSettings,
    ) -> VrResult<Self> {
        let enabled_extensions = build_enabled_extensions(requests, catalog)?;
        let enabled_api_layers: Vec<String> = settings
            .api_layers
            .iter()
            .filter(|layer| {
                let supported = catalog.is_layer_supported(layer);
                if !supported {
                    log::warn!("[xr] api layer {layer} not available; skipping");
                }
                supported
            })
            .cloned()
            .collect();

        let info = InstanceCreateInfo {
            application_name: settings.application_name.clone(),
            application_version: settings.application_version,
            engine_name: settings.engine_name.clone(),
            engine_version: settings.engine_version,
            api_version: API_VERSION,
            enabled_api_layers: enabled_api_layers.clone(),
            enabled_extensions: enabled_extensions.clone(),
        };

        let raw = {
            let mut runtime = runtime.borrow_mut();
            runtime.create_instance(&info)
        }
        .call("xrCreateInstance")?;
        let instance = Scoped::new(raw, runtime.clone());

        let properties = {
            let mut runtime = runtime.borrow_mut();
            runtime.instance_properties(raw)
        }
        .call("xrGetInstanceProperties")?;

        log::info!(
            "[xr] connected to {} {} with extensions {:?}",
            properties.runtime_name,
            make_version_string(properties.runtime_version),
            enabled_extensions
        );

        Ok(Self {
            instance,
            enabled_extensions,
            enabled_api_layers,
            runtime_name: properties.runtime_name,
            runtime_version: properties.runtime_version,
            system: None,
        })
    }

    /// Resolves the device for `form_factor` and records its properties.
    pub fn get_system_info(&mut self, form_factor: FormFactor) -> VrResult<&SystemInfo> {
        let instance = self.instance.raw();
        let system_id = match self.instance.runtime().get_system(instance, form_factor) {
            Ok(system_id) => system_id,
            Err(
                ResultCode::ERROR_FORM_FACTOR_UNAVAILABLE | ResultCode::ERROR_FORM_FACTOR_UNSUPPORTED,
            ) => return Err(VrError::NoMatchingSystem(form_factor)),
            Err(code) => return Err(VrError::runtime("xrGetSystem", code)),
        };

        let properties = self
            .instance
            .runtime()
            .system_properties(instance, system_id)
            .call("xrGetSystemProperties")?;

        log::info!(
            "[xr] system {} (vendor {:#x}), max {}x{}, {} layers, tracking orientation={} position={}",
            properties.system_name,
            properties.vendor_id,
            properties.graphics.max_swapchain_image_width,
            properties.graphics.max_swapchain_image_height,
            properties.graphics.max_layer_count,
            properties.tracking.orientation_tracking,
            properties.tracking.position_tracking
        );

        Ok(&*self.system.insert(SystemInfo {
            system_id,
            vendor_id: properties.vendor_id,
            system_name: properties.system_name,
            graphics: properties.graphics,
            tracking: properties.tracking,
        }))
    }

    pub fn instance(&self) -> InstanceHandle {
        self.instance.raw()
    }

    pub fn shared_runtime(&self) -> &SharedRuntime {
        self.instance.shared_runtime()
    }

    pub fn system(&self) -> Option<&SystemInfo> {
        self.system.as_ref()
    }

    pub fn system_id(&self) -> Option<SystemId> {
        self.system.as_ref().map(|system| system.system_id)
    }

    pub fn enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    pub fn is_extension_enabled(&self, name: &str) -> bool {
        self.enabled_extensions.iter().any(|enabled| enabled == name)
    }

    pub fn enabled_api_layers(&self) -> &[String] {
        &self.enabled_api_layers
    }

    pub fn runtime_name(&self) -> &str {
        &self.runtime_name
    }

    pub fn runtime_version(&self) -> u64 {
        self.runtime_version
    }

    pub fn destroy(self) -> VrResult<()> {
        self.instance.destroy().call("xrDestroyInstance")
    }
}
