use crate::vr::{
    EnvironmentBlendMode, FormFactor, ReferenceSpaceType, ViewConfigurationType, VrError,
    VrResult,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default wait for a swapchain image before the runtime reports a timeout.
pub const DEFAULT_IMAGE_WAIT_TIMEOUT_MS: u64 = 17;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrSettings {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub form_factor: FormFactor,
    pub view_configuration: ViewConfigurationType,
    pub environment_blend_mode: EnvironmentBlendMode,
    /// Play-space candidates, most preferred first.
    pub reference_space_preferences: Vec<ReferenceSpaceType>,
    /// Overrides the graphics extension's format order when non-empty.
    pub preferred_swapchain_formats: Vec<i64>,
    pub image_wait_timeout_ms: u64,
    pub api_layers: Vec<String>,
}

impl Default for XrSettings {
    fn default() -> Self {
        Self {
            application_name: "Theta Engine".to_string(),
            application_version: 1,
            engine_name: "Theta Engine".to_string(),
            engine_version: 1,
            form_factor: FormFactor::HeadMountedDisplay,
            view_configuration: ViewConfigurationType::PrimaryStereo,
            environment_blend_mode: EnvironmentBlendMode::Opaque,
            reference_space_preferences: vec![ReferenceSpaceType::Stage, ReferenceSpaceType::Local],
            preferred_swapchain_formats: Vec::new(),
            image_wait_timeout_ms: DEFAULT_IMAGE_WAIT_TIMEOUT_MS,
            api_layers: Vec::new(),
        }
    }
}

impl XrSettings {
    pub fn from_json_str(text: &str) -> VrResult<Self> {
        let settings: XrSettings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> VrResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> VrResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> VrResult<()> {
        if self.reference_space_preferences.is_empty() {
            return Err(VrError::Settings(
                "reference_space_preferences must name at least one space".to_string(),
            ));
        }
        if self
            .reference_space_preferences
            .contains(&ReferenceSpaceType::View)
        {
            return Err(VrError::Settings(
                "the head-locked view space cannot be used as play space".to_string(),
            ));
        }
        if self.image_wait_timeout_ms == 0 {
            return Err(VrError::Settings(
                "image_wait_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn image_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.image_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_prefer_stage_then_local() {
        let settings = XrSettings::default();
        assert_eq!(
            settings.reference_space_preferences,
            [ReferenceSpaceType::Stage, ReferenceSpaceType::Local]
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let settings = XrSettings::from_json_str(
            r#"{ "reference_space_preferences": ["local"], "preferred_swapchain_formats": [43, 37] }"#,
        )
        .expect("valid settings");
        assert_eq!(
            settings.reference_space_preferences,
            [ReferenceSpaceType::Local]
        );
        assert_eq!(settings.preferred_swapchain_formats, [43, 37]);
        assert_eq!(settings.view_configuration, ViewConfigurationType::PrimaryStereo);
    }

    #[test]
    fn view_space_is_rejected_as_play_space() {
        let err = XrSettings::from_json_str(r#"{ "reference_space_preferences": ["view"] }"#)
            .expect_err("view space");
        assert!(matches!(err, VrError::Settings(_)));
    }

    #[test]
    fn malformed_json_reports_format_error() {
        let err = XrSettings::from_json_str("{ not json").expect_err("malformed");
        assert!(matches!(err, VrError::SettingsFormat(_)));
    }

    #[test]
    fn settings_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "image_wait_timeout_ms": 5, "api_layers": ["XR_APILAYER_test"] }}"#)
            .unwrap();

        let settings = XrSettings::from_path(file.path()).expect("load");
        assert_eq!(settings.image_wait_timeout(), Duration::from_millis(5));
        assert_eq!(settings.api_layers, ["XR_APILAYER_test"]);
    }

    #[test]
    fn settings_survive_json_round_trip() {
        let settings = XrSettings {
            environment_blend_mode: EnvironmentBlendMode::Additive,
            ..XrSettings::default()
        };
        let text = settings.to_json_string().unwrap();
        assert_eq!(XrSettings::from_json_str(&text).unwrap(), settings);
    }
}
