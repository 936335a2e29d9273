use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Declares a runtime enumeration backed by the runtime's raw `i32` value.
macro_rules! xr_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident = $raw:literal => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_raw(self) -> i32 {
                match self {
                    $($name::$variant => $raw),+
                }
            }

            pub fn from_raw(raw: i32) -> Option<Self> {
                match raw {
                    $($raw => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub const fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

pub mod catalog;
pub mod device;
pub mod extensions;
pub mod frame;
pub mod instance;
#[cfg(feature = "vr-openxr")]
pub mod openxr;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod simulated;
pub mod state;
pub mod swapchain;

pub use device::{XrDevice, XrNotification};
#[cfg(feature = "vr-openxr")]
pub use self::openxr::OpenXrRuntime;
pub use runtime::{ResultCode, SharedRuntime, XrRuntime};
pub use settings::XrSettings;
pub use state::SessionState;

xr_enum! {
    /// Class of device requested during system resolution.
    FormFactor {
        HeadMountedDisplay = 1 => "XR_FORM_FACTOR_HEAD_MOUNTED_DISPLAY",
        HandheldDisplay = 2 => "XR_FORM_FACTOR_HANDHELD_DISPLAY",
    }
}

xr_enum! {
    ViewConfigurationType {
        PrimaryMono = 1 => "XR_VIEW_CONFIGURATION_TYPE_PRIMARY_MONO",
        PrimaryStereo = 2 => "XR_VIEW_CONFIGURATION_TYPE_PRIMARY_STEREO",
    }
}

xr_enum! {
    /// Coordinate frame convention in which poses are reported.
    ReferenceSpaceType {
        View = 1 => "XR_REFERENCE_SPACE_TYPE_VIEW",
        Local = 2 => "XR_REFERENCE_SPACE_TYPE_LOCAL",
        Stage = 3 => "XR_REFERENCE_SPACE_TYPE_STAGE",
    }
}

xr_enum! {
    EnvironmentBlendMode {
        Opaque = 1 => "XR_ENVIRONMENT_BLEND_MODE_OPAQUE",
        Additive = 2 => "XR_ENVIRONMENT_BLEND_MODE_ADDITIVE",
        AlphaBlend = 3 => "XR_ENVIRONMENT_BLEND_MODE_ALPHA_BLEND",
    }
}

/// Quality rating attached to every pose derived from a runtime location.
///
/// Consumers must not apply a transform rated [`TrackingConfidence::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TrackingConfidence {
    #[default]
    None,
    Low,
    High,
}

impl TrackingConfidence {
    pub fn is_usable(self) -> bool {
        self != TrackingConfidence::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn normalized(self) -> Self {
        let length = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if length <= f32::EPSILON {
            return Quat::IDENTITY;
        }
        Self {
            x: self.x / length,
            y: self.y / length,
            z: self.z / length,
            w: self.w / length,
        }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

/// Rigid pose as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub orientation: Quat,
    pub position: Vec3,
}

/// Field-of-view half angles in radians; left and down are normally negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(half_angle: f32) -> Self {
        Self {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum VrError {
    #[error("{call} failed: {code}")]
    Runtime {
        call: &'static str,
        code: ResultCode,
    },
    #[error("required extension {0} is not supported by the runtime")]
    RequiredExtensionUnsupported(String),
    #[error("view configuration {0} is not supported")]
    ViewConfigurationUnsupported(ViewConfigurationType),
    #[error("environment blend mode {0} is not supported")]
    BlendModeUnsupported(EnvironmentBlendMode),
    #[error("none of the preferred reference spaces {0:?} is supported")]
    NoSupportedReferenceSpace(Vec<ReferenceSpaceType>),
    #[error("none of the preferred swapchain formats {0:?} is supported")]
    NoSupportedSwapchainFormat(Vec<i64>),
    #[error("no system available for form factor {0}")]
    NoMatchingSystem(FormFactor),
    #[error("no graphics extension available for driver {0:?}")]
    UnsupportedDriver(String),
    #[error("graphics extension failure: {0}")]
    Graphics(String),
    #[error("runtime loader unavailable: {0}")]
    LoaderUnavailable(String),
    #[error("{0} requires an initialized runtime connection")]
    NotInitialized(&'static str),
    #[error("{0} requires a session")]
    NoSession(&'static str),
    #[error("{0} requires a running session")]
    NotRunning(&'static str),
    #[error("a session already exists")]
    SessionExists,
    #[error("swapchain image already acquired; release it first")]
    ImageAlreadyAcquired,
    #[error("no swapchain image is acquired")]
    ImageNotAcquired,
    #[error("extensions must be registered before the instance is created")]
    RegistryLocked,
    #[error("view index {index} out of range for {count} views")]
    ViewOutOfRange { index: usize, count: usize },
    #[error("view set holds {expected} views but the runtime reported {got}")]
    ViewCountMismatch { expected: usize, got: usize },
    #[error("invalid clip planes: near {near}, far {far}")]
    InvalidClipPlanes { near: f64, far: f64 },
    #[error("degenerate field of view {0:?}")]
    DegenerateFov(Fov),
    #[error("view poses are not valid for this frame")]
    ViewPoseInvalid,
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error("settings parse error: {0}")]
    SettingsFormat(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VrError {
    pub fn runtime(call: &'static str, code: ResultCode) -> Self {
        VrError::Runtime { call, code }
    }

    /// The runtime result code behind this error, if the runtime rejected a call.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            VrError::Runtime { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type VrResult<T> = Result<T, VrError>;

/// Renders a packed runtime version as `major.minor.patch`.
pub fn make_version_string(version: u64) -> String {
    let major = (version >> 48) & 0xffff;
    let minor = (version >> 32) & 0xffff;
    let patch = version & 0xffff_ffff;
    format!("{major}.{minor}.{patch}")
}

pub const fn make_version(major: u16, minor: u16, patch: u32) -> u64 {
    ((major as u64) << 48) | ((minor as u64) << 32) | patch as u64
}
