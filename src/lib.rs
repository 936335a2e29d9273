pub mod vr;

pub use vr::{SessionState, SharedRuntime, XrDevice, XrNotification, XrRuntime, XrSettings};
