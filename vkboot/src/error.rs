//! The bootstrap error taxonomy.
//!
//! Every failure the handshake can hit is a [`BootError`] variant, and
//! every variant has a fixed [`Severity`]. Recoverable errors are logged
//! and absorbed where they occur (the catalog records fewer entries, the
//! diagnostic channel skips a destroy call). Fatal errors are propagated
//! with `?` up to [`Application`](crate::app::Application), which aborts
//! initialization and reports the stage.

use std::ffi::CStr;

use ash::vk;
use thiserror::Error;

/// Whether an error stops the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
}

/// The dynamically resolved diagnostic entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointKind {
    CreateDebugReportCallback,
    DestroyDebugReportCallback,
}

impl EntryPointKind {
    pub fn symbol(&self) -> &'static CStr {
        match self {
            EntryPointKind::CreateDebugReportCallback => {
                c"vkCreateDebugReportCallbackEXT"
            }
            EntryPointKind::DestroyDebugReportCallback => {
                c"vkDestroyDebugReportCallbackEXT"
            }
        }
    }
}

impl std::fmt::Display for EntryPointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol().to_string_lossy())
    }
}

#[derive(Debug, Error)]
pub enum BootError {
    #[error("Could not load Vulkan: {0}")]
    Loading(ash::LoadingError),

    #[error("{} failed: {} (VkResult {})", .call, .result, .result.as_raw())]
    Enumeration {
        call: &'static str,
        result: vk::Result,
    },

    #[error("{call} reported zero entries")]
    EmptyEnumeration { call: &'static str },

    #[error(
        "Extension query for layer {} failed: {} (VkResult {})",
        .layer,
        .result,
        .result.as_raw()
    )]
    ExtensionQuery { layer: String, result: vk::Result },

    #[error("vkCreateInstance failed: {} (VkResult {})", .0, .0.as_raw())]
    ContextCreation(vk::Result),

    #[error("vkEnumeratePhysicalDevices reported no physical devices")]
    NoDeviceFound,

    #[error("Physical device {device} has no graphics-capable queue family")]
    NoGraphicsQueue { device: String },

    #[error("vkCreateDevice failed: {} (VkResult {})", .0, .0.as_raw())]
    DeviceCreation(vk::Result),

    #[error("vkGetInstanceProcAddr could not locate {0}")]
    EntryPointMissing(EntryPointKind),

    #[error(
        "vkCreateDebugReportCallbackEXT failed: {} (VkResult {})",
        .0,
        .0.as_raw()
    )]
    DiagnosticRegistration(vk::Result),

    #[error("Name contains an interior NUL byte: {0:?}")]
    InvalidName(String),

    #[error(
        "No queue was requested from family {family}, only from family \
         {requested}"
    )]
    QueueNotRequested { family: u32, requested: u32 },

    #[error("Cannot {operation} while {state}")]
    Lifecycle {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Cannot {attempted} while the {blocked_by} is still alive")]
    TeardownOrder {
        attempted: &'static str,
        blocked_by: &'static str,
    },
}

impl BootError {
    pub fn severity(&self) -> Severity {
        match self {
            BootError::ExtensionQuery { .. }
            | BootError::EntryPointMissing(
                EntryPointKind::DestroyDebugReportCallback,
            )
            | BootError::QueueNotRequested { .. }
            | BootError::Lifecycle { .. }
            | BootError::TeardownOrder { .. } => Severity::Recoverable,
            BootError::Loading(_)
            | BootError::Enumeration { .. }
            | BootError::EmptyEnumeration { .. }
            | BootError::ContextCreation(_)
            | BootError::NoDeviceFound
            | BootError::NoGraphicsQueue { .. }
            | BootError::DeviceCreation(_)
            | BootError::EntryPointMissing(
                EntryPointKind::CreateDebugReportCallback,
            )
            | BootError::DiagnosticRegistration(_)
            | BootError::InvalidName(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// The raw driver status carried by this error, if any.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            BootError::Enumeration { result, .. }
            | BootError::ExtensionQuery { result, .. } => Some(*result),
            BootError::ContextCreation(result)
            | BootError::DeviceCreation(result)
            | BootError::DiagnosticRegistration(result) => Some(*result),
            _ => None,
        }
    }
}
