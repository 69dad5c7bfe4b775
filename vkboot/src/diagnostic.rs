//! Driver diagnostics over `VK_EXT_debug_report`.
//!
//! The channel resolves its two entry points through
//! `vkGetInstanceProcAddr` exactly once, at registration, and remembers
//! each as [`EntryPoint::Resolved`] or [`EntryPoint::Unavailable`]. It is
//! one-shot: `Unregistered -> Registered -> Unregistered`, and a channel that
//! has been registered once cannot be registered again.
//!
//! The same [`DiagnosticChannel::create_info`] is chained into instance
//! creation so that messages emitted while the instance itself is being
//! created are also reported.

use std::{
    borrow::Cow,
    ffi::{CStr, c_char, c_void},
    ptr,
};

use ash::vk;

use crate::{
    driver::InstanceDriver,
    error::{BootError, EntryPointKind},
};

const TARGET: &str = "vkboot-diagnostics";

/// Severities the callback is registered for.
pub const REPORT_FLAGS: vk::DebugReportFlagsEXT = vk::DebugReportFlagsEXT::from_raw(
    vk::DebugReportFlagsEXT::ERROR.as_raw()
        | vk::DebugReportFlagsEXT::WARNING.as_raw()
        | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING.as_raw()
        | vk::DebugReportFlagsEXT::DEBUG.as_raw(),
);

/// A dynamically resolved driver entry point.
#[derive(Debug, Clone, Copy)]
pub enum EntryPoint<F> {
    Resolved(F),
    Unavailable,
}

impl<F> EntryPoint<F> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, EntryPoint::Resolved(_))
    }
}

/// Look up `kind` on `instance` and reinterpret it as `F`.
///
/// # Safety
/// `F` must be the PFN type matching `kind`.
unsafe fn resolve<I: InstanceDriver, F: Copy>(
    instance: &I,
    kind: EntryPointKind,
) -> EntryPoint<F> {
    // SAFETY: The instance is live; the symbol is NUL-terminated.
    match unsafe { instance.instance_proc_addr(kind.symbol()) } {
        Some(raw) => {
            tracing::debug!("vkGetInstanceProcAddr loaded {kind}");
            // SAFETY: F is the PFN type for this symbol (passed on to
            // caller). Function pointers share one size and representation.
            EntryPoint::Resolved(unsafe {
                std::mem::transmute_copy::<unsafe extern "system" fn(), F>(&raw)
            })
        }
        None => EntryPoint::Unavailable,
    }
}

#[derive(Debug)]
struct Registration {
    callback: vk::DebugReportCallbackEXT,
    destroy: EntryPoint<vk::PFN_vkDestroyDebugReportCallbackEXT>,
}

/// The diagnostic callback registration for one instance.
#[derive(Debug, Default)]
pub struct DiagnosticChannel {
    registration: Option<Registration>,
    spent: bool,
}

impl DiagnosticChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The callback configuration used both for registration and for
    /// chaining into `VkInstanceCreateInfo`.
    pub fn create_info() -> vk::DebugReportCallbackCreateInfoEXT<'static> {
        vk::DebugReportCallbackCreateInfoEXT::default()
            .flags(REPORT_FLAGS)
            .pfn_callback(Some(debug_report_callback))
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Resolve the entry points and install the callback.
    ///
    /// A missing create entry point is fatal. A missing destroy entry point
    /// is logged and registration goes ahead; the callback then lives until
    /// the instance is destroyed.
    pub fn register<I: InstanceDriver>(
        &mut self,
        instance: &I,
    ) -> Result<(), BootError> {
        if self.spent {
            return Err(BootError::Lifecycle {
                operation: "register the diagnostic callback",
                state: "it has already been registered once",
            });
        }

        // SAFETY: The PFN type matches the symbol.
        let create = match unsafe {
            resolve::<_, vk::PFN_vkCreateDebugReportCallbackEXT>(
                instance,
                EntryPointKind::CreateDebugReportCallback,
            )
        } {
            EntryPoint::Resolved(create) => create,
            EntryPoint::Unavailable => {
                return Err(BootError::EntryPointMissing(
                    EntryPointKind::CreateDebugReportCallback,
                ));
            }
        };

        // SAFETY: The PFN type matches the symbol.
        let destroy = unsafe {
            resolve::<_, vk::PFN_vkDestroyDebugReportCallbackEXT>(
                instance,
                EntryPointKind::DestroyDebugReportCallback,
            )
        };
        if !destroy.is_resolved() {
            let err = BootError::EntryPointMissing(
                EntryPointKind::DestroyDebugReportCallback,
            );
            tracing::error!("{err}; the callback will outlive unregistration");
        }

        let create_info = Self::create_info();
        let mut callback = vk::DebugReportCallbackEXT::null();
        //SAFETY: create was resolved from this live instance, create_info
        //is valid, and callback is a valid out pointer
        let status = unsafe {
            create(
                instance.raw_instance(),
                &create_info,
                ptr::null(),
                &mut callback,
            )
        };
        if status.as_raw() < 0 {
            return Err(BootError::DiagnosticRegistration(status));
        }

        tracing::info!("Debug report callback {callback:?} registered");
        self.registration = Some(Registration { callback, destroy });
        self.spent = true;
        Ok(())
    }

    /// Remove the callback. Must run before the instance is destroyed.
    pub fn unregister<I: InstanceDriver>(
        &mut self,
        instance: &I,
    ) -> Result<(), BootError> {
        let Some(Registration { callback, destroy }) = self.registration.take()
        else {
            return Err(BootError::Lifecycle {
                operation: "unregister the diagnostic callback",
                state: "it is not registered",
            });
        };

        match destroy {
            EntryPoint::Resolved(destroy) => {
                tracing::debug!("Destroying debug report callback {callback:?}");
                //SAFETY: Last use of this callback. It was created from this
                //instance, which is still alive
                unsafe { destroy(instance.raw_instance(), callback, ptr::null()) };
            }
            EntryPoint::Unavailable => {
                tracing::warn!(
                    "Cannot destroy debug report callback {callback:?}, \
                     leaving it to the instance"
                );
            }
        }
        Ok(())
    }
}

/// How a report is classified, by precedence over the reported flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSeverity {
    Error,
    Warning,
    Information,
    Performance,
    Debug,
}

impl ReportSeverity {
    pub fn from_flags(flags: vk::DebugReportFlagsEXT) -> Option<Self> {
        if flags.contains(vk::DebugReportFlagsEXT::ERROR) {
            Some(Self::Error)
        } else if flags.contains(vk::DebugReportFlagsEXT::WARNING) {
            Some(Self::Warning)
        } else if flags.contains(vk::DebugReportFlagsEXT::INFORMATION) {
            Some(Self::Information)
        } else if flags.contains(vk::DebugReportFlagsEXT::PERFORMANCE_WARNING) {
            Some(Self::Performance)
        } else if flags.contains(vk::DebugReportFlagsEXT::DEBUG) {
            Some(Self::Debug)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Information => "INFORMATION",
            Self::Performance => "PERFORMANCE",
            Self::Debug => "DEBUG",
        }
    }
}

/// # Safety
/// `ptr` must be null or point at a NUL-terminated string.
unsafe fn lossy<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("<null>")
    } else {
        // SAFETY: Non-null and NUL-terminated per the caller.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
    }
}

/// Logs one driver report.
///
/// Runs on whatever thread the driver chooses and never calls back into the
/// driver. Always returns `VK_FALSE`: returning `VK_TRUE` would make the
/// layer abort the call that triggered the report, and a report here is
/// only ever informational.
unsafe extern "system" fn debug_report_callback(
    flags: vk::DebugReportFlagsEXT,
    object_type: vk::DebugReportObjectTypeEXT,
    object: u64,
    location: usize,
    message_code: i32,
    p_layer_prefix: *const c_char,
    p_message: *const c_char,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees both strings are valid for the duration of
    //the callback; null is handled
    let (layer, message) = unsafe { (lossy(p_layer_prefix), lossy(p_message)) };

    match ReportSeverity::from_flags(flags) {
        Some(ReportSeverity::Error) => tracing::error!(
            target: TARGET,
            "[VK_DEBUG_REPORT] ERROR: [{layer}] Code {message_code}: {message} \
             ({object_type:?} {object:#x} @ {location})"
        ),
        Some(severity @ (ReportSeverity::Warning | ReportSeverity::Performance)) => {
            tracing::warn!(
                target: TARGET,
                "[VK_DEBUG_REPORT] {}: [{layer}] Code {message_code}: \
                 {message} ({object_type:?} {object:#x} @ {location})",
                severity.label()
            )
        }
        Some(ReportSeverity::Information) => tracing::info!(
            target: TARGET,
            "[VK_DEBUG_REPORT] INFORMATION: [{layer}] Code {message_code}: \
             {message} ({object_type:?} {object:#x} @ {location})"
        ),
        Some(ReportSeverity::Debug) => tracing::debug!(
            target: TARGET,
            "[VK_DEBUG_REPORT] DEBUG: [{layer}] Code {message_code}: {message} \
             ({object_type:?} {object:#x} @ {location})"
        ),
        None => tracing::trace!(
            target: TARGET,
            "[VK_DEBUG_REPORT] {flags:?}: [{layer}] Code {message_code}: \
             {message}"
        ),
    }

    vk::FALSE
}
