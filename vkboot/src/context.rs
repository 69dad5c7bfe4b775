//! Instance creation and physical device enumeration.
//!
//! The central type is [`Context`], which owns the driver instance, the
//! global [`CapabilityCatalog`] it was negotiated against, and the
//! instance's [`DiagnosticChannel`].
//!
//! [`VkVersion`] is a thin newtype over the packed Vulkan version word.

use std::{
    ffi::{CString, c_char},
    fmt::Debug,
};

use ash::vk;

use crate::{
    catalog::{CapabilityCatalog, RequestedFeatureSet},
    diagnostic::DiagnosticChannel,
    driver::{InstanceDriver, Loader, read_two_call},
    error::BootError,
};

/// Application and engine version reported in `VkApplicationInfo`.
pub const APPLICATION_VERSION: u32 = 1;
pub const ENGINE_NAME: &std::ffi::CStr = c"vkboot";

/// A packed Vulkan API version number.
///
/// Wraps the 32-bit encoding used by `VkApplicationInfo` and
/// `VkPhysicalDeviceProperties::apiVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VkVersion(u32);

impl VkVersion {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

pub(crate) fn cstrings(names: &[String]) -> Result<Vec<CString>, BootError> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str())
                .map_err(|_| BootError::InvalidName(name.clone()))
        })
        .collect()
}

pub(crate) fn name_ptrs(names: &[CString]) -> Vec<*const c_char> {
    names.iter().map(|name| name.as_ptr()).collect()
}

/// The process's driver context.
///
/// Dropping a `Context` unregisters diagnostics if they are still
/// registered and destroys the instance. Anything created from the
/// instance (the logical device in particular) must be gone first.
pub struct Context<I: InstanceDriver> {
    handle: I,
    catalog: CapabilityCatalog,
    diagnostics: DiagnosticChannel,
    enabled_layers: Vec<String>,
    enabled_extensions: Vec<String>,
}

impl<I: InstanceDriver> Debug for Context<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.handle.raw_instance())
            .field("enabled_layers", &self.enabled_layers)
            .field("enabled_extensions", &self.enabled_extensions)
            .finish_non_exhaustive()
    }
}

impl<I: InstanceDriver> Drop for Context<I> {
    fn drop(&mut self) {
        if self.diagnostics.is_registered() {
            tracing::warn!(
                "Context dropped with diagnostics still registered, \
                 unregistering first"
            );
            if let Err(e) = self.diagnostics.unregister(&self.handle) {
                tracing::error!("{e}");
            }
        }
        tracing::debug!("Dropping context {:?}", self.handle.raw_instance());
        //SAFETY: We are in drop so this is the last use of the instance.
        //Diagnostics are gone and the owner destroyed every device first
        unsafe { self.handle.destroy_instance() };
    }
}

impl<I: InstanceDriver> Context<I> {
    /// Create the instance with `features` exactly as given.
    ///
    /// Layer validation is the caller's job (see
    /// [`RequestedFeatureSet::retain_supported_layers`]); extensions missing
    /// from `catalog` are only warned about. With `diagnostics` set, the
    /// debug report callback configuration is chained into the create info
    /// so that instance creation itself is covered.
    pub fn create<L>(
        loader: &L,
        catalog: CapabilityCatalog,
        features: &RequestedFeatureSet,
        app_name: &str,
        diagnostics: bool,
    ) -> Result<Self, BootError>
    where
        L: Loader<Instance = I>,
    {
        let app_name_cstring = CString::new(app_name)
            .map_err(|_| BootError::InvalidName(app_name.to_owned()))?;
        let layer_names = cstrings(&features.layers)?;
        let extension_names = cstrings(&features.extensions)?;

        for ext in &features.extensions {
            if !catalog.supports_extension(ext) {
                tracing::warn!(
                    "Instance extension {ext} is not reported by the driver"
                );
            }
        }

        let layer_ptrs = name_ptrs(&layer_names);
        let extension_ptrs = name_ptrs(&extension_names);

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstring)
            .application_version(APPLICATION_VERSION)
            .engine_name(ENGINE_NAME)
            .engine_version(APPLICATION_VERSION)
            .api_version(vk::API_VERSION_1_0);

        let mut report_info = DiagnosticChannel::create_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);
        if diagnostics {
            create_info = create_info.push_next(&mut report_info);
        }

        //SAFETY: We made a valid create_info; every name it points at
        //outlives the call
        let result = unsafe { loader.create_instance(&create_info) };
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("vkCreateInstance returned {e}");
                return Err(BootError::ContextCreation(e));
            }
        };
        tracing::info!(
            "vkCreateInstance succeeded with {} layer(s), {} extension(s)",
            features.layers.len(),
            features.extensions.len()
        );

        Ok(Self {
            handle,
            catalog,
            diagnostics: DiagnosticChannel::new(),
            enabled_layers: features.layers.clone(),
            enabled_extensions: features.extensions.clone(),
        })
    }

    /// Get the handles of every physical device. These handles are ONLY
    /// valid in the context of this instance.
    pub fn enumerate_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, BootError> {
        const CALL: &str = "vkEnumeratePhysicalDevices";

        let devices = read_two_call(CALL, |count, out| {
            self.handle.enumerate_physical_devices(count, out)
        })
        .map_err(|result| BootError::Enumeration { call: CALL, result })?;

        if devices.is_empty() {
            return Err(BootError::NoDeviceFound);
        }
        tracing::info!("Found {} physical device(s)", devices.len());
        Ok(devices)
    }

    pub fn register_diagnostics(&mut self) -> Result<(), BootError> {
        self.diagnostics.register(&self.handle)
    }

    pub fn unregister_diagnostics(&mut self) -> Result<(), BootError> {
        self.diagnostics.unregister(&self.handle)
    }

    pub fn diagnostics_registered(&self) -> bool {
        self.diagnostics.is_registered()
    }

    /// Destroy the instance.
    ///
    /// Consumes the context, so it cannot be destroyed twice.
    pub fn destroy(self) {
        tracing::debug!("Destroying context {:?}", self.handle.raw_instance());
        drop(self);
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub fn enabled_layers(&self) -> &[String] {
        &self.enabled_layers
    }

    pub fn enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    pub fn driver(&self) -> &I {
        &self.handle
    }

    pub fn raw_instance(&self) -> vk::Instance {
        self.handle.raw_instance()
    }
}
