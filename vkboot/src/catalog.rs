//! Layer and extension discovery.
//!
//! A [`CapabilityCatalog`] is a read-only snapshot of what the driver
//! supports at one scope: global (instance level) or one physical device.
//! The two scopes are independent collections and are never merged. The
//! device-scoped catalog is built from the global layer list, which is
//! handed in by the caller.
//!
//! [`validate_requested`] is advisory: unsupported layer names are logged and
//! dropped, and the handshake continues with whatever is left.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::{
    driver::{InstanceDriver, Loader, read_two_call},
    error::BootError,
};

/// One extension exposed by a layer or by the driver itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRecord {
    pub name: String,
    pub version: u32,
}

impl From<&vk::ExtensionProperties> for ExtensionRecord {
    fn from(props: &vk::ExtensionProperties) -> Self {
        Self {
            name: props
                .extension_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            version: props.spec_version,
        }
    }
}

/// One layer and the extensions it exposes at the catalog's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRecord {
    pub name: String,
    pub description: String,
    pub spec_version: u32,
    pub implementation_version: u32,
    pub extensions: Vec<ExtensionRecord>,
}

impl LayerRecord {
    fn from_properties(props: &vk::LayerProperties) -> Self {
        Self {
            name: props
                .layer_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            description: props
                .description_as_c_str()
                .map(|desc| desc.to_string_lossy().into_owned())
                .unwrap_or_default(),
            spec_version: props.spec_version,
            implementation_version: props.implementation_version,
            extensions: Vec::new(),
        }
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Device(vk::PhysicalDevice),
}

/// Layer and extension names an application asks for.
///
/// Only [`retain_supported_layers`](Self::retain_supported_layers) mutates
/// it, removing unsupported layers in place and keeping the order of the
/// rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedFeatureSet {
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
}

impl RequestedFeatureSet {
    pub fn new(
        layers: impl IntoIterator<Item = impl Into<String>>,
        extensions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            layers: layers.into_iter().map(Into::into).collect(),
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn retain_supported_layers(&mut self, catalog: &CapabilityCatalog) {
        self.layers = validate_requested(&self.layers, catalog.layers());
    }
}

/// Split `requested` into the names present in `available` and the names
/// that are not, keeping the order of each.
pub fn partition_requested<S: AsRef<str>>(
    requested: &[S],
    available: &[LayerRecord],
) -> (Vec<String>, Vec<String>) {
    let mut supported = Vec::with_capacity(requested.len());
    let mut unsupported = Vec::new();
    for name in requested {
        let name = name.as_ref();
        if available.iter().any(|layer| layer.name == name) {
            supported.push(name.to_owned());
        } else {
            unsupported.push(name.to_owned());
        }
    }
    (supported, unsupported)
}

/// Return the subsequence of `requested` that `available` supports.
///
/// Each excluded entry is logged once.
pub fn validate_requested<S: AsRef<str>>(
    requested: &[S],
    available: &[LayerRecord],
) -> Vec<String> {
    let (supported, unsupported) = partition_requested(requested, available);
    for name in &supported {
        tracing::info!("Layer supported: {name}");
    }
    for (idx, name) in unsupported.iter().enumerate() {
        if unsupported[..idx].contains(name) {
            continue;
        }
        tracing::warn!("No layer support found, removing layer: {name}");
    }
    supported
}

/// Query every global layer, with each layer's global extensions attached.
///
/// Fails if the layer query itself fails or reports no layers. A layer
/// whose extension query fails is kept with an empty extension list.
pub fn query_layers<L: Loader>(loader: &L) -> Result<Vec<LayerRecord>, BootError> {
    const CALL: &str = "vkEnumerateInstanceLayerProperties";

    let props = read_two_call(CALL, |count, out| {
        loader.enumerate_layer_properties(count, out)
    })
    .map_err(|result| BootError::Enumeration { call: CALL, result })?;

    if props.is_empty() {
        return Err(BootError::EmptyEnumeration { call: CALL });
    }

    Ok(props
        .iter()
        .map(|props| {
            let mut layer = LayerRecord::from_properties(props);
            layer.extensions = absorb_extension_failure(
                &layer.name,
                layer_cstring(&layer.name).and_then(|name| {
                    query_extensions(loader, Some(name.as_c_str()))
                }),
            );
            layer
        })
        .collect())
}

/// Query the global extensions exposed by `layer`, or by the driver and
/// implicit layers when `layer` is `None`.
pub fn query_extensions<L: Loader>(
    loader: &L,
    layer: Option<&CStr>,
) -> Result<Vec<ExtensionRecord>, BootError> {
    read_two_call("vkEnumerateInstanceExtensionProperties", |count, out| {
        loader.enumerate_extension_properties(layer, count, out)
    })
    .map(|props| props.iter().map(ExtensionRecord::from).collect())
    .map_err(|result| extension_query_error(layer, result))
}

/// Query the device extensions exposed by `layer` on `physical_device`.
///
/// # Safety
/// `physical_device` must be a valid handle derived from `instance`.
pub unsafe fn query_device_extensions<I: InstanceDriver>(
    instance: &I,
    physical_device: vk::PhysicalDevice,
    layer: Option<&CStr>,
) -> Result<Vec<ExtensionRecord>, BootError> {
    read_two_call("vkEnumerateDeviceExtensionProperties", |count, out| {
        // SAFETY: physical_device was derived from instance (passed on to
        // caller).
        unsafe {
            instance.enumerate_device_extension_properties(
                physical_device,
                layer,
                count,
                out,
            )
        }
    })
    .map(|props| props.iter().map(ExtensionRecord::from).collect())
    .map_err(|result| extension_query_error(layer, result))
}

fn extension_query_error(layer: Option<&CStr>, result: vk::Result) -> BootError {
    BootError::ExtensionQuery {
        layer: layer
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<driver>".to_owned()),
        result,
    }
}

fn layer_cstring(name: &str) -> Result<CString, BootError> {
    CString::new(name).map_err(|_| BootError::InvalidName(name.to_owned()))
}

fn absorb_extension_failure(
    layer: &str,
    result: Result<Vec<ExtensionRecord>, BootError>,
) -> Vec<ExtensionRecord> {
    match result {
        Ok(extensions) => extensions,
        Err(e) => {
            tracing::warn!(
                "Treating layer {layer} as having no extensions: {e}"
            );
            Vec::new()
        }
    }
}

/// What the driver supports at one scope.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    scope: Scope,
    layers: Vec<LayerRecord>,
    driver_extensions: Vec<ExtensionRecord>,
}

impl CapabilityCatalog {
    /// Build the global catalog and report its contents.
    pub fn global<L: Loader>(loader: &L) -> Result<Self, BootError> {
        let layers = query_layers(loader)?;
        Ok(Self::global_with_layers(loader, layers))
    }

    /// The global catalog for a driver whose layer query failed or came
    /// back empty. Only the driver's own extensions are recorded.
    pub fn without_layers<L: Loader>(loader: &L) -> Self {
        Self::global_with_layers(loader, Vec::new())
    }

    fn global_with_layers<L: Loader>(loader: &L, layers: Vec<LayerRecord>) -> Self {
        let driver_extensions =
            absorb_extension_failure("<driver>", query_extensions(loader, None));

        let catalog = Self {
            scope: Scope::Global,
            layers,
            driver_extensions,
        };
        catalog.report();
        catalog
    }

    /// Build the catalog for one physical device from the global layer list.
    ///
    /// Never fails: a layer whose device extension query fails is recorded
    /// with no extensions.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from `instance`.
    pub unsafe fn for_device<I: InstanceDriver>(
        instance: &I,
        physical_device: vk::PhysicalDevice,
        global_layers: &[LayerRecord],
    ) -> Self {
        let layers = global_layers
            .iter()
            .map(|global| {
                let extensions = absorb_extension_failure(
                    &global.name,
                    layer_cstring(&global.name).and_then(|name| {
                        // SAFETY: physical_device was derived from instance
                        // (passed on to caller).
                        unsafe {
                            query_device_extensions(
                                instance,
                                physical_device,
                                Some(name.as_c_str()),
                            )
                        }
                    }),
                );
                LayerRecord {
                    extensions,
                    ..global.clone()
                }
            })
            .collect();

        // SAFETY: As above.
        let driver_extensions = absorb_extension_failure("<driver>", unsafe {
            query_device_extensions(instance, physical_device, None)
        });

        let catalog = Self {
            scope: Scope::Device(physical_device),
            layers,
            driver_extensions,
        };
        catalog.report();
        catalog
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn layers(&self) -> &[LayerRecord] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&LayerRecord> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn supports_layer(&self, name: &str) -> bool {
        self.layer(name).is_some()
    }

    /// Extensions provided by the driver and implicit layers.
    pub fn driver_extensions(&self) -> &[ExtensionRecord] {
        &self.driver_extensions
    }

    /// Whether `name` is provided by the driver or by any known layer.
    pub fn supports_extension(&self, name: &str) -> bool {
        self.driver_extensions.iter().any(|ext| ext.name == name)
            || self.layers.iter().any(|layer| layer.has_extension(name))
    }

    fn report(&self) {
        let (heading, ext_label) = match self.scope {
            Scope::Global => ("Instance layers", "Layer Extension"),
            Scope::Device(_) => ("Device layers", "Device Extension"),
        };
        tracing::info!("{heading}");
        for layer in &self.layers {
            tracing::info!(
                "{} | [Layer Name] {}",
                layer.description,
                layer.name
            );
            if layer.extensions.is_empty() && matches!(self.scope, Scope::Device(_)) {
                tracing::info!("    [{ext_label}] No extension found");
            }
            for ext in &layer.extensions {
                tracing::info!(
                    "    [{ext_label}] {} (rev {})",
                    ext.name,
                    ext.version
                );
            }
        }
        for ext in &self.driver_extensions {
            tracing::debug!("[Driver {ext_label}] {} (rev {})", ext.name, ext.version);
        }
    }
}
