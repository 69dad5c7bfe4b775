//! Logical device binding ([`DeviceBinder`]).
//!
//! `DeviceBinder` snapshots one physical device, picks its first
//! graphics-capable queue family, and creates a logical device with a
//! single queue from that family. It also owns the device-scoped
//! [`CapabilityCatalog`], built from the global layer list it is handed.
//!
//! Queue family selection only looks at the GRAPHICS bit. Presentation
//! support is not checked, so a caller that later presents from the
//! retrieved queue has to verify it against its surface itself.

use std::fmt::Debug;

use ash::vk;

use crate::{
    catalog::{CapabilityCatalog, LayerRecord, RequestedFeatureSet},
    context::{VkVersion, cstrings, name_ptrs},
    driver::{DeviceDriver, InstanceDriver, read_two_call_infallible},
    error::BootError,
};

/// Priority of the single queue requested at device creation.
pub const QUEUE_PRIORITY: f32 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyDescriptor {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
}

impl QueueFamilyDescriptor {
    pub fn supports_graphics(&self) -> bool {
        self.flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

impl From<vk::QueueFamilyProperties> for QueueFamilyDescriptor {
    fn from(props: vk::QueueFamilyProperties) -> Self {
        Self {
            flags: props.queue_flags,
            queue_count: props.queue_count,
        }
    }
}

/// Index of the first family with the GRAPHICS bit, if any.
///
/// Never falls back to family 0.
pub fn select_graphics_family(
    families: &[QueueFamilyDescriptor],
) -> Option<u32> {
    families
        .iter()
        .position(QueueFamilyDescriptor::supports_graphics)
        .map(|idx| idx as u32)
}

/// A read-only snapshot of one physical device.
#[derive(Clone)]
pub struct PhysicalDeviceDescriptor {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<QueueFamilyDescriptor>,
}

impl Debug for PhysicalDeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceDescriptor")
            .field("handle", &self.handle)
            .field("name", &self.name())
            .field("device_type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish_non_exhaustive()
    }
}

impl PhysicalDeviceDescriptor {
    /// Read properties, memory properties and queue families.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from `instance`.
    pub unsafe fn snapshot<I: InstanceDriver>(
        instance: &I,
        physical_device: vk::PhysicalDevice,
    ) -> Self {
        // SAFETY: physical_device was derived from instance (passed on to
        // caller).
        let (properties, memory_properties) = unsafe {
            (
                instance.physical_device_properties(physical_device),
                instance.physical_device_memory_properties(physical_device),
            )
        };
        let queue_families = read_two_call_infallible(|count, out| {
            // SAFETY: As above.
            unsafe {
                instance.physical_device_queue_family_properties(
                    physical_device,
                    count,
                    out,
                )
            }
        })
        .into_iter()
        .map(QueueFamilyDescriptor::from)
        .collect();

        Self {
            handle: physical_device,
            properties,
            memory_properties,
            queue_families,
        }
    }

    pub fn name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_owned())
    }

    pub fn api_version(&self) -> VkVersion {
        VkVersion::from_raw(self.properties.api_version)
    }

    fn report(&self) {
        tracing::info!(
            "Physical device: {} (type: {:?}, API {})",
            self.name(),
            self.properties.device_type,
            self.api_version()
        );
        tracing::info!(
            "Memory: {} heap(s), {} type(s)",
            self.memory_properties.memory_heap_count,
            self.memory_properties.memory_type_count
        );
        for (idx, family) in self.queue_families.iter().enumerate() {
            tracing::debug!(
                "Queue family {idx}: {:?} x{}",
                family.flags,
                family.queue_count
            );
        }
    }
}

/// A logical device bound to one physical device.
///
/// Must be destroyed (or dropped) before the context it came from.
pub struct DeviceBinder<D: DeviceDriver> {
    physical: PhysicalDeviceDescriptor,
    catalog: CapabilityCatalog,
    device: D,
    graphics_family: u32,
    queue: Option<vk::Queue>,
    enabled_extensions: Vec<String>,
}

impl<D: DeviceDriver> Debug for DeviceBinder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBinder")
            .field("handle", &self.device.raw_device())
            .field("physical", &self.physical.handle)
            .field("graphics_family", &self.graphics_family)
            .finish_non_exhaustive()
    }
}

impl<D: DeviceDriver> Drop for DeviceBinder<D> {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.device.raw_device());
        //SAFETY: All objects derived from this device should be dropped
        //before this device is dropped.
        unsafe { self.device.destroy_device() };
    }
}

impl<D: DeviceDriver> DeviceBinder<D> {
    /// Create a logical device on `physical_device`.
    ///
    /// `global_layers` seeds the device-scoped catalog. Layer names in
    /// `features` are accepted but not passed to the driver; only the
    /// extensions are enabled.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from `instance`,
    /// and the returned binder must not outlive `instance`.
    pub unsafe fn bind<I>(
        instance: &I,
        physical_device: vk::PhysicalDevice,
        global_layers: &[LayerRecord],
        features: &RequestedFeatureSet,
    ) -> Result<Self, BootError>
    where
        I: InstanceDriver<Device = D>,
    {
        // SAFETY: physical_device was derived from instance (passed on to
        // caller).
        let catalog = unsafe {
            CapabilityCatalog::for_device(instance, physical_device, global_layers)
        };
        // SAFETY: As above.
        let physical = unsafe {
            PhysicalDeviceDescriptor::snapshot(instance, physical_device)
        };
        physical.report();

        let graphics_family = select_graphics_family(&physical.queue_families)
            .ok_or_else(|| BootError::NoGraphicsQueue {
                device: physical.name(),
            })?;
        tracing::info!("Graphics queue family: {graphics_family}");

        if !features.layers.is_empty() {
            tracing::debug!(
                "Ignoring {} device layer(s), device layers are deprecated",
                features.layers.len()
            );
        }
        for ext in &features.extensions {
            if !catalog.supports_extension(ext) {
                tracing::warn!(
                    "Device extension {ext} is not reported by {}",
                    physical.name()
                );
            }
        }
        let extension_names = cstrings(&features.extensions)?;
        let ext_ptrs = name_ptrs(&extension_names);

        let priorities = [QUEUE_PRIORITY];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_family)
            .queue_priorities(&priorities)];
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&ext_ptrs);

        // SAFETY: physical_device was derived from instance;
        // device_create_info is fully initialised above.
        let device = unsafe {
            instance.create_device(physical_device, &device_create_info)
        }
        .map_err(|e| {
            tracing::error!("vkCreateDevice returned {e}");
            BootError::DeviceCreation(e)
        })?;
        tracing::info!("Created logical device on {}", physical.name());

        Ok(Self {
            physical,
            catalog,
            device,
            graphics_family,
            queue: None,
            enabled_extensions: features.extensions.clone(),
        })
    }

    /// Get queue 0 of `family` and remember it.
    ///
    /// Only the graphics family chosen at bind time has a queue. Any other
    /// family is rejected without calling the driver.
    pub fn retrieve_queue(&mut self, family: u32) -> Result<vk::Queue, BootError> {
        if family != self.graphics_family {
            return Err(BootError::QueueNotRequested {
                family,
                requested: self.graphics_family,
            });
        }
        // SAFETY: one queue from the graphics family was requested at
        // creation.
        let queue = unsafe { self.device.device_queue(family, 0) };
        tracing::debug!("Retrieved queue {queue:?} from family {family}");
        self.queue = Some(queue);
        Ok(queue)
    }

    /// Destroy the logical device.
    pub fn destroy(self) {
        tracing::debug!("Destroying device binder on {}", self.physical.name());
        drop(self);
    }

    pub fn physical(&self) -> &PhysicalDeviceDescriptor {
        &self.physical
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    pub fn queue(&self) -> Option<vk::Queue> {
        self.queue
    }

    pub fn enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}
