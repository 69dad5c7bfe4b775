//! The boundary between the bootstrap logic and the native Vulkan driver.
//!
//! Everything above this module talks to the driver through three traits:
//!
//! - [`Loader`]: global-scope entry points (layer and extension
//!   enumeration, instance creation).
//! - [`InstanceDriver`]: entry points dispatched through a live
//!   `VkInstance`.
//! - [`DeviceDriver`]: entry points dispatched through a live `VkDevice`.
//!
//! Enumeration methods expose the raw two-call protocol (count query with
//! no buffer, then a fill query) rather than ash's convenience wrappers so
//! that `VK_INCOMPLETE` handling lives in one place: [`read_two_call`].
//!
//! The production implementation dispatches through `ash`'s raw function
//! tables ([`AshLoader`], [`AshInstance`], and `ash::Device`).

use std::{
    ffi::{CStr, c_char},
    fmt::Debug,
    ptr,
};

use ash::vk;

use crate::error::BootError;

#[cfg(test)]
pub(crate) mod mock;

/// Global-scope driver entry points.
pub trait Loader {
    type Instance: InstanceDriver;

    /// `vkEnumerateInstanceLayerProperties`. With `out == None` only the
    /// count is written; otherwise `count` must equal `out.len()`.
    fn enumerate_layer_properties(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result;

    /// `vkEnumerateInstanceExtensionProperties`. `layer == None` queries the
    /// extensions provided by the driver and implicit layers.
    fn enumerate_extension_properties(
        &self,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result;

    /// Create the instance.
    ///
    /// # Safety
    /// `create_info` and everything it points at (including its `p_next`
    /// chain) must be valid for the duration of the call.
    unsafe fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo<'_>,
    ) -> Result<Self::Instance, vk::Result>;
}

/// Entry points dispatched through a live instance.
pub trait InstanceDriver {
    type Device: DeviceDriver;

    fn raw_instance(&self) -> vk::Instance;

    /// `vkEnumeratePhysicalDevices`, two-call shaped.
    fn enumerate_physical_devices(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> vk::Result;

    /// `vkEnumerateDeviceExtensionProperties`, two-call shaped.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    unsafe fn enumerate_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result;

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    unsafe fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties;

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    unsafe fn physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties;

    /// `vkGetPhysicalDeviceQueueFamilyProperties`, two-call shaped. This
    /// query has no status code.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    unsafe fn physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    );

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    /// `create_info` and everything it points at must be valid for the
    /// duration of the call.
    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<Self::Device, vk::Result>;

    /// `vkGetInstanceProcAddr` against this instance.
    ///
    /// # Safety
    /// The returned pointer must only be transmuted to the PFN type that
    /// matches `name`.
    unsafe fn instance_proc_addr(&self, name: &CStr) -> vk::PFN_vkVoidFunction;

    /// # Safety
    /// Must be called at most once, after every object derived from this
    /// instance has been destroyed.
    unsafe fn destroy_instance(&self);
}

/// Entry points dispatched through a live logical device.
pub trait DeviceDriver {
    fn raw_device(&self) -> vk::Device;

    /// # Safety
    /// `family` must have been requested at device creation with more than
    /// `index` queues.
    unsafe fn device_queue(&self, family: u32, index: u32) -> vk::Queue;

    /// # Safety
    /// Must be called at most once, after every object derived from this
    /// device has been destroyed.
    unsafe fn destroy_device(&self);
}

/// Run a two-call enumeration to completion.
///
/// The count query is issued with no buffer, a buffer of that size is
/// allocated, and the fill query is issued. If the fill query reports
/// `VK_INCOMPLETE` (the set grew between the two calls) the whole protocol
/// starts over. Negative status codes are returned as errors. The result is
/// truncated to the count reported by the final fill query.
pub fn read_two_call<T, F>(call_name: &str, mut call: F) -> Result<Vec<T>, vk::Result>
where
    T: Default + Clone,
    F: FnMut(&mut u32, Option<&mut [T]>) -> vk::Result,
{
    loop {
        let mut count = 0;
        let status = call(&mut count, None);
        if status.as_raw() < 0 {
            return Err(status);
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut data = vec![T::default(); count as usize];
        match call(&mut count, Some(&mut data)) {
            vk::Result::INCOMPLETE => {
                tracing::debug!(
                    "{call_name} reported VK_INCOMPLETE after sizing for \
                     {count} entries, querying again"
                );
            }
            status if status.as_raw() < 0 => return Err(status),
            _ => {
                data.truncate(count as usize);
                return Ok(data);
            }
        }
    }
}

/// [`read_two_call`] for queries that have no status code.
pub fn read_two_call_infallible<T, F>(mut call: F) -> Vec<T>
where
    T: Default + Clone,
    F: FnMut(&mut u32, Option<&mut [T]>),
{
    let mut count = 0;
    call(&mut count, None);
    let mut data = vec![T::default(); count as usize];
    call(&mut count, Some(&mut data));
    data.truncate(count as usize);
    data
}

fn out_ptr<T>(out: Option<&mut [T]>) -> *mut T {
    out.map_or(ptr::null_mut(), |buf| buf.as_mut_ptr())
}

fn name_ptr(name: Option<&CStr>) -> *const c_char {
    name.map_or(ptr::null(), CStr::as_ptr)
}

/// [`Loader`] backed by a dynamically loaded Vulkan library.
#[derive(Clone)]
pub struct AshLoader {
    entry: ash::Entry,
}

impl Debug for AshLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AshLoader").finish_non_exhaustive()
    }
}

impl AshLoader {
    /// Load the system Vulkan library.
    ///
    /// # Safety
    /// This loads vulkan using libloading, meaning that arbitrary
    /// initialization code in the loader library runs. Every object created
    /// through this loader must be destroyed before the last clone of it is
    /// dropped.
    pub unsafe fn load() -> Result<Self, BootError> {
        //SAFETY: Burden passed on to the caller
        let entry = unsafe { ash::Entry::load() }.map_err(BootError::Loading)?;
        Ok(Self { entry })
    }

    pub fn ash_entry(&self) -> &ash::Entry {
        &self.entry
    }
}

impl Loader for AshLoader {
    type Instance = AshInstance;

    fn enumerate_layer_properties(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result {
        // SAFETY: count is a valid pointer and out is either null or a
        // buffer of at least *count elements.
        unsafe {
            (self.entry.fp_v1_0().enumerate_instance_layer_properties)(
                count,
                out_ptr(out),
            )
        }
    }

    fn enumerate_extension_properties(
        &self,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        // SAFETY: layer is null or a NUL-terminated string, count is a valid
        // pointer and out is null or a buffer of at least *count elements.
        unsafe {
            (self.entry.fp_v1_0().enumerate_instance_extension_properties)(
                name_ptr(layer),
                count,
                out_ptr(out),
            )
        }
    }

    unsafe fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo<'_>,
    ) -> Result<AshInstance, vk::Result> {
        //SAFETY: create_info validity is guaranteed by the caller
        let handle = unsafe { self.entry.create_instance(create_info, None) }?;
        Ok(AshInstance {
            entry: self.entry.clone(),
            handle,
        })
    }
}

/// [`InstanceDriver`] backed by an `ash::Instance`.
///
/// Holds a clone of the entry so `vkGetInstanceProcAddr` stays reachable
/// and the library stays loaded for as long as the instance exists.
pub struct AshInstance {
    entry: ash::Entry,
    handle: ash::Instance,
}

impl Debug for AshInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AshInstance")
            .field("handle", &self.handle.handle())
            .finish_non_exhaustive()
    }
}

impl AshInstance {
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.handle
    }
}

impl InstanceDriver for AshInstance {
    type Device = ash::Device;

    fn raw_instance(&self) -> vk::Instance {
        self.handle.handle()
    }

    fn enumerate_physical_devices(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> vk::Result {
        // SAFETY: The instance handle is live for as long as self is. count
        // is valid and out is null or sized to *count.
        unsafe {
            (self.handle.fp_v1_0().enumerate_physical_devices)(
                self.handle.handle(),
                count,
                out_ptr(out),
            )
        }
    }

    unsafe fn enumerate_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        // SAFETY: physical_device was derived from this instance (passed on
        // to caller). Pointer arguments are valid as above.
        unsafe {
            (self.handle.fp_v1_0().enumerate_device_extension_properties)(
                physical_device,
                name_ptr(layer),
                count,
                out_ptr(out),
            )
        }
    }

    unsafe fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        //SAFETY: physical_device was derived from this instance
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    unsafe fn physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        //SAFETY: physical_device was derived from this instance
        unsafe {
            self.handle
                .get_physical_device_memory_properties(physical_device)
        }
    }

    unsafe fn physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) {
        //SAFETY: physical_device was derived from this instance, count is
        //valid and out is null or sized to *count
        unsafe {
            (self
                .handle
                .fp_v1_0()
                .get_physical_device_queue_family_properties)(
                physical_device,
                count,
                out_ptr(out),
            )
        }
    }

    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        //SAFETY: physical_device was derived from this instance,
        //create_info is valid
        unsafe {
            self.handle
                .create_device(physical_device, create_info, None)
        }
    }

    unsafe fn instance_proc_addr(&self, name: &CStr) -> vk::PFN_vkVoidFunction {
        // SAFETY: The instance handle is live and name is NUL-terminated.
        unsafe {
            self.entry
                .get_instance_proc_addr(self.handle.handle(), name.as_ptr())
        }
    }

    unsafe fn destroy_instance(&self) {
        tracing::debug!("Destroying instance {:?}", self.handle.handle());
        //SAFETY: Caller guarantees this is the last use of the instance and
        //that every derived object is gone
        unsafe { self.handle.destroy_instance(None) };
    }
}

impl DeviceDriver for ash::Device {
    fn raw_device(&self) -> vk::Device {
        self.handle()
    }

    unsafe fn device_queue(&self, family: u32, index: u32) -> vk::Queue {
        //SAFETY: Caller guarantees the queue was requested at creation
        unsafe { self.get_device_queue(family, index) }
    }

    unsafe fn destroy_device(&self) {
        tracing::debug!("Destroying device {:?}", self.handle());
        //SAFETY: Caller guarantees this is the last use of the device
        unsafe { ash::Device::destroy_device(self, None) };
    }
}
