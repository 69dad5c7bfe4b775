//! A scripted in-memory driver for unit tests.
//!
//! Every entry point appends a [`Call`] to a thread-local log so tests can
//! assert on ordering. libtest runs each test on its own thread, and
//! [`MockDriver::new`] clears the log anyway.

use std::{
    cell::{Cell, Ref, RefCell},
    ffi::{CStr, c_char},
    rc::Rc,
};

use ash::vk::{self, Handle};

use super::{DeviceDriver, InstanceDriver, Loader};

pub(crate) const INSTANCE_HANDLE: u64 = 0x1000;
pub(crate) const PHYSICAL_DEVICE_BASE: u64 = 0x2000;
pub(crate) const DEVICE_HANDLE: u64 = 0x3000;
pub(crate) const QUEUE_BASE: u64 = 0x4000;
pub(crate) const CALLBACK_HANDLE: u64 = 0x5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    EnumerateLayers,
    EnumerateExtensions(Option<String>),
    CreateInstance,
    EnumeratePhysicalDevices,
    EnumerateDeviceExtensions(Option<String>),
    GetQueueFamilies,
    CreateDevice,
    GetDeviceQueue { family: u32, index: u32 },
    CreateDebugReport,
    DestroyDebugReport,
    DestroyDevice,
    DestroyInstance,
}

thread_local! {
    static CALLS: RefCell<Vec<Call>> = const { RefCell::new(Vec::new()) };
    static CALLBACK_STATUS: Cell<vk::Result> =
        const { Cell::new(vk::Result::SUCCESS) };
}

fn record(call: Call) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

pub(crate) fn calls() -> Vec<Call> {
    CALLS.with(|calls| calls.borrow().clone())
}

/// Position of the first occurrence of `call` in the log.
pub(crate) fn position(call: &Call) -> Option<usize> {
    calls().iter().position(|c| c == call)
}

pub(crate) fn count(call: &Call) -> usize {
    calls().iter().filter(|c| *c == call).count()
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockLayer {
    pub name: String,
    pub description: String,
    pub extensions: Vec<(String, u32)>,
    pub device_extensions: Vec<(String, u32)>,
}

impl MockLayer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: format!("{name} test layer"),
            ..Default::default()
        }
    }

    pub fn with_extensions(mut self, exts: &[(&str, u32)]) -> Self {
        self.extensions = owned(exts);
        self
    }

    pub fn with_device_extensions(mut self, exts: &[(&str, u32)]) -> Self {
        self.device_extensions = owned(exts);
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockPhysicalDevice {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub driver_extensions: Vec<(String, u32)>,
}

impl MockPhysicalDevice {
    pub fn new(name: &str, families: &[vk::QueueFlags]) -> Self {
        Self {
            name: name.to_owned(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_families: families
                .iter()
                .map(|&queue_flags| vk::QueueFamilyProperties {
                    queue_flags,
                    queue_count: 2,
                    ..Default::default()
                })
                .collect(),
            driver_extensions: Vec::new(),
        }
    }

    pub fn with_driver_extensions(mut self, exts: &[(&str, u32)]) -> Self {
        self.driver_extensions = owned(exts);
        self
    }
}

/// What the last `vkCreateInstance` call asked for.
#[derive(Debug, Clone, Default)]
pub(crate) struct InstanceRequest {
    pub application_name: String,
    pub api_version: u32,
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
    pub debug_report_chained: bool,
}

/// What the last `vkCreateDevice` call asked for.
#[derive(Debug, Clone)]
pub(crate) struct DeviceRequest {
    pub physical_device: vk::PhysicalDevice,
    pub queue_create_infos: u32,
    pub queue_family: u32,
    pub queue_count: u32,
    pub priority: f32,
    pub layer_count: u32,
    pub extensions: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub layers: Vec<MockLayer>,
    pub instance_extensions: Vec<(String, u32)>,
    pub devices: Vec<MockPhysicalDevice>,
    /// Number of layer count queries that under-report by one, forcing
    /// `VK_INCOMPLETE` on the following fill query.
    pub stale_layer_counts: u32,
    pub layer_status: Option<vk::Result>,
    pub failing_extension_layers: Vec<String>,
    pub create_instance_status: Option<vk::Result>,
    pub create_device_status: Option<vk::Result>,
    pub missing_entry_points: Vec<&'static CStr>,
    pub create_callback_status: Option<vk::Result>,

    pub instance_request: Option<InstanceRequest>,
    pub device_request: Option<DeviceRequest>,
}

impl MockState {
    /// One layer, one GPU with a graphics family at index 0, and the
    /// debug report extension available.
    pub fn single_gpu() -> Self {
        Self {
            layers: vec![MockLayer::new("LayerA")],
            instance_extensions: owned(&[
                ("VK_KHR_surface", 25),
                ("VK_EXT_debug_report", 10),
            ]),
            devices: vec![
                MockPhysicalDevice::new(
                    "Mock GPU",
                    &[vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE],
                )
                .with_driver_extensions(&[("VK_KHR_swapchain", 70)]),
            ],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockDriver {
    state: Rc<RefCell<MockState>>,
}

impl MockDriver {
    pub fn new(state: MockState) -> Self {
        CALLS.with(|calls| calls.borrow_mut().clear());
        CALLBACK_STATUS.with(|status| status.set(vk::Result::SUCCESS));
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn state(&self) -> Ref<'_, MockState> {
        self.state.borrow()
    }
}

#[derive(Debug)]
pub(crate) struct MockInstance {
    state: Rc<RefCell<MockState>>,
}

#[derive(Debug)]
pub(crate) struct MockDevice;

impl Loader for MockDriver {
    type Instance = MockInstance;

    fn enumerate_layer_properties(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> vk::Result {
        record(Call::EnumerateLayers);
        let mut state = self.state.borrow_mut();
        if let Some(status) = state.layer_status {
            return status;
        }
        let layers: Vec<_> = state.layers.iter().map(layer_properties).collect();
        if out.is_none() && state.stale_layer_counts > 0 && !layers.is_empty() {
            state.stale_layer_counts -= 1;
            *count = layers.len() as u32 - 1;
            return vk::Result::SUCCESS;
        }
        fill(&layers, count, out)
    }

    fn enumerate_extension_properties(
        &self,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        let layer = layer.map(|name| name.to_string_lossy().into_owned());
        record(Call::EnumerateExtensions(layer.clone()));
        let state = self.state.borrow();
        let exts = match layer {
            None => &state.instance_extensions,
            Some(name) => {
                if state.failing_extension_layers.contains(&name) {
                    return vk::Result::ERROR_LAYER_NOT_PRESENT;
                }
                match state.layers.iter().find(|l| l.name == name) {
                    Some(layer) => &layer.extensions,
                    None => return vk::Result::ERROR_LAYER_NOT_PRESENT,
                }
            }
        };
        fill(&extension_properties(exts), count, out)
    }

    unsafe fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo<'_>,
    ) -> Result<MockInstance, vk::Result> {
        record(Call::CreateInstance);
        // SAFETY: The caller guarantees create_info is valid.
        let request = unsafe { read_instance_request(create_info) };
        let mut state = self.state.borrow_mut();
        state.instance_request = Some(request);
        if let Some(status) = state.create_instance_status {
            return Err(status);
        }
        Ok(MockInstance {
            state: Rc::clone(&self.state),
        })
    }
}

impl MockInstance {
    fn device(&self, physical_device: vk::PhysicalDevice) -> MockPhysicalDevice {
        let index = (physical_device.as_raw() - PHYSICAL_DEVICE_BASE) as usize;
        self.state.borrow().devices[index].clone()
    }
}

impl InstanceDriver for MockInstance {
    type Device = MockDevice;

    fn raw_instance(&self) -> vk::Instance {
        vk::Instance::from_raw(INSTANCE_HANDLE)
    }

    fn enumerate_physical_devices(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> vk::Result {
        record(Call::EnumeratePhysicalDevices);
        let handles: Vec<_> = (0..self.state.borrow().devices.len() as u64)
            .map(|i| vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + i))
            .collect();
        fill(&handles, count, out)
    }

    unsafe fn enumerate_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> vk::Result {
        let layer = layer.map(|name| name.to_string_lossy().into_owned());
        record(Call::EnumerateDeviceExtensions(layer.clone()));
        let exts = match layer {
            None => self.device(physical_device).driver_extensions,
            Some(name) => {
                let state = self.state.borrow();
                if state.failing_extension_layers.contains(&name) {
                    return vk::Result::ERROR_LAYER_NOT_PRESENT;
                }
                match state.layers.iter().find(|l| l.name == name) {
                    Some(layer) => layer.device_extensions.clone(),
                    None => return vk::Result::ERROR_LAYER_NOT_PRESENT,
                }
            }
        };
        fill(&extension_properties(&exts), count, out)
    }

    unsafe fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        let device = self.device(physical_device);
        let mut props = vk::PhysicalDeviceProperties {
            api_version: vk::make_api_version(0, 1, 3, 275),
            device_type: device.device_type,
            ..Default::default()
        };
        write_chars(&mut props.device_name, &device.name);
        props
    }

    unsafe fn physical_device_memory_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        }
    }

    unsafe fn physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) {
        record(Call::GetQueueFamilies);
        fill(&self.device(physical_device).queue_families, count, out);
    }

    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<MockDevice, vk::Result> {
        record(Call::CreateDevice);
        // SAFETY: The caller guarantees create_info is valid.
        let request =
            unsafe { read_device_request(physical_device, create_info) };
        let mut state = self.state.borrow_mut();
        state.device_request = Some(request);
        if let Some(status) = state.create_device_status {
            return Err(status);
        }
        Ok(MockDevice)
    }

    unsafe fn instance_proc_addr(&self, name: &CStr) -> vk::PFN_vkVoidFunction {
        let state = self.state.borrow();
        if state.missing_entry_points.iter().any(|missing| *missing == name) {
            return None;
        }
        CALLBACK_STATUS.with(|status| {
            status.set(state.create_callback_status.unwrap_or(vk::Result::SUCCESS))
        });
        if name == c"vkCreateDebugReportCallbackEXT" {
            let create: vk::PFN_vkCreateDebugReportCallbackEXT =
                fake_create_debug_report;
            // SAFETY: Only transmuted back to the matching PFN type.
            Some(unsafe {
                std::mem::transmute::<
                    vk::PFN_vkCreateDebugReportCallbackEXT,
                    unsafe extern "system" fn(),
                >(create)
            })
        } else if name == c"vkDestroyDebugReportCallbackEXT" {
            let destroy: vk::PFN_vkDestroyDebugReportCallbackEXT =
                fake_destroy_debug_report;
            // SAFETY: Only transmuted back to the matching PFN type.
            Some(unsafe {
                std::mem::transmute::<
                    vk::PFN_vkDestroyDebugReportCallbackEXT,
                    unsafe extern "system" fn(),
                >(destroy)
            })
        } else {
            None
        }
    }

    unsafe fn destroy_instance(&self) {
        record(Call::DestroyInstance);
    }
}

impl DeviceDriver for MockDevice {
    fn raw_device(&self) -> vk::Device {
        vk::Device::from_raw(DEVICE_HANDLE)
    }

    unsafe fn device_queue(&self, family: u32, index: u32) -> vk::Queue {
        record(Call::GetDeviceQueue { family, index });
        vk::Queue::from_raw(QUEUE_BASE + u64::from(family))
    }

    unsafe fn destroy_device(&self) {
        record(Call::DestroyDevice);
    }
}

unsafe extern "system" fn fake_create_debug_report(
    _instance: vk::Instance,
    _create_info: *const vk::DebugReportCallbackCreateInfoEXT<'_>,
    _allocator: *const vk::AllocationCallbacks<'_>,
    callback: *mut vk::DebugReportCallbackEXT,
) -> vk::Result {
    record(Call::CreateDebugReport);
    let status = CALLBACK_STATUS.with(Cell::get);
    if status.as_raw() >= 0 {
        // SAFETY: The caller passes a valid out pointer.
        unsafe { *callback = vk::DebugReportCallbackEXT::from_raw(CALLBACK_HANDLE) };
    }
    status
}

unsafe extern "system" fn fake_destroy_debug_report(
    _instance: vk::Instance,
    _callback: vk::DebugReportCallbackEXT,
    _allocator: *const vk::AllocationCallbacks<'_>,
) {
    record(Call::DestroyDebugReport);
}

fn owned(exts: &[(&str, u32)]) -> Vec<(String, u32)> {
    exts.iter()
        .map(|&(name, version)| (name.to_owned(), version))
        .collect()
}

fn write_chars(dst: &mut [c_char], src: &str) {
    let max = dst.len() - 1;
    for (d, b) in dst.iter_mut().zip(src.bytes().take(max)) {
        *d = b as c_char;
    }
}

fn layer_properties(layer: &MockLayer) -> vk::LayerProperties {
    let mut props = vk::LayerProperties {
        spec_version: vk::API_VERSION_1_0,
        implementation_version: 1,
        ..Default::default()
    };
    write_chars(&mut props.layer_name, &layer.name);
    write_chars(&mut props.description, &layer.description);
    props
}

fn extension_properties(exts: &[(String, u32)]) -> Vec<vk::ExtensionProperties> {
    exts.iter()
        .map(|(name, version)| {
            let mut props = vk::ExtensionProperties {
                spec_version: *version,
                ..Default::default()
            };
            write_chars(&mut props.extension_name, name);
            props
        })
        .collect()
}

fn fill<T: Copy>(items: &[T], count: &mut u32, out: Option<&mut [T]>) -> vk::Result {
    match out {
        None => {
            *count = items.len() as u32;
            vk::Result::SUCCESS
        }
        Some(buf) => {
            let written = buf.len().min(items.len()).min(*count as usize);
            buf[..written].copy_from_slice(&items[..written]);
            *count = written as u32;
            if written < items.len() {
                vk::Result::INCOMPLETE
            } else {
                vk::Result::SUCCESS
            }
        }
    }
}

unsafe fn read_names(names: *const *const c_char, count: u32) -> Vec<String> {
    if names.is_null() {
        return Vec::new();
    }
    (0..count as usize)
        .map(|i| {
            // SAFETY: The caller guarantees `count` valid string pointers.
            unsafe { CStr::from_ptr(*names.add(i)) }
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

unsafe fn read_instance_request(info: &vk::InstanceCreateInfo<'_>) -> InstanceRequest {
    let mut request = InstanceRequest::default();
    if !info.p_application_info.is_null() {
        // SAFETY: Non-null application info from a valid create info.
        let app = unsafe { &*info.p_application_info };
        request.api_version = app.api_version;
        if !app.p_application_name.is_null() {
            // SAFETY: As above.
            request.application_name =
                unsafe { CStr::from_ptr(app.p_application_name) }
                    .to_string_lossy()
                    .into_owned();
        }
    }
    // SAFETY: Counts and pointers come from a valid create info.
    unsafe {
        request.layers =
            read_names(info.pp_enabled_layer_names, info.enabled_layer_count);
        request.extensions = read_names(
            info.pp_enabled_extension_names,
            info.enabled_extension_count,
        );
    }

    let mut next = info.p_next.cast::<vk::BaseInStructure<'_>>();
    while !next.is_null() {
        // SAFETY: Every p_next entry starts with sType/pNext.
        let base = unsafe { &*next };
        if base.s_type == vk::StructureType::DEBUG_REPORT_CALLBACK_CREATE_INFO_EXT
        {
            request.debug_report_chained = true;
        }
        next = base.p_next;
    }
    request
}

unsafe fn read_device_request(
    physical_device: vk::PhysicalDevice,
    info: &vk::DeviceCreateInfo<'_>,
) -> DeviceRequest {
    // SAFETY: A valid create info has at least one queue create info.
    let queue = unsafe { &*info.p_queue_create_infos };
    DeviceRequest {
        physical_device,
        queue_create_infos: info.queue_create_info_count,
        queue_family: queue.queue_family_index,
        queue_count: queue.queue_count,
        // SAFETY: queue_count >= 1 priorities follow the pointer.
        priority: unsafe { *queue.p_queue_priorities },
        layer_count: info.enabled_layer_count,
        // SAFETY: Counts and pointers come from a valid create info.
        extensions: unsafe {
            read_names(
                info.pp_enabled_extension_names,
                info.enabled_extension_count,
            )
        },
    }
}
