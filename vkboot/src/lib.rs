//! Vulkan execution-context bootstrap, built on [`ash`].
//!
//! Discovers driver layers and extensions, creates the instance with a
//! validated feature set, wires the `VK_EXT_debug_report` callback, binds a
//! logical device to the first physical device's graphics queue, and tears
//! everything down again in reverse order.
//!
//! # Object hierarchy
//!
//! ```text
//! Application
//! ├── Context (VkInstance)
//! │   ├── CapabilityCatalog (global)
//! │   └── DiagnosticChannel
//! └── DeviceBinder (VkDevice)
//!     ├── PhysicalDeviceDescriptor
//!     └── CapabilityCatalog (device)
//! ```
//!
//! The device must be gone before the diagnostic callback, and both before
//! the instance. [`app::Application`] enforces that order.
//!
//! All driver access goes through the traits in [`driver`], so everything
//! above it can run against a scripted driver in tests.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod app;
pub mod catalog;
pub mod config;
pub mod context;
pub mod device;
pub mod diagnostic;
pub mod driver;
pub mod error;

pub use ash;
pub use error::{BootError, Severity};
