//! Bootstrap configuration.
//!
//! [`BootConfig`] carries the requested layer and extension lists. The
//! defaults are compiled in; a TOML file may override any subset of the
//! fields and the rest keep their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::RequestedFeatureSet;

/// Validation layers requested when nothing else is configured.
pub const DEFAULT_LAYERS: &[&str] = &[
    "VK_LAYER_GOOGLE_threading",
    "VK_LAYER_LUNARG_api_dump",
    "VK_LAYER_LUNARG_core_validation",
    "VK_LAYER_LUNARG_image",
    "VK_LAYER_LUNARG_object_tracker",
    "VK_LAYER_LUNARG_parameter_validation",
    "VK_LAYER_LUNARG_swapchain",
    "VK_LAYER_GOOGLE_unique_objects",
    "VK_LAYER_KHRONOS_validation",
];

#[cfg(target_os = "windows")]
const PLATFORM_SURFACE: &std::ffi::CStr = ash::khr::win32_surface::NAME;
#[cfg(target_os = "android")]
const PLATFORM_SURFACE: &std::ffi::CStr = ash::khr::android_surface::NAME;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const PLATFORM_SURFACE: &std::ffi::CStr = ash::ext::metal_surface::NAME;
#[cfg(not(any(
    target_os = "windows",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
const PLATFORM_SURFACE: &std::ffi::CStr = ash::khr::xlib_surface::NAME;

fn owned_name(name: &std::ffi::CStr) -> String {
    name.to_string_lossy().into_owned()
}

pub fn default_instance_extensions() -> Vec<String> {
    [
        ash::khr::surface::NAME,
        PLATFORM_SURFACE,
        ash::ext::debug_report::NAME,
    ]
    .into_iter()
    .map(owned_name)
    .collect()
}

pub fn default_device_extensions() -> Vec<String> {
    vec![owned_name(ash::khr::swapchain::NAME)]
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Reported to the driver as the application name.
    pub app_name: String,
    pub layers: Vec<String>,
    pub instance_extensions: Vec<String>,
    pub device_extensions: Vec<String>,
    /// Drop requested layers the driver does not report before creating
    /// the context. With this off, the list is passed through unchanged.
    pub validate_layers: bool,
    /// Chain and register the debug report callback.
    pub diagnostics: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            app_name: "vkboot".to_owned(),
            layers: DEFAULT_LAYERS.iter().map(|&l| l.to_owned()).collect(),
            instance_extensions: default_instance_extensions(),
            device_extensions: default_device_extensions(),
            validate_layers: true,
            diagnostics: true,
        }
    }
}

impl BootConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn instance_features(&self) -> RequestedFeatureSet {
        RequestedFeatureSet {
            layers: self.layers.clone(),
            extensions: self.instance_extensions.clone(),
        }
    }

    /// Device features use the layer list the context was created with.
    pub fn device_features(&self, layers: &[String]) -> RequestedFeatureSet {
        RequestedFeatureSet {
            layers: layers.to_vec(),
            extensions: self.device_extensions.clone(),
        }
    }
}
