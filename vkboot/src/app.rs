//! The application controller ([`Application`]).
//!
//! `Application` owns the loader, the [`Context`] and the [`DeviceBinder`]
//! and runs the handshake in order:
//!
//! ```text
//! global catalog -> layer validation -> context -> diagnostics
//!     -> physical devices -> device binding -> graphics queue
//! ```
//!
//! Teardown is the exact reverse (device, diagnostics, context). The
//! individual teardown methods refuse to run out of order, and a failed
//! [`Application::initialize`] rolls back whatever it had created.
//!
//! Lifecycle: `Uninitialized -> Initialized -> (Prepared) -> Deinitialized`,
//! or `Uninitialized -> Failed` when initialization aborts. There is no way
//! back to an earlier state.

use std::fmt::Debug;

use thiserror::Error;

use crate::{
    catalog::CapabilityCatalog,
    config::BootConfig,
    context::Context,
    device::DeviceBinder,
    driver::{InstanceDriver, Loader},
    error::BootError,
};

type DeviceOf<L> = <<L as Loader>::Instance as InstanceDriver>::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Prepared,
    Deinitialized,
    Failed,
}

impl Lifecycle {
    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Initialized => "initialized",
            Lifecycle::Prepared => "prepared",
            Lifecycle::Deinitialized => "deinitialized",
            Lifecycle::Failed => "failed",
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Lifecycle::Initialized | Lifecycle::Prepared)
    }
}

/// The initialization step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lifecycle,
    CapabilityQuery,
    ContextCreation,
    Diagnostics,
    DeviceEnumeration,
    DeviceBinding,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Lifecycle => "lifecycle check",
            Stage::CapabilityQuery => "capability query",
            Stage::ContextCreation => "context creation",
            Stage::Diagnostics => "diagnostic registration",
            Stage::DeviceEnumeration => "physical device enumeration",
            Stage::DeviceBinding => "device binding",
        })
    }
}

#[derive(Debug, Error)]
#[error("Initialization failed during {stage}: {source}")]
pub struct InitializeError {
    pub stage: Stage,
    #[source]
    pub source: BootError,
}

fn at(stage: Stage) -> impl FnOnce(BootError) -> InitializeError {
    move |source| InitializeError { stage, source }
}

/// Owns every object the handshake creates.
///
/// Fields drop in declaration order, so the device always goes before the
/// context even without the explicit teardown in `Drop`.
pub struct Application<L: Loader> {
    device: Option<DeviceBinder<DeviceOf<L>>>,
    context: Option<Context<L::Instance>>,
    loader: L,
    config: BootConfig,
    state: Lifecycle,
}

impl<L: Loader> Debug for Application<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("state", &self.state)
            .field("device", &self.device)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<L: Loader> Drop for Application<L> {
    fn drop(&mut self) {
        if self.device.is_some() || self.context.is_some() {
            tracing::debug!(
                "Dropping application in state {}, tearing down",
                self.state.name()
            );
        }
        self.teardown();
    }
}

impl<L: Loader> Application<L> {
    pub fn new(loader: L, config: BootConfig) -> Self {
        Self {
            device: None,
            context: None,
            loader,
            config,
            state: Lifecycle::Uninitialized,
        }
    }

    /// Run the whole handshake.
    ///
    /// On failure everything created so far is destroyed in reverse order
    /// and the application ends up [`Lifecycle::Failed`].
    pub fn initialize(&mut self) -> Result<(), InitializeError> {
        if self.state != Lifecycle::Uninitialized {
            return Err(InitializeError {
                stage: Stage::Lifecycle,
                source: self.lifecycle_error("initialize"),
            });
        }

        match self.run_handshake() {
            Ok(()) => {
                tracing::debug!("State transition: Uninitialized -> Initialized");
                self.state = Lifecycle::Initialized;
                Ok(())
            }
            Err(e) => {
                tracing::error!("{e}");
                self.teardown();
                tracing::debug!("State transition: Uninitialized -> Failed");
                self.state = Lifecycle::Failed;
                Err(e)
            }
        }
    }

    fn run_handshake(&mut self) -> Result<(), InitializeError> {
        let catalog = match CapabilityCatalog::global(&self.loader) {
            Ok(catalog) => catalog,
            Err(
                e @ (BootError::EmptyEnumeration { .. }
                | BootError::Enumeration { .. }),
            ) => {
                tracing::warn!("{e}, continuing without layers");
                CapabilityCatalog::without_layers(&self.loader)
            }
            Err(e) => return Err(at(Stage::CapabilityQuery)(e)),
        };

        let mut features = self.config.instance_features();
        if self.config.validate_layers {
            features.retain_supported_layers(&catalog);
        }

        let context = self.context.insert(
            Context::create(
                &self.loader,
                catalog,
                &features,
                &self.config.app_name,
                self.config.diagnostics,
            )
            .map_err(at(Stage::ContextCreation))?,
        );

        if self.config.diagnostics {
            context
                .register_diagnostics()
                .map_err(at(Stage::Diagnostics))?;
        }

        let physical_devices = context
            .enumerate_physical_devices()
            .map_err(at(Stage::DeviceEnumeration))?;
        if physical_devices.len() > 1 {
            tracing::info!(
                "Binding the first of {} physical devices",
                physical_devices.len()
            );
        }

        let device_features =
            self.config.device_features(context.enabled_layers());
        //SAFETY: physical_devices came from this context's instance, and the
        //binder is stored in self.device which is torn down first
        let mut binder = unsafe {
            DeviceBinder::bind(
                context.driver(),
                physical_devices[0],
                context.catalog().layers(),
                &device_features,
            )
        }
        .map_err(at(Stage::DeviceBinding))?;

        let family = binder.graphics_family();
        let retrieved = binder.retrieve_queue(family);
        self.device = Some(binder);
        retrieved.map_err(at(Stage::DeviceBinding))?;
        Ok(())
    }

    pub fn prepare(&mut self) -> Result<(), BootError> {
        if self.state != Lifecycle::Initialized {
            return Err(self.lifecycle_error("prepare"));
        }
        tracing::debug!("State transition: Initialized -> Prepared");
        self.state = Lifecycle::Prepared;
        Ok(())
    }

    pub fn update(&mut self) {
        tracing::trace!("update");
    }

    /// Render one frame. Returns whether the application wants to continue.
    pub fn render(&mut self) -> bool {
        tracing::trace!("render");
        true
    }

    pub fn destroy_device(&mut self) -> Result<(), BootError> {
        let device = self.device.take().ok_or(BootError::Lifecycle {
            operation: "destroy the device",
            state: "no device is bound",
        })?;
        device.destroy();
        Ok(())
    }

    pub fn unregister_diagnostics(&mut self) -> Result<(), BootError> {
        if self.device.is_some() {
            return Err(BootError::TeardownOrder {
                attempted: "unregister diagnostics",
                blocked_by: "device",
            });
        }
        self.context
            .as_mut()
            .ok_or(BootError::Lifecycle {
                operation: "unregister diagnostics",
                state: "no context exists",
            })?
            .unregister_diagnostics()
    }

    pub fn destroy_context(&mut self) -> Result<(), BootError> {
        if self.device.is_some() {
            return Err(BootError::TeardownOrder {
                attempted: "destroy the context",
                blocked_by: "device",
            });
        }
        let context = self.context.as_ref().ok_or(BootError::Lifecycle {
            operation: "destroy the context",
            state: "no context exists",
        })?;
        if context.diagnostics_registered() {
            return Err(BootError::TeardownOrder {
                attempted: "destroy the context",
                blocked_by: "diagnostic callback",
            });
        }
        if let Some(context) = self.context.take() {
            context.destroy();
        }
        Ok(())
    }

    /// Tear everything down: device, then diagnostics, then context.
    pub fn deinitialize(&mut self) -> Result<(), BootError> {
        if !self.state.is_live() {
            return Err(self.lifecycle_error("deinitialize"));
        }
        if self.device.is_some() {
            self.destroy_device()?;
        }
        if self
            .context
            .as_ref()
            .is_some_and(Context::diagnostics_registered)
        {
            self.unregister_diagnostics()?;
        }
        if self.context.is_some() {
            self.destroy_context()?;
        }
        tracing::debug!(
            "State transition: {} -> Deinitialized",
            self.state.name()
        );
        self.state = Lifecycle::Deinitialized;
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(device) = self.device.take() {
            device.destroy();
        }
        if let Some(mut context) = self.context.take() {
            if context.diagnostics_registered()
                && let Err(e) = context.unregister_diagnostics()
            {
                tracing::error!("{e}");
            }
            context.destroy();
        }
    }

    fn lifecycle_error(&self, operation: &'static str) -> BootError {
        BootError::Lifecycle {
            operation,
            state: self.state.name(),
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    pub fn context(&self) -> Option<&Context<L::Instance>> {
        self.context.as_ref()
    }

    pub fn device(&self) -> Option<&DeviceBinder<DeviceOf<L>>> {
        self.device.as_ref()
    }
}
