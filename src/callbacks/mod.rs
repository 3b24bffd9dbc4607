//! Per-halo callbacks run over a finished halo list.
//!
//! Each callback is initialized once, invoked for every halo, then finalized.
//! [`run_callbacks`] guarantees `finalize` runs for every initialized callback
//! on all exit paths, including failed invocations and panics.

pub mod save_particles;

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

use crate::catalog::HaloCatalog;
use crate::constants::SAVE_PARTICLES_CALLBACK;
use crate::domain::{Halo, HaloList};
use crate::error::{HaloError, Result};
use crate::finding::{FinderArgs, FinderOptions};
use crate::metrics::CallbackMetrics;
use crate::registry::OperatorRegistry;

pub use save_particles::SaveParticles;

/// Post-processing applied to each halo of a catalog.
pub trait HaloCallback {
    fn name(&self) -> &str;

    fn initialize(&mut self, _catalog: &HaloCatalog) -> Result<()> {
        Ok(())
    }

    fn call(&mut self, catalog: &HaloCatalog, halo: &dyn Halo) -> Result<()>;

    fn finalize(&mut self, _catalog: &HaloCatalog) -> Result<()> {
        Ok(())
    }
}

pub type CallbackFn =
    Arc<dyn Fn(&HaloCatalog, &dyn Halo, &[Value], &FinderOptions) -> Result<()> + Send + Sync>;

/// A callback backed by a plain function and its bound arguments.
#[derive(Clone)]
pub struct FunctionCallback {
    name: String,
    function: CallbackFn,
    args: FinderArgs,
    kwargs: FinderOptions,
}

impl FunctionCallback {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&HaloCatalog, &dyn Halo, &[Value], &FinderOptions) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            function: Arc::new(function),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: FinderArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: FinderOptions) -> Self {
        self.kwargs = kwargs;
        self
    }
}

impl HaloCallback for FunctionCallback {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&mut self, catalog: &HaloCatalog, halo: &dyn Halo) -> Result<()> {
        (self.function)(catalog, halo, &self.args, &self.kwargs)
    }
}

/// Builds a ready-to-run callback from call-site arguments
pub type CallbackFactory =
    Arc<dyn Fn(FinderArgs, FinderOptions) -> Result<Box<dyn HaloCallback>> + Send + Sync>;

pub type CallbackRegistry = OperatorRegistry<CallbackFactory>;

pub fn new_callback_registry() -> CallbackRegistry {
    OperatorRegistry::new("callback")
}

/// Register a function callback under `name`
pub fn add_callback<F>(registry: &mut CallbackRegistry, name: &str, function: F)
where
    F: Fn(&HaloCatalog, &dyn Halo, &[Value], &FinderOptions) -> Result<()>
        + Send
        + Sync
        + 'static,
{
    let callback = FunctionCallback::new(name, function);
    let factory: CallbackFactory = Arc::new(move |args, kwargs| {
        let bound = callback.clone().with_args(args).with_kwargs(kwargs);
        Ok(Box::new(bound) as Box<dyn HaloCallback>)
    });
    registry.register(name, factory);
}

/// Registry holding the built-in callbacks (`save_particles`).
pub fn builtin_callbacks() -> CallbackRegistry {
    let mut registry = new_callback_registry();
    let factory: CallbackFactory = Arc::new(|args, kwargs| {
        let callback = SaveParticles::from_options(&args, &kwargs)?;
        Ok(Box::new(callback) as Box<dyn HaloCallback>)
    });
    registry.register(SAVE_PARTICLES_CALLBACK, factory);
    registry
}

/// Looks up `name` and binds it to `args` and `kwargs`.
pub fn create_callback(
    registry: &CallbackRegistry,
    name: &str,
    args: FinderArgs,
    kwargs: FinderOptions,
) -> Result<Box<dyn HaloCallback>> {
    let factory = registry.lookup(name)?;
    factory(args, kwargs)
}

/// Runs every callback over every halo, in halo order.
///
/// Stops at the first failing invocation and returns it as
/// [`HaloError::Callback`]. Returns the number of halos processed.
pub fn run_callbacks(
    catalog: &HaloCatalog,
    halos: &dyn HaloList,
    callbacks: &mut [Box<dyn HaloCallback>],
) -> Result<usize> {
    let span = info_span!("callbacks", dataset = %catalog.data_ds.name, count = callbacks.len());
    let _enter = span.enter();

    let mut session = CallbackSession::start(catalog, callbacks)?;
    let mut processed = 0;
    for halo in halos.halos() {
        session.invoke(halo)?;
        processed += 1;
    }
    session.finish()?;

    debug!("Applied callbacks to {} halos", processed);
    Ok(processed)
}

/// Initialized callbacks of one pass; finalizes them when dropped.
struct CallbackSession<'a> {
    catalog: &'a HaloCatalog,
    callbacks: &'a mut [Box<dyn HaloCallback>],
    initialized: usize,
}

impl<'a> CallbackSession<'a> {
    fn start(catalog: &'a HaloCatalog, callbacks: &'a mut [Box<dyn HaloCallback>]) -> Result<Self> {
        let mut session = Self {
            catalog,
            callbacks,
            initialized: 0,
        };
        for i in 0..session.callbacks.len() {
            session.callbacks[i].initialize(catalog)?;
            session.initialized = i + 1;
        }
        Ok(session)
    }

    fn invoke(&mut self, halo: &dyn Halo) -> Result<()> {
        let catalog = self.catalog;
        for callback in self.callbacks[..self.initialized].iter_mut() {
            CallbackMetrics::record_invocation(callback.name());
            if let Err(e) = callback.call(catalog, halo) {
                CallbackMetrics::record_failure(callback.name());
                return Err(HaloError::Callback {
                    callback: callback.name().to_string(),
                    halo: halo.id(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }

    /// Finalizes everything, reporting the first finalize error.
    fn finish(mut self) -> Result<()> {
        self.finalize_all()
    }

    fn finalize_all(&mut self) -> Result<()> {
        let catalog = self.catalog;
        let mut first_error = None;
        for callback in self.callbacks[..self.initialized].iter_mut() {
            if let Err(e) = callback.finalize(catalog) {
                warn!(callback = %callback.name(), error = %e, "Callback finalize failed");
                first_error.get_or_insert(e);
            }
        }
        self.initialized = 0;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for CallbackSession<'_> {
    fn drop(&mut self) {
        if self.initialized > 0 {
            let _ = self.finalize_all();
        }
    }
}
