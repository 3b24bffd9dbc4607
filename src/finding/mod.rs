//! Halo finding methods and their registry.
//!
//! A finding method binds a backing function to fixed positional and keyword
//! arguments. Calling it with a [`HaloCatalog`] runs the function against the
//! catalog's dataset. The built-in `hop`, `fof` and `rockstar` methods are
//! registered by [`builtin_finding_methods`].

pub mod backends;
pub mod parser;

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::catalog::HaloCatalog;
use crate::constants::{
    DEFAULT_ROCKSTAR_OUTBASE, FOF_METHOD, HOP_METHOD, ROCKSTAR_METHOD, ROCKSTAR_OUTPUT_FILE,
};
use crate::error::{HaloError, Result};
use crate::metrics::FindingMetrics;
use crate::registry::OperatorRegistry;
use crate::storage::SavedCatalog;

use backends::rockstar::RockstarDataset;
use backends::{HaloFinderBackend, RockstarBackend};
use parser::parse_halo_list;

/// Positional arguments bound to a finding method or callback
pub type FinderArgs = Vec<Value>;
/// Keyword arguments bound to a finding method or callback
pub type FinderOptions = BTreeMap<String, Value>;

/// What a finding method produced.
#[derive(Debug)]
pub enum FindingOutcome {
    /// A halo list was normalized and saved as a catalog
    Saved(SavedCatalog),
    /// The finder wrote its own catalog, loaded back as a dataset
    Loaded(RockstarDataset),
}

pub type FindingFn = Arc<
    dyn Fn(&mut HaloCatalog, &[Value], &FinderOptions) -> Result<Option<FindingOutcome>>
        + Send
        + Sync,
>;

/// A backing function plus the arguments it is always called with.
#[derive(Clone)]
pub struct HaloFindingMethod {
    function: FindingFn,
    args: FinderArgs,
    kwargs: FinderOptions,
}

impl HaloFindingMethod {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&mut HaloCatalog, &[Value], &FinderOptions) -> Result<Option<FindingOutcome>>
            + Send
            + Sync
            + 'static,
    {
        Self {
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

    /// A copy of this method with extra arguments appended and keyword
    /// arguments merged over the stored ones.
    pub fn bind(&self, args: FinderArgs, kwargs: FinderOptions) -> Self {
        let mut bound = self.clone();
        bound.args.extend(args);
        bound.kwargs.extend(kwargs);
        bound
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &FinderOptions {
        &self.kwargs
    }

    /// Calls the backing function with the catalog and the stored arguments
    pub fn call(&self, hc: &mut HaloCatalog) -> Result<Option<FindingOutcome>> {
        (self.function)(hc, &self.args, &self.kwargs)
    }
}

pub type FindingMethodRegistry = OperatorRegistry<HaloFindingMethod>;

pub fn new_finding_method_registry() -> FindingMethodRegistry {
    OperatorRegistry::new("finding method")
}

/// Register `function` under `name` with no bound arguments
pub fn add_finding_method<F>(registry: &mut FindingMethodRegistry, name: &str, function: F)
where
    F: Fn(&mut HaloCatalog, &[Value], &FinderOptions) -> Result<Option<FindingOutcome>>
        + Send
        + Sync
        + 'static,
{
    registry.register(name, HaloFindingMethod::new(function));
}

/// The external finders backing the built-in methods
#[derive(Clone)]
pub struct FinderBackends {
    pub hop: Arc<dyn HaloFinderBackend>,
    pub fof: Arc<dyn HaloFinderBackend>,
    pub rockstar: Arc<dyn RockstarBackend>,
}

/// Registry holding `hop`, `fof` and `rockstar`.
pub fn builtin_finding_methods(backends: &FinderBackends) -> FindingMethodRegistry {
    let mut registry = new_finding_method_registry();

    let hop = Arc::clone(&backends.hop);
    add_finding_method(&mut registry, HOP_METHOD, move |hc, args, kwargs| {
        reject_positional(HOP_METHOD, args)?;
        halo_list_method(HOP_METHOD, hc, hop.as_ref(), kwargs)
    });

    let fof = Arc::clone(&backends.fof);
    add_finding_method(&mut registry, FOF_METHOD, move |hc, args, kwargs| {
        reject_positional(FOF_METHOD, args)?;
        halo_list_method(FOF_METHOD, hc, fof.as_ref(), kwargs)
    });

    let rockstar = Arc::clone(&backends.rockstar);
    add_finding_method(&mut registry, ROCKSTAR_METHOD, move |hc, args, kwargs| {
        reject_positional(ROCKSTAR_METHOD, args)?;
        rockstar_method(hc, rockstar.as_ref(), kwargs)
    });

    registry
}

/// The built-in finders only take keyword options.
fn reject_positional(method: &str, args: &[Value]) -> Result<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(HaloError::Finder(format!(
            "{} takes keyword options only, got {} positional argument(s)",
            method,
            args.len()
        )))
    }
}

/// The `outbase` option, or `rockstar_halos` when it is not set.
pub fn rockstar_outbase(options: &FinderOptions) -> Result<&str> {
    match options.get("outbase") {
        None => Ok(DEFAULT_ROCKSTAR_OUTBASE),
        Some(Value::String(outbase)) => Ok(outbase),
        Some(other) => Err(HaloError::Config(format!(
            "outbase must be a path string, got {}",
            other
        ))),
    }
}

/// Runs a finder that returns a halo list and saves the list as a catalog.
fn halo_list_method(
    method: &str,
    hc: &mut HaloCatalog,
    backend: &dyn HaloFinderBackend,
    kwargs: &FinderOptions,
) -> Result<Option<FindingOutcome>> {
    let start = Instant::now();
    let halo_list = backend.find_halos(&hc.data_ds, kwargs)?;
    info!("{} found {} halos", backend.name(), halo_list.len());

    let saved = parse_halo_list(hc, halo_list.as_ref())?;
    FindingMetrics::record_run(method, start.elapsed().as_secs_f64());
    Ok(Some(FindingOutcome::Saved(saved)))
}

/// Runs Rockstar, then loads `<outbase>/halos_0.0.bin`.
///
/// An output without usable field info yields `Ok(None)`; the cause is logged.
fn rockstar_method(
    hc: &mut HaloCatalog,
    backend: &dyn RockstarBackend,
    kwargs: &FinderOptions,
) -> Result<Option<FindingOutcome>> {
    let outbase = rockstar_outbase(kwargs)?;
    let start = Instant::now();
    backend.run(&hc.data_ds, kwargs)?;

    let path = Path::new(outbase).join(ROCKSTAR_OUTPUT_FILE);

    let mut halos_ds = RockstarDataset::open(&path)?;
    FindingMetrics::record_run(ROCKSTAR_METHOD, start.elapsed().as_secs_f64());

    let field_info = halos_ds.create_field_info().map(|fields| fields.len());
    match field_info {
        Ok(num_fields) => {
            info!(
                path = %path.display(),
                halos = halos_ds.header.num_halos,
                fields = num_fields,
                "Loaded Rockstar halo catalog"
            );
            Ok(Some(FindingOutcome::Loaded(halos_ds)))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Rockstar produced no usable halo catalog");
            FindingMetrics::record_no_catalog(ROCKSTAR_METHOD);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::storage::InMemoryCatalogStore;
    use serde_json::json;
    use std::path::PathBuf;

    fn catalog() -> HaloCatalog {
        let ds = Dataset {
            name: "test".to_string(),
            path: PathBuf::from("test.bin"),
            domain_left_edge: [0.0; 3],
            domain_right_edge: [1.0; 3],
            current_redshift: 0.0,
            cosmology: None,
        };
        HaloCatalog::new(ds, InMemoryCatalogStore::new())
    }

    #[test]
    fn test_method_receives_bound_arguments() {
        let method = HaloFindingMethod::new(|hc, args, kwargs| {
            assert_eq!(hc.data_ds.name, "test");
            assert_eq!(args, &[json!(1), json!("two")]);
            assert_eq!(kwargs.get("threshold"), Some(&json!(160.0)));
            Ok(None)
        })
        .with_args(vec![json!(1), json!("two")])
        .with_kwargs(BTreeMap::from([("threshold".to_string(), json!(160.0))]));

        let mut hc = catalog();
        assert!(method.call(&mut hc).unwrap().is_none());
    }

    #[test]
    fn test_bind_merges_keywords() {
        let method = HaloFindingMethod::new(|_, _, _| Ok(None)).with_kwargs(BTreeMap::from([
            ("outbase".to_string(), json!("a")),
            ("num_readers".to_string(), json!(1)),
        ]));

        let bound = method.bind(
            vec![json!(3)],
            BTreeMap::from([("outbase".to_string(), json!("b"))]),
        );
        assert_eq!(bound.args(), &[json!(3)]);
        assert_eq!(bound.kwargs().get("outbase"), Some(&json!("b")));
        assert_eq!(bound.kwargs().get("num_readers"), Some(&json!(1)));
        // the unbound method keeps its keywords
        assert_eq!(method.kwargs().get("outbase"), Some(&json!("a")));
    }

    #[test]
    fn test_add_finding_method_overwrites() {
        let mut registry = new_finding_method_registry();
        add_finding_method(&mut registry, "fof", |_, _, _| {
            Err(HaloError::Finder("first".to_string()))
        });
        add_finding_method(&mut registry, "fof", |_, _, _| Ok(None));

        let mut hc = catalog();
        assert!(hc.find_halos(&registry, "fof", BTreeMap::new()).unwrap().is_none());
    }

    fn no_backends() -> FinderBackends {
        struct Unused;
        impl HaloFinderBackend for Unused {
            fn name(&self) -> &str {
                "unused"
            }
            fn find_halos(
                &self,
                _ds: &Dataset,
                _options: &FinderOptions,
            ) -> Result<Box<dyn crate::domain::HaloList>> {
                panic!("finder must not run");
            }
        }
        impl RockstarBackend for Unused {
            fn run(&self, _ds: &Dataset, _options: &FinderOptions) -> Result<()> {
                panic!("rockstar must not run");
            }
        }
        FinderBackends {
            hop: Arc::new(Unused),
            fof: Arc::new(Unused),
            rockstar: Arc::new(Unused),
        }
    }

    #[test]
    fn test_builtin_methods_reject_positional_arguments() {
        let methods = builtin_finding_methods(&no_backends());
        let mut hc = catalog();

        for name in [HOP_METHOD, FOF_METHOD, ROCKSTAR_METHOD] {
            let method = methods.lookup(name).unwrap().bind(vec![json!(128)], BTreeMap::new());
            let err = method.call(&mut hc).err().unwrap();
            assert!(matches!(err, HaloError::Finder(ref msg) if msg.contains("positional")));
        }
    }

    #[test]
    fn test_non_string_outbase_is_rejected() {
        let methods = builtin_finding_methods(&no_backends());
        let mut hc = catalog();

        let options = BTreeMap::from([("outbase".to_string(), json!(123))]);
        let err = hc.find_halos(&methods, ROCKSTAR_METHOD, options).unwrap_err();
        assert!(matches!(err, HaloError::Config(_)));

        assert_eq!(rockstar_outbase(&BTreeMap::new()).unwrap(), "rockstar_halos");
    }

    #[test]
    fn test_unknown_method_is_not_found() {
        let registry = new_finding_method_registry();
        let mut hc = catalog();
        let err = hc.find_halos(&registry, "subfind", BTreeMap::new()).unwrap_err();
        assert!(matches!(err, HaloError::NotFound { .. }));
    }
}
