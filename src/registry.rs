use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::addon::{Addon, AddonId, AddonSpec, LifecycleCallback};
use crate::config::AddonOverride;
use crate::error::{panic_message, FilterSlot, LoadError};
use crate::filter::Filter;

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// An ordered, immutable set of loaded addons.
///
/// Dispatch order is declaration order. A registry never changes after
/// [`load`](Registry::load); reloading builds a new one. When the last handle
/// to a registry is dropped, every addon's `on_cleanup` runs once, in order.
///
/// # Examples
///
/// ```
/// use addon_core::{AddonSpec, ControlAction, Registry};
///
/// let registry = Registry::load(vec![
///     AddonSpec::named("ok").on_request(|req, _| Ok(req.clone().into())),
///     AddonSpec::named("broken").request_filter("(and (in-scope)"),
/// ]);
///
/// assert_eq!(registry.len(), 1);
/// assert_eq!(registry.rejected().len(), 1);
/// assert_eq!(registry.rejected()[0].addon().to_string(), "broken");
/// ```
#[derive(Debug)]
pub struct Registry {
    addons: Vec<Addon>,
    rejected: Vec<LoadError>,
    generation: u64,
}

impl Registry {
    /// A registry with no addons.
    pub fn empty() -> Self {
        Self::load(Vec::new())
    }

    /// Compiles and loads addons in declaration order.
    ///
    /// An addon whose filter text does not parse is left out and reported
    /// through [`rejected`](Registry::rejected); the others still load.
    pub fn load(specs: impl IntoIterator<Item = AddonSpec>) -> Self {
        Self::load_with(specs, &[])
    }

    /// Like [`load`](Registry::load), applying configuration overrides first.
    ///
    /// Overrides are matched against the addon id's display form: the addon's
    /// name, or `addon#N` for an unnamed addon.
    pub fn load_with(
        specs: impl IntoIterator<Item = AddonSpec>,
        overrides: &[AddonOverride],
    ) -> Self {
        let generation = GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::debug_span!("registry_load", generation);
        let _enter = span.enter();

        let mut addons = Vec::new();
        let mut rejected = Vec::new();
        let mut applied = vec![false; overrides.len()];

        for (index, mut spec) in specs.into_iter().enumerate() {
            let id = spec.id(index);
            let label = id.to_string();

            if let Some(i) = overrides.iter().position(|o| o.id == label) {
                applied[i] = true;
                let o = &overrides[i];
                if !o.enabled {
                    tracing::info!(addon = %id, "addon disabled by configuration");
                    continue;
                }
                spec.set_filters(o.request_filter.clone(), o.response_filter.clone());
            }

            let (request_filter, response_filter) = match compile(&spec, &id) {
                Ok(filters) => filters,
                Err(e) => {
                    tracing::warn!(addon = %id, error = %e, "addon rejected");
                    rejected.push(e);
                    continue;
                }
            };

            let addon = spec.into_addon(id, index, request_filter, response_filter);
            if let Some(init) = addon.on_init() {
                run_lifecycle(addon.id(), "init", init);
            }
            tracing::debug!(
                addon = %addon.id(),
                request_filter = %addon.request_filter(),
                response_filter = %addon.response_filter(),
                "addon loaded"
            );
            addons.push(addon);
        }

        for (o, _) in overrides.iter().zip(&applied).filter(|(_, applied)| !**applied) {
            tracing::warn!(addon = %o.id, "configuration override matches no addon");
        }

        tracing::info!(
            generation,
            loaded = addons.len(),
            rejected = rejected.len(),
            "registry loaded"
        );

        Self {
            addons,
            rejected,
            generation,
        }
    }

    /// Iterates over addons in dispatch order.
    pub fn iter(&self) -> std::slice::Iter<'_, Addon> {
        self.addons.iter()
    }

    /// Finds an addon by id.
    pub fn get(&self, id: &AddonId) -> Option<&Addon> {
        self.addons.iter().find(|a| a.id() == id)
    }

    /// Returns the number of loaded addons.
    pub fn len(&self) -> usize {
        self.addons.len()
    }

    /// Returns true if no addon is loaded.
    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }

    /// Returns the addons that failed to load.
    pub fn rejected(&self) -> &[LoadError] {
        &self.rejected
    }

    /// Returns this registry's load generation; later loads have larger numbers.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a Addon;
    type IntoIter = std::slice::Iter<'a, Addon>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        for addon in &self.addons {
            if let Some(cleanup) = addon.on_cleanup() {
                run_lifecycle(addon.id(), "cleanup", cleanup);
            }
        }
        tracing::debug!(generation = self.generation, "registry unloaded");
    }
}

fn compile(spec: &AddonSpec, id: &AddonId) -> Result<(Filter, Filter), LoadError> {
    let (request, response) = spec.filter_texts();
    let parse = |text: Option<&str>, slot: FilterSlot| match text {
        Some(text) => Filter::parse(text).map_err(|e| LoadError::new(id.clone(), slot, e)),
        None => Ok(Filter::always()),
    };
    Ok((
        parse(request, FilterSlot::Request)?,
        parse(response, FilterSlot::Response)?,
    ))
}

fn run_lifecycle(id: &AddonId, stage: &'static str, callback: &LifecycleCallback) {
    match panic::catch_unwind(AssertUnwindSafe(|| callback())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(addon = %id, stage, error = %e, "lifecycle callback failed"),
        Err(payload) => tracing::error!(
            addon = %id,
            stage,
            panic = %panic_message(payload.as_ref()),
            "lifecycle callback panicked"
        ),
    }
}
