//! Engine configuration.
//!
//! Configuration is plain data that the embedding proxy can keep in its own
//! settings store and hand over as JSON.

use serde::{Deserialize, Serialize};

use crate::addon::AddonId;
use crate::error::{Error, FilterSlot, LoadError};
use crate::filter::Filter;

/// Global switches applied before any addon is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    /// When false, every event passes through untouched
    pub active: bool,
    /// Only dispatch events whose request URL is in scope
    pub in_scope_only: bool,
    /// Only dispatch live proxy traffic
    pub proxy_only: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            active: true,
            in_scope_only: false,
            proxy_only: false,
        }
    }
}

/// Load-time adjustments for one addon, matched by its id's display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonOverride {
    /// The addon name, or `addon#N` for an unnamed addon
    pub id: String,
    /// When false the addon is not loaded
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Replacement request filter text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_filter: Option<String>,
    /// Replacement response filter text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_filter: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl AddonOverride {
    /// An override that disables the addon.
    pub fn disable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: false,
            request_filter: None,
            response_filter: None,
        }
    }
}

/// Everything the engine can be configured with.
///
/// # Examples
///
/// ```
/// use addon_core::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{
///     "options": { "in_scope_only": true },
///     "addons": [
///         { "id": "rewrite-host", "enabled": false },
///         { "id": "tag-json", "response_filter": "(status-code-in 200 299)" }
///     ]
/// }"#).unwrap();
///
/// assert!(config.options.active);
/// assert!(config.options.in_scope_only);
/// assert!(!config.addons[0].enabled);
/// assert!(config.addons[1].enabled);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dispatch switches
    pub options: DispatchOptions,
    /// Per-addon overrides
    pub addons: Vec<AddonOverride>,
}

impl EngineConfig {
    /// Decodes a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// Checks every override filter before the configuration is applied.
    ///
    /// Loading never fails on a bad filter: the addon is rejected and the rest
    /// load. Call this first to refuse such a configuration outright.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] for filter text that does not parse and
    /// [`Error::Eval`] for a filter that names an unknown predicate or passes
    /// it the wrong arguments.
    pub fn validate(&self) -> Result<(), Error> {
        for o in &self.addons {
            let filters = [
                (FilterSlot::Request, o.request_filter.as_deref()),
                (FilterSlot::Response, o.response_filter.as_deref()),
            ];
            for (slot, text) in filters {
                let Some(text) = text else {
                    continue;
                };
                let filter = Filter::parse(text)
                    .map_err(|e| LoadError::new(AddonId::Named(o.id.clone()), slot, e))?;
                filter.check()?;
            }
        }
        Ok(())
    }

    /// Encodes the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.options.active);
        assert!(!config.options.proxy_only);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = EngineConfig::from_json(r#"{"options": {"active": "yes"}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().starts_with("invalid engine configuration"));
    }

    #[test]
    fn override_requires_id() {
        assert!(EngineConfig::from_json(r#"{"addons": [{"enabled": false}]}"#).is_err());
    }

    #[test]
    fn validate_catches_bad_override_filters() {
        let ok = EngineConfig::from_json(
            r#"{"addons": [{"id": "a", "request_filter": "(from-proxy)"}]}"#,
        )
        .unwrap();
        assert!(ok.validate().is_ok());

        let unparsable = EngineConfig::from_json(
            r#"{"addons": [{"id": "a", "response_filter": "(and (in-scope)"}]}"#,
        )
        .unwrap();
        match unparsable.validate() {
            Err(Error::Load(e)) => {
                assert_eq!(e.addon().to_string(), "a");
                assert_eq!(e.slot(), FilterSlot::Response);
            }
            other => panic!("expected load error, got {:?}", other),
        }

        let unknown = EngineConfig::from_json(
            r#"{"addons": [{"id": "a", "request_filter": "(in-scpoe)"}]}"#,
        )
        .unwrap();
        assert!(matches!(unknown.validate(), Err(Error::Eval(_))));
    }

    #[test]
    fn serializes_back() {
        let config = EngineConfig {
            options: DispatchOptions {
                proxy_only: true,
                ..DispatchOptions::default()
            },
            addons: vec![AddonOverride::disable("addon#0")],
        };
        let text = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&text).unwrap(), config);
    }
}
