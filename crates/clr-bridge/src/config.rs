//! Configuration for the object bridge.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{BridgeError, BridgeResult};

/// Configuration for a [`Bridge`](crate::Bridge) instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name under which the root module is imported by guest code
    pub root_module_name: SmolStr,

    /// Eagerly populate every exported name of newly bound namespaces
    pub preload: bool,

    /// Turn `preload` on automatically when the hosting process is interactive
    pub interactive_preload: bool,

    /// Whether the embedding process runs an interactive prompt
    pub interactive: bool,

    /// Substitute exception-compatible wrappers for host exception types
    pub wrap_exceptions: bool,

    /// Release the guest execution lock while loading assemblies
    pub release_lock_for_io: bool,

    /// Maximum number of live registry handles (unbounded if `None`)
    pub max_handles: Option<usize>,

    /// Maximum number of live guest objects (unbounded if `None`)
    pub max_objects: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            root_module_name: SmolStr::new("clr"),
            preload: false,
            interactive_preload: true,
            interactive: false,
            wrap_exceptions: true,
            release_lock_for_io: true,
            max_handles: None,
            max_objects: None,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BridgeError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the root module name
    pub fn with_root_module_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.root_module_name = name.into();
        self
    }

    /// Set the initial preload flag
    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Mark the embedding process as interactive
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Enable or disable the interactive preload policy
    pub fn with_interactive_preload(mut self, enabled: bool) -> Self {
        self.interactive_preload = enabled;
        self
    }

    /// Enable or disable exception wrapper substitution
    pub fn with_wrap_exceptions(mut self, wrap: bool) -> Self {
        self.wrap_exceptions = wrap;
        self
    }

    /// Enable or disable releasing the execution lock around blocking loads
    pub fn with_release_lock_for_io(mut self, release: bool) -> Self {
        self.release_lock_for_io = release;
        self
    }

    /// Bound the number of live registry handles
    pub fn with_max_handles(mut self, max: usize) -> Self {
        self.max_handles = Some(max);
        self
    }

    /// Bound the number of live guest objects
    pub fn with_max_objects(mut self, max: usize) -> Self {
        self.max_objects = Some(max);
        self
    }

    /// Initial value of the root `preload` flag
    pub fn initial_preload(&self) -> bool {
        self.preload || (self.interactive_preload && self.interactive)
    }

    /// Check the configuration for invalid values
    pub fn validate(&self) -> BridgeResult<()> {
        if self.root_module_name.is_empty() {
            return Err(BridgeError::config("root module name must not be empty"));
        }
        if self.root_module_name.contains('.') {
            return Err(BridgeError::config(format!(
                "root module name '{}' must not be dotted",
                self.root_module_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.root_module_name, "clr");
        assert!(!config.preload);
        assert!(config.wrap_exceptions);
        assert!(!config.initial_preload());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interactive_enables_preload() {
        let config = BridgeConfig::new().with_interactive(true);
        assert!(config.initial_preload());

        let config = config.with_interactive_preload(false);
        assert!(!config.initial_preload());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = BridgeConfig::from_json(r#"{ "preload": true, "max_handles": 8 }"#).unwrap();
        assert!(config.preload);
        assert_eq!(config.max_handles, Some(8));
        assert_eq!(config.root_module_name, "clr");
    }

    #[test]
    fn test_invalid_root_name_rejected() {
        let err = BridgeConfig::from_json(r#"{ "root_module_name": "" }"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));

        let config = BridgeConfig::new().with_root_module_name("a.b");
        assert!(config.validate().is_err());
    }
}
