//! Bridge configuration (tallow.toml)
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! module_path = ["scripts/?.lua", "scripts/?/init.lua"]
//! log_flags = ["error", "fatal", "gc"]
//! max_stack = 4096
//! pointer_width = "auto"
//! unbox_primitives = true
//! ```

use crate::error::RuntimeError;
use crate::logging::LogFlags;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tallow_core::stack::DEFAULT_MAX_STACK_SIZE;
use tallow_core::{ContextOptions, PointerWidth};

/// Pointer width used for native layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointerWidthSetting {
    /// Width of the running process
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// 32-bit layout
    #[serde(rename = "32")]
    Bits32,
    /// 64-bit layout
    #[serde(rename = "64")]
    Bits64,
}

impl PointerWidthSetting {
    /// Width override, if any
    pub fn resolve(self) -> Option<PointerWidth> {
        match self {
            PointerWidthSetting::Auto => None,
            PointerWidthSetting::Bits32 => Some(PointerWidth::Bits32),
            PointerWidthSetting::Bits64 => Some(PointerWidth::Bits64),
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Module search templates; `?` stands for the module path
    pub module_path: Vec<String>,

    /// Enabled log categories by name
    pub log_flags: Vec<String>,

    /// Maximum script stack depth in slots
    pub max_stack: usize,

    /// Native layout pointer width
    pub pointer_width: PointerWidthSetting,

    /// Convert string and number objects returned by the host to script
    /// primitives
    pub unbox_primitives: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module_path: vec!["?.lua".to_string(), "?/init.lua".to_string()],
            log_flags: vec!["debug".to_string(), "error".to_string(), "fatal".to_string()],
            max_stack: DEFAULT_MAX_STACK_SIZE,
            pointer_width: PointerWidthSetting::Auto,
            unbox_primitives: true,
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, RuntimeError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_stack == 0 {
            return Err(RuntimeError::InvalidConfig("max_stack must be positive".to_string()));
        }
        if let Some(template) = self.module_path.iter().find(|t| !t.contains('?')) {
            return Err(RuntimeError::InvalidConfig(format!(
                "module_path entry {:?} has no '?' placeholder",
                template
            )));
        }
        self.log_mask().map(|_| ())
    }

    /// Log categories as a mask
    pub fn log_mask(&self) -> Result<LogFlags, RuntimeError> {
        self.log_flags.iter().try_fold(LogFlags::empty(), |mask, name| {
            LogFlags::from_name(name)
                .map(|flag| mask | flag)
                .ok_or_else(|| RuntimeError::InvalidConfig(format!("unknown log flag {:?}", name)))
        })
    }

    /// Options for the bridge context
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            pointer_width: self.pointer_width.resolve(),
            unbox_primitives: self.unbox_primitives,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_default() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.module_path, vec!["?.lua", "?/init.lua"]);
        assert_eq!(config.log_mask().unwrap(), crate::logging::DEFAULT_LOG_FLAGS);
    }

    #[test]
    fn test_full_config() {
        let config = BridgeConfig::parse(
            r#"
module_path = ["lib/?.lua"]
log_flags = ["error", "gc"]
max_stack = 256
pointer_width = "32"
unbox_primitives = false
"#,
        )
        .unwrap();
        assert_eq!(config.max_stack, 256);
        assert_eq!(config.log_mask().unwrap(), LogFlags::ERROR | LogFlags::GC);
        let options = config.context_options();
        assert_eq!(options.pointer_width, Some(PointerWidth::Bits32));
        assert!(!options.unbox_primitives);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            BridgeConfig::parse("log_flags = [\"loud\"]"),
            Err(RuntimeError::InvalidConfig(_))
        ));
        assert!(matches!(
            BridgeConfig::parse("module_path = [\"lib/init.lua\"]"),
            Err(RuntimeError::InvalidConfig(_))
        ));
        assert!(matches!(BridgeConfig::parse("max_stack = 0"), Err(RuntimeError::InvalidConfig(_))));
        assert!(matches!(BridgeConfig::parse("pointer_width = \"16\""), Err(RuntimeError::Config(_))));
        assert!(matches!(BridgeConfig::parse("colour = 1"), Err(RuntimeError::Config(_))));
    }
}
