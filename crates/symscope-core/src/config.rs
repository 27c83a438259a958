//! # Session Configuration
//!
//! Tunables for one attach/detach cycle.
//!
//! ## Environment Variables
//!
//! - `SYMSCOPE_NO_LINKER_SYMBOLS`: when set to `1`/`true`, skip merging the plain linker symbol table
//! - `SYMSCOPE_MAX_INCLUDES`: bound on include files per compilation unit (default: 256)
//! - `SYMSCOPE_RENDEZVOUS_SYMBOL`: symbol naming the executable's dynamic section (default: `_DYNAMIC`)

use std::env;

use tracing::warn;

/// Default bound on include files one compilation unit may reference.
pub const DEFAULT_MAX_INCLUDES: usize = 256;

/// Default symbol that marks the main executable's dynamic section.
pub const DEFAULT_RENDEZVOUS_SYMBOL: &str = "_DYNAMIC";

/// Configuration consumed by [`Session`](crate::Session) and the components it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig
{
    /// Run the linker-symbol-table merger after the stab stream.
    pub merge_linker_symbols: bool,
    /// Maximum number of include files per compilation unit.
    pub max_include_depth: usize,
    /// Symbol resolved in the main executable to find the dynamic section.
    pub rendezvous_symbol: String,
    /// Upper bound on link-map nodes and dynamic tags visited in one walk.
    pub max_link_map_entries: usize,
    /// Upper bound on the length of a path read from target memory.
    pub max_path_length: usize,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        Self {
            merge_linker_symbols: true,
            max_include_depth: DEFAULT_MAX_INCLUDES,
            rendezvous_symbol: DEFAULT_RENDEZVOUS_SYMBOL.to_string(),
            max_link_map_entries: 4096,
            max_path_length: 4096,
        }
    }
}

impl SessionConfig
{
    /// Build a configuration from defaults overridden by `SYMSCOPE_*` variables.
    ///
    /// Malformed values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self
    {
        let mut config = Self::default();

        if let Ok(value) = env::var("SYMSCOPE_NO_LINKER_SYMBOLS") {
            config.merge_linker_symbols = !matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(value) = env::var("SYMSCOPE_MAX_INCLUDES") {
            match value.parse::<usize>() {
                Ok(limit) if limit > 0 => config.max_include_depth = limit,
                _ => warn!(value = %value, "ignoring invalid SYMSCOPE_MAX_INCLUDES"),
            }
        }

        if let Ok(value) = env::var("SYMSCOPE_RENDEZVOUS_SYMBOL") {
            if value.is_empty() {
                warn!("ignoring empty SYMSCOPE_RENDEZVOUS_SYMBOL");
            } else {
                config.rendezvous_symbol = value;
            }
        }

        config
    }

    /// Enable or disable the linker-symbol-table merger.
    #[must_use]
    pub fn with_linker_symbols(mut self, enabled: bool) -> Self
    {
        self.merge_linker_symbols = enabled;
        self
    }

    /// Override the include-file bound.
    #[must_use]
    pub fn with_max_include_depth(mut self, limit: usize) -> Self
    {
        self.max_include_depth = limit;
        self
    }

    /// Override the rendezvous symbol name.
    #[must_use]
    pub fn with_rendezvous_symbol(mut self, name: impl Into<String>) -> Self
    {
        self.rendezvous_symbol = name.into();
        self
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_default_config()
    {
        let config = SessionConfig::default();
        assert!(config.merge_linker_symbols);
        assert_eq!(config.max_include_depth, DEFAULT_MAX_INCLUDES);
        assert_eq!(config.rendezvous_symbol, "_DYNAMIC");
    }

    #[test]
    fn test_builder_setters()
    {
        let config = SessionConfig::default()
            .with_linker_symbols(false)
            .with_max_include_depth(4)
            .with_rendezvous_symbol("_dl_dynamic");
        assert!(!config.merge_linker_symbols);
        assert_eq!(config.max_include_depth, 4);
        assert_eq!(config.rendezvous_symbol, "_dl_dynamic");
    }
}
