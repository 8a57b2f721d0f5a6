//! Client option layering
//!
//! Options are merged from four layers, last wins:
//! 1. Built-in defaults
//! 2. Config file (`--config` or `TALLY_CONFIG_FILE`, TOML)
//! 3. Environment (`TALLY_*`)
//! 4. Explicit options passed to `Client::configure`

mod defaults;
mod merge;
mod options;

pub use defaults::BuiltinDefaults;
pub use merge::{deep_merge, merge_layers};
pub use options::{
    ClientOptions, ResolvedOptions, ENV_API_KEY, ENV_API_URL, ENV_CONFIG_FILE, ENV_OFFLINE,
    ENV_SUITE, ENV_TEAM, ENV_VERSION,
};
