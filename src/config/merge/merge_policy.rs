//! Merge rules: defaults, override order, conflict handling.
//!
//! Later sources replace earlier values key by key; tables are merged, arrays
//! are replaced wholesale.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("logging.level", "info")?
        .set_default("paths.premise", "output/premise.json")?
        .set_default("paths.plan", "output/plan.json")?
        .set_default("paths.story", "output/story.txt")?
        .set_default("paths.story_beam", "output/story_beam.json")?
        .set_default("checkpoint.directory", ".storyloom/checkpoints")?
        .set_default("checkpoint.prefix", "beam")
}
