//! Environment source: `STORYLOOM__SECTION__KEY=value`, e.g.
//! `STORYLOOM__STORY__PASSAGE_BEAM_WIDTH=4`.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const PREFIX: &str = "STORYLOOM";
pub const SEPARATOR: &str = "__";

/// Add the environment source to builder. It has the highest precedence.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(PREFIX)
            .prefix_separator(SEPARATOR)
            .separator(SEPARATOR)
            .try_parsing(true),
    )
}
