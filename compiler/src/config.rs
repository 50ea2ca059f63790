// config.rs — Pipeline options
//
// The small set of named options the driver consumes verbatim at start-up.
// The CLI maps its flags onto this struct; library users may also
// deserialize it from JSON.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Package prefix of every generated class.
    pub target_package: String,
    /// Where the CLI writes the program dump and snapshots.
    pub output_dir: PathBuf,
    /// Keep a textual dump of the program after each named stage.
    pub snapshots: bool,
    /// Run the native-value unboxing narrowing.
    pub unboxing: bool,
    /// Abort the run after this many milliseconds. `None` disables the watchdog.
    pub watchdog_timeout_ms: Option<u64>,
    /// Upper bound on reduction rounds.
    pub max_rounds: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            target_package: "dfsc.generated".to_string(),
            output_dir: PathBuf::from("out"),
            snapshots: false,
            unboxing: true,
            watchdog_timeout_ms: None,
            max_rounds: 16,
        }
    }
}
