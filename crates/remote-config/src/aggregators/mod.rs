//! Per-product aggregators folding a generation's fragments into one
//! update document.

mod asm;
mod asm_data;
mod asm_features;

pub use self::asm::AsmAggregator;
pub use self::asm_data::{AsmDataAggregator, RuleDataTable};
pub use self::asm_features::AsmFeaturesAggregator;

use serde_json::{Map, Value as Json};

use appsec_core::Result;

use crate::config::RemoteConfig;

/// One generation is `init` → `add`* → `aggregate`.
pub trait ConfigAggregator {
    /// Drop everything accumulated so far.
    fn init(&mut self);

    /// Fold one fragment in. A rejected fragment leaves sibling fragments
    /// already added untouched.
    fn add(&mut self, config: &RemoteConfig) -> Result<()>;

    /// Write the accumulated state into `doc`, replacing keys it owns.
    fn aggregate(&self, doc: &mut Map<String, Json>);
}
