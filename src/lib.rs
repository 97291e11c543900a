// BOTA Core - activity ingestion and award progress engine
//
// Imports ADIF contact logs, deduplicates them per user, keeps diploma
// progress deterministic, and runs the live spot feed with timed expiry.
// Web/auth/PDF layers live elsewhere and talk to this crate through
// Importer, SpotManager and the Store gateway.

pub mod adif;
pub mod config;
pub mod dedup;
pub mod error;
pub mod import;
pub mod model;
pub mod progress;
pub mod spots;
pub mod store;

pub use config::EngineConfig;
pub use error::CoreError;
pub use import::{ImportReport, Importer};
pub use progress::{DiplomaUpdate, ProgressCalculator};
pub use spots::{SpotManager, SpotRequest, SweepStats};
pub use store::{SqliteStore, Store};
