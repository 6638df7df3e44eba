//! Import newsletter subscribers from a CSV export into the remote db.
//!
//! The pipeline is: `import` (parse, validate, dedupe) -> `delivery` (batch,
//! retry) -> `upload_client` (one request per attempt). `startup` wires these
//! together from `configuration`.

pub mod configuration;
pub mod delivery;
pub mod domain;
pub mod import;
pub mod startup;
pub mod telemetry;
pub mod upload_client;
pub mod utils;
