//! Service Layer
//!
//! Orchestrators behind the HTTP handlers and the background consumer.
//! Each depends only on the capability traits from `orderflow-storage`.

mod ingestion;
mod lookup;
mod submission;

pub use ingestion::*;
pub use lookup::*;
pub use submission::*;
