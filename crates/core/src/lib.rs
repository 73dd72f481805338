//! `firespec-core`: inspection domain building blocks.
//!
//! This crate contains **pure domain** types (no storage or transport): typed
//! identifiers, the shape of an inspection draft, and change-log diffing.

pub mod changelog;
pub mod error;
pub mod id;
pub mod inspection;

pub use changelog::{ChangeEntry, change_log};
pub use error::{DomainError, DomainResult};
pub use id::{InspectionId, ProjectId};
pub use inspection::{InspectionDraft, Section, is_valid_draft};
