//! Trialgraph model: the study-design graph and everything that flows into it.
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────┐     ┌──────────────┐
//! │ Fact Bundle  │────►│ reconcile/promote  │────►│ StudyDesign  │
//! │ (labels)     │     │ (trialgraph-       │     │ (IDs) + Issue│
//! └──────────────┘     │  reconcile)        │     │   list       │
//!                      └────────────────────┘     └──────────────┘
//! ```
//!
//! - [`design`]: typed entity collections, [`Entity`] tagged union, [`Handle`]s.
//! - [`facts`]: the thirteen fact kinds emitted by sub-extractors.
//! - [`issues`]: severity-classified [`Issue`]s and the [`IssueLog`] accumulator.
//! - [`normalize`]: label normalization shared by every stage.

pub mod design;
pub mod error;
pub mod facts;
pub mod issues;
pub mod normalize;

pub use design::*;
pub use error::GraphError;
pub use facts::*;
pub use issues::{Issue, IssueLog, IssueRef, Severity};
pub use normalize::{core_label, day_token, normalize_label, slugify, token_similarity};
