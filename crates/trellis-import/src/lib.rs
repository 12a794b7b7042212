//! trellis-import: load flat framework rows into the Trellis graph.
//!
//! Rows are `[type, statement, coding, parentCoding, abbreviatedStatement,
//! grades]`. Each row becomes an item attached under the item whose coding
//! matches its parent column, or under the document root. The whole import
//! commits as one change set.

pub mod error;
pub mod grades;
pub mod importer;
pub mod records;

pub use error::{ImportError, Result};
pub use grades::normalize_grades;
pub use importer::{FrameworkImporter, ImportOptions, ImportSummary};
pub use records::{read_rows, rows_from_json, ImportRow};
