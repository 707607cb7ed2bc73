//! Schema definitions for raw activity instance records

pub mod extract;
pub mod raw_record;

pub use extract::{extraction_policies, ExtractionPolicy, PayloadSide, ScalarField};
pub use raw_record::{AttrValue, RawRecord, RecordError, SCHEMA_VERSION};
