pub mod attr;
pub mod group;
pub mod record;

pub use attr::{AttrValue, Attrs};
pub use group::Group;
pub use record::{EpochMetadata, ExperimentMetadata, ExperimentRecord, RecordError, SeriesMetadata};
