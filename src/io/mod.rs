/// Reading and writing disk image containers

/// Flat image export
pub mod flat;
/// Teledisk container reader and writer
pub mod teledisk;

pub use teledisk::{is_teledisk_header, TelediskOptions};
