pub mod catalog;
pub mod objects;
pub mod volume;

pub use catalog::{CatalogStore, Precondition};
pub use objects::SessionObjectStore;
pub use volume::{LocalVolumeBackend, Volume, VolumeBackend};
