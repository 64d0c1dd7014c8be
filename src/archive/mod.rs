mod afa;
mod ald;
mod alk;
mod dat;
pub mod format;
pub mod index_block;
pub mod naming;
mod volume;

pub use format::{ArchiveKind, MAX_LETTER, SECTOR_SIZE};
pub use index_block::{IndexRecord, RecordLayout};
pub use naming::{find_siblings, temp_path, volume_path};
pub use volume::{Placement, StagedWrite, Volume};
