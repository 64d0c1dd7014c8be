//! ald-rs: multi-volume game archive library
//!
//! Reads and writes lettered archives whose content is sharded across up to
//! 26 volume files (`GAMEGA.ALD`, `GAMEGB.ALD`, ... or `ACG.DAT`, `BCG.DAT`,
//! ...), plus the single-volume AFA and ALK kinds. Provides:
//! - A unified view of every entry with lookup by stable file number and by name
//! - Two-phase saves: every volume is staged to a temp file before any is committed
//! - Patch synthesis, including the relabel scheme for lettered archives
//! - Editing of images embedded in SWF, AFF, FLAT and WIPF containers
//!
//! # Example
//!
//! ```no_run
//! use ald_rs::{Collection, Replacement};
//!
//! let mut archive = Collection::open("GAMEGA.ALD")?;
//! archive.replace("CG00012.QNT", Replacement::File("new/CG00012.QNT".into()))?;
//!
//! // Moves GAMEGA.ALD to GAMEGM.ALD, writes GAMEGZ.ALD and a new GAMEGA.ALD
//! let report = archive.create_patch_lettered(13, 26)?;
//! println!("{} entries patched", report.entry_count);
//! # Ok::<(), ald_rs::AldError>(())
//! ```

pub mod archive;
pub mod collection;
pub mod config;
pub mod container;
pub mod entry;
pub mod error;
pub mod session;

// Re-export commonly used types
pub use archive::{ArchiveKind, IndexRecord, RecordLayout, StagedWrite, Volume, MAX_LETTER, SECTOR_SIZE};
pub use collection::{Collection, DuplicatePolicy, EntryLocation, PatchReport};
pub use config::Config;
pub use container::{Capabilities, FormatSupport, SubFormat};
pub use entry::{number_from_name, Entry, Replacement, SubResources};
pub use error::{AldError, Result};
pub use session::{ListingRow, Session};
