//! CD sector codec: EDC/ECC, reconstruction of non-payload bytes, MSF
//! arithmetic and the fixup tables that record what must be kept verbatim.

pub mod ecc;
pub mod fixup;
pub mod msf;
pub mod sector;

pub use fixup::{Fixup, FixupTable};
pub use msf::Msf;
pub use sector::{EccLayout, Form2Edc, SectorMode, SECTOR_SIZE};
