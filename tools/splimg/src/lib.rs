//! Offline tooling for SPLoader boot images. This is the only consumer of the
//! core library's `tooling` feature, and so the only place image checksums
//! are ever written.

pub mod disk;
pub mod logger;
pub mod stamp;

pub use disk::FileDisk;
pub use stamp::{build_image, check, install, BootSelection, BuildOptions, InstallOptions};
