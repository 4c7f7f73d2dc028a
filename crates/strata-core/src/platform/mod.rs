//! Host queries behind traits so storage and validation logic can be
//! exercised with fixed answers.

mod disk;
mod host;

pub use disk::{DiskProbe, DiskSpace, Fs2DiskProbe};
pub use host::{HostProbe, SysinfoHost};
