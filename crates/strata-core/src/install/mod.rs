//! Moves verified artifacts into `Models/` and keeps the install inventory.

mod installer;

pub use installer::{load_inventory, InstallRecord, Installer};
