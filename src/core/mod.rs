//! Archive file system engine

pub mod cache;
pub mod config;
pub mod controller;
pub mod driver;
pub mod entry;
pub mod fs;
pub mod memory;
pub mod path;
pub mod pool;
pub mod socket;
