//! vroot: dm-verity boot parameters and partition sizing for AVB-signed root images.
//!
//! The core is pure: [`descriptor::parse_hashtree_descriptor`] reads the hashtree
//! descriptor printed by `avbtool info_image`, [`dm::build_verity_target`] turns it
//! into a `dm=` stanza, and [`sizing::PartitionSizeSolver`] finds the smallest
//! partition that fits an image together with its hash tree. The `avbtool` and
//! `partuuid` modules wrap the external tools feeding them.
pub mod avbtool;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod dm;
pub mod error;
pub mod partuuid;
pub mod sizing;

pub use error::{Error, Result};
