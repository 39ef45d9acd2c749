//! dm-verity mapping tables
//!
//! Turns a [`HashtreeDescriptor`] into the `dm=` boot parameter that makes the
//! kernel set up a verified `vroot` device at boot.
//!
//! Two table layouts exist and they do not share a schema: the legacy layout
//! appends FEC as four positional fields, the extended layout uses a named
//! optional-parameter list. They are kept as separate variants of [`VerityTarget`]
//! and only share the block arithmetic.

use crate::descriptor::{FecParams, HashtreeDescriptor};
use crate::error::{Error, Result};
use std::fmt;

/// Sector size the mapped length is expressed in.
pub const SECTOR_SIZE: u64 = 512;

/// Name of the mapped device.
pub const TARGET_NAME: &str = "vroot";

/// Root parameter appended after the `dm=` stanza by default.
pub const DEFAULT_ROOT_PARAM: &str = "root=/dev/mapper/vroot";

/// Behavioural flags always passed to an extended table.
pub const EXTENDED_FLAGS: [&str; 3] = [
    "restart_on_corruption",
    "ignore_zero_blocks",
    "try_verify_in_tasklet",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerityVersion {
    /// Fixed positional field list
    Legacy,
    /// Named optional-parameter list
    Extended,
}

impl TryFrom<u32> for VerityVersion {
    type Error = Error;

    fn try_from(version: u32) -> Result<Self> {
        match version {
            0 => Ok(Self::Legacy),
            1 => Ok(Self::Extended),
            other => Err(Error::UnsupportedVerityVersion(other)),
        }
    }
}

/// Legacy table: `/dev/disk/by-partuuid` device paths and positional FEC fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTarget {
    pub length_sectors: u64,
    pub device: String,
    pub data_block_size: u64,
    pub hash_block_size: u64,
    pub hash_algorithm: String,
    pub root_digest: String,
    pub salt: String,
    pub fec: Option<FecParams>,
}

impl LegacyTarget {
    fn optional_params(&self) -> Vec<String> {
        self.fec
            .map(|fec| {
                vec![
                    fec.roots.to_string(),
                    fec.block_count.to_string(),
                    fec.start_block.to_string(),
                    self.device.clone(),
                ]
            })
            .unwrap_or_default()
    }

    /// The single table row, without the `dm=` wrapping.
    pub fn mapping(&self) -> String {
        let mut fields = vec![
            "0".to_owned(),
            self.length_sectors.to_string(),
            "verity".to_owned(),
            "1".to_owned(),
            self.device.clone(),
            self.device.clone(),
            self.data_block_size.to_string(),
            self.hash_block_size.to_string(),
            self.hash_algorithm.clone(),
            self.root_digest.clone(),
            self.salt.clone(),
        ];
        let optional = self.optional_params();
        fields.push(optional.len().to_string());
        fields.extend(optional);
        fields.join(" ")
    }
}

/// Extended table: `PARTUUID=` device references and named optional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedTarget {
    pub version: u32,
    pub device: String,
    pub data_block_size: u64,
    pub hash_block_size: u64,
    pub num_data_blocks: u64,
    pub hash_start_block: u64,
    pub hash_algorithm: String,
    pub root_digest: String,
    pub salt: String,
    pub fec: Option<FecParams>,
}

impl ExtendedTarget {
    fn optional_params(&self) -> Vec<String> {
        let mut params: Vec<String> = EXTENDED_FLAGS.iter().map(|f| (*f).to_owned()).collect();
        if let Some(fec) = self.fec {
            params.extend([
                "use_fec_from_device".to_owned(),
                self.device.clone(),
                "fec_roots".to_owned(),
                fec.roots.to_string(),
                "fec_blocks".to_owned(),
                fec.block_count.to_string(),
                "fec_start".to_owned(),
                fec.start_block.to_string(),
            ]);
        }
        params
    }

    /// The single table row, without the `dm=` wrapping.
    pub fn mapping(&self) -> String {
        let mut fields = vec![
            "0".to_owned(),
            "verity".to_owned(),
            self.version.to_string(),
            self.device.clone(),
            self.device.clone(),
            self.data_block_size.to_string(),
            self.hash_block_size.to_string(),
            self.num_data_blocks.to_string(),
            self.hash_start_block.to_string(),
            self.hash_algorithm.clone(),
            self.root_digest.clone(),
            self.salt.clone(),
        ];
        // the count is the number of tokens that follow, not the number of options
        let optional = self.optional_params();
        fields.push(optional.len().to_string());
        fields.extend(optional);
        fields.join(" ")
    }
}

/// A synthesized device-mapper specification.
///
/// `Display` renders the complete `dm="..."` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerityTarget {
    Legacy(LegacyTarget),
    Extended(ExtendedTarget),
}

impl VerityTarget {
    pub const fn version(&self) -> VerityVersion {
        match self {
            Self::Legacy(_) => VerityVersion::Legacy,
            Self::Extended(_) => VerityVersion::Extended,
        }
    }

    pub fn mapping(&self) -> String {
        match self {
            Self::Legacy(target) => target.mapping(),
            Self::Extended(target) => target.mapping(),
        }
    }
}

impl fmt::Display for VerityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // not activated by default, one target line
            Self::Legacy(target) => {
                write!(f, "dm=\"0 {TARGET_NAME} none ro,0 1 {}\"", target.mapping())
            }
            // activated, one table-row group
            Self::Extended(target) => {
                write!(f, "dm=\"1 {TARGET_NAME} none ro 1,{}\"", target.mapping())
            }
        }
    }
}

/// Builds the verity target for `descriptor` on the partition identified by `storage_id`.
///
/// The hash tree is expected right after the last data block of the same device.
/// An image size that is not a multiple of the data block size is truncated to
/// whole blocks and reported as a warning.
pub fn build_verity_target(descriptor: &HashtreeDescriptor, storage_id: &str) -> Result<VerityTarget> {
    let version = VerityVersion::try_from(descriptor.verity_version)?;
    if descriptor.data_block_size == 0 {
        return Err(Error::invalid_number("Data Block Size", "0"));
    }

    let num_data_blocks = descriptor.num_data_blocks();
    if !descriptor.is_block_aligned() {
        tracing::warn!(
            image_size = descriptor.image_size,
            data_block_size = descriptor.data_block_size,
            num_data_blocks,
            "Image size is not a multiple of the data block size, truncating"
        );
    }

    let target = match version {
        VerityVersion::Legacy => VerityTarget::Legacy(LegacyTarget {
            length_sectors: descriptor.image_size / SECTOR_SIZE,
            device: format!("/dev/disk/by-partuuid/{storage_id}"),
            data_block_size: descriptor.data_block_size,
            hash_block_size: descriptor.hash_block_size,
            hash_algorithm: descriptor.hash_algorithm.clone(),
            root_digest: descriptor.root_digest.clone(),
            salt: descriptor.salt.clone(),
            fec: descriptor.fec,
        }),
        VerityVersion::Extended => VerityTarget::Extended(ExtendedTarget {
            version: descriptor.verity_version,
            device: format!("PARTUUID={storage_id}"),
            data_block_size: descriptor.data_block_size,
            hash_block_size: descriptor.hash_block_size,
            num_data_blocks,
            hash_start_block: num_data_blocks,
            hash_algorithm: descriptor.hash_algorithm.clone(),
            root_digest: descriptor.root_digest.clone(),
            salt: descriptor.salt.clone(),
            fec: descriptor.fec,
        }),
    };
    tracing::debug!(?version, storage_id, "Built verity target");
    Ok(target)
}

/// Joins the `dm=` stanza and the root parameter into a kernel command line.
pub fn kernel_cmdline(target: &VerityTarget, root_param: &str) -> String {
    format!("{target} {root_param}")
}
