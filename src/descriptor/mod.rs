//! Hashtree descriptors
//!
//! `avbtool info_image` prints every descriptor of a vbmeta image as an indented
//! `key: value` block. This module picks out the hashtree descriptor and turns it
//! into a [`HashtreeDescriptor`], the only input the mapping-table builder needs.
//!
//! Parsing is a pure text-to-record transform, no tool is invoked here.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;

/// Header line that opens the hashtree descriptor section.
pub const DESCRIPTOR_HEADER: &str = "Hashtree descriptor:";

/// FEC offsets and sizes are reported in bytes and mapped in 512-byte units.
pub const FEC_UNIT_SIZE: u64 = 512;

pub const FIELD_VERITY_VERSION: &str = "Version of dm-verity";
pub const FIELD_IMAGE_SIZE: &str = "Image Size";
pub const FIELD_DATA_BLOCK_SIZE: &str = "Data Block Size";
pub const FIELD_HASH_BLOCK_SIZE: &str = "Hash Block Size";
pub const FIELD_HASH_ALGORITHM: &str = "Hash Algorithm";
pub const FIELD_ROOT_DIGEST: &str = "Root Digest";
pub const FIELD_SALT: &str = "Salt";
pub const FIELD_FEC_NUM_ROOTS: &str = "FEC num roots";
pub const FIELD_FEC_OFFSET: &str = "FEC offset";
pub const FIELD_FEC_SIZE: &str = "FEC size";

/// Reed-Solomon parameters of the FEC region appended after the hash tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FecParams {
    /// Parity symbols per block
    pub roots: u64,
    pub start_block: u64,
    pub block_count: u64,
}

/// Integrity tree metadata of a single image.
///
/// Built once by [`parse_hashtree_descriptor`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashtreeDescriptor {
    pub image_size: u64,
    pub data_block_size: u64,
    pub hash_block_size: u64,
    pub hash_algorithm: String,
    /// Hex encoded, kept verbatim
    pub root_digest: String,
    /// Hex encoded, kept verbatim
    pub salt: String,
    pub verity_version: u32,
    pub fec: Option<FecParams>,
}

impl HashtreeDescriptor {
    /// Number of whole data blocks covered by the tree.
    pub const fn num_data_blocks(&self) -> u64 {
        self.image_size / self.data_block_size
    }

    /// Whether `image_size` is an exact multiple of `data_block_size`.
    pub const fn is_block_aligned(&self) -> bool {
        self.image_size % self.data_block_size == 0
    }
}

/// Extracts the leading integer of a human readable value.
///
/// `"1,048,576 bytes"` yields `1048576`; thousands separators inside the first
/// word are ignored, everything after it is discarded.
pub fn extract_leading_integer(field: &str, value: &str) -> Result<u64> {
    let word = value.split_whitespace().next().unwrap_or_default();
    let digits: String = word.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid_number(field, value));
    }
    digits
        .parse::<u64>()
        .map_err(|_| Error::invalid_number(field, value))
}

/// Collects the `key: value` lines of the hashtree descriptor section.
///
/// The section starts after the first header line and ends at the first blank
/// line, at the next descriptor header, or at end of input.
pub fn collect_descriptor_fields(text: &str) -> Result<HashMap<String, String>> {
    let mut lines = text.lines();
    if !lines.any(|line| line.contains(DESCRIPTOR_HEADER)) {
        return Err(Error::DescriptorNotFound);
    }

    let mut fields = HashMap::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if trimmed.ends_with("descriptor:") {
            tracing::trace!(line = trimmed, "Next descriptor starts, section ends");
            break;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            tracing::trace!(line = trimmed, "Skipping line without key");
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }
        fields.insert(key.to_owned(), value.to_owned());
    }
    Ok(fields)
}

struct Fields(HashMap<String, String>);

impl Fields {
    fn text(&self, name: &str) -> Result<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::missing(name))
    }

    fn number(&self, name: &str) -> Result<u64> {
        extract_leading_integer(name, self.text(name)?)
    }

    fn positive(&self, name: &str) -> Result<u64> {
        match self.number(name)? {
            0 => Err(Error::invalid_number(name, self.text(name)?)),
            n => Ok(n),
        }
    }

    fn power_of_two(&self, name: &str) -> Result<u64> {
        let n = self.number(name)?;
        if !n.is_power_of_two() {
            return Err(Error::invalid_number(name, self.text(name)?));
        }
        Ok(n)
    }

    /// Empty values never reach here, the collector drops them.
    fn hex(&self, name: &str) -> Result<String> {
        let value = self.text(name)?;
        if hex::decode(value).is_err() {
            return Err(Error::InvalidHexField {
                field: name.to_owned(),
                value: value.to_owned(),
            });
        }
        Ok(value.to_owned())
    }

    fn verity_version(&self) -> Result<u32> {
        let Some(value) = self.0.get(FIELD_VERITY_VERSION) else {
            return Ok(0);
        };
        let version = extract_leading_integer(FIELD_VERITY_VERSION, value)?;
        u32::try_from(version).map_err(|_| Error::invalid_number(FIELD_VERITY_VERSION, value))
    }

    fn fec(&self) -> Result<Option<FecParams>> {
        let roots = match self.0.get(FIELD_FEC_NUM_ROOTS) {
            Some(value) => extract_leading_integer(FIELD_FEC_NUM_ROOTS, value)?,
            None => 0,
        };
        if roots == 0 {
            return Ok(None);
        }

        let offset = self.number(FIELD_FEC_OFFSET)?;
        let size = self.number(FIELD_FEC_SIZE)?;
        let block_count = size / FEC_UNIT_SIZE;
        if block_count == 0 {
            return Err(Error::invalid_number(FIELD_FEC_SIZE, self.text(FIELD_FEC_SIZE)?));
        }
        Ok(Some(FecParams {
            roots,
            start_block: offset / FEC_UNIT_SIZE,
            block_count,
        }))
    }
}

/// Parses the hashtree descriptor out of `avbtool info_image` output.
///
/// Fails with [`Error::DescriptorNotFound`] when no descriptor header is present and
/// with [`Error::MissingField`] when a field needed to build the target is absent.
pub fn parse_hashtree_descriptor(text: &str) -> Result<HashtreeDescriptor> {
    let fields = Fields(collect_descriptor_fields(text)?);
    tracing::trace!(count = fields.0.len(), "Collected descriptor fields");

    let descriptor = HashtreeDescriptor {
        verity_version: fields.verity_version()?,
        image_size: fields.positive(FIELD_IMAGE_SIZE)?,
        data_block_size: fields.power_of_two(FIELD_DATA_BLOCK_SIZE)?,
        hash_block_size: fields.power_of_two(FIELD_HASH_BLOCK_SIZE)?,
        hash_algorithm: fields.text(FIELD_HASH_ALGORITHM)?.to_owned(),
        root_digest: fields.hex(FIELD_ROOT_DIGEST)?,
        salt: fields.hex(FIELD_SALT)?,
        fec: fields.fec()?,
    };
    tracing::debug!(?descriptor, "Parsed hashtree descriptor");
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_WITH_FEC: &str = "\
Footer version:           1.0
Image size:               12582912 bytes
Original image size:      10485760 bytes
VBMeta offset:            10665984
VBMeta size:              1280 bytes
--
Minimum libavb version:   1.0
Header Block:             256 bytes
Authentication Block:     0 bytes
Auxiliary Block:          1024 bytes
Algorithm:                NONE
Rollback Index:           0
Flags:                    0
Rollback Index Location:  0
Release String:           'avbtool 1.3.0'
Descriptors:
    Hashtree descriptor:
      Version of dm-verity:  1
      Image Size:            10,485,760 bytes
      Tree Offset:           10485760
      Tree Size:             86016 bytes
      Data Block Size:       4096 bytes
      Hash Block Size:       4096 bytes
      FEC num roots:         2
      FEC offset:            10571776
      FEC size:              90112 bytes
      Hash Algorithm:        sha256
      Partition Name:        root
      Salt:                  cd34ef56
      Root Digest:           ab12cd34
      Flags:                 0
    Kernel Cmdline descriptor:
      Flags:                 1
      Kernel Cmdline:        'dm=\"1 vroot none ro 1,0\"'
";

    const INFO_NO_FEC: &str = "\
Descriptors:
    Hashtree descriptor:
      Version of dm-verity:  1
      Image Size:            10485760 bytes
      Data Block Size:       4096 bytes
      Hash Block Size:       4096 bytes
      FEC num roots:         0
      Hash Algorithm:        sha256
      Salt:                  cd34
      Root Digest:           ab12

Trailing:                  ignored
";

    #[test]
    fn test_extract_leading_integer() {
        assert_eq!(extract_leading_integer("x", "1,048,576 bytes"), Ok(1_048_576));
        assert_eq!(extract_leading_integer("x", "4096 bytes"), Ok(4096));
        assert_eq!(extract_leading_integer("x", "  17"), Ok(17));
        assert_eq!(
            extract_leading_integer("Image Size", "-5 bytes"),
            Err(Error::invalid_number("Image Size", "-5 bytes"))
        );
        assert!(extract_leading_integer("x", "bytes").is_err());
        assert!(extract_leading_integer("x", "").is_err());
    }

    #[test]
    fn test_parse_with_fec() {
        let descriptor = parse_hashtree_descriptor(INFO_WITH_FEC).unwrap();
        assert_eq!(descriptor.image_size, 10_485_760);
        assert_eq!(descriptor.data_block_size, 4096);
        assert_eq!(descriptor.hash_block_size, 4096);
        assert_eq!(descriptor.hash_algorithm, "sha256");
        assert_eq!(descriptor.root_digest, "ab12cd34");
        assert_eq!(descriptor.salt, "cd34ef56");
        assert_eq!(descriptor.verity_version, 1);
        assert_eq!(
            descriptor.fec,
            Some(FecParams {
                roots: 2,
                start_block: 10_571_776 / 512,
                block_count: 90_112 / 512,
            })
        );
        assert_eq!(descriptor.num_data_blocks(), 2560);
        assert!(descriptor.is_block_aligned());
    }

    #[test]
    fn test_parse_stops_at_next_descriptor() {
        // "Flags" of the kernel cmdline descriptor must not overwrite the hashtree one
        let fields = collect_descriptor_fields(INFO_WITH_FEC).unwrap();
        assert_eq!(fields.get("Flags").map(String::as_str), Some("0"));
        assert!(!fields.contains_key("Kernel Cmdline"));
    }

    #[test]
    fn test_parse_stops_at_blank_line() {
        let fields = collect_descriptor_fields(INFO_NO_FEC).unwrap();
        assert!(!fields.contains_key("Trailing"));
        let descriptor = parse_hashtree_descriptor(INFO_NO_FEC).unwrap();
        assert_eq!(descriptor.fec, None);
    }

    #[test]
    fn test_parse_is_deterministic() {
        assert_eq!(
            parse_hashtree_descriptor(INFO_WITH_FEC),
            parse_hashtree_descriptor(INFO_WITH_FEC)
        );
    }

    #[test]
    fn test_descriptor_not_found() {
        let err = parse_hashtree_descriptor("Footer version: 1.0\nImage size: 4096 bytes\n");
        assert_eq!(err, Err(Error::DescriptorNotFound));
        assert_eq!(parse_hashtree_descriptor(""), Err(Error::DescriptorNotFound));
    }

    #[test]
    fn test_missing_root_digest() {
        let text = INFO_NO_FEC.replace("      Root Digest:           ab12\n", "");
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::MissingField("Root Digest".to_owned()))
        );
    }

    #[test]
    fn test_missing_fec_offset_with_roots() {
        let text = INFO_WITH_FEC.replace("      FEC offset:            10571776\n", "");
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::missing(FIELD_FEC_OFFSET))
        );
    }

    #[test]
    fn test_missing_version_defaults_to_legacy() {
        let text = INFO_NO_FEC.replace("      Version of dm-verity:  1\n", "");
        assert_eq!(parse_hashtree_descriptor(&text).unwrap().verity_version, 0);
    }

    #[test]
    fn test_invalid_fields() {
        let text = INFO_NO_FEC.replace("4096 bytes\n      Hash", "four bytes\n      Hash");
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_DATA_BLOCK_SIZE, "four bytes"))
        );

        let text = INFO_NO_FEC.replace("10485760 bytes", "0 bytes");
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_IMAGE_SIZE, "0 bytes"))
        );

        let text = INFO_NO_FEC.replace("Salt:                  cd34", "Salt:                  cd3");
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::InvalidHexField {
                field: FIELD_SALT.to_owned(),
                value: "cd3".to_owned(),
            })
        );
    }

    #[test]
    fn test_block_sizes_must_be_powers_of_two() {
        let text = INFO_NO_FEC.replace(
            "Data Block Size:       4096 bytes",
            "Data Block Size:       3000 bytes",
        );
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_DATA_BLOCK_SIZE, "3000 bytes"))
        );

        let text = INFO_NO_FEC.replace(
            "Hash Block Size:       4096 bytes",
            "Hash Block Size:       3000 bytes",
        );
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_HASH_BLOCK_SIZE, "3000 bytes"))
        );

        let text = INFO_NO_FEC.replace(
            "Hash Block Size:       4096 bytes",
            "Hash Block Size:       0 bytes",
        );
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_HASH_BLOCK_SIZE, "0 bytes"))
        );

        let text = INFO_NO_FEC.replace("4096 bytes", "1024 bytes");
        let descriptor = parse_hashtree_descriptor(&text).unwrap();
        assert_eq!(descriptor.data_block_size, 1024);
        assert_eq!(descriptor.hash_block_size, 1024);
    }

    #[test]
    fn test_fec_without_blocks() {
        let text = INFO_WITH_FEC.replace(
            "FEC size:              90112 bytes",
            "FEC size:              256 bytes",
        );
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_FEC_SIZE, "256 bytes"))
        );
    }

    #[test]
    fn test_invalid_verity_version() {
        let text = INFO_WITH_FEC.replace(
            "Version of dm-verity:  1",
            "Version of dm-verity:  one",
        );
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_VERITY_VERSION, "one"))
        );

        let text = INFO_WITH_FEC.replace(
            "Version of dm-verity:  1",
            "Version of dm-verity:  4294967296",
        );
        assert_eq!(
            parse_hashtree_descriptor(&text),
            Err(Error::invalid_number(FIELD_VERITY_VERSION, "4294967296"))
        );
    }

    #[test]
    fn test_empty_salt_is_missing() {
        let text = INFO_NO_FEC.replace("Salt:                  cd34", "Salt:");
        assert_eq!(parse_hashtree_descriptor(&text), Err(Error::missing(FIELD_SALT)));
    }
}
