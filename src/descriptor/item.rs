//! Short-item tokenizer for HID report descriptors.
//!
//! Every item is a 1-byte prefix `tag << 4 | type << 2 | size_code` followed by
//! 0, 1, 2 or 4 little-endian data bytes (`size_code` 3 means 4 bytes).
//! Long items (prefix `0xFE`) use the reserved type and are rejected by the parser.

use crate::error::ParseError;

/// Item category encoded in bits 2..3 of the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemType {
    Main,
    Global,
    Local,
    Reserved,
}

pub(crate) mod main_tag {
    pub const INPUT: u8 = 0x8;
    pub const OUTPUT: u8 = 0x9;
    pub const COLLECTION: u8 = 0xA;
    pub const FEATURE: u8 = 0xB;
    pub const END_COLLECTION: u8 = 0xC;
}

pub(crate) mod global_tag {
    pub const USAGE_PAGE: u8 = 0x0;
    pub const LOGICAL_MINIMUM: u8 = 0x1;
    pub const LOGICAL_MAXIMUM: u8 = 0x2;
    pub const PHYSICAL_MINIMUM: u8 = 0x3;
    pub const PHYSICAL_MAXIMUM: u8 = 0x4;
    pub const UNIT_EXPONENT: u8 = 0x5;
    pub const UNIT: u8 = 0x6;
    pub const REPORT_SIZE: u8 = 0x7;
    pub const REPORT_ID: u8 = 0x8;
    pub const REPORT_COUNT: u8 = 0x9;
    pub const PUSH: u8 = 0xA;
    pub const POP: u8 = 0xB;
}

pub(crate) mod local_tag {
    pub const USAGE: u8 = 0x0;
    pub const USAGE_MINIMUM: u8 = 0x1;
    pub const USAGE_MAXIMUM: u8 = 0x2;
    pub const DESIGNATOR_INDEX: u8 = 0x3;
    pub const DESIGNATOR_MINIMUM: u8 = 0x4;
    pub const DESIGNATOR_MAXIMUM: u8 = 0x5;
    pub const STRING_INDEX: u8 = 0x7;
    pub const STRING_MINIMUM: u8 = 0x8;
    pub const STRING_MAXIMUM: u8 = 0x9;
    pub const DELIMITER: u8 = 0xA;
}

/// One decoded short item, borrowing its data bytes from the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Item<'a> {
    pub offset: usize,
    pub prefix: u8,
    pub item_type: ItemType,
    pub tag: u8,
    pub data: &'a [u8],
}

impl<'a> Item<'a> {
    /// Data as an unsigned little-endian integer (size 0 reads as 0).
    pub fn unsigned(&self) -> u32 {
        self.data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32)
    }

    /// Data sign-extended from its declared size (two's complement).
    pub fn signed(&self) -> i32 {
        let raw = self.unsigned();
        match self.data.len() {
            1 => raw as u8 as i8 as i32,
            2 => raw as u16 as i16 as i32,
            4 => raw as i32,
            _ => 0,
        }
    }
}

/// Iterator over the items of a descriptor. Stops after the first error.
pub(crate) struct Items<'a> {
    bytes: &'a [u8],
    position: usize,
    failed: bool,
}

impl<'a> Items<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            position: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<Item<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let offset = self.position;
        let prefix = *self.bytes.get(offset)?;

        let size = match prefix & 0x3 {
            3 => 4,
            n => n as usize,
        };
        let item_type = match (prefix >> 2) & 0x3 {
            0 => ItemType::Main,
            1 => ItemType::Global,
            2 => ItemType::Local,
            _ => ItemType::Reserved,
        };

        let available = self.bytes.len() - offset - 1;
        if size > available {
            self.failed = true;
            return Some(Err(ParseError::Truncated {
                offset,
                needed: size,
                available,
            }));
        }

        let data = &self.bytes[offset + 1..offset + 1 + size];
        self.position = offset + 1 + size;

        Some(Ok(Item {
            offset,
            prefix,
            item_type,
            tag: prefix >> 4,
            data,
        }))
    }
}
