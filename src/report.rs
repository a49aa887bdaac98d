//! Report queries over a capability table.
//!
//! These are the routines a HID client uses to read and build reports once it holds the
//! [`Preparsed`] table: extract or store a usage value, list or set pressed buttons, and
//! initialize an empty report for a given report ID.
//!
//! All functions take the complete report buffer, report ID byte first, sized to the
//! report type's byte length from [`Caps`](crate::caps::Caps).
//!
//! ## Link collections
//! `link_collection: None` matches any collection; `Some(n)` restricts the search to
//! capabilities whose enclosing collection is node `n`.

use crate::caps::{Preparsed, ReportType, ValueCaps};
use crate::error::HidpError;

/// Read `bit_size` bits starting at `start_bit` (LSB first).
pub(crate) fn read_bits(report: &[u8], start_bit: u32, bit_size: u16) -> u32 {
    let mut value = 0u32;
    for i in 0..bit_size.min(32) as u32 {
        let bit = start_bit + i;
        let byte = report.get((bit / 8) as usize).copied().unwrap_or(0);
        if byte & (1 << (bit % 8)) != 0 {
            value |= 1 << i;
        }
    }
    value
}

/// Write the low `bit_size` bits of `value` starting at `start_bit`.
pub(crate) fn write_bits(report: &mut [u8], start_bit: u32, bit_size: u16, value: u32) {
    for i in 0..bit_size.min(32) as u32 {
        let bit = start_bit + i;
        if let Some(byte) = report.get_mut((bit / 8) as usize) {
            let mask = 1u8 << (bit % 8);
            if value & (1 << i) != 0 {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }
}

/// Sign-extend a `bit_size`-bit field.
pub(crate) fn sign_extend(raw: u32, bit_size: u16) -> i32 {
    if bit_size == 0 || bit_size >= 32 {
        return raw as i32;
    }
    let shift = 32 - bit_size as u32;
    ((raw << shift) as i32) >> shift
}

impl Preparsed {
    /// Zeroed report of the right length with its ID byte set.
    pub fn initialize_report(
        &self,
        report_type: ReportType,
        report_id: u8,
    ) -> Result<Vec<u8>, HidpError> {
        if self.report_length(report_type, report_id).is_none() {
            return Err(HidpError::IncompatibleReportId(report_id));
        }
        // Reports are always handed around at the type's maximum length.
        let mut report = vec![0u8; self.caps.report_byte_length(report_type) as usize];
        if let Some(first) = report.first_mut() {
            *first = report_id;
        }
        Ok(report)
    }

    fn check_report(&self, report_type: ReportType, report: &[u8]) -> Result<u8, HidpError> {
        let expected = self.caps.report_byte_length(report_type) as usize;
        if report.is_empty() || report.len() != expected {
            return Err(HidpError::InvalidReportLength {
                expected,
                actual: report.len(),
            });
        }
        Ok(report[0])
    }

    /// Capability holding `usage`, filtered by predicate, matching the report's ID.
    fn find_caps(
        &self,
        report_type: ReportType,
        report_id: u8,
        mut matches: impl FnMut(&ValueCaps) -> bool,
    ) -> Result<&ValueCaps, HidpError> {
        let mut seen_other_id = false;
        for caps in self.all_caps(report_type) {
            if caps.is_filler() || !matches(caps) {
                continue;
            }
            if caps.report_id == report_id {
                return Ok(caps);
            }
            seen_other_id = true;
        }
        if seen_other_id {
            Err(HidpError::IncompatibleReportId(report_id))
        } else {
            Err(HidpError::UsageNotFound)
        }
    }

    fn find_value_caps(
        &self,
        report_type: ReportType,
        report_id: u8,
        usage_page: u16,
        link_collection: Option<u16>,
        usage: u16,
    ) -> Result<&ValueCaps, HidpError> {
        let caps = self.find_caps(report_type, report_id, |c| {
            c.usage_page == usage_page
                && link_collection.map_or(true, |lc| c.link_collection == lc)
                && c.contains_usage(usage)
        })?;
        if caps.is_button() {
            return Err(HidpError::NotValueUsage);
        }
        Ok(caps)
    }

    /// Bit position of `usage` inside a value capability.
    fn value_bit(caps: &ValueCaps, usage: u16) -> u32 {
        caps.start_bit + (usage - caps.usage_min) as u32 * caps.bit_size as u32
    }

    /// Raw (unsigned) value of a usage.
    pub fn get_usage_value(
        &self,
        report_type: ReportType,
        usage_page: u16,
        link_collection: Option<u16>,
        usage: u16,
        report: &[u8],
    ) -> Result<u32, HidpError> {
        let report_id = self.check_report(report_type, report)?;
        let caps =
            self.find_value_caps(report_type, report_id, usage_page, link_collection, usage)?;
        Ok(read_bits(report, Self::value_bit(caps, usage), caps.bit_size))
    }

    /// Signed value, scaled into the physical range when one is declared.
    pub fn get_scaled_usage_value(
        &self,
        report_type: ReportType,
        usage_page: u16,
        link_collection: Option<u16>,
        usage: u16,
        report: &[u8],
    ) -> Result<i32, HidpError> {
        let report_id = self.check_report(report_type, report)?;
        let caps =
            self.find_value_caps(report_type, report_id, usage_page, link_collection, usage)?;
        if caps.logical_min >= caps.logical_max {
            return Err(HidpError::BadLogPhyValues);
        }

        let raw = read_bits(report, Self::value_bit(caps, usage), caps.bit_size);
        let value = if caps.logical_min < 0 {
            sign_extend(raw, caps.bit_size)
        } else {
            raw as i32
        };
        if value < caps.logical_min || value > caps.logical_max {
            return Err(HidpError::ValueOutOfRange);
        }

        if caps.physical_min == caps.physical_max {
            return Ok(value);
        }
        let (lmin, lmax) = (caps.logical_min as i64, caps.logical_max as i64);
        let (pmin, pmax) = (caps.physical_min as i64, caps.physical_max as i64);
        Ok((pmin + (value as i64 - lmin) * (pmax - pmin) / (lmax - lmin)) as i32)
    }

    /// Store a raw value.
    pub fn set_usage_value(
        &self,
        report_type: ReportType,
        usage_page: u16,
        link_collection: Option<u16>,
        usage: u16,
        value: u32,
        report: &mut [u8],
    ) -> Result<(), HidpError> {
        let report_id = self.check_report(report_type, report)?;
        let caps =
            self.find_value_caps(report_type, report_id, usage_page, link_collection, usage)?;
        if caps.bit_size < 32 && value >> caps.bit_size != 0 {
            return Err(HidpError::ValueOutOfRange);
        }
        write_bits(report, Self::value_bit(caps, usage), caps.bit_size, value);
        Ok(())
    }

    fn button_caps_for<'a>(
        &'a self,
        report_type: ReportType,
        report_id: u8,
        usage_page: u16,
        link_collection: Option<u16>,
    ) -> Result<Vec<&'a ValueCaps>, HidpError> {
        let mut matching = Vec::new();
        let mut seen_other_id = false;
        for caps in self.button_caps(report_type) {
            if caps.usage_page != usage_page
                || !link_collection.map_or(true, |lc| caps.link_collection == lc)
            {
                continue;
            }
            if caps.report_id == report_id {
                matching.push(caps);
            } else {
                seen_other_id = true;
            }
        }
        if matching.is_empty() {
            return Err(if seen_other_id {
                HidpError::IncompatibleReportId(report_id)
            } else {
                HidpError::UsageNotFound
            });
        }
        Ok(matching)
    }

    /// Slot count and selector table of the array block `caps` belongs to.
    ///
    /// Selector `logical_min + i` stands for entry `i` of the table, across every usage
    /// page sharing the block.
    fn array_block(&self, report_type: ReportType, caps: &ValueCaps) -> (u32, Vec<(u16, u16)>) {
        let mut slots = 0u32;
        let mut selectors = Vec::new();
        for c in self.all_caps(report_type) {
            if !c.is_array || c.report_id != caps.report_id || c.start_bit != caps.start_bit {
                continue;
            }
            slots = slots.max(u32::from(c.report_count));
            selectors.extend((c.usage_min..=c.usage_max).map(|u| (c.usage_page, u)));
        }
        (slots, selectors)
    }

    /// Usages currently "on" (pressed buttons) for a usage page.
    pub fn get_usages(
        &self,
        report_type: ReportType,
        usage_page: u16,
        link_collection: Option<u16>,
        report: &[u8],
    ) -> Result<Vec<u16>, HidpError> {
        let report_id = self.check_report(report_type, report)?;
        let matching = self.button_caps_for(report_type, report_id, usage_page, link_collection)?;

        let mut usages = Vec::new();
        let mut arrays_done: Vec<u32> = Vec::new();
        for caps in &matching {
            if caps.is_array {
                // All caps of one array share its bits; decode the block once.
                if arrays_done.contains(&caps.start_bit) {
                    continue;
                }
                arrays_done.push(caps.start_bit);
                let (slots, selectors) = self.array_block(report_type, caps);
                for slot in 0..slots {
                    let bit = caps.start_bit + slot * caps.bit_size as u32;
                    let raw = read_bits(report, bit, caps.bit_size);
                    let index = raw as i64 - caps.logical_min as i64;
                    if (raw == 0 && caps.logical_min > 0) || index < 0 {
                        continue;
                    }
                    if let Some(&(page, usage)) = selectors.get(index as usize) {
                        if page == usage_page && usage != 0 && !usages.contains(&usage) {
                            usages.push(usage);
                        }
                    }
                }
            } else if caps.is_range {
                for (i, usage) in (caps.usage_min..=caps.usage_max).enumerate() {
                    if i as u32 >= caps.report_count as u32 {
                        break;
                    }
                    if read_bits(report, caps.start_bit + i as u32, 1) != 0 {
                        usages.push(usage);
                    }
                }
            } else if read_bits(report, caps.start_bit, caps.report_count) != 0 {
                usages.push(caps.usage_min);
            }
        }
        Ok(usages)
    }

    /// Turn on the given button usages.
    pub fn set_usages(
        &self,
        report_type: ReportType,
        usage_page: u16,
        link_collection: Option<u16>,
        usages: &[u16],
        report: &mut [u8],
    ) -> Result<(), HidpError> {
        let report_id = self.check_report(report_type, report)?;
        let matching = self.button_caps_for(report_type, report_id, usage_page, link_collection)?;

        'usages: for &usage in usages {
            let Some(caps) = matching.iter().find(|c| c.contains_usage(usage)) else {
                return Err(HidpError::UsageNotFound);
            };

            if !caps.is_array {
                let offset = if caps.is_range { (usage - caps.usage_min) as u32 } else { 0 };
                write_bits(report, caps.start_bit + offset, 1, 1);
                continue;
            }

            let (slots, selectors) = self.array_block(report_type, caps);
            let Some(index) = selectors
                .iter()
                .position(|&(page, u)| page == usage_page && u == usage)
            else {
                return Err(HidpError::UsageNotFound);
            };
            let selector = (caps.logical_min as i64 + index as i64) as u32;
            for slot in 0..slots {
                let bit = caps.start_bit + slot * caps.bit_size as u32;
                let current = read_bits(report, bit, caps.bit_size);
                if current == selector {
                    continue 'usages;
                }
                if current == 0 {
                    write_bits(report, bit, caps.bit_size, selector);
                    continue 'usages;
                }
            }
            return Err(HidpError::BufferTooSmall);
        }
        Ok(())
    }
}
