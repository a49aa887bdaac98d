//! HID report descriptor parser.
//!
//! [`parse_descriptor`] walks a report descriptor item by item and builds the
//! [`Preparsed`] capability table. Parsing is pure and single threaded; the working
//! state lives in a `ParserState` local to the call.
//!
//! ## State scoping
//! - **Global** items (usage page, logical/physical extrema, units, report size/ID/count)
//!   persist across main items. `Push`/`Pop` save and restore the whole global state.
//! - **Local** items (usages, designators, strings) apply to the next main item only and
//!   are reset after every main item.
//! - **Collection** items additionally push the "link" sub-state (enclosing collection
//!   index, usage page and usage) which `End Collection` restores.
//!
//! ## Bit placement
//! Each (report type, report ID) pair keeps a running bit offset starting at 8: the
//! first byte of every report is reserved for the report ID. Variable items give every
//! usage its own `report_size` bits; array items share one block of
//! `report_count * report_size` bits between all their usages. The first capability of
//! an array carries the block's `report_count`, the others carry 1.
//!
//! ## Failure
//! Any malformed or unsupported input fails the whole parse with a [`ParseError`]; no
//! partial table is returned.

mod item;

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::caps::{main_flags, Caps, CollectionNode, Preparsed, ReportLength, ReportType, ValueCaps};
use crate::error::ParseError;
use item::{global_tag, local_tag, main_tag, Item, ItemType, Items};

/// Maximum depth of the global `Push` stack.
pub const MAX_GLOBAL_STACK: usize = 16;
/// Maximum collection nesting depth.
pub const MAX_COLLECTION_DEPTH: usize = 32;
/// Maximum number of usages accumulated before a main item.
pub const MAX_USAGES: usize = 256;
/// Widest field a report query can represent.
pub const MAX_REPORT_SIZE: u32 = 32;
/// Capabilities per report type, and collections, are counted in `u16`.
const MAX_ENTRIES: usize = u16::MAX as usize;

/// Parse a raw report descriptor into a capability table.
pub fn parse_descriptor(bytes: &[u8]) -> Result<Preparsed, ParseError> {
    let mut state = ParserState::default();

    for item in Items::new(bytes) {
        let item = item?;
        trace!(
            offset = item.offset,
            prefix = item.prefix,
            value = item.unsigned(),
            "descriptor item"
        );
        match item.item_type {
            ItemType::Main => state.parse_main(&item)?,
            ItemType::Global => state.parse_global(&item)?,
            ItemType::Local => state.parse_local(&item)?,
            ItemType::Reserved => {
                return Err(ParseError::UnsupportedItem {
                    offset: item.offset,
                    prefix: item.prefix,
                })
            }
        }
    }

    if !state.link_stack.is_empty() {
        warn!(
            open = state.link_stack.len(),
            "report descriptor ends with unterminated collections"
        );
    }

    let preparsed = state.finish();
    debug!(
        usage_page = preparsed.caps.usage_page,
        usage = preparsed.caps.usage,
        input_len = preparsed.caps.input_report_byte_length,
        output_len = preparsed.caps.output_report_byte_length,
        feature_len = preparsed.caps.feature_report_byte_length,
        collections = preparsed.nodes.len(),
        "parsed report descriptor"
    );
    Ok(preparsed)
}

/// State shared by all main items until changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GlobalState {
    pub usage_page: u16,
    pub logical_min: i32,
    pub logical_max: i32,
    pub physical_min: i32,
    pub physical_max: i32,
    pub unit_exponent: i32,
    pub unit: u32,
    pub report_size: u16,
    pub report_id: u8,
    pub report_count: u16,
}

/// One entry of the local usage list. A range is a single entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UsageEntry {
    page: u16,
    min: u16,
    max: u16,
}

/// Inclusive index range shared by designators and strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IndexRange {
    min: u16,
    max: u16,
    is_range: bool,
}

impl IndexRange {
    fn set_index(&mut self, index: u16) {
        *self = IndexRange {
            min: index,
            max: index,
            is_range: false,
        };
    }

    fn set_min(&mut self, min: u16) {
        self.min = min;
        self.is_range = true;
    }

    fn set_max(&mut self, max: u16) {
        self.max = max;
        self.is_range = true;
    }
}

/// State that applies to the next main item only.
#[derive(Debug, Clone, Default)]
struct LocalState {
    usages: Vec<UsageEntry>,
    is_range: bool,
    designator: IndexRange,
    string: IndexRange,
}

impl LocalState {
    /// A single usage. Discards a range being accumulated.
    fn usage(&mut self, page: u16, usage: u16) -> bool {
        if self.is_range {
            self.usages.clear();
        }
        self.is_range = false;
        if self.usages.len() >= MAX_USAGES {
            return false;
        }
        self.usages.push(UsageEntry {
            page,
            min: usage,
            max: usage,
        });
        true
    }

    /// Range start. A pending maximum survives only if a range was already open.
    fn usage_min(&mut self, page: u16, usage: u16) {
        let max = match (self.is_range, self.usages.first()) {
            (true, Some(entry)) => entry.max,
            _ => 0,
        };
        self.usages.clear();
        self.usages.push(UsageEntry {
            page,
            min: usage,
            max,
        });
        self.is_range = true;
    }

    /// Range end. A pending minimum survives only if a range was already open.
    fn usage_max(&mut self, page: u16, usage: u16) {
        let min = match (self.is_range, self.usages.first()) {
            (true, Some(entry)) => entry.min,
            _ => 0,
        };
        self.usages.clear();
        self.usages.push(UsageEntry {
            page,
            min,
            max: usage,
        });
        self.is_range = true;
    }
}

/// Collection sub-state stamped on every capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LinkState {
    collection: u16,
    usage_page: u16,
    usage: u16,
}

/// Working state of one parse.
#[derive(Debug, Default)]
pub(crate) struct ParserState {
    global: GlobalState,
    global_stack: Vec<GlobalState>,
    local: LocalState,
    link: LinkState,
    link_stack: Vec<LinkState>,
    nodes: Vec<CollectionNode>,
    caps: Caps,
    values: [Vec<ValueCaps>; 3],
    /// Running bit offset per report ID, for each report type.
    bit_offsets: [BTreeMap<u8, u32>; 3],
}

impl ParserState {
    fn parse_main(&mut self, item: &Item<'_>) -> Result<(), ParseError> {
        let data = item.unsigned();
        match item.tag {
            main_tag::INPUT => self.new_value_caps(ReportType::Input, data as u16, item.offset)?,
            main_tag::OUTPUT => self.new_value_caps(ReportType::Output, data as u16, item.offset)?,
            main_tag::FEATURE => {
                self.new_value_caps(ReportType::Feature, data as u16, item.offset)?
            }
            main_tag::COLLECTION => self.new_collection(data as u8, item.offset)?,
            main_tag::END_COLLECTION => self.end_collection(item.offset)?,
            _ => {
                return Err(ParseError::UnsupportedItem {
                    offset: item.offset,
                    prefix: item.prefix,
                })
            }
        }
        self.local = LocalState::default();
        Ok(())
    }

    fn parse_global(&mut self, item: &Item<'_>) -> Result<(), ParseError> {
        let g = &mut self.global;
        match item.tag {
            global_tag::USAGE_PAGE => g.usage_page = item.unsigned() as u16,
            global_tag::LOGICAL_MINIMUM => g.logical_min = item.signed(),
            global_tag::LOGICAL_MAXIMUM => g.logical_max = item.signed(),
            global_tag::PHYSICAL_MINIMUM => g.physical_min = item.signed(),
            global_tag::PHYSICAL_MAXIMUM => g.physical_max = item.signed(),
            global_tag::UNIT_EXPONENT => g.unit_exponent = item.signed(),
            global_tag::UNIT => g.unit = item.unsigned(),
            global_tag::REPORT_SIZE => {
                let value = item.unsigned();
                if value > MAX_REPORT_SIZE {
                    return Err(ParseError::InvalidReportSize {
                        offset: item.offset,
                        value,
                        max: MAX_REPORT_SIZE,
                    });
                }
                g.report_size = value as u16;
            }
            global_tag::REPORT_ID => {
                let value = item.unsigned();
                g.report_id = u8::try_from(value).map_err(|_| ParseError::InvalidReportId {
                    offset: item.offset,
                    value,
                })?;
            }
            global_tag::REPORT_COUNT => {
                let value = item.unsigned();
                g.report_count = u16::try_from(value).map_err(|_| ParseError::InvalidReportCount {
                    offset: item.offset,
                    value,
                })?;
            }
            global_tag::PUSH => {
                if self.global_stack.len() >= MAX_GLOBAL_STACK {
                    return Err(ParseError::GlobalStackOverflow {
                        offset: item.offset,
                        depth: MAX_GLOBAL_STACK,
                    });
                }
                self.global_stack.push(self.global);
            }
            global_tag::POP => {
                self.global = self
                    .global_stack
                    .pop()
                    .ok_or(ParseError::GlobalStackUnderflow {
                        offset: item.offset,
                    })?;
            }
            _ => {
                return Err(ParseError::UnsupportedItem {
                    offset: item.offset,
                    prefix: item.prefix,
                })
            }
        }
        Ok(())
    }

    fn parse_local(&mut self, item: &Item<'_>) -> Result<(), ParseError> {
        let value = item.unsigned();
        // 4-byte usages carry their own usage page in the high half.
        let (page, usage) = if item.data.len() == 4 {
            ((value >> 16) as u16, value as u16)
        } else {
            (self.global.usage_page, value as u16)
        };

        match item.tag {
            local_tag::USAGE => {
                if !self.local.usage(page, usage) {
                    return Err(ParseError::UsageOverflow {
                        offset: item.offset,
                    });
                }
            }
            local_tag::USAGE_MINIMUM => self.local.usage_min(page, usage),
            local_tag::USAGE_MAXIMUM => self.local.usage_max(page, usage),
            local_tag::DESIGNATOR_INDEX => self.local.designator.set_index(value as u16),
            local_tag::DESIGNATOR_MINIMUM => self.local.designator.set_min(value as u16),
            local_tag::DESIGNATOR_MAXIMUM => self.local.designator.set_max(value as u16),
            local_tag::STRING_INDEX => self.local.string.set_index(value as u16),
            local_tag::STRING_MINIMUM => self.local.string.set_min(value as u16),
            local_tag::STRING_MAXIMUM => self.local.string.set_max(value as u16),
            local_tag::DELIMITER => {
                return Err(ParseError::Delimiter {
                    offset: item.offset,
                })
            }
            _ => {
                return Err(ParseError::UnsupportedItem {
                    offset: item.offset,
                    prefix: item.prefix,
                })
            }
        }
        Ok(())
    }

    /// Commit an Input/Output/Feature item.
    fn new_value_caps(
        &mut self,
        report_type: ReportType,
        bit_field: u16,
        offset: usize,
    ) -> Result<(), ParseError> {
        let g = self.global;
        if g.report_count == 0 {
            return Ok(());
        }

        let usages: Vec<UsageEntry> = if self.local.usages.is_empty() {
            vec![UsageEntry {
                page: g.usage_page,
                ..UsageEntry::default()
            }]
        } else {
            self.local.usages.clone()
        };
        let is_array = bit_field & main_flags::VARIABLE == 0;
        let new_caps = if is_array || self.local.is_range {
            usages.len()
        } else {
            usages.len().min(g.report_count as usize)
        };
        if self.values[report_type.index()].len() + new_caps > MAX_ENTRIES {
            return Err(ParseError::TooManyCaps {
                offset,
                max: MAX_ENTRIES,
            });
        }

        let running = self.bit_offsets[report_type.index()]
            .entry(g.report_id)
            .or_insert(8);
        let start = *running;
        let end = u64::from(start) + u64::from(g.report_size) * u64::from(g.report_count);
        let max_bits = u16::MAX as u64 * 8;
        if end > max_bits {
            return Err(ParseError::ReportTooLong {
                offset,
                max: u16::MAX as usize,
            });
        }
        *running = end as u32;

        let template = ValueCaps {
            usage_page: g.usage_page,
            string_min: self.local.string.min,
            string_max: self.local.string.max,
            designator_min: self.local.designator.min,
            designator_max: self.local.designator.max,
            report_id: g.report_id,
            start_bit: start,
            bit_size: g.report_size,
            report_count: g.report_count,
            logical_min: g.logical_min,
            logical_max: g.logical_max,
            physical_min: g.physical_min,
            physical_max: g.physical_max,
            units: g.unit,
            units_exp: g.unit_exponent,
            link_collection: self.link.collection,
            link_usage_page: self.link.usage_page,
            link_usage: self.link.usage,
            bit_field,
            is_range: self.local.is_range,
            is_string_range: self.local.string.is_range,
            is_designator_range: self.local.designator.is_range,
            is_array,
            ..ValueCaps::default()
        };

        let with_usage = |usage: &UsageEntry| ValueCaps {
            usage_page: usage.page,
            usage_min: usage.min,
            usage_max: usage.max,
            ..template.clone()
        };

        let out = &mut self.values[report_type.index()];
        if is_array {
            // One block shared by every usage; only the first entry carries its count.
            for (i, usage) in usages.iter().enumerate() {
                let mut caps = with_usage(usage);
                if i > 0 {
                    caps.report_count = 1;
                }
                out.push(caps);
            }
        } else if template.is_range {
            out.extend(usages.iter().map(with_usage));
        } else {
            // One usage per field, the last one absorbs the remaining count.
            let used = new_caps;
            for (i, usage) in usages.iter().take(used).enumerate() {
                let mut caps = with_usage(usage);
                caps.start_bit = start + i as u32 * u32::from(g.report_size);
                caps.report_count = if i + 1 == used {
                    g.report_count - (used as u16 - 1)
                } else {
                    1
                };
                out.push(caps);
            }
        }
        Ok(())
    }

    fn new_collection(&mut self, kind: u8, offset: usize) -> Result<(), ParseError> {
        if self.link_stack.len() >= MAX_COLLECTION_DEPTH {
            return Err(ParseError::CollectionStackOverflow {
                offset,
                depth: MAX_COLLECTION_DEPTH,
            });
        }

        let (usage_page, usage) = self
            .local
            .usages
            .first()
            .map(|u| (u.page, u.min))
            .unwrap_or((self.global.usage_page, 0));

        let index = u16::try_from(self.nodes.len())
            .ok()
            .filter(|&i| i < u16::MAX)
            .ok_or(ParseError::TooManyCollections {
                offset,
                max: MAX_ENTRIES,
            })?;
        let parent = self.link.collection;
        let mut node = CollectionNode {
            link_usage: usage,
            link_usage_page: usage_page,
            parent,
            collection_type: kind,
            ..CollectionNode::default()
        };

        if index == 0 {
            self.caps.usage_page = usage_page;
            self.caps.usage = usage;
        } else if let Some(parent_node) = self.nodes.get_mut(parent as usize) {
            node.next_sibling = parent_node.first_child;
            parent_node.first_child = index;
            parent_node.number_of_children += 1;
        }
        self.nodes.push(node);

        self.link_stack.push(self.link);
        self.link = LinkState {
            collection: index,
            usage_page,
            usage,
        };
        Ok(())
    }

    fn end_collection(&mut self, offset: usize) -> Result<(), ParseError> {
        self.link = self
            .link_stack
            .pop()
            .ok_or(ParseError::CollectionStackUnderflow { offset })?;
        Ok(())
    }

    /// Classify caps, assign data indices and compute report lengths.
    fn finish(mut self) -> Preparsed {
        let mut report_lengths = Vec::new();

        for report_type in ReportType::ALL {
            let mut buttons = 0u16;
            let mut values = 0u16;
            let mut data_index = 0u16;

            for caps in self.values[report_type.index()].iter_mut() {
                if caps.is_filler() {
                    continue;
                }
                caps.data_index_min = data_index;
                caps.data_index_max = data_index.saturating_add(caps.usage_count() - 1);
                data_index = caps.data_index_max.saturating_add(1);
                if caps.is_button() {
                    buttons += 1;
                } else {
                    values += 1;
                }
            }
            self.caps.set_counts(report_type, buttons, values, data_index);

            let mut max_len = 0u16;
            for (&report_id, &bits) in &self.bit_offsets[report_type.index()] {
                let byte_length = bits.div_ceil(8) as u16;
                max_len = max_len.max(byte_length);
                report_lengths.push(ReportLength {
                    report_type,
                    report_id,
                    byte_length,
                });
            }
            self.caps.set_report_byte_length(report_type, max_len);
        }

        self.caps.number_link_collection_nodes = self.nodes.len() as u16;

        Preparsed {
            caps: self.caps,
            values: self.values,
            nodes: self.nodes,
            report_lengths,
        }
    }
}
