//! Capability table ("preparsed data").
//!
//! [`Preparsed`] is the output of [`parse_descriptor`](crate::descriptor::parse_descriptor):
//! overall [`Caps`], the ordered list of [`ValueCaps`] for each [`ReportType`], and the
//! [`CollectionNode`] array. It is built once per device and shared read-only afterwards.
//!
//! ## Classification
//! Every main item produces one or more `ValueCaps`. They fall in three groups:
//! - **filler**: `usage_min == 0 && usage_max == 0`, pure bit reservation (padding)
//! - **button**: one-bit fields, or array fields (selectors)
//! - **value**: everything else
//!
//! Filler caps keep their place in [`Preparsed::all_caps`] so bit layouts stay complete,
//! but they are excluded from the counts in [`Caps`] and from
//! [`Preparsed::button_caps`] / [`Preparsed::value_caps`].

use serde::{Deserialize, Serialize};

/// Report direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

impl ReportType {
    pub const ALL: [ReportType; 3] = [ReportType::Input, ReportType::Output, ReportType::Feature];

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            ReportType::Input => 0,
            ReportType::Output => 1,
            ReportType::Feature => 2,
        }
    }
}

/// Bits of the Input/Output/Feature main item data.
pub mod main_flags {
    pub const CONSTANT: u16 = 0x001;
    pub const VARIABLE: u16 = 0x002;
    pub const RELATIVE: u16 = 0x004;
    pub const WRAP: u16 = 0x008;
    pub const NON_LINEAR: u16 = 0x010;
    pub const NO_PREFERRED: u16 = 0x020;
    pub const NULL_STATE: u16 = 0x040;
    pub const VOLATILE: u16 = 0x080;
    pub const BUFFERED_BYTES: u16 = 0x100;
}

/// Collection types (data byte of the Collection main item).
pub mod collection_type {
    pub const PHYSICAL: u8 = 0x00;
    pub const APPLICATION: u8 = 0x01;
    pub const LOGICAL: u8 = 0x02;
    pub const REPORT: u8 = 0x03;
    pub const NAMED_ARRAY: u8 = 0x04;
    pub const USAGE_SWITCH: u8 = 0x05;
    pub const USAGE_MODIFIER: u8 = 0x06;
}

/// One field (or usage range) inside a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCaps {
    pub usage_page: u16,
    /// First usage; equal to `usage_max` unless `is_range`.
    pub usage_min: u16,
    pub usage_max: u16,
    pub data_index_min: u16,
    pub data_index_max: u16,
    pub string_min: u16,
    pub string_max: u16,
    pub designator_min: u16,
    pub designator_max: u16,

    pub report_id: u8,
    /// Absolute bit position in the report, counting the report ID byte.
    pub start_bit: u32,
    pub bit_size: u16,
    /// Fields covered. Array blocks carry their count on the first capability only.
    pub report_count: u16,

    pub logical_min: i32,
    pub logical_max: i32,
    pub physical_min: i32,
    pub physical_max: i32,
    pub units: u32,
    pub units_exp: i32,

    /// Index of the enclosing collection node.
    pub link_collection: u16,
    pub link_usage_page: u16,
    pub link_usage: u16,

    /// Raw main item data (see [`main_flags`]).
    pub bit_field: u16,
    pub is_range: bool,
    pub is_string_range: bool,
    pub is_designator_range: bool,
    pub is_array: bool,
}

impl ValueCaps {
    /// Padding entry with no usage.
    #[inline]
    pub fn is_filler(&self) -> bool {
        self.usage_min == 0 && self.usage_max == 0
    }

    #[inline]
    pub fn is_button(&self) -> bool {
        !self.is_filler() && (self.bit_size == 1 || self.is_array)
    }

    #[inline]
    pub fn is_value(&self) -> bool {
        !self.is_filler() && !self.is_button()
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.bit_field & main_flags::CONSTANT != 0
    }

    #[inline]
    pub fn is_absolute(&self) -> bool {
        self.bit_field & main_flags::RELATIVE == 0
    }

    #[inline]
    pub fn has_null(&self) -> bool {
        self.bit_field & main_flags::NULL_STATE != 0
    }

    /// Number of usages covered (1 for a single usage).
    #[inline]
    pub fn usage_count(&self) -> u16 {
        self.usage_max.saturating_sub(self.usage_min) + 1
    }

    #[inline]
    pub fn contains_usage(&self, usage: u16) -> bool {
        usage >= self.usage_min && usage <= self.usage_max
    }

    /// Bits occupied by this field (shared bits of array fields count once).
    #[inline]
    pub fn total_bits(&self) -> u32 {
        self.bit_size as u32 * self.report_count as u32
    }
}

/// One collection in the link-collection tree.
///
/// Children are linked most recent first: `first_child` is the last child created and
/// each child's `next_sibling` points at the child created before it (0 ends the chain).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionNode {
    pub link_usage: u16,
    pub link_usage_page: u16,
    pub parent: u16,
    pub number_of_children: u16,
    pub next_sibling: u16,
    pub first_child: u16,
    pub collection_type: u8,
    pub is_alias: bool,
}

/// Summary counts and report lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caps {
    pub usage: u16,
    pub usage_page: u16,
    pub input_report_byte_length: u16,
    pub output_report_byte_length: u16,
    pub feature_report_byte_length: u16,
    pub number_link_collection_nodes: u16,
    pub number_input_button_caps: u16,
    pub number_input_value_caps: u16,
    pub number_input_data_indices: u16,
    pub number_output_button_caps: u16,
    pub number_output_value_caps: u16,
    pub number_output_data_indices: u16,
    pub number_feature_button_caps: u16,
    pub number_feature_value_caps: u16,
    pub number_feature_data_indices: u16,
}

impl Caps {
    pub fn report_byte_length(&self, report_type: ReportType) -> u16 {
        match report_type {
            ReportType::Input => self.input_report_byte_length,
            ReportType::Output => self.output_report_byte_length,
            ReportType::Feature => self.feature_report_byte_length,
        }
    }

    pub fn button_caps_count(&self, report_type: ReportType) -> u16 {
        match report_type {
            ReportType::Input => self.number_input_button_caps,
            ReportType::Output => self.number_output_button_caps,
            ReportType::Feature => self.number_feature_button_caps,
        }
    }

    pub fn value_caps_count(&self, report_type: ReportType) -> u16 {
        match report_type {
            ReportType::Input => self.number_input_value_caps,
            ReportType::Output => self.number_output_value_caps,
            ReportType::Feature => self.number_feature_value_caps,
        }
    }

    pub fn data_indices_count(&self, report_type: ReportType) -> u16 {
        match report_type {
            ReportType::Input => self.number_input_data_indices,
            ReportType::Output => self.number_output_data_indices,
            ReportType::Feature => self.number_feature_data_indices,
        }
    }

    pub(crate) fn set_counts(&mut self, report_type: ReportType, buttons: u16, values: u16, data_indices: u16) {
        let (b, v, d) = match report_type {
            ReportType::Input => (
                &mut self.number_input_button_caps,
                &mut self.number_input_value_caps,
                &mut self.number_input_data_indices,
            ),
            ReportType::Output => (
                &mut self.number_output_button_caps,
                &mut self.number_output_value_caps,
                &mut self.number_output_data_indices,
            ),
            ReportType::Feature => (
                &mut self.number_feature_button_caps,
                &mut self.number_feature_value_caps,
                &mut self.number_feature_data_indices,
            ),
        };
        *b = buttons;
        *v = values;
        *d = data_indices;
    }

    pub(crate) fn set_report_byte_length(&mut self, report_type: ReportType, len: u16) {
        match report_type {
            ReportType::Input => self.input_report_byte_length = len,
            ReportType::Output => self.output_report_byte_length = len,
            ReportType::Feature => self.feature_report_byte_length = len,
        }
    }
}

/// Byte length of one report (including its ID byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLength {
    pub report_type: ReportType,
    pub report_id: u8,
    pub byte_length: u16,
}

/// Parsed capability table. See the module docs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preparsed {
    pub(crate) caps: Caps,
    pub(crate) values: [Vec<ValueCaps>; 3],
    pub(crate) nodes: Vec<CollectionNode>,
    pub(crate) report_lengths: Vec<ReportLength>,
}

impl Preparsed {
    #[inline]
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Every capability of `report_type` in descriptor order, filler included.
    #[inline]
    pub fn all_caps(&self, report_type: ReportType) -> &[ValueCaps] {
        &self.values[report_type.index()]
    }

    pub fn button_caps(&self, report_type: ReportType) -> impl Iterator<Item = &ValueCaps> {
        self.all_caps(report_type).iter().filter(|c| c.is_button())
    }

    pub fn value_caps(&self, report_type: ReportType) -> impl Iterator<Item = &ValueCaps> {
        self.all_caps(report_type).iter().filter(|c| c.is_value())
    }

    #[inline]
    pub fn link_collection_nodes(&self) -> &[CollectionNode] {
        &self.nodes
    }

    /// Per report ID byte lengths.
    #[inline]
    pub fn report_lengths(&self) -> &[ReportLength] {
        &self.report_lengths
    }

    /// Byte length (ID byte included) of the given report, if the descriptor declares it.
    pub fn report_length(&self, report_type: ReportType, report_id: u8) -> Option<u16> {
        self.report_lengths
            .iter()
            .find(|r| r.report_type == report_type && r.report_id == report_id)
            .map(|r| r.byte_length)
    }

    /// `true` if any report carries a non-zero report ID.
    pub fn uses_report_ids(&self) -> bool {
        self.report_lengths.iter().any(|r| r.report_id != 0)
    }

    /// Serialized form returned by the collection-descriptor request.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
