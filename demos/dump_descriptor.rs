//! Parses a report descriptor and prints its capability table.
//!
//! `cargo run --example dump_descriptor [--json] [descriptor.bin]` (defaults to the
//! virtual gamepad).

use hidclass::backends::virtual_input::GAMEPAD_DESCRIPTOR;
use hidclass::{parse_descriptor, ReportType};

fn main() {
    let mut json = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        if arg == "--json" {
            json = true;
        } else {
            path = Some(arg);
        }
    }

    let bytes = match path {
        Some(path) => std::fs::read(&path).expect("read descriptor file"),
        None => GAMEPAD_DESCRIPTOR.to_vec(),
    };

    let preparsed = match parse_descriptor(&bytes) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("invalid descriptor: {e}");
            std::process::exit(1);
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&preparsed).expect("serialize capability table")
        );
        return;
    }

    let caps = preparsed.caps();
    println!(
        "top-level usage {:04x}:{:04x}, {} collection(s)",
        caps.usage_page, caps.usage, caps.number_link_collection_nodes
    );

    for report_type in ReportType::ALL {
        let len = caps.report_byte_length(report_type);
        if len == 0 {
            continue;
        }
        println!(
            "== {:?}: {} byte(s), {} button cap(s), {} value cap(s) ==",
            report_type,
            len,
            caps.button_caps_count(report_type),
            caps.value_caps_count(report_type)
        );
        for c in preparsed.all_caps(report_type) {
            let kind = if c.is_filler() {
                "pad"
            } else if c.is_button() {
                "button"
            } else {
                "value"
            };
            println!(
                "  id={} bits={}..{} {:<6} page={:04x} usage={:04x}..{:04x} count={} logical={}..{}",
                c.report_id,
                c.start_bit,
                c.start_bit + c.total_bits(),
                kind,
                c.usage_page,
                c.usage_min,
                c.usage_max,
                c.report_count,
                c.logical_min,
                c.logical_max
            );
        }
    }
}
