// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use arrow_memory::machine::MemoryStats;
use arrow_memory::page::PageType;
use comfy_table::Attribute;
use comfy_table::Cell;
use comfy_table::CellAlignment;
use comfy_table::Color;
use comfy_table::ContentArrangement;
use comfy_table::Table;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;

const COLUMNS: [&str; 7] = [
    "Core",
    "Execution context",
    "Unmapped",
    "Mapped",
    "Allocated",
    "Block space",
    "Pages",
];

const PAGE_TYPES: [PageType; 4] = [
    PageType::Code,
    PageType::Data,
    PageType::Device,
    PageType::System,
];

fn header_cell(name: &str) -> Cell {
    Cell::new(name)
        .add_attribute(Attribute::Bold)
        .fg(Color::DarkCyan)
        .set_alignment(CellAlignment::Center)
}

/// Byte count followed by the number of intervals holding it, if known
fn bytes_cell(bytes: u64, intervals: Option<usize>) -> Cell {
    let text = match intervals {
        Some(intervals) => format!("{bytes:#x} ({intervals})"),
        None => format!("{bytes:#x}"),
    };
    Cell::new(text).set_alignment(CellAlignment::Right)
}

/// Page counts per type, plus the cross-core pages among them
fn pages_cell(stats: &MemoryStats) -> Cell {
    let mut parts: Vec<String> = PAGE_TYPES
        .iter()
        .filter_map(|page_type| {
            stats
                .pages_by_type
                .get(page_type)
                .map(|count| format!("{page_type}: {count}"))
        })
        .collect();
    if stats.cross_core_pages > 0 {
        parts.push(format!("cross-core: {}", stats.cross_core_pages));
    }

    let text = if parts.is_empty() {
        "---".to_string()
    } else {
        format!("{} [{}]", stats.page_count, parts.join(", "))
    };
    Cell::new(text)
}

fn stats_row(stats: &MemoryStats) -> Vec<Cell> {
    vec![
        Cell::new(stats.core).set_alignment(CellAlignment::Right),
        Cell::new(stats.execution_context.short_name()).fg(Color::DarkGreen),
        bytes_cell(stats.unmapped_bytes, Some(stats.unmapped_intervals)),
        bytes_cell(stats.mapped_bytes, Some(stats.mapped_intervals)),
        bytes_cell(stats.allocated_bytes, None),
        bytes_cell(stats.non_allocated_bytes, None),
        pages_cell(stats),
    ]
}

/// One row per address space, in the order given.
pub fn table_from_stats(data: &[MemoryStats]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(COLUMNS.iter().map(|name| header_cell(name)).collect::<Vec<_>>());

    for stats in data {
        table.add_row(stats_row(stats));
    }

    table
}
