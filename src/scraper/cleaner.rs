use crate::models::{ModelError, Substitution, SubstitutionDay};
use crate::scraper::tables::{Row, Table};
use tracing::{debug, warn};

/// Second header cell of the privacy/imprint footer table.
pub const FOOTER_MARKER: &str = "Datenschutz | Impressum";

/// Headers of informational boxes that are laid out as tables.
/// The mis-decoded spelling shows up when the portal serves Latin-1 as UTF-8.
pub const NOISE_HEADERS: &[&str] = &[
    "Abwesende Klassen",
    "Betroffene Lehrer",
    "Abwesende Lehrkräfte",
    "Abwesende LehrkrÃ¤fte",
    "Allgemein",
];

/// Rows shorter than this cannot fill every column.
pub const MIN_ROW_CELLS: usize = 11;

// ── Classification ────────────────────────────────────────────────────────────

pub fn is_noise_header(row: &Row) -> bool {
    row.first()
        .is_some_and(|cell| NOISE_HEADERS.contains(&cell.as_str()))
}

/// Whether a table holds substitution rows rather than page furniture.
pub fn is_substitution_table(table: &Table) -> bool {
    let Some(header) = table.first() else {
        return false;
    };
    if is_noise_header(header) {
        return false;
    }
    header.len() > 1 && header[1] != FOOTER_MARKER
}

// ── Mapping ───────────────────────────────────────────────────────────────────

/// Drop newlines, collapse runs of spaces, trim.
pub fn clean_notice(notice: &str) -> String {
    let joined = notice.replace('\n', "");
    let mut out = String::with_capacity(joined.len());
    let mut prev_space = false;
    for c in joined.chars() {
        if c == ' ' {
            if !prev_space {
                out.push(c);
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Map a full-width data row; column 5 (activity type) is not modelled.
pub fn row_to_substitution(row: &Row) -> Option<Substitution> {
    if row.len() < MIN_ROW_CELLS {
        return None;
    }
    Some(Substitution {
        hours: row[1].clone(),
        class_name: row[2].clone(),
        substitute: row[3].clone(),
        teacher: row[4].clone(),
        subject: row[6].clone(),
        subject_old: row[7].clone(),
        room: row[8].clone(),
        room_old: row[9].clone(),
        notice: row[10].clone(),
    })
}

fn is_single_notice(table: &Table) -> bool {
    table.len() <= 2 && table.get(1).is_some_and(|row| row.len() == 1)
}

/// Turn an accepted table into the day it describes.
///
/// Returns `Ok(None)` for a table that has nothing but its header row.
pub fn table_to_day(table: &Table, date: &str) -> Result<Option<SubstitutionDay>, ModelError> {
    if table.len() < 2 {
        debug!("{}: header-only table, nothing published", date);
        return Ok(None);
    }

    let substitutions = if is_single_notice(table) {
        vec![Substitution::notice_only(clean_notice(&table[1][0]))]
    } else {
        let rows: Vec<Substitution> = table[1..].iter().filter_map(row_to_substitution).collect();
        let skipped = table.len() - 1 - rows.len();
        if skipped > 0 {
            debug!("{}: skipped {} short rows", date, skipped);
        }
        rows
    };

    if substitutions.is_empty() {
        warn!("{}: table accepted but no row had {} cells", date, MIN_ROW_CELLS);
    }

    SubstitutionDay::new(date, substitutions).map(Some)
}

/// Correlate tables with day labels by position and map the accepted ones.
pub fn build_plan(tables: &[&Table], dates: &[String]) -> Vec<SubstitutionDay> {
    if tables.len() > dates.len() {
        warn!(
            "More tables than dates found ({} tables, {} dates); dropping the rest",
            tables.len(),
            dates.len()
        );
    }

    let mut plan = Vec::new();
    for (table, date) in tables.iter().zip(dates) {
        if !is_substitution_table(table) {
            debug!("Skipping non-substitution table {:?}", table.first());
            continue;
        }
        match table_to_day(table, date) {
            Ok(Some(day)) => plan.push(day),
            Ok(None) => {}
            Err(e) => warn!("Error processing table: {}", e),
        }
    }
    plan
}
