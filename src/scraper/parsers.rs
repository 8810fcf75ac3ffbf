use crate::error::PortalError;
use crate::models::{DAY_LABEL_PREFIX, SubstitutionDay};
use crate::scraper::cleaner::build_plan;
use crate::scraper::tables::{Table, extract_tables};
use crate::utils::squash_whitespace;
use scraper::{Html, Selector};
use tracing::{debug, warn};

fn selector(s: &str) -> Result<Selector, PortalError> {
    Selector::parse(s).map_err(|e| PortalError::Parsing(format!("selector {:?}: {:?}", s, e)))
}

// ── Day labels ────────────────────────────────────────────────────────────────

/// Day headings of the `.panel-body` containers, in page order.
///
/// The desktop-only `h3.hidden-xs` variant is ignored; every other `h3` in a
/// panel contributes its text, concatenated as rendered and then
/// whitespace-squashed. Panels whose heading does not start with
/// "Vertretungen am" (general notices, absent classes) are skipped.
pub fn extract_dates(doc: &Html) -> Result<Vec<String>, PortalError> {
    let panel_sel = selector(".panel-body")?;
    let heading_sel = selector("h3:not(.hidden-xs)")?;

    let mut dates = Vec::new();
    let mut panels = 0usize;

    for panel in doc.select(&panel_sel) {
        panels += 1;
        let label = panel
            .select(&heading_sel)
            .map(|h3| squash_whitespace(&h3.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if label.starts_with(DAY_LABEL_PREFIX) {
            dates.push(label);
        }
    }

    if panels == 0 {
        warn!("No panel-body elements found in page");
    }
    if dates.is_empty() {
        return Err(PortalError::Parsing("no valid dates found in the page".into()));
    }

    debug!("Found {} day labels in {} panels", dates.len(), panels);
    Ok(dates)
}

// ── Whole page ────────────────────────────────────────────────────────────────

/// Parse a substitution-plan page into one entry per published day.
pub fn parse_substitution_page(html: &str) -> Result<Vec<SubstitutionDay>, PortalError> {
    let doc = Html::parse_document(html);
    if !doc.errors.is_empty() {
        debug!("{} HTML parse errors tolerated", doc.errors.len());
    }

    let dates = extract_dates(&doc)?;
    let extracted = extract_tables(&doc).map_err(|e| PortalError::Parsing(e.to_string()))?;

    let tables: Vec<&Table> = if extracted.named_len() > 0 {
        extracted.named().map(|(_, t)| t).collect()
    } else {
        debug!("No tables with id, falling back to all {} tables", extracted.tables.len());
        extracted.tables.iter().collect()
    };

    Ok(build_plan(&tables, &dates))
}
