//! Tag-driven table extraction.
//!
//! Walks the parsed document in order, reacting to `table`/`tr`/`td`/`th`
//! open and close events the way a streaming tag parser would. Only text that
//! sits inside a cell is kept. Missing close tags never fail the scan; the
//! only fault is a document nested deeper than [`MAX_DEPTH`].

use scraper::node::Element;
use scraper::{ElementRef, Html};
use tracing::debug;

pub type Row = Vec<String>;
pub type Table = Vec<Row>;

/// Element nesting bound for the recursive walk.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("markup nested deeper than {0} elements near <{1}>")]
    TooDeep(usize, String),
}

/// Every table of a page, plus the ones that carry an `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTables {
    pub tables: Vec<Table>,
    named: Vec<(String, Table)>,
}

impl ExtractedTables {
    /// Keyed tables in document order.
    pub fn named(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.named.iter().map(|(id, t)| (id.as_str(), t))
    }

    pub fn named_len(&self) -> usize {
        self.named.len()
    }

    fn insert_named(&mut self, id: String, table: Table) {
        match self.named.iter_mut().find(|(k, _)| *k == id) {
            Some(slot) => slot.1 = table,
            None => self.named.push((id, table)),
        }
    }
}

pub fn extract_tables(doc: &Html) -> Result<ExtractedTables, ExtractError> {
    let mut scanner = TableScanner::default();
    scanner.walk(doc.root_element(), 0)?;
    debug!(
        "Extracted {} tables ({} with id)",
        scanner.out.tables.len(),
        scanner.out.named_len()
    );
    Ok(scanner.out)
}

// ── Scanner ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TableScanner {
    in_cell: bool,
    cell: Vec<String>,
    row: Row,
    table: Table,
    table_id: Option<String>,
    out: ExtractedTables,
}

impl TableScanner {
    fn walk(&mut self, el: ElementRef<'_>, depth: usize) -> Result<(), ExtractError> {
        if depth > MAX_DEPTH {
            return Err(ExtractError::TooDeep(MAX_DEPTH, el.value().name().to_string()));
        }

        self.open(el.value());

        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                self.walk(child_el, depth + 1)?;
            } else if let Some(text) = child.value().as_text() {
                self.text(text);
            }
        }

        self.close(el.value().name());
        Ok(())
    }

    fn open(&mut self, el: &Element) {
        match el.name() {
            "table" => {
                if let Some(id) = el.id().filter(|id| !id.is_empty()) {
                    self.table_id = Some(id.to_string());
                }
            }
            "td" | "th" => self.in_cell = true,
            _ => {}
        }
    }

    fn text(&mut self, data: &str) {
        if self.in_cell {
            self.cell.push(data.trim().to_string());
        }
    }

    fn close(&mut self, name: &str) {
        match name {
            "td" | "th" => {
                self.in_cell = false;
                let cell = self.cell.join(" ").trim().to_string();
                self.row.push(cell);
                self.cell.clear();
            }
            "tr" => self.table.push(std::mem::take(&mut self.row)),
            "table" => {
                let table = std::mem::take(&mut self.table);
                if let Some(id) = self.table_id.take() {
                    self.out.insert_named(id, table.clone());
                }
                self.out.tables.push(table);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_tables_from_str(html: &str) -> Result<ExtractedTables, ExtractError> {
        extract_tables(&Html::parse_document(html))
    }

    #[test]
    fn test_rows_and_cells_in_order() {
        let html = r#"
            <table id="t1">
              <tr><th>Stunde</th><th>Klasse</th></tr>
              <tr><td> 1 </td><td>
                 5b
              </td></tr>
            </table>"#;
        let out = extract_tables_from_str(html).unwrap();
        assert_eq!(out.tables.len(), 1);
        assert_eq!(
            out.tables[0],
            vec![vec!["Stunde", "Klasse"], vec!["1", "5b"]]
        );
        assert_eq!(out.named().next(), Some(("t1", &out.tables[0])));
    }

    #[test]
    fn test_fragments_joined_with_space() {
        let html = "<table><tr><td>Raum<br>A204</td><td><b>neu</b></td></tr></table>";
        let out = extract_tables_from_str(html).unwrap();
        assert_eq!(out.tables[0][0], vec!["Raum A204", "neu"]);
    }

    #[test]
    fn test_text_outside_cells_is_dropped() {
        let html = "<p>Intro</p><table><caption>Heute</caption><tr><td>x</td></tr></table>";
        let out = extract_tables_from_str(html).unwrap();
        assert_eq!(out.tables, vec![vec![vec!["x".to_string()]]]);
    }

    #[test]
    fn test_unnamed_tables_are_not_keyed() {
        let html = r#"<table><tr><td>a</td></tr></table>
                      <table id="b"><tr><td>b</td></tr></table>
                      <table id=""><tr><td>c</td></tr></table>"#;
        let out = extract_tables_from_str(html).unwrap();
        assert_eq!(out.tables.len(), 3);
        let ids: Vec<&str> = out.named().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_duplicate_id_replaces_in_place() {
        let html = r#"<table id="x"><tr><td>1</td></tr></table>
                      <table id="y"><tr><td>2</td></tr></table>
                      <table id="x"><tr><td>3</td></tr></table>"#;
        let out = extract_tables_from_str(html).unwrap();
        let named: Vec<(&str, &Table)> = out.named().collect();
        assert_eq!(named.len(), 2);
        assert_eq!(named[0].0, "x");
        assert_eq!(named[0].1[0][0], "3");
        assert_eq!(named[1].0, "y");
    }

    #[test]
    fn test_unclosed_markup_is_tolerated() {
        let html = "<table id='open'><tr><td>a<td>b<tr><td>c";
        let out = extract_tables_from_str(html).unwrap();
        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0], vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_excessive_nesting_is_an_error() {
        let html = "<div>".repeat(MAX_DEPTH + 10);
        let err = extract_tables_from_str(&html).unwrap_err();
        assert!(matches!(err, ExtractError::TooDeep(MAX_DEPTH, _)));
    }
}
