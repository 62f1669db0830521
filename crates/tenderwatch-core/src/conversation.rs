//! Pure core of the participation conversation: which lots still need an
//! entry, the incremental draft codec, and the final rendering.
//!
//! The draft stored in `participation_details_draft` is one `Лот <label>:
//! <text>` line per completed entry; free-text newlines become continuation
//! lines that re-attach to the open entry on recovery. Lines whose label
//! matches no current lot are dropped silently, so a stale or malformed
//! draft degrades to re-asking instead of failing the operator-facing flow.

use std::collections::BTreeMap;

use crate::types::Lot;

const DRAFT_PREFIX: &str = "Лот ";

#[derive(Debug, Clone, PartialEq)]
pub struct LotProgress {
    lots: Vec<Lot>,
    entries: BTreeMap<usize, String>,
}

impl LotProgress {
    /// Start fresh over an announcement's effective lot list.
    pub fn new(lots: Vec<Lot>) -> Self {
        Self {
            lots,
            entries: BTreeMap::new(),
        }
    }

    /// Recover mid-flight progress from a persisted draft. Entries are
    /// matched back to lots by label (external lot number first, ordinal
    /// fallback), not by position in the draft.
    pub fn from_draft(lots: Vec<Lot>, draft: &str) -> Self {
        let mut progress = Self::new(lots);
        let mut open_entry: Option<usize> = None;

        for line in draft.lines() {
            if let Some((label, text)) = parse_draft_line(line) {
                match progress.index_by_label(&label) {
                    Some(index) => {
                        progress.entries.insert(index, text.to_string());
                        open_entry = Some(index);
                    }
                    None => {
                        // Stale draft line for a lot that no longer exists.
                        open_entry = None;
                    }
                }
            } else if let Some(index) = open_entry {
                // Continuation of a multi-line entry.
                if let Some(entry) = progress.entries.get_mut(&index) {
                    entry.push('\n');
                    entry.push_str(line);
                }
            }
        }

        progress
    }

    fn index_by_label(&self, label: &str) -> Option<usize> {
        self.lots
            .iter()
            .enumerate()
            .find(|(idx, lot)| lot.label(*idx) == label)
            .map(|(idx, _)| idx)
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn lot(&self, index: usize) -> Option<&Lot> {
        self.lots.get(index)
    }

    pub fn entry(&self, index: usize) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    /// Unfilled lots, in lot order, ready for the selection keyboard.
    pub fn remaining(&self) -> Vec<(usize, Lot)> {
        self.lots
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.entries.contains_key(idx))
            .map(|(idx, lot)| (idx, lot.clone()))
            .collect()
    }

    pub fn remaining_count(&self) -> usize {
        self.lots.len() - self.entries.len()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.len() == self.lots.len()
    }

    /// Capture one lot's entry verbatim. Out-of-range indexes are ignored.
    pub fn record_entry(&mut self, index: usize, text: &str) {
        if index < self.lots.len() {
            self.entries.insert(index, text.to_string());
        }
    }

    /// Serialize completed entries for `participation_details_draft`.
    pub fn to_draft(&self) -> String {
        self.entries
            .iter()
            .map(|(&index, text)| {
                format!("{}{}: {}", DRAFT_PREFIX, self.lots[index].label(index), text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the final `participation_details` text: one block per lot in
    /// lot order, label line plus the verbatim entry, blank-line separated.
    pub fn render_final(&self) -> String {
        self.lots
            .iter()
            .enumerate()
            .map(|(index, lot)| {
                let entry = self.entry(index).unwrap_or_default();
                format!("{}{}: {}\n{}", DRAFT_PREFIX, lot.label(index), lot.name, entry)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Short preview for the processed audit entry.
    pub fn preview(&self, max_chars: usize) -> String {
        let rendered = self.render_final();
        if rendered.chars().count() <= max_chars {
            return rendered;
        }
        rendered.chars().take(max_chars).collect::<String>() + "…"
    }
}

fn parse_draft_line(line: &str) -> Option<(String, &str)> {
    let rest = line.strip_prefix(DRAFT_PREFIX)?;
    let colon = rest.find(": ")?;
    let label = rest[..colon].trim();
    if label.is_empty() {
        return None;
    }
    Some((label.to_string(), &rest[colon + 2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(number: Option<&str>, name: &str) -> Lot {
        Lot {
            number: number.map(String::from),
            name: name.to_string(),
            description: String::new(),
            keyword: "аренда".to_string(),
        }
    }

    fn two_lots() -> Vec<Lot> {
        vec![lot(Some("1"), "Лот A"), lot(Some("2"), "Лот B")]
    }

    #[test]
    fn entries_round_trip_through_draft_in_any_order() {
        let mut progress = LotProgress::new(two_lots());
        progress.record_entry(1, "bar");
        assert_eq!(progress.remaining_count(), 1);

        // Interrupt: re-derive from the persisted draft.
        let recovered = LotProgress::from_draft(two_lots(), &progress.to_draft());
        assert_eq!(recovered.entry(1), Some("bar"));
        assert_eq!(recovered.entry(0), None);

        let remaining = recovered.remaining();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, 0);
    }

    #[test]
    fn recovery_matches_by_lot_identity_not_position() {
        let mut progress = LotProgress::new(two_lots());
        progress.record_entry(0, "foo");
        progress.record_entry(1, "bar");
        let draft = progress.to_draft();

        // Same lots, reversed order in the list: entries must follow labels.
        let reversed = vec![lot(Some("2"), "Лот B"), lot(Some("1"), "Лот A")];
        let recovered = LotProgress::from_draft(reversed, &draft);
        assert_eq!(recovered.entry(0), Some("bar"));
        assert_eq!(recovered.entry(1), Some("foo"));
    }

    #[test]
    fn multi_line_entries_survive_recovery() {
        let mut progress = LotProgress::new(two_lots());
        progress.record_entry(0, "первая строка\nвторая строка");
        let recovered = LotProgress::from_draft(two_lots(), &progress.to_draft());
        assert_eq!(recovered.entry(0), Some("первая строка\nвторая строка"));
    }

    #[test]
    fn stale_and_malformed_draft_lines_are_skipped() {
        let draft = "Лот 9: для несуществующего лота\n\
мусорная строка без префикса\n\
Лот 2: valid entry";
        let recovered = LotProgress::from_draft(two_lots(), draft);
        assert_eq!(recovered.entry(0), None);
        assert_eq!(recovered.entry(1), Some("valid entry"));
        assert_eq!(recovered.remaining_count(), 1);
    }

    #[test]
    fn finalization_contains_every_lot_in_order() {
        let mut progress = LotProgress::new(two_lots());
        progress.record_entry(1, "bar");
        progress.record_entry(0, "foo");
        assert!(progress.is_complete());

        let rendered = progress.render_final();
        let blocks: Vec<&str> = rendered.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("Лот 1: Лот A"));
        assert!(blocks[0].contains("foo"));
        assert!(blocks[1].starts_with("Лот 2: Лот B"));
        assert!(blocks[1].contains("bar"));
    }

    #[test]
    fn ordinal_labels_used_when_source_has_no_lot_numbers() {
        let lots = vec![lot(None, "Единственный лот")];
        let mut progress = LotProgress::new(lots.clone());
        progress.record_entry(0, "запись");
        assert_eq!(progress.to_draft(), "Лот 1: запись");

        let recovered = LotProgress::from_draft(lots, "Лот 1: запись");
        assert!(recovered.is_complete());
    }

    #[test]
    fn interrupt_after_k_entries_prompts_only_for_the_rest() {
        let lots = vec![
            lot(Some("1"), "A"),
            lot(Some("2"), "B"),
            lot(Some("3"), "C"),
            lot(Some("4"), "D"),
        ];
        let mut progress = LotProgress::new(lots.clone());
        progress.record_entry(2, "c");
        progress.record_entry(0, "a");

        let recovered = LotProgress::from_draft(lots, &progress.to_draft());
        let remaining: Vec<usize> = recovered.remaining().into_iter().map(|(i, _)| i).collect();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn preview_truncates() {
        let mut progress = LotProgress::new(vec![lot(Some("1"), "A")]);
        progress.record_entry(0, &"x".repeat(500));
        let preview = progress.preview(50);
        assert!(preview.chars().count() <= 51);
        assert!(preview.ends_with('…'));
    }
}
