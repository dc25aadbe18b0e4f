use serde::{Deserialize, Serialize};

use crate::history::WindowStats;
use crate::policy::LevelProgress;
use crate::reinforcement::q_table::QTableEntry;

/// Rows of text ready for terminal output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableView {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// One row per Q-value, sorted by value descending
    pub fn from_q_entries(entries: &[QTableEntry]) -> Self {
        let mut sorted: Vec<&QTableEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| b.q_value.total_cmp(&a.q_value));

        let mut view = Self::new(["state", "action", "q_value", "version", "updated_at"]);
        for entry in sorted {
            view.push_row(vec![
                entry.key.state_hash.short().to_string(),
                entry.key.action.to_string(),
                format!("{:.4}", entry.q_value),
                entry.version.to_string(),
                entry.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]);
        }
        view
    }

    /// One row per learner: progress toward the next level and lifetime accuracy
    pub fn from_learners(rows: &[(String, LevelProgress, WindowStats)]) -> Self {
        let mut view = Self::new(["user", "level", "xp", "progress", "accuracy"]);
        for (user_id, progress, overall) in rows {
            view.push_row(vec![
                user_id.clone(),
                progress.level.to_string(),
                progress.current_xp.to_string(),
                format!("{:.0}%", progress.progress_percentage),
                overall
                    .accuracy()
                    .map(|a| format!("{:.0}%", a * 100.0))
                    .unwrap_or_else(|| "-".to_string()),
            ]);
        }
        view
    }
}

/// Render as a `|`-separated table with a row count footer
pub fn format_table(view: &TableView) -> String {
    if view.rows.is_empty() {
        return "No results found.".to_string();
    }

    let mut widths: Vec<usize> = view.columns.iter().map(|c| c.len()).collect();
    for row in &view.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.len());
            }
        }
    }

    let render_row = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| match widths.get(i) {
                Some(&width) => format!("{:width$}", cell, width = width),
                None => cell.clone(),
            })
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut output = render_row(&view.columns);
    output.push('\n');
    output.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    output.push('\n');
    for row in &view.rows {
        output.push_str(&render_row(row));
        output.push('\n');
    }

    output.push_str(&format!("\n{} row(s) returned", view.row_count()));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Level;
    use crate::reinforcement::action::Difficulty;
    use crate::reinforcement::q_table::QKey;
    use crate::reinforcement::state::{PerformanceSnapshot, StateEncoder};

    #[test]
    fn test_format_table() {
        let mut view = TableView::new(["id", "name"]);
        view.push_row(vec!["1".to_string(), "Alice".to_string()]);
        view.push_row(vec!["2".to_string(), "Bob".to_string()]);
        view.push_row(vec!["3".to_string(), "Charlie".to_string()]);

        let expected = "id | name   \n---+--------\n1  | Alice  \n2  | Bob    \n3  | Charlie\n\n3 row(s) returned";
        assert_eq!(format_table(&view), expected);
    }

    #[test]
    fn test_empty_table() {
        let view = TableView::new(["id"]);
        assert_eq!(format_table(&view), "No results found.");
    }

    #[test]
    fn test_q_entries_sorted_by_value() {
        let hash = StateEncoder::default()
            .encode(&PerformanceSnapshot::empty(Level::Beginner))
            .unwrap()
            .state_hash();
        let mut low = QTableEntry::fresh(QKey::new("u1", hash.clone(), Difficulty::Easy));
        low.q_value = -0.5;
        let mut high = QTableEntry::fresh(QKey::new("u1", hash, Difficulty::Medium));
        high.q_value = 1.25;

        let view = TableView::from_q_entries(&[low, high]);
        assert_eq!(view.row_count(), 2);
        assert_eq!(view.rows[0][1], "medium");
        assert_eq!(view.rows[0][2], "1.2500");
        assert_eq!(view.rows[1][2], "-0.5000");
    }

    #[test]
    fn test_learner_rows() {
        let progress = LevelProgress {
            level: Level::Intermediate,
            target_level: Some(Level::Advanced),
            current_xp: 120,
            required_xp: 300,
            remaining_xp: 180,
            progress_percentage: 40.0,
            can_level_up: false,
        };
        let rows = vec![
            ("u1".to_string(), progress.clone(), WindowStats::default()),
            ("u2".to_string(), progress, WindowStats { correct: 3, total: 4 }),
        ];

        let view = TableView::from_learners(&rows);
        assert_eq!(view.rows[0], vec!["u1", "intermediate", "120", "40%", "-"]);
        assert_eq!(view.rows[1][4], "75%");
    }
}
