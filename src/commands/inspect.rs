// Read-only views of what the system has learned

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::commands::Workspace;
use crate::core::types::UserProfile;
use crate::history::{AttemptHistoryReader, WindowStats};
use crate::policy::LevelTransitionCheck;
use crate::reinforcement::difficulty_selection::LearningSummary;
use crate::reinforcement::q_learning::Recommendation;
use crate::reinforcement::QTableEntry;
use crate::sql::{format_table, TableView};

/// Everything known about one learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerReport {
    pub profile: UserProfile,
    pub overall: WindowStats,
    pub summary: LearningSummary,
    pub transition: LevelTransitionCheck,
    pub recommendation: Recommendation,
    pub top_entries: Vec<QTableEntry>,
}

impl LearnerReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let progress = &self.summary.progress;

        let _ = writeln!(
            out,
            "{} | level {} | xp {} (total {}) | streak {}",
            self.profile.user_id,
            self.profile.level,
            self.profile.xp,
            self.profile.total_xp,
            self.profile.streak_correct
        );
        match progress.target_level {
            Some(target) => {
                let _ = writeln!(
                    out,
                    "Progress to {}: {:.0}% ({} xp to go)",
                    target, progress.progress_percentage, progress.remaining_xp
                );
            }
            None => {
                let _ = writeln!(out, "Top level reached");
            }
        }
        if let Some(accuracy) = self.overall.accuracy() {
            let _ = writeln!(
                out,
                "Accuracy: {:.0}% over {} attempts",
                accuracy * 100.0,
                self.overall.total
            );
        }
        if let Some(reason) = &self.transition.reason {
            let _ = writeln!(out, "Pending transition: {}", reason);
        }

        let q = &self.summary.q_table;
        let _ = writeln!(
            out,
            "\nQ-table: {} entries over {} states, mean {:.3} [{:.3}, {:.3}], epsilon {:.3}",
            q.total_entries, q.distinct_states, q.mean_q, q.min_q, q.max_q,
            self.summary.current_epsilon
        );

        let rec = &self.recommendation;
        let _ = writeln!(
            out,
            "Recommended next: {} (confidence {:.0}%, served {:.0}% of the time, allowed {:?})",
            rec.recommended,
            rec.confidence * 100.0,
            rec.selection_probability * 100.0,
            rec.allowed_actions
        );
        let _ = writeln!(out, "State value under current policy: {:.3}", rec.state_value);
        for reason in &rec.reasoning {
            let _ = writeln!(out, "  - {}", reason);
        }

        out.push('\n');
        out.push_str(&format_table(&TableView::from_q_entries(&self.top_entries)));
        out
    }
}

/// Full report for one learner; unknown learners show as fresh beginners
pub fn inspect_learner(workspace: &Workspace, user_id: &str, limit: usize) -> Result<LearnerReport> {
    let profile = workspace
        .profiles
        .load_or_new(user_id)
        .with_context(|| format!("Failed to load profile for {}", user_id))?;
    let system = &workspace.system;

    let mut top_entries = system.engine().store().entries_for_user(user_id)?;
    top_entries.sort_by(|a, b| b.q_value.total_cmp(&a.q_value));
    top_entries.truncate(limit);

    Ok(LearnerReport {
        overall: workspace.history.overall_stats(user_id)?,
        summary: system.learning_summary(&profile)?,
        transition: system.check_level_transition(&profile)?,
        recommendation: system.recommend(&profile, None)?,
        top_entries,
        profile,
    })
}

/// One row per stored learner
pub fn learner_overview(workspace: &Workspace) -> Result<TableView> {
    let mut rows = Vec::new();
    for profile in workspace.profiles.list()? {
        let summary = workspace.system.learning_summary(&profile)?;
        let overall = workspace.history.overall_stats(&profile.user_id)?;
        rows.push((profile.user_id, summary.progress, overall));
    }
    Ok(TableView::from_learners(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuizConfig;
    use crate::core::types::{AttemptRecord, Level};
    use crate::history::AttemptRecorder;
    use crate::reinforcement::{Difficulty, QKey, QTableStore};
    use crate::sql::SqliteQTable;

    fn workspace() -> Workspace {
        Workspace::open(&QuizConfig::default(), None, Some(3), false).unwrap()
    }

    #[test]
    fn test_unknown_learner_is_fresh() {
        let ws = workspace();
        let report = inspect_learner(&ws, "nobody", 5).unwrap();

        assert_eq!(report.profile.level, Level::Beginner);
        assert_eq!(report.summary.q_table.total_entries, 0);
        assert!(report.top_entries.is_empty());
        assert!(report
            .recommendation
            .reasoning
            .iter()
            .any(|r| r == "No learned values yet"));
        assert!(report.render().contains("No results found."));
    }

    #[test]
    fn test_report_reflects_stored_learning() {
        let ws = workspace();
        let profile = UserProfile::new("u1").with_xp(150);
        ws.profiles.save(&profile).unwrap();
        for correct in [true, true, false, true] {
            ws.history
                .record_attempt(&AttemptRecord::new("u1", Difficulty::Easy, correct))
                .unwrap();
        }

        let state = ws.system.current_state(&profile).unwrap();
        let table = SqliteQTable::new(ws.db.clone());
        table
            .update(&QKey::new("u1", state.state_hash(), Difficulty::Medium), 2.5)
            .unwrap();
        table
            .update(&QKey::new("u1", state.state_hash(), Difficulty::Easy), 0.5)
            .unwrap();

        let report = inspect_learner(&ws, "u1", 1).unwrap();
        assert_eq!(report.overall, WindowStats { correct: 3, total: 4 });
        assert_eq!(report.recommendation.recommended, Difficulty::Medium);
        assert_eq!(report.top_entries.len(), 1);
        assert_eq!(report.top_entries[0].q_value, 2.5);
        assert_eq!(report.summary.progress.remaining_xp, 50);
        assert!(!report.transition.can_level_up);

        let rendered = report.render();
        assert!(rendered.contains("Progress to intermediate: 75%"));
        assert!(rendered.contains("Accuracy: 75% over 4 attempts"));
        assert!(rendered.contains("State value under current policy"));
        assert!(report.recommendation.selection_probability > 0.5);
    }

    #[test]
    fn test_overview_lists_saved_learners() {
        let ws = workspace();
        ws.profiles.save(&UserProfile::new("b")).unwrap();
        ws.profiles
            .save(&UserProfile::new("a").with_level(Level::Expert))
            .unwrap();

        let view = learner_overview(&ws).unwrap();
        assert_eq!(view.row_count(), 2);
        assert_eq!(view.rows[0][0], "a");
        assert_eq!(view.rows[0][1], "expert");
        assert_eq!(view.rows[1][4], "-");
    }
}
