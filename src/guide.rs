//! Walks the user through a template set by set.
//!
//! Logged-set counts are never cached here: every decision that needs them
//! takes the session's set logs and counts again, so a failed or partial sync
//! can't leave the guide believing something the logs don't say.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{logged_count, CompletionMap, Id, SetLog, TemplateWithRows};

/// What the user should log next.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuidePosition {
    pub template_id: Id,
    pub exercise_index: usize,
    /// 1-based, scoped to the exercise.
    pub set_number: u32,
    /// Terminal.
    pub completed: bool,
}

/// Result of `advance_after_log`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Logged exercise was not the current one; position untouched.
    Ignored,
    NextSet,
    NextExercise,
    Completed,
}

/// The user's answer once an exercise reaches its planned sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExerciseChoice {
    Done,
    Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionGuide {
    position: Option<GuidePosition>,
}

impl SessionGuide {
    pub fn from_position(position: Option<GuidePosition>) -> Self {
        Self { position }
    }

    pub fn position(&self) -> Option<&GuidePosition> {
        self.position.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.position.as_ref().map(|p| p.completed).unwrap_or(false)
    }

    pub fn current_exercise_id(&self, template: &TemplateWithRows) -> Option<Id> {
        let pos = self.position.as_ref()?;
        template.row(pos.exercise_index).map(|r| r.exercise_id)
    }

    /// Start at the first row. Empty templates leave the guide without a position.
    pub fn initialize_from_template(template: &TemplateWithRows) -> Self {
        if template.rows().is_empty() {
            return Self::default();
        }
        Self {
            position: Some(GuidePosition {
                template_id: template.id(),
                exercise_index: 0,
                set_number: 1,
                completed: false,
            }),
        }
    }

    /// Rebuild the position for a session already under way.
    ///
    /// Exercises in `completion` are skipped. A previously active exercise wins
    /// if it is still open; otherwise the first open exercise with planned sets
    /// left, then the first open one at all. With nothing open the guide sits
    /// on the last row, completed.
    pub fn initialize_from_session(
        logs: &[SetLog],
        template: &TemplateWithRows,
        completion: &CompletionMap,
        active_exercise: Option<Id>,
    ) -> Self {
        let rows = template.rows();
        if rows.is_empty() {
            return Self::default();
        }

        let open = |idx: &usize| !completion.is_done(rows[*idx].exercise_id);

        let resumed = active_exercise
            .and_then(|id| template.index_of(id))
            .filter(open);
        let with_sets_left = || {
            (0..rows.len()).filter(open).find(|i| {
                logged_count(logs, rows[*i].exercise_id) < rows[*i].planned_set_count()
            })
        };
        let any_open = || (0..rows.len()).find(open);

        let position = match resumed.or_else(with_sets_left).or_else(any_open) {
            Some(idx) => GuidePosition {
                template_id: template.id(),
                exercise_index: idx,
                set_number: logged_count(logs, rows[idx].exercise_id) + 1,
                completed: false,
            },
            None => GuidePosition {
                template_id: template.id(),
                exercise_index: rows.len() - 1,
                set_number: logged_count(logs, rows[rows.len() - 1].exercise_id) + 1,
                completed: true,
            },
        };
        Self { position: Some(position) }
    }

    /// Switch to an exercise the user picked. Rejected when it is unknown to the
    /// template or already completed; returns whether the switch happened.
    pub fn select_exercise(
        &mut self,
        template: &TemplateWithRows,
        logs: &[SetLog],
        completion: &CompletionMap,
        exercise_id: Id,
    ) -> bool {
        if completion.is_done(exercise_id) {
            debug!(exercise_id, "select rejected, exercise already completed");
            return false;
        }
        let Some(idx) = template.index_of(exercise_id) else {
            debug!(exercise_id, "select rejected, exercise not in template");
            return false;
        };
        self.position = Some(GuidePosition {
            template_id: template.id(),
            exercise_index: idx,
            set_number: logged_count(logs, exercise_id) + 1,
            completed: false,
        });
        true
    }

    /// Move forward after a set was recorded for `logged_exercise_id`.
    pub fn advance_after_log(&mut self, template: &TemplateWithRows, logged_exercise_id: Id) -> Advance {
        let Some(pos) = self.position.as_mut() else {
            return Advance::Ignored;
        };
        if pos.completed {
            return Advance::Ignored;
        }
        let Some(row) = template.row(pos.exercise_index) else {
            return Advance::Ignored;
        };
        if row.exercise_id != logged_exercise_id {
            debug!(
                logged_exercise_id,
                current = row.exercise_id,
                "set logged for another exercise, position kept"
            );
            return Advance::Ignored;
        }

        pos.set_number += 1;
        if pos.set_number <= row.planned_set_count() {
            return Advance::NextSet;
        }
        if pos.exercise_index + 1 < template.rows().len() {
            pos.exercise_index += 1;
            pos.set_number = 1;
            Advance::NextExercise
        } else {
            pos.completed = true;
            Advance::Completed
        }
    }

    /// Unconditionally move to the next row, or complete on the last one.
    pub fn skip_to_next(&mut self, template: &TemplateWithRows) -> Advance {
        let Some(pos) = self.position.as_mut() else {
            return Advance::Ignored;
        };
        if pos.exercise_index + 1 < template.rows().len() {
            pos.exercise_index += 1;
            pos.set_number = 1;
            pos.completed = false;
            Advance::NextExercise
        } else {
            pos.completed = true;
            Advance::Completed
        }
    }

    /// Reposition after `finished` was marked done: the next open row after it,
    /// wrapping to earlier open rows, or completed when none remain.
    pub fn advance_past(
        &mut self,
        template: &TemplateWithRows,
        logs: &[SetLog],
        completion: &CompletionMap,
        finished: Id,
    ) -> Advance {
        let rows = template.rows();
        if rows.is_empty() {
            self.position = None;
            return Advance::Ignored;
        }
        let start = template.index_of(finished).map(|i| i + 1).unwrap_or(0);
        let next = (0..rows.len())
            .map(|offset| (start + offset) % rows.len())
            .find(|i| !completion.is_done(rows[*i].exercise_id));

        match next {
            Some(idx) => {
                self.position = Some(GuidePosition {
                    template_id: template.id(),
                    exercise_index: idx,
                    set_number: logged_count(logs, rows[idx].exercise_id) + 1,
                    completed: false,
                });
                Advance::NextExercise
            }
            None => {
                let last = rows.len() - 1;
                self.position = Some(GuidePosition {
                    template_id: template.id(),
                    exercise_index: last,
                    set_number: logged_count(logs, rows[last].exercise_id) + 1,
                    completed: true,
                });
                Advance::Completed
            }
        }
    }

    /// "Extra set": keep the exercise active past its plan.
    pub fn resume_exercise(&mut self, template: &TemplateWithRows, logs: &[SetLog], exercise_id: Id) -> bool {
        let Some(idx) = template.index_of(exercise_id) else {
            return false;
        };
        self.position = Some(GuidePosition {
            template_id: template.id(),
            exercise_index: idx,
            set_number: logged_count(logs, exercise_id) + 1,
            completed: false,
        });
        true
    }
}

/// Whether logging a set for this exercise should ask "done or extra set?".
pub fn needs_exercise_choice(
    template: &TemplateWithRows,
    logs: &[SetLog],
    completion: &CompletionMap,
    exercise_id: Id,
) -> bool {
    let Some(row) = template.row_for(exercise_id) else {
        return false;
    };
    !completion.is_done(exercise_id) && logged_count(logs, exercise_id) >= row.planned_set_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Template, TemplateRow};

    fn template(plan: &[(Id, &str)]) -> TemplateWithRows {
        TemplateWithRows {
            template: Template { id: 77, program_id: 1, name: "Push".into() },
            exercises: plan
                .iter()
                .map(|(ex, sets)| TemplateRow {
                    exercise_id: *ex,
                    planned_sets: sets.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn log(exercise_id: Id, set_number: u32) -> SetLog {
        SetLog { exercise_id, set_number, weight: 50.0, reps: 8, ..Default::default() }
    }

    fn pos(guide: &SessionGuide) -> (usize, u32, bool) {
        let p = guide.position().unwrap();
        (p.exercise_index, p.set_number, p.completed)
    }

    #[test]
    fn empty_template_has_no_position() {
        let guide = SessionGuide::initialize_from_template(&template(&[]));
        assert!(guide.position().is_none());
    }

    #[test]
    fn two_exercise_scenario() {
        let tpl = template(&[(1, "2"), (2, "1")]);
        let mut guide = SessionGuide::initialize_from_template(&tpl);
        assert_eq!(pos(&guide), (0, 1, false));

        assert_eq!(guide.advance_after_log(&tpl, 1), Advance::NextSet);
        assert_eq!(pos(&guide), (0, 2, false));
        assert_eq!(guide.advance_after_log(&tpl, 1), Advance::NextExercise);
        assert_eq!(pos(&guide), (1, 1, false));
        assert_eq!(guide.advance_after_log(&tpl, 2), Advance::Completed);
        assert!(guide.is_completed());
    }

    #[test]
    fn logging_planned_sets_in_order_visits_every_row() {
        let plans: [&[(Id, &str)]; 4] = [
            &[(1, "3")],
            &[(1, ""), (2, "0"), (3, "x")],
            &[(1, "2"), (2, "4"), (3, "1"), (4, "3")],
            &[(9, "5"), (8, "1")],
        ];
        for plan in plans {
            let tpl = template(plan);
            let mut guide = SessionGuide::initialize_from_template(&tpl);
            for (i, row) in tpl.rows().iter().enumerate() {
                for _ in 0..row.planned_set_count() {
                    assert!(!guide.is_completed());
                    assert_eq!(guide.position().unwrap().exercise_index, i);
                    guide.advance_after_log(&tpl, row.exercise_id);
                }
            }
            assert!(guide.is_completed());
        }
    }

    #[test]
    fn mismatched_exercise_does_not_advance() {
        let tpl = template(&[(1, "3"), (2, "3")]);
        let mut guide = SessionGuide::initialize_from_template(&tpl);
        guide.advance_after_log(&tpl, 1);
        let before = guide.clone();
        assert_eq!(guide.advance_after_log(&tpl, 2), Advance::Ignored);
        assert_eq!(guide.advance_after_log(&tpl, 404), Advance::Ignored);
        assert_eq!(guide, before);
    }

    #[test]
    fn select_rejects_completed_and_unknown_exercises() {
        let tpl = template(&[(1, "2"), (2, "2")]);
        let mut guide = SessionGuide::initialize_from_template(&tpl);
        let mut done = CompletionMap::default();
        done.mark_done(2);
        let before = guide.clone();
        assert!(!guide.select_exercise(&tpl, &[], &done, 2));
        assert!(!guide.select_exercise(&tpl, &[], &done, 99));
        assert_eq!(guide, before);
    }

    #[test]
    fn select_resumes_after_logged_sets() {
        let tpl = template(&[(1, "3"), (2, "3")]);
        let logs = vec![log(2, 1), log(1, 1), log(2, 2)];
        let mut guide = SessionGuide::initialize_from_template(&tpl);
        assert!(guide.select_exercise(&tpl, &logs, &CompletionMap::default(), 2));
        assert_eq!(pos(&guide), (1, 3, false));
    }

    #[test]
    fn skip_moves_on_and_completes_at_end() {
        let tpl = template(&[(1, "3"), (2, "3")]);
        let mut guide = SessionGuide::initialize_from_template(&tpl);
        guide.advance_after_log(&tpl, 1);
        assert_eq!(guide.skip_to_next(&tpl), Advance::NextExercise);
        assert_eq!(pos(&guide), (1, 1, false));
        assert_eq!(guide.skip_to_next(&tpl), Advance::Completed);
        assert!(guide.is_completed());
    }

    #[test]
    fn session_resume_skips_completed_and_counts_logs() {
        let tpl = template(&[(1, "2"), (2, "3"), (3, "1")]);
        let logs = vec![log(1, 1), log(1, 2), log(2, 1)];
        let mut done = CompletionMap::default();
        done.mark_done(1);
        let guide = SessionGuide::initialize_from_session(&logs, &tpl, &done, None);
        assert_eq!(pos(&guide), (1, 2, false));
    }

    #[test]
    fn session_resume_prefers_open_active_exercise() {
        let tpl = template(&[(1, "2"), (2, "3"), (3, "1")]);
        let logs = vec![log(3, 1)];
        let guide = SessionGuide::initialize_from_session(&logs, &tpl, &CompletionMap::default(), Some(3));
        assert_eq!(pos(&guide), (2, 2, false));

        let mut done = CompletionMap::default();
        done.mark_done(3);
        let guide = SessionGuide::initialize_from_session(&logs, &tpl, &done, Some(3));
        assert_eq!(pos(&guide), (0, 1, false));
    }

    #[test]
    fn session_resume_with_everything_done_is_completed_on_last_row() {
        let tpl = template(&[(1, "1"), (2, "1")]);
        let mut done = CompletionMap::default();
        done.mark_done(1);
        done.mark_done(2);
        let guide = SessionGuide::initialize_from_session(&[log(1, 1), log(2, 1)], &tpl, &done, Some(1));
        assert_eq!(pos(&guide), (1, 2, true));
    }

    #[test]
    fn done_choice_moves_to_next_open_row_wrapping() {
        let tpl = template(&[(1, "1"), (2, "1"), (3, "1")]);
        let logs = vec![log(1, 1), log(3, 1)];
        let mut done = CompletionMap::default();
        done.mark_done(3);
        let mut guide = SessionGuide::initialize_from_template(&tpl);
        assert_eq!(guide.advance_past(&tpl, &logs, &done, 3), Advance::NextExercise);
        assert_eq!(pos(&guide), (0, 2, false));

        done.mark_done(1);
        done.mark_done(2);
        assert_eq!(guide.advance_past(&tpl, &logs, &done, 2), Advance::Completed);
        assert!(guide.is_completed());
    }

    #[test]
    fn extra_set_keeps_exercise_active() {
        let tpl = template(&[(1, "2"), (2, "1")]);
        let logs = vec![log(1, 1), log(1, 2)];
        let mut guide = SessionGuide::initialize_from_template(&tpl);
        guide.advance_after_log(&tpl, 1);
        guide.advance_after_log(&tpl, 1);
        assert_eq!(pos(&guide), (1, 1, false));
        assert!(guide.resume_exercise(&tpl, &logs, 1));
        assert_eq!(pos(&guide), (0, 3, false));
    }

    #[test]
    fn choice_is_offered_once_planned_sets_are_logged() {
        let tpl = template(&[(1, "2")]);
        let done = CompletionMap::default();
        assert!(!needs_exercise_choice(&tpl, &[log(1, 1)], &done, 1));
        assert!(needs_exercise_choice(&tpl, &[log(1, 1), log(1, 2)], &done, 1));
        assert!(needs_exercise_choice(&tpl, &[log(1, 1), log(1, 2), log(1, 3)], &done, 1));
        let mut finished = CompletionMap::default();
        finished.mark_done(1);
        assert!(!needs_exercise_choice(&tpl, &[log(1, 1), log(1, 2)], &finished, 1));
    }
}
