use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Backend primary keys.
pub type Id = i64;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct User {
    pub id: Id,
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub user: User,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Exercise {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub muscle_group: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub equipment: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Program {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Template {
    pub id: Id,
    pub program_id: Id,
    pub name: String,
}

/// One planned exercise inside a template. Every plan field is free text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct TemplateRow {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub template_id: Id,
    pub exercise_id: Id,
    #[serde(default)]
    pub planned_sets: String,
    #[serde(default)]
    pub reps: String,
    #[serde(default)]
    pub planned_weight: String,
    #[serde(default)]
    pub rpe: String,
    #[serde(default)]
    pub rest: String,
    #[serde(default)]
    pub comment: String,
}

impl TemplateRow {
    /// Planned set count. Missing, zero or unparseable plans count as one set.
    pub fn planned_set_count(&self) -> u32 {
        let digits: String = self
            .planned_sets
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        match digits.parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => 1,
        }
    }
}

/// Shape returned by `GET /templates`: the template with its rows in plan order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct TemplateWithRows {
    pub template: Template,
    #[serde(default)]
    pub exercises: Vec<TemplateRow>,
}

impl TemplateWithRows {
    pub fn id(&self) -> Id {
        self.template.id
    }

    pub fn rows(&self) -> &[TemplateRow] {
        &self.exercises
    }

    pub fn row(&self, index: usize) -> Option<&TemplateRow> {
        self.exercises.get(index)
    }

    pub fn index_of(&self, exercise_id: Id) -> Option<usize> {
        self.exercises.iter().position(|r| r.exercise_id == exercise_id)
    }

    pub fn row_for(&self, exercise_id: Id) -> Option<&TemplateRow> {
        self.exercises.iter().find(|r| r.exercise_id == exercise_id)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    InProgress,
    Done,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Session {
    pub id: Id,
    pub template_id: Id,
    #[serde(default)]
    pub program_id: Id,
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub program_name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub set_logs: Vec<SetLog>,
}

/// Sets logged for an exercise, always counted from the log list itself.
pub fn logged_count(logs: &[SetLog], exercise_id: Id) -> u32 {
    logs.iter().filter(|l| l.exercise_id == exercise_id).count() as u32
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SetLog {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub session_id: Id,
    pub exercise_id: Id,
    pub set_number: u32,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub reps: i32,
    #[serde(default)]
    pub rpe: f64,
    #[serde(default)]
    pub comment: String,
}

/// Body of `POST /sessions/{id}/log-set`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetLogPayload {
    pub exercise_id: Id,
    pub set_number: u32,
    pub weight: f64,
    pub reps: i32,
    pub rpe: f64,
    pub comment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct PersonalBest {
    pub id: Id,
    pub exercise_id: Id,
    pub kind: String,
    pub label: String,
    pub value: f64,
    #[serde(default)]
    pub reps: i32,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Friend {
    pub id: Id,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct FriendRequest {
    pub id: Id,
    #[serde(default)]
    pub from_username: Option<String>,
    #[serde(default)]
    pub from_display_name: Option<String>,
    #[serde(default)]
    pub to_username: Option<String>,
    #[serde(default)]
    pub to_display_name: Option<String>,
    #[serde(default)]
    pub status: String,
}

// ============ PLAN EDITING ============

/// Body of `POST /exercises` and `POST /exercises/{id}`.
#[derive(Clone, Debug, Serialize, PartialEq, Default)]
pub struct ExerciseDraft {
    pub name: String,
    pub muscle_group: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub equipment: String,
    pub notes: String,
}

impl ExerciseDraft {
    pub fn named(name: &str) -> Self {
        Self { name: name.trim().to_string(), ..Self::default() }
    }
}

impl From<&Exercise> for ExerciseDraft {
    fn from(e: &Exercise) -> Self {
        Self {
            name: e.name.clone(),
            muscle_group: e.muscle_group.clone(),
            kind: e.kind.clone(),
            equipment: e.equipment.clone(),
            notes: e.notes.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Default)]
pub struct ProgramDraft {
    pub name: String,
    pub description: String,
}

/// Plan fields of one template row, as sent to the backend.
#[derive(Clone, Debug, Serialize, PartialEq, Default)]
pub struct TemplateRowDraft {
    pub exercise_id: Id,
    pub planned_sets: String,
    pub reps: String,
    pub planned_weight: String,
    pub rpe: String,
    pub rest: String,
    pub comment: String,
}

impl From<&TemplateRow> for TemplateRowDraft {
    fn from(r: &TemplateRow) -> Self {
        Self {
            exercise_id: r.exercise_id,
            planned_sets: r.planned_sets.clone(),
            reps: r.reps.clone(),
            planned_weight: r.planned_weight.clone(),
            rpe: r.rpe.clone(),
            rest: r.rest.clone(),
            comment: r.comment.clone(),
        }
    }
}

// ============ PUBLIC PROFILE ============

/// A row of someone else's template, with the exercise it points at.
#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
pub struct SharedRow {
    pub row: TemplateRow,
    #[serde(default)]
    pub exercise: Option<Exercise>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
pub struct SharedTemplate {
    pub template: Template,
    #[serde(default)]
    pub exercises: Vec<SharedRow>,
}

/// `GET /users/{username}/programs/{id}/full`.
#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
pub struct ProgramDetail {
    pub program: Program,
    #[serde(default)]
    pub templates: Vec<SharedTemplate>,
}

/// Exercises the user has explicitly finished in one session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct CompletionMap(BTreeMap<Id, bool>);

impl CompletionMap {
    pub fn is_done(&self, exercise_id: Id) -> bool {
        self.0.get(&exercise_id).copied().unwrap_or(false)
    }

    pub fn mark_done(&mut self, exercise_id: Id) {
        self.0.insert(exercise_id, true);
    }

    /// Union with another map; an exercise done in either stays done.
    pub fn merge(&mut self, other: &CompletionMap) {
        for (id, done) in &other.0 {
            if *done {
                self.0.insert(*id, true);
            }
        }
    }

    pub fn all_done(&self, template: &TemplateWithRows) -> bool {
        !template.rows().is_empty() && template.rows().iter().all(|r| self.is_done(r.exercise_id))
    }

    pub fn is_empty(&self) -> bool {
        !self.0.values().any(|d| *d)
    }
}

/// Epley estimate, matching what the backend stores as `est_1rm`.
pub fn estimate_one_rm(weight: f64, reps: i32) -> f64 {
    if reps <= 0 {
        return 0.0;
    }
    weight * (1.0 + reps as f64 / 30.0)
}

#[derive(Clone, Debug, PartialEq)]
pub enum AppView {
    Login,
    Register,
    Dashboard,
    Workout,
    /// Exercises, programs and templates.
    Builder,
    History,
    /// Public programs and PBs of a user.
    Profile(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(exercise_id: Id, planned: &str) -> TemplateRow {
        TemplateRow {
            exercise_id,
            planned_sets: planned.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn planned_sets_default_to_one() {
        assert_eq!(row(1, "").planned_set_count(), 1);
        assert_eq!(row(1, "0").planned_set_count(), 1);
        assert_eq!(row(1, "abc").planned_set_count(), 1);
        assert_eq!(row(1, "-2").planned_set_count(), 1);
        assert_eq!(row(1, " 4 ").planned_set_count(), 4);
        assert_eq!(row(1, "3 sets").planned_set_count(), 3);
    }

    #[test]
    fn completion_map_survives_json_with_integer_keys() {
        let mut map = CompletionMap::default();
        map.mark_done(42);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"42":true}"#);
        let back: CompletionMap = serde_json::from_str(&json).unwrap();
        assert!(back.is_done(42));
        assert!(!back.is_done(7));
    }

    #[test]
    fn session_status_uses_backend_strings() {
        let s: Session = serde_json::from_str(
            r#"{"id":3,"template_id":9,"status":"cancelled","set_logs":[]}"#,
        )
        .unwrap();
        assert_eq!(s.status, SessionStatus::Cancelled);
        assert!(s.status.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
    }

    #[test]
    fn drafts_use_backend_field_names() {
        let draft = ExerciseDraft { kind: "compound".into(), ..ExerciseDraft::named("  Squat ") };
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["name"], "Squat");
        assert_eq!(json["type"], "compound");

        let row = TemplateRow { id: 4, exercise_id: 2, planned_sets: "3".into(), rest: "2:00".into(), ..Default::default() };
        let draft = TemplateRowDraft::from(&row);
        assert_eq!(draft.exercise_id, 2);
        assert_eq!(draft.rest, "2:00");
        assert!(serde_json::to_value(&draft).unwrap().get("id").is_none());
    }

    #[test]
    fn shared_program_tolerates_deleted_exercises() {
        let detail: ProgramDetail = serde_json::from_str(
            r#"{"program":{"id":1,"name":"5x5","is_public":true},
                "templates":[{"template":{"id":2,"program_id":1,"name":"A"},
                              "exercises":[{"row":{"id":3,"template_id":2,"exercise_id":9},"exercise":null}]}]}"#,
        )
        .unwrap();
        assert!(detail.program.is_public);
        assert_eq!(detail.templates[0].exercises[0].row.exercise_id, 9);
        assert_eq!(detail.templates[0].exercises[0].exercise, None);
    }

    #[test]
    fn all_done_requires_every_row() {
        let tpl = TemplateWithRows {
            template: Template { id: 1, program_id: 1, name: "A".into() },
            exercises: vec![row(10, "2"), row(11, "1")],
        };
        let mut map = CompletionMap::default();
        map.mark_done(10);
        assert!(!map.all_done(&tpl));
        map.mark_done(11);
        assert!(map.all_done(&tpl));
    }

    #[test]
    fn one_rm_estimate() {
        assert!((estimate_one_rm(100.0, 3) - 110.0).abs() < 1e-9);
        assert_eq!(estimate_one_rm(100.0, 0), 0.0);
    }
}
