use leptos::*;
use tracing::info;

use crate::app::use_services;
use crate::types::{
    AppView, Exercise, ExerciseDraft, Id, Program, ProgramDraft, TemplateRow, TemplateRowDraft, TemplateWithRows,
};

#[derive(Clone, Copy, Debug, PartialEq)]
enum PendingDelete {
    Exercise(Id),
    Program(Id),
    Template(Id),
}

/// Plan fields editable inline on a template row.
#[derive(Clone, Copy, Debug, PartialEq)]
enum RowField {
    Sets,
    Reps,
    Weight,
    Rest,
}

/// The row with one field replaced, or `None` when nothing changed.
fn with_field(row: &TemplateRow, field: RowField, value: &str) -> Option<TemplateRow> {
    let value = value.trim().to_string();
    let mut next = row.clone();
    let slot = match field {
        RowField::Sets => &mut next.planned_sets,
        RowField::Reps => &mut next.reps,
        RowField::Weight => &mut next.planned_weight,
        RowField::Rest => &mut next.rest,
    };
    if *slot == value {
        return None;
    }
    *slot = value;
    Some(next)
}

/// Put a saved row into its template: replaced by id, appended when new.
fn apply_row(templates: &mut [TemplateWithRows], row: TemplateRow) {
    let Some(template) = templates.iter_mut().find(|t| t.id() == row.template_id) else {
        return;
    };
    match template.exercises.iter_mut().find(|r| r.id == row.id) {
        Some(existing) => *existing = row,
        None => template.exercises.push(row),
    }
}

fn drop_row(templates: &mut [TemplateWithRows], template_id: Id, row_id: Id) {
    if let Some(template) = templates.iter_mut().find(|t| t.id() == template_id) {
        template.exercises.retain(|r| r.id != row_id);
    }
}

fn next_template_name(templates: &[TemplateWithRows]) -> String {
    format!("Day {}", templates.len() + 1)
}

fn replace_by_id<T, F: Fn(&T) -> Id>(list: &mut [T], item: T, id_of: F) {
    let id = id_of(&item);
    if let Some(slot) = list.iter_mut().find(|x| id_of(x) == id) {
        *slot = item;
    }
}

#[component]
pub fn Builder() -> impl IntoView {
    let services = use_services();
    let exercises = services.exercises;
    let view_signal = services.view;
    let (programs, set_programs) = create_signal(Vec::<Program>::new());
    let (program_id, set_program_id) = create_signal(Option::<Id>::None);
    let (templates, set_templates) = create_signal(Vec::<TemplateWithRows>::new());
    let (template_idx, set_template_idx) = create_signal(0usize);
    let (new_exercise, set_new_exercise) = create_signal(String::new());
    let (new_program, set_new_program) = create_signal(String::new());
    let (pending_delete, set_pending_delete) = create_signal(Option::<PendingDelete>::None);
    let (busy, set_busy) = create_signal(false);

    {
        let services = services.clone();
        spawn_local(async move {
            match services.api.programs().await {
                Ok(list) => set_programs.set(list),
                Err(e) => services.report("programs unavailable", &e),
            }
            match services.api.exercises().await {
                Ok(list) => exercises.set(list),
                Err(e) => services.report("exercises unavailable", &e),
            }
        });
    }

    let select_program = {
        let services = services.clone();
        move |id: Option<Id>| {
            set_program_id.set(id);
            set_templates.set(Vec::new());
            set_template_idx.set(0);
            let Some(id) = id else {
                return;
            };
            let services = services.clone();
            spawn_local(async move {
                match services.api.templates(Some(id)).await {
                    Ok(list) => set_templates.set(list),
                    Err(e) => services.report("templates unavailable", &e),
                }
            });
        }
    };

    // ============ EXERCISES ============

    let add_exercise = {
        let services = services.clone();
        move |_| {
            let name = new_exercise.get();
            if name.trim().is_empty() {
                return;
            }
            let services = services.clone();
            spawn_local(async move {
                match services.api.create_exercise(&ExerciseDraft::named(&name)).await {
                    Ok(created) => {
                        info!(exercise_id = created.id, "exercise created");
                        exercises.update(|list| list.push(created));
                        set_new_exercise.set(String::new());
                    }
                    Err(e) => services.report("could not create exercise", &e),
                }
            });
        }
    };

    let rename_exercise = {
        let services = services.clone();
        move |exercise: Exercise, name: String| {
            if name.trim().is_empty() || name.trim() == exercise.name {
                return;
            }
            let draft = ExerciseDraft { name: name.trim().to_string(), ..ExerciseDraft::from(&exercise) };
            let services = services.clone();
            spawn_local(async move {
                match services.api.update_exercise(exercise.id, &draft).await {
                    Ok(updated) => exercises.update(|list| replace_by_id(list, updated, |e| e.id)),
                    Err(e) => services.report("could not rename exercise", &e),
                }
            });
        }
    };

    // ============ PROGRAMS ============

    let add_program = {
        let services = services.clone();
        let select_program = select_program.clone();
        move |_| {
            let name = new_program.get();
            if name.trim().is_empty() {
                return;
            }
            let draft = ProgramDraft { name: name.trim().to_string(), ..ProgramDraft::default() };
            let services = services.clone();
            let select_program = select_program.clone();
            spawn_local(async move {
                match services.api.create_program(&draft).await {
                    Ok(created) => {
                        info!(program_id = created.id, "program created");
                        let id = created.id;
                        set_programs.update(|list| list.push(created));
                        set_new_program.set(String::new());
                        select_program(Some(id));
                    }
                    Err(e) => services.report("could not create program", &e),
                }
            });
        }
    };

    let save_program = {
        let services = services.clone();
        move |program: Program, draft: ProgramDraft| {
            if draft.name.trim().is_empty() || (draft.name == program.name && draft.description == program.description) {
                return;
            }
            let services = services.clone();
            spawn_local(async move {
                match services.api.update_program(program.id, &draft).await {
                    Ok(updated) => set_programs.update(|list| replace_by_id(list, updated, |p| p.id)),
                    Err(e) => services.report("could not save program", &e),
                }
            });
        }
    };

    let publish_program = {
        let services = services.clone();
        move |id: Id, is_public: bool| {
            let services = services.clone();
            spawn_local(async move {
                match services.api.publish_program(id, is_public).await {
                    Ok(updated) => set_programs.update(|list| replace_by_id(list, updated, |p| p.id)),
                    Err(e) => services.report("could not change program visibility", &e),
                }
            });
        }
    };

    // ============ TEMPLATES ============

    let add_template = {
        let services = services.clone();
        move |_: ev::MouseEvent| {
            let Some(pid) = program_id.get_untracked() else {
                return;
            };
            let name = next_template_name(&templates.get_untracked());
            let services = services.clone();
            spawn_local(async move {
                match services.api.create_template(pid, &name).await {
                    Ok(template) => {
                        set_templates.update(|list| list.push(TemplateWithRows { template, exercises: Vec::new() }));
                        set_template_idx.set(templates.get_untracked().len().saturating_sub(1));
                    }
                    Err(e) => services.report("could not add workout", &e),
                }
            });
        }
    };

    let rename_template = {
        let services = services.clone();
        move |template_id: Id, name: String| {
            let services = services.clone();
            spawn_local(async move {
                match services.api.rename_template(template_id, name.trim()).await {
                    Ok(renamed) => set_templates.update(|list| {
                        if let Some(t) = list.iter_mut().find(|t| t.id() == renamed.id) {
                            t.template = renamed;
                        }
                    }),
                    Err(e) => services.report("could not rename workout", &e),
                }
            });
        }
    };

    let add_row = {
        let services = services.clone();
        move |template_id: Id, exercise_id: Id| {
            let draft = TemplateRowDraft { exercise_id, planned_sets: "3".into(), reps: "8".into(), rest: "2:00".into(), ..Default::default() };
            let services = services.clone();
            spawn_local(async move {
                match services.api.add_template_row(template_id, &draft).await {
                    Ok(row) => set_templates.update(|list| apply_row(list, row)),
                    Err(e) => services.report("could not add exercise to workout", &e),
                }
            });
        }
    };

    let update_row = {
        let services = services.clone();
        move |template_id: Id, row: TemplateRow| {
            let services = services.clone();
            spawn_local(async move {
                match services.api.update_template_row(template_id, row.id, &TemplateRowDraft::from(&row)).await {
                    Ok(saved) => set_templates.update(|list| apply_row(list, saved)),
                    Err(e) => services.report("could not save row", &e),
                }
            });
        }
    };

    let remove_row = {
        let services = services.clone();
        move |template_id: Id, row_id: Id| {
            let services = services.clone();
            spawn_local(async move {
                match services.api.remove_template_row(template_id, row_id).await {
                    Ok(()) => set_templates.update(|list| drop_row(list, template_id, row_id)),
                    Err(e) => services.report("could not remove row", &e),
                }
            });
        }
    };

    let confirm_delete = {
        let services = services.clone();
        move |_: ev::MouseEvent| {
            let Some(target) = pending_delete.get_untracked() else {
                return;
            };
            set_busy.set(true);
            let services = services.clone();
            spawn_local(async move {
                let result = match target {
                    PendingDelete::Exercise(id) => services.api.delete_exercise(id).await,
                    PendingDelete::Program(id) => services.api.delete_program(id).await,
                    PendingDelete::Template(id) => services.api.delete_template(id).await,
                };
                match result {
                    Ok(()) => {
                        info!(?target, "deleted");
                        match target {
                            PendingDelete::Exercise(id) => exercises.update(|list| list.retain(|e| e.id != id)),
                            PendingDelete::Program(id) => {
                                set_programs.update(|list| list.retain(|p| p.id != id));
                                set_program_id.set(None);
                                set_templates.set(Vec::new());
                            }
                            PendingDelete::Template(id) => {
                                set_templates.update(|list| list.retain(|t| t.id() != id));
                                set_template_idx.set(0);
                            }
                        }
                    }
                    Err(e) => services.report("delete failed", &e),
                }
                set_pending_delete.set(None);
                set_busy.set(false);
            });
        }
    };

    let services_view = services.clone();
    view! {
        <div class="routine-builder">
            <header class="builder-header">
                <button class="back-btn" on:click=move |_| view_signal.set(AppView::Dashboard)>"← Back"</button>
                <h1>"Plans"</h1>
            </header>

            <div class="builder-content">
                <h3>"Exercises"</h3>
                <div class="pass-exercises">
                    {move || exercises.get().into_iter().map(|exercise| {
                        let rename_exercise = rename_exercise.clone();
                        let id = exercise.id;
                        let name = exercise.name.clone();
                        view! {
                            <div class="exercise-item">
                                <input
                                    type="text"
                                    class="exercise-name"
                                    value=name
                                    on:blur=move |e| rename_exercise(exercise.clone(), event_target_value(&e))
                                />
                                <button class="remove-exercise-btn" on:click=move |_| set_pending_delete.set(Some(PendingDelete::Exercise(id)))>
                                    "×"
                                </button>
                            </div>
                        }
                    }).collect_view()}
                    <div class="add-exercise-row">
                        <input
                            type="text"
                            class="routine-name-input"
                            placeholder="New exercise"
                            prop:value=new_exercise
                            on:input=move |e| set_new_exercise.set(event_target_value(&e))
                        />
                        <button class="add-exercise-btn" on:click=add_exercise>"Add"</button>
                    </div>
                </div>

                <h3>"Programs"</h3>
                <div class="passes-tabs">
                    {
                        let select_program = select_program.clone();
                        move || programs.get().into_iter().map(|p| {
                            let select_program = select_program.clone();
                            let class = if program_id.get() == Some(p.id) { "pass-tab selected" } else { "pass-tab" };
                            view! {
                                <button class=class on:click=move |_| select_program(Some(p.id))>{p.name}</button>
                            }
                        }).collect_view()
                    }
                </div>
                <div class="add-exercise-row">
                    <input
                        type="text"
                        class="routine-name-input"
                        placeholder="New program"
                        prop:value=new_program
                        on:input=move |e| set_new_program.set(event_target_value(&e))
                    />
                    <button class="add-exercise-btn" on:click=add_program>"Create"</button>
                </div>

                {move || {
                    let pid = program_id.get()?;
                    let program = programs.with(|list| list.iter().find(|p| p.id == pid).cloned())?;
                    let save_name = save_program.clone();
                    let save_description = save_program.clone();
                    let publish_program = publish_program.clone();
                    let (name_program, description_program) = (program.clone(), program.clone());
                    let public = program.is_public;
                    Some(view! {
                        <div class="builder-meta">
                            <input
                                type="text"
                                class="routine-name-input"
                                value=program.name.clone()
                                on:blur=move |e| save_name(
                                    name_program.clone(),
                                    ProgramDraft { name: event_target_value(&e), description: name_program.description.clone() },
                                )
                            />
                            <input
                                type="text"
                                class="routine-focus-input"
                                placeholder="Description"
                                value=program.description.clone()
                                on:blur=move |e| save_description(
                                    description_program.clone(),
                                    ProgramDraft { name: description_program.name.clone(), description: event_target_value(&e) },
                                )
                            />
                            <button class="auth-link" on:click=move |_| publish_program(pid, !public)>
                                {if public { "Public · make private" } else { "Private · publish" }}
                            </button>
                            <button class="delete-routine-btn" on:click=move |_| set_pending_delete.set(Some(PendingDelete::Program(pid)))>
                                "Delete program"
                            </button>
                        </div>
                    })
                }}

                {move || program_id.get().is_some().then(|| {
                    let add_template = add_template.clone();
                    view! {
                        <div class="passes-tabs">
                            {move || templates.get().into_iter().enumerate().map(|(i, t)| {
                                let class = if template_idx.get() == i { "pass-tab selected" } else { "pass-tab" };
                                view! { <button class=class on:click=move |_| set_template_idx.set(i)>{t.template.name}</button> }
                            }).collect_view()}
                            <button class="add-pass-btn" on:click=add_template>"+"</button>
                        </div>
                    }
                })}

                {
                    let services = services_view.clone();
                    move || {
                        let t = templates.with(|list| list.get(template_idx.get()).cloned())?;
                        let tid = t.id();
                        let rename_template = rename_template.clone();
                        let add_row = add_row.clone();
                        let services = services.clone();
                        Some(view! {
                            <div class="pass-editor">
                                <div class="pass-meta-edit">
                                    <label class="field-label">"Name"</label>
                                    <input
                                        type="text"
                                        class="pass-name-input"
                                        value=t.template.name.clone()
                                        on:blur=move |e| rename_template(tid, event_target_value(&e))
                                    />
                                    <button class="delete-routine-btn" on:click=move |_| set_pending_delete.set(Some(PendingDelete::Template(tid)))>
                                        "Delete workout"
                                    </button>
                                </div>
                                <div class="pass-exercises">
                                    {t.exercises.into_iter().map(|row| {
                                        let name = services.exercise_name(row.exercise_id);
                                        let update_row = update_row.clone();
                                        let remove_row = remove_row.clone();
                                        let row_id = row.id;
                                        let (sets, reps, weight, rest) = (
                                            row.planned_sets.clone(),
                                            row.reps.clone(),
                                            row.planned_weight.clone(),
                                            row.rest.clone(),
                                        );
                                        let edit = move |field: RowField| {
                                            let update_row = update_row.clone();
                                            let row = row.clone();
                                            move |e: ev::FocusEvent| {
                                                if let Some(next) = with_field(&row, field, &event_target_value(&e)) {
                                                    update_row(tid, next);
                                                }
                                            }
                                        };
                                        view! {
                                            <div class="exercise-item">
                                                <div class="exercise-main">
                                                    <span class="exercise-name">{name}</span>
                                                    <div class="exercise-edit">
                                                        <input type="text" class="sets-input" placeholder="sets" value=sets on:blur=edit(RowField::Sets) />
                                                        <span class="x-sep">"×"</span>
                                                        <input type="text" class="reps-input" placeholder="reps" value=reps on:blur=edit(RowField::Reps) />
                                                        <input type="text" class="reps-input" placeholder="kg" value=weight on:blur=edit(RowField::Weight) />
                                                        <input type="text" class="reps-input" placeholder="rest" value=rest on:blur=edit(RowField::Rest) />
                                                    </div>
                                                </div>
                                                <button class="remove-exercise-btn" on:click=move |_| remove_row(tid, row_id)>"×"</button>
                                            </div>
                                        }
                                    }).collect_view()}
                                </div>
                                <select class="add-exercise-select" on:change=move |e| {
                                    if let Ok(exercise_id) = event_target_value(&e).parse::<Id>() {
                                        add_row(tid, exercise_id);
                                    }
                                }>
                                    <option value="">"+ Add exercise"</option>
                                    {exercises.get().into_iter().map(|ex| {
                                        view! { <option value=ex.id.to_string()>{ex.name}</option> }
                                    }).collect_view()}
                                </select>
                            </div>
                        })
                    }
                }
            </div>

            {move || pending_delete.get().map(|target| {
                let confirm_delete = confirm_delete.clone();
                let what = match target {
                    PendingDelete::Exercise(_) => "this exercise",
                    PendingDelete::Program(_) => "this program with its workouts and sessions",
                    PendingDelete::Template(_) => "this workout",
                };
                view! {
                    <div class="modal-overlay">
                        <div class="confirm-dialog">
                            <div class="confirm-title">"Delete?"</div>
                            <div class="confirm-text">{format!("Delete {}? This cannot be undone.", what)}</div>
                            <div class="confirm-buttons">
                                <button class="confirm-cancel" on:click=move |_| set_pending_delete.set(None)>"Keep"</button>
                                <button class="confirm-ok" disabled=move || busy.get() on:click=confirm_delete>"Delete"</button>
                            </div>
                        </div>
                    </div>
                }
            })}
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Template;

    fn template(id: Id, rows: Vec<TemplateRow>) -> TemplateWithRows {
        TemplateWithRows { template: Template { id, program_id: 1, name: format!("T{id}") }, exercises: rows }
    }

    fn row(id: Id, template_id: Id, exercise_id: Id) -> TemplateRow {
        TemplateRow { id, template_id, exercise_id, planned_sets: "3".into(), ..Default::default() }
    }

    #[test]
    fn unchanged_field_is_not_saved() {
        let r = row(1, 5, 2);
        assert_eq!(with_field(&r, RowField::Sets, " 3 "), None);
        let next = with_field(&r, RowField::Rest, "90s").unwrap();
        assert_eq!(next.rest, "90s");
        assert_eq!(next.planned_sets, "3");
    }

    #[test]
    fn saved_rows_replace_or_append() {
        let mut list = vec![template(5, vec![row(1, 5, 2)]), template(6, vec![])];
        let mut edited = row(1, 5, 2);
        edited.reps = "5".into();
        apply_row(&mut list, edited);
        apply_row(&mut list, row(2, 5, 3));
        apply_row(&mut list, row(9, 77, 3));
        assert_eq!(list[0].exercises.len(), 2);
        assert_eq!(list[0].exercises[0].reps, "5");
        assert!(list[1].exercises.is_empty());

        drop_row(&mut list, 5, 1);
        assert_eq!(list[0].exercises.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn new_workouts_are_numbered_after_existing_ones() {
        assert_eq!(next_template_name(&[]), "Day 1");
        assert_eq!(next_template_name(&[template(1, vec![]), template(2, vec![])]), "Day 3");
    }
}
