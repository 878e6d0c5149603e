use clap::Subcommand;
use serde_json::json;
use shark_core::{
    error::{Result, SharkError},
    keys::Keys,
    models::{NewTask, NoteType, RelationshipType, TaskFilter, UpdateTask},
    repository::{RelationshipRepository, TaskRepository, Transition, TransitionRequest},
    workflow::well_known,
};
use shark_db::NextFilters;

use crate::{context::AppContext, output::CommandOutput};

use super::{agent_or_user, resolve_epic, resolve_feature, resolve_task, run_cascade, to_value};

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Create a task under an epic and feature
    Create {
        epic: String,
        feature: String,
        title: String,
        /// Agent the task is assigned to
        #[arg(long)]
        agent: Option<String>,
        /// 1 = highest, 10 = lowest (default 5)
        #[arg(long)]
        priority: Option<i64>,
        /// Comma-separated task keys this task depends on
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Vec<String>,
        /// Execution lane; equal values run in parallel
        #[arg(long)]
        order: Option<i64>,
        /// Explicit task key instead of the next free ordinal
        #[arg(long)]
        key: Option<String>,
        /// Description file path (relative, .md)
        #[arg(long)]
        file: Option<String>,
        /// Take over a colliding file path (backs up the store first)
        #[arg(long)]
        force: bool,
    },
    /// Move a task to in_progress
    Start {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Mark work done: move the task to ready_for_review
    Complete {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Approve a reviewed task: move it to completed
    Approve {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Block a task with a reason
    Block {
        key: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Return a blocked task to the workflow's entry status
    Unblock {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Send a reviewed task back to development
    Reopen {
        key: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Generic transition to any workflow status
    SetStatus {
        key: String,
        status: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Update task fields
    Update {
        key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Option<Vec<String>>,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        file: Option<String>,
        /// New task key (rekey)
        #[arg(long = "key")]
        new_key: Option<String>,
        /// Replace the task's JSON context payload
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// The next runnable task group under dependency and ordering rules
    Next {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        epic: Option<String>,
    },
    /// Add typed relationships from a task to others
    Link {
        key: String,
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        blocks: Vec<String>,
        #[arg(long = "related-to", value_delimiter = ',')]
        related_to: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        follows: Vec<String>,
        #[arg(long = "spawned-from", value_delimiter = ',')]
        spawned_from: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        duplicates: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        references: Vec<String>,
    },
    /// List tasks
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        /// Keep tasks with priority <= N
        #[arg(long = "max-priority")]
        max_priority: Option<i64>,
    },
    /// Show one task with its relationships
    Get { key: String },
    /// Delete a task and its dependent rows
    Delete { key: String },
    /// Status history of a task, oldest first
    History { key: String },
    /// Attach a note to a task
    Note {
        key: String,
        content: String,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Reopen or start a work session on a task
    Resume {
        key: String,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Task context bundle: notes, history, session, context payload
    Context { key: String },
}

pub async fn run(ctx: &AppContext, command: TaskCommand) -> Result<CommandOutput> {
    match command {
        TaskCommand::Create {
            epic,
            feature,
            title,
            agent,
            priority,
            depends_on,
            order,
            key,
            file,
            force,
        } => {
            let epic = resolve_epic(ctx, &epic).await?;
            let feature = resolve_feature(ctx, &feature, Some(&epic.key)).await?;

            // forced file claims go through the assignment manager after
            // creation; plain paths are validated at insert
            let (create_file, claim_later) = match (&file, force) {
                (Some(path), true) => (None, Some(path.clone())),
                (Some(path), false) => (Some(path.clone()), None),
                (None, _) => (None, None),
            };

            let task = ctx
                .tasks
                .create(NewTask {
                    feature_id: feature.id,
                    key,
                    title,
                    description: None,
                    priority,
                    agent_type: None,
                    assigned_agent: agent_or_user(agent),
                    depends_on,
                    execution_order: order,
                    file_path: create_file,
                })
                .await?;
            let task = match claim_later {
                Some(path) => ctx.tasks.update_file_path(task.id, Some(&path), true).await?,
                None => task,
            };

            Ok(CommandOutput::new(
                format!("created task {} ({})", task.key, task.status),
                json!({ "task": to_value(&task) }),
            ))
        }

        TaskCommand::Start {
            key,
            agent,
            notes,
            force,
        } => {
            transition(ctx, &key, well_known::IN_PROGRESS, agent, notes, None, force).await
        }
        TaskCommand::Complete {
            key,
            agent,
            notes,
            force,
        } => {
            transition(
                ctx,
                &key,
                well_known::READY_FOR_REVIEW,
                agent,
                notes,
                None,
                force,
            )
            .await
        }
        TaskCommand::Approve {
            key,
            agent,
            notes,
            force,
        } => transition(ctx, &key, well_known::COMPLETED, agent, notes, None, force).await,
        TaskCommand::SetStatus {
            key,
            status,
            reason,
            agent,
            notes,
            force,
        } => transition(ctx, &key, &status, agent, notes, reason, force).await,

        TaskCommand::Block {
            key,
            reason,
            agent,
            force,
        } => {
            let task = resolve_task(ctx, &key).await?;
            let result = ctx
                .tasks
                .block(task.id, &reason, agent_or_user(agent), force)
                .await?;
            finish_transition(ctx, result).await
        }
        TaskCommand::Unblock { key, agent, force } => {
            let task = resolve_task(ctx, &key).await?;
            let result = ctx
                .tasks
                .unblock(task.id, agent_or_user(agent), force)
                .await?;
            finish_transition(ctx, result).await
        }
        TaskCommand::Reopen {
            key,
            reason,
            agent,
            notes,
            force,
        } => {
            let task = resolve_task(ctx, &key).await?;
            let result = ctx
                .tasks
                .reopen(task.id, agent_or_user(agent), notes, reason, force)
                .await?;
            finish_transition(ctx, result).await
        }

        TaskCommand::Update {
            key,
            title,
            description,
            priority,
            agent,
            status,
            reason,
            depends_on,
            order,
            file,
            new_key,
            context,
            force,
        } => {
            let task = resolve_task(ctx, &key).await?;

            let context_data = context
                .map(|raw| {
                    serde_json::from_str(&raw).map_err(|e| {
                        SharkError::validation("context", format!("invalid JSON: {e}"))
                    })
                })
                .transpose()?;
            let updates = UpdateTask {
                title,
                description,
                priority,
                agent_type: None,
                assigned_agent: agent.clone(),
                depends_on,
                execution_order: order.map(Some),
                context_data,
            };
            let mut task = ctx.tasks.update(task.id, updates).await?;

            if let Some(path) = file {
                task = ctx
                    .tasks
                    .update_file_path(task.id, Some(&path), force)
                    .await?;
            }
            if let Some(new_key) = new_key {
                task = ctx.tasks.update_key(task.id, &new_key).await?;
            }

            if let Some(status) = status {
                let result = ctx
                    .tasks
                    .update_status(
                        task.id,
                        &status,
                        TransitionRequest {
                            agent: agent_or_user(agent),
                            notes: None,
                            rejection_reason: reason,
                            force,
                        },
                    )
                    .await?;
                return finish_transition(ctx, result).await;
            }

            Ok(CommandOutput::new(
                format!("updated task {}", task.key),
                json!({ "task": to_value(&task) }),
            ))
        }

        TaskCommand::Next { agent, epic } => {
            let epic_key = match epic {
                Some(epic) => Some(Keys::epic(&epic)?),
                None => None,
            };
            let tasks = ctx
                .scheduler
                .next_available(NextFilters {
                    epic_key,
                    agent: agent_or_user(agent),
                })
                .await?;
            let summary = if tasks.is_empty() {
                "no task available".to_string()
            } else {
                format!(
                    "next: {}",
                    tasks
                        .iter()
                        .map(|t| t.key.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            Ok(CommandOutput::new(summary, json!({ "tasks": to_value(&tasks) })))
        }

        TaskCommand::Link {
            key,
            depends_on,
            blocks,
            related_to,
            follows,
            spawned_from,
            duplicates,
            references,
        } => {
            let task = resolve_task(ctx, &key).await?;
            let groups = [
                (RelationshipType::DependsOn, depends_on),
                (RelationshipType::Blocks, blocks),
                (RelationshipType::RelatedTo, related_to),
                (RelationshipType::Follows, follows),
                (RelationshipType::SpawnedFrom, spawned_from),
                (RelationshipType::Duplicates, duplicates),
                (RelationshipType::References, references),
            ];

            let mut created = Vec::new();
            for (relationship, targets) in groups {
                for target in targets {
                    let target = resolve_task(ctx, &target).await?;
                    let edge = ctx
                        .relationships
                        .create(task.id, target.id, relationship)
                        .await?;
                    created.push(json!({
                        "from": task.key,
                        "to": target.key,
                        "type": relationship.as_str(),
                        "id": edge.id,
                    }));
                }
            }
            if created.is_empty() {
                return Err(SharkError::validation(
                    "relationships",
                    "no relationship flags given",
                ));
            }
            Ok(CommandOutput::new(
                format!("linked {} relationship(s) from {}", created.len(), task.key),
                json!({ "task": task.key, "relationships": created }),
            ))
        }

        TaskCommand::List {
            status,
            epic,
            agent,
            max_priority,
        } => {
            let epic_key = match epic {
                Some(epic) => Some(Keys::epic(&epic)?),
                None => None,
            };
            let tasks = ctx
                .tasks
                .list(TaskFilter {
                    status,
                    epic_key,
                    feature_id: None,
                    assigned_agent: agent,
                    max_priority,
                    limit: None,
                })
                .await?;
            Ok(CommandOutput::new(
                format!("{} task(s)", tasks.len()),
                json!({ "tasks": to_value(&tasks) }),
            ))
        }

        TaskCommand::Get { key } => {
            let task = resolve_task(ctx, &key).await?;
            let outgoing = ctx.relationships.get_outgoing(task.id, None).await?;
            let incoming = ctx.relationships.get_incoming(task.id, None).await?;
            Ok(CommandOutput::new(
                format!("task {} ({})", task.key, task.status),
                json!({
                    "task": to_value(&task),
                    "outgoing": to_value(&outgoing),
                    "incoming": to_value(&incoming),
                }),
            ))
        }

        TaskCommand::Delete { key } => {
            let task = resolve_task(ctx, &key).await?;
            ctx.tasks.delete(task.id).await?;
            let (cascade, warnings) = run_cascade(ctx, task.feature_id).await;
            Ok(CommandOutput::new(
                format!("deleted task {}", task.key),
                json!({ "deleted": task.key, "cascade": to_value(&cascade) }),
            )
            .with_warnings(warnings))
        }

        TaskCommand::History { key } => {
            let task = resolve_task(ctx, &key).await?;
            let history = ctx.tasks.history(task.id).await?;
            Ok(CommandOutput::new(
                format!("{} history entries for {}", history.len(), task.key),
                json!({ "task": task.key, "history": to_value(&history) }),
            ))
        }

        TaskCommand::Note { key, content, agent } => {
            let task = resolve_task(ctx, &key).await?;
            let note = ctx
                .tasks
                .add_note(
                    task.id,
                    NoteType::General,
                    &content,
                    agent_or_user(agent).as_deref(),
                )
                .await?;
            Ok(CommandOutput::new(
                format!("noted on {}", task.key),
                json!({ "task": task.key, "note": to_value(&note) }),
            ))
        }

        TaskCommand::Resume { key, agent } => {
            let task = resolve_task(ctx, &key).await?;
            let (task, session) = ctx
                .tasks
                .resume(task.id, agent_or_user(agent).as_deref())
                .await?;
            Ok(CommandOutput::new(
                format!("resumed {} (session {})", task.key, session.id),
                json!({ "task": to_value(&task), "session": to_value(&session) }),
            ))
        }

        TaskCommand::Context { key } => {
            let task = resolve_task(ctx, &key).await?;
            let notes = ctx.tasks.notes(task.id).await?;
            let history = ctx.tasks.history(task.id).await?;
            let session = ctx.tasks.open_session(task.id).await?;
            Ok(CommandOutput::new(
                format!("context for {}", task.key),
                json!({
                    "task": to_value(&task),
                    "notes": to_value(&notes),
                    "history": to_value(&history),
                    "open_session": to_value(&session),
                }),
            ))
        }
    }
}

/// The shared transition path: resolve, mutate, cascade, assemble
async fn transition(
    ctx: &AppContext,
    key: &str,
    target: &str,
    agent: Option<String>,
    notes: Option<String>,
    reason: Option<String>,
    force: bool,
) -> Result<CommandOutput> {
    let task = resolve_task(ctx, key).await?;
    let result = ctx
        .tasks
        .update_status(
            task.id,
            target,
            TransitionRequest {
                agent: agent_or_user(agent),
                notes,
                rejection_reason: reason,
                force,
            },
        )
        .await?;
    finish_transition(ctx, result).await
}

/// After a successful transition: cascade upward (warnings, never errors)
/// and emit task + next action + cascade results
async fn finish_transition(ctx: &AppContext, result: Transition) -> Result<CommandOutput> {
    let (cascade, warnings) = run_cascade(ctx, result.task.feature_id).await;
    Ok(CommandOutput::new(
        format!("task {} is now {}", result.task.key, result.task.status),
        json!({
            "task": to_value(&result.task),
            "next_action": to_value(&result.action),
            "cascade": to_value(&cascade),
        }),
    )
    .with_warnings(warnings))
}
