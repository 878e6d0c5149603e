use clap::Subcommand;
use serde_json::json;
use shark_core::{
    error::{Result, SharkError},
    models::{NewFeature, UpdateFeature},
    repository::{FeatureRepository, TaskRepository},
    status::parent,
    workflow::well_known,
};

use crate::{context::AppContext, output::CommandOutput};

use super::{agent_or_user, resolve_epic, resolve_feature, run_cascade, to_value};

/// Backup tag written before a forced feature completion
const FORCE_COMPLETE_OPERATION: &str = "force complete feature";

#[derive(Debug, Subcommand)]
pub enum FeatureCommand {
    /// Create a feature under an epic
    Create {
        epic: String,
        title: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Execution lane; equal values run in parallel
        #[arg(long)]
        order: Option<i64>,
        /// Description file path (relative, .md)
        #[arg(long)]
        file: Option<String>,
        /// Take over a colliding file path (backs up the store first)
        #[arg(long)]
        force: bool,
    },
    /// List features, optionally for one epic
    List {
        #[arg(long)]
        epic: Option<String>,
    },
    /// Show one feature with its task status breakdown
    Get { key: String },
    /// Update feature fields, pin a status, or resume calculation
    Update {
        key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        order: Option<i64>,
        /// Pin this status; automatic calculation is disabled until
        /// --recalculate
        #[arg(long)]
        status: Option<String>,
        /// Clear a pinned status and recompute from the tasks
        #[arg(long)]
        recalculate: bool,
    },
    /// Complete the feature: move every task to completed
    Complete {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        /// Complete even with unfinished tasks (backs up the store first)
        #[arg(long)]
        force: bool,
    },
    /// Delete a feature and its tasks
    Delete { key: String },
}

pub async fn run(ctx: &AppContext, command: FeatureCommand) -> Result<CommandOutput> {
    match command {
        FeatureCommand::Create {
            epic,
            title,
            key,
            description,
            order,
            file,
            force,
        } => {
            let epic = resolve_epic(ctx, &epic).await?;
            let (create_file, claim_later) = match (&file, force) {
                (Some(path), true) => (None, Some(path.clone())),
                (Some(path), false) => (Some(path.clone()), None),
                (None, _) => (None, None),
            };

            let feature = ctx
                .features
                .create(NewFeature {
                    epic_id: epic.id,
                    key,
                    title,
                    description,
                    execution_order: order,
                    file_path: create_file,
                })
                .await?;
            let feature = match claim_later {
                Some(path) => {
                    ctx.files
                        .assign(shark_core::EntityKind::Feature, feature.id, &path, true)
                        .await?;
                    ctx.features
                        .get_by_id(feature.id)
                        .await?
                        .ok_or(SharkError::NotFound {
                            kind: "feature",
                            key: feature.key,
                        })?
                }
                None => feature,
            };

            Ok(CommandOutput::new(
                format!("created feature {}", feature.key),
                json!({ "feature": to_value(&feature) }),
            ))
        }

        FeatureCommand::List { epic } => {
            let epic_id = match epic {
                Some(epic) => Some(resolve_epic(ctx, &epic).await?.id),
                None => None,
            };
            let features = ctx.features.list(epic_id).await?;
            Ok(CommandOutput::new(
                format!("{} feature(s)", features.len()),
                json!({ "features": to_value(&features) }),
            ))
        }

        FeatureCommand::Get { key } => {
            let feature = resolve_feature(ctx, &key, None).await?;
            let breakdown = ctx.tasks.status_breakdown(feature.id).await?;
            Ok(CommandOutput::new(
                format!(
                    "feature {} ({}, {:.1}%)",
                    feature.key,
                    feature.status,
                    shark_core::status::rounded_progress(feature.progress_pct)
                ),
                json!({
                    "feature": to_value(&feature),
                    "status_breakdown": to_value(&breakdown),
                }),
            ))
        }

        FeatureCommand::Update {
            key,
            title,
            description,
            order,
            status,
            recalculate,
        } => {
            let feature = resolve_feature(ctx, &key, None).await?;
            let mut feature = ctx
                .features
                .update(
                    feature.id,
                    UpdateFeature {
                        title,
                        description,
                        execution_order: order.map(Some),
                    },
                )
                .await?;

            let mut cascade_results = Vec::new();
            let mut warnings = Vec::new();
            if let Some(status) = status {
                feature = ctx.features.set_status(feature.id, &status, true).await?;
            } else if recalculate {
                feature = ctx.features.set_status_override(feature.id, false).await?;
                let (cascade, cascade_warnings) = run_cascade(ctx, feature.id).await;
                cascade_results = cascade;
                warnings = cascade_warnings;
                feature = ctx
                    .features
                    .get_by_id(feature.id)
                    .await?
                    .ok_or(SharkError::NotFound {
                        kind: "feature",
                        key: feature.key,
                    })?;
            }

            Ok(CommandOutput::new(
                format!("updated feature {} ({})", feature.key, feature.status),
                json!({
                    "feature": to_value(&feature),
                    "cascade": to_value(&cascade_results),
                }),
            )
            .with_warnings(warnings))
        }

        FeatureCommand::Complete { key, agent, force } => {
            let feature = resolve_feature(ctx, &key, None).await?;
            let tasks = ctx.tasks.list_by_feature(feature.id).await?;

            if !force {
                let unfinished: Vec<&str> = tasks
                    .iter()
                    .filter(|t| {
                        !(t.status == well_known::COMPLETED
                            || t.status == well_known::READY_FOR_REVIEW)
                    })
                    .map(|t| t.key.as_str())
                    .collect();
                if !unfinished.is_empty() {
                    tracing::debug!(?unfinished, "feature completion refused");
                    return Err(SharkError::invalid_transition(
                        feature.status,
                        parent::COMPLETED,
                    ));
                }
            } else {
                // a failed backup aborts before anything mutates
                ctx.store.backup(FORCE_COMPLETE_OPERATION)?;
            }

            let touched = ctx
                .features
                .cascade_status_to_tasks(
                    feature.id,
                    well_known::COMPLETED,
                    agent_or_user(agent).as_deref(),
                )
                .await?;
            if feature.status_override {
                ctx.features
                    .set_status(feature.id, parent::COMPLETED, true)
                    .await?;
            }
            let (cascade, warnings) = run_cascade(ctx, feature.id).await;
            let feature = ctx
                .features
                .get_by_id(feature.id)
                .await?
                .ok_or(SharkError::NotFound {
                    kind: "feature",
                    key: feature.key,
                })?;

            Ok(CommandOutput::new(
                format!("completed feature {} ({touched} task(s) moved)", feature.key),
                json!({
                    "feature": to_value(&feature),
                    "tasks_moved": touched,
                    "cascade": to_value(&cascade),
                }),
            )
            .with_warnings(warnings))
        }

        FeatureCommand::Delete { key } => {
            let feature = resolve_feature(ctx, &key, None).await?;
            ctx.features.delete(feature.id).await?;
            Ok(CommandOutput::new(
                format!("deleted feature {}", feature.key),
                json!({ "deleted": feature.key }),
            ))
        }
    }
}
