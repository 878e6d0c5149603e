use clap::Subcommand;
use serde_json::json;
use shark_core::{
    error::{Result, SharkError},
    models::{NewEpic, Priority, UpdateEpic},
    repository::{EpicRepository, FeatureRepository},
    status::parent,
    workflow::well_known,
};

use crate::{context::AppContext, output::CommandOutput};

use super::{agent_or_user, resolve_epic, to_value};

/// Backup tag written before a forced epic completion
const FORCE_COMPLETE_OPERATION: &str = "force complete epic";

#[derive(Debug, Subcommand)]
pub enum EpicCommand {
    /// Create an epic
    Create {
        title: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// low, medium, or high
        #[arg(long)]
        priority: Option<String>,
        #[arg(long = "business-value")]
        business_value: Option<String>,
        #[arg(long)]
        slug: Option<String>,
        /// Description file path (relative, .md)
        #[arg(long)]
        file: Option<String>,
    },
    /// List epics
    List,
    /// Show one epic with its features
    Get { key: String },
    /// Update epic fields, pin a status, or force-complete the hierarchy
    Update {
        key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long = "business-value")]
        business_value: Option<String>,
        #[arg(long)]
        slug: Option<String>,
        /// Pin this status; with --force and status "completed" the whole
        /// hierarchy is completed (backs up the store first)
        #[arg(long)]
        status: Option<String>,
        /// Clear a pinned status and recompute from the features
        #[arg(long)]
        recalculate: bool,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Delete an epic and everything under it
    Delete { key: String },
}

pub async fn run(ctx: &AppContext, command: EpicCommand) -> Result<CommandOutput> {
    match command {
        EpicCommand::Create {
            title,
            key,
            description,
            priority,
            business_value,
            slug,
            file,
        } => {
            let priority = match priority {
                Some(raw) => Priority::parse(&raw)?,
                None => Priority::default(),
            };
            let epic = ctx
                .epics
                .create(NewEpic {
                    key,
                    title,
                    description,
                    priority,
                    business_value,
                    file_path: file,
                    slug,
                })
                .await?;
            Ok(CommandOutput::new(
                format!("created epic {}", epic.key),
                json!({ "epic": to_value(&epic) }),
            ))
        }

        EpicCommand::List => {
            let epics = ctx.epics.list().await?;
            Ok(CommandOutput::new(
                format!("{} epic(s)", epics.len()),
                json!({ "epics": to_value(&epics) }),
            ))
        }

        EpicCommand::Get { key } => {
            let epic = resolve_epic(ctx, &key).await?;
            let features = ctx.features.list(Some(epic.id)).await?;
            Ok(CommandOutput::new(
                format!("epic {} ({})", epic.key, epic.status),
                json!({ "epic": to_value(&epic), "features": to_value(&features) }),
            ))
        }

        EpicCommand::Update {
            key,
            title,
            description,
            priority,
            business_value,
            slug,
            status,
            recalculate,
            agent,
            force,
        } => {
            let epic = resolve_epic(ctx, &key).await?;
            let priority = priority.map(|raw| Priority::parse(&raw)).transpose()?;
            let mut epic = ctx
                .epics
                .update(
                    epic.id,
                    UpdateEpic {
                        title,
                        description,
                        priority,
                        business_value,
                        slug,
                    },
                )
                .await?;

            let mut tasks_moved = 0;
            if let Some(status) = status {
                if force && status == parent::COMPLETED {
                    // a failed backup aborts before anything mutates
                    ctx.store.backup(FORCE_COMPLETE_OPERATION)?;
                    tasks_moved = ctx
                        .epics
                        .cascade_status_to_features_and_tasks(
                            epic.id,
                            parent::COMPLETED,
                            well_known::COMPLETED,
                            agent_or_user(agent).as_deref(),
                        )
                        .await?;
                }
                epic = ctx.epics.set_status(epic.id, &status, true).await?;
            } else if recalculate {
                ctx.epics.set_status_override(epic.id, false).await?;
                let change = ctx.cascade.recalculate_epic(epic.id).await?;
                epic = ctx
                    .epics
                    .get_by_id(epic.id)
                    .await?
                    .ok_or(SharkError::NotFound {
                        kind: "epic",
                        key: change.entity_key,
                    })?;
            }

            Ok(CommandOutput::new(
                format!("updated epic {} ({})", epic.key, epic.status),
                json!({ "epic": to_value(&epic), "tasks_moved": tasks_moved }),
            ))
        }

        EpicCommand::Delete { key } => {
            let epic = resolve_epic(ctx, &key).await?;
            ctx.epics.delete(epic.id).await?;
            Ok(CommandOutput::new(
                format!("deleted epic {}", epic.key),
                json!({ "deleted": epic.key }),
            ))
        }
    }
}
