use clap::Subcommand;
use serde_json::json;
use shark_core::{
    error::{Result, SharkError},
    models::EntityKind,
    repository::DocumentRepository,
};

use crate::{context::AppContext, output::CommandOutput};

use super::{resolve_epic, resolve_feature, resolve_task, to_value};

#[derive(Debug, Subcommand)]
pub enum DocsCommand {
    /// Link a document to exactly one of --epic / --feature / --task
    Add {
        /// Document file path
        file: String,
        /// Document title; defaults to the file name
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
    /// Remove a document link from exactly one of --epic / --feature / --task
    Delete {
        file: String,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
    /// List documents linked to exactly one of --epic / --feature / --task
    List {
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
}

/// Resolve the `--epic/--feature/--task` trio to one target entity
async fn resolve_target(
    ctx: &AppContext,
    epic: Option<String>,
    feature: Option<String>,
    task: Option<String>,
) -> Result<(EntityKind, i64, String)> {
    let given = [epic.is_some(), feature.is_some(), task.is_some()]
        .iter()
        .filter(|g| **g)
        .count();
    if given != 1 {
        return Err(SharkError::validation(
            "target",
            "exactly one of --epic, --feature, --task is required",
        ));
    }
    if let Some(key) = epic {
        let epic = resolve_epic(ctx, &key).await?;
        return Ok((EntityKind::Epic, epic.id, epic.key));
    }
    if let Some(key) = feature {
        let feature = resolve_feature(ctx, &key, None).await?;
        return Ok((EntityKind::Feature, feature.id, feature.key));
    }
    let task = resolve_task(ctx, &task.expect("one target given")).await?;
    Ok((EntityKind::Task, task.id, task.key))
}

pub async fn run(ctx: &AppContext, command: DocsCommand) -> Result<CommandOutput> {
    match command {
        DocsCommand::Add {
            file,
            title,
            epic,
            feature,
            task,
        } => {
            let (kind, entity_id, entity_key) = resolve_target(ctx, epic, feature, task).await?;
            let title = title.unwrap_or_else(|| {
                file.rsplit('/').next().unwrap_or(file.as_str()).to_string()
            });
            let document = ctx.documents.create_or_get(&title, &file).await?;
            ctx.documents.link(kind, entity_id, document.id).await?;
            Ok(CommandOutput::new(
                format!("linked {} to {kind} {entity_key}", document.file_path),
                json!({
                    "document": to_value(&document),
                    "linked_to": { "kind": kind.as_str(), "key": entity_key },
                }),
            ))
        }

        DocsCommand::Delete {
            file,
            epic,
            feature,
            task,
        } => {
            let (kind, entity_id, entity_key) = resolve_target(ctx, epic, feature, task).await?;
            let documents = ctx.documents.list_for(kind, entity_id).await?;
            let document = documents
                .into_iter()
                .find(|d| d.file_path == file)
                .ok_or(SharkError::NotFound {
                    kind: "document",
                    key: file,
                })?;
            ctx.documents.unlink(kind, entity_id, document.id).await?;
            Ok(CommandOutput::new(
                format!("unlinked {} from {kind} {entity_key}", document.file_path),
                json!({
                    "document": to_value(&document),
                    "unlinked_from": { "kind": kind.as_str(), "key": entity_key },
                }),
            ))
        }

        DocsCommand::List {
            epic,
            feature,
            task,
        } => {
            let (kind, entity_id, entity_key) = resolve_target(ctx, epic, feature, task).await?;
            let documents = ctx.documents.list_for(kind, entity_id).await?;
            Ok(CommandOutput::new(
                format!("{} document(s) for {kind} {entity_key}", documents.len()),
                json!({
                    "target": { "kind": kind.as_str(), "key": entity_key },
                    "documents": to_value(&documents),
                }),
            ))
        }
    }
}
