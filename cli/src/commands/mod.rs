pub mod docs;
pub mod epic;
pub mod feature;
pub mod task;

use clap::Subcommand;
use serde_json::Value;
use shark_core::{
    error::{Result, SharkError},
    keys::Keys,
    models::{Epic, Feature, StatusChange, Task},
    repository::{EpicRepository, FeatureRepository, TaskRepository},
};

use crate::{context::AppContext, output::CommandOutput};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Task operations: create, transition, schedule, link
    #[command(subcommand)]
    Task(task::TaskCommand),
    /// Feature operations
    #[command(subcommand)]
    Feature(feature::FeatureCommand),
    /// Epic operations
    #[command(subcommand)]
    Epic(epic::EpicCommand),
    /// Link reference documents to epics, features, and tasks
    #[command(subcommand, name = "related-docs")]
    RelatedDocs(docs::DocsCommand),
}

/// Translate one parsed command into repository/engine calls and assemble
/// the structured response.
pub async fn dispatch(ctx: &AppContext, command: Command) -> Result<CommandOutput> {
    match command {
        Command::Task(cmd) => task::run(ctx, cmd).await,
        Command::Feature(cmd) => feature::run(ctx, cmd).await,
        Command::Epic(cmd) => epic::run(ctx, cmd).await,
        Command::RelatedDocs(cmd) => docs::run(ctx, cmd).await,
    }
}

/// The acting agent: the flag if given, the `USER` environment otherwise
pub(crate) fn agent_or_user(agent: Option<String>) -> Option<String> {
    agent.or_else(|| std::env::var("USER").ok().filter(|user| !user.is_empty()))
}

pub(crate) async fn resolve_epic(ctx: &AppContext, key: &str) -> Result<Epic> {
    let key = Keys::epic(key)?;
    ctx.epics
        .get_by_key(&key)
        .await?
        .ok_or(SharkError::NotFound { kind: "epic", key })
}

/// Resolve a feature from its full key, or its short form plus an epic
pub(crate) async fn resolve_feature(
    ctx: &AppContext,
    key: &str,
    epic: Option<&str>,
) -> Result<Feature> {
    let key = Keys::feature(key, epic)?;
    ctx.features
        .get_by_key(&key)
        .await?
        .ok_or(SharkError::NotFound {
            kind: "feature",
            key,
        })
}

pub(crate) async fn resolve_task(ctx: &AppContext, key: &str) -> Result<Task> {
    let key = Keys::task(key)?;
    ctx.tasks
        .get_by_key(&key)
        .await?
        .ok_or(SharkError::NotFound { kind: "task", key })
}

/// Run the upward status cascade after a successful primary mutation.
/// Cascade failures never fail the command; they surface as warnings.
pub(crate) async fn run_cascade(
    ctx: &AppContext,
    feature_id: i64,
) -> (Vec<StatusChange>, Vec<String>) {
    match ctx.cascade.cascade_from_feature(feature_id).await {
        Ok(changes) => (changes, Vec::new()),
        Err(error) => {
            tracing::warn!(%error, feature_id, "status cascade failed after primary mutation");
            (Vec::new(), vec![format!("status cascade failed: {error}")])
        }
    }
}

pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
