use super::*;
use time::OffsetDateTime;

pub(super) fn handle_state(
    args: StateArgs,
    config: &SyncConfig,
    state_dir: &Path,
) -> anyhow::Result<()> {
    let store = CheckpointStore::new(state_dir);
    match args.command {
        StateCommands::List => list_checkpoints(&store),
        StateCommands::Show(key) => show_checkpoint(&store, &key),
        StateCommands::Delete(key) => delete_checkpoint(&store, &key),
        StateCommands::Clean(clean) => {
            clean_checkpoints(&store, &retention_policy(&config.retention, &clean))
        }
    }
}

fn list_checkpoints(store: &CheckpointStore) -> anyhow::Result<()> {
    let stored = store.list()?;
    if stored.is_empty() {
        println!("No checkpoints in {}.", store.state_dir().display());
        return Ok(());
    }
    for entry in stored {
        println!("{}", checkpoint_line(&entry.checkpoint));
    }
    Ok(())
}

fn show_checkpoint(store: &CheckpointStore, key: &StateKeyArgs) -> anyhow::Result<()> {
    let provider = ProviderKind::from(key.provider);
    let checkpoint = match store.load(provider, &key.org) {
        Ok(checkpoint) => checkpoint,
        Err(err) if err.is_not_found() => {
            println!("No checkpoint for {provider}/{}.", key.org);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    if key.json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    } else {
        print_checkpoint(&checkpoint, &store.path_for(provider, &key.org));
    }
    Ok(())
}

fn delete_checkpoint(store: &CheckpointStore, key: &StateKeyArgs) -> anyhow::Result<()> {
    let provider = ProviderKind::from(key.provider);
    if store.delete(provider, &key.org)? {
        info!(provider = %provider, org = %key.org, "checkpoint deleted");
        println!("Deleted checkpoint for {provider}/{}.", key.org);
    } else {
        println!("No checkpoint for {provider}/{}.", key.org);
    }
    Ok(())
}

fn clean_checkpoints(store: &CheckpointStore, policy: &RetentionPolicy) -> anyhow::Result<()> {
    let removed = store.cleanup(policy, OffsetDateTime::now_utc())?;
    if removed.is_empty() {
        println!("Nothing to clean.");
    }
    for path in &removed {
        println!("Removed {}", path.display());
    }
    Ok(())
}

pub(super) fn retention_policy(base: &RetentionPolicy, args: &CleanArgs) -> RetentionPolicy {
    RetentionPolicy {
        max_age_days: args.max_age_days.unwrap_or(base.max_age_days),
        max_completed: args.max_completed.unwrap_or(base.max_completed),
        max_failed: args.max_failed.unwrap_or(base.max_failed),
    }
}
