use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::cell::Cell;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synclone_core::cancel::CancelToken;
use synclone_core::checkpoint::{Checkpoint, CheckpointStatus};
use synclone_core::checkpoint_store::{CheckpointStore, RetentionPolicy};
use synclone_core::config::{SyncConfig, default_config_path};
use synclone_core::discovery::{InventoryFileDiscovery, RepoDiscovery};
use synclone_core::filter::{FilterCriteria, FilterStage};
use synclone_core::git_sync::{Git2Executor, GitAuth};
use synclone_core::model::{ProviderKind, SyncStrategy};
use synclone_core::orchestrator::Orchestrator;
use synclone_core::orchestrator_types::{
    OrchestratorOptions, OutcomeKind, SyncReport, SyncRequest,
};
use synclone_core::progress::{DisplayMode, ProgressTracker};
use synclone_net::{ConnectionManager, UrlInventoryDiscovery};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod args;
mod render;
mod state_cmd;
mod sync_cmd;
#[cfg(test)]
mod tests;

use args::*;

use render::{ProgressPrinter, checkpoint_line, print_checkpoint, print_report};
use state_cmd::handle_state;
use sync_cmd::handle_sync;

pub fn run() -> anyhow::Result<()> {
    app::run()
}
