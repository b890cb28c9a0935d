use super::*;

pub(super) fn run() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = SyncConfig::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let state_dir = match cli.state_dir.clone() {
        Some(dir) => dir,
        None => config.state_dir()?,
    };
    info!(
        command = command_label(&cli.command),
        state_dir = %state_dir.display(),
        "running command"
    );

    match cli.command {
        Commands::Sync(args) => handle_sync(args, &config, &state_dir),
        Commands::State(args) => handle_state(args, &config, &state_dir),
    }
}

fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Sync(_) => "sync",
        Commands::State(_) => "state",
    }
}
