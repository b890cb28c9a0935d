use super::*;

pub(super) fn handle_sync(
    args: SyncArgs,
    config: &SyncConfig,
    state_dir: &Path,
) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            eprintln!("\nSecond interrupt; exiting now.");
            std::process::exit(130);
        }
        eprintln!("\nInterrupt received; finishing in-flight repositories.");
        handler_token.cancel();
    })
    .context("install interrupt handler")?;

    let request = build_request(&args, config);
    let source = DiscoverySource::open(&args.inventory, config, &cancel)?;
    let auth = auth_from_env(request.provider, &args.token_env);
    if auth.is_none() {
        info!(var = %args.token_env, "no git token set; using anonymous access");
    }
    let git = Git2Executor::new().with_auth(auth);
    let orchestrator = Orchestrator::new(
        CheckpointStore::new(state_dir),
        source.discovery(),
        Arc::new(git),
    )
    .with_options(OrchestratorOptions::from_config(config));

    let printer = ProgressPrinter::new(request.progress_mode, io::stdout().is_terminal());
    let reporter = |tracker: &ProgressTracker| printer.render(tracker);
    let result = orchestrator.run_with_progress(&cancel, &request, Some(&reporter));
    printer.finish();
    drop(orchestrator);
    source.close();

    let report = result?;
    print_report(&report);
    match report.status {
        CheckpointStatus::Cancelled => {
            println!("Run cancelled; rerun with --resume to continue.");
            Ok(())
        }
        CheckpointStatus::Failed => anyhow::bail!(
            "sync finished with failures; details in {}",
            report.state_file.display()
        ),
        _ => Ok(()),
    }
}

/// Config values first, then whatever the flags override.
pub(super) fn build_request(args: &SyncArgs, config: &SyncConfig) -> SyncRequest {
    let mut request = SyncRequest::new(args.provider.into(), args.org.clone(), args.target.clone())
        .with_config(config);
    request.host = args.host.clone();
    if let Some(strategy) = args.strategy {
        request.strategy = strategy.into();
    }
    if let Some(parallel) = args.parallel {
        request.parallel = parallel;
    }
    if let Some(max_retries) = args.max_retries {
        request.max_retries = max_retries;
    }
    if let Some(progress) = args.progress {
        request.progress_mode = progress.into();
    }
    request.resume = args.resume;
    request.retry_failed = !args.no_retry_failed;
    request.filters = args.filters.clone().into();
    request
}

pub(super) fn auth_from_env(provider: ProviderKind, var: &str) -> Option<GitAuth> {
    let token = std::env::var(var).ok().filter(|token| !token.trim().is_empty())?;
    Some(GitAuth {
        username: token_username(provider).to_string(),
        token,
    })
}

/// HTTPS user name that hosts expect alongside a personal access token.
pub(super) fn token_username(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::GitLab => "oauth2",
        ProviderKind::GitHub => "x-access-token",
        ProviderKind::Gitea | ProviderKind::Gogs => "git",
    }
}

pub(super) fn is_url(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub(super) enum DiscoverySource {
    File(Arc<InventoryFileDiscovery>),
    Url(Arc<UrlInventoryDiscovery>),
}

impl DiscoverySource {
    pub(super) fn open(
        inventory: &str,
        config: &SyncConfig,
        cancel: &CancelToken,
    ) -> anyhow::Result<Self> {
        if !is_url(inventory) {
            return Ok(DiscoverySource::File(Arc::new(InventoryFileDiscovery::new(
                inventory,
            ))));
        }
        let manager = ConnectionManager::new(&config.connection, config.retry.clone())
            .context("build http client")?;
        let discovery = UrlInventoryDiscovery::new(inventory, manager, cancel.clone())?;
        Ok(DiscoverySource::Url(Arc::new(discovery)))
    }

    pub(super) fn discovery(&self) -> Arc<dyn RepoDiscovery> {
        match self {
            DiscoverySource::File(discovery) => Arc::clone(discovery) as Arc<dyn RepoDiscovery>,
            DiscoverySource::Url(discovery) => Arc::clone(discovery) as Arc<dyn RepoDiscovery>,
        }
    }

    pub(super) fn close(self) {
        if let DiscoverySource::Url(discovery) = self {
            match Arc::try_unwrap(discovery) {
                Ok(discovery) => discovery.close(),
                Err(_) => warn!("inventory client still in use; not closed"),
            }
        }
    }
}
