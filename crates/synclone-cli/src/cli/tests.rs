use super::state_cmd::retention_policy;
use super::sync_cmd::{DiscoverySource, build_request, is_url, token_username};
use super::*;
use tempfile::TempDir;

fn parse_sync(extra: &[&str]) -> SyncArgs {
    let mut argv = vec![
        "synclone",
        "sync",
        "--provider",
        "github",
        "--org",
        "acme",
        "--target",
        "/srv/mirror",
        "--inventory",
        "repos.json",
    ];
    argv.extend_from_slice(extra);
    match Cli::try_parse_from(argv).unwrap().command {
        Commands::Sync(args) => args,
        _ => panic!("expected sync command"),
    }
}

#[test]
fn sync_parses_required_flags() {
    let args = parse_sync(&[]);
    assert_eq!(args.provider, ProviderKindValue::GitHub);
    assert_eq!(args.org, "acme");
    assert_eq!(args.target, PathBuf::from("/srv/mirror"));
    assert_eq!(args.token_env, "SYNCLONE_TOKEN");
    assert!(!args.resume);
}

#[test]
fn sync_requires_inventory() {
    let result = Cli::try_parse_from([
        "synclone", "sync", "--provider", "gitlab", "--org", "acme", "--target", "out",
    ]);
    assert!(result.is_err());
}

#[test]
fn flags_override_config() {
    let config = SyncConfig {
        parallel: 4,
        max_retries: 7,
        strategy: SyncStrategy::Fetch,
        ..SyncConfig::default()
    };
    let args = parse_sync(&[
        "--strategy",
        "pull",
        "--parallel",
        "12",
        "--resume",
        "--no-retry-failed",
        "--progress",
        "quiet",
        "--include",
        "^svc-",
        "--include-topic",
        "rust,cli",
        "--min-stars",
        "5",
        "--include-forks",
    ]);
    let request = build_request(&args, &config);
    assert_eq!(request.provider, ProviderKind::GitHub);
    assert_eq!(request.strategy, SyncStrategy::Pull);
    assert_eq!(request.parallel, 12);
    assert_eq!(request.max_retries, 7);
    assert!(request.resume);
    assert!(!request.retry_failed);
    assert_eq!(request.progress_mode, DisplayMode::Quiet);
    assert_eq!(request.filters.include_pattern.as_deref(), Some("^svc-"));
    assert_eq!(request.filters.include_topics, vec!["rust", "cli"]);
    assert_eq!(request.filters.min_stars, Some(5));
    assert!(request.filters.include_forks);
    assert!(!request.filters.include_archived);
}

#[test]
fn config_values_apply_without_flags() {
    let config = SyncConfig {
        parallel: 3,
        strategy: SyncStrategy::Fetch,
        ..SyncConfig::default()
    };
    let request = build_request(&parse_sync(&[]), &config);
    assert_eq!(request.parallel, 3);
    assert_eq!(request.strategy, SyncStrategy::Fetch);
    assert!(request.retry_failed);
}

#[test]
fn state_commands_parse() {
    let cli = Cli::try_parse_from([
        "synclone", "state", "show", "--provider", "gitea", "--org", "team", "--json",
    ])
    .unwrap();
    match cli.command {
        Commands::State(StateArgs {
            command: StateCommands::Show(key),
        }) => {
            assert_eq!(key.provider, ProviderKindValue::Gitea);
            assert!(key.json);
        }
        _ => panic!("expected state show command"),
    }

    let cli = Cli::try_parse_from(["synclone", "--state-dir", "/tmp/s", "state", "list"]).unwrap();
    assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/s")));
    assert!(matches!(
        cli.command,
        Commands::State(StateArgs {
            command: StateCommands::List
        })
    ));
}

#[test]
fn clean_flags_override_retention() {
    let base = RetentionPolicy::default();
    let args = CleanArgs {
        max_age_days: Some(7),
        max_completed: None,
        max_failed: Some(1),
    };
    let policy = retention_policy(&base, &args);
    assert_eq!(policy.max_age_days, 7);
    assert_eq!(policy.max_completed, base.max_completed);
    assert_eq!(policy.max_failed, 1);
}

#[test]
fn inventory_source_kinds() {
    assert!(is_url("https://inventory.local/{org}.json"));
    assert!(is_url("HTTP://host/x"));
    assert!(!is_url("./repos.json"));

    let source =
        DiscoverySource::open("repos.json", &SyncConfig::default(), &CancelToken::new()).unwrap();
    assert!(matches!(source, DiscoverySource::File(_)));
    source.close();
}

#[test]
fn token_usernames_per_provider() {
    assert_eq!(token_username(ProviderKind::GitLab), "oauth2");
    assert_eq!(token_username(ProviderKind::GitHub), "x-access-token");
    assert_eq!(token_username(ProviderKind::Gogs), "git");
}

#[test]
fn checkpoint_line_summarizes_state() {
    let mut checkpoint = Checkpoint::new(
        ProviderKind::GitHub,
        "acme",
        "/srv/mirror",
        SyncStrategy::Reset,
        4,
        3,
    );
    checkpoint.set_pending(["a", "b", "c", "d"]);
    checkpoint.add_completed_repository(
        "a",
        "/srv/mirror/a",
        synclone_core::model::RepoOperation::Clone,
        "cloned",
    );
    checkpoint.mark_cancelled();
    let line = checkpoint_line(&checkpoint);
    assert!(line.starts_with("github/acme"), "{line}");
    assert!(line.contains("cancelled"));
    assert!(line.contains("1/4 done (25.0%)"));
    assert!(line.contains("pending=3"));
}

#[test]
fn state_delete_and_show_on_store() {
    let tmp = TempDir::new().unwrap();
    let store = CheckpointStore::new(tmp.path());
    let mut checkpoint = Checkpoint::new(
        ProviderKind::GitLab,
        "platform",
        tmp.path().join("out"),
        SyncStrategy::Pull,
        2,
        3,
    );
    store.save(&mut checkpoint).unwrap();

    let config = SyncConfig::default();
    let show = StateArgs {
        command: StateCommands::Show(StateKeyArgs {
            provider: ProviderKindValue::GitLab,
            org: "platform".into(),
            json: true,
        }),
    };
    handle_state(show, &config, tmp.path()).unwrap();

    let delete = StateArgs {
        command: StateCommands::Delete(StateKeyArgs {
            provider: ProviderKindValue::GitLab,
            org: "platform".into(),
            json: false,
        }),
    };
    handle_state(delete, &config, tmp.path()).unwrap();
    assert!(!store.has(ProviderKind::GitLab, "platform"));

    let list = StateArgs {
        command: StateCommands::List,
    };
    handle_state(list, &config, tmp.path()).unwrap();
}
