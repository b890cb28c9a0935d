use super::*;
#[derive(Parser)]
#[command(name = "synclone", author, version, about)]
pub(super) struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to the platform config dir)")]
    pub(super) config: Option<PathBuf>,
    #[arg(long, global = true, help = "Directory holding checkpoint files")]
    pub(super) state_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(clap::Subcommand)]
pub(super) enum Commands {
    #[command(about = "Clone or update every repository of an organization")]
    Sync(SyncArgs),
    #[command(about = "Inspect and maintain checkpoint files")]
    State(StateArgs),
}

#[derive(Parser)]
pub(super) struct SyncArgs {
    #[arg(long, value_enum)]
    pub(super) provider: ProviderKindValue,
    #[arg(long)]
    pub(super) org: String,
    #[arg(long, help = "Directory the repositories are placed under")]
    pub(super) target: PathBuf,
    #[arg(
        long,
        help = "Repository inventory: a JSON file, or an http(s) url where {provider} and {org} are substituted"
    )]
    pub(super) inventory: String,
    #[arg(long, help = "Git host used for clone urls the inventory does not carry")]
    pub(super) host: Option<String>,
    #[arg(long, value_enum)]
    pub(super) strategy: Option<StrategyValue>,
    #[arg(long)]
    pub(super) parallel: Option<usize>,
    #[arg(long)]
    pub(super) max_retries: Option<u32>,
    #[arg(long, help = "Continue from the saved checkpoint")]
    pub(super) resume: bool,
    #[arg(long, help = "On resume, leave previously failed repositories alone")]
    pub(super) no_retry_failed: bool,
    #[arg(long, value_enum)]
    pub(super) progress: Option<DisplayModeValue>,
    #[arg(
        long,
        default_value = "SYNCLONE_TOKEN",
        help = "Environment variable holding the git access token"
    )]
    pub(super) token_env: String,
    #[command(flatten)]
    pub(super) filters: FilterArgs,
}

#[derive(clap::Args, Clone, Default)]
pub(super) struct FilterArgs {
    #[arg(long = "include", help = "Regex repository names must match")]
    pub(super) include_pattern: Option<String>,
    #[arg(long = "exclude", help = "Regex repository names must not match")]
    pub(super) exclude_pattern: Option<String>,
    #[arg(long = "include-topic", value_delimiter = ',')]
    pub(super) include_topics: Vec<String>,
    #[arg(long = "exclude-topic", value_delimiter = ',')]
    pub(super) exclude_topics: Vec<String>,
    #[arg(long)]
    pub(super) language: Option<String>,
    #[arg(long)]
    pub(super) min_stars: Option<u32>,
    #[arg(long)]
    pub(super) max_stars: Option<u32>,
    #[arg(long, help = "Maximum repository size in KB")]
    pub(super) size_limit: Option<u64>,
    #[arg(long, help = "YYYY-MM-DD, inclusive")]
    pub(super) updated_after: Option<String>,
    #[arg(long, help = "YYYY-MM-DD, exclusive")]
    pub(super) updated_before: Option<String>,
    #[arg(long)]
    pub(super) include_archived: bool,
    #[arg(long)]
    pub(super) include_forks: bool,
    #[arg(long)]
    pub(super) include_private: bool,
}

impl From<FilterArgs> for FilterCriteria {
    fn from(args: FilterArgs) -> Self {
        FilterCriteria {
            include_pattern: args.include_pattern,
            exclude_pattern: args.exclude_pattern,
            include_topics: args.include_topics,
            exclude_topics: args.exclude_topics,
            language: args.language,
            min_stars: args.min_stars,
            max_stars: args.max_stars,
            size_limit: args.size_limit,
            updated_after: args.updated_after,
            updated_before: args.updated_before,
            include_archived: args.include_archived,
            include_forks: args.include_forks,
            include_private: args.include_private,
        }
    }
}

#[derive(Parser)]
pub(super) struct StateArgs {
    #[command(subcommand)]
    pub(super) command: StateCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum StateCommands {
    #[command(about = "List saved checkpoints")]
    List,
    #[command(about = "Show one checkpoint")]
    Show(StateKeyArgs),
    #[command(about = "Delete one checkpoint")]
    Delete(StateKeyArgs),
    #[command(about = "Remove old checkpoints per the retention policy")]
    Clean(CleanArgs),
}

#[derive(Parser)]
pub(super) struct StateKeyArgs {
    #[arg(long, value_enum)]
    pub(super) provider: ProviderKindValue,
    #[arg(long)]
    pub(super) org: String,
    #[arg(long, help = "Print the raw JSON document")]
    pub(super) json: bool,
}

#[derive(Parser)]
pub(super) struct CleanArgs {
    #[arg(long)]
    pub(super) max_age_days: Option<u32>,
    #[arg(long)]
    pub(super) max_completed: Option<usize>,
    #[arg(long)]
    pub(super) max_failed: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub(super) enum ProviderKindValue {
    #[value(name = "github")]
    GitHub,
    #[value(name = "gitlab")]
    GitLab,
    Gitea,
    Gogs,
}

impl From<ProviderKindValue> for ProviderKind {
    fn from(value: ProviderKindValue) -> Self {
        match value {
            ProviderKindValue::GitHub => ProviderKind::GitHub,
            ProviderKindValue::GitLab => ProviderKind::GitLab,
            ProviderKindValue::Gitea => ProviderKind::Gitea,
            ProviderKindValue::Gogs => ProviderKind::Gogs,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub(super) enum StrategyValue {
    Reset,
    Pull,
    Fetch,
}

impl From<StrategyValue> for SyncStrategy {
    fn from(value: StrategyValue) -> Self {
        match value {
            StrategyValue::Reset => SyncStrategy::Reset,
            StrategyValue::Pull => SyncStrategy::Pull,
            StrategyValue::Fetch => SyncStrategy::Fetch,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub(super) enum DisplayModeValue {
    Compact,
    Detailed,
    Quiet,
}

impl From<DisplayModeValue> for DisplayMode {
    fn from(value: DisplayModeValue) -> Self {
        match value {
            DisplayModeValue::Compact => DisplayMode::Compact,
            DisplayModeValue::Detailed => DisplayMode::Detailed,
            DisplayModeValue::Quiet => DisplayMode::Quiet,
        }
    }
}
