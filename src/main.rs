use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use trees::config::{
    ConfigError, ConfigSources, DATA_DIR_ENV, EffectiveConfig, default_config_yaml,
    load_effective_config,
};
use trees::graph::{ClaimNode, EvidenceNode, GraphError, ValidationError};
use trees::query::{claim_detail, evidence_detail};
use trees::{Store, StoreError};

const LOG_ENV: &str = "TREES_LOG";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::new("store_error", value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::new("config_error", value.to_string())
    }
}

impl From<ValidationError> for CliError {
    fn from(value: ValidationError) -> Self {
        Self::new("invalid_evidence", value.to_string())
    }
}

impl From<GraphError> for CliError {
    fn from(value: GraphError) -> Self {
        let code = match &value {
            GraphError::ClaimNotFound(_) => "claim_not_found",
            GraphError::EvidenceNotFound(_) => "evidence_not_found",
            GraphError::Git(_) => "git_error",
        };
        Self::new(code, value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "trees")]
#[command(about = "Claims about code, backed by evidence that knows when it goes stale")]
struct Cli {
    /// Directory holding data.json (overrides config and TREES_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    #[command(subcommand)]
    Claim(ClaimCommand),
    #[command(subcommand)]
    Evidence(EvidenceCommand),
    Link(LinkArgs),
}

#[derive(Subcommand, Debug)]
enum ClaimCommand {
    Add {
        #[arg(required = true, trailing_var_arg = true)]
        content: Vec<String>,
    },
    List {
        /// Case-insensitive substring filter.
        #[arg(long, short)]
        query: Option<String>,
    },
    Show {
        id: String,
    },
    Update {
        id: String,
        #[arg(required = true, trailing_var_arg = true)]
        content: Vec<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum EvidenceCommand {
    Add(EvidenceAddArgs),
    List,
    Show { id: String },
    Delete { id: String },
}

#[derive(Args, Debug)]
struct EvidenceAddArgs {
    /// Relative paths resolve against the working directory.
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    lines: String,
    #[arg(long)]
    commit: String,
    /// Link the new evidence to this claim in the same update.
    #[arg(long)]
    claim: Option<String>,
}

#[derive(Args, Debug)]
struct LinkArgs {
    #[arg(long)]
    claim: String,
    #[arg(long)]
    evidence: String,
}

struct Context {
    config: EffectiveConfig,
    user_config: PathBuf,
    store: Store,
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let ctx = open_context(&cwd, cli.data_dir.as_deref())?;
    match cli.command {
        Command::Init => cmd_init(&ctx),
        Command::Claim(command) => cmd_claim(&ctx, command),
        Command::Evidence(command) => cmd_evidence(&ctx, command),
        Command::Link(args) => cmd_link(&ctx, args),
    }
}

fn open_context(cwd: &Path, flag_data_dir: Option<&Path>) -> Result<Context, CliError> {
    let home = home_dir()?;
    let user_config = home.join(".trees").join("config.yml");
    let env_data_dir = std::env::var(DATA_DIR_ENV).ok();
    let config = load_effective_config(
        cwd,
        &home,
        &ConfigSources {
            user_config: Some(&user_config),
            env_data_dir: env_data_dir.as_deref(),
            flag_data_dir,
        },
    )?;
    debug!(data_dir = %config.data_dir.display(), "resolved configuration");
    let store = Store::open(config.store_path())?;
    Ok(Context {
        config,
        user_config,
        store,
    })
}

fn cmd_init(ctx: &Context) -> Result<(), CliError> {
    fs::create_dir_all(&ctx.config.data_dir).map_err(|err| CliError::io("mkdir_error", err))?;
    let wrote_config = write_default_config(&ctx.user_config)?;
    let store_path = ctx.store.path();
    if !store_path.exists() {
        ctx.store.save()?;
    }

    print_json(&json!({
        "status": "ok",
        "data_dir": ctx.config.data_dir,
        "store": store_path,
        "config": ctx.user_config,
        "wrote_config": wrote_config,
        "claims": ctx.store.read(|graph| graph.claim_count()),
        "evidence": ctx.store.read(|graph| graph.evidence_count()),
    }))
}

fn write_default_config(path: &Path) -> Result<bool, CliError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    fs::write(path, default_config_yaml()).map_err(|err| CliError::io("write_error", err))?;
    Ok(true)
}

fn cmd_claim(ctx: &Context, command: ClaimCommand) -> Result<(), CliError> {
    match command {
        ClaimCommand::Add { content } => {
            let content = require_content(&content)?;
            let claim = ctx.store.with_graph(|graph| graph.add_claim(&content));
            ctx.store.save()?;
            print_json(&serde_json::to_value(claim)?)
        }
        ClaimCommand::List { query } => {
            let mut claims = ctx.store.read(|graph| match query.as_deref() {
                Some(query) => graph.search_claims(query).into_iter().cloned().collect(),
                None => graph.claims().cloned().collect::<Vec<_>>(),
            });
            sort_claims(&mut claims);
            print_json(&json!({
                "query": query,
                "count": claims.len(),
                "claims": claims,
            }))
        }
        ClaimCommand::Show { id } => {
            let graph = ctx.store.graph();
            let checker = ctx.config.git_checker();
            let detail = claim_detail(&graph, &id, &checker)
                .ok_or_else(|| GraphError::ClaimNotFound(id.clone()))?;
            print_json(&serde_json::to_value(detail)?)
        }
        ClaimCommand::Update { id, content } => {
            let content = require_content(&content)?;
            let claim = ctx
                .store
                .with_graph(|graph| graph.update_claim(&id, &content))
                .ok_or_else(|| GraphError::ClaimNotFound(id.clone()))?;
            ctx.store.save()?;
            print_json(&serde_json::to_value(claim)?)
        }
        ClaimCommand::Delete { id } => {
            if !ctx.store.with_graph(|graph| graph.delete_claim(&id)) {
                return Err(GraphError::ClaimNotFound(id).into());
            }
            ctx.store.save()?;
            print_json(&json!({ "status": "deleted", "id": id }))
        }
    }
}

fn cmd_evidence(ctx: &Context, command: EvidenceCommand) -> Result<(), CliError> {
    match command {
        EvidenceCommand::Add(args) => cmd_evidence_add(ctx, args),
        EvidenceCommand::List => {
            let mut evidence = ctx
                .store
                .read(|graph| graph.evidence().cloned().collect::<Vec<_>>());
            sort_evidence(&mut evidence);
            print_json(&json!({
                "count": evidence.len(),
                "evidence": evidence,
            }))
        }
        EvidenceCommand::Show { id } => {
            let graph = ctx.store.graph();
            let checker = ctx.config.git_checker();
            let detail = evidence_detail(&graph, &id, &checker)
                .ok_or_else(|| GraphError::EvidenceNotFound(id.clone()))?;
            print_json(&serde_json::to_value(detail)?)
        }
        EvidenceCommand::Delete { id } => {
            if !ctx.store.with_graph(|graph| graph.delete_evidence(&id)) {
                return Err(GraphError::EvidenceNotFound(id).into());
            }
            ctx.store.save()?;
            print_json(&json!({ "status": "deleted", "id": id }))
        }
    }
}

fn cmd_evidence_add(ctx: &Context, args: EvidenceAddArgs) -> Result<(), CliError> {
    let file_path = absolute_path_string(&args.file)?;
    let evidence = ctx.store.with_graph(|graph| -> Result<EvidenceNode, CliError> {
        if let Some(claim_id) = args.claim.as_deref() {
            if graph.get_claim(claim_id).is_none() {
                return Err(GraphError::ClaimNotFound(claim_id.to_string()).into());
            }
        }
        let evidence = graph.add_evidence(&file_path, &args.lines, &args.commit)?;
        if let Some(claim_id) = args.claim.as_deref() {
            graph.link_evidence(claim_id, &evidence.id)?;
        }
        Ok(evidence)
    })?;
    ctx.store.save()?;

    let mut payload = serde_json::to_value(&evidence)?;
    if let (Value::Object(map), Some(claim_id)) = (&mut payload, args.claim) {
        map.insert("linked_claim".to_string(), json!(claim_id));
    }
    print_json(&payload)
}

fn cmd_link(ctx: &Context, args: LinkArgs) -> Result<(), CliError> {
    ctx.store
        .with_graph(|graph| graph.link_evidence(&args.claim, &args.evidence))?;
    ctx.store.save()?;
    print_json(&json!({
        "status": "linked",
        "claim_id": args.claim,
        "evidence_id": args.evidence,
    }))
}

fn require_content(words: &[String]) -> Result<String, CliError> {
    let content = words.join(" ");
    if content.trim().is_empty() {
        return Err(CliError::new("invalid_content", "content is required"));
    }
    Ok(content)
}

fn absolute_path_string(path: &Path) -> Result<String, CliError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).map_err(|err| CliError::io("path_error", err))?
    };
    absolute.into_os_string().into_string().map_err(|raw| {
        CliError::new(
            "path_error",
            format!("path `{}` is not valid UTF-8", raw.to_string_lossy()),
        )
    })
}

fn sort_claims(claims: &mut [ClaimNode]) {
    claims.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn sort_evidence(evidence: &mut [EvidenceNode]) {
    evidence.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
