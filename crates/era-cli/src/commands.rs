use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use era_core::config::EraConfig;
use era_core::language::Language;
use era_core::record::{NetworkMode, SetupSpec, VmStatus};
use era_session::{CreateSessionSpec, RunRequest, SessionPatch};
use era_vm::{CreateOptions, RunOptions as VmRunOptions, VmPatch};

use crate::context::Context;
use crate::display::{SessionRow, VmRow};
use crate::output::{OutputFormat, render_list, render_one};
use crate::ui;

#[derive(Debug, Parser)]
#[command(name = "era", version, about = "Sandboxed code execution over microVMs")]
pub struct Cli {
    /// Path to a TOML config file; falls back to env vars and defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output rendering: table or json.
    #[arg(long, global = true, default_value = "table")]
    output: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage ephemeral and persistent microVMs directly.
    Vm {
        #[command(subcommand)]
        cmd: VmCmd,
    },
    /// Manage code-execution sessions.
    Session {
        #[command(subcommand)]
        cmd: SessionCmd,
    },
}

#[derive(Debug, Subcommand)]
enum VmCmd {
    Create(VmCreateArgs),
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Get {
        id: String,
    },
    Run(VmRunArgs),
    Stop {
        id: String,
    },
    Clean {
        id: String,
        #[arg(long)]
        keep_persist: bool,
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    Patch(VmPatchArgs),
}

#[derive(Debug, Args)]
struct VmCreateArgs {
    #[arg(long, default_value = "python")]
    language: String,
    #[arg(long, default_value_t = 1)]
    cpu_count: u32,
    #[arg(long, default_value_t = 256)]
    memory_mib: u32,
    #[arg(long, default_value = "none")]
    network: String,
    #[arg(long)]
    persist: bool,
    #[arg(long)]
    image: Option<String>,
}

#[derive(Debug, Args)]
struct VmRunArgs {
    id: String,
    #[arg(long)]
    command: String,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[derive(Debug, Args)]
struct VmPatchArgs {
    id: String,
    #[arg(long)]
    network: Option<String>,
    #[arg(long)]
    cpu_count: Option<u32>,
    #[arg(long)]
    memory_mib: Option<u32>,
    #[arg(long)]
    allow_internet: Option<bool>,
}

#[derive(Debug, Subcommand)]
enum SessionCmd {
    Create(SessionCreateArgs),
    List,
    Get {
        id: String,
    },
    Delete {
        id: String,
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    Duplicate {
        id: String,
        #[arg(long)]
        new_id: Option<String>,
    },
    Patch(SessionPatchArgs),
    Run(SessionRunArgs),
    StoreCode {
        id: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        description: Option<String>,
    },
    GetCode {
        id: String,
    },
    Files {
        #[command(subcommand)]
        cmd: FilesCmd,
    },
}

#[derive(Debug, Subcommand)]
enum FilesCmd {
    Upload {
        id: String,
        rel_path: String,
        #[arg(long)]
        file: PathBuf,
    },
    Download {
        id: String,
        rel_path: String,
        #[arg(long)]
        out: PathBuf,
    },
    List {
        id: String,
    },
}

#[derive(Debug, Args)]
struct SessionCreateArgs {
    #[arg(long)]
    id: Option<String>,
    #[arg(long, default_value = "python")]
    language: String,
    #[arg(long)]
    persistent: bool,
    #[arg(long)]
    allow_internet: bool,
    #[arg(long)]
    allow_public: bool,
    #[arg(long)]
    default_timeout: Option<u32>,
    #[arg(long)]
    pip: Vec<String>,
    #[arg(long)]
    npm: Vec<String>,
}

#[derive(Debug, Args)]
struct SessionPatchArgs {
    id: String,
    #[arg(long)]
    default_timeout: Option<u32>,
    #[arg(long)]
    allow_internet: Option<bool>,
    #[arg(long)]
    allow_public: Option<bool>,
}

#[derive(Debug, Args)]
struct SessionRunArgs {
    id: String,
    #[arg(long)]
    code: Option<PathBuf>,
    #[arg(long)]
    timeout_secs: Option<u32>,
}

/// Entry point called from `main`. Builds a single-shot Tokio runtime and
/// blocks on async dispatch, the way a one-off CLI invocation does when
/// there is no long-lived server process to talk to.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let fmt = OutputFormat::from_str_arg(&cli.output);
    let config = EraConfig::load(cli.config.as_deref())?;
    let ctx = Context::build(config)?;

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(dispatch(cli.command, ctx, fmt))
}

async fn dispatch(command: Command, ctx: Context, fmt: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Vm { cmd } => dispatch_vm(cmd, ctx, fmt).await,
        Command::Session { cmd } => dispatch_session(cmd, ctx, fmt).await,
    }
}

async fn dispatch_vm(cmd: VmCmd, ctx: Context, fmt: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        VmCmd::Create(args) => {
            let language = Language::parse(&args.language)
                .ok_or_else(|| anyhow::anyhow!("unknown language: {}", args.language))?;
            let network_mode = NetworkMode::parse(&args.network)
                .ok_or_else(|| anyhow::anyhow!("unknown network mode: {}", args.network))?;
            let vm = ctx
                .vm_service
                .create(CreateOptions {
                    language,
                    cpu_count: args.cpu_count,
                    memory_mib: args.memory_mib,
                    network_mode,
                    persist: args.persist,
                    image_ref: args.image,
                })
                .await?;
            ui::success(&format!("created vm {}", vm.id));
            render_one(&VmRow::from(&vm), fmt);
        }
        VmCmd::List { status } => {
            let status = status
                .as_deref()
                .map(parse_vm_status)
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let vms = ctx.vm_service.list(status).await?;
            let rows: Vec<VmRow> = vms.iter().map(VmRow::from).collect();
            render_list(&rows, fmt);
        }
        VmCmd::Get { id } => {
            let vm = ctx.vm_service.get(&id).await?;
            render_one(&VmRow::from(&vm), fmt);
        }
        VmCmd::Run(args) => {
            let result = ctx
                .vm_service
                .run(
                    &args.id,
                    VmRunOptions {
                        command: args.command,
                        timeout: std::time::Duration::from_secs(args.timeout_secs),
                        env: Default::default(),
                        staged_file: None,
                    },
                )
                .await?;
            println!("{}", result.stdout);
            if !result.stderr.is_empty() {
                eprintln!("{}", result.stderr);
            }
            if result.timed_out {
                ui::error(&format!("command timed out after {:?}", result.duration));
            }
            if result.exit_code != 0 {
                std::process::exit(result.exit_code);
            }
        }
        VmCmd::Stop { id } => {
            ctx.vm_service.stop(&id).await?;
            ui::success(&format!("stopped vm {id}"));
        }
        VmCmd::Clean { id, keep_persist, yes } => {
            if !yes && !ui::confirm(&format!("clean vm {id}? this removes its launcher state")) {
                ui::warn("aborted");
                return Ok(());
            }
            ctx.vm_service.clean(&id, keep_persist).await?;
            ui::success(&format!("cleaned vm {id}"));
        }
        VmCmd::Patch(args) => {
            let network_mode = args
                .network
                .as_deref()
                .map(|s| NetworkMode::parse(s).ok_or_else(|| anyhow::anyhow!("unknown network mode: {s}")))
                .transpose()?;
            let vm = ctx
                .vm_service
                .patch(
                    &args.id,
                    VmPatch {
                        network_mode,
                        cpu_count: args.cpu_count,
                        memory_mib: args.memory_mib,
                        allow_internet: args.allow_internet,
                    },
                )
                .await?;
            render_one(&VmRow::from(&vm), fmt);
        }
    }
    Ok(())
}

async fn dispatch_session(cmd: SessionCmd, ctx: Context, fmt: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SessionCmd::Create(args) => {
            let language = Language::parse(&args.language)
                .ok_or_else(|| anyhow::anyhow!("unknown language: {}", args.language))?;
            let setup = if args.pip.is_empty() && args.npm.is_empty() {
                None
            } else {
                Some(SetupSpec { pip: args.pip, npm: args.npm, ..Default::default() })
            };
            let session = ctx
                .session_service
                .create(CreateSessionSpec {
                    id: args.id,
                    language,
                    persistent: args.persistent,
                    allow_internet: args.allow_internet,
                    allow_public: args.allow_public,
                    default_timeout: args.default_timeout,
                    setup,
                    ..Default::default()
                })
                .await?;
            ui::success(&format!("created session {}", session.id));
            render_one(&SessionRow::from(&session), fmt);
        }
        SessionCmd::List => {
            let sessions = ctx.session_service.list().await?;
            let rows: Vec<SessionRow> = sessions.iter().map(SessionRow::from).collect();
            render_list(&rows, fmt);
        }
        SessionCmd::Get { id } => {
            let session = ctx.session_service.get(&id).await?;
            render_one(&SessionRow::from(&session), fmt);
        }
        SessionCmd::Delete { id, yes } => {
            if !yes && !ui::confirm(&format!("delete session {id}? this is permanent")) {
                ui::warn("aborted");
                return Ok(());
            }
            ctx.session_service.delete(&id).await?;
            ui::success(&format!("deleted session {id}"));
        }
        SessionCmd::Duplicate { id, new_id } => {
            let session = ctx.session_service.duplicate(&id, new_id).await?;
            ui::success(&format!("duplicated into session {}", session.id));
            render_one(&SessionRow::from(&session), fmt);
        }
        SessionCmd::Patch(args) => {
            let session = ctx
                .session_service
                .patch(
                    &args.id,
                    SessionPatch {
                        default_timeout: args.default_timeout,
                        allow_internet: args.allow_internet,
                        allow_public: args.allow_public,
                        ..Default::default()
                    },
                )
                .await?;
            render_one(&SessionRow::from(&session), fmt);
        }
        SessionCmd::Run(args) => {
            let code = args.code.map(std::fs::read_to_string).transpose()?;
            let result = ctx
                .session_service
                .run(
                    &args.id,
                    RunRequest { code, timeout_secs: args.timeout_secs, env: Default::default() },
                )
                .await?;
            println!("{}", result.stdout);
            if !result.stderr.is_empty() {
                eprintln!("{}", result.stderr);
            }
            if result.exit_code != 0 {
                std::process::exit(result.exit_code);
            }
        }
        SessionCmd::StoreCode { id, file, description } => {
            let code = std::fs::read_to_string(file)?;
            ctx.session_service.store_code(&id, code, description).await?;
            ui::success(&format!("stored code for session {id}"));
        }
        SessionCmd::GetCode { id } => match ctx.session_service.get_code(&id).await? {
            Some(stored) => render_one(&stored, fmt),
            None => ui::info("no code stored for this session"),
        },
        SessionCmd::Files { cmd } => dispatch_files(cmd, &ctx, fmt).await?,
    }
    Ok(())
}

async fn dispatch_files(cmd: FilesCmd, ctx: &Context, fmt: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        FilesCmd::Upload { id, rel_path, file } => {
            let bytes = std::fs::read(file)?;
            let size = ctx.session_service.upload_session_file(&id, &rel_path, bytes).await?;
            ui::success(&format!("uploaded {rel_path} ({size} bytes)"));
        }
        FilesCmd::Download { id, rel_path, out } => {
            let bytes = ctx.session_service.download_session_file(&id, &rel_path).await?;
            std::fs::write(out, bytes)?;
            ui::success(&format!("downloaded {rel_path}"));
        }
        FilesCmd::List { id } => {
            let files = ctx.session_service.list_session_files(&id).await?;
            match fmt {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
                OutputFormat::Table => files.iter().for_each(|f| println!("{f}")),
            }
        }
    }
    Ok(())
}

fn parse_vm_status(s: &str) -> Result<VmStatus, String> {
    match s {
        "pending" => Ok(VmStatus::Pending),
        "running" => Ok(VmStatus::Running),
        "stopped" => Ok(VmStatus::Stopped),
        "errored" => Ok(VmStatus::Errored),
        "cleaned" => Ok(VmStatus::Cleaned),
        other => Err(format!("unknown vm status: {other}")),
    }
}
