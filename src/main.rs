mod attach;
mod consts;
mod daemon;
mod info;
mod ioutil;
mod kill;
mod list;
mod name;
mod protocol;
mod registry;
mod tty;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(version, author, about)]
struct Args {
    #[clap(short, long, global = true, help = "write logs to this file instead of stderr")]
    log_file: Option<String>,
    #[clap(short, long, global = true, action = clap::ArgAction::Count,
           help = "raise log verbosity; may be given multiple times")]
    verbose: u8,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[clap(about = "start a new session's daemon in the background")]
    Create {
        name: String,
        #[clap(last = true, help = "command to run instead of the login shell")]
        cmd: Vec<String>,
    },
    #[clap(about = "attach to an already-running session")]
    Attach { name: String },
    #[clap(about = "attach to a session, creating it first if necessary")]
    Open {
        name: String,
        #[clap(last = true, help = "command to run instead of the login shell")]
        cmd: Vec<String>,
    },
    #[clap(about = "list running sessions")]
    List {
        #[clap(long)]
        json: bool,
    },
    #[clap(about = "report host-level diagnostics")]
    Info {
        #[clap(long)]
        json: bool,
    },
    #[clap(about = "terminate a running session")]
    Kill { name: String },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_file.as_deref())?;

    let exit_code = match args.command {
        Commands::Create { name, cmd } => {
            daemon::create(&name, join_cmd(cmd)).context("creating session")?;
            0
        }
        Commands::Attach { name } => attach::run(&name).context("attaching to session")?,
        Commands::Open { name, cmd } => daemon::open(&name, join_cmd(cmd)).context("opening session")?,
        Commands::List { json } => {
            list::run(json).context("listing sessions")?;
            0
        }
        Commands::Info { json } => {
            info::run(json).context("gathering host info")?;
            0
        }
        Commands::Kill { name } => {
            kill::run(&name).context("killing session")?;
            0
        }
    };

    std::process::exit(exit_code);
}

fn join_cmd(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(shell_words::join(parts))
    }
}

fn init_logging(verbose: u8, log_file: Option<&str>) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::new(format!("warn,shoal={}", level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path))?;
        builder.with_writer(file).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }

    Ok(())
}

