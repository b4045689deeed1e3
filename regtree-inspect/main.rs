use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use regtree::datatype::parse_number;
use regtree::devices;
use regtree::{Config, DirentId, Drivers, Tree};
use regtree_raw::{Value, Width};

#[derive(Parser, Debug)]
#[command(name = "regtree")]
#[command(about = "Browse and poke hardware registers by name")]
struct Args {
    #[arg(short, long, help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        help = "CPUs to describe (ranges and comma-separated lists: 0-3,8)"
    )]
    cpus: Option<String>,

    #[arg(
        long = "driver",
        help = "Drivers to run discovery for (repeatable; overrides the config)",
        action = clap::ArgAction::Append
    )]
    drivers: Vec<String>,

    #[arg(
        short,
        long,
        help = "Enable verbose logging (shows every register read/write)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the children of a scope or the items of an array
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print the display value of a field
    Read {
        path: String,
        #[arg(long, help = "Print the raw value in hex instead")]
        raw: bool,
    },
    /// Write a display token or number to a field
    Write { path: String, value: String },
    /// Evaluate every field below a path
    Dump {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Read a register directly through a driver binding
    Peek {
        driver: String,
        #[arg(help = "Binding arguments, as the driver expects them")]
        args: Vec<String>,
        #[arg(short, long)]
        address: String,
        #[arg(short, long, default_value_t = 32)]
        width: u32,
    },
    /// Write a register directly through a driver binding
    Poke {
        driver: String,
        args: Vec<String>,
        #[arg(short, long)]
        address: String,
        #[arg(short, long, default_value_t = 32)]
        width: u32,
        #[arg(long)]
        value: String,
    },
}

fn number(text: &str) -> anyhow::Result<Value> {
    parse_number(text).ok_or_else(|| anyhow!("'{text}' is not a number"))
}

fn numbers(texts: &[String]) -> anyhow::Result<Vec<Value>> {
    texts.iter().map(|t| number(t)).collect()
}

fn width(bits: u32) -> anyhow::Result<Width> {
    Width::from_bits(bits).ok_or_else(|| anyhow!("unsupported width {bits}"))
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if args.cpus.is_some() {
        config.cpus = args.cpus.clone();
    }
    if !args.drivers.is_empty() {
        config.drivers = args.drivers.clone();
    }
    Ok(config)
}

/// Resolve `path` from the root, following a final alias
fn lookup(tree: &Tree, path: &str) -> anyhow::Result<DirentId> {
    tree.resolve_str_follow(tree.root(), path)?
        .ok_or_else(|| anyhow!("{path}: no such dirent"))
}

/// Resolve `path` without following a final alias, so `ls` shows the alias
fn lookup_link(tree: &Tree, path: &str) -> anyhow::Result<DirentId> {
    tree.resolve_str(tree.root(), path)?
        .ok_or_else(|| anyhow!("{path}: no such dirent"))
}

/// Accept a datatype token first, then a bare number
fn parse_value(tree: &Tree, id: DirentId, text: &str) -> anyhow::Result<Value> {
    match tree.lookup(id, text) {
        Ok(value) => Ok(value),
        Err(err) => {
            let Some(raw) = parse_number(text) else {
                return Err(err.into());
            };
            let field = tree
                .field(id)
                .ok_or_else(|| anyhow!("{}: not a field", tree.path_of(id)))?;
            Ok(field.lookup_value(raw)?)
        }
    }
}

fn run_tree_command(command: &Command, tree: &Tree) -> anyhow::Result<()> {
    match command {
        Command::Ls { path } => {
            for entry in regtree::list(tree, lookup_link(tree, path)?) {
                println!("{entry}");
            }
        }
        Command::Read { path, raw } => {
            let id = lookup(tree, path)?;
            if *raw {
                println!("{:#x}", tree.read(id)?);
            } else {
                println!("{}", tree.evaluate(id)?);
            }
        }
        Command::Write { path, value } => {
            let id = lookup(tree, path)?;
            let value = parse_value(tree, id, value)?;
            tree.write(id, value)
                .with_context(|| format!("writing {value:#x} to {path}"))?;
            tracing::info!("{} = {}", tree.path_of(id), tree.evaluate(id)?);
        }
        Command::Dump { path } => {
            for entry in regtree::dump(tree, lookup(tree, path)?)? {
                println!("{entry}");
            }
        }
        Command::Peek { .. } | Command::Poke { .. } => bail!("raw access needs no tree"),
    }
    Ok(())
}

fn run_raw_command(command: &Command, drivers: &Drivers) -> anyhow::Result<()> {
    let (driver, args, address, bits) = match command {
        Command::Peek {
            driver,
            args,
            address,
            width,
        }
        | Command::Poke {
            driver,
            args,
            address,
            width,
            ..
        } => (driver, args, address, *width),
        _ => bail!("not a raw access command"),
    };
    let binding = drivers
        .get(driver)
        .ok_or_else(|| anyhow!("unknown driver '{driver}'"))?
        .new_binding(&numbers(args)?)?;
    let (address, width) = (number(address)?, width(bits)?);

    if let Command::Poke { value, .. } = command {
        let value = number(value)?;
        binding.write(address, width, value)?;
        tracing::info!("{} {address:#x} <- {value:#x}", binding.describe());
    } else {
        println!("{:#x}", binding.read(address, width)?);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let mut drivers = devices::drivers(&config)?;

    if matches!(args.command, Command::Peek { .. } | Command::Poke { .. }) {
        return run_raw_command(&args.command, &drivers);
    }

    tracing::info!("Discovering with drivers: {}", config.drivers.join(", "));
    let tree = devices::describe_system(&config, &mut drivers).context("describing system")?;
    tracing::debug!("Tree has {} dirents", tree.len());

    run_tree_command(&args.command, &tree)
}
