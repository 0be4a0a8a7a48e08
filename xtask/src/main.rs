#![allow(clippy::cargo_common_metadata)]

use std::process;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Fmt,
    Check,
    Clippy,
    /// Run the relay, optionally on the given address.
    Run {
        address: Option<String>,
    },
    Test,
    /// Run the workspace tests, then smoke test a relay binary through its health endpoint.
    Smoke,
    Doc,
    PreCommit,
}

const RELAY_PACKAGE: &str = "webrtc-pubsub-relay";
const SMOKE_ADDRESS: &str = "127.0.0.1:9099";

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let sh = Shell::new()?;

    match &cli.command {
        Command::Fmt => fmt(&sh)?,
        Command::Check => check(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Run { address } => run(&sh, address.as_deref())?,
        Command::Test => test(&sh)?,
        Command::Smoke => smoke(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::PreCommit => pre_commit(&sh)?,
    };

    Ok(())
}

fn fmt(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo fmt --all").run()?)
}

fn check(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo check --all-targets --all-features --workspace").run()?)
}

fn clippy(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo clippy --all-targets --all-features --workspace").run()?)
}

fn run(sh: &Shell, address: Option<&str>) -> Result<()> {
    let address: Vec<&str> = address.into_iter().collect();
    Ok(cmd!(sh, "cargo run --package {RELAY_PACKAGE} -- {address...}").run()?)
}

fn test(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo test --workspace").run()?)
}

fn smoke(sh: &Shell) -> Result<()> {
    test(sh)?;
    cmd!(sh, "cargo build --package {RELAY_PACKAGE}").run()?;
    let mut relay = process::Command::new(format!("./target/debug/{RELAY_PACKAGE}"))
        .arg(SMOKE_ADDRESS)
        .current_dir(project_root::get_project_root()?)
        .spawn()?;
    thread::sleep(Duration::from_secs(1));

    let result = cmd!(sh, "curl --fail --silent http://{SMOKE_ADDRESS}/health")
        .read()
        .map_err(Into::into)
        .and_then(|body| {
            if body == "OK" {
                Ok(())
            } else {
                Err(color_eyre::eyre::eyre!("unexpected health response: {body}"))
            }
        });

    relay.kill()?;

    result
}

fn doc(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo doc --no-deps --all-features --workspace").run()?)
}

fn pre_commit(sh: &Shell) -> Result<()> {
    for cmd in [fmt, check, clippy, test, doc] {
        cmd(sh)?;
    }
    Ok(())
}
