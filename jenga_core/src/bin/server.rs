use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use jenga_core::{load_tower_config_from_env, ServerHandle, TowerConfig};
use jenga_protocol::PlayerType;
use tracing::info;

/// Headless tower simulation answering controller commands.
#[derive(Debug, Parser)]
#[command(name = "jenga_server", version)]
struct Args {
    /// Config file; takes precedence over JENGA_CONFIG_PATH.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address the command listener binds to.
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Controller address that receives pushed events.
    #[arg(long)]
    event_target: Option<SocketAddr>,
    /// Number of levels in a fresh tower.
    #[arg(long)]
    levels: Option<u32>,
    /// Player type codes (0 random, 1 dqn, 2 sarsa, 3 human) for a game
    /// started at boot.
    #[arg(long, num_args = 1.., value_name = "CODE")]
    players: Vec<i32>,
    /// Rounds for the boot game.
    #[arg(long, default_value_t = 1)]
    rounds: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => TowerConfig::from_file(path)
            .with_context(|| format!("loading tower config from {}", path.display()))?,
        None => load_tower_config_from_env().0,
    };
    if let Some(bind) = args.bind {
        config.command_bind = bind;
    }
    if let Some(target) = args.event_target {
        config.event_target = target;
    }
    if let Some(levels) = args.levels {
        config.levels = levels;
    }
    config.validate().context("validating tower config")?;

    let players = args
        .players
        .iter()
        .map(|code| match PlayerType::from_code(*code) {
            Some(player) => Ok(player),
            None => bail!("unknown player type code {code}"),
        })
        .collect::<Result<Vec<_>>>()?;

    let server = ServerHandle::spawn(config).context("starting server")?;
    info!(
        target: "jenga::server",
        command_addr = %server.command_addr(),
        "Jenga headless server ready"
    );

    if !players.is_empty() {
        server.start_game(players, args.rounds);
    }

    server.wait();
    Ok(())
}
