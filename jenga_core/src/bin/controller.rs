use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use jenga_protocol::{parse_game_event, BlockColor, ControlClient, DEFAULT_COMMAND_PORT, DEFAULT_EVENT_PORT};
use tracing::warn;

/// Minimal controller for driving a running jenga_server by hand.
#[derive(Debug, Parser)]
#[command(name = "jenga_controller", version)]
struct Args {
    /// Command port of the simulation.
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_COMMAND_PORT)))]
    server: SocketAddr,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one raw command line and print the response.
    Send {
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
    /// Remove a block, then report the resulting tower state.
    Step {
        level: i32,
        /// One of y, b, g.
        color: String,
    },
    /// Listen on the event port and print pushed game events.
    WatchEvents {
        #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_EVENT_PORT)))]
        bind: SocketAddr,
        /// Exit after this many events.
        #[arg(long)]
        count: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = ControlClient::new(args.server);
    match args.command {
        Command::Send { words } => {
            let response = client
                .send_line(&words.join(" "))
                .with_context(|| format!("sending to {}", client.addr()))?;
            println!("{response}");
        }
        Command::Step { level, color } => {
            let color = BlockColor::from_code(&color)
                .ok_or_else(|| anyhow!("unknown block color '{color}', expected y, b or g"))?;
            step(&client, level, color)?;
        }
        Command::WatchEvents { bind, count } => watch_events(bind, count)?,
    }
    Ok(())
}

fn step(client: &ControlClient, level: i32, color: BlockColor) -> Result<()> {
    let ack = client.remove(level, color).context("remove")?;
    let fallen = client.is_fallen().context("isfallen")?;
    let remaining = client.blocks_in_level(level).context("get_num_of_blocks_in_level")?;
    let average = client.average_max_tilt().context("get_average_max_tilt_angle")?;
    let peak = client.most_max_tilt().context("get_most_max_tilt_angle")?;

    println!("remove {level} {color}: {ack}");
    println!("fallen: {fallen}");
    match remaining {
        Some(count) => println!("blocks in level {level}: {count}"),
        None => println!("blocks in level {level}: unavailable"),
    }
    println!(
        "tilt average/peak: {} / {}",
        average.map_or_else(|| "unavailable".to_string(), |value| value.to_string()),
        peak.map_or_else(|| "unavailable".to_string(), |value| value.to_string())
    );
    Ok(())
}

fn watch_events(bind: SocketAddr, count: Option<usize>) -> Result<()> {
    let listener = TcpListener::bind(bind).with_context(|| format!("binding {bind}"))?;
    println!("waiting for events on {}", listener.local_addr()?);
    let mut seen = 0usize;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "event connection failed");
                continue;
            }
        };
        let mut line = String::new();
        BufReader::new(stream)
            .read_line(&mut line)
            .context("reading event line")?;
        match parse_game_event(&line) {
            Ok(event) => println!("{event:?}"),
            Err(err) => println!("unparsed event '{}': {err}", line.trim()),
        }
        seen += 1;
        if count.is_some_and(|limit| seen >= limit) {
            break;
        }
    }
    Ok(())
}
