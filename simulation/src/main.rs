//! QLRN routing simulator
//!
//! Runs on-demand routing engines over a simulated wireless medium and
//! reports what happened to the traffic.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use qlrn_logging::{LogConfig, QlrnSubscriberBuilder};
use qlrn_simulation::{
    NodeId, SimConfig, Simulation, TopologyBuilder, scenarios,
};

#[derive(Parser)]
#[command(
    name = "qlrn-sim",
    about = "Discrete-event simulator for the QLRN on-demand routing engine",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    json_logs: bool,

    /// Load logging configuration from a JSON file
    #[arg(long, global = true)]
    log_config: Option<PathBuf>,

    /// Also write JSONL logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Write the simulation event log as JSON lines to this file
    #[arg(long, global = true)]
    events: Option<PathBuf>,

    /// Enable HELLO neighbor detection
    #[arg(long, global = true)]
    hello: bool,

    /// First random stream for the engines
    #[arg(long, global = true, default_value = "1")]
    seed: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Multi-hop delivery along a line
    Line {
        /// Number of nodes
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Packets sent from the first to the last node
        #[arg(short, long, default_value = "10")]
        packets: usize,
    },

    /// Subnet broadcast across a grid
    Broadcast {
        #[arg(long, default_value = "4")]
        width: u16,

        #[arg(long, default_value = "4")]
        height: u16,
    },

    /// Destination in another partition
    Unreachable,

    /// Link break on an active route
    LinkBreak,

    /// Partition and reconnect
    Partition,

    /// Random flows over a random topology
    Traffic {
        #[arg(short, long, default_value = "20")]
        nodes: usize,

        /// Link probability
        #[arg(short = 'p', long, default_value = "0.15")]
        link_probability: f64,

        #[arg(short, long, default_value = "10")]
        flows: usize,

        /// Topology and traffic seed
        #[arg(long, default_value = "7")]
        topology_seed: u64,
    },

    /// Create and visualize a topology
    Topology {
        /// Type of topology: line, ring, star, grid, random
        #[arg(short, long, default_value = "ring")]
        kind: String,

        #[arg(short, long, default_value = "6")]
        nodes: usize,

        /// Link probability for random topology
        #[arg(short = 'p', long, default_value = "0.4")]
        link_probability: f64,
    },

    /// Interactive simulation mode
    Interactive {
        #[arg(short, long, default_value = "6")]
        nodes: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = match &cli.log_config {
        Some(path) => LogConfig::load(path)?,
        None => LogConfig {
            default_level: if cli.verbose { "debug" } else { "info" }.to_string(),
            ..LogConfig::simulation(None)
        },
    };
    if cli.json_logs {
        log_config.console.pretty = false;
    }
    if let Some(dir) = &cli.log_dir {
        log_config.file = LogConfig::simulation(Some(dir.clone())).file;
    }
    let _guard = QlrnSubscriberBuilder::new().with_config(log_config).init();

    let config = SimConfig::default()
        .with_hello(cli.hello)
        .with_seed(cli.seed);

    let sim = match cli.command {
        Commands::Line { nodes, packets } => {
            Some(scenarios::run_line_scenario(nodes, packets, config)?)
        }
        Commands::Broadcast { width, height } => {
            Some(scenarios::run_broadcast_scenario(width, height, config)?)
        }
        Commands::Unreachable => Some(scenarios::run_unreachable_scenario(config)?),
        Commands::LinkBreak => Some(scenarios::run_link_break_scenario(config)?),
        Commands::Partition => Some(scenarios::run_partition_scenario(config)?),
        Commands::Traffic {
            nodes,
            link_probability,
            flows,
            topology_seed,
        } => Some(scenarios::run_traffic_scenario(
            nodes,
            link_probability,
            flows,
            topology_seed,
            config,
        )?),
        Commands::Topology {
            kind,
            nodes,
            link_probability,
        } => {
            let builder = TopologyBuilder::new(nodes);
            let topology = match kind.as_str() {
                "line" => builder.line(),
                "ring" => builder.ring(),
                "star" => builder.star(),
                "grid" => {
                    let width = (nodes as f64).sqrt().ceil() as u16;
                    builder.grid(width)
                }
                "random" => builder.random(link_probability, 7),
                _ => {
                    eprintln!("Unknown topology: {kind}. Using ring.");
                    builder.ring()
                }
            };
            println!("{}", topology.visualize());
            None
        }
        Commands::Interactive { nodes } => Some(run_interactive(nodes, config)?),
    };

    if let (Some(sim), Some(path)) = (sim, &cli.events) {
        write_events(&sim, path)?;
        println!("\nEvent log written to {}", path.display());
    }
    Ok(())
}

fn write_events(sim: &Simulation, path: &Path) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for event in &sim.event_log {
        serde_json::to_writer(&mut out, event)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn parse_node(arg: Option<&&str>) -> Option<NodeId> {
    let raw = arg?.trim_start_matches('n');
    raw.parse().ok().map(NodeId)
}

fn run_interactive(node_count: usize, config: SimConfig) -> anyhow::Result<Simulation> {
    let topology = TopologyBuilder::new(node_count).random(0.4, 7);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(&topology, config)?;

    println!("\nInteractive mode. Commands:");
    println!("  send <from> <to>      - Send a packet (e.g., 'send 0 3')");
    println!("  broadcast <from>      - Broadcast from a node");
    println!("  break <a> <b>         - Take a link down");
    println!("  restore <a> <b>       - Bring a link back up");
    println!("  run [ms]              - Advance simulated time (default 1000 ms)");
    println!("  table <node>          - Show a node's routing table");
    println!("  status                - Show current state");
    println!("  stats                 - Show statistics");
    println!("  events                - Show event log");
    println!("  quit                  - Exit");
    println!();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some(command) = parts.first() else {
            continue;
        };

        match *command {
            "send" => match (parse_node(parts.get(1)), parse_node(parts.get(2))) {
                (Some(from), Some(to)) => match sim.send(from, to) {
                    Ok(uid) => println!("  Queued packet {uid} {from} -> {to}"),
                    Err(e) => println!("  {e}"),
                },
                _ => println!("  Usage: send <from> <to>"),
            },
            "broadcast" => match parse_node(parts.get(1)) {
                Some(from) => match sim.broadcast(from) {
                    Ok(uid) => println!("  Queued broadcast {uid} from {from}"),
                    Err(e) => println!("  {e}"),
                },
                None => println!("  Usage: broadcast <from>"),
            },
            "break" | "restore" => match (parse_node(parts.get(1)), parse_node(parts.get(2))) {
                (Some(a), Some(b)) => {
                    let changed = if *command == "break" {
                        sim.break_link(a, b)
                    } else {
                        sim.restore_link(a, b)
                    };
                    if changed {
                        println!("  Link {a} - {b} {}", if *command == "break" { "down" } else { "up" });
                    } else {
                        println!("  Link {a} - {b} unchanged");
                    }
                }
                _ => println!("  Usage: {command} <a> <b>"),
            },
            "run" | "step" => {
                let ms: u64 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(1000);
                let processed = sim.run_for(Duration::from_millis(ms));
                println!("  Processed {processed} event(s). {}", sim.state_summary());
            }
            "table" => match parse_node(parts.get(1)).and_then(|n| sim.routing_table_dump(n)) {
                Some(table) => print!("{table}"),
                None => println!("  Usage: table <node>"),
            },
            "status" => {
                println!("  {}", sim.state_summary());
                for node in sim.node_ids() {
                    if let Some(engine) = sim.engine(node) {
                        println!(
                            "    {node} ({}) - {} routes, {} neighbors, {} queued",
                            node.address(),
                            engine.routing_table().len(),
                            engine.neighbors().len(),
                            engine.queue_len()
                        );
                    }
                }
            }
            "stats" => scenarios::print_summary(&sim),
            "events" => {
                println!("  Event log ({} events):", sim.event_log.len());
                for event in sim.event_log.iter().rev().take(20) {
                    println!("    {event:?}");
                }
                if sim.event_log.len() > 20 {
                    println!("    ... ({} more)", sim.event_log.len() - 20);
                }
            }
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                break;
            }
            other => println!("  Unknown command: {other}"),
        }
    }

    Ok(sim)
}
