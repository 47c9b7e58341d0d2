//! Tickwork CLI - Command-line interface for the tickwork runtime
//!
//! Provides subcommands for initializing a storage root, running a headless
//! simulation, and inspecting persisted agent records.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tickwork::runtime::{Result, RuntimeError};
use tickwork::scripts::IdleScript;
use tickwork::{AgentId, Runtime, RuntimeConfig, ScriptRegistry};

#[derive(Parser)]
#[command(name = "tickwork")]
#[command(about = "Tick-driven cooperative scripting runtime for simulated bots", long_about = None)]
struct Cli {
    /// Root directory for runtime storage
    #[arg(short, long, default_value = ".tickwork")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new runtime
    Init {
        /// Wall-clock length of one tick, in milliseconds
        #[arg(long, default_value = "600")]
        tick_millis: u64,

        /// Number of ticks between checkpoints
        #[arg(long, default_value = "100")]
        checkpoint_interval: u64,
    },

    /// Run a headless simulation
    Simulate {
        /// Number of agents to log in
        #[arg(short, long, default_value = "1")]
        agents: usize,

        /// Number of ticks to run
        #[arg(short, long, default_value = "10")]
        ticks: u64,

        /// Idle length given to agents with an empty stack
        #[arg(long, default_value = "20")]
        idle_ticks: u64,
    },

    /// Print the persisted record of an agent
    Inspect {
        /// Agent ID (UUID)
        #[arg(long)]
        agent: String,
    },

    /// List persisted agents
    Agents,
}

fn registry() -> Result<ScriptRegistry> {
    let registry = ScriptRegistry::new();
    registry.register_default::<IdleScript>()?;
    Ok(registry)
}

fn parse_agent(agent: &str) -> Result<AgentId> {
    agent
        .parse()
        .map_err(|e| RuntimeError::Config(format!("invalid agent id {agent:?}: {e}")))
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            tick_millis,
            checkpoint_interval,
        } => {
            let root = cli.root.clone();
            let config = RuntimeConfig {
                root: cli.root,
                tick_millis,
                checkpoint_interval,
                debug: false,
            };

            Runtime::init(config)?;
            println!("Initialized tickwork runtime at {:?}", root);
        }

        Commands::Simulate {
            agents,
            ticks,
            idle_ticks,
        } => {
            let runtime = Runtime::open(cli.root, registry()?)?;
            runtime.bind_current_thread();

            let mut roster = runtime.records().list_agents()?;
            roster.truncate(agents);
            while roster.len() < agents {
                roster.push(AgentId::new());
            }

            for agent in &roster {
                let restored = runtime.login(*agent)?;
                if restored == 0 {
                    runtime.push_script(*agent, IdleScript::new(idle_ticks))?;
                }
                println!("  Agent {}: {} scripts restored", agent, restored);
            }

            for _ in 0..ticks {
                runtime.tick();
            }

            for agent in &roster {
                let record = runtime.logout(*agent)?;
                let kinds: Vec<_> = record.scripts.iter().map(|s| s.kind.as_str()).collect();
                println!("  Agent {}: saved [{}]", agent, kinds.join(", "));
            }
            runtime.shutdown()?;
            println!("Ran {} ticks for {} agents", ticks, roster.len());
        }

        Commands::Inspect { agent } => {
            let runtime = Runtime::open(cli.root, registry()?)?;
            let agent = parse_agent(&agent)?;

            match runtime.records().load(&agent)? {
                Some(record) => {
                    println!("Agent: {}", record.agent);
                    println!("Tick: {}", record.tick);
                    println!("Saved at: {}", record.saved_at);
                    for (index, script) in record.scripts.iter().enumerate() {
                        match &script.data {
                            Some(data) => println!("  [{}] {} {}", index, script.kind, data),
                            None => println!("  [{}] {}", index, script.kind),
                        }
                    }
                }
                None => println!("No record for agent {}", agent),
            }
        }

        Commands::Agents => {
            let runtime = Runtime::open(cli.root, registry()?)?;
            let agents = runtime.records().list_agents()?;
            if agents.is_empty() {
                println!("No persisted agents");
            }
            for agent in agents {
                println!("{}", agent);
            }
        }
    }

    Ok(())
}
