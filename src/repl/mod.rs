pub mod command;

pub use command::{Command, CommandError, LatencyChange};

use std::time::Duration;

use ::log::info;
use anyhow::{anyhow, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::json;

use crate::cluster::Cluster;
use crate::network::NetworkConfig;

/// Simulated time between status lines printed by `run`.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Executes parsed commands against a cluster and renders the reply as text.
/// Kept apart from the line editor so it can be driven from tests.
pub struct Console {
    cluster: Cluster,
    latency_step_ms: u64,
}

impl Console {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster,
            latency_step_ms: NetworkConfig::default().latency_step_ms,
        }
    }

    pub fn with_latency_step(mut self, step_ms: u64) -> Self {
        self.latency_step_ms = step_ms;
        self
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn execute(&mut self, command: Command) -> Result<String> {
        let reply = match command {
            Command::Status => self.cluster.statistics().to_string(),
            Command::Nodes => serde_json::to_string_pretty(&self.cluster.node_infos())?,
            Command::Node(id) => {
                let node = self
                    .cluster
                    .node(id)
                    .ok_or(crate::raft::RaftError::UnknownNode(id))?;
                let now = self.cluster.now();
                let log: Vec<_> = node.log().entries().iter().map(|e| e.info(now)).collect();
                serde_json::to_string_pretty(&json!({
                    "node": node.info(),
                    "log": log,
                }))?
            }
            Command::Messages => serde_json::to_string_pretty(&self.cluster.messages())?,
            Command::Connections => serde_json::to_string(&self.cluster.connections())?,
            Command::Step(ms) => {
                self.cluster.advance(Duration::from_millis(ms));
                self.cluster.statistics().to_string()
            }
            Command::Run(ms) => self.run_for(Duration::from_millis(ms)),
            Command::Kill(Some(id)) => {
                self.cluster.kill_node(id)?;
                format!("Killed node {id}")
            }
            Command::Kill(None) => {
                let id = self.cluster.kill_random_node()?;
                format!("Killed node {id}")
            }
            Command::Revive(Some(id)) => {
                self.cluster.revive_node(id)?;
                format!("Revived node {id}")
            }
            Command::Revive(None) => {
                let count = self.cluster.revive_all();
                format!("Revived {count} nodes")
            }
            Command::Add => {
                let id = self.cluster.add_node_auto()?;
                format!("Added node {id}")
            }
            Command::Remove(Some(id)) => {
                self.cluster.remove_node(id)?;
                format!("Removed node {id}")
            }
            Command::Remove(None) => {
                let id = self.cluster.remove_highest_node()?;
                format!("Removed node {id}")
            }
            Command::Partition(Some((a, b))) => {
                self.cluster.partition(&a, &b)?;
                format!("Partitioned {a:?} | {b:?}")
            }
            Command::Partition(None) => {
                let (a, b) = self.cluster.partition_random()?;
                format!("Partitioned {a:?} | {b:?}")
            }
            Command::Heal => {
                self.cluster.heal_partition();
                "Partition healed".to_string()
            }
            Command::Latency(LatencyChange::Set(ms)) => {
                self.cluster.set_latency(ms);
                format!("Latency set to {ms}ms")
            }
            Command::Latency(LatencyChange::Add(ms)) => {
                let total = self.cluster.add_latency(ms.unwrap_or(self.latency_step_ms));
                format!("Latency now {total}ms")
            }
            Command::Drop(rate) => {
                self.cluster.set_drop_rate(rate);
                format!("Drop rate set to {}", self.cluster.network().drop_rate())
            }
            Command::Speed(multiplier) => {
                self.cluster.set_speed_multiplier(multiplier);
                format!("Speed set to {}x", self.cluster.network().speed_multiplier())
            }
            Command::Submit(Some(cmd)) => {
                let entry = self.cluster.submit_client_command(&cmd)?;
                format!("Accepted '{}' at index {} (term {})", entry.command, entry.index, entry.term)
            }
            Command::Submit(None) => {
                let entry = self.cluster.submit_request()?;
                format!("Accepted '{}' at index {} (term {})", entry.command, entry.index, entry.term)
            }
            Command::Burst(count) => {
                let accepted = self.cluster.submit_burst(count);
                format!("Accepted {accepted} of {count} requests")
            }
            Command::Commit(index) => match self.cluster.commit_leader_log(index)? {
                Some(committed) => format!("Committed through index {committed}"),
                None => "Leader log is empty".to_string(),
            },
            Command::Reset => {
                self.cluster.reset();
                "Simulation reset".to_string()
            }
            Command::Help => command::HELP.to_string(),
            Command::Exit => return Err(anyhow!("exit is handled by the line editor")),
        };
        Ok(reply)
    }

    /// Advances in fixed steps, emitting one status line per simulated
    /// second.
    fn run_for(&mut self, total: Duration) -> String {
        let step = Duration::from_millis(command::DEFAULT_STEP_MS);
        let mut lines = Vec::new();
        let mut elapsed = Duration::ZERO;
        let mut since_status = Duration::ZERO;
        while elapsed < total {
            let delta = step.min(total - elapsed);
            self.cluster.advance(delta);
            elapsed += delta;
            since_status += delta;
            if since_status >= STATUS_INTERVAL {
                since_status = Duration::ZERO;
                lines.push(self.cluster.statistics().to_string());
            }
        }
        if lines.is_empty() {
            lines.push(self.cluster.statistics().to_string());
        }
        lines.join("\n")
    }
}

pub struct Repl {
    console: Console,
    rl: DefaultEditor,
}

impl Repl {
    pub fn new(console: Console) -> rustyline::Result<Self> {
        Ok(Self {
            console,
            rl: DefaultEditor::new()?,
        })
    }

    pub async fn run(&mut self) {
        println!("Raft election simulator");
        println!("{}", self.console.cluster().statistics());
        println!("Enter commands, 'help' for a list or 'exit' to quit");

        loop {
            let readline = self.rl.readline("raftsim> ");
            match readline {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    let _ = self.rl.add_history_entry(line.as_str());

                    let command = match line.parse::<Command>() {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{e}");
                            continue;
                        }
                    };
                    if command == Command::Exit {
                        println!("Goodbye!");
                        break;
                    }

                    match self.console.execute(command) {
                        Ok(reply) => println!("{reply}"),
                        Err(e) => eprintln!("Error: {e}"),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {err:?}");
                    break;
                }
            }
        }
        info!("REPL closed");
    }
}
