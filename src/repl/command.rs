use std::str::FromStr;

use thiserror::Error;

use crate::raft::NodeId;

pub const DEFAULT_STEP_MS: u64 = 100;
pub const DEFAULT_BURST: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0} (try 'help')")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid {name}: {value}")]
    InvalidArgument { name: &'static str, value: String },
}

/// How a `latency` command changes the configured delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyChange {
    Set(u64),
    /// `latency +` with no amount uses the configured step.
    Add(Option<u64>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Nodes,
    Node(NodeId),
    Messages,
    Connections,
    Step(u64),
    Run(u64),
    /// `None` kills a random alive node.
    Kill(Option<NodeId>),
    /// `None` revives every dead node.
    Revive(Option<NodeId>),
    Add,
    /// `None` removes the node with the highest id.
    Remove(Option<NodeId>),
    /// `None` splits the alive nodes at random.
    Partition(Option<(Vec<NodeId>, Vec<NodeId>)>),
    Heal,
    Latency(LatencyChange),
    Drop(f64),
    Speed(f64),
    /// `None` submits the next numbered request.
    Submit(Option<String>),
    Burst(usize),
    Commit(u64),
    Reset,
    Help,
    Exit,
}

fn parse_arg<T: FromStr>(name: &'static str, value: &str) -> Result<T, CommandError> {
    value.parse().map_err(|_| CommandError::InvalidArgument {
        name,
        value: value.to_string(),
    })
}

fn parse_opt<T: FromStr>(name: &'static str, value: Option<&str>) -> Result<Option<T>, CommandError> {
    value.map(|v| parse_arg(name, v)).transpose()
}

fn parse_group(value: &str) -> Result<Vec<NodeId>, CommandError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_arg("node id", s))
        .collect()
}

fn parse_groups(value: &str) -> Result<(Vec<NodeId>, Vec<NodeId>), CommandError> {
    let (a, b) = value.split_once('|').ok_or(CommandError::InvalidArgument {
        name: "partition",
        value: value.to_string(),
    })?;
    Ok((parse_group(a)?, parse_group(b)?))
}

fn parse_latency(value: &str) -> Result<LatencyChange, CommandError> {
    match value.strip_prefix('+') {
        Some("") => Ok(LatencyChange::Add(None)),
        Some(amount) => Ok(LatencyChange::Add(Some(parse_arg("latency", amount)?))),
        None => Ok(LatencyChange::Set(parse_arg("latency", value)?)),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let arg = if rest.is_empty() { None } else { Some(rest) };

        let command = match word.to_ascii_lowercase().as_str() {
            "status" | "stats" => Command::Status,
            "nodes" => Command::Nodes,
            "node" => Command::Node(parse_arg("node id", arg.ok_or(CommandError::MissingArgument("node id"))?)?),
            "messages" => Command::Messages,
            "connections" => Command::Connections,
            "step" => Command::Step(parse_opt("duration", arg)?.unwrap_or(DEFAULT_STEP_MS)),
            "run" => Command::Run(parse_arg("duration", arg.ok_or(CommandError::MissingArgument("duration"))?)?),
            "kill" => Command::Kill(parse_opt("node id", arg)?),
            "revive" => Command::Revive(parse_opt("node id", arg)?),
            "add" => Command::Add,
            "remove" => Command::Remove(parse_opt("node id", arg)?),
            "partition" => Command::Partition(arg.map(parse_groups).transpose()?),
            "heal" => Command::Heal,
            "latency" => Command::Latency(parse_latency(arg.ok_or(CommandError::MissingArgument("latency"))?)?),
            "drop" => Command::Drop(parse_arg("drop rate", arg.ok_or(CommandError::MissingArgument("drop rate"))?)?),
            "speed" => Command::Speed(parse_arg("speed", arg.ok_or(CommandError::MissingArgument("speed"))?)?),
            "submit" => Command::Submit(arg.map(str::to_string)),
            "burst" => Command::Burst(parse_opt("count", arg)?.unwrap_or(DEFAULT_BURST)),
            "commit" => Command::Commit(parse_arg("index", arg.ok_or(CommandError::MissingArgument("index"))?)?),
            "reset" => Command::Reset,
            "help" | "?" => Command::Help,
            "exit" | "quit" => Command::Exit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

pub const HELP: &str = "\
Commands:
  status                 one-line cluster statistics
  nodes                  every node as JSON
  node <id>              one node with its log
  messages               in-flight messages
  connections            pairs of nodes that can talk
  step [ms]              advance simulated time (default 100ms)
  run <ms>               advance in 100ms steps, printing status each second
  kill [id]              kill a node (random when omitted)
  revive [id]            revive a node (all when omitted)
  add                    add a node
  remove [id]            remove a node (highest id when omitted)
  partition [a,b|c,d]    split two groups (random halves when omitted)
  heal                   clear all partitions
  latency <ms> | +[ms]   set or raise the network latency
  drop <rate>            set the drop probability
  speed <multiplier>     set the simulation speed
  submit [command]       send a client command to the leader
  burst [n]              send n numbered requests (default 5)
  commit <index>         commit the leader's log through index
  reset                  reset every node and the network
  exit                   quit";
