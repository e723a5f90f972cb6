// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! A [`NodeConfig`] is assembled from defaults, then the ROS environment
//! variables, then command-line remapping arguments:
//!
//! | argument          | effect                               |
//! |-------------------|--------------------------------------|
//! | `__name:=n`       | node base name                       |
//! | `__ns:=/ns`       | node namespace                       |
//! | `__master:=uri`   | master URI                           |
//! | `__hostname:=h`   | advertised host                      |
//! | `__ip:=a.b.c.d`   | advertised host (if no `__hostname`) |
//! | `__log:=dir`      | log directory                        |
//! | `_key:=value`     | private parameter (JSON or string)   |
//! | `from:=to`        | name remap                           |

use crate::error::{Error, Result};
use crate::names;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Separator between the two sides of a remapping argument.
pub const REMAP: &str = ":=";

/// Master URI used when neither `ROS_MASTER_URI` nor `__master` is given.
pub const DEFAULT_MASTER_URI: &str = "http://localhost:11311";

/// Command-line arguments split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedArgs {
    pub remapping: HashMap<String, String>,
    /// Private parameters, keyed without the leading `_`.
    pub params: BTreeMap<String, String>,
    /// `__`-prefixed specials, keyed with the prefix.
    pub specials: HashMap<String, String>,
    /// Arguments that are not `key:=value`.
    pub rest: Vec<String>,
}

/// Split `args` into remaps, private params, specials and the rest.
pub fn process_arguments<I, S>(args: I) -> ProcessedArgs
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = ProcessedArgs::default();
    for arg in args {
        let arg = arg.as_ref();
        let parts: Vec<&str> = arg.split(REMAP).collect();
        let [key, value] = parts[..] else {
            out.rest.push(arg.to_string());
            continue;
        };

        if key.starts_with("__") {
            out.specials.insert(key.to_string(), value.to_string());
        } else if let Some(param) = key.strip_prefix('_') {
            out.params.insert(param.to_string(), value.to_string());
        } else {
            out.remapping.insert(key.to_string(), value.to_string());
        }
    }
    out
}

/// Transport tuning shared by publishers, subscribers and services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Per-session outbound queue capacity (drop-oldest beyond it).
    pub queue_capacity: usize,
    /// Session flush timer period; one queued payload is written per tick.
    pub flush_interval: Duration,
    /// Write deadline for one flush attempt.
    pub write_deadline: Duration,
    /// Capacity of a publisher's inbound command channel.
    pub publisher_channel_capacity: usize,
    /// Capacity of the node job queue.
    pub job_queue_capacity: usize,
    /// How long `spin_once` waits for a job.
    pub spin_once_timeout: Duration,
    /// Liveness re-check period of `spin`.
    pub spin_timeout: Duration,
    /// Bound on each socket operation of a service call.
    pub service_tcp_timeout: Duration,
    /// Timeout for XML-RPC calls to the master and peers.
    pub rpc_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            flush_interval: Duration::from_millis(10),
            write_deadline: Duration::from_millis(10),
            publisher_channel_capacity: 1024,
            job_queue_capacity: 100,
            spin_once_timeout: Duration::from_millis(10),
            spin_timeout: Duration::from_secs(1),
            service_tcp_timeout: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("queue_capacity", self.queue_capacity),
            ("publisher_channel_capacity", self.publisher_channel_capacity),
            ("job_queue_capacity", self.job_queue_capacity),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(Error::Config(format!("{} cannot be 0", field)));
            }
        }

        let durations = [
            ("flush_interval", self.flush_interval),
            ("write_deadline", self.write_deadline),
            ("spin_once_timeout", self.spin_once_timeout),
            ("spin_timeout", self.spin_timeout),
            ("service_tcp_timeout", self.service_tcp_timeout),
            ("rpc_timeout", self.rpc_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{} cannot be 0", field)));
            }
        }
        Ok(())
    }
}

/// Everything a node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Base name (no namespace).
    pub name: String,
    /// Normalized namespace, `/` at the root.
    pub namespace: String,
    pub master_uri: String,
    /// Host advertised in slave and TCPROS URIs.
    pub hostname: String,
    /// Address listeners bind to.
    pub listen_ip: IpAddr,
    pub home_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Raw remaps; resolved against the node namespace at startup.
    pub remapping: HashMap<String, String>,
    /// Private parameters pushed to the master at startup.
    pub params: BTreeMap<String, serde_json::Value>,
    pub non_ros_args: Vec<String>,
    pub transport: TransportConfig,
}

impl NodeConfig {
    /// Build from `name` and process arguments, reading the real environment.
    pub fn from_args<I, S>(name: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_args_with_env(name, args, |key| std::env::var(key).ok())
    }

    /// Same as [`from_args`](Self::from_args) with an injected environment.
    pub fn from_args_with_env<I, S, E>(name: &str, args: I, env: E) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        E: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());
        let (namespace, base_name) = names::qualify_node_name(name)?;
        let args = process_arguments(args);

        let home_dir = env("ROS_HOME").map(PathBuf::from).unwrap_or_else(|| {
            env("HOME")
                .map(PathBuf::from)
                .unwrap_or_default()
                .join(".ros")
        });

        let name = args
            .specials
            .get("__name")
            .cloned()
            .unwrap_or(base_name);

        let namespace = args
            .specials
            .get("__ns")
            .cloned()
            .or_else(|| env("ROS_NAMESPACE"))
            .map(|ns| names::normalize_namespace(&ns))
            .unwrap_or(namespace);

        let log_dir = args
            .specials
            .get("__log")
            .cloned()
            .or_else(|| env("ROS_LOG_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join("log"));

        let (hostname, only_localhost) = if let Some(host) = args.specials.get("__hostname") {
            (host.clone(), host == "localhost")
        } else if let Some(ip) = args.specials.get("__ip") {
            (ip.clone(), is_loopback_literal(ip))
        } else {
            determine_host(&env)
        };

        let master_uri = args
            .specials
            .get("__master")
            .cloned()
            .or_else(|| env("ROS_MASTER_URI"))
            .unwrap_or_else(|| DEFAULT_MASTER_URI.to_string());

        let params = args
            .params
            .into_iter()
            .map(|(k, v)| (k, parse_param_value(&v)))
            .collect();

        let config = Self {
            name,
            namespace,
            master_uri,
            hostname,
            listen_ip: listen_ip_for(only_localhost),
            home_dir,
            log_dir,
            remapping: args.remapping,
            params,
            non_ros_args: args.rest,
            transport: TransportConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Fully qualified node name, e.g. `/ns/talker`.
    pub fn qualified_name(&self) -> String {
        names::join(&self.namespace, &self.name)
    }

    pub fn with_master_uri(mut self, uri: impl Into<String>) -> Self {
        self.master_uri = uri.into();
        self
    }

    /// Override the advertised host; loopback hosts also bind loopback only.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        let only_localhost = self.hostname == "localhost" || is_loopback_literal(&self.hostname);
        self.listen_ip = listen_ip_for(only_localhost);
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = names::normalize_namespace(namespace);
        self
    }

    pub fn with_remap(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.remapping.insert(from.into(), to.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("node name cannot be empty".into()));
        }
        if !(self.master_uri.starts_with("http://") || self.master_uri.starts_with("https://")) {
            return Err(Error::Config(format!(
                "master URI must be http(s): {}",
                self.master_uri
            )));
        }
        if self.hostname.is_empty() {
            return Err(Error::Config("hostname cannot be empty".into()));
        }
        self.transport.validate()
    }
}

/// JSON if it parses, plain string otherwise.
pub fn parse_param_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn is_loopback_literal(host: &str) -> bool {
    host == "::1" || host.starts_with("127.")
}

fn listen_ip_for(only_localhost: bool) -> IpAddr {
    if only_localhost {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
}

/// Host to advertise and whether it is reachable only locally.
///
/// `ROS_HOSTNAME` wins over `ROS_IP`; without either the first
/// non-loopback local address is used.
fn determine_host(env: &impl Fn(&str) -> Option<String>) -> (String, bool) {
    if let Some(host) = env("ROS_HOSTNAME") {
        let local = host == "localhost";
        return (host, local);
    }
    if let Some(ip) = env("ROS_IP") {
        let local = is_loopback_literal(&ip);
        return (ip, local);
    }
    match local_ip_address::local_ip() {
        Ok(ip) if !ip.is_loopback() => (ip.to_string(), false),
        _ => ("localhost".to_string(), true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_process_arguments() {
        let args = process_arguments([
            "chatter:=/talk",
            "_rate:=10",
            "__name:=talker2",
            "--verbose",
            "a:=b:=c",
        ]);
        assert_eq!(args.remapping.get("chatter").map(String::as_str), Some("/talk"));
        assert_eq!(args.params.get("rate").map(String::as_str), Some("10"));
        assert_eq!(args.specials.get("__name").map(String::as_str), Some("talker2"));
        assert_eq!(args.rest, ["--verbose", "a:=b:=c"]);
    }

    #[test]
    fn test_specials_override_environment() {
        let env = env_from(&[
            ("ROS_MASTER_URI", "http://master:11311"),
            ("ROS_NAMESPACE", "/env_ns"),
            ("ROS_HOSTNAME", "robot.local"),
            ("HOME", "/home/ros"),
        ]);
        let config = NodeConfig::from_args_with_env(
            "talker",
            ["__ns:=/cli_ns", "__ip:=127.0.0.1", "__master:=http://other:11311"],
            env,
        )
        .unwrap();

        assert_eq!(config.namespace, "/cli_ns");
        assert_eq!(config.qualified_name(), "/cli_ns/talker");
        assert_eq!(config.master_uri, "http://other:11311");
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.log_dir, PathBuf::from("/home/ros/.ros/log"));
    }

    #[test]
    fn test_environment_defaults() {
        let env = env_from(&[
            ("ROS_HOME", "/var/ros"),
            ("ROS_NAMESPACE", "robot"),
            ("ROS_HOSTNAME", "robot.local"),
        ]);
        let config = NodeConfig::from_args_with_env("talker", Vec::<String>::new(), env).unwrap();
        assert_eq!(config.namespace, "/robot");
        assert_eq!(config.master_uri, DEFAULT_MASTER_URI);
        assert_eq!(config.hostname, "robot.local");
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.log_dir, PathBuf::from("/var/ros/log"));
    }

    #[test]
    fn test_ros_ip_loopback_binds_localhost() {
        let env = env_from(&[("ROS_IP", "127.0.0.1")]);
        let config = NodeConfig::from_args_with_env("n", ["__log:=/tmp/logs"], env).unwrap();
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
    }

    #[test]
    fn test_param_values_parse_as_json() {
        let env = env_from(&[("ROS_HOSTNAME", "localhost")]);
        let config = NodeConfig::from_args_with_env(
            "n",
            ["_rate:=10", "_name:=camera", "_gains:=[1.5, 2]", "_on:=true"],
            env,
        )
        .unwrap();
        assert_eq!(config.params["rate"], serde_json::json!(10));
        assert_eq!(config.params["name"], serde_json::json!("camera"));
        assert_eq!(config.params["gains"], serde_json::json!([1.5, 2]));
        assert_eq!(config.params["on"], serde_json::json!(true));
    }

    #[test]
    fn test_validation() {
        let env = env_from(&[("ROS_HOSTNAME", "localhost")]);
        assert!(matches!(
            NodeConfig::from_args_with_env("n", ["__master:=localhost:11311"], &env),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            NodeConfig::from_args_with_env("", Vec::<String>::new(), &env),
            Err(Error::InvalidName(_))
        ));

        let transport = TransportConfig {
            queue_capacity: 0,
            ..TransportConfig::default()
        };
        assert!(transport.validate().is_err());
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn test_with_hostname_updates_listen_ip() {
        let env = env_from(&[("ROS_HOSTNAME", "localhost")]);
        let config = NodeConfig::from_args_with_env("n", Vec::<String>::new(), env)
            .unwrap()
            .with_hostname("10.0.0.5");
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
