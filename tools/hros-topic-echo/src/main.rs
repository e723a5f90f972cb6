// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hros-topic-echo - Echo ROS1 topic messages in real-time
//!
//! Like `rostopic echo`, but without message introspection: payloads are
//! printed as hex or as a best-effort text decode.

use chrono::Local;
use clap::Parser;
use colored::*;
use hros::logging::{self, LogLevel};
use hros::{MessageEvent, MessageType, Node};
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Echo ROS1 topic messages in real-time
#[derive(Parser, Debug)]
#[command(name = "hros-topic-echo")]
#[command(version)]
#[command(about = "Echo ROS1 topic messages (like rostopic echo)")]
struct Args {
    /// Topic name to subscribe to
    topic: String,

    /// Message type, e.g. std_msgs/String
    #[arg(short, long = "type")]
    msg_type: String,

    /// MD5 sum of the message type
    #[arg(short = 's', long)]
    md5sum: String,

    /// Maximum number of messages to receive (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Output format: hex, text
    #[arg(short, long, default_value = "hex")]
    format: OutputFormat,

    /// Master URI (defaults to ROS_MASTER_URI)
    #[arg(long)]
    master: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: LogLevel,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// ROS arguments (name remaps, __ns:=, __ip:=, ...)
    #[arg(trailing_var_arg = true)]
    ros_args: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum OutputFormat {
    Hex,
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hex" | "h" | "raw" => Ok(OutputFormat::Hex),
            "text" | "t" => Ok(OutputFormat::Text),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.log_level);

    if args.no_color || !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Err(e) = run_echo(&args).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_echo(args: &Args) -> hros::Result<()> {
    let mut ros_args = args.ros_args.clone();
    if let Some(master) = &args.master {
        ros_args.push(format!("__master:={}", master));
    }
    let node = Node::new("hros_topic_echo", ros_args).await?;

    let received = Arc::new(AtomicU64::new(0));
    let max_messages = args.count;
    let format = args.format;
    let counter = Arc::clone(&received);
    let msg_type = MessageType::new(args.msg_type.as_str(), args.md5sum.as_str(), "");

    let subscription = node
        .subscribe_raw(&args.topic, msg_type, move |payload, event| {
            let seq = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if max_messages > 0 && seq > max_messages {
                return;
            }
            print_message(payload, event, format, seq);
            let _ = io::stdout().flush();
        })
        .await?;

    eprintln!(
        "{} {} {} (type={}, format={:?})",
        ">>>".green().bold(),
        "Subscribing to".bold(),
        subscription.topic().cyan(),
        args.msg_type,
        format
    );
    eprintln!("{}", "Press Ctrl+C to stop".dimmed());
    eprintln!();

    while node.ok() {
        if max_messages > 0 && received.load(Ordering::SeqCst) >= max_messages {
            break;
        }
        node.spin_once().await;
    }

    node.shutdown().await;
    let total = received.load(Ordering::SeqCst);
    let total = if max_messages > 0 {
        total.min(max_messages)
    } else {
        total
    };
    eprintln!("\n{} Received {} message(s)", "---".dimmed(), total);
    Ok(())
}

fn print_message(payload: &[u8], event: &MessageEvent, format: OutputFormat, seq: u64) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    println!(
        "{} {} from {} ({} bytes)",
        format!("[{}]", timestamp).dimmed(),
        format!("#{}", seq).yellow(),
        event.publisher_name.cyan(),
        payload.len()
    );

    match format {
        OutputFormat::Hex => print_hex_dump(payload),
        OutputFormat::Text => print_text(payload),
    }
    println!();
}

fn print_text(payload: &[u8]) {
    match try_decode_string(payload) {
        Some(s) => println!("  {}: {}", "string".cyan(), s.green()),
        None => println!("  {}", String::from_utf8_lossy(payload)),
    }
}

/// A payload that is exactly one length-prefixed string.
fn try_decode_string(data: &[u8]) -> Option<String> {
    let prefix: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let len = u32::from_le_bytes(prefix) as usize;
    if 4 + len != data.len() {
        return None;
    }
    let s = std::str::from_utf8(&data[4..]).ok()?;
    s.chars()
        .all(|c| !c.is_control() || c.is_ascii_whitespace())
        .then(|| format!("\"{}\"", s))
}

fn print_hex_dump(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        print!("  {:04x}  ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            if j == 8 {
                print!(" ");
            }
            print!("{:02x} ", byte);
        }

        for j in chunk.len()..16 {
            if j == 8 {
                print!(" ");
            }
            print!("   ");
        }

        print!(" |");
        for byte in chunk {
            print!(
                "{}",
                if (0x20..0x7f).contains(byte) {
                    *byte as char
                } else {
                    '.'
                }
            );
        }
        println!("|");
    }
}
