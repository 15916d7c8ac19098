//! rendezvous-ctl — command-line interface for the rendezvous relay.

use anyhow::{Context, Result};

mod cmd;

use cmd::claim::cmd_login_claim;
use cmd::status::{cmd_overlay, cmd_peers, cmd_status};

const DEFAULT_PORT: u16 = 3000;

fn print_usage() {
    println!("Usage: rendezvous-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                              Show relay status");
    println!("  peers                               List bound addresses");
    println!("  overlay                             Show overlay links and joined topics");
    println!("  login-claim <private-key> [challenge]");
    println!("                                      Print a signed login frame");
    println!();
    println!("Options:");
    println!("  --port <port>   Relay port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(port).await,
        ["peers"] => cmd_peers(port).await,
        ["overlay"] => cmd_overlay(port).await,
        ["login-claim", key] => cmd_login_claim(key, None),
        ["login-claim", key, challenge] => cmd_login_claim(key, Some(*challenge)),
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }
}
