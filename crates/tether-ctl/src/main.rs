//! tether-ctl — command-line interface for the Tether daemon.

mod cmd;

use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9101;
const DEFAULT_TARGET: &str = "edge";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn print_usage() {
    println!("tether-ctl — Tether daemon control");
    println!();
    println!("USAGE:");
    println!("  tether-ctl [--port <port>] [--target <id>] [--timeout <secs>] <command>");
    println!();
    println!("COMMANDS:");
    println!("  status                     Daemon status and registered methods");
    println!("  call <method> [json]       Chunked method call, prints the result");
    println!("  http <METHOD> <url> [body] HTTP request through the tunnel");
    println!("  help                       Show this message");
    println!();
    println!("OPTIONS:");
    println!("  --port <port>              API port (default {})", DEFAULT_PORT);
    println!("  --target <id>              Target id (default {})", DEFAULT_TARGET);
    println!("  --timeout <secs>           Call timeout (default {})", DEFAULT_TIMEOUT_SECS);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut target = DEFAULT_TARGET.to_string();
    let mut timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--target" => {
                i += 1;
                target = args.get(i).context("--target requires a value")?.clone();
            }
            "--timeout" => {
                i += 1;
                let secs: u64 = args
                    .get(i)
                    .context("--timeout requires a value")?
                    .parse()
                    .context("--timeout must be a number of seconds")?;
                timeout = Duration::from_secs(secs);
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["call", method] => cmd::call::cmd_call(port, &target, method, None, timeout).await,
        ["call", method, json] => {
            cmd::call::cmd_call(port, &target, method, Some(*json), timeout).await
        }
        ["http", method, url] => {
            cmd::tunnel::cmd_http(port, &target, method, url, None, timeout).await
        }
        ["http", method, url, body] => {
            cmd::tunnel::cmd_http(port, &target, method, url, Some(*body), timeout).await
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
