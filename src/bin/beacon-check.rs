use anyhow::{Context, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};
use clap::{Parser, Subcommand};
use beacon::config::Config;
use beacon::relay::filter;
use beacon::relay::IncomingRequestView;

#[derive(Parser)]
#[command(name = "beacon-check")]
#[command(about = "Inspect the forwarder configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration loaded from the environment
    Config,
    /// Show whether a request would be relayed or dropped
    Filter {
        /// Request path, e.g. /assets/logo.svg
        path: String,
        /// Value of the client IP header
        #[arg(long)]
        ip: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            println!("{}", config.relay);
            println!("listen:            {}:{}", config.server.host, config.server.port);
            println!("shutdown grace:    {}s", config.shutdown_grace.as_secs());
            if config.relay.skip_filtering() {
                println!("⚠ No filters configured, every request will be relayed");
            }
        }
        Commands::Filter { path, ip } => {
            let uri: Uri = path
                .parse()
                .with_context(|| format!("'{path}' is not a valid request path"))?;

            let mut headers = HeaderMap::new();
            if let Some(ip) = ip {
                let value = HeaderValue::from_str(&ip)
                    .with_context(|| format!("'{ip}' is not a valid header value"))?;
                let name = HeaderName::from_bytes(config.relay.ip_header.as_bytes())
                    .context("IP_HEADER is not a valid header name")?;
                headers.insert(name, value);
            }

            let request = IncomingRequestView::from_parts(&uri, &headers, &config.relay.ip_header);
            let decision = filter::decide(&config.relay, &request);
            let mark = if decision.is_forward() { "✓" } else { "✗" };
            println!("{mark} {path}: {decision}");
        }
    }

    Ok(())
}
