//! coapline command-line client.
//!
//! Issues a single request (or drives an observe stream) against a CoAP
//! server reachable over UDP or a SlipMux serial line.

use clap::Parser;
use coapline::{Client, ClientError, Config, Request, Response, Transport, UART_SCHEME, UDP_SCHEME};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

/// CoAP client for serial lines and UDP
#[derive(Parser, Debug)]
#[command(name = "coapline", version, about)]
struct Args {
    /// GET, POST, PUT, DELETE, PING or OBSERVE
    method: String,

    /// Request URL, e.g. coap+udp://127.0.0.1:5683/sensors/temp
    url: String,

    /// Request body (POST and PUT)
    #[arg(short, long)]
    body: Option<String>,

    /// Content format of the body (numeric; 0 = text/plain)
    #[arg(long, default_value_t = 0)]
    content_format: u64,

    /// Notifications to print before cancelling an observe
    #[arg(short = 'n', long, default_value_t = 4)]
    notifications: u32,

    /// Per-request timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn print_response(res: &Response) {
    info!(
        status = %res.status,
        token = %res.token,
        bytes = res.body.len(),
        "response"
    );
    if !res.body.is_empty() {
        println!("{}", res.body_string());
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let config = if let Some(path) = &args.config {
        match Config::load_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load configuration from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok((config, loaded)) => {
                for path in &loaded {
                    info!(path = %path.display(), "loaded config file");
                }
                config
            }
            Err(e) => {
                error!("failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    let url = match Url::parse(&args.url) {
        Ok(url) => url,
        Err(e) => {
            error!("invalid URL {}: {}", args.url, e);
            std::process::exit(1);
        }
    };

    let transport = match url.scheme() {
        UDP_SCHEME => Transport::udp(&config),
        UART_SCHEME => Transport::uart(&config),
        other => {
            error!(
                "unsupported scheme {:?}, expected {} or {}",
                other, UDP_SCHEME, UART_SCHEME
            );
            std::process::exit(1);
        }
    };

    let mut client = Client::new(transport);
    if let Some(secs) = args.timeout {
        client = client.with_timeout(std::time::Duration::from_secs(secs));
    }

    let outcome = match args.method.as_str() {
        "OBSERVE" => run_observe(&client, &args).await,
        "PING" => match client.ping(&args.url).await {
            Ok(()) => {
                info!(url = %args.url, "pong");
                Ok(())
            }
            Err(e) => Err(e),
        },
        method => {
            let request = Request::new(method, &args.url).map(|req| match &args.body {
                Some(body) => {
                    let mut req = req.with_body(body.as_bytes().to_vec());
                    req.options.set_uint(
                        coapline::OptionNumber::CONTENT_FORMAT,
                        args.content_format,
                    );
                    req
                }
                None => req,
            });
            match request {
                Ok(req) => client.execute(req).await.map(|res| print_response(&res)),
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = outcome {
        error!("request failed: {}", e);
        std::process::exit(1);
    }
}

/// Register an observation, print the stream, cancel on count or Ctrl-C.
async fn run_observe(client: &Client, args: &Args) -> Result<(), ClientError> {
    let mut res = client.observe(&args.url).await?;
    print_response(&res);

    let mut remaining = args.notifications;
    while remaining > 0 {
        tokio::select! {
            next = res.next() => match next {
                Some(update) => {
                    print_response(&update);
                    remaining -= 1;
                }
                None => {
                    info!("observation ended by server");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, cancelling observe");
                break;
            }
        }
    }

    let cancel = client.cancel_observe(&res).await?;
    info!(status = %cancel.status, "observe cancelled");
    Ok(())
}
