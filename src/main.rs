//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `gemclient` library that handles:
//! - Command-line argument parsing
//! - Logger initialization
//! - User-facing output formatting
//!
//! All core functionality is implemented in the library crate.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use tokio::io::AsyncWriteExt;
use url::Url;

use gemclient::{
    init_crypto_provider, status_description, Config, FetchContext, LoadOutcome, TrustStore,
};

#[derive(Parser, Debug)]
#[command(name = "gemclient", about = "Fetch and render a Gemini page", version)]
struct Args {
    /// Address to fetch. A bare hostname is treated as a gemini:// URL.
    url: String,

    /// Path to the TOFU trust store. Defaults to
    /// `<data dir>/gemclient/known_hosts.toml`.
    #[arg(long)]
    trust_file: Option<PathBuf>,

    /// On a certificate mismatch, overwrite the stored trust record and
    /// continue instead of aborting.
    #[arg(long)]
    trust_override: bool,

    /// Increase log verbosity (-v: info, -vv: debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    config: Config,
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn default_trust_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gemclient")
        .join("known_hosts.toml")
}

/// Picks a file name for a downloaded response from the last URL path
/// segment.
fn download_file_name(url: &str) -> String {
    let fallback = "download".to_string();
    match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(|s| s.to_string())
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);
    init_crypto_provider();

    let trust_file = args.trust_file.clone().unwrap_or_else(default_trust_file);
    let trust = Arc::new(
        TrustStore::load(&trust_file)
            .with_context(|| format!("failed to open trust store {}", trust_file.display()))?,
    );
    let ctx = Arc::new(FetchContext::new(Arc::new(args.config.clone()), trust));

    // Kick off the favicon fetch alongside the page load
    if args.config.emoji_favicons {
        if let Ok(parsed) = Url::parse(&gemclient::normalize_url(&args.url)) {
            if let Some(host) = parsed.host_str() {
                ctx.spawn_favicon(host);
            }
        }
    }

    let handle = ctx.spawn_load(&args.url);
    let mut result = handle.await.context("fetch task panicked")?;

    // One retry after an explicit override of a trust violation
    if args.trust_override {
        let mismatch = match &result {
            Ok((_, LoadOutcome::TrustMismatch { response, host, port, .. })) => {
                Some((host.clone(), *port, response.cert.as_ref().to_vec()))
            }
            _ => None,
        };
        if let Some((host, port, cert)) = mismatch {
            ctx.trust_store().reset(&host, port, &cert);
            eprintln!("trust record for {host} overwritten");
            result = ctx.load(&args.url).await;
        }
    }

    match result {
        Ok((url, LoadOutcome::Page(page))) => {
            if args.config.emoji_favicons {
                if let Ok(parsed) = Url::parse(&url) {
                    if let Some(favicon) = ctx.favicons.get(parsed.host_str().unwrap_or("")) {
                        if favicon != gemclient::KNOWN_NO_FAVICON {
                            println!("{favicon} {url}");
                        }
                    }
                }
            }
            print!("{}", page.content);
            if !page.links.is_empty() {
                println!();
                for (i, link) in page.links.iter().enumerate() {
                    println!("[{}] {}", i + 1, link);
                }
            }
            Ok(())
        }
        Ok((url, LoadOutcome::TrustMismatch { host, expiry, .. })) => {
            eprintln!("gemclient: certificate for {host} has changed before its expiry");
            if let Some(expiry) = expiry {
                eprintln!("the stored certificate was valid until {expiry}");
            }
            eprintln!("re-run with --trust-override to accept the new certificate for {url}");
            process::exit(1);
        }
        Ok((url, LoadOutcome::Input { prompt, sensitive })) => {
            let kind = if sensitive { "sensitive input" } else { "input" };
            println!("{url} requests {kind}: {prompt}");
            println!("append your answer as a query string, e.g. {url}?answer");
            Ok(())
        }
        Ok((_, LoadOutcome::RedirectPrompt { target, permanent })) => {
            let kind = if permanent { "permanently " } else { "" };
            println!("page {kind}redirects to {target}");
            println!("re-run against that address, or pass --auto-redirect");
            Ok(())
        }
        Ok((url, LoadOutcome::Download { mut response, reason })) => {
            let name = download_file_name(&url);
            let mut file = tokio::fs::File::create(&name)
                .await
                .with_context(|| format!("failed to create {name}"))?;
            let bytes = tokio::io::copy(&mut response.body, &mut file)
                .await
                .context("download failed")?;
            file.flush().await?;
            eprintln!("not displaying page ({reason:?}); saved {bytes} bytes to {name}");
            Ok(())
        }
        Ok((url, LoadOutcome::Failed { status, meta })) => {
            eprintln!(
                "gemclient: {url}: {} ({status}): {meta}",
                status_description(status)
            );
            process::exit(1);
        }
        Ok((_, LoadOutcome::External { url })) => {
            println!("{url} is not a Gemini URL; open it in the appropriate program");
            Ok(())
        }
        Err(e) => {
            eprintln!("gemclient error: {e:#}");
            process::exit(1);
        }
    }
}
