mod arg_parser;

use arg_parser::ArgParser;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use taillib::git::guess_github_repo;
use taillib::github::{find_active_run, GithubClient};
use taillib::ports::{find_free_port, MAX_PORT, MIN_PORT};
use taillib::TailError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ArgParser::parse();
    init_tracing(args.debug);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("fatal: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "warn,taillib=debug,runtail=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: ArgParser) -> taillib::Result<bool> {
    let repo = match &args.repo {
        Some(repo) => repo.clone(),
        None => guess_github_repo().await?,
    };
    debug!("repo: {}", repo);
    let provider = Arc::new(GithubClient::new(&args.gh_pat, repo)?);

    let workflow_run = find_active_run(provider.as_ref(), &args.filters()).await?;
    info!("tailing {} ({})", workflow_run.name, workflow_run.html_url);

    let port = match args.port {
        Some(port) => port,
        None => find_free_port(MIN_PORT, MAX_PORT).ok_or(TailError::NoFreePort {
            min: MIN_PORT,
            max: MAX_PORT,
        })?,
    };
    let config = args.config(port);
    debug!("{:?}", config);

    let stop = CancellationToken::new();
    let interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, shutting down");
            interrupt.cancel();
        }
    });

    taillib::tail(&config, &workflow_run, provider, stop).await
}
