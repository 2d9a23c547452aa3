use clap::Parser;
use std::path::PathBuf;
use taillib::config::{default_cookie_jar, DEFAULT_POLL_INTERVAL, DEFAULT_USER_AGENT};
use taillib::types::Port;
use taillib::{Config, Credentials, RunFilters};

/// Look for an active workflow run for COMMIT_SHA (optionally narrowed down by
/// workflow name and/or ref) and tail the logs of all of its jobs.
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct ArgParser {
    /// Full 40 character commit sha that triggered the workflow
    #[clap(parse(try_from_str = self::commit_sha))]
    pub commit_sha: String,

    /// GitHub personal access token
    #[clap(long, env = "RUNTAIL_GH_PAT", hide_env_values = true)]
    pub gh_pat: String,

    /// GitHub username (for web auth)
    #[clap(long, env = "RUNTAIL_GH_USER")]
    pub gh_user: String,

    /// GitHub password (for web auth)
    #[clap(long, env = "RUNTAIL_GH_PASS", hide_env_values = true)]
    pub gh_pass: String,

    /// GitHub OTP (for web auth)
    #[clap(long, env = "RUNTAIL_GH_OTP", hide_env_values = true)]
    pub gh_otp: Option<String>,

    /// Look for workflows with this particular name
    #[clap(short = 'w', long = "workflow")]
    pub workflow_name: Option<String>,

    /// Look for workflows triggered by this ref, e.g. 'refs/heads/main'
    #[clap(short = 'r', long)]
    pub ref_name: Option<String>,

    /// Repository as owner/name; guessed from the git remotes when omitted
    #[clap(short = 'R', long)]
    pub repo: Option<String>,

    /// Proxy port [default: first free port in 8100-8500]
    #[clap(long, env = "RUNTAIL_PORT")]
    pub port: Option<Port>,

    /// Run the browser headless
    #[clap(long, env = "RUNTAIL_HEADLESS", default_value = "true", parse(try_from_str))]
    pub headless: bool,

    /// Chromium executable
    #[clap(long, default_value = "chromium", parse(from_os_str))]
    pub chromium: PathBuf,

    /// mitmdump executable
    #[clap(long, default_value = "mitmdump", parse(from_os_str))]
    pub mitmdump: PathBuf,

    /// User agent for the browser and the live log connections
    #[clap(long)]
    pub user_agent: Option<String>,

    /// Log what is going on to stderr
    #[clap(long, env = "RUNTAIL_DEBUG")]
    pub debug: bool,
}

impl ArgParser {
    pub fn filters(&self) -> RunFilters {
        RunFilters {
            commit_sha: self.commit_sha.clone(),
            workflow_name: self.workflow_name.clone(),
            ref_name: self.ref_name.clone(),
        }
    }

    pub fn config(&self, port: Port) -> Config {
        Config {
            credentials: Credentials {
                user: self.gh_user.clone(),
                password: self.gh_pass.clone(),
                otp: self.gh_otp.clone(),
            },
            port,
            headless: self.headless,
            chromium: self.chromium.clone(),
            mitmdump: self.mitmdump.clone(),
            cookie_jar: default_cookie_jar(),
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// try_from_str parse function for the commit sha
fn commit_sha(s: &str) -> Result<String, String> {
    if s.len() != 40 {
        Err("need a full 40 character long commit sha".to_string())
    } else if s.chars().all(|c| c == '0') {
        Err("refusing to work with the all-zero commit sha".to_string())
    } else {
        Ok(s.to_string())
    }
}
