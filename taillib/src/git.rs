//! Guess the GitHub repository from the current checkout's remotes.

use crate::errors::{Result, TailError};
use std::collections::BTreeSet;
use tokio::process::Command;

const GH_REMOTE_MARKER: &str = "git@github.com";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitRemote {
    pub name: String,
    pub url: String,
}

async fn git(args: &[&str]) -> Result<String> {
    let output = Command::new("git").args(args).output().await?;
    if !output.status.success() {
        return Err(TailError::Git(format!(
            "`git {}` failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parse `git remote --verbose` output into unique (name, url) pairs.
pub fn parse_remotes(remotes: &str) -> Vec<GitRemote> {
    remotes
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(GitRemote {
                name: parts.next()?.to_string(),
                url: parts.next()?.to_string(),
            })
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// `git@github.com:owner/name.git` -> `owner/name`
pub fn github_repo(url: &str) -> Option<String> {
    let path = url.strip_prefix(GH_REMOTE_MARKER)?.strip_prefix(':')?;
    let repo = path.strip_suffix(".git")?;
    if repo.is_empty() || repo.contains('.') {
        return None;
    }
    Some(repo.to_string())
}

pub async fn guess_github_repo() -> Result<String> {
    let remotes = git(&["remote", "--verbose"]).await?;
    let remotes: Vec<_> = parse_remotes(&remotes)
        .into_iter()
        .filter(|remote| remote.url.contains(GH_REMOTE_MARKER))
        .collect();
    match remotes.as_slice() {
        [] => Err(TailError::Git("no remotes pointing to GitHub".into())),
        [remote] => github_repo(&remote.url).ok_or_else(|| {
            TailError::Git(format!(
                "failed to extract github repo from remote '{}'",
                remote.url
            ))
        }),
        many => Err(TailError::Git(format!(
            "too many remotes pointing to GitHub: {}",
            many.iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_dedups_remotes() {
        let out = "origin\tgit@github.com:foo/bar.git (fetch)\n\
                   origin\tgit@github.com:foo/bar.git (push)\n\
                   mirror\t/srv/git/bar (fetch)\n";
        assert_eq!(
            parse_remotes(out),
            vec![
                GitRemote {
                    name: "mirror".into(),
                    url: "/srv/git/bar".into()
                },
                GitRemote {
                    name: "origin".into(),
                    url: "git@github.com:foo/bar.git".into()
                },
            ]
        );
        assert!(parse_remotes("").is_empty());
    }

    #[test]
    fn extracts_repo() {
        assert_eq!(github_repo("git@github.com:foo/bar.git"), Some("foo/bar".into()));
        assert_eq!(github_repo("https://github.com/foo/bar.git"), None);
        assert_eq!(github_repo("git@github.com:foo/bar"), None);
        assert_eq!(github_repo("git@github.com:foo/b.r.git"), None);
    }
}
