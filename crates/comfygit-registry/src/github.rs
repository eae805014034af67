use url::Url;

/// Whether a package identifier is a Git URL rather than a registry id.
pub fn is_git_url(identifier: &str) -> bool {
    identifier.starts_with("https://github.com/")
        || identifier.starts_with("http://github.com/")
        || identifier.starts_with("git@github.com:")
        || identifier.starts_with("ssh://git@github.com/")
}

/// Canonicalize a GitHub URL to `https://github.com/<owner>/<repo>`.
///
/// Repos can generally be accessed with or without the `.git` extension;
/// only a single trailing `.git` is stripped, so a `.git` appearing
/// mid-path survives. SSH forms are rewritten to HTTPS. Anything that is
/// not recognizably GitHub is returned unchanged (minus the extension).
pub fn normalize_github_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    // SSH: git@github.com:owner/repo(.git)
    if let Some(path) = url.strip_prefix("git@github.com:") {
        return format!("https://github.com/{}", strip_git_suffix(path));
    }
    // SSH: ssh://git@github.com/owner/repo(.git)
    if let Some(path) = url.strip_prefix("ssh://git@github.com/") {
        return format!("https://github.com/{}", strip_git_suffix(path));
    }

    let stripped = strip_git_suffix(url);
    let Ok(parsed) = Url::parse(stripped) else {
        return stripped.to_string();
    };
    if matches!(parsed.host_str(), Some("github.com" | "www.github.com")) {
        let mut segments = parsed.path().trim_matches('/').split('/');
        if let (Some(owner), Some(repo)) = (segments.next(), segments.next()) {
            if !owner.is_empty() && !repo.is_empty() {
                return format!("https://github.com/{owner}/{repo}");
            }
        }
    }
    stripped.to_string()
}

fn strip_git_suffix(url: &str) -> &str {
    url.strip_suffix(".git").unwrap_or(url)
}
