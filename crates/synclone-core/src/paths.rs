use crate::model::ProviderKind;
use std::path::{Path, PathBuf};

pub fn repo_path(target: &Path, repo: &str) -> PathBuf {
    target.join(sanitize_component(repo))
}

/// `{provider}_{organization}.json`, with path separators in nested group
/// names flattened.
pub fn state_file_name(provider: ProviderKind, organization: &str) -> String {
    format!(
        "{}_{}.json",
        provider.as_prefix(),
        sanitize_component(organization)
    )
}

pub fn state_file_path(state_dir: &Path, provider: ProviderKind, organization: &str) -> PathBuf {
    state_dir.join(state_file_name(provider, organization))
}

fn sanitize_component(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();
    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_path_joins_target() {
        assert_eq!(
            repo_path(Path::new("/srv/mirror"), "api"),
            PathBuf::from("/srv/mirror").join("api")
        );
    }

    #[test]
    fn sanitizes_repo_name() {
        assert_eq!(
            repo_path(Path::new("/tmp"), "name/with\\slash"),
            PathBuf::from("/tmp").join("name_with_slash")
        );
        assert_eq!(
            repo_path(Path::new("/tmp"), "bad:repo*name?."),
            PathBuf::from("/tmp").join("bad_repo_name_")
        );
    }

    #[test]
    fn state_file_name_flattens_groups() {
        assert_eq!(state_file_name(ProviderKind::GitHub, "acme"), "github_acme.json");
        assert_eq!(
            state_file_name(ProviderKind::GitLab, "group/sub"),
            "gitlab_group_sub.json"
        );
    }
}
