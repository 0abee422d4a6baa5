// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Naming and slug derivation.
//!
//! Single source of truth for every identifier that crosses a plane
//! boundary: bucket names, IAM role names, Kubernetes namespaces and Helm
//! release names. All functions are pure and total - invalid input yields a
//! typed error, never a partial result.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Bucket names: one or more dot-separated RFC-style labels. A label starts
/// with a letter (so IP-like names are impossible) and ends with a letter or
/// digit.
static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z][a-z0-9-]*[a-z0-9])(\.[a-z][a-z0-9-]*[a-z0-9])*$").unwrap()
});

/// Grant path sub-prefixes.
static GRANT_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_/*-]+$").unwrap());

static NON_DNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Derive an S3-safe slug from a bucket name: lowercase, underscores become
/// hyphens, then validate against the bucket naming rules.
pub fn bucket_slug(name: &str) -> Result<String, CoreError> {
    let slug = name.trim().to_lowercase().replace('_', "-");

    if slug.len() < 3 || slug.len() > 63 {
        return Err(CoreError::validation(
            "name",
            "must be between 3 and 63 characters",
        ));
    }
    if !BUCKET_NAME.is_match(&slug) {
        return Err(CoreError::validation(
            "name",
            "is invalid, check S3 bucket name restrictions (for example, can only \
             contain letters, digits, dots and hyphens)",
        ));
    }
    Ok(slug)
}

/// Check that a bucket name starts with the environment prefix.
pub fn ensure_env_prefix(env: &str, name: &str) -> Result<(), CoreError> {
    if !name.starts_with(&format!("{}-", env)) {
        return Err(CoreError::validation(
            "name",
            format!("must have correct env prefix e.g. {}-bucketname", env),
        ));
    }
    Ok(())
}

/// Validate grant path sub-prefixes. An empty list means the whole bucket.
pub fn validate_grant_paths(paths: &[String]) -> Result<(), CoreError> {
    for path in paths {
        if !GRANT_PATH.is_match(path) {
            return Err(CoreError::validation(
                "paths",
                format!("'{}' is not a valid path prefix", path),
            ));
        }
    }
    Ok(())
}

/// Sanitise a string into a DNS label: lowercase, runs of anything outside
/// `[a-z0-9]` collapse to a single hyphen, trimmed to start and end on an
/// alphanumeric, max 63 chars.
pub fn dns_label(s: &str) -> String {
    let label = s.to_lowercase();
    let label = NON_DNS.replace_all(&label, "-");
    let label = label.trim_matches('-');
    let label: String = label.chars().take(63).collect();
    label.trim_end_matches('-').to_string()
}

/// Extract the repository name from a repository URL: strip a trailing
/// slash and a `.git` suffix, then take the last path segment.
pub fn repo_name_from_url(url: &str) -> Result<String, CoreError> {
    let repo = url.trim_end_matches('/');
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    match repo.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(CoreError::validation(
            "repo_url",
            format!("'{}' is not a valid repository URL", url),
        )),
    }
}

/// Release name for a web app deployed from a repository.
pub fn webapp_release_name(repo_name: &str) -> String {
    let name = repo_name.to_lowercase();
    let name = NON_DNS.replace_all(&name, "-");
    let name = name.trim_matches('-');
    name.chars().take(50).collect()
}

/// IAM role name for a user: `{env}_user_{username lowercased}`.
pub fn user_role_name(env: &str, username: &str) -> String {
    format!("{}_user_{}", env, username.to_lowercase())
}

/// IAM role name for an app: `{env}_app_{slug}`.
pub fn app_role_name(env: &str, slug: &str) -> String {
    format!("{}_app_{}", env, slug)
}

/// Kubernetes namespace for a user: `user-{slug}`.
pub fn namespace_name(username: &str) -> String {
    format!("user-{}", dns_label(username))
}

/// Helm release name for a user's tool deployment, truncated to the
/// configured maximum.
pub fn release_name(chart_name: &str, username: &str, max_len: usize) -> String {
    let name = format!("{}-{}", chart_name, dns_label(username));
    name.chars().take(max_len).collect()
}

/// ARN for a resource in a (possibly regionless) service.
pub fn arn(service: &str, resource: &str, region: &str, account: &str) -> String {
    let service = service.to_lowercase();
    let region = match service.as_str() {
        "iam" | "s3" => "",
        _ => region,
    };
    format!("arn:aws:{}:{}:{}:{}", service, region, account, resource)
}

/// ARN for an S3 resource.
pub fn s3_arn(resource: &str) -> String {
    arn("s3", resource, "", "")
}

/// ARN for an IAM resource in the given account.
pub fn iam_arn(resource: &str, account: &str) -> String {
    arn("iam", resource, "", account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_slug_lowercases_and_replaces_underscores() {
        assert_eq!(bucket_slug("Test_Bucket_1").unwrap(), "test-bucket-1");
        assert_eq!(bucket_slug("test-bucket-1").unwrap(), "test-bucket-1");
        assert_eq!(bucket_slug("test.bucket").unwrap(), "test.bucket");
    }

    #[test]
    fn test_bucket_slug_output_satisfies_bucket_regex() {
        for name in ["alpha_beta", "Mixed_Case_Name", "a_b.c_d", "team-data_2024"] {
            let slug = bucket_slug(name).unwrap();
            assert!(BUCKET_NAME.is_match(&slug), "slug '{}' must validate", slug);
            assert!(slug.len() >= 3 && slug.len() <= 63);
        }
    }

    #[test]
    fn test_bucket_slug_rejects_invalid() {
        assert!(bucket_slug("ab").is_err());
        assert!(bucket_slug(&"a".repeat(64)).is_err());
        assert!(bucket_slug("1starts-with-digit").is_err());
        assert!(bucket_slug("ends-with-hyphen-").is_err());
        assert!(bucket_slug("double..dot").is_err());
        assert!(bucket_slug("has space").is_err());
    }

    #[test]
    fn test_env_prefix_rejection_mentions_prefix() {
        let err = ensure_env_prefix("test", "foo-bucket").unwrap_err();
        assert!(err.to_string().contains("test-"), "got: {}", err);
        assert!(ensure_env_prefix("test", "test-bucket-1").is_ok());
    }

    #[test]
    fn test_env_prefix_requires_separator() {
        // "testbucket" shares a prefix with the env but lacks the hyphen
        assert!(ensure_env_prefix("test", "testbucket").is_err());
    }

    #[test]
    fn test_dns_label_invariants() {
        let cases = [
            "Alice.Jones",
            "bob__o'brien",
            "--weird--input--",
            "UPPER",
            "x",
            "name.with.dots@example.com",
            &"long".repeat(40),
        ];
        for case in cases {
            let label = dns_label(case);
            assert!(label.len() <= 63, "'{}' too long", label);
            if !label.is_empty() {
                assert!(label.chars().next().unwrap().is_ascii_alphanumeric());
                assert!(label.chars().last().unwrap().is_ascii_alphanumeric());
            }
            assert!(
                label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
                "'{}' has invalid chars",
                label
            );
        }
    }

    #[test]
    fn test_dns_label_collapses_runs() {
        assert_eq!(dns_label("alice..jones"), "alice-jones");
        assert_eq!(dns_label("Bob O'Brien"), "bob-o-brien");
    }

    #[test]
    fn test_dns_label_truncation_ends_alphanumeric() {
        // 62 chars then a separator then more; truncation at 63 would end on '-'
        let input = format!("{}-{}", "a".repeat(62), "tail");
        let label = dns_label(&input);
        assert!(label.len() <= 63);
        assert!(label.chars().last().unwrap().is_ascii_alphanumeric());
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(
            repo_name_from_url("https://github.com/org/my-app").unwrap(),
            "my-app"
        );
        assert_eq!(
            repo_name_from_url("https://github.com/org/my-app.git").unwrap(),
            "my-app"
        );
        assert_eq!(
            repo_name_from_url("https://github.com/org/my-app/").unwrap(),
            "my-app"
        );
    }

    #[test]
    fn test_repo_name_from_url_invalid() {
        assert!(repo_name_from_url("").is_err());
        assert!(repo_name_from_url("no-slashes").is_err());
        assert!(repo_name_from_url("https://github.com/org/").is_err());
    }

    #[test]
    fn test_webapp_release_name() {
        assert_eq!(webapp_release_name("My_Web.App"), "my-web-app");
        assert_eq!(webapp_release_name(&"x".repeat(80)).len(), 50);
    }

    #[test]
    fn test_role_names_are_deterministic() {
        assert_eq!(user_role_name("test", "Alice"), "test_user_alice");
        assert_eq!(app_role_name("prod", "my-app"), "prod_app_my-app");
    }

    #[test]
    fn test_namespace_name() {
        assert_eq!(namespace_name("bob"), "user-bob");
        assert_eq!(namespace_name("Alice.Jones"), "user-alice-jones");
    }

    #[test]
    fn test_release_name_truncated() {
        assert_eq!(release_name("rstudio", "bob", 53), "rstudio-bob");
        let long = release_name("jupyter-lab-all-spark", &"verylongusername".repeat(4), 53);
        assert_eq!(long.len(), 53);
    }

    #[test]
    fn test_arn_helpers() {
        assert_eq!(s3_arn("test-bucket-1"), "arn:aws:s3:::test-bucket-1");
        assert_eq!(
            iam_arn("policy/test-policy", "123456789012"),
            "arn:aws:iam::123456789012:policy/test-policy"
        );
        // region kept for regionful services
        assert_eq!(
            arn("sqs", "queue-1", "eu-west-1", "123456789012"),
            "arn:aws:sqs:eu-west-1:123456789012:queue-1"
        );
    }

    #[test]
    fn test_grant_paths() {
        assert!(validate_grant_paths(&[]).is_ok());
        assert!(validate_grant_paths(&["/data/*".to_string(), "folder_1".to_string()]).is_ok());
        assert!(validate_grant_paths(&["bad path".to_string()]).is_err());
        assert!(validate_grant_paths(&["semi;colon".to_string()]).is_err());
    }
}
