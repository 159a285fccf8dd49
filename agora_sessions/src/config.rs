//! Gateway configuration

use reqwest::Url;

const DEFAULT_RENEWAL_PATH: &str = "/auth/renew";

const DEFAULT_AUTH_FREE: &[&str] = &[
    "/auth/sign-in",
    "/auth/sign-up",
    "/auth/check-email",
    "/auth/check-nickname",
    "/auth/rejoin",
];

/// Configuration for the authenticated request gateway
///
/// Carries the board API's base address, the allow-list of paths that
/// are never annotated with a credential and never handled on failure
/// (`auth-free`), and the path of the renewal endpoint. The renewal
/// endpoint is always part of the allow-list: a renewal exchange must
/// never itself trigger renewal handling.
#[derive(Clone, Debug)]
pub struct GateConfig {
    base_url: Url,
    auth_free: Vec<String>,
    renewal_path: String,
}

impl GateConfig {
    /// Constructs a configuration for the given API base address
    ///
    /// The allow-list starts out with the sign-in, sign-up,
    /// availability-check, and rejoin paths, plus the renewal endpoint.
    pub fn new(base_url: Url) -> Self {
        let mut auth_free: Vec<String> = DEFAULT_AUTH_FREE
            .iter()
            .map(|path| normalize_path(path))
            .collect();
        auth_free.push(normalize_path(DEFAULT_RENEWAL_PATH));
        Self {
            base_url,
            auth_free,
            renewal_path: normalize_path(DEFAULT_RENEWAL_PATH),
        }
    }

    /// Replaces the auth-free allow-list
    ///
    /// The renewal path is retained in the list regardless of the paths
    /// provided.
    pub fn with_auth_free_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.auth_free = paths
            .into_iter()
            .map(|path| normalize_path(path.as_ref()))
            .collect();
        if !self.auth_free.contains(&self.renewal_path) {
            self.auth_free.push(self.renewal_path.clone());
        }
        self
    }

    /// Replaces the renewal endpoint path
    pub fn with_renewal_path(mut self, path: &str) -> Self {
        let path = normalize_path(path);
        self.auth_free.retain(|p| *p != self.renewal_path);
        if !self.auth_free.contains(&path) {
            self.auth_free.push(path.clone());
        }
        self.renewal_path = path;
        self
    }

    /// Gets the API base address
    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Gets the absolute URL of the renewal endpoint
    pub fn renew_url(&self) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&self.renewal_path);
        url
    }

    /// Whether `path` is exempt from credential annotation and renewal
    /// handling
    pub fn is_auth_free(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.auth_free.iter().any(|p| *p == path)
    }

    /// Whether `path` is the renewal endpoint itself
    pub fn is_renewal_path(&self, path: &str) -> bool {
        normalize_path(path) == self.renewal_path
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}
