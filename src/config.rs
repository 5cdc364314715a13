use anyhow::{Context, Result, anyhow, bail};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cinerelay-env";
pub const DEFAULT_RELAY_PORT: u16 = 3000;
pub const DEFAULT_RELAY_HOST: &str = "127.0.0.1";
pub const DEFAULT_UPSTREAM_HOST: &str = "vidsrc.xyz";
pub const DEFAULT_TOKEN_TTL_MS: i64 = 3_600_000;

/// Path prefix the Path Proxy is mounted under. Rewritten markup points here.
pub const PROXY_ROUTE_PREFIX: &str = "/proxy/";

/// Raw values read from the env file. Everything is optional; defaults are
/// applied by [`load_runtime_config_from`].
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub relay_host: Option<String>,
    pub relay_port: Option<u16>,
    pub upstream_host: Option<String>,
    pub embed_base_url: Option<String>,
    pub token_ttl_ms: Option<i64>,
    pub history_db: Option<PathBuf>,
}

/// The third-party embed host and the URLs derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    host: String,
    embed_base_url: String,
}

impl UpstreamConfig {
    /// Builds the config for a bare hostname, deriving the movie embed base.
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        let embed_base_url = format!("https://{host}/embed/movie/");
        Self {
            host,
            embed_base_url,
        }
    }

    pub fn with_embed_base_url(mut self, embed_base_url: impl Into<String>) -> Self {
        self.embed_base_url = embed_base_url.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Base the watch relay appends token identifiers to.
    pub fn embed_base_url(&self) -> &str {
        &self.embed_base_url
    }

    /// `https://{host}`, sent as `Origin` on proxied requests.
    pub fn origin(&self) -> String {
        format!("https://{}", self.host)
    }

    /// `https://{host}/`, sent as `Referer` on proxied requests.
    pub fn referer(&self) -> String {
        format!("https://{}/", self.host)
    }

    pub fn literal_url(&self, path: &str) -> String {
        format!("https://{}/{}", self.host, path)
    }

    pub fn movie_embed_url(&self, id: &str) -> String {
        format!("https://{}/embed/movie/{}", self.host, id)
    }

    pub fn tv_embed_url(&self, id: &str, season: &str, episode: &str) -> String {
        format!(
            "https://{}/embed/tv?imdb={}&season={}&episode={}",
            self.host, id, season, episode
        )
    }

    pub fn watch_url(&self, id: &str) -> String {
        format!("{}{}", self.embed_base_url, id)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_HOST)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub relay_host: String,
    pub relay_port: u16,
    pub upstream: UpstreamConfig,
    pub token_ttl_ms: i64,
    pub history_db: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            relay_host: DEFAULT_RELAY_HOST.to_string(),
            relay_port: DEFAULT_RELAY_PORT,
            upstream: UpstreamConfig::default(),
            token_ttl_ms: DEFAULT_TOKEN_TTL_MS,
            history_db: None,
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            match key.trim() {
                "RELAY_HOST" => {
                    if !value.is_empty() {
                        cfg.relay_host = Some(value.to_string());
                    }
                }
                "RELAY_PORT" => {
                    let port: u16 = value
                        .parse()
                        .with_context(|| format!("Parsing RELAY_PORT from {}", path.display()))?;
                    cfg.relay_port = Some(port);
                }
                "UPSTREAM_HOST" => {
                    if !value.is_empty() {
                        cfg.upstream_host = Some(value.to_string());
                    }
                }
                "EMBED_BASE_URL" => {
                    if !value.is_empty() {
                        cfg.embed_base_url = Some(value.to_string());
                    }
                }
                "TOKEN_TTL_MS" => {
                    let ttl: i64 = value.parse().with_context(|| {
                        format!("Parsing TOKEN_TTL_MS from {}", path.display())
                    })?;
                    cfg.token_ttl_ms = Some(ttl);
                }
                "HISTORY_DB" => {
                    if !value.is_empty() {
                        cfg.history_db = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    load_runtime_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

/// Loads the runtime config, using built-in defaults when the file is absent.
pub fn load_runtime_config_from(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let path = path.as_ref();
    let cfg = read_env_config(path)?.unwrap_or_default();
    runtime_from_env(cfg).with_context(|| format!("Validating {}", path.display()))
}

fn runtime_from_env(cfg: EnvConfig) -> Result<RuntimeConfig> {
    let upstream_host = cfg
        .upstream_host
        .unwrap_or_else(|| DEFAULT_UPSTREAM_HOST.to_string());
    if upstream_host.contains("://") || upstream_host.contains('/') {
        bail!("UPSTREAM_HOST must be a bare hostname, got {upstream_host}");
    }

    let mut upstream = UpstreamConfig::new(upstream_host);
    if let Some(base) = cfg.embed_base_url {
        if !base.starts_with("https://") && !base.starts_with("http://") {
            return Err(anyhow!("EMBED_BASE_URL must be an absolute URL, got {base}"));
        }
        upstream = upstream.with_embed_base_url(base);
    }

    let token_ttl_ms = cfg.token_ttl_ms.unwrap_or(DEFAULT_TOKEN_TTL_MS);
    if token_ttl_ms <= 0 {
        bail!("TOKEN_TTL_MS must be positive, got {token_ttl_ms}");
    }

    Ok(RuntimeConfig {
        relay_host: cfg
            .relay_host
            .unwrap_or_else(|| DEFAULT_RELAY_HOST.to_string()),
        relay_port: cfg.relay_port.unwrap_or(DEFAULT_RELAY_PORT),
        upstream,
        token_ttl_ms,
        history_db: cfg.history_db,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_env_config_extracts_port() {
        let cfg = make_config("# relay\nRELAY_PORT=\"4242\"\nUPSTREAM_HOST=\"embed.test\"\n");
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.relay_port, Some(4242));
        assert_eq!(parsed.upstream_host.as_deref(), Some("embed.test"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = load_runtime_config_from(dir.path().join("absent-env")).unwrap();
        assert_eq!(runtime.relay_port, DEFAULT_RELAY_PORT);
        assert_eq!(runtime.relay_host, DEFAULT_RELAY_HOST);
        assert_eq!(runtime.token_ttl_ms, DEFAULT_TOKEN_TTL_MS);
        assert_eq!(runtime.upstream.host(), DEFAULT_UPSTREAM_HOST);
        assert!(runtime.history_db.is_none());
    }

    #[test]
    fn embed_base_defaults_to_movie_path() {
        let cfg = make_config("UPSTREAM_HOST=embed.test\n");
        let runtime = load_runtime_config_from(cfg.path()).unwrap();
        assert_eq!(
            runtime.upstream.embed_base_url(),
            "https://embed.test/embed/movie/"
        );
        assert_eq!(
            runtime.upstream.watch_url("tt01"),
            "https://embed.test/embed/movie/tt01"
        );
    }

    #[test]
    fn reads_history_db_and_ttl() {
        let cfg = make_config("HISTORY_DB=\"/var/lib/relay/history.db\"\nTOKEN_TTL_MS=60000\n");
        let runtime = load_runtime_config_from(cfg.path()).unwrap();
        assert_eq!(
            runtime.history_db,
            Some(PathBuf::from("/var/lib/relay/history.db"))
        );
        assert_eq!(runtime.token_ttl_ms, 60_000);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load_runtime_config_from(make_config("RELAY_PORT=http\n").path()).is_err());
        assert!(load_runtime_config_from(make_config("TOKEN_TTL_MS=0\n").path()).is_err());
        assert!(
            load_runtime_config_from(make_config("UPSTREAM_HOST=https://x.test\n").path())
                .is_err()
        );
        assert!(
            load_runtime_config_from(make_config("EMBED_BASE_URL=x.test/e/\n").path()).is_err()
        );
    }

    #[test]
    fn upstream_urls() {
        let upstream = UpstreamConfig::new("embed.test");
        assert_eq!(upstream.origin(), "https://embed.test");
        assert_eq!(upstream.referer(), "https://embed.test/");
        assert_eq!(upstream.literal_url("a/b.js"), "https://embed.test/a/b.js");
        assert_eq!(
            upstream.tv_embed_url("tt9", "2", "5"),
            "https://embed.test/embed/tv?imdb=tt9&season=2&episode=5"
        );
    }
}
