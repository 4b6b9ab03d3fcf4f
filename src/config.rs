use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = ".pr-reviewer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

/// Code hosting platform the review is posted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Github,
    Gitlab,
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Platform::Github),
            "gitlab" => Ok(Platform::Gitlab),
            _ => Err(ConfigError::Invalid {
                field: "review.platform",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Github => write!(f, "github"),
            Platform::Gitlab => write!(f, "gitlab"),
        }
    }
}

/// Text generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Openai,
    #[serde(alias = "claude")]
    Anthropic,
    /// Any OpenAI-compatible server that needs no API key.
    Local,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::Openai),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "local" => Ok(LlmProvider::Local),
            _ => Err(ConfigError::Invalid {
                field: "llm.provider",
                value: s.to_string(),
            }),
        }
    }
}

/// Which changes a local run reviews.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeScope {
    /// Staged changes, falling back to committed changes since the base.
    #[default]
    Staged,
    /// Unstaged working tree changes.
    Unstaged,
    /// Staged and unstaged changes against HEAD.
    All,
}

/// Top-level configuration loaded from .pr-reviewer.toml.
/// All fields are optional; the tool works with zero config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub review: ReviewConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub gitlab: GitLabConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub platform: Platform,
    /// Ref the changes are compared against
    pub base_ref: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Github,
            base_ref: "origin/main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Option<LlmProvider>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Overrides the provider's default endpoint
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            api_key: None,
            base_url: None,
            temperature: 0.3,
            max_tokens: 2048,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token. Overridden by the GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// Repository slug, "owner/repo"
    pub repo: Option<String>,
    pub pr_number: Option<u64>,
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            repo: None,
            pr_number: None,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitLabConfig {
    /// Personal or project access token. Overridden by the GITLAB_TOKEN env var.
    pub token: Option<String>,
    /// Full project path, "group/project"
    pub project: Option<String>,
    pub mr_iid: Option<u64>,
    pub api_url: String,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            token: None,
            project: None,
            mr_iid: None,
            api_url: "https://gitlab.com/api/v4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Lines kept on each side of a commented line
    pub context_window: usize,
    /// Collapse runs of uncommented lines into one ellipsis
    pub ellipsis: bool,
    pub side_by_side: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            context_window: 2,
            ellipsis: true,
            side_by_side: false,
        }
    }
}

impl Config {
    /// Load configuration from `explicit`, or from .pr-reviewer.toml in the
    /// current directory when it exists, then apply environment overrides.
    /// Returns the default config if no file is found.
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply environment overrides. Environment values beat file values.
    ///
    /// `var` is the lookup, so tests can pass a map instead of touching the
    /// process environment.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(platform) = var("PR_REVIEWER_PLATFORM") {
            self.review.platform = platform.parse()?;
        }
        if let Some(base) = var("PR_REVIEWER_BASE_REF") {
            self.review.base_ref = base;
        }
        if let Some(provider) = var("PR_REVIEWER_LLM_PROVIDER") {
            self.llm.provider = Some(provider.parse()?);
        }
        if let Some(model) = var("PR_REVIEWER_MODEL") {
            self.llm.model = Some(model);
        }
        let key_var = match self.llm.provider {
            Some(LlmProvider::Openai) => Some("OPENAI_API_KEY"),
            Some(LlmProvider::Anthropic) => Some("ANTHROPIC_API_KEY"),
            Some(LlmProvider::Local) | None => None,
        };
        if let Some(key) = key_var.and_then(&var) {
            self.llm.api_key = Some(key);
        }
        if let Some(token) = var("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(repo) = var("GITHUB_REPOSITORY") {
            self.github.repo = Some(repo);
        }
        if let Some(number) = var("GITHUB_PR_NUMBER") {
            self.github.pr_number = Some(parse_number("github.pr_number", &number)?);
        }
        if let Some(token) = var("GITLAB_TOKEN") {
            self.gitlab.token = Some(token);
        }
        if let Some(url) = var("CI_API_V4_URL") {
            self.gitlab.api_url = url;
        }
        if let Some(project) = var("CI_PROJECT_PATH") {
            self.gitlab.project = Some(project);
        }
        if let Some(iid) = var("CI_MERGE_REQUEST_IID") {
            self.gitlab.mr_iid = Some(parse_number("gitlab.mr_iid", &iid)?);
        }
        Ok(())
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        field,
        value: value.to_string(),
    })
}

/// Everything a single review run is configured with: the file config merged
/// with command line flags. The pipeline topology is a function of this value.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub scope: ChangeScope,
    pub platform: Platform,
    pub base_ref: String,
    /// Include the CI context detection stage
    pub ci_mode: bool,
    /// Never post to the hosting platform
    pub dry_run: bool,
    /// Post inline comments (the summary is posted regardless unless dry run)
    pub post_inline: bool,
    /// Run producers concurrently in one fan-out stage
    pub parallel_producers: bool,
    /// Offline demo run; no text generation backend is required
    pub mock: bool,
    pub render: RenderConfig,
    pub llm: LlmConfig,
    pub github: GitHubConfig,
    pub gitlab: GitLabConfig,
}

impl RunConfig {
    pub fn from_config(config: Config) -> Self {
        Self {
            scope: ChangeScope::default(),
            platform: config.review.platform,
            base_ref: config.review.base_ref,
            ci_mode: false,
            dry_run: false,
            post_inline: false,
            parallel_producers: false,
            mock: false,
            render: config.render,
            llm: config.llm,
            github: config.github,
            gitlab: config.gitlab,
        }
    }

    /// Check the settings every text generation call needs.
    pub fn validate_llm(&self) -> Result<(), ConfigError> {
        let provider = self.llm.provider.ok_or(ConfigError::Missing("llm.provider"))?;
        if self.llm.model.as_deref().map_or(true, |m| m.trim().is_empty()) {
            return Err(ConfigError::Missing("llm.model"));
        }
        if provider != LlmProvider::Local && self.llm.api_key.is_none() {
            return Err(ConfigError::Missing("llm.api_key"));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_config(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert_eq!(config.review.platform, Platform::Github);
        assert_eq!(config.review.base_ref, "origin/main");
        assert_eq!(config.render.context_window, 2);
        assert!(config.render.ellipsis);
        assert_eq!(config.llm.max_tokens, 2048);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[review]
platform = "gitlab"

[llm]
provider = "claude"
model = "claude-sonnet"

[render]
context_window = 4
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.review.platform, Platform::Gitlab);
        assert_eq!(config.review.base_ref, "origin/main");
        assert_eq!(config.llm.provider, Some(LlmProvider::Anthropic));
        assert_eq!(config.render.context_window, 4);
        assert!(config.render.ellipsis);
        assert_eq!(config.github.api_url, "https://api.github.com");
    }

    #[test]
    fn test_env_beats_file() {
        let file = "[llm]\nprovider = \"openai\"\nmodel = \"a\"\napi_key = \"file\"";
        let mut config: Config = toml::from_str(file).unwrap();
        config
            .apply_env(env(&[
                ("PR_REVIEWER_MODEL", "b"),
                ("OPENAI_API_KEY", "env"),
                ("ANTHROPIC_API_KEY", "unused"),
                ("GITHUB_PR_NUMBER", "42"),
                ("GITHUB_REPOSITORY", "org/repo"),
            ]))
            .unwrap();
        assert_eq!(config.llm.model.as_deref(), Some("b"));
        assert_eq!(config.llm.api_key.as_deref(), Some("env"));
        assert_eq!(config.github.pr_number, Some(42));
        assert_eq!(config.github.repo.as_deref(), Some("org/repo"));
    }

    #[test]
    fn test_gitlab_settings_from_file_and_env() {
        let file = "[gitlab]\nproject = \"group/app\"\ntoken = \"file\"";
        let mut config: Config = toml::from_str(file).unwrap();
        assert_eq!(config.gitlab.api_url, "https://gitlab.com/api/v4");
        config
            .apply_env(env(&[
                ("GITLAB_TOKEN", "env"),
                ("CI_MERGE_REQUEST_IID", "17"),
                ("CI_API_V4_URL", "https://git.example.com/api/v4"),
            ]))
            .unwrap();
        assert_eq!(config.gitlab.project.as_deref(), Some("group/app"));
        assert_eq!(config.gitlab.token.as_deref(), Some("env"));
        assert_eq!(config.gitlab.mr_iid, Some(17));
        assert_eq!(config.gitlab.api_url, "https://git.example.com/api/v4");
        assert!(config.github.repo.is_none());
    }

    #[test]
    fn test_env_rejects_invalid_values() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("GITHUB_PR_NUMBER", "forty-two")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "github.pr_number", .. }));

        let err = config
            .apply_env(env(&[("CI_MERGE_REQUEST_IID", "!5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "gitlab.mr_iid", .. }));

        let err = config
            .apply_env(env(&[("PR_REVIEWER_LLM_PROVIDER", "parrot")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "llm.provider", .. }));
    }

    #[test]
    fn test_validate_llm_reports_missing_settings() {
        let mut run = RunConfig::default();
        assert!(matches!(run.validate_llm(), Err(ConfigError::Missing("llm.provider"))));

        run.llm.provider = Some(LlmProvider::Openai);
        assert!(matches!(run.validate_llm(), Err(ConfigError::Missing("llm.model"))));

        run.llm.model = Some("gpt-4o".to_string());
        assert!(matches!(run.validate_llm(), Err(ConfigError::Missing("llm.api_key"))));

        run.llm.api_key = Some("sk".to_string());
        assert!(run.validate_llm().is_ok());
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let mut run = RunConfig::default();
        run.llm.provider = Some(LlmProvider::Local);
        run.llm.model = Some("llama3".to_string());
        assert!(run.validate_llm().is_ok());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let path = std::env::temp_dir().join("pr-reviewer-does-not-exist.toml");
        assert!(matches!(Config::load_from(&path), Err(ConfigError::FileRead(_))));
    }
}
