use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use confluence_rag_store::{DEFAULT_OPENAI_BASE_URL, RagConfig};
use serde::{Deserialize, Deserializer};

use crate::classify::ClassifierProvider;
use crate::utils::parse_cutoff;

pub const DEFAULT_IGNORE_CLASSIFICATIONS: &[&str] = &["Meeting Notes", "Operational Event", "Other"];
pub const DEFAULT_CUTOFF_DAYS: i64 = 5 * 365;

pub fn default_ignore_classifications() -> Vec<String> {
    DEFAULT_IGNORE_CLASSIFICATIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(DEFAULT_CUTOFF_DAYS)
}

/// One source of settings. Command line (flags and environment) and the
/// optional TOML file each produce a layer; earlier layers win on merge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub confluence_domain: Option<String>,
    pub confluence_email: Option<String>,
    pub confluence_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub postgres_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_cutoff")]
    pub cutoff: Option<DateTime<Utc>>,
    pub spaces: Option<Vec<String>>,
    pub ignore_classifications: Option<Vec<String>>,
    pub classifier: Option<ClassifierProvider>,
    pub classifier_model: Option<String>,
}

impl ConfigLayer {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;

        toml::from_str(&raw).with_context(|| format!("failed to parse TOML {}", path.display()))
    }

    pub fn merge(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            confluence_domain: self.confluence_domain.or(lower.confluence_domain),
            confluence_email: self.confluence_email.or(lower.confluence_email),
            confluence_api_key: self.confluence_api_key.or(lower.confluence_api_key),
            anthropic_api_key: self.anthropic_api_key.or(lower.anthropic_api_key),
            openai_api_key: self.openai_api_key.or(lower.openai_api_key),
            openai_base_url: self.openai_base_url.or(lower.openai_base_url),
            postgres_url: self.postgres_url.or(lower.postgres_url),
            cutoff: self.cutoff.or(lower.cutoff),
            spaces: self.spaces.or(lower.spaces),
            ignore_classifications: self.ignore_classifications.or(lower.ignore_classifications),
            classifier: self.classifier.or(lower.classifier),
            classifier_model: self.classifier_model.or(lower.classifier_model),
        }
    }
}

fn deserialize_cutoff<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|value| parse_cutoff(&value).map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Clone)]
pub struct IndexerConfig {
    pub confluence_domain: String,
    pub confluence_email: String,
    pub confluence_api_key: String,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub postgres_url: String,
    pub cutoff: DateTime<Utc>,
    pub spaces: Vec<String>,
    pub ignore_classifications: Vec<String>,
    pub classifier: ClassifierProvider,
    pub classifier_model: String,
}

impl IndexerConfig {
    /// Fills defaults into a merged layer. The default cutoff is measured from `now`.
    pub fn resolve(layer: ConfigLayer, now: DateTime<Utc>) -> Result<Self> {
        let classifier = layer.classifier.unwrap_or_default();
        let anthropic_api_key = non_empty(layer.anthropic_api_key);

        if classifier == ClassifierProvider::Anthropic && anthropic_api_key.is_none() {
            return Err(missing("Anthropic API key", "--anthropic-api-key", "ANTHROPIC_API_KEY"));
        }

        Ok(Self {
            confluence_domain: required(
                layer.confluence_domain,
                "Confluence domain",
                "--confluence-domain",
                "CONFLUENCE_DOMAIN",
            )?,
            confluence_email: required(
                layer.confluence_email,
                "Confluence email",
                "--confluence-email",
                "CONFLUENCE_EMAIL",
            )?,
            confluence_api_key: required(
                layer.confluence_api_key,
                "Confluence API key",
                "--confluence-api-key",
                "CONFLUENCE_API_KEY",
            )?,
            anthropic_api_key,
            openai_api_key: required(
                layer.openai_api_key,
                "OpenAI API key",
                "--openai-api-key",
                "OPENAI_API_KEY",
            )?,
            openai_base_url: non_empty(layer.openai_base_url)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            postgres_url: required(
                layer.postgres_url,
                "PostgreSQL URL",
                "--postgres-url",
                "POSTGRES_URL",
            )?,
            cutoff: layer.cutoff.unwrap_or_else(|| default_cutoff(now)),
            spaces: layer.spaces.unwrap_or_default(),
            ignore_classifications: layer
                .ignore_classifications
                .unwrap_or_else(default_ignore_classifications),
            classifier,
            classifier_model: non_empty(layer.classifier_model)
                .unwrap_or_else(|| classifier.default_model().to_string()),
        })
    }

    pub fn rag_config(&self) -> RagConfig {
        let mut config = RagConfig::new(&self.postgres_url, &self.openai_api_key);
        config.openai_base_url = self.openai_base_url.clone();
        config
    }
}

impl fmt::Debug for IndexerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerConfig")
            .field("confluence_domain", &self.confluence_domain)
            .field("confluence_email", &self.confluence_email)
            .field("openai_base_url", &self.openai_base_url)
            .field("cutoff", &self.cutoff)
            .field("spaces", &self.spaces)
            .field("ignore_classifications", &self.ignore_classifications)
            .field("classifier", &self.classifier)
            .field("classifier_model", &self.classifier_model)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, what: &str, flag: &str, env: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| missing(what, flag, env))
}

fn missing(what: &str, flag: &str, env: &str) -> anyhow::Error {
    anyhow!("missing {what}: pass {flag} or set {env}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn complete_layer() -> ConfigLayer {
        ConfigLayer {
            confluence_domain: Some("acme.atlassian.net".into()),
            confluence_email: Some("bot@acme.io".into()),
            confluence_api_key: Some("conf-token".into()),
            openai_api_key: Some("sk-openai".into()),
            postgres_url: Some("postgres://localhost/rag".into()),
            ..ConfigLayer::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn applies_defaults() {
        let cfg = IndexerConfig::resolve(complete_layer(), now()).expect("resolve");

        assert_eq!(
            cfg.ignore_classifications,
            vec!["Meeting Notes", "Operational Event", "Other"]
        );
        assert_eq!(cfg.cutoff, now() - Duration::days(1825));
        assert!(cfg.spaces.is_empty());
        assert_eq!(cfg.classifier, ClassifierProvider::Openai);
        assert_eq!(cfg.classifier_model, "gpt-4o");
        assert_eq!(cfg.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(cfg.anthropic_api_key, None);
    }

    #[test]
    fn default_cutoff_tracks_now() {
        let earlier = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let a = IndexerConfig::resolve(complete_layer(), earlier).expect("resolve");
        let b = IndexerConfig::resolve(complete_layer(), now()).expect("resolve");
        assert_eq!(a.cutoff, default_cutoff(earlier));
        assert_eq!(b.cutoff, default_cutoff(now()));
    }

    #[test]
    fn earlier_layer_wins() {
        let cli = ConfigLayer {
            spaces: Some(vec!["ENG".into()]),
            classifier_model: Some("gpt-4o-mini".into()),
            ..complete_layer()
        };
        let file = ConfigLayer {
            confluence_domain: Some("other.atlassian.net".into()),
            spaces: Some(vec!["OPS".into(), "HR".into()]),
            ignore_classifications: Some(vec!["Other".into()]),
            ..ConfigLayer::default()
        };

        let cfg = IndexerConfig::resolve(cli.merge(file), now()).expect("resolve");

        assert_eq!(cfg.confluence_domain, "acme.atlassian.net");
        assert_eq!(cfg.spaces, vec!["ENG"]);
        assert_eq!(cfg.ignore_classifications, vec!["Other"]);
        assert_eq!(cfg.classifier_model, "gpt-4o-mini");
    }

    #[test]
    fn reports_missing_credentials() {
        let layer = ConfigLayer {
            openai_api_key: None,
            ..complete_layer()
        };
        let err = IndexerConfig::resolve(layer, now()).expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "missing OpenAI API key: pass --openai-api-key or set OPENAI_API_KEY"
        );

        let layer = ConfigLayer {
            postgres_url: Some("   ".into()),
            ..complete_layer()
        };
        let err = IndexerConfig::resolve(layer, now()).expect_err("should fail");
        assert!(err.to_string().contains("POSTGRES_URL"));
    }

    #[test]
    fn anthropic_classifier_requires_its_key() {
        let layer = ConfigLayer {
            classifier: Some(ClassifierProvider::Anthropic),
            ..complete_layer()
        };
        let err = IndexerConfig::resolve(layer.clone(), now()).expect_err("should fail");
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));

        let layer = ConfigLayer {
            anthropic_api_key: Some("sk-ant".into()),
            ..layer
        };
        let cfg = IndexerConfig::resolve(layer, now()).expect("resolve");
        assert_eq!(cfg.classifier_model, "claude-3-5-sonnet-latest");
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
            confluence_domain = "acme.atlassian.net"
            cutoff = "2024-01-01T13:45:00"
            spaces = ["ENG", "OPS"]
            ignore_classifications = ["Other"]
            classifier = "anthropic"
            "#
        )
        .expect("write");

        let layer = ConfigLayer::load(file.path()).expect("load");

        assert_eq!(layer.confluence_domain.as_deref(), Some("acme.atlassian.net"));
        assert_eq!(
            layer.cutoff,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 13, 45, 0).unwrap())
        );
        assert_eq!(layer.spaces, Some(vec!["ENG".to_string(), "OPS".to_string()]));
        assert_eq!(layer.classifier, Some(ClassifierProvider::Anthropic));
    }

    #[test]
    fn rejects_bad_file_values() {
        let err = toml::from_str::<ConfigLayer>(r#"cutoff = "01/01/2024""#).expect_err("bad date");
        assert!(err.to_string().contains("Invalid date format"));

        let err = toml::from_str::<ConfigLayer>(r#"postgres = "x""#).expect_err("unknown key");
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = IndexerConfig::resolve(complete_layer(), now()).expect("resolve");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("sk-openai"));
        assert!(!rendered.contains("conf-token"));
        assert!(!rendered.contains("postgres://"));
    }
}
