use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser};
use confluence_rag_store::blocking::Rag;
use tracing::{info, warn};

use crate::classify::{
    AnthropicClassifier, Classifier, ClassifierProvider, DEFAULT_ANTHROPIC_BASE_URL,
    OpenAiClassifier,
};
use crate::config::{ConfigLayer, IndexerConfig};
use crate::confluence::ConfluenceClient;
use crate::engine::Indexer;
use crate::utils::{self, parse_cutoff};

#[derive(Debug, Parser)]
#[command(
    name = "confluence-rag-indexer",
    version,
    about = "Classify Confluence pages and index them into a RAG store"
)]
pub struct Cli {
    /// Confluence space keys to index.
    #[arg(value_name = "SPACE")]
    pub spaces: Vec<String>,
    /// Ignore pages last modified before this date (YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or YYYY-MM-DDTHH:MM:SS).
    #[arg(long, value_parser = parse_cutoff)]
    pub cutoff: Option<DateTime<Utc>>,
    /// Confluence domain, e.g. acme.atlassian.net.
    #[arg(long, env = "CONFLUENCE_DOMAIN")]
    pub confluence_domain: Option<String>,
    /// Email of the Confluence account used for API access.
    #[arg(long, env = "CONFLUENCE_EMAIL")]
    pub confluence_email: Option<String>,
    #[arg(long, env = "CONFLUENCE_API_KEY", hide_env_values = true)]
    pub confluence_api_key: Option<String>,
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,
    /// OpenAI API key, used for embeddings and the default classifier.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,
    #[arg(long, env = "POSTGRES_URL", hide_env_values = true)]
    pub postgres_url: Option<String>,
    /// Skip pages whose title contains, or whose classification equals, any of these.
    /// Defaults to "Meeting Notes", "Operational Event" and "Other".
    #[arg(long, num_args = 1.., value_name = "CLASSIFICATION")]
    pub ignore_classifications: Option<Vec<String>>,
    /// Model provider used for classification.
    #[arg(long, env = "CLASSIFIER", value_enum)]
    pub classifier: Option<ClassifierProvider>,
    #[arg(long, env = "CLASSIFIER_MODEL")]
    pub classifier_model: Option<String>,
    /// Optional TOML file supplying settings not given on the command line or environment.
    #[arg(long, env = "CONFLUENCE_RAG_CONFIG")]
    pub config: Option<PathBuf>,
    /// Increase logging verbosity (use -vv for trace level).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            confluence_domain: self.confluence_domain.clone(),
            confluence_email: self.confluence_email.clone(),
            confluence_api_key: self.confluence_api_key.clone(),
            anthropic_api_key: self.anthropic_api_key.clone(),
            openai_api_key: self.openai_api_key.clone(),
            openai_base_url: self.openai_base_url.clone(),
            postgres_url: self.postgres_url.clone(),
            cutoff: self.cutoff,
            spaces: (!self.spaces.is_empty()).then(|| self.spaces.clone()),
            ignore_classifications: self.ignore_classifications.clone(),
            classifier: self.classifier,
            classifier_model: self.classifier_model.clone(),
        }
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> Result<IndexerConfig> {
        let file_layer = match &self.config {
            Some(path) => ConfigLayer::load(path)?,
            None => ConfigLayer::default(),
        };
        IndexerConfig::resolve(self.layer().merge(file_layer), now)
    }
}

pub fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose)?;

    let config = cli.resolve(Utc::now())?;
    info!(?config, "configuration resolved");

    if config.spaces.is_empty() {
        warn!("no Confluence spaces given, nothing to index");
        return Ok(());
    }

    let classifier = build_classifier(&config)?;
    let source = ConfluenceClient::new(
        &config.confluence_domain,
        &config.confluence_email,
        &config.confluence_api_key,
        config.cutoff,
    )?;
    let store = Rag::connect(config.rag_config()).context("failed to open document store")?;

    let mut indexer = Indexer::new(
        config.spaces.clone(),
        config.ignore_classifications.clone(),
        source,
        classifier,
        store,
    );
    let summary = indexer.run()?;

    info!(
        spaces = summary.spaces,
        seen = summary.seen,
        skipped_by_title = summary.skipped_by_title,
        skipped_by_label = summary.skipped_by_label,
        stored = summary.stored,
        "indexing complete"
    );

    Ok(())
}

fn build_classifier(config: &IndexerConfig) -> Result<Box<dyn Classifier>> {
    Ok(match config.classifier {
        ClassifierProvider::Openai => Box::new(OpenAiClassifier::new(
            &config.openai_base_url,
            &config.openai_api_key,
            &config.classifier_model,
        )?),
        ClassifierProvider::Anthropic => Box::new(AnthropicClassifier::new(
            DEFAULT_ANTHROPIC_BASE_URL,
            config.anthropic_api_key.as_deref().unwrap_or_default(),
            &config.classifier_model,
        )?),
    })
}
