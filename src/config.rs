use clap::Parser;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment variables that seed the string settings, as
/// `(variable, field)`. Values are taken verbatim, so `2` or `true` stay
/// strings.
const ENV_STRINGS: &[(&str, &str)] = &[
    ("DESTINATION_PATH", "destination"),
    ("SERVICE_LABEL_KEY", "label_key"),
    ("SERVICE_LABEL_VALUE", "label_value"),
    ("SERVICE_NAMESPACE", "namespace"),
];

const ENV_WRITE_ERROR_LIMIT: &str = "SVCWATCH_WRITE_ERROR_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// JSON file to update.
    pub destination: PathBuf,
    /// Label key to watch; its value also names the host entries.
    pub label_key: String,
    /// Label value to match.
    pub label_value: String,
    /// Namespace to watch. Empty watches every namespace.
    pub namespace: String,
    /// Save errors tolerated before stopping. Zero stops on the first.
    pub write_error_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("/var/lib/svcwatch/status.json"),
            label_key: String::new(),
            label_value: String::new(),
            namespace: String::new(),
            write_error_limit: 0,
        }
    }
}

/// Command line flags. Anything not given falls back to the files and the
/// environment.
#[derive(Debug, Default, Parser, Serialize)]
#[command(name = "svcwatch", version, about = "Watch a service and keep its addresses in a JSON file")]
pub struct Args {
    /// JSON file to update (default from: DESTINATION_PATH)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,

    /// Label key to watch (default from: SERVICE_LABEL_KEY)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_key: Option<String>,

    /// Label value (default from: SERVICE_LABEL_VALUE)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_value: Option<String>,

    /// Namespace (default from: SERVICE_NAMESPACE)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Save errors tolerated before stopping (default from: SVCWATCH_WRITE_ERROR_LIMIT)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_error_limit: Option<u32>,

    /// Configuration file (TOML or JSON)
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
}

impl Config {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        Self::figment(args)
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    fn figment(args: &Args) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        figment = match &args.config {
            Some(path) if has_extension(path, "json") => figment.merge(Json::file(path)),
            Some(path) => figment.merge(Toml::file(path)),
            None => figment
                .merge(Toml::file("svcwatch.toml"))
                .merge(Json::file("svcwatch.json")),
        };
        figment
            .merge(Serialized::defaults(env_strings()))
            .merge(
                Env::raw()
                    .only(&[ENV_WRITE_ERROR_LIMIT])
                    .map(|_| "write_error_limit".into()),
            )
            .merge(Serialized::defaults(args))
    }

    /// Label selector for the watch, if a label key is configured.
    pub fn selector(&self) -> Option<String> {
        crate::source::k8s::label_selector(&self.label_key, &self.label_value)
    }
}

fn env_strings() -> BTreeMap<&'static str, String> {
    ENV_STRINGS
        .iter()
        .filter_map(|(var, field)| std::env::var(var).ok().map(|value| (*field, value)))
        .collect()
}

fn has_extension(path: &std::path::Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}
