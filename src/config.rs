use crate::services::signer::ConfigError;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub metadata_path: String,
    pub signing_secret: String,
    pub public_url: String,
    pub allow_unsigned: bool,
    pub sweep_interval: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("metadata_path", &self.metadata_path)
            .field("signing_secret", &"<redacted>")
            .field("public_url", &self.public_url)
            .field("allow_unsigned", &self.allow_unsigned)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object store with presigned URL access")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides OBJECT_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata index file (overrides OBJECT_STORE_METADATA_PATH)
    #[arg(long)]
    pub metadata_path: Option<String>,

    /// HMAC secret used to sign presigned URLs (overrides OBJECT_STORE_SIGNING_SECRET)
    #[arg(long)]
    pub signing_secret: Option<String>,

    /// Base URL embedded in minted presigned URLs (overrides OBJECT_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Admit requests that carry no signature (overrides OBJECT_STORE_ALLOW_UNSIGNED)
    #[arg(long, value_name = "BOOL")]
    pub allow_unsigned: Option<bool>,

    /// Seconds between presigned URL sweeps (overrides OBJECT_STORE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Reconcile the metadata index with stored objects and exit
    #[arg(long)]
    pub reconcile: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and reconcile flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let reconcile = args.reconcile;
        let cfg = Self::resolve(args, |name| env::var(name))?;
        Ok((cfg, reconcile))
    }

    /// Merge CLI arguments over values obtained from `lookup`.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let parsed = |name: &str| -> Result<Option<u64>> { parse_var(name, var(name)?) };

        let host = match args.host {
            Some(host) => host,
            None => var("OBJECT_STORE_HOST")?.unwrap_or_else(|| "0.0.0.0".into()),
        };
        let port = match args.port {
            Some(port) => port,
            None => parse_var::<u16>("OBJECT_STORE_PORT", var("OBJECT_STORE_PORT")?)?
                .unwrap_or(3000),
        };
        let storage_dir = match args.storage_dir {
            Some(dir) => dir,
            None => var("OBJECT_STORE_STORAGE_DIR")?.unwrap_or_else(|| "./data/objects".into()),
        };
        let metadata_path = match args.metadata_path {
            Some(path) => path,
            None => var("OBJECT_STORE_METADATA_PATH")?
                .unwrap_or_else(|| "./data/meta/metadata.json".into()),
        };
        let signing_secret = match args.signing_secret {
            Some(secret) => secret,
            None => var("OBJECT_STORE_SIGNING_SECRET")?.unwrap_or_default(),
        };
        if signing_secret.is_empty() {
            return Err(ConfigError::MissingSecret)
                .context("set OBJECT_STORE_SIGNING_SECRET or pass --signing-secret");
        }
        let public_url = match args.public_url {
            Some(url) => url,
            None => var("OBJECT_STORE_PUBLIC_URL")?
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
        };
        let allow_unsigned = match args.allow_unsigned {
            Some(flag) => flag,
            None => match var("OBJECT_STORE_ALLOW_UNSIGNED")? {
                Some(raw) => parse_bool(&raw)
                    .with_context(|| format!("parsing OBJECT_STORE_ALLOW_UNSIGNED value `{}`", raw))?,
                None => true,
            },
        };
        let sweep_secs = match args.sweep_interval_secs {
            Some(secs) => secs,
            None => parsed("OBJECT_STORE_SWEEP_INTERVAL_SECS")?.unwrap_or(60),
        };
        if sweep_secs == 0 {
            bail!("sweep interval must be at least one second");
        }

        Ok(Self {
            host,
            port,
            storage_dir,
            metadata_path,
            signing_secret,
            public_url,
            allow_unsigned,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, raw))
        })
        .transpose()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_when_secret_is_set() {
        let cfg = AppConfig::resolve(
            Args::default(),
            lookup(&[("OBJECT_STORE_SIGNING_SECRET", "s3cr3t")]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.storage_dir, "./data/objects");
        assert_eq!(cfg.metadata_path, "./data/meta/metadata.json");
        assert_eq!(cfg.public_url, "http://localhost:3000");
        assert!(cfg.allow_unsigned);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn missing_secret_is_fatal() {
        let err = AppConfig::resolve(Args::default(), lookup(&[])).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingSecret)
        );
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(9000),
            allow_unsigned: Some(false),
            signing_secret: Some("from-cli".into()),
            ..Args::default()
        };
        let cfg = AppConfig::resolve(
            args,
            lookup(&[
                ("OBJECT_STORE_PORT", "8000"),
                ("OBJECT_STORE_ALLOW_UNSIGNED", "true"),
                ("OBJECT_STORE_SIGNING_SECRET", "from-env"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(!cfg.allow_unsigned);
        assert_eq!(cfg.signing_secret, "from-cli");
        assert_eq!(cfg.public_url, "http://localhost:9000");
    }

    #[test]
    fn bad_values_are_reported() {
        let secret = ("OBJECT_STORE_SIGNING_SECRET", "s");
        assert!(
            AppConfig::resolve(Args::default(), lookup(&[secret, ("OBJECT_STORE_PORT", "abc")]))
                .is_err()
        );
        assert!(
            AppConfig::resolve(
                Args::default(),
                lookup(&[secret, ("OBJECT_STORE_ALLOW_UNSIGNED", "maybe")])
            )
            .is_err()
        );
        assert!(
            AppConfig::resolve(
                Args::default(),
                lookup(&[secret, ("OBJECT_STORE_SWEEP_INTERVAL_SECS", "0")])
            )
            .is_err()
        );
    }

    #[test]
    fn debug_output_redacts_secret() {
        let cfg = AppConfig::resolve(
            Args::default(),
            lookup(&[("OBJECT_STORE_SIGNING_SECRET", "hunter2")]),
        )
        .unwrap();
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }
}
