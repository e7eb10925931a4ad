use anyhow::{bail, Context, Result};
use credcache::config::{load_config, CacheConfig};
use credcache::{CredentialsManager, GetRequest};
use tracing::info;

const USAGE: &str = "usage: credcache [status [min_ttl] | clear | refresh [scope]]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credcache=info".into()),
        )
        .init();

    let config = match std::env::var("CREDCACHE_CONFIG") {
        Ok(path) => load_config(&path)?.with_env_overrides(),
        Err(_) => CacheConfig::from_env(),
    };

    info!(
        backend = ?config.storage.backend,
        path = %config.storage.path.display(),
        slot = %config.storage.slot,
        "Configuration loaded"
    );

    let manager =
        CredentialsManager::from_config(&config).context("Failed to initialize credentials manager")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str).unwrap_or("status") {
        "status" => {
            let min_ttl = match args.get(1) {
                Some(v) => v.parse().context("min_ttl must be a number of seconds")?,
                None => config.policy.default_min_ttl,
            };
            let valid = manager.has_valid_credentials(min_ttl).await?;
            println!("{}", if valid { "valid" } else { "invalid" });
        }
        "clear" => {
            manager.clear().await?;
            println!("cleared");
        }
        "refresh" => {
            let mut request = GetRequest::new()
                .force_refresh(true)
                .min_ttl(config.policy.default_min_ttl);
            if let Some(scope) = args.get(1) {
                request = request.scope(scope.clone());
            }
            let credentials = manager.get(request).await.context("Refresh failed")?;
            println!("expires_at {}", credentials.expires_at.to_rfc3339());
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }

    Ok(())
}
