// ── station loader ────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use lofi_proto::config::StationsConfig;
use lofi_proto::protocol::StationDescriptor;
use lofi_proto::registry::{
    load_stations_from_m3u, load_stations_from_toml, parse_m3u_from_str, StationRegistry,
};
use tracing::{info, warn};

/// Build the registry from the first source that yields stations:
/// configured TOML, `stations.toml` beside the exe, `stations.toml` in the
/// working directory, the configured m3u URL or file.  Falls back to the
/// built-in stations.
pub async fn load_registry(config: &StationsConfig) -> StationRegistry {
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("stations.toml")));
    let toml_candidates = [
        Some(config.stations_toml.clone()),
        beside_exe,
        Some(PathBuf::from("stations.toml")),
    ];

    for path in toml_candidates.into_iter().flatten() {
        if let Some(registry) = try_toml(&path) {
            return registry;
        }
    }

    let source = config.m3u_url.trim();
    if !source.is_empty() {
        info!("Loading stations from m3u: {}", source);
        let loaded = if source.starts_with("http://") || source.starts_with("https://") {
            fetch_m3u_url(source).await
        } else {
            load_stations_from_m3u(Path::new(source)).map_err(anyhow::Error::from)
        };
        match loaded.and_then(into_registry) {
            Ok(registry) => {
                info!("Loaded {} stations from m3u", registry.len());
                return registry;
            }
            Err(e) => warn!("Failed to load stations from m3u {}: {}", source, e),
        }
    }

    info!("Using built-in stations");
    StationRegistry::builtin()
}

fn try_toml(path: &Path) -> Option<StationRegistry> {
    if !path.exists() {
        return None;
    }
    match load_stations_from_toml(path)
        .map_err(anyhow::Error::from)
        .and_then(into_registry)
    {
        Ok(registry) => {
            info!(
                "Loaded {} stations from TOML: {}",
                registry.len(),
                path.display()
            );
            Some(registry)
        }
        Err(e) => {
            warn!("Failed to load stations from {}: {}", path.display(), e);
            None
        }
    }
}

fn into_registry(stations: Vec<StationDescriptor>) -> anyhow::Result<StationRegistry> {
    Ok(StationRegistry::new(stations)?)
}

async fn fetch_m3u_url(url: &str) -> anyhow::Result<Vec<StationDescriptor>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    Ok(parse_m3u_from_str(&text))
}
