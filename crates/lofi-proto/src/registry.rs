//! Station registry: the immutable, ordered list of stations the player
//! can tune to, plus the loaders that build it from TOML and m3u sources.

use std::collections::HashSet;
use std::path::Path;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::RegistryError;
use crate::protocol::{AccentColor, StationDescriptor};

#[derive(Debug, Clone)]
pub struct StationRegistry {
    stations: Vec<StationDescriptor>,
}

impl StationRegistry {
    /// Build a registry, rejecting an empty list or duplicate ids.
    pub fn new(stations: Vec<StationDescriptor>) -> Result<Self, RegistryError> {
        if stations.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for station in &stations {
            if !seen.insert(station.id.as_str()) {
                return Err(RegistryError::DuplicateId(station.id.clone()));
            }
        }
        Ok(Self { stations })
    }

    /// The six lo-fi stations shipped with the player.
    pub fn builtin() -> Self {
        let station = |id: &str, name: &str, description: &str, url: &str, accent| {
            StationDescriptor {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                stream_url: url.to_string(),
                accent,
            }
        };
        Self {
            stations: vec![
                station(
                    "chillhop",
                    "Chillhop",
                    "The best of chill hip hop beats",
                    "https://radio.nia.nc/radio/8020/lofi-hq-stream.aac",
                    AccentColor::Amber,
                ),
                station(
                    "lofi-girl",
                    "Lofi Girl",
                    "Beats to relax/study to",
                    "https://play.streamafrica.net/lofiradio",
                    AccentColor::Purple,
                ),
                station(
                    "jazz-vibes",
                    "Jazz Vibes",
                    "Smooth jazz with lo-fi elements",
                    "http://stream.zeno.fm/3u1qndyk8rhvv",
                    AccentColor::Blue,
                ),
                station(
                    "sleep",
                    "Sleep Sounds",
                    "Ambient sounds for deep sleep",
                    "https://streaming.radio.co/s5c5da6a36/listen",
                    AccentColor::Indigo,
                ),
                station(
                    "nature",
                    "Nature Lofi",
                    "Natural sounds with gentle beats",
                    "https://stream.zeno.fm/uwgpqwmg0tzuv",
                    AccentColor::Emerald,
                ),
                station(
                    "focus",
                    "Focus Beats",
                    "Concentration-enhancing rhythms",
                    "http://usa9.fastcast4u.com/proxy/jamz?mp=/1",
                    AccentColor::Rose,
                ),
            ],
        }
    }

    pub fn list(&self) -> &[StationDescriptor] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Default station.  The registry is never empty.
    pub fn first(&self) -> &StationDescriptor {
        &self.stations[0]
    }

    pub fn get(&self, id: &str) -> Result<&StationDescriptor, RegistryError> {
        self.position(id).map(|idx| &self.stations[idx])
    }

    /// Circular successor of `after_id`.
    pub fn next(&self, after_id: &str) -> Result<&StationDescriptor, RegistryError> {
        let idx = self.position(after_id)?;
        Ok(&self.stations[(idx + 1) % self.stations.len()])
    }

    /// Circular predecessor of `before_id`.
    pub fn prev(&self, before_id: &str) -> Result<&StationDescriptor, RegistryError> {
        let idx = self.position(before_id)?;
        let prev = if idx == 0 {
            self.stations.len() - 1
        } else {
            idx - 1
        };
        Ok(&self.stations[prev])
    }

    /// A random station other than `id` (or `id` itself if it is the only one).
    pub fn random_other(&self, id: &str) -> Result<&StationDescriptor, RegistryError> {
        let idx = self.position(id)?;
        if self.stations.len() == 1 {
            return Ok(&self.stations[idx]);
        }
        let candidates: Vec<&StationDescriptor> = self
            .stations
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, s)| s)
            .collect();
        let mut rng = rand::thread_rng();
        candidates
            .choose(&mut rng)
            .copied()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    fn position(&self, id: &str) -> Result<usize, RegistryError> {
        self.stations
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

// ── m3u station loader ────────────────────────────────────────────────────────

/// Parse an extended m3u playlist.  Ids are derived from the `#EXTINF` title
/// and made unique; accent colours are cycled.
pub fn parse_m3u_from_str(content: &str) -> Vec<StationDescriptor> {
    let mut stations = Vec::new();
    let mut used_ids = HashSet::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        if !line.contains("://") {
            debug!("m3u: skipping non-URL entry '{}'", line);
            pending_name = None;
            continue;
        }
        let url = line.to_string();
        let name = pending_name.take().unwrap_or_else(|| url.clone());
        let id = unique_id(slugify(&name), &mut used_ids);
        let accent = AccentColor::ALL[stations.len() % AccentColor::ALL.len()];

        stations.push(StationDescriptor {
            id,
            name,
            description: String::new(),
            stream_url: url,
            accent,
        });
    }

    debug!("m3u: parsed {} stations", stations.len());
    stations
}

pub fn load_stations_from_m3u(path: &Path) -> Result<Vec<StationDescriptor>, RegistryError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_m3u_from_str(&content))
}

/// Lowercase, ASCII-alphanumeric words joined by `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("station");
    }
    slug
}

fn unique_id(base: String, used: &mut HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[station]]` table.
/// Kept separate from `StationDescriptor` so the file schema can use `url`
/// and optional ids without touching the wire struct.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    #[serde(default)]
    id: Option<String>,
    name: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    accent: Option<AccentColor>,
}

pub fn load_stations_from_toml(path: &Path) -> Result<Vec<StationDescriptor>, RegistryError> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(
    content: &str,
) -> Result<Vec<StationDescriptor>, RegistryError> {
    let file: TomlStationFile = toml::from_str(content)?;
    let mut used_ids = HashSet::new();
    let mut stations = Vec::with_capacity(file.station.len());
    for (idx, s) in file.station.into_iter().enumerate() {
        // Explicit ids are kept verbatim so duplicates surface in `StationRegistry::new`.
        let id = match s.id {
            Some(id) => {
                used_ids.insert(id.clone());
                id
            }
            None => unique_id(slugify(&s.name), &mut used_ids),
        };
        stations.push(StationDescriptor {
            id,
            name: s.name,
            description: s.description,
            stream_url: s.url,
            accent: s
                .accent
                .unwrap_or(AccentColor::ALL[idx % AccentColor::ALL.len()]),
        });
    }
    Ok(stations)
}
