use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::analytics::Envelope;
use crate::error::{GuidanceError, Result};
use crate::types::Destination;

/// Point of interest as served by the backend or the bundled JSON file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: i64,
    pub name: String,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Poi {
    pub fn to_destination(&self) -> Destination {
        Destination::new(self.id, self.name.clone(), self.latitude, self.longitude)
    }
}

/// Either a bare array or the `{success, data}` envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum PoiDocument {
    List(Vec<Poi>),
    Wrapped(Envelope<Vec<Poi>>),
}

#[derive(Clone, Debug, Default)]
pub struct PoiCatalog {
    pois: Vec<Poi>,
}

impl PoiCatalog {
    pub fn new(pois: Vec<Poi>) -> Self {
        Self { pois }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let pois = match serde_json::from_str::<PoiDocument>(text)? {
            PoiDocument::List(pois) => pois,
            PoiDocument::Wrapped(envelope) if envelope.success => envelope.data.unwrap_or_default(),
            PoiDocument::Wrapped(envelope) => {
                return Err(GuidanceError::Catalog(
                    envelope.message.unwrap_or_else(|| "backend reported failure".to_string()),
                ))
            }
        };

        let valid: Vec<Poi> = pois
            .into_iter()
            .filter(|p| {
                let ok = p.to_destination().position.is_valid();
                if !ok {
                    log::warn!("Skipping POI #{} with invalid coordinates", p.id);
                }
                ok
            })
            .collect();
        Ok(Self::new(valid))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&text)?;
        log::info!(
            "Loaded {} POIs from {}",
            catalog.len(),
            path.as_ref().display()
        );
        Ok(catalog)
    }

    /// `GET {base_url}/pois`
    pub async fn fetch(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let url = format!("{}/pois", base_url.trim_end_matches('/'));
        let text = get_text(&client, &url)
            .await
            .map_err(|e| GuidanceError::Catalog(format!("{}: {}", url, e)))?;
        let catalog = Self::from_json(&text)?;
        log::info!("Fetched {} POIs from {}", catalog.len(), url);
        Ok(catalog)
    }

    /// Backend first, local file when the backend is unreachable.
    pub async fn fetch_or_load(base_url: &str, fallback: impl AsRef<Path>) -> Result<Self> {
        match Self::fetch(base_url).await {
            Ok(catalog) => Ok(catalog),
            Err(e) => {
                log::warn!(
                    "POI backend unavailable ({}), falling back to {}",
                    e,
                    fallback.as_ref().display()
                );
                Self::load(fallback)
            }
        }
    }

    pub fn find(&self, id: i64) -> Option<&Poi> {
        self.pois.iter().find(|p| p.id == id)
    }

    /// Case-insensitive match on name, description or category.
    pub fn search(&self, query: &str) -> Vec<&Poi> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.pois.iter().collect();
        }
        self.pois
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                    || p.category
                        .as_deref()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn pois(&self) -> &[Poi] {
        &self.pois
    }

    pub fn len(&self) -> usize {
        self.pois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }
}

async fn get_text(client: &reqwest::Client, url: &str) -> reqwest::Result<String> {
    client.get(url).send().await?.error_for_status()?.text().await
}
