//! Collection resolver: turns an album or playlist id into its ordered item
//! list by paging the catalog API.
//!
//! Resolution fails soft: whatever was gathered before an error is returned,
//! and an empty result simply means the backend will work out the contents on
//! its own.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use stash_proto::config::CatalogConfig;
use stash_proto::protocol::{CollectionType, TrackRef};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub display_name: String,
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCollection {
    pub items: Vec<ResolvedItem>,
    pub collection_display_name: Option<String>,
}

impl ResolvedCollection {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in the shape the backend accepts with a download request.
    pub fn track_refs(&self) -> Vec<TrackRef> {
        self.items
            .iter()
            .map(|item| TrackRef {
                name: item.display_name.clone(),
                id: item.remote_id.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<Entry>,
    #[serde(default)]
    next: Option<String>,
}

/// Album pages list tracks directly; playlist pages wrap them in `track`.
#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    track: Option<Box<Entry>>,
}

impl Entry {
    fn into_item(self) -> Option<ResolvedItem> {
        let entry = match self.track {
            Some(inner) => *inner,
            None => self,
        };
        let name = entry.name?.trim().to_string();
        if name.is_empty() {
            return None;
        }
        Some(ResolvedItem {
            display_name: name,
            remote_id: entry.id.filter(|id| !id.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Clone)]
pub struct Resolver {
    client: Client,
    config: CatalogConfig,
}

impl Resolver {
    pub fn new(config: CatalogConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn page_size(&self, kind: CollectionType) -> u32 {
        match kind {
            CollectionType::Playlist => self.config.playlist_page_size,
            _ => self.config.album_page_size,
        }
        .max(1)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> anyhow::Result<T> {
        let mut req = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = self.config.access_token.as_deref() {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("catalog returned status: {}", resp.status());
        }
        Ok(resp.json().await?)
    }

    /// Resolve a collection.  Never fails; see module docs.
    pub async fn resolve(&self, kind: CollectionType, id: &str) -> ResolvedCollection {
        let base = self.config.base_url.trim_end_matches('/');

        if kind == CollectionType::Track {
            return match self.get::<Named>(&format!("{}/v1/tracks/{}", base, id)).await {
                Ok(track) => {
                    let name = track.name.filter(|n| !n.trim().is_empty());
                    ResolvedCollection {
                        items: name
                            .clone()
                            .map(|n| ResolvedItem {
                                display_name: n,
                                remote_id: track.id.or_else(|| Some(id.to_string())),
                            })
                            .into_iter()
                            .collect(),
                        collection_display_name: name,
                    }
                }
                Err(e) => {
                    warn!("resolver: track {} lookup failed: {}", id, e);
                    ResolvedCollection::default()
                }
            };
        }

        let cap = self.config.max_items;
        let limit = self.page_size(kind);
        let mut items = Vec::new();
        let mut offset = 0usize;

        while items.len() < cap {
            let url = format!(
                "{}/v1/{}s/{}/tracks?offset={}&limit={}",
                base, kind, id, offset, limit
            );
            let page: Page = match self.get(&url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        "resolver: {} {} page at offset {} failed, keeping {} items: {}",
                        kind,
                        id,
                        offset,
                        items.len(),
                        e
                    );
                    break;
                }
            };

            let received = page.items.len();
            debug!("resolver: {} {} offset={} received={}", kind, id, offset, received);
            for entry in page.items {
                if items.len() >= cap {
                    break;
                }
                if let Some(item) = entry.into_item() {
                    items.push(item);
                }
            }

            if page.next.is_none() || received == 0 {
                break;
            }
            offset += received;
        }

        let name_url = match kind {
            CollectionType::Playlist => format!("{}/v1/playlists/{}?fields=name", base, id),
            _ => format!("{}/v1/{}s/{}", base, kind, id),
        };
        let collection_display_name = match self.get::<Named>(&name_url).await {
            Ok(named) => named.name.filter(|n| !n.trim().is_empty()),
            Err(e) => {
                warn!("resolver: name lookup for {} {} failed: {}", kind, id, e);
                None
            }
        };

        info!(
            "resolver: {} {} resolved to {} items ({:?})",
            kind,
            id,
            items.len(),
            collection_display_name
        );
        ResolvedCollection {
            items,
            collection_display_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_unwraps_playlist_track() {
        let entry: Entry =
            serde_json::from_str(r#"{"added_at":"x","track":{"name":" Song ","id":"t1"}}"#).unwrap();
        assert_eq!(
            entry.into_item(),
            Some(ResolvedItem {
                display_name: "Song".into(),
                remote_id: Some("t1".into()),
            })
        );
    }

    #[test]
    fn test_entry_without_name_is_dropped() {
        let entry: Entry = serde_json::from_str(r#"{"track":{"name":"","id":"t1"}}"#).unwrap();
        assert!(entry.into_item().is_none());
        let entry: Entry = serde_json::from_str(r#"{"id":"t2"}"#).unwrap();
        assert!(entry.into_item().is_none());
    }

    #[test]
    fn test_track_refs_keep_order() {
        let resolved = ResolvedCollection {
            items: vec![
                ResolvedItem { display_name: "A".into(), remote_id: Some("1".into()) },
                ResolvedItem { display_name: "B".into(), remote_id: None },
            ],
            collection_display_name: Some("Mix".into()),
        };
        let refs = resolved.track_refs();
        assert_eq!(refs[0].name, "A");
        assert_eq!(refs[1].id, None);
    }
}
