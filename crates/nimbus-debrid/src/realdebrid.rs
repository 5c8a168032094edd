//! RealDebrid REST client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::client::{DebridClient, Profile};
use crate::error::{DebridError, DebridResult};
use crate::model::{DownloadLink, Torrent, TorrentFile};

/// Restricted links from this provider share their first 39 characters per
/// file; the tail varies per issue, so the cache keys on the prefix.
const LINK_KEY_PREFIX: usize = 39;

/// Client for the RealDebrid REST API.
pub struct RealDebridClient {
    name: String,
    http: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct TorrentInfoDto {
    id: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    original_filename: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    added: Option<DateTime<Utc>>,
    #[serde(default)]
    files: Vec<TorrentFileDto>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TorrentFileDto {
    #[serde(default)]
    path: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    selected: u8,
}

#[derive(Debug, Deserialize)]
struct AddMagnetDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UnrestrictDto {
    id: String,
    #[serde(default)]
    download: String,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    #[serde(default)]
    username: String,
    #[serde(default)]
    premium: u64,
}

#[derive(Debug, Deserialize)]
struct DownloadDto {
    id: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    download: String,
}

impl RealDebridClient {
    /// Construct a client for the given API base URL.
    #[must_use]
    pub fn new(name: String, api_url: String) -> Self {
        Self {
            name,
            http: reqwest::Client::new(),
            api_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url.trim_end_matches('/'))
    }

    async fn check(response: reqwest::Response) -> DebridResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<ApiErrorBody>(&message)
            .map(|body| body.error)
            .unwrap_or_default();
        Err(classify(status.as_u16(), &code, message))
    }

    fn torrent_from(dto: TorrentInfoDto) -> Torrent {
        let mut files = HashMap::new();
        let selected: Vec<&TorrentFileDto> =
            dto.files.iter().filter(|file| file.selected == 1).collect();
        for (index, file) in selected.iter().enumerate() {
            let name = file
                .path
                .rsplit('/')
                .next()
                .unwrap_or(file.path.as_str())
                .to_owned();
            files.insert(
                name.clone(),
                TorrentFile {
                    torrent_id: dto.id.clone(),
                    name: name.clone(),
                    path: file.path.clone(),
                    size: file.bytes,
                    link: dto.links.get(index).cloned().unwrap_or_default(),
                    byte_range: None,
                    is_rar: name.to_ascii_lowercase().ends_with(".rar"),
                    deleted: false,
                },
            );
        }
        Torrent {
            id: dto.id,
            info_hash: dto.hash.to_lowercase(),
            name: dto.filename.clone(),
            filename: dto.filename,
            original_filename: dto.original_filename,
            size: dto.bytes,
            added_at: dto.added.unwrap_or_else(Utc::now),
            files,
        }
    }
}

fn classify(status: u16, code: &str, message: String) -> DebridError {
    if code.contains("hoster_unavailable") || code.contains("hoster_not_free") {
        return DebridError::HosterUnavailable;
    }
    if code.contains("traffic_exceeded") || message.contains("traffic") {
        return DebridError::TrafficExceeded;
    }
    if code.contains("too_many_active_downloads") {
        return DebridError::TooManyActiveDownloads;
    }
    match status {
        401 | 403 => DebridError::Auth,
        404 => DebridError::NotFound {
            id: String::new(),
        },
        _ => DebridError::Api { status, message },
    }
}

#[async_trait]
impl DebridClient for RealDebridClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_magnet(&self, token: &str, magnet: &str) -> DebridResult<String> {
        let response = self
            .http
            .post(self.url("/torrents/addMagnet"))
            .bearer_auth(token)
            .form(&[("magnet", magnet)])
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        let added: AddMagnetDto = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|source| DebridError::Http { source })?;

        // Select everything so the provider starts or links the payload.
        let response = self
            .http
            .post(self.url(&format!("/torrents/selectFiles/{}", added.id)))
            .bearer_auth(token)
            .form(&[("files", "all")])
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Self::check(response).await?;
        debug!(torrent_id = %added.id, "magnet submitted");
        Ok(added.id)
    }

    async fn check_status(
        &self,
        token: &str,
        torrent_id: &str,
        _download_uncached: bool,
    ) -> DebridResult<Torrent> {
        self.get_torrent(token, torrent_id).await
    }

    async fn get_torrents(&self, token: &str) -> DebridResult<Vec<Torrent>> {
        let response = self
            .http
            .get(self.url("/torrents"))
            .query(&[("limit", "2500")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        let list: Vec<TorrentInfoDto> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Ok(list.into_iter().map(Self::torrent_from).collect())
    }

    async fn get_torrent(&self, token: &str, torrent_id: &str) -> DebridResult<Torrent> {
        let response = self
            .http
            .get(self.url(&format!("/torrents/info/{torrent_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        let dto: TorrentInfoDto = Self::check(response)
            .await
            .map_err(|err| match err {
                DebridError::NotFound { .. } => DebridError::NotFound {
                    id: torrent_id.to_owned(),
                },
                other => other,
            })?
            .json()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Ok(Self::torrent_from(dto))
    }

    async fn update_torrent(&self, token: &str, torrent: &Torrent) -> DebridResult<Torrent> {
        self.get_torrent(token, &torrent.id).await
    }

    async fn delete_torrent(&self, token: &str, torrent_id: &str) -> DebridResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/torrents/delete/{torrent_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Self::check(response).await.map(|_| ())
    }

    async fn get_download_link(
        &self,
        token: &str,
        _torrent: &Torrent,
        file: &TorrentFile,
    ) -> DebridResult<DownloadLink> {
        let response = self
            .http
            .post(self.url("/unrestrict/link"))
            .bearer_auth(token)
            .form(&[("link", file.link.as_str())])
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        let dto: UnrestrictDto = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Ok(DownloadLink {
            id: dto.id,
            token: String::new(),
            link: file.link.clone(),
            download_link: dto.download,
            expires_at: Utc::now(),
            account_id: 0,
        })
    }

    async fn get_downloads(&self, token: &str) -> DebridResult<Vec<DownloadLink>> {
        let response = self
            .http
            .get(self.url("/downloads"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        let list: Vec<DownloadDto> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Ok(list
            .into_iter()
            .map(|dto| DownloadLink {
                id: dto.id,
                token: String::new(),
                link: dto.link,
                download_link: dto.download,
                expires_at: Utc::now(),
                account_id: 0,
            })
            .collect())
    }

    async fn delete_download_link(&self, token: &str, link_id: &str) -> DebridResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/downloads/delete/{link_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Self::check(response).await.map(|_| ())
    }

    async fn check_link(&self, token: &str, link: &str) -> DebridResult<()> {
        let response = self
            .http
            .post(self.url("/unrestrict/check"))
            .bearer_auth(token)
            .form(&[("link", link)])
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        match Self::check(response).await {
            Ok(_) => Ok(()),
            Err(DebridError::NotFound { .. } | DebridError::Api { status: 503, .. }) => {
                Err(DebridError::HosterUnavailable)
            }
            Err(other) => Err(other),
        }
    }

    async fn get_profile(&self, token: &str) -> DebridResult<Profile> {
        let response = self
            .http
            .get(self.url("/user"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        let dto: UserDto = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Ok(Profile {
            username: dto.username,
            traffic_used: 0,
            premium: dto.premium > 0,
        })
    }

    async fn get_available_slots(&self, token: &str) -> DebridResult<usize> {
        let response = self
            .http
            .get(self.url("/torrents/activeCount"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DebridError::Http { source })?;
        #[derive(Deserialize)]
        struct ActiveCount {
            #[serde(default)]
            nb: usize,
            #[serde(default)]
            limit: usize,
        }
        let dto: ActiveCount = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|source| DebridError::Http { source })?;
        Ok(dto.limit.saturating_sub(dto.nb))
    }

    fn link_cache_key<'a>(&self, link: &'a str) -> &'a str {
        if link.len() > LINK_KEY_PREFIX {
            let mut cut = LINK_KEY_PREFIX;
            while !link.is_char_boundary(cut) {
                cut -= 1;
            }
            &link[..cut]
        } else {
            link
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_the_taxonomy() {
        assert!(matches!(
            classify(503, "hoster_unavailable", String::new()),
            DebridError::HosterUnavailable
        ));
        assert!(matches!(
            classify(509, "traffic_exceeded", String::new()),
            DebridError::TrafficExceeded
        ));
        assert!(matches!(
            classify(509, "too_many_active_downloads", String::new()),
            DebridError::TooManyActiveDownloads
        ));
        assert!(matches!(classify(401, "", String::new()), DebridError::Auth));
        assert!(matches!(
            classify(404, "", String::new()),
            DebridError::NotFound { .. }
        ));
        assert!(matches!(
            classify(500, "", "boom".to_owned()),
            DebridError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn link_keys_are_prefix_bounded() {
        let client = RealDebridClient::new("realdebrid".into(), "https://api".into());
        let long = "https://real-debrid.com/d/ABCDEFGHIJKLMNOPQR/suffix-variant";
        assert_eq!(client.link_cache_key(long).len(), 39);
        let short = "https://rd/d/A";
        assert_eq!(client.link_cache_key(short), short);
    }
}
