//! Page reference -> live stream resolution.
//!
//! The platform has no endpoint that maps a page path straight to a stream,
//! so resolution runs three strictly sequential stages against it:
//!
//! 1. **locale**: the page configuration lists the locales the page exists
//!    in; both later endpoints are locale scoped.
//! 2. **metadata**: the locale feed maps the page slug to a video id and a
//!    thumbnail.
//! 3. **stream**: the player API maps the video id to a media playlist URL
//!    and a title.
//!
//! A failing stage stops the pipeline; nothing is retried.

use std::{fmt, sync::Mutex};

use rand::{rngs::StdRng, SeedableRng};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::{
    sanitize,
    upstream::{FeedPage, PageConfig, VideoResource},
    util::HttpClient,
};

pub const DEFAULT_SITE_URL: &str = "https://www.redbull.com";
pub const DEFAULT_PLAYER_API_URL: &str = "https://api-player.redbull.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Locale,
    Metadata,
    Stream,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Locale => "locale",
            Stage::Metadata => "metadata",
            Stage::Stream => "stream",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("missing url parameter")]
    InvalidInput,
    #[error("unable to fetch locales for /{slug}: upstream returned {status}")]
    UpstreamUnavailable { slug: String, status: StatusCode },
    #[error("no locales available for /{slug}")]
    NoLocalesAvailable { slug: String },
    #[error("unable to fetch video metadata for /{slug}")]
    MetadataUnavailable {
        slug: String,
        status: Option<StatusCode>,
    },
    #[error("unable to fetch M3U stream for /{slug}")]
    StreamUnavailable {
        slug: String,
        status: Option<StatusCode>,
    },
    #[error("{stage} request for /{slug} failed")]
    Request {
        stage: Stage,
        slug: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not build HTTP client")]
    Client(#[source] reqwest::Error),
}

impl ResolveError {
    /// Stage the pipeline stopped at, if it got past input validation.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ResolveError::InvalidInput | ResolveError::Client(_) => None,
            ResolveError::UpstreamUnavailable { .. } | ResolveError::NoLocalesAvailable { .. } => {
                Some(Stage::Locale)
            }
            ResolveError::MetadataUnavailable { .. } => Some(Stage::Metadata),
            ResolveError::StreamUnavailable { .. } => Some(Stage::Stream),
            ResolveError::Request { stage, .. } => Some(*stage),
        }
    }

    /// Message shown to whoever asked for the video.
    pub fn user_message(&self) -> &'static str {
        match self {
            ResolveError::InvalidInput => "Missing url parameter",
            ResolveError::NoLocalesAvailable { .. } => "No locales available for this video",
            ResolveError::Client(_) => "Internal server error",
            _ => match self.stage() {
                Some(Stage::Locale) => "Unable to fetch video locales",
                Some(Stage::Metadata) => "Unable to fetch video metadata",
                _ => "Unable to fetch M3U stream",
            },
        }
    }
}

/// Percent-decoded path of a page reference without leading slashes, e.g.
/// `en/videos/some-race`. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugPath(String);

impl SlugPath {
    pub fn from_page_reference(reference: &str) -> Result<Self, ResolveError> {
        let reference = reference.trim();
        let path = match reqwest::Url::parse(reference) {
            Ok(url) => url.path().to_string(),
            // No scheme: treat the whole thing as a path.
            Err(_) => reference
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };

        // Upstream gets the path as the user reads it; the query encoder
        // escapes it once.
        let path = urlencoding::decode_binary(path.as_bytes());
        let path = String::from_utf8_lossy(&path);

        let slug = path.trim_start_matches('/');
        if slug.is_empty() {
            return Err(ResolveError::InvalidInput);
        }

        Ok(SlugPath(slug.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment, the `uriSlug` the feed is filtered by.
    pub fn last_segment(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl fmt::Display for SlugPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Picks the first locale containing `en` (any case), else the first one.
pub fn select_locale(locales: &[String]) -> Option<&str> {
    locales
        .iter()
        .find(|l| l.to_lowercase().contains("en"))
        .or_else(|| locales.first())
        .map(String::as_str)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub video_id: String,
    /// Empty when upstream has none.
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub media_url: String,
    /// Sanitized title, or a generated placeholder.
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVideo {
    pub slug: SlugPath,
    pub locale: String,
    pub metadata: VideoMetadata,
    pub stream: StreamDescriptor,
}

/// Base URLs of the two upstream hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub site: String,
    pub player_api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            site: DEFAULT_SITE_URL.to_string(),
            player_api: DEFAULT_PLAYER_API_URL.to_string(),
        }
    }
}

impl Endpoints {
    fn page_config(&self) -> String {
        format!("{}/v3/config/pages", self.site.trim_end_matches('/'))
    }

    fn feed(&self, locale: &str) -> String {
        format!(
            "{}/v3/api/graphql/v1/v3/feed/{}",
            self.site.trim_end_matches('/'),
            locale
        )
    }

    fn video_resource(&self) -> String {
        format!("{}/rbcom/videoresource", self.player_api.trim_end_matches('/'))
    }
}

pub struct Resolver {
    endpoints: Endpoints,
    rng: Mutex<StdRng>,
}

impl Resolver {
    pub fn new(endpoints: Endpoints) -> Self {
        Resolver {
            endpoints,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the random source used for placeholder titles.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub async fn resolve(&self, page_reference: &str) -> Result<ResolvedVideo, ResolveError> {
        let slug = SlugPath::from_page_reference(page_reference)?;
        let client = HttpClient::new(page_reference).map_err(ResolveError::Client)?;

        let locale = self.resolve_locale(&client, &slug).await?;
        let metadata = self.resolve_metadata(&client, &slug, &locale).await?;
        let stream = self
            .resolve_stream(&client, &slug, &metadata, &locale)
            .await?;

        Ok(ResolvedVideo {
            slug,
            locale,
            metadata,
            stream,
        })
    }

    async fn resolve_locale(
        &self,
        client: &HttpClient,
        slug: &SlugPath,
    ) -> Result<String, ResolveError> {
        let resp = client
            .get(&self.endpoints.page_config(), &[("url", slug.as_str())])
            .await
            .map_err(|e| request_error(Stage::Locale, slug, e))?;

        if resp.status() != StatusCode::OK {
            return Err(ResolveError::UpstreamUnavailable {
                slug: slug.to_string(),
                status: resp.status(),
            });
        }

        let config: PageConfig = decode(Stage::Locale, slug, resp).await?;
        let locale = select_locale(config.locales()).ok_or_else(|| {
            ResolveError::NoLocalesAvailable {
                slug: slug.to_string(),
            }
        })?;

        debug!("Selected locale {} of {:?} for /{}", locale, config.locales(), slug);
        Ok(locale.to_string())
    }

    async fn resolve_metadata(
        &self,
        client: &HttpClient,
        slug: &SlugPath,
        locale: &str,
    ) -> Result<VideoMetadata, ResolveError> {
        let page_url = format!("/{}", slug);
        let query = [
            ("disableUsageRestrictions", "true"),
            ("filter[uriSlug]", slug.last_segment()),
            ("rb3Schema", "v1:pageConfig"),
            ("rb3PageUrl", page_url.as_str()),
        ];

        let resp = client
            .get(&self.endpoints.feed(locale), &query)
            .await
            .map_err(|e| request_error(Stage::Metadata, slug, e))?;

        if resp.status() != StatusCode::OK {
            return Err(ResolveError::MetadataUnavailable {
                slug: slug.to_string(),
                status: Some(resp.status()),
            });
        }

        let page: FeedPage = decode(Stage::Metadata, slug, resp).await?;
        let video_id = page
            .video_id()
            .ok_or_else(|| ResolveError::MetadataUnavailable {
                slug: slug.to_string(),
                status: None,
            })?;

        Ok(VideoMetadata {
            video_id: video_id.to_string(),
            thumbnail_url: page.thumbnail_url().unwrap_or_default().to_string(),
        })
    }

    async fn resolve_stream(
        &self,
        client: &HttpClient,
        slug: &SlugPath,
        metadata: &VideoMetadata,
        locale: &str,
    ) -> Result<StreamDescriptor, ResolveError> {
        let query = [
            ("videoId", metadata.video_id.as_str()),
            ("localeMixing", locale),
        ];

        let resp = client
            .get(&self.endpoints.video_resource(), &query)
            .await
            .map_err(|e| request_error(Stage::Stream, slug, e))?;

        if resp.status() != StatusCode::OK {
            return Err(ResolveError::StreamUnavailable {
                slug: slug.to_string(),
                status: Some(resp.status()),
            });
        }

        let resource: VideoResource = decode(Stage::Stream, slug, resp).await?;
        let media_url = resource
            .media_url()
            .ok_or_else(|| ResolveError::StreamUnavailable {
                slug: slug.to_string(),
                status: None,
            })?;

        Ok(StreamDescriptor {
            media_url: media_url.to_string(),
            title: self.title_for(resource.title.as_deref()),
        })
    }

    fn title_for(&self, upstream: Option<&str>) -> String {
        let sanitized = upstream.map(sanitize::sanitize_title).unwrap_or_default();
        if !sanitized.is_empty() {
            return sanitized;
        }

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        sanitize::placeholder_title(&mut *rng)
    }
}

fn request_error(stage: Stage, slug: &SlugPath, source: reqwest::Error) -> ResolveError {
    ResolveError::Request {
        stage,
        slug: slug.to_string(),
        source,
    }
}

async fn decode<T: DeserializeOwned>(
    stage: Stage,
    slug: &SlugPath,
    resp: reqwest::Response,
) -> Result<T, ResolveError> {
    resp.json().await.map_err(|e| request_error(stage, slug, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locales(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prefers_english_locale() {
        assert_eq!(select_locale(&locales(&["de", "en-US", "fr"])), Some("en-US"));
        assert_eq!(select_locale(&locales(&["de-AT", "EN-int"])), Some("EN-int"));
    }

    #[test]
    fn falls_back_to_first_locale() {
        assert_eq!(select_locale(&locales(&["de", "fr"])), Some("de"));
        assert_eq!(select_locale(&[]), None);
    }

    #[test]
    fn slug_from_full_url() {
        let slug = SlugPath::from_page_reference(
            "https://www.redbull.com/int-en/videos/red-bull-rampage-2024?autoplay=1",
        )
        .unwrap();
        assert_eq!(slug.as_str(), "int-en/videos/red-bull-rampage-2024");
        assert_eq!(slug.last_segment(), "red-bull-rampage-2024");
    }

    #[test]
    fn slug_is_the_same_for_url_and_bare_path() {
        let from_url =
            SlugPath::from_page_reference("https://www.redbull.com/de-de/videos/über alles").unwrap();
        let from_path = SlugPath::from_page_reference("de-de/videos/über alles").unwrap();
        assert_eq!(from_url.as_str(), "de-de/videos/über alles");
        assert_eq!(from_url, from_path);
        assert_eq!(from_url.last_segment(), "über alles");
    }

    #[test]
    fn escaped_slug_is_decoded() {
        let slug =
            SlugPath::from_page_reference("https://www.redbull.com/en/videos/red%20bull%C3%BC")
                .unwrap();
        assert_eq!(slug.as_str(), "en/videos/red bullü");
    }

    #[test]
    fn slug_from_bare_path() {
        let slug = SlugPath::from_page_reference("//en/episodes/ep-1/#top").unwrap();
        assert_eq!(slug.as_str(), "en/episodes/ep-1/");
        assert_eq!(slug.last_segment(), "ep-1");
    }

    #[test]
    fn empty_slug_is_invalid_input() {
        for reference in ["", "   ", "/", "https://www.redbull.com/", "https://www.redbull.com"] {
            assert!(
                matches!(
                    SlugPath::from_page_reference(reference),
                    Err(ResolveError::InvalidInput)
                ),
                "{:?}",
                reference
            );
        }
    }

    #[test]
    fn endpoints_tolerate_trailing_slash() {
        let endpoints = Endpoints {
            site: "http://site/".into(),
            player_api: "http://player/".into(),
        };
        assert_eq!(endpoints.page_config(), "http://site/v3/config/pages");
        assert_eq!(endpoints.feed("en"), "http://site/v3/api/graphql/v1/v3/feed/en");
        assert_eq!(endpoints.video_resource(), "http://player/rbcom/videoresource");
    }

    #[test]
    fn user_messages_are_distinct_per_stage() {
        let slug = "x".to_string();
        let messages = [
            ResolveError::NoLocalesAvailable { slug: slug.clone() }.user_message(),
            ResolveError::UpstreamUnavailable {
                slug: slug.clone(),
                status: StatusCode::BAD_GATEWAY,
            }
            .user_message(),
            ResolveError::MetadataUnavailable {
                slug: slug.clone(),
                status: None,
            }
            .user_message(),
            ResolveError::StreamUnavailable { slug, status: None }.user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn placeholder_when_title_missing_or_unusable() {
        let resolver =
            Resolver::new(Endpoints::default()).with_rng(StdRng::seed_from_u64(1));
        assert_eq!(resolver.title_for(Some("My Video!")), "My_Video");
        for title in [None, Some(""), Some("???")] {
            let generated = resolver.title_for(title);
            assert!(generated.starts_with(sanitize::PLACEHOLDER_PREFIX));
            assert_eq!(generated.len(), sanitize::PLACEHOLDER_PREFIX.len() + 8);
        }
    }
}
