//! Response documents returned by the content platform.
//!
//! Upstream omits fields or sends `null` freely, so everything decodes to a
//! default instead of failing. Whether a value is actually usable is decided
//! by the resolver.

use serde::Deserialize;
use serde_aux::prelude::*;

/// `GET /v3/config/pages?url=<slug>`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub data: PageConfigData,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfigData {
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub domain_config: DomainConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainConfig {
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub supported_locales: Vec<String>,
}

impl PageConfig {
    pub fn locales(&self) -> &[String] {
        &self.data.domain_config.supported_locales
    }
}

/// `GET /v3/api/graphql/v1/v3/feed/<locale>`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub data: FeedData,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_default_from_null")]
    pub page_meta: PageMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageMeta {
    #[serde(default, rename = "og:image")]
    pub og_image: Option<String>,
}

impl FeedPage {
    /// Video id, if upstream sent a non-empty one.
    pub fn video_id(&self) -> Option<&str> {
        self.data.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.data.page_meta.og_image.as_deref()
    }
}

/// `GET /rbcom/videoresource?videoId=<id>&localeMixing=<locale>`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl VideoResource {
    pub fn media_url(&self) -> Option<&str> {
        self.video_url.as_deref().filter(|url| !url.is_empty())
    }
}
