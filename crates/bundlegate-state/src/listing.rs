//! Listing and versioning collaborators.
//!
//! The pipeline only hands over `(listingId, title, authorUid, buildId)` plus
//! optional display metadata; slug uniqueness and version numbering live
//! here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StateError;
use crate::fs_store::{read_json, write_json_atomic};
use crate::StateResult;

/// Locales accepted in listing translations.
pub const SUPPORTED_LOCALES: [&str; 3] = ["en", "hr", "de"];

const MAX_SLUG_LEN: usize = 80;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListingTranslation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedVersion {
    pub version: u32,
    pub build_id: String,
    pub archived_at: DateTime<Utc>,
}

/// Stored marketplace listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub author_uid: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub translations: BTreeMap<String, ListingTranslation>,
    pub build_id: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_build_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_version: Option<u32>,
    #[serde(default)]
    pub archived_versions: Vec<ArchivedVersion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create-or-update request handed over by the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingUpsert {
    pub listing_id: Option<String>,
    pub title: String,
    pub author_uid: String,
    pub build_id: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub translations: BTreeMap<String, ListingTranslation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingRef {
    pub listing_id: String,
    pub slug: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NextVersion {
    pub version: u32,
    pub archived_versions: Vec<ArchivedVersion>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait Versioning: Send + Sync {
    fn compute_next_version(&self, existing: Option<&ListingRecord>, now: DateTime<Utc>)
        -> NextVersion;
}

/// Versions count up from 1; the build being replaced is archived.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicVersioning;

impl Versioning for MonotonicVersioning {
    fn compute_next_version(
        &self,
        existing: Option<&ListingRecord>,
        now: DateTime<Utc>,
    ) -> NextVersion {
        let Some(existing) = existing else {
            return NextVersion {
                version: 1,
                archived_versions: Vec::new(),
            };
        };
        let current = existing.version.max(existing.pending_version.unwrap_or(0));
        let mut archived = existing.archived_versions.clone();
        if !archived.iter().any(|a| a.build_id == existing.build_id) {
            archived.push(ArchivedVersion {
                version: existing.version,
                build_id: existing.build_id.clone(),
                archived_at: now,
            });
        }
        NextVersion {
            version: current + 1,
            archived_versions: archived,
        }
    }
}

#[async_trait]
pub trait ListingService: Send + Sync {
    async fn upsert(&self, request: ListingUpsert) -> StateResult<ListingRef>;

    async fn get(&self, listing_id: &str) -> StateResult<ListingRecord>;
}

// ---------------------------------------------------------------------------
// Slugs and translations
// ---------------------------------------------------------------------------

/// Lowercase, collapse non-alphanumeric runs to `-`, trim, cap at 80 chars.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars().flat_map(|c| c.to_lowercase()) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

/// Append `-1`, `-2`, ... until `taken` no longer matches.
pub fn uniquify_slug(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{}-{}", base, counter);
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Keep supported locales with at least one non-empty field.
pub fn sanitize_translations(
    input: &BTreeMap<String, ListingTranslation>,
) -> BTreeMap<String, ListingTranslation> {
    let clean = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    input
        .iter()
        .filter(|(locale, _)| SUPPORTED_LOCALES.contains(&locale.as_str()))
        .filter_map(|(locale, t)| {
            let entry = ListingTranslation {
                title: clean(&t.title),
                description: clean(&t.description),
            };
            (entry.title.is_some() || entry.description.is_some()).then(|| (locale.clone(), entry))
        })
        .collect()
}

/// Field-wise merge: incoming values win, missing ones keep the existing value.
pub fn merge_translations(
    existing: &mut BTreeMap<String, ListingTranslation>,
    incoming: BTreeMap<String, ListingTranslation>,
) {
    for (locale, update) in incoming {
        let slot = existing.entry(locale).or_default();
        if update.title.is_some() {
            slot.title = update.title;
        }
        if update.description.is_some() {
            slot.description = update.description;
        }
    }
}

/// Apply an upsert to an in-memory listing set.
pub fn apply_upsert(
    listings: &mut Vec<ListingRecord>,
    request: ListingUpsert,
    versioning: &dyn Versioning,
    now: DateTime<Utc>,
) -> ListingRef {
    let idx = request
        .listing_id
        .as_deref()
        .and_then(|id| listings.iter().position(|l| l.id == id));
    let next = versioning.compute_next_version(idx.map(|i| &listings[i]), now);
    let translations = sanitize_translations(&request.translations);

    if let Some(i) = idx {
        let listing = &mut listings[i];
        listing.title = request.title;
        if let Some(description) = request.description {
            listing.description = description;
        }
        if !request.tags.is_empty() {
            listing.tags = request.tags;
        }
        merge_translations(&mut listing.translations, translations);
        listing.pending_build_id = Some(request.build_id);
        listing.pending_version = Some(next.version);
        listing.archived_versions = next.archived_versions;
        listing.updated_at = now;
        return ListingRef {
            listing_id: listing.id.clone(),
            slug: listing.slug.clone(),
            version: next.version,
        };
    }

    let listing_id = request.listing_id.unwrap_or_else(|| {
        let max = listings
            .iter()
            .filter_map(|l| l.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    });
    let base = match slugify(&request.title) {
        s if s.is_empty() => format!("app-{}", listing_id),
        s => s,
    };
    let slug = uniquify_slug(&base, |candidate| listings.iter().any(|l| l.slug == candidate));

    listings.push(ListingRecord {
        id: listing_id.clone(),
        slug: slug.clone(),
        title: request.title,
        description: request.description.unwrap_or_default(),
        author_uid: request.author_uid,
        tags: request.tags,
        translations,
        build_id: request.build_id.clone(),
        version: next.version,
        pending_build_id: Some(request.build_id),
        pending_version: Some(next.version),
        archived_versions: next.archived_versions,
        created_at: now,
        updated_at: now,
    });
    ListingRef {
        listing_id,
        slug,
        version: next.version,
    }
}

// ---------------------------------------------------------------------------
// FsListingStore
// ---------------------------------------------------------------------------

/// Listings kept in a single `listings.json` under the data root.
pub struct FsListingStore {
    path: PathBuf,
    versioning: Arc<dyn Versioning>,
    lock: Mutex<()>,
}

impl FsListingStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            path: data_root.as_ref().join("listings.json"),
            versioning: Arc::new(MonotonicVersioning),
            lock: Mutex::new(()),
        }
    }

    pub fn with_versioning(mut self, versioning: Arc<dyn Versioning>) -> Self {
        self.versioning = versioning;
        self
    }

    fn load(&self) -> StateResult<Vec<ListingRecord>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

#[async_trait]
impl ListingService for FsListingStore {
    async fn upsert(&self, request: ListingUpsert) -> StateResult<ListingRef> {
        let _guard = self.lock.lock().await;
        let mut listings = self.load()?;
        let listing = apply_upsert(&mut listings, request, self.versioning.as_ref(), Utc::now());
        write_json_atomic(&self.path, &listings)?;
        Ok(listing)
    }

    async fn get(&self, listing_id: &str) -> StateResult<ListingRecord> {
        self.load()?
            .into_iter()
            .find(|l| l.id == listing_id)
            .ok_or_else(|| StateError::ListingNotFound(listing_id.to_string()))
    }
}
