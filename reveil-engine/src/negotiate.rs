//! Source selection through the remote catalog.
//!
//! An alarm configured to play a named genre, playlist or radio station
//! has to resolve that name into a playable catalog item at firing time.
//! The negotiator walks the hierarchical catalog for it: activate the
//! configured listening profile if it differs from the one last activated
//! for this session, open the list for the configured source type, match
//! the entry by title, then descend through the activation sub-items
//! until a terminal action completes.
//!
//! Every firing uses its own session key, so concurrent alarms never
//! interleave their catalog cursors. A failing step halts the whole
//! negotiation; the caller's action pipeline stops without a play
//! command, there is no fallback to the queue and no retry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::rule::{SourceSpec, SourceType};
use crate::tracing::prelude::*;
use crate::transport::{
    Browse, BrowseError, BrowseItem, BrowseList, BrowseOpts, BrowseOutcome, ItemHint, LoadOpts,
    ZoneId,
};

/// Entries fetched per catalog page.
const PAGE_SIZE: usize = 100;

/// Title of the root-level list holding the listening profiles.
const PROFILE_LIST_TITLE: &str = "Profiles";

/// Bound on activation descent below a matched entry. Real catalogs need
/// one or two levels; anything deeper is a traversal gone wrong.
const MAX_ACTIVATION_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum NegotiateError {
    #[error(transparent)]
    Remote(#[from] BrowseError),

    #[error("remote reported: {0}")]
    Rejected(String),

    #[error("catalog list {0:?} not found")]
    ListNotFound(String),

    #[error("{0:?} not found under {1:?}")]
    EntryNotFound(String, String),

    #[error("list {0:?} has no entries")]
    EmptyList(String),

    #[error("no activation path below {0:?}")]
    NoActivation(String),
}

/// Resolves configured source names into catalog activations.
pub struct Negotiator {
    browse: Arc<dyn Browse>,
    /// Profile last activated per session key; lets repeat firings skip
    /// the profile dance when nothing changed.
    active_profiles: Mutex<HashMap<String, String>>,
}

impl Negotiator {
    pub fn new(browse: Arc<dyn Browse>) -> Self {
        Self {
            browse,
            active_profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Forget which profiles are active. The next firing per session
    /// re-activates its configured profile unconditionally.
    pub fn reset(&self) {
        self.active_profiles.lock().clear();
    }

    /// Run the full negotiation for one firing: profile, source type
    /// list, entry match, activation.
    pub async fn select(
        &self,
        session_key: &str,
        zone_id: &ZoneId,
        source: &SourceSpec,
    ) -> Result<(), NegotiateError> {
        if let Some(profile) = &source.profile {
            let unchanged = self
                .active_profiles
                .lock()
                .get(session_key)
                .is_some_and(|active| active == profile);
            if !unchanged {
                self.select_profile(session_key, zone_id, profile).await?;
                self.active_profiles
                    .lock()
                    .insert(session_key.to_string(), profile.clone());
            }
        }

        // The zone's existing queue needs no catalog item; the play
        // command alone resumes it.
        if source.source_type == SourceType::Queue {
            return Ok(());
        }

        let list_title = source.source_type.list_title();
        self.open_root(session_key, zone_id).await?;
        let category = self
            .find_exact(session_key, list_title)
            .await?
            .ok_or_else(|| NegotiateError::ListNotFound(list_title.to_string()))?;

        let list = match self.descend(session_key, zone_id, &category).await? {
            BrowseOutcome::List(list) => list,
            BrowseOutcome::Complete => return Ok(()),
            BrowseOutcome::Message {
                is_error: true,
                message,
            } => return Err(NegotiateError::Rejected(message)),
            BrowseOutcome::Message { .. } => return Ok(()),
        };

        let entry = self.match_entry(session_key, &source.name, &list).await?;
        debug!(session = session_key, entry = %entry.title, "source entry matched");
        self.activate(
            session_key,
            zone_id,
            source.source_type.activation_titles(),
            entry,
        )
        .await
    }

    /// Activate the named listening profile from the root-level profile
    /// list. Profiles match exactly; there is no drift fallback here.
    async fn select_profile(
        &self,
        session_key: &str,
        zone_id: &ZoneId,
        profile: &str,
    ) -> Result<(), NegotiateError> {
        self.open_root(session_key, zone_id).await?;
        let list = self
            .find_exact(session_key, PROFILE_LIST_TITLE)
            .await?
            .ok_or_else(|| NegotiateError::ListNotFound(PROFILE_LIST_TITLE.to_string()))?;
        match self.descend(session_key, zone_id, &list).await? {
            BrowseOutcome::List(_) => {}
            BrowseOutcome::Complete => return Ok(()),
            BrowseOutcome::Message {
                is_error: true,
                message,
            } => return Err(NegotiateError::Rejected(message)),
            BrowseOutcome::Message { .. } => return Ok(()),
        }

        let entry = self.find_exact(session_key, profile).await?.ok_or_else(|| {
            NegotiateError::EntryNotFound(profile.to_string(), PROFILE_LIST_TITLE.to_string())
        })?;
        info!(session = session_key, profile, "activating listening profile");
        self.activate(session_key, zone_id, &[], entry).await
    }

    /// Reset the session's traversal to the catalog root.
    async fn open_root(&self, session_key: &str, zone_id: &ZoneId) -> Result<(), NegotiateError> {
        let outcome = self
            .browse
            .browse(&BrowseOpts {
                session_key: session_key.to_string(),
                item_key: None,
                pop_all: true,
                zone_id: Some(zone_id.clone()),
            })
            .await?;
        match outcome {
            BrowseOutcome::List(_) => Ok(()),
            BrowseOutcome::Message {
                is_error: true,
                message,
            } => Err(NegotiateError::Rejected(message)),
            _ => Ok(()),
        }
    }

    async fn descend(
        &self,
        session_key: &str,
        zone_id: &ZoneId,
        item: &BrowseItem,
    ) -> Result<BrowseOutcome, NegotiateError> {
        Ok(self
            .browse
            .browse(&BrowseOpts {
                session_key: session_key.to_string(),
                item_key: item.item_key.clone(),
                pop_all: false,
                zone_id: Some(zone_id.clone()),
            })
            .await?)
    }

    async fn load_page(
        &self,
        session_key: &str,
        offset: usize,
    ) -> Result<crate::transport::LoadResult, NegotiateError> {
        Ok(self
            .browse
            .load(&LoadOpts {
                session_key: session_key.to_string(),
                offset,
                count: PAGE_SIZE,
            })
            .await?)
    }

    /// Scan the open list for an item with exactly the given title.
    async fn find_exact(
        &self,
        session_key: &str,
        title: &str,
    ) -> Result<Option<BrowseItem>, NegotiateError> {
        let mut offset = 0;
        loop {
            let page = self.load_page(session_key, offset).await?;
            if let Some(item) = page.items.iter().find(|i| i.title == title) {
                return Ok(Some(item.clone()));
            }
            offset += page.items.len();
            if page.items.is_empty() || offset >= page.list.count {
                return Ok(None);
            }
        }
    }

    /// Scan the open list for the configured entry name. Titles match
    /// case-sensitively; when the whole list is exhausted without an
    /// exact match, the last item scanned is accepted instead, which
    /// tolerates an entry renamed since it was configured.
    async fn match_entry(
        &self,
        session_key: &str,
        name: &str,
        list: &BrowseList,
    ) -> Result<BrowseItem, NegotiateError> {
        let mut offset = 0;
        let mut last_scanned: Option<BrowseItem> = None;
        loop {
            let page = self.load_page(session_key, offset).await?;
            if let Some(item) = page.items.iter().find(|i| i.title == name) {
                return Ok(item.clone());
            }
            offset += page.items.len();
            if let Some(item) = page.items.last() {
                last_scanned = Some(item.clone());
            }
            if page.items.is_empty() || offset >= page.list.count {
                break;
            }
        }

        let Some(fallback) = last_scanned else {
            return Err(NegotiateError::EmptyList(list.title.clone()));
        };
        warn!(
            session = session_key,
            wanted = name,
            using = %fallback.title,
            "no exact catalog match; using last scanned entry"
        );
        Ok(fallback)
    }

    /// Descend from the matched entry through activation sub-items until
    /// a terminal action completes. `preferred` ranks the sub-item titles
    /// to pick per level; any action-hinted item serves as a fallback.
    async fn activate(
        &self,
        session_key: &str,
        zone_id: &ZoneId,
        preferred: &[&str],
        entry: BrowseItem,
    ) -> Result<(), NegotiateError> {
        let mut item = entry;
        for _ in 0..MAX_ACTIVATION_DEPTH {
            match self.descend(session_key, zone_id, &item).await? {
                BrowseOutcome::Complete => return Ok(()),
                BrowseOutcome::Message {
                    is_error: true,
                    message,
                } => return Err(NegotiateError::Rejected(message)),
                BrowseOutcome::Message { .. } => return Ok(()),
                BrowseOutcome::List(_) => {
                    let page = self.load_page(session_key, 0).await?;
                    let next = preferred
                        .iter()
                        .find_map(|title| page.items.iter().find(|i| i.title == *title))
                        .or_else(|| {
                            page.items
                                .iter()
                                .find(|i| matches!(i.hint, ItemHint::Action | ItemHint::ActionList))
                        })
                        .cloned();
                    match next {
                        Some(next) => item = next,
                        None => return Err(NegotiateError::NoActivation(item.title.clone())),
                    }
                }
            }
        }
        Err(NegotiateError::NoActivation(item.title))
    }
}
