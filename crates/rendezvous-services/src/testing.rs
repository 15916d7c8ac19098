//! In-memory overlay for unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use rendezvous_core::Topic;

use crate::overlay::{JoinMode, LinkId, LinkInfo, Overlay, OverlayError, OverlayStatus};

#[derive(Default)]
struct Link {
    sent: Vec<String>,
    topics: HashSet<Topic>,
    failing: bool,
}

/// Records joins, leaves and writes; links can be told to fail.
#[derive(Default)]
pub struct MemoryOverlay {
    links: Mutex<BTreeMap<LinkId, Link>>,
    joined: Mutex<Vec<(Topic, JoinMode)>>,
    left: Mutex<Vec<Topic>>,
}

impl MemoryOverlay {
    pub fn with_links(ids: &[LinkId]) -> Self {
        let overlay = Self::default();
        {
            let mut links = overlay.links.lock().unwrap();
            for id in ids {
                links.insert(*id, Link::default());
            }
        }
        overlay
    }

    pub fn fail_link(&self, id: LinkId) {
        self.links.lock().unwrap().entry(id).or_default().failing = true;
    }

    pub fn announce_on(&self, id: LinkId, topic: Topic) {
        self.links.lock().unwrap().entry(id).or_default().topics.insert(topic);
    }

    pub fn sent_to(&self, id: LinkId) -> Vec<String> {
        self.links
            .lock()
            .unwrap()
            .get(&id)
            .map(|l| l.sent.clone())
            .unwrap_or_default()
    }

    pub fn joined(&self) -> Vec<(Topic, JoinMode)> {
        self.joined.lock().unwrap().clone()
    }

    pub fn left(&self) -> Vec<Topic> {
        self.left.lock().unwrap().clone()
    }
}

impl Overlay for MemoryOverlay {
    fn join(&self, topic: Topic, mode: JoinMode) {
        self.joined.lock().unwrap().push((topic, mode));
    }

    fn leave(&self, topic: Topic) {
        self.left.lock().unwrap().push(topic);
    }

    fn links(&self) -> Vec<LinkId> {
        self.links.lock().unwrap().keys().copied().collect()
    }

    fn members_of(&self, topic: &Topic) -> Vec<LinkId> {
        self.links
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, l)| l.topics.contains(topic))
            .map(|(id, _)| *id)
            .collect()
    }

    fn send(&self, link: LinkId, frame: &str) -> Result<(), OverlayError> {
        let mut links = self.links.lock().unwrap();
        let l = links.get_mut(&link).ok_or(OverlayError::UnknownLink(link))?;
        if l.failing {
            return Err(OverlayError::LinkClosed(link));
        }
        l.sent.push(frame.to_string());
        Ok(())
    }

    fn status(&self) -> OverlayStatus {
        let links = self
            .links
            .lock()
            .unwrap()
            .iter()
            .map(|(id, l)| LinkInfo {
                id: *id,
                remote: format!("memory:{id}"),
                topics: l.topics.iter().copied().collect(),
            })
            .collect();
        OverlayStatus {
            links,
            joined: self.joined().into_iter().map(|(t, _)| t).collect(),
        }
    }
}
