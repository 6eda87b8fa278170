//! # Result Registry
//!
//! Owns every open [`ResultSession`], keyed by local id, and routes tab and
//! server-id lookups to them. Tab ids are positions in a flat tab strip, so
//! closing a tab shifts every tab to its right down by one.

use std::collections::BTreeMap;

use crate::error::SessionError;
use crate::session::ResultSession;

#[derive(Debug, Default)]
pub struct ResultRegistry {
    sessions: BTreeMap<u64, ResultSession>,
    next_id: u64,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Reserves a local id. Ids are never reused.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    /// Adds `session`, appending a tab for it when `tabbed`. Returns the
    /// assigned tab id.
    pub fn register(&mut self, mut session: ResultSession, tabbed: bool) -> Option<usize> {
        let tab_id = tabbed.then(|| self.open_tabs().len());
        session.set_tab_id(tab_id);
        tracing::debug!("registered result {} on tab {:?}", session.local_id(), tab_id);
        self.sessions.insert(session.local_id(), session);
        tab_id
    }

    /// Removes a session, closing its tab if it has one.
    pub fn unregister(&mut self, local_id: u64) -> Option<ResultSession> {
        let mut session = self.sessions.remove(&local_id)?;
        if let Some(tab) = session.tab_id() {
            self.renumber_after_close(tab);
        }
        session.mark_closed();
        Some(session)
    }

    pub fn get(&self, local_id: u64) -> Option<&ResultSession> {
        self.sessions.get(&local_id)
    }

    pub fn get_mut(&mut self, local_id: u64) -> Option<&mut ResultSession> {
        self.sessions.get_mut(&local_id)
    }

    pub fn lookup_by_tab(&self, tab_id: usize) -> Option<&ResultSession> {
        self.sessions.values().find(|s| s.tab_id() == Some(tab_id))
    }

    pub fn lookup_by_server_id(&self, server_id: i64) -> Option<&ResultSession> {
        self.sessions
            .values()
            .find(|s| s.server_id() == Some(server_id))
    }

    /// Closes the session shown on `tab_id` and returns it.
    pub fn close_tab(&mut self, tab_id: usize) -> Result<ResultSession, SessionError> {
        let local_id = self
            .lookup_by_tab(tab_id)
            .map(ResultSession::local_id)
            .ok_or(SessionError::UnknownTab(tab_id))?;
        self.unregister(local_id)
            .ok_or(SessionError::UnknownSession(local_id))
    }

    /// Shifts every tab at or after `closed_tab` one position left.
    pub fn renumber_after_close(&mut self, closed_tab: usize) {
        for session in self.sessions.values_mut() {
            if let Some(tab) = session.tab_id() {
                if tab >= closed_tab && tab > 0 {
                    session.set_tab_id(Some(tab - 1));
                }
            }
        }
    }

    /// `(tab_id, local_id)` pairs in tab order.
    pub fn open_tabs(&self) -> Vec<(usize, u64)> {
        let mut tabs: Vec<(usize, u64)> = self
            .sessions
            .values()
            .filter_map(|s| s.tab_id().map(|t| (t, s.local_id())))
            .collect();
        tabs.sort_unstable();
        tabs
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::QueryPayload;

    fn registry_with_tabs(n: usize) -> (ResultRegistry, Vec<u64>) {
        let mut reg = ResultRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = reg.allocate_id();
            reg.register(ResultSession::live(id, QueryPayload::default()), true);
            ids.push(id);
        }
        (reg, ids)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut reg = ResultRegistry::new();
        let a = reg.allocate_id();
        let b = reg.allocate_id();
        reg.register(ResultSession::live(a, QueryPayload::default()), false);
        reg.unregister(a);
        let c = reg.allocate_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_tabs_are_appended() {
        let (reg, ids) = registry_with_tabs(3);
        assert_eq!(reg.open_tabs(), vec![(0, ids[0]), (1, ids[1]), (2, ids[2])]);
    }

    #[test]
    fn test_close_renumbers_following_tabs() {
        let (mut reg, ids) = registry_with_tabs(4);
        let closed = reg.close_tab(1).unwrap();
        assert_eq!(closed.local_id(), ids[1]);
        assert_eq!(closed.tab_id(), None);
        let tabs: Vec<usize> = reg.open_tabs().iter().map(|(t, _)| *t).collect();
        assert_eq!(tabs, vec![0, 1, 2]);
        assert_eq!(reg.lookup_by_tab(1).map(ResultSession::local_id), Some(ids[2]));
        assert_eq!(reg.lookup_by_tab(2).map(ResultSession::local_id), Some(ids[3]));
        assert!(reg.lookup_by_tab(3).is_none());
    }

    #[test]
    fn test_close_unknown_tab() {
        let (mut reg, _) = registry_with_tabs(1);
        assert_eq!(reg.close_tab(4).unwrap_err(), SessionError::UnknownTab(4));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_untabbed_sessions_keep_no_tab() {
        let (mut reg, _) = registry_with_tabs(2);
        let id = reg.allocate_id();
        assert_eq!(reg.register(ResultSession::live(id, QueryPayload::default()), false), None);
        reg.close_tab(0).unwrap();
        assert_eq!(reg.get(id).and_then(ResultSession::tab_id), None);
        assert_eq!(reg.open_tabs().len(), 1);
    }

    #[test]
    fn test_lookup_by_server_id() {
        let (mut reg, ids) = registry_with_tabs(2);
        let resp: crate::response::QueryResponse =
            serde_json::from_value(serde_json::json!({"qid": 31, "results": []})).unwrap();
        reg.get_mut(ids[1]).unwrap().complete(Ok(resp)).unwrap();
        assert_eq!(reg.lookup_by_server_id(31).map(ResultSession::local_id), Some(ids[1]));
        assert!(reg.lookup_by_server_id(32).is_none());
    }
}
