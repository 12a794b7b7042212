//! External-document registry.
//!
//! A document records the remote frameworks it references in its attribute
//! map, one entry per slot: `externalDoc0`, `externalDoc1`, ... Each value is
//! `<identifier>|<true|false>|<url>|<title>`. Every mutation rewrites the
//! slots sequentially from zero and clears the now-unused trailing slots up
//! to a scan limit.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};
use crate::types::Document;

/// Attribute key prefix of registry slots.
pub const EXTERNAL_DOC_PREFIX: &str = "externalDoc";

/// Number of slots examined when clearing stale entries.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// A remote document referenced by a local one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalDoc {
    pub identifier: String,
    pub auto_load: bool,
    pub url: String,
    pub title: String,
}

impl ExternalDoc {
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.identifier, self.auto_load, self.url, self.title
        )
    }

    /// Decode a slot value. Returns `None` for values that do not match the
    /// `identifier|true|false|url|title` shape.
    pub fn decode(raw: &str) -> Option<Self> {
        let line = raw.lines().next().unwrap_or("");

        // The identifier is the shortest non-empty prefix followed by a flag.
        for (pos, _) in line.match_indices('|') {
            if pos == 0 {
                continue;
            }
            let rest = &line[pos + 1..];
            let (auto_load, rest) = if let Some(r) = rest.strip_prefix("true|") {
                (true, r)
            } else if let Some(r) = rest.strip_prefix("false|") {
                (false, r)
            } else {
                continue;
            };

            let Some((bar, _)) = rest.char_indices().skip(1).find(|(_, c)| *c == '|') else {
                continue;
            };

            return Some(Self {
                identifier: line[..pos].to_string(),
                auto_load,
                url: rest[..bar].to_string(),
                title: rest[bar + 1..].to_string(),
            });
        }
        None
    }
}

fn slot_key(slot: usize) -> String {
    format!("{EXTERNAL_DOC_PREFIX}{slot}")
}

fn read_entries(doc: &Document) -> Vec<ExternalDoc> {
    let mut slots: Vec<(usize, &str, &str)> = doc
        .attributes
        .iter()
        .filter_map(|(key, value)| {
            let suffix = key.strip_prefix(EXTERNAL_DOC_PREFIX)?;
            let slot = suffix.parse::<usize>().unwrap_or(usize::MAX);
            Some((slot, key.as_str(), value.as_str()))
        })
        .collect();
    slots.sort();

    let mut entries: Vec<ExternalDoc> = Vec::new();
    for (_, _, value) in slots {
        let Some(entry) = ExternalDoc::decode(value) else {
            continue;
        };
        match entries.iter_mut().find(|e| e.identifier == entry.identifier) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }
    entries
}

/// Mutable view over a document's registry.
pub struct ExternalDocRegistry<'a> {
    doc: &'a mut Document,
    scan_limit: usize,
}

impl<'a> ExternalDocRegistry<'a> {
    pub fn new(doc: &'a mut Document) -> Self {
        Self {
            doc,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    pub fn with_scan_limit(mut self, scan_limit: usize) -> Self {
        self.scan_limit = scan_limit;
        self
    }

    pub fn list(&self) -> Vec<ExternalDoc> {
        read_entries(self.doc)
    }

    pub fn get(&self, identifier: &str) -> Option<ExternalDoc> {
        read_entries(self.doc)
            .into_iter()
            .find(|e| e.identifier == identifier)
    }

    /// Add or replace an entry. All fields must be non-empty.
    pub fn add(&mut self, identifier: &str, auto_load: bool, url: &str, title: &str) -> Result<()> {
        if identifier.is_empty() || url.is_empty() || title.is_empty() {
            return Err(TrellisError::invalid(
                "external document needs an identifier, url and title",
            ));
        }
        if identifier.contains('|') || url.contains('|') {
            return Err(TrellisError::invalid(
                "external document identifier and url may not contain '|'",
            ));
        }

        let entry = ExternalDoc {
            identifier: identifier.to_string(),
            auto_load,
            url: url.to_string(),
            title: title.to_string(),
        };
        let mut entries = self.list();
        match entries.iter_mut().find(|e| e.identifier == identifier) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        self.rewrite(&entries);
        Ok(())
    }

    /// Returns `false` when the identifier is not registered.
    pub fn set_auto_load(&mut self, identifier: &str, auto_load: bool) -> bool {
        let mut entries = self.list();
        let Some(entry) = entries.iter_mut().find(|e| e.identifier == identifier) else {
            return false;
        };
        entry.auto_load = auto_load;
        self.rewrite(&entries);
        true
    }

    /// Mark an entry auto-load, registering it if absent. A new entry falls
    /// back to `url` and `title` when the caller has nothing better.
    pub fn mark_auto_load(&mut self, identifier: &str, url: &str, title: &str) -> Result<()> {
        if self.set_auto_load(identifier, true) {
            return Ok(());
        }
        self.add(identifier, true, url, title)
    }

    /// Returns `false` when the identifier is not registered.
    pub fn remove(&mut self, identifier: &str) -> bool {
        let mut entries = self.list();
        let before = entries.len();
        entries.retain(|e| e.identifier != identifier);
        if entries.len() == before {
            return false;
        }
        self.rewrite(&entries);
        true
    }

    fn rewrite(&mut self, entries: &[ExternalDoc]) {
        for (slot, entry) in entries.iter().enumerate() {
            self.doc.set_attribute(&slot_key(slot), &entry.encode());
        }
        for slot in entries.len()..self.scan_limit {
            self.doc.remove_attribute(&slot_key(slot));
        }
        tracing::debug!(
            document = %self.doc.identifier,
            entries = entries.len(),
            "Rewrote external document registry"
        );
    }
}

// ── Document accessors ────────────────────────────────────────────

impl Document {
    pub fn registry(&mut self) -> ExternalDocRegistry<'_> {
        ExternalDocRegistry::new(self)
    }

    /// Registered external documents, in slot order.
    pub fn external_docs(&self) -> Vec<ExternalDoc> {
        read_entries(self)
    }

    pub fn external_doc(&self, identifier: &str) -> Option<ExternalDoc> {
        read_entries(self)
            .into_iter()
            .find(|e| e.identifier == identifier)
    }

    pub fn add_external_doc(
        &mut self,
        identifier: &str,
        auto_load: bool,
        url: &str,
        title: &str,
    ) -> Result<()> {
        self.registry().add(identifier, auto_load, url, title)
    }

    pub fn set_external_doc_auto_load(&mut self, identifier: &str, auto_load: bool) -> bool {
        self.registry().set_auto_load(identifier, auto_load)
    }

    pub fn remove_external_doc(&mut self, identifier: &str) -> bool {
        self.registry().remove(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentId;

    fn doc() -> Document {
        Document::new(DocumentId(1), "Math")
    }

    #[test]
    fn decode_follows_slot_grammar() {
        let ed = ExternalDoc::decode("abc|true|https://peer/uri/abc|Peer Math").unwrap();
        assert_eq!(ed.identifier, "abc");
        assert!(ed.auto_load);
        assert_eq!(ed.url, "https://peer/uri/abc");
        assert_eq!(ed.title, "Peer Math");

        let ed = ExternalDoc::decode("x|false|u|").unwrap();
        assert!(!ed.auto_load);
        assert_eq!(ed.title, "");

        let ed = ExternalDoc::decode("x|false|u|a|b").unwrap();
        assert_eq!(ed.url, "u");
        assert_eq!(ed.title, "a|b");

        assert!(ExternalDoc::decode("x|maybe|u|t").is_none());
        assert!(ExternalDoc::decode("|true|u|t").is_none());
        assert!(ExternalDoc::decode("x|true|u").is_none());
    }

    #[test]
    fn add_and_read_back_in_slot_order() {
        let mut d = doc();
        d.add_external_doc("a", true, "http://a", "A").unwrap();
        d.add_external_doc("b", false, "http://b", "B").unwrap();

        let docs = d.external_docs();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].identifier, "a");
        assert_eq!(docs[1].identifier, "b");
        assert_eq!(d.attribute("externalDoc1"), Some("b|false|http://b|B"));
        assert_eq!(d.external_doc("b").unwrap().url, "http://b");
    }

    #[test]
    fn add_rejects_empty_fields() {
        let mut d = doc();
        assert!(d.add_external_doc("", true, "http://a", "A").is_err());
        assert!(d.add_external_doc("a", true, "", "A").is_err());
        assert!(d.add_external_doc("a", true, "http://a", "").is_err());
        assert!(d.external_docs().is_empty());
    }

    #[test]
    fn adding_an_existing_identifier_replaces_in_place() {
        let mut d = doc();
        d.add_external_doc("a", false, "http://a", "A").unwrap();
        d.add_external_doc("b", false, "http://b", "B").unwrap();
        d.add_external_doc("a", true, "http://a2", "A2").unwrap();

        let docs = d.external_docs();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].url, "http://a2");
        assert!(docs[0].auto_load);
    }

    #[test]
    fn removal_compacts_slots() {
        let mut d = doc();
        d.add_external_doc("a", true, "http://a", "A").unwrap();
        d.add_external_doc("b", true, "http://b", "B").unwrap();
        d.add_external_doc("c", true, "http://c", "C").unwrap();

        assert!(d.remove_external_doc("a"));
        assert!(!d.remove_external_doc("zzz"));

        assert_eq!(d.attribute("externalDoc0"), Some("b|true|http://b|B"));
        assert_eq!(d.attribute("externalDoc1"), Some("c|true|http://c|C"));
        assert_eq!(d.attribute("externalDoc2"), None);
    }

    #[test]
    fn set_auto_load_reports_missing_entries() {
        let mut d = doc();
        d.add_external_doc("a", false, "http://a", "A").unwrap();
        assert!(d.set_external_doc_auto_load("a", true));
        assert!(d.external_doc("a").unwrap().auto_load);
        assert!(!d.set_external_doc_auto_load("missing", true));
    }

    #[test]
    fn mark_auto_load_registers_with_fallbacks() {
        let mut d = doc();
        d.registry()
            .mark_auto_load("remote-doc", "https://peer/uri/remote-doc", "remote-doc")
            .unwrap();
        let ed = d.external_doc("remote-doc").unwrap();
        assert!(ed.auto_load);
        assert_eq!(ed.url, "https://peer/uri/remote-doc");

        d.set_external_doc_auto_load("remote-doc", false);
        d.registry()
            .mark_auto_load("remote-doc", "ignored", "ignored")
            .unwrap();
        let ed = d.external_doc("remote-doc").unwrap();
        assert!(ed.auto_load);
        assert_eq!(ed.url, "https://peer/uri/remote-doc");
    }

    #[test]
    fn stale_slots_are_cleared_within_scan_limit() {
        let mut d = doc();
        d.set_attribute("externalDoc5", "old|true|http://old|Old");
        d.set_attribute("externalDoc50", "far|true|http://far|Far");

        d.registry()
            .with_scan_limit(10)
            .add("new", true, "http://new", "New")
            .unwrap();

        assert_eq!(d.attribute("externalDoc0"), Some("old|true|http://old|Old"));
        assert_eq!(d.attribute("externalDoc1"), Some("far|true|http://far|Far"));
        assert_eq!(d.attribute("externalDoc2"), Some("new|true|http://new|New"));
        assert_eq!(d.attribute("externalDoc5"), None);
        // Beyond the scan limit, left in place; reads de-duplicate it.
        assert_eq!(d.attribute("externalDoc50"), Some("far|true|http://far|Far"));
        assert_eq!(d.external_docs().len(), 3);
    }
}
