//! markbench Registry Entries
//!
//! This module defines the backend implementation descriptors served by the
//! registry, and the decoding of the registry document into them.
//!
//! # Registry Document
//!
//! The registry document is JSON and comes in two shapes, both accepted:
//!
//! - an array of records, each carrying its own `name`
//! - an object mapping each name to its record
//!
//! Each record has a `url`, and optionally `lang`, `repo` and `cmark`. The
//! `url` decides the evaluation strategy:
//!
//! | Prefix | Strategy |
//! |--------|----------|
//! | `http` | remote endpoint, query text appended |
//! | `js:` | embedded reference implementation |
//! | other | ciphertext, decrypted with the registry passphrase first |

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::error::{MarkbenchError, Result};
use crate::cipher::StringCipher;

/// URL prefix of endpoints used as-is.
pub const PLAIN_URL_PREFIX: &str = "http";

/// URL prefix selecting an embedded reference implementation.
pub const EMBEDDED_URL_PREFIX: &str = "js:";

/// Reference implementations that can be evaluated in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceImplementation {
    /// commonmark.js, the CommonMark reference renderer
    CommonMarkJs,
    /// markdown-it
    MarkdownIt,
}

impl ReferenceImplementation {
    /// Every reference implementation known to the engine.
    pub const ALL: [ReferenceImplementation; 2] = [
        ReferenceImplementation::CommonMarkJs,
        ReferenceImplementation::MarkdownIt,
    ];

    /// Registry tag selecting this implementation (e.g. `js:markdown-it`).
    pub fn tag(&self) -> &'static str {
        match self {
            ReferenceImplementation::CommonMarkJs => "js:commonmark.js",
            ReferenceImplementation::MarkdownIt => "js:markdown-it",
        }
    }

    /// Display name of the implementation.
    pub fn name(&self) -> &'static str {
        match self {
            ReferenceImplementation::CommonMarkJs => "commonmark.js",
            ReferenceImplementation::MarkdownIt => "markdown-it",
        }
    }

    /// Resolves a registry tag to an implementation.
    ///
    /// # Example
    ///
    /// ```
    /// use markbench_common::ReferenceImplementation;
    ///
    /// assert_eq!(
    ///     ReferenceImplementation::from_tag("js:markdown-it"),
    ///     Some(ReferenceImplementation::MarkdownIt)
    /// );
    /// assert_eq!(ReferenceImplementation::from_tag("js:unknown"), None);
    /// ```
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reference| reference.tag() == tag)
    }
}

impl fmt::Display for ReferenceImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a registry entry is evaluated.
///
/// The variant is chosen once, when the entry is decoded, so call sites never
/// inspect URL strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// HTTP GET against `url` with `text=<query>` appended.
    ///
    /// `url` always ends with `?` or `&`.
    Remote { url: String },
    /// In-process evaluation by a reference implementation.
    Embedded(ReferenceImplementation),
}

impl Endpoint {
    /// Builds a remote endpoint, normalizing the trailing query separator.
    pub fn remote(url: impl Into<String>) -> Self {
        Endpoint::Remote {
            url: normalize_query_url(url.into()),
        }
    }

    /// Classifies a plaintext URL.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(endpoint))` - the URL is a plain HTTP URL or a known `js:` tag
    /// - `Ok(None)` - the URL is neither, and must be decrypted first
    /// - `Err(MarkbenchError::MalformedRegistry)` - a `js:` tag nobody implements
    pub fn classify(url: &str) -> Result<Option<Self>> {
        if url.starts_with(PLAIN_URL_PREFIX) {
            return Ok(Some(Self::remote(url)));
        }

        if url.starts_with(EMBEDDED_URL_PREFIX) {
            return ReferenceImplementation::from_tag(url)
                .map(|reference| Some(Endpoint::Embedded(reference)))
                .ok_or_else(|| {
                    MarkbenchError::MalformedRegistry(format!(
                        "Unknown embedded implementation '{}'",
                        url
                    ))
                });
        }

        Ok(None)
    }

    /// The plaintext URL (or tag) this endpoint was decoded from.
    pub fn plain_url(&self) -> &str {
        match self {
            Endpoint::Remote { url } => url,
            Endpoint::Embedded(reference) => reference.tag(),
        }
    }
}

/// Appends `?` or `&` so that `text=...` can be concatenated to the URL.
///
/// # Example
///
/// ```
/// use markbench_common::protocol::entry::normalize_query_url;
///
/// assert_eq!(normalize_query_url("http://a/render".into()), "http://a/render?");
/// assert_eq!(normalize_query_url("http://a/render?x=1".into()), "http://a/render?x=1&");
/// assert_eq!(normalize_query_url("http://a/render?".into()), "http://a/render?");
/// ```
pub fn normalize_query_url(mut url: String) -> String {
    if !url.contains('?') {
        url.push('?');
    } else if !url.ends_with('?') && !url.ends_with('&') {
        url.push('&');
    }
    url
}

/// One backend implementation the aggregator can query.
///
/// Entries are immutable once decoded and shared read-only (behind `Arc`)
/// by every request using the same registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementationEntry {
    /// Display identifier, unique within a snapshot
    pub name: String,
    /// Evaluation strategy
    pub endpoint: Endpoint,
    /// Implementation language, passed through verbatim
    pub lang: String,
    /// Repository URL, passed through verbatim
    pub repo: String,
    /// CommonMark compliance, when the registry states it
    pub cmark: Option<bool>,
}

impl ImplementationEntry {
    /// Converts the entry back into a registry record carrying `url`.
    pub fn to_record(&self, url: impl Into<String>) -> RegistryRecord {
        RegistryRecord {
            name: Some(self.name.clone()),
            url: url.into(),
            lang: self.lang.clone(),
            repo: self.repo.clone(),
            cmark: self.cmark,
        }
    }
}

/// A single record of the registry document, as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default, alias = "commonmark", skip_serializing_if = "Option::is_none")]
    pub cmark: Option<bool>,
}

/// The registry document, in either of its two accepted shapes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RegistryDocument {
    List(Vec<RegistryRecord>),
    Map(BTreeMap<String, RegistryRecord>),
}

impl RegistryDocument {
    /// Parses the registry document text.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| MarkbenchError::MalformedRegistry(format!("Invalid registry JSON: {}", e)))
    }

    /// Flattens the document into named records, in document order.
    ///
    /// For the mapping shape the key is the name, unless the record carries
    /// its own.
    pub fn into_records(self) -> Result<Vec<(String, RegistryRecord)>> {
        match self {
            RegistryDocument::List(records) => records
                .into_iter()
                .enumerate()
                .map(|(index, record)| match record.name.clone() {
                    Some(name) if !name.trim().is_empty() => Ok((name, record)),
                    _ => Err(MarkbenchError::MalformedRegistry(format!(
                        "Registry entry #{} has no name",
                        index
                    ))),
                })
                .collect(),
            RegistryDocument::Map(records) => Ok(records
                .into_iter()
                .map(|(key, record)| (record.name.clone().unwrap_or(key), record))
                .collect()),
        }
    }
}

/// Decodes a registry document into implementation entries.
///
/// URLs that are neither plain HTTP nor a `js:` tag are decrypted with
/// `passphrase`. A document that fails to parse, has no entries, repeats a
/// name, or holds an undecryptable URL is rejected as a whole.
///
/// # Example
///
/// ```
/// use markbench_common::{decode_registry, Endpoint};
///
/// let doc = r#"[{"name": "md4c", "url": "http://md4c.example/api", "lang": "C"}]"#;
/// let entries = decode_registry(doc, "secret").unwrap();
/// assert_eq!(entries[0].endpoint, Endpoint::remote("http://md4c.example/api?"));
/// ```
pub fn decode_registry(text: &str, passphrase: &str) -> Result<Vec<ImplementationEntry>> {
    let records = RegistryDocument::parse(text)?.into_records()?;
    if records.is_empty() {
        return Err(MarkbenchError::MalformedRegistry(
            "Registry document contains no entries".into(),
        ));
    }

    let mut seen = HashSet::with_capacity(records.len());
    let mut entries = Vec::with_capacity(records.len());

    for (name, record) in records {
        if !seen.insert(name.clone()) {
            return Err(MarkbenchError::MalformedRegistry(format!(
                "Duplicate registry entry '{}'",
                name
            )));
        }

        let endpoint = resolve_endpoint(&record.url, passphrase).map_err(|e| match e {
            MarkbenchError::Cipher(message) => {
                MarkbenchError::Cipher(format!("Entry '{}': {}", name, message))
            }
            other => other,
        })?;

        entries.push(ImplementationEntry {
            name,
            endpoint,
            lang: record.lang,
            repo: record.repo,
            cmark: record.cmark,
        });
    }

    Ok(entries)
}

fn resolve_endpoint(url: &str, passphrase: &str) -> Result<Endpoint> {
    if let Some(endpoint) = Endpoint::classify(url)? {
        return Ok(endpoint);
    }

    let plain = StringCipher::decrypt(url, passphrase)?;
    Endpoint::classify(&plain)?.ok_or_else(|| {
        MarkbenchError::MalformedRegistry(
            "Decrypted URL is neither an http URL nor an embedded tag".into(),
        )
    })
}
