//! Importer registration and the per-compilation importer table.
//!
//! Two kinds of importer exist: a canonicalizing importer (resolve a URL,
//! then load its contents) and a file importer (map a URL onto the real
//! filesystem and let the compiler do the loading). A registration that
//! supplies both is ambiguous and rejected before any compile work begins.

use std::collections::HashMap;
use std::sync::Arc;

use sasskit_protocol::proto::{ImporterRef, Syntax};
use sasskit_value::BoxError;
use url::Url;

use crate::error::Error;

/// A canonicalizing importer.
///
/// `canonicalize` turns a user-written URL into the absolute URL the
/// compiler keys its import cache on, or `None` to pass; `load` produces
/// the stylesheet text for a canonical URL, or `None` if it has none.
pub trait Importer: Send + Sync {
    fn canonicalize(&self, url: &str, from_import: bool) -> Result<Option<Url>, BoxError>;

    fn load(&self, canonical_url: &Url) -> Result<Option<ImporterResult>, BoxError>;
}

/// An importer that redirects URLs onto the filesystem; the returned URL
/// must use the `file:` scheme.
pub trait FileImporter: Send + Sync {
    fn find_file_url(&self, url: &str, from_import: bool) -> Result<Option<Url>, BoxError>;
}

/// A stylesheet produced by [`Importer::load`].
#[derive(Debug, Clone)]
pub struct ImporterResult {
    pub contents: String,
    pub syntax: Syntax,
    pub source_map_url: Option<Url>,
}

/// One importer registration slot.
///
/// Mirrors the dynamic registration surface: a slot may carry either kind
/// of importer, and a slot carrying both is rejected at registration.
#[derive(Clone, Default)]
pub struct ImporterHandle {
    pub importer: Option<Arc<dyn Importer>>,
    pub file_importer: Option<Arc<dyn FileImporter>>,
}

impl ImporterHandle {
    pub fn custom(importer: impl Importer + 'static) -> Self {
        Self {
            importer: Some(Arc::new(importer)),
            file_importer: None,
        }
    }

    pub fn file(importer: impl FileImporter + 'static) -> Self {
        Self {
            importer: None,
            file_importer: Some(Arc::new(importer)),
        }
    }
}

pub(crate) enum ImporterEntry {
    Custom(Arc<dyn Importer>),
    File(Arc<dyn FileImporter>),
}

/// Assigns wire ids in registration order. The per-entrypoint importer,
/// when present, is added first and keeps an id distinct from every
/// importer-list entry.
pub(crate) struct ImporterStoreBuilder {
    next_id: u32,
    entries: HashMap<u32, ImporterEntry>,
}

impl ImporterStoreBuilder {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: HashMap::new(),
        }
    }

    pub fn add(&mut self, handle: &ImporterHandle) -> Result<ImporterRef, Error> {
        let entry = match (&handle.importer, &handle.file_importer) {
            (Some(_), Some(_)) => {
                return Err(Error::Host(
                    "an importer may not provide both canonicalize/load and find_file_url"
                        .to_string(),
                ))
            }
            (None, None) => {
                return Err(Error::Host(
                    "an importer must provide canonicalize/load or find_file_url".to_string(),
                ))
            }
            (Some(importer), None) => ImporterEntry::Custom(Arc::clone(importer)),
            (None, Some(file_importer)) => ImporterEntry::File(Arc::clone(file_importer)),
        };
        let id = self.next_id;
        self.next_id += 1;
        let reference = match entry {
            ImporterEntry::Custom(_) => ImporterRef::ImporterId(id),
            ImporterEntry::File(_) => ImporterRef::FileImporterId(id),
        };
        self.entries.insert(id, entry);
        Ok(reference)
    }

    pub fn finish(self) -> ImporterStore {
        ImporterStore {
            entries: self.entries,
        }
    }
}

/// Per-compilation importer table, looked up when the compiler issues
/// canonicalize/import/file-import requests.
pub(crate) struct ImporterStore {
    entries: HashMap<u32, ImporterEntry>,
}

impl ImporterStore {
    pub fn importer(&self, id: u32) -> Result<Arc<dyn Importer>, String> {
        match self.entries.get(&id) {
            Some(ImporterEntry::Custom(importer)) => Ok(Arc::clone(importer)),
            Some(ImporterEntry::File(_)) => {
                Err(format!("importer {id} is a file importer, not a canonicalizing importer"))
            }
            None => Err(format!("unknown importer id {id}")),
        }
    }

    pub fn file_importer(&self, id: u32) -> Result<Arc<dyn FileImporter>, String> {
        match self.entries.get(&id) {
            Some(ImporterEntry::File(importer)) => Ok(Arc::clone(importer)),
            Some(ImporterEntry::Custom(_)) => {
                Err(format!("importer {id} is not a file importer"))
            }
            None => Err(format!("unknown importer id {id}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullImporter;

    impl Importer for NullImporter {
        fn canonicalize(&self, _url: &str, _from_import: bool) -> Result<Option<Url>, BoxError> {
            Ok(None)
        }

        fn load(&self, _canonical_url: &Url) -> Result<Option<ImporterResult>, BoxError> {
            Ok(None)
        }
    }

    struct NullFileImporter;

    impl FileImporter for NullFileImporter {
        fn find_file_url(&self, _url: &str, _from_import: bool) -> Result<Option<Url>, BoxError> {
            Ok(None)
        }
    }

    #[test]
    fn assigns_ids_in_registration_order() {
        let mut builder = ImporterStoreBuilder::new();
        let first = builder.add(&ImporterHandle::custom(NullImporter)).expect("add");
        let second = builder
            .add(&ImporterHandle::file(NullFileImporter))
            .expect("add");
        assert_eq!(first, ImporterRef::ImporterId(0));
        assert_eq!(second, ImporterRef::FileImporterId(1));

        let store = builder.finish();
        assert!(store.importer(0).is_ok());
        assert!(store.file_importer(1).is_ok());
        assert!(store.importer(1).is_err());
        assert!(store.file_importer(0).is_err());
        assert!(store.importer(2).is_err());
    }

    #[test]
    fn ambiguous_registration_is_rejected() {
        let handle = ImporterHandle {
            importer: Some(Arc::new(NullImporter)),
            file_importer: Some(Arc::new(NullFileImporter)),
        };
        let err = ImporterStoreBuilder::new().add(&handle).unwrap_err();
        assert!(matches!(err, Error::Host(_)));
    }

    #[test]
    fn empty_registration_is_rejected() {
        let err = ImporterStoreBuilder::new()
            .add(&ImporterHandle::default())
            .unwrap_err();
        assert!(matches!(err, Error::Host(_)));
    }
}
