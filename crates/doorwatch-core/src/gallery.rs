//! Identity gallery: the set of known encodings, loaded once per session.
//!
//! The gallery is a point-in-time snapshot. Registering a new encoding
//! updates the directory only; a running detection session keeps matching
//! against the snapshot it loaded until it is restarted.

use crate::ports::{EncodingUpsert, IdentityDirectory, ServiceError};
use crate::types::{Embedding, Identity, IdentityId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Length of a face encoding (dlib/face_recognition produce 128 values).
pub const DEFAULT_ENCODING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid registration: {0}")]
    Validation(String),
    #[error("malformed encoding for identity {identity}: {reason}")]
    MalformedEncoding { identity: IdentityId, reason: String },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Decode the directory's text form of an encoding.
pub fn decode_encoding(text: &str, dimension: usize) -> Result<Embedding, String> {
    let values: Vec<f32> =
        serde_json::from_str(text).map_err(|e| format!("not a JSON number array: {e}"))?;
    if values.is_empty() {
        return Err("empty vector".into());
    }
    if values.len() != dimension {
        return Err(format!(
            "expected {dimension}-dim encoding, got {}",
            values.len()
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err("non-finite component".into());
    }
    Ok(Embedding::new(values))
}

/// Known identities ordered by id.
#[derive(Debug, Clone, Default)]
pub struct IdentityGallery {
    identities: Vec<Identity>,
    dimension: usize,
}

impl IdentityGallery {
    /// Fetch every identity with an encoding from the directory.
    ///
    /// Malformed entries are logged and skipped. Only a directory failure
    /// aborts the load.
    pub fn load(
        directory: &dyn IdentityDirectory,
        dimension: usize,
    ) -> Result<Self, GalleryError> {
        let entries = directory.fetch_known_identities()?;
        let total = entries.len();
        let mut by_id: BTreeMap<IdentityId, Identity> = BTreeMap::new();

        for entry in entries {
            let Some(text) = entry.encoding.as_deref().filter(|t| !t.trim().is_empty()) else {
                tracing::debug!(identity = %entry.id, "no encoding; skipping");
                continue;
            };
            let encoding = match decode_encoding(text, dimension) {
                Ok(e) => e,
                Err(reason) => {
                    let err = GalleryError::MalformedEncoding {
                        identity: entry.id,
                        reason,
                    };
                    tracing::warn!(name = %entry.name, error = %err, "skipping gallery entry");
                    continue;
                }
            };
            if by_id.contains_key(&entry.id) {
                tracing::warn!(
                    identity = %entry.id,
                    "duplicate identity in directory; keeping first"
                );
                continue;
            }
            by_id.insert(
                entry.id,
                Identity {
                    id: entry.id,
                    name: entry.name,
                    encoding,
                },
            );
        }

        let gallery = Self {
            identities: by_id.into_values().collect(),
            dimension,
        };
        tracing::info!(
            loaded = gallery.len(),
            skipped = total - gallery.len(),
            dimension,
            "gallery loaded"
        );
        Ok(gallery)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities
            .binary_search_by_key(&id, |i| i.id)
            .ok()
            .map(|idx| &self.identities[idx])
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// A new encoding for an existing directory identity.
#[derive(Debug, Clone)]
pub struct Registration {
    pub identity: IdentityId,
    pub encoding: Embedding,
    /// Reference face crop (JPEG).
    pub image: Option<Vec<u8>>,
}

/// Validate and upsert an identity's encoding in the directory.
///
/// Input problems are rejected before the directory is contacted. Returns the
/// identity's display name as reported by the directory.
pub fn register(
    directory: &dyn IdentityDirectory,
    registration: Registration,
    dimension: usize,
) -> Result<String, GalleryError> {
    if registration.identity.0 <= 0 {
        return Err(GalleryError::Validation(format!(
            "identity id must be positive, got {}",
            registration.identity
        )));
    }
    if registration.encoding.is_empty() {
        return Err(GalleryError::Validation("encoding vector is empty".into()));
    }
    if registration.encoding.len() != dimension {
        return Err(GalleryError::Validation(format!(
            "expected {dimension}-dim encoding, got {}",
            registration.encoding.len()
        )));
    }
    if registration.encoding.values.iter().any(|v| !v.is_finite()) {
        return Err(GalleryError::Validation(
            "encoding has non-finite components".into(),
        ));
    }

    let upsert = EncodingUpsert {
        identity: registration.identity,
        encoding: registration.encoding.to_json(),
        image: registration.image,
    };
    let name = directory.register(&upsert)?;
    tracing::info!(identity = %registration.identity, name = %name, "encoding registered");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;

    fn encoding(seed: f32) -> Embedding {
        Embedding::new((0..4).map(|i| seed + i as f32 * 0.013_7).collect())
    }

    #[test]
    fn test_load_skips_malformed_entries() {
        let dir = MemoryDirectory::new();
        dir.insert_raw(IdentityId(1), "alice", Some("[0.1, 0.2, 0.3, 0.4]"));
        dir.insert_raw(IdentityId(2), "bob", Some("not json"));
        dir.insert_raw(IdentityId(3), "carol", Some("[]"));
        dir.insert_raw(IdentityId(4), "dave", Some("[0.1, 0.2]"));
        dir.insert_raw(IdentityId(5), "erin", Some("{\"a\": 1}"));
        dir.insert_raw(IdentityId(6), "frank", None);
        dir.insert_raw(IdentityId(7), "grace", Some("[0.5, 0.5, 0.5, 0.5]"));

        let gallery = IdentityGallery::load(&dir, 4).unwrap();
        let ids: Vec<_> = gallery.identities().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![IdentityId(1), IdentityId(7)]);
        assert_eq!(gallery.get(IdentityId(7)).map(|i| i.name.as_str()), Some("grace"));
        assert!(gallery.get(IdentityId(2)).is_none());
    }

    #[test]
    fn test_load_orders_by_id() {
        let dir = MemoryDirectory::new();
        dir.insert_raw(IdentityId(30), "c", Some("[1, 0]"));
        dir.insert_raw(IdentityId(10), "a", Some("[0, 1]"));
        dir.insert_raw(IdentityId(20), "b", Some("[1, 1]"));

        let gallery = IdentityGallery::load(&dir, 2).unwrap();
        let ids: Vec<_> = gallery.identities().iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_load_fails_when_directory_unreachable() {
        let dir = MemoryDirectory::new();
        dir.set_offline(true);
        let err = IdentityGallery::load(&dir, 4).unwrap_err();
        assert!(matches!(err, GalleryError::Service(ref e) if e.is_connectivity()));
    }

    #[test]
    fn test_empty_directory_gives_empty_gallery() {
        let gallery = IdentityGallery::load(&MemoryDirectory::new(), 4).unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_register_round_trip() {
        let dir = MemoryDirectory::new();
        dir.add_identity(IdentityId(5), "eve");
        let v = encoding(0.123_456_79);

        let name = register(
            &dir,
            Registration {
                identity: IdentityId(5),
                encoding: v.clone(),
                image: None,
            },
            4,
        )
        .unwrap();
        assert_eq!(name, "eve");

        let gallery = IdentityGallery::load(&dir, 4).unwrap();
        assert_eq!(gallery.get(IdentityId(5)).map(|i| &i.encoding), Some(&v));
    }

    #[test]
    fn test_register_overwrites_previous_encoding() {
        let dir = MemoryDirectory::new();
        dir.add_identity(IdentityId(5), "eve");
        for seed in [0.1, 0.9] {
            register(
                &dir,
                Registration {
                    identity: IdentityId(5),
                    encoding: encoding(seed),
                    image: None,
                },
                4,
            )
            .unwrap();
        }
        let gallery = IdentityGallery::load(&dir, 4).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.identities()[0].encoding, encoding(0.9));
    }

    #[test]
    fn test_register_validation_precedes_directory_call() {
        let dir = MemoryDirectory::new();
        dir.add_identity(IdentityId(5), "eve");
        dir.set_offline(true);

        let empty = register(
            &dir,
            Registration {
                identity: IdentityId(5),
                encoding: Embedding::new(vec![]),
                image: None,
            },
            4,
        );
        assert!(matches!(empty, Err(GalleryError::Validation(_))));

        let no_id = register(
            &dir,
            Registration {
                identity: IdentityId(0),
                encoding: encoding(0.1),
                image: None,
            },
            4,
        );
        assert!(matches!(no_id, Err(GalleryError::Validation(_))));

        let wrong_dim = register(
            &dir,
            Registration {
                identity: IdentityId(5),
                encoding: Embedding::new(vec![0.1]),
                image: None,
            },
            4,
        );
        assert!(matches!(wrong_dim, Err(GalleryError::Validation(_))));
        assert_eq!(dir.register_calls(), 0);
    }

    #[test]
    fn test_register_unknown_identity_is_rejected() {
        let dir = MemoryDirectory::new();
        let err = register(
            &dir,
            Registration {
                identity: IdentityId(42),
                encoding: encoding(0.1),
                image: None,
            },
            4,
        )
        .unwrap_err();
        assert!(matches!(err, GalleryError::Service(ServiceError::Rejected { .. })));
    }

    #[test]
    fn test_decode_rejects_non_finite() {
        // serde_json cannot express NaN; a huge literal overflows f32 to infinity.
        assert!(decode_encoding("[1e39, 0.0]", 2).is_err());
        assert!(decode_encoding("[0.5, 0.25]", 2).is_ok());
    }
}
