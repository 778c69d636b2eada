//! DashMap-based registry of named transports.
//!
//! Drivers resolve the transport named in a connection descriptor through a
//! [`TransportRegistry`]. The registry is an ordinary value passed around in an
//! `Arc`; there is no process-wide instance, so independent components (and
//! tests) never see each other's registrations.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};
use uuid::Uuid;

use crate::tunnel::dialer::Dialer;
use crate::tunnel::error::TunnelError;

/// Characters that would make a name ambiguous inside a descriptor.
const RESERVED_CHARS: &[char] = &['(', ')', '/', '@', ':', '?'];

/// Named dialers available to database drivers.
#[derive(Default)]
pub struct TransportRegistry {
    dialers: DashMap<String, Arc<dyn Dialer>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            dialers: DashMap::new(),
        }
    }

    /// Bind `name` to `dialer`.
    ///
    /// Registering the same dialer (same [`Dialer::id`]) under the same name
    /// again is a no-op. Binding a name that belongs to a different dialer
    /// fails with [`TunnelError::TransportConflict`] and keeps the existing
    /// binding.
    pub fn register(&self, name: &str, dialer: Arc<dyn Dialer>) -> Result<(), TunnelError> {
        validate_name(name)?;

        match self.dialers.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().id() == dialer.id() {
                    debug!("Transport '{}' already registered to this dialer", name);
                    Ok(())
                } else {
                    Err(TunnelError::TransportConflict {
                        name: name.to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                info!("Registered transport '{}' (dialer {})", name, dialer.id());
                slot.insert(dialer);
                Ok(())
            }
        }
    }

    /// Look a transport up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Dialer>> {
        self.dialers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`get`](Self::get), but a missing name is an error.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Dialer>, TunnelError> {
        self.get(name).ok_or_else(|| TunnelError::UnknownTransport {
            name: name.to_string(),
        })
    }

    /// Remove a binding, returning the dialer that held it.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Dialer>> {
        let removed = self.dialers.remove(name).map(|(_, dialer)| dialer);
        if removed.is_some() {
            info!("Unregistered transport '{}'", name);
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dialers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.dialers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.dialers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialers.is_empty()
    }

    /// `"{prefix}-{uuid}"`, unique per call.
    pub fn unique_name(prefix: &str) -> String {
        format!("{}-{}", prefix, Uuid::new_v4().simple())
    }
}

fn validate_name(name: &str) -> Result<(), TunnelError> {
    if name.is_empty() {
        return Err(TunnelError::Config("transport name is empty".to_string()));
    }
    if let Some(c) = name.chars().find(|c| RESERVED_CHARS.contains(c) || c.is_whitespace()) {
        return Err(TunnelError::Config(format!(
            "transport name '{}' contains reserved character {:?}",
            name, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::channel::LogicalChannel;
    use async_trait::async_trait;

    struct StubDialer {
        id: Uuid,
    }

    impl StubDialer {
        fn new() -> Arc<Self> {
            Arc::new(Self { id: Uuid::new_v4() })
        }
    }

    #[async_trait]
    impl Dialer for StubDialer {
        async fn dial(&self, _destination: &str) -> Result<LogicalChannel, TunnelError> {
            Err(TunnelError::SessionClosed)
        }

        fn id(&self) -> Uuid {
            self.id
        }
    }

    mod registration {
        use super::*;

        #[test]
        fn test_register_and_get() {
            let registry = TransportRegistry::new();
            let dialer = StubDialer::new();
            registry.register("ssh+tcp", dialer.clone()).unwrap();

            let found = registry.get("ssh+tcp").unwrap();
            assert_eq!(found.id(), dialer.id);
            assert!(registry.contains("ssh+tcp"));
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn test_same_dialer_twice_is_noop() {
            let registry = TransportRegistry::new();
            let dialer = StubDialer::new();
            registry.register("ssh+tcp", dialer.clone()).unwrap();
            registry.register("ssh+tcp", dialer).unwrap();
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn test_different_dialer_conflicts() {
            let registry = TransportRegistry::new();
            let first = StubDialer::new();
            registry.register("ssh+tcp", first.clone()).unwrap();

            let err = registry.register("ssh+tcp", StubDialer::new()).unwrap_err();
            match err {
                TunnelError::TransportConflict { name } => assert_eq!(name, "ssh+tcp"),
                other => panic!("unexpected error: {other:?}"),
            }
            // Original binding survives
            assert_eq!(registry.get("ssh+tcp").unwrap().id(), first.id);
        }

        #[test]
        fn test_one_dialer_many_names() {
            let registry = TransportRegistry::new();
            let dialer = StubDialer::new();
            registry.register("primary", dialer.clone()).unwrap();
            registry.register("replica", dialer).unwrap();
            let mut names = registry.names();
            names.sort();
            assert_eq!(names, vec!["primary", "replica"]);
        }

        #[test]
        fn test_reserved_characters_rejected() {
            let registry = TransportRegistry::new();
            for bad in ["", "ssh(tcp)", "a/b", "user@host", "has space", "a:b"] {
                let err = registry.register(bad, StubDialer::new()).unwrap_err();
                assert!(matches!(err, TunnelError::Config(_)), "accepted {bad:?}");
            }
            assert!(registry.is_empty());
        }
    }

    mod lookup {
        use super::*;

        #[test]
        fn test_resolve_unknown_name() {
            let registry = TransportRegistry::new();
            let err = registry.resolve("missing").err().unwrap();
            assert!(matches!(err, TunnelError::UnknownTransport { .. }));
        }

        #[test]
        fn test_unregister_frees_name() {
            let registry = TransportRegistry::new();
            registry.register("ssh+tcp", StubDialer::new()).unwrap();
            assert!(registry.unregister("ssh+tcp").is_some());
            assert!(!registry.contains("ssh+tcp"));
            registry.register("ssh+tcp", StubDialer::new()).unwrap();
        }

        #[test]
        fn test_unregister_missing_is_none() {
            let registry = TransportRegistry::new();
            assert!(registry.unregister("missing").is_none());
        }

        #[test]
        fn test_registries_are_independent() {
            let a = TransportRegistry::new();
            let b = TransportRegistry::new();
            a.register("ssh+tcp", StubDialer::new()).unwrap();
            assert!(!b.contains("ssh+tcp"));
        }
    }

    mod naming {
        use super::*;

        #[test]
        fn test_unique_name_has_prefix() {
            let name = TransportRegistry::unique_name("ssh+tcp");
            assert!(name.starts_with("ssh+tcp-"));
            assert!(validate_name(&name).is_ok());
        }

        #[test]
        fn test_unique_names_differ() {
            assert_ne!(
                TransportRegistry::unique_name("ssh+tcp"),
                TransportRegistry::unique_name("ssh+tcp")
            );
        }
    }
}
