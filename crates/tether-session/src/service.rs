//! Client services: named subscriptions a session can opt into.
//!
//! The browser registers for a service by name (`{"service_id": ...}`)
//! and may pass data along. Services are collected into a
//! [`ServiceTable`] once at startup; an unknown name is a soft failure
//! the client is told about.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tether_protocol::{DisplayLine, SessionId};
use tracing::{debug, warn};

use crate::{SessionError, SessionRegistry};

/// Name of the built-in live roster service.
pub const ROSTER_SERVICE: &str = "player_list";

/// A service sessions can register for.
///
/// Both methods run under the registry lock and may queue output on the
/// session. `session_id` always names a live session.
pub trait ClientService: Send + Sync + 'static {
    fn register(
        &self,
        registry: &mut SessionRegistry,
        session_id: &SessionId,
        data: Option<Value>,
    ) -> Result<(), SessionError>;

    fn unregister(&self, registry: &mut SessionRegistry, session_id: &SessionId);
}

/// The live roster: `player_list` now and after every presence broadcast.
#[derive(Debug, Default, Clone, Copy)]
pub struct RosterService;

impl ClientService for RosterService {
    fn register(
        &self,
        registry: &mut SessionRegistry,
        session_id: &SessionId,
        _data: Option<Value>,
    ) -> Result<(), SessionError> {
        registry.watch_roster(session_id)
    }

    fn unregister(&self, registry: &mut SessionRegistry, session_id: &SessionId) {
        registry.unwatch_roster(session_id);
    }
}

/// Service name → service. The roster is always present.
#[derive(Clone)]
pub struct ServiceTable {
    services: BTreeMap<String, Arc<dyn ClientService>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        let mut services: BTreeMap<String, Arc<dyn ClientService>> = BTreeMap::new();
        services.insert(ROSTER_SERVICE.to_string(), Arc::new(RosterService));
        Self { services }
    }

    /// Adds a service, replacing any previous one under `name`.
    pub fn insert(&mut self, name: impl Into<String>, service: Arc<dyn ClientService>) {
        self.services.insert(name.into(), service);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Registers a session for the named service.
    ///
    /// An unknown name queues a system line for the client and logs a
    /// warning.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] for an unknown session, or whatever the
    /// service returns.
    pub fn register(
        &self,
        registry: &mut SessionRegistry,
        session_id: &SessionId,
        service_id: &str,
        data: Option<Value>,
    ) -> Result<(), SessionError> {
        if registry.get(session_id).is_none() {
            return Err(SessionError::NotFound(session_id.clone()));
        }
        match self.services.get(service_id) {
            Some(service) => {
                debug!(%session_id, service_id, "service registered");
                service.register(registry, session_id, data)
            }
            None => {
                warn!(%session_id, service_id, "failed to register for unknown service");
                unknown_service(registry, session_id, service_id);
                Ok(())
            }
        }
    }

    /// Unregisters a session from the named service. Unknown names are
    /// treated like in [`register`](Self::register).
    ///
    /// # Errors
    /// [`SessionError::NotFound`] for an unknown session.
    pub fn unregister(
        &self,
        registry: &mut SessionRegistry,
        session_id: &SessionId,
        service_id: &str,
    ) -> Result<(), SessionError> {
        if registry.get(session_id).is_none() {
            return Err(SessionError::NotFound(session_id.clone()));
        }
        match self.services.get(service_id) {
            Some(service) => service.unregister(registry, session_id),
            None => {
                warn!(%session_id, service_id, "failed to unregister from unknown service");
                unknown_service(registry, session_id, service_id);
            }
        }
        Ok(())
    }
}

impl Default for ServiceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn unknown_service(registry: &mut SessionRegistry, session_id: &SessionId, service_id: &str) {
    if let Some(session) = registry.get_mut(session_id) {
        session.display_line(DisplayLine::system(format!("Unknown service: {service_id}")));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tether_protocol::OutputEvent;

    use super::*;
    use crate::{InMemoryDirectory, SessionConfig};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(SessionConfig::default(), Arc::new(InMemoryDirectory::new()))
    }

    fn new_session(registry: &mut SessionRegistry) -> SessionId {
        let id = registry.create_session().id().clone();
        registry.pull_output(&id).unwrap();
        id
    }

    /// Records every call it gets.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ClientService for Recorder {
        fn register(
            &self,
            _registry: &mut SessionRegistry,
            session_id: &SessionId,
            data: Option<Value>,
        ) -> Result<(), SessionError> {
            let data = data.map(|d| d.to_string()).unwrap_or_default();
            self.calls.lock().unwrap().push(format!("register {session_id} {data}"));
            Ok(())
        }

        fn unregister(&self, _registry: &mut SessionRegistry, session_id: &SessionId) {
            self.calls.lock().unwrap().push(format!("unregister {session_id}"));
        }
    }

    #[test]
    fn test_new_table_has_roster() {
        let table = ServiceTable::new();
        assert!(table.contains(ROSTER_SERVICE));
        assert_eq!(table.names().collect::<Vec<_>>(), vec![ROSTER_SERVICE]);
    }

    #[test]
    fn test_register_roster_queues_player_list() {
        let mut registry = registry();
        let id = new_session(&mut registry);

        ServiceTable::new()
            .register(&mut registry, &id, ROSTER_SERVICE, None)
            .unwrap();

        let out = registry.pull_output(&id).unwrap();
        assert!(matches!(out.as_slice(), [OutputEvent::PlayerList(_)]));
        assert!(registry.unwatch_roster(&id));
    }

    #[test]
    fn test_register_custom_service_forwards_data() {
        let mut registry = registry();
        let id = new_session(&mut registry);
        let recorder = Arc::new(Recorder::default());
        let mut table = ServiceTable::new();
        table.insert("editor", recorder.clone());

        table
            .register(&mut registry, &id, "editor", Some(json!({"area": "docks"})))
            .unwrap();
        table.unregister(&mut registry, &id, "editor").unwrap();

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![
                format!("register {id} {}", json!({"area": "docks"})),
                format!("unregister {id}"),
            ]
        );
    }

    #[test]
    fn test_register_unknown_service_is_soft_failure() {
        let mut registry = registry();
        let id = new_session(&mut registry);

        ServiceTable::new()
            .register(&mut registry, &id, "weather", None)
            .unwrap();

        let out = registry.pull_output(&id).unwrap();
        match out.as_slice() {
            [OutputEvent::Display(batch)] => {
                assert_eq!(batch.lines, vec![DisplayLine::system("Unknown service: weather")]);
            }
            other => panic!("expected one display event, got {other:?}"),
        }
    }

    #[test]
    fn test_unregister_unknown_service_is_soft_failure() {
        let mut registry = registry();
        let id = new_session(&mut registry);

        ServiceTable::new().unregister(&mut registry, &id, "weather").unwrap();
        assert_eq!(registry.pull_output(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_register_unknown_session_not_found() {
        let mut registry = registry();
        let missing = SessionId::new("missing");
        let err = ServiceTable::new()
            .register(&mut registry, &missing, ROSTER_SERVICE, None)
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(id) if id == missing));
    }
}
