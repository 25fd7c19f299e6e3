use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::{
    check_same_ca, CaServer, DirectoryAnchor, DirectoryConnection, DirectoryConnector,
    DirectoryError, DomainConfig, ModifyOutcome, Session,
};

/// Contents of a [`MemoryDirectory`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectoryState {
    pub config: DomainConfig,
    pub ca_servers: Vec<CaServer>,
    pub renewal_master: Option<String>,
    pub anchors: Vec<DirectoryAnchor>,
    /// uid → (certificate, description)
    pub persons: BTreeMap<String, (Vec<u8>, String)>,
    pub authority_serial: Option<String>,
    /// Refuse every connection attempt.
    pub fail_connect: bool,
    /// Fail `trust_anchors` after connecting.
    pub fail_anchor_fetch: bool,
}

#[derive(Debug, Default)]
struct Counters {
    connects: usize,
    disconnects: usize,
    operations: Vec<String>,
}

/// In-process directory for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<MemoryDirectoryState>,
    counters: Mutex<Counters>,
}

impl MemoryDirectory {
    pub fn new(state: MemoryDirectoryState) -> Self {
        Self {
            state: Mutex::new(state),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryDirectoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> MemoryDirectoryState {
        self.state().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut MemoryDirectoryState)) {
        f(&mut *self.state());
    }

    /// Connection attempts, including refused ones.
    pub fn connects(&self) -> usize {
        self.counters().connects
    }

    pub fn disconnects(&self) -> usize {
        self.counters().disconnects
    }

    /// Names of the operations performed, in order.
    pub fn operations(&self) -> Vec<String> {
        self.counters().operations.clone()
    }

    fn record(&self, op: &str) {
        self.counters().operations.push(op.to_string());
    }
}

impl DirectoryConnector for MemoryDirectory {
    fn connect(&self) -> Result<Session<'_>, DirectoryError> {
        self.counters().connects += 1;
        if self.state().fail_connect {
            return Err(DirectoryError::Connect("connection refused".to_string()));
        }
        Ok(Session::new(Box::new(MemoryConnection {
            dir: self,
            open: true,
        })))
    }
}

struct MemoryConnection<'a> {
    dir: &'a MemoryDirectory,
    open: bool,
}

impl MemoryConnection<'_> {
    fn begin(&self, op: &str) -> Result<MutexGuard<'_, MemoryDirectoryState>, DirectoryError> {
        if !self.open {
            return Err(DirectoryError::Closed);
        }
        self.dir.record(op);
        Ok(self.dir.state())
    }
}

impl DirectoryConnection for MemoryConnection<'_> {
    fn config(&mut self) -> Result<DomainConfig, DirectoryError> {
        Ok(self.begin("config")?.config.clone())
    }

    fn ca_servers(&mut self) -> Result<Vec<CaServer>, DirectoryError> {
        let mut servers = self.begin("ca_servers")?.ca_servers.clone();
        servers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(servers)
    }

    fn renewal_master(&mut self) -> Result<Option<String>, DirectoryError> {
        Ok(self.begin("renewal_master")?.renewal_master.clone())
    }

    fn update_ca_cert(&mut self, der: &[u8]) -> Result<ModifyOutcome, DirectoryError> {
        let mut state = self.begin("update_ca_cert")?;
        let Some(current) = state.anchors.iter().find(|a| a.domain_ca).cloned() else {
            return Err(DirectoryError::NotFound("domain CA certificate".to_string()));
        };
        if state.anchors.iter().any(|a| a.domain_ca && a.cert_der == der) {
            return Ok(ModifyOutcome::Unchanged);
        }
        check_same_ca(&current.cert_der, der)?;
        state.anchors.push(DirectoryAnchor {
            cert_der: der.to_vec(),
            ..current
        });
        Ok(ModifyOutcome::Modified)
    }

    fn trust_anchors(&mut self) -> Result<Vec<DirectoryAnchor>, DirectoryError> {
        let state = self.begin("trust_anchors")?;
        if state.fail_anchor_fetch {
            return Err(DirectoryError::Operation("trust anchor search failed".to_string()));
        }
        Ok(state.anchors.clone())
    }

    fn update_person_cert(
        &mut self,
        uid: &str,
        der: &[u8],
        description: &str,
    ) -> Result<ModifyOutcome, DirectoryError> {
        let mut state = self.begin("update_person_cert")?;
        let Some(entry) = state.persons.get_mut(uid) else {
            return Err(DirectoryError::NotFound(format!("uid={uid}")));
        };
        if entry.0 == der && entry.1 == description {
            return Ok(ModifyOutcome::Unchanged);
        }
        *entry = (der.to_vec(), description.to_string());
        Ok(ModifyOutcome::Modified)
    }

    fn update_authority_serial(&mut self, serial: &str) -> Result<ModifyOutcome, DirectoryError> {
        let mut state = self.begin("update_authority_serial")?;
        let current = state.authority_serial.clone();
        match current {
            None => Err(DirectoryError::NotFound("host authority".to_string())),
            Some(current) if current == serial => Ok(ModifyOutcome::Unchanged),
            Some(_) => {
                state.authority_serial = Some(serial.to_string());
                Ok(ModifyOutcome::Modified)
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), DirectoryError> {
        if !self.open {
            return Err(DirectoryError::Closed);
        }
        self.open = false;
        self.dir.counters().disconnects += 1;
        Ok(())
    }
}
