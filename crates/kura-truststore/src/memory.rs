use std::sync::{Mutex, MutexGuard};

use crate::cert::CertInfo;
use crate::{CertStore, StoreError, TokenAccess, TrustFlags, TrustRecord};

#[derive(Debug, Clone)]
struct Entry {
    nickname: String,
    der: Vec<u8>,
    info: CertInfo,
    flags: TrustFlags,
}

/// In-memory certificate store.
///
/// Entries are keyed by (nickname, certificate); token names are
/// accepted and ignored. Chains are resolved by matching issuer and
/// subject names.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of certificates stored under `nickname`.
    pub fn count(&self, nickname: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.nickname == nickname)
            .count()
    }

    pub fn flags_of(&self, nickname: &str) -> Option<TrustFlags> {
        self.entries()
            .iter()
            .find(|e| e.nickname == nickname)
            .map(|e| e.flags.clone())
    }

    /// Sorted `(nickname, flags)` pairs, for comparing whole-store state.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self
            .entries()
            .iter()
            .map(|e| (e.nickname.clone(), e.flags.to_nss()))
            .collect();
        out.sort();
        out
    }
}

impl CertStore for MemoryStore {
    fn list(&self) -> Result<Vec<TrustRecord>, StoreError> {
        Ok(self
            .entries()
            .iter()
            .map(|e| TrustRecord {
                nickname: e.nickname.clone(),
                serial: Some(e.info.serial.clone()),
                flags: e.flags.clone(),
            })
            .collect())
    }

    fn get(&self, nickname: &str, _token: &TokenAccess) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries()
            .iter()
            .rev()
            .find(|e| e.nickname == nickname)
            .map(|e| e.der.clone()))
    }

    fn add(&self, der: &[u8], nickname: &str, flags: &TrustFlags) -> Result<(), StoreError> {
        let info = CertInfo::parse(der)?;
        let mut entries = self.entries();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.nickname == nickname && e.der == der)
        {
            // Key presence is a property of the database, not of the request.
            let has_key = existing.flags.has_key || flags.has_key;
            existing.flags = TrustFlags {
                has_key,
                ..flags.clone()
            };
            return Ok(());
        }
        entries.push(Entry {
            nickname: nickname.to_string(),
            der: der.to_vec(),
            info,
            flags: flags.clone(),
        });
        Ok(())
    }

    fn delete(&self, nickname: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        let Some(index) = entries.iter().position(|e| e.nickname == nickname) else {
            return Err(StoreError::NotFound(nickname.to_string()));
        };
        entries.remove(index);
        Ok(())
    }

    fn has_nickname(&self, nickname: &str) -> Result<bool, StoreError> {
        Ok(self.entries().iter().any(|e| e.nickname == nickname))
    }

    fn set_trust(
        &self,
        nickname: &str,
        flags: &TrustFlags,
        _token: &TokenAccess,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries();
        let mut found = false;
        for entry in entries.iter_mut().filter(|e| e.nickname == nickname) {
            let has_key = entry.flags.has_key;
            entry.flags = TrustFlags {
                has_key,
                ..flags.clone()
            };
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(StoreError::NotFound(nickname.to_string()))
        }
    }

    fn find_root_chain(&self, nickname: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries();
        let Some(mut current) = entries.iter().rev().find(|e| e.nickname == nickname) else {
            return Err(StoreError::NotFound(nickname.to_string()));
        };

        let mut chain = vec![current.nickname.clone()];
        // Bounded by the store size so an issuer loop cannot spin.
        while chain.len() <= entries.len() && !current.info.is_self_signed() {
            let Some(issuer) = entries
                .iter()
                .find(|e| e.info.issued(&current.info) && e.der != current.der)
            else {
                break;
            };
            chain.push(issuer.nickname.clone());
            current = issuer;
        }
        chain.reverse();
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Issuer {
        key: rcgen::KeyPair,
        cert: rcgen::Certificate,
    }

    fn params(cn: &str, ca: bool) -> rcgen::CertificateParams {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, cn);
        if ca {
            params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        }
        params
    }

    fn root(cn: &str) -> Issuer {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params(cn, true).self_signed(&key).unwrap();
        Issuer { key, cert }
    }

    fn issue(cn: &str, issuer: &Issuer) -> Issuer {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params(cn, true)
            .signed_by(&key, &issuer.cert, &issuer.key)
            .unwrap();
        Issuer { key, cert }
    }

    #[test]
    fn adding_the_same_pair_twice_updates_flags() {
        let store = MemoryStore::new();
        let ca = root("Root A");
        store.add(ca.cert.der(), "A", &TrustFlags::default()).unwrap();
        store.add(ca.cert.der(), "A", &TrustFlags::domain_ca()).unwrap();
        assert_eq!(store.count("A"), 1);
        assert_eq!(store.flags_of("A"), Some(TrustFlags::domain_ca()));
    }

    #[test]
    fn a_nickname_can_hold_two_certificates() {
        let store = MemoryStore::new();
        store.add(root("Old").cert.der(), "A", &TrustFlags::domain_ca()).unwrap();
        store.add(root("New").cert.der(), "A", &TrustFlags::domain_ca()).unwrap();
        assert_eq!(store.count("A"), 2);

        store.delete("A").unwrap();
        assert_eq!(store.count("A"), 1);
        store.delete("A").unwrap();
        assert!(!store.has_nickname("A").unwrap());
        assert!(matches!(store.delete("A"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn key_presence_survives_trust_changes() {
        let store = MemoryStore::new();
        let ca = root("Root A");
        let with_key = TrustFlags {
            has_key: true,
            ..TrustFlags::domain_ca()
        };
        store.add(ca.cert.der(), "signing", &with_key).unwrap();
        store
            .set_trust("signing", &TrustFlags::default(), &TokenAccess::internal())
            .unwrap();
        assert!(store.flags_of("signing").unwrap().has_key);

        store.add(ca.cert.der(), "signing", &TrustFlags::domain_ca()).unwrap();
        assert!(store.flags_of("signing").unwrap().has_key);
    }

    #[test]
    fn chain_walks_issuers_root_first() {
        let store = MemoryStore::new();
        let root_ca = root("Root");
        let intermediate = issue("Intermediate", &root_ca);
        let leaf = issue("Leaf", &intermediate);
        let unrelated = root("Other");

        store.add(unrelated.cert.der(), "other", &TrustFlags::domain_ca()).unwrap();
        store.add(leaf.cert.der(), "leaf", &TrustFlags::default()).unwrap();
        store.add(root_ca.cert.der(), "root", &TrustFlags::domain_ca()).unwrap();
        store.add(intermediate.cert.der(), "intermediate", &TrustFlags::domain_ca()).unwrap();

        assert_eq!(store.find_root_chain("leaf").unwrap(), ["root", "intermediate", "leaf"]);
        assert_eq!(store.find_root_chain("root").unwrap(), ["root"]);
    }

    #[test]
    fn chain_stops_at_a_missing_issuer() {
        let store = MemoryStore::new();
        let root_ca = root("Root");
        let leaf = issue("Leaf", &root_ca);
        store.add(leaf.cert.der(), "leaf", &TrustFlags::default()).unwrap();
        assert_eq!(store.find_root_chain("leaf").unwrap(), ["leaf"]);
        assert!(matches!(store.find_root_chain("absent"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_reports_serials() {
        let store = MemoryStore::new();
        store.add(root("Root").cert.der(), "root", &TrustFlags::domain_ca()).unwrap();
        let records = store.list().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].serial.is_some());
    }
}
