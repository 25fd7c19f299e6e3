mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use common::{issue, root, FakeGate, FakeService, FakeSubsystem, TestCert, HOSTNAME};
use kura_ca::history::History;
use kura_ca::lock::{HeldLock, LockError, MemoryLock, NamedLock, RENEWAL_LOCK_NAME};
use kura_ca::renewal::{
    prepare, renew, RenewalContext, RenewalEvent, RenewalReport, StepStatus, DEFAULT_CA_ALIAS,
    SUBSYSTEM_NICKNAME, SUBSYSTEM_USER,
};
use kura_ca::RenewalError;
use kura_directory::{DirectoryAnchor, MemoryDirectory, MemoryDirectoryState};
use kura_truststore::cert::CertInfo;
use kura_truststore::{
    CertStore, MemoryStore, StoreError, TokenAccess, TrustFlags, TrustRecord,
};

const CA_SIGNING: &str = "caSigningCert cert-pki-ca";

fn keyed(flags: TrustFlags) -> TrustFlags {
    TrustFlags {
        has_key: true,
        ..flags
    }
}

fn flags(nss: &str) -> TrustFlags {
    TrustFlags::from_nss(nss).unwrap()
}

fn anchor(nickname: &str, cert: &TestCert, nss: &str, domain_ca: bool) -> DirectoryAnchor {
    DirectoryAnchor {
        nickname: nickname.to_string(),
        cert_der: cert.der(),
        flags: flags(nss),
        domain_ca,
    }
}

struct Fixture {
    store: MemoryStore,
    subsystem: FakeSubsystem,
    service: FakeService,
    gate: FakeGate,
    directory: MemoryDirectory,
    lock: MemoryLock,
    history: History,
}

impl Fixture {
    fn new(state: MemoryDirectoryState) -> Self {
        Self {
            store: MemoryStore::new(),
            subsystem: FakeSubsystem::default(),
            service: FakeService::running(),
            gate: FakeGate::default(),
            directory: MemoryDirectory::new(state),
            lock: MemoryLock::held(RENEWAL_LOCK_NAME),
            history: History::new(kura_common::test::scratch_dir("renewal").join("renewal-history.log")),
        }
    }

    fn ctx<'a>(&'a self, store: &'a dyn CertStore) -> RenewalContext<'a> {
        RenewalContext {
            hostname: HOSTNAME.to_string(),
            ca_alias: DEFAULT_CA_ALIAS.to_string(),
            readiness_timeout: Duration::from_secs(300),
            store,
            subsystem: &self.subsystem,
            service: &self.service,
            readiness: &self.gate,
            directory: &self.directory,
            history: Some(&self.history),
        }
    }

    fn run(&self, nickname: &str) -> Result<RenewalReport, RenewalError> {
        self.run_with(&self.store, nickname)
    }

    fn run_with(&self, store: &dyn CertStore, nickname: &str) -> Result<RenewalReport, RenewalError> {
        let held = HeldLock::adopt_or_acquire(&self.lock).unwrap();
        renew(&self.ctx(store), &RenewalEvent::new(nickname), held)
    }

    fn assert_restarted_and_unlocked(&self) {
        assert_eq!(self.service.starts.get(), 1, "restart attempted once");
        assert_eq!(self.lock.releases(), 1, "lock released once");
        assert!(!self.lock.is_held().unwrap());
    }
}

/// Store {A, B, stale-C} without keys plus the renewed signing certificate
/// issued by A; the directory holds {A, B}.
fn scenario_b() -> (Fixture, TestCert) {
    let a = root("A");
    let b = root("B");
    let c = root("C");
    let signing = issue("Signing", &a);

    let fixture = Fixture::new(MemoryDirectoryState {
        anchors: vec![anchor("A", &a, ",C,C", false), anchor("B", &b, "CT,C,C", false)],
        ..Default::default()
    });
    fixture.store.add(&a.der(), "A", &TrustFlags::domain_ca()).unwrap();
    fixture.store.add(&b.der(), "B", &TrustFlags::domain_ca()).unwrap();
    fixture.store.add(&c.der(), "stale-C", &TrustFlags::domain_ca()).unwrap();
    fixture
        .store
        .add(&signing.der(), CA_SIGNING, &keyed(TrustFlags::domain_ca()))
        .unwrap();
    (fixture, signing)
}

#[test]
fn ordinary_certificate_only_updates_the_subsystem() {
    let web = root("web");
    let fixture = Fixture::new(MemoryDirectoryState::default());
    fixture.store.add(&web.der(), "webCert", &keyed(TrustFlags::default())).unwrap();
    let before = fixture.store.snapshot();

    let report = fixture.run("webCert").unwrap();

    assert_eq!(fixture.service.stops.get(), 1);
    assert_eq!(fixture.subsystem.updated.borrow().as_slice(), ["webCert".to_string()]);
    assert!(report.step("remove_stale_anchors").is_none());
    assert!(report.step("self_test_trust").is_none());
    assert_eq!(fixture.store.snapshot(), before);
    assert!(report.restarted && report.ready);
    assert_eq!(report.failed_steps().count(), 0);
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn ca_signing_renewal_replaces_stale_anchors_with_the_directory_set() {
    let (fixture, _) = scenario_b();

    let report = fixture.run(CA_SIGNING).unwrap();

    assert_eq!(report.failed_steps().count(), 0, "{:?}", report.steps);
    assert_eq!(fixture.store.count("A"), 1);
    assert_eq!(fixture.store.count("B"), 1);
    assert_eq!(fixture.store.count("stale-C"), 0);
    assert_eq!(fixture.store.flags_of("B").unwrap().to_nss(), "CT,C,C");
    // A is the self-test anchor: the directory's ",C,C" plus server auth.
    assert_eq!(fixture.store.flags_of("A").unwrap().to_nss(), "C,C,C");
    assert_eq!(fixture.store.count(CA_SIGNING), 1);
    assert!(fixture.store.flags_of(CA_SIGNING).unwrap().has_key);
    fixture.assert_restarted_and_unlocked();
    assert_eq!(fixture.directory.connects(), fixture.directory.disconnects());
}

#[test]
fn ca_signing_sync_is_idempotent() {
    let (fixture, _) = scenario_b();
    fixture.run(CA_SIGNING).unwrap();
    let first = fixture.store.snapshot();
    fixture.run(CA_SIGNING).unwrap();
    assert_eq!(fixture.store.snapshot(), first);
}

#[test]
fn failed_anchor_fetch_leaves_the_store_untouched() {
    let (fixture, _) = scenario_b();
    fixture.directory.update(|state| state.fail_anchor_fetch = true);
    let before = fixture.store.snapshot();

    let report = fixture.run(CA_SIGNING).unwrap();

    assert!(matches!(report.step("fetch_trust_anchors"), Some(StepStatus::Failed(_))));
    assert!(matches!(report.step("remove_stale_anchors"), Some(StepStatus::Skipped(_))));
    assert_eq!(fixture.store.count("stale-C"), 1);
    assert_eq!(fixture.store.snapshot(), before);
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn unreachable_directory_is_not_fatal() {
    let (fixture, _) = scenario_b();
    fixture.directory.update(|state| state.fail_connect = true);

    let report = fixture.run(CA_SIGNING).unwrap();

    assert!(matches!(report.step("connect_directory"), Some(StepStatus::Failed(_))));
    assert_eq!(fixture.store.count("stale-C"), 1);
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn renewal_master_propagates_the_ca_certificate() {
    let ca = root("Certificate Authority");
    let fixture = Fixture::new(MemoryDirectoryState {
        renewal_master: Some(HOSTNAME.to_string()),
        anchors: vec![anchor("EXAMPLE.COM IPA CA", &ca, "CT,C,C", true)],
        authority_serial: Some("1".to_string()),
        ..Default::default()
    });
    fixture.store.add(&ca.der(), CA_SIGNING, &keyed(TrustFlags::domain_ca())).unwrap();

    let report = fixture.run(CA_SIGNING).unwrap();

    // The directory already holds this certificate; "unchanged" is success.
    assert_eq!(report.step("update_directory_ca_cert"), Some(&StepStatus::Done));
    assert_eq!(report.step("update_authority_serial"), Some(&StepStatus::Done));
    let serial = CertInfo::parse(&ca.der()).unwrap().serial;
    assert_eq!(fixture.directory.snapshot().authority_serial, Some(serial));
    // The domain CA comes back under the local alias, not as a second entry.
    assert_eq!(fixture.store.count(CA_SIGNING), 1);
    assert_eq!(fixture.store.count("EXAMPLE.COM IPA CA"), 0);
    assert!(fixture.store.flags_of(CA_SIGNING).unwrap().has_key);
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn non_master_does_not_write_to_the_directory() {
    let (fixture, _) = scenario_b();
    fixture.directory.update(|state| state.renewal_master = Some("ca0.example.com".to_string()));

    fixture.run(CA_SIGNING).unwrap();

    let operations = fixture.directory.operations();
    assert!(!operations.iter().any(|op| op.starts_with("update_")), "{operations:?}");
}

#[test]
fn renewal_master_updates_the_subsystem_person_entry() {
    let subsystem = root("CA Subsystem");
    let mut state = MemoryDirectoryState {
        renewal_master: Some(HOSTNAME.to_string()),
        ..Default::default()
    };
    state
        .persons
        .insert(SUBSYSTEM_USER.to_string(), (Vec::new(), String::new()));
    let fixture = Fixture::new(state);
    fixture
        .store
        .add(&subsystem.der(), SUBSYSTEM_NICKNAME, &keyed(TrustFlags::default()))
        .unwrap();

    let report = fixture.run(SUBSYSTEM_NICKNAME).unwrap();

    assert_eq!(report.step("update_person_entry"), Some(&StepStatus::Done));
    let persons = fixture.directory.snapshot().persons;
    let (der, description) = &persons[SUBSYSTEM_USER];
    assert_eq!(der, &subsystem.der());
    assert!(description.starts_with("2;"), "{description}");
    assert!(description.ends_with(";CN=CA Subsystem,O=EXAMPLE.COM"), "{description}");
}

#[test]
fn audit_signing_certificate_gets_signing_trust() {
    let audit = root("Audit");
    let fixture = Fixture::new(MemoryDirectoryState::default());
    fixture
        .store
        .add(&audit.der(), "auditSigningCert cert-pki-ca", &keyed(TrustFlags::default()))
        .unwrap();

    let report = fixture.run("auditSigningCert cert-pki-ca").unwrap();

    assert_eq!(report.step("audit_signing_trust"), Some(&StepStatus::Done));
    assert_eq!(
        fixture.store.flags_of("auditSigningCert cert-pki-ca").unwrap().to_nss(),
        "u,u,Pu"
    );
    assert!(!fixture.directory.operations().contains(&"trust_anchors".to_string()));
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn missing_certificate_is_fatal_but_restarts_and_unlocks() {
    let fixture = Fixture::new(MemoryDirectoryState::default());

    let err = fixture.run("webCert").unwrap_err();

    assert!(matches!(err, RenewalError::MissingCertificate(ref nick) if nick == "webCert"));
    assert!(fixture.subsystem.updated.borrow().is_empty());
    fixture.assert_restarted_and_unlocked();
    assert!(fixture.history.read().unwrap().contains("outcome=aborted"));
}

#[test]
fn hardware_token_without_password_is_fatal_but_restarts_and_unlocks() {
    let (mut fixture, _) = scenario_b();
    fixture
        .subsystem
        .tokens
        .insert(CA_SIGNING.to_string(), "lunasa".to_string());

    let err = fixture.run(CA_SIGNING).unwrap_err();

    assert!(matches!(err, RenewalError::TokenUnavailable { ref token, .. } if token == "lunasa"));
    assert_eq!(fixture.store.count("stale-C"), 1);
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn hardware_token_with_password_proceeds() {
    let (mut fixture, _) = scenario_b();
    fixture
        .subsystem
        .tokens
        .insert(CA_SIGNING.to_string(), "lunasa".to_string());
    fixture
        .subsystem
        .passwords
        .insert("lunasa".to_string(), "hsm-pin".to_string());

    let report = fixture.run(CA_SIGNING).unwrap();
    assert_eq!(report.failed_steps().count(), 0);
    assert_eq!(fixture.store.count("stale-C"), 0);
}

#[test]
fn stop_failure_is_logged_and_the_run_continues() {
    let (mut fixture, _) = scenario_b();
    fixture.service.fail_stop = true;

    let report = fixture.run(CA_SIGNING).unwrap();

    assert!(matches!(report.step("stop_subsystem"), Some(StepStatus::Failed(_))));
    assert_eq!(fixture.store.count("stale-C"), 0);
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn subsystem_that_never_becomes_ready_is_reported() {
    let (mut fixture, _) = scenario_b();
    fixture.gate.never_ready = true;

    let report = fixture.run(CA_SIGNING).unwrap();

    assert!(report.restarted);
    assert!(!report.ready);
    assert_eq!(fixture.lock.releases(), 1);
}

struct PanickingStore;

impl CertStore for PanickingStore {
    fn list(&self) -> Result<Vec<TrustRecord>, StoreError> {
        Ok(Vec::new())
    }
    fn get(&self, _nickname: &str, _token: &TokenAccess) -> Result<Option<Vec<u8>>, StoreError> {
        panic!("store backend crashed");
    }
    fn add(&self, _der: &[u8], _nickname: &str, _flags: &TrustFlags) -> Result<(), StoreError> {
        Ok(())
    }
    fn delete(&self, nickname: &str) -> Result<(), StoreError> {
        Err(StoreError::NotFound(nickname.to_string()))
    }
    fn has_nickname(&self, _nickname: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
    fn set_trust(&self, _nickname: &str, _flags: &TrustFlags, _token: &TokenAccess) -> Result<(), StoreError> {
        Ok(())
    }
    fn find_root_chain(&self, _nickname: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

#[test]
fn unwinding_run_still_restarts_and_unlocks() {
    let fixture = Fixture::new(MemoryDirectoryState::default());

    let outcome = catch_unwind(AssertUnwindSafe(|| fixture.run_with(&PanickingStore, CA_SIGNING)));

    assert!(outcome.is_err());
    fixture.assert_restarted_and_unlocked();
}

#[test]
fn prepare_stops_the_subsystem_and_hands_the_lock_over() {
    let mut fixture = Fixture::new(MemoryDirectoryState::default());
    fixture.lock = MemoryLock::new(RENEWAL_LOCK_NAME);

    prepare(&fixture.service, &fixture.lock).unwrap();

    assert_eq!(fixture.service.stops.get(), 1);
    assert!(fixture.lock.is_held().unwrap());
    assert_eq!(fixture.lock.acquisitions(), 1);
    assert_eq!(fixture.lock.releases(), 0);

    assert!(matches!(
        prepare(&fixture.service, &fixture.lock),
        Err(LockError::Held { .. })
    ));

    let web = root("web");
    fixture.store.add(&web.der(), "webCert", &keyed(TrustFlags::default())).unwrap();
    fixture.run("webCert").unwrap();
    assert_eq!(fixture.lock.releases(), 1);
    assert!(!fixture.lock.is_held().unwrap());
}
