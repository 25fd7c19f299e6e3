//! Trust anchor synchronisation after a CA signing certificate renewal.

use std::collections::{BTreeMap, BTreeSet};

use kura_directory::{DirectoryAnchor, ModifyOutcome, Session};
use kura_truststore::{CertStore, StoreError, TokenAccess, TrustFlags};

use super::Steps;

/// Anchors keyed by the nickname they get in the local store.
fn local_anchors(anchors: Vec<DirectoryAnchor>, ca_alias: &str) -> Vec<DirectoryAnchor> {
    anchors
        .into_iter()
        .map(|mut anchor| {
            if anchor.domain_ca {
                anchor.nickname = ca_alias.to_string();
            }
            anchor
        })
        .collect()
}

/// Delete every certificate under each nickname that holds no key.
pub fn remove_keyless(store: &dyn CertStore) -> Result<usize, StoreError> {
    let records = store.list()?;
    let keyed: BTreeSet<&str> = records
        .iter()
        .filter(|r| r.flags.has_key)
        .map(|r| r.nickname.as_str())
        .collect();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records.iter().filter(|r| !keyed.contains(r.nickname.as_str())) {
        *counts.entry(record.nickname.as_str()).or_default() += 1;
    }

    let mut removed = 0;
    for (nickname, count) in counts {
        for _ in 0..count {
            match store.delete(nickname) {
                Ok(()) => removed += 1,
                Err(StoreError::NotFound(_)) => break,
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(nickname, "Removed stale trust anchor");
    }
    Ok(removed)
}

pub fn add_anchors(store: &dyn CertStore, anchors: &[DirectoryAnchor]) -> Result<usize, StoreError> {
    for anchor in anchors {
        store.add(&anchor.cert_der, &anchor.nickname, &anchor.flags)?;
        tracing::debug!(nickname = %anchor.nickname, flags = %anchor.flags, "Trust anchor added");
    }
    Ok(anchors.len())
}

/// Give the second-to-last certificate of `nickname`'s chain the trust the
/// subsystem's startup self-test checks for.
///
/// Returns the adjusted nickname, `None` for a self-contained chain.
pub fn trust_self_test_anchor(
    store: &dyn CertStore,
    nickname: &str,
    anchors: Option<&[DirectoryAnchor]>,
    token: &TokenAccess,
) -> Result<Option<String>, StoreError> {
    let chain = store.find_root_chain(nickname)?;
    if chain.len() < 2 {
        return Ok(None);
    }
    let anchor = &chain[chain.len() - 2];

    let known = anchors
        .and_then(|anchors| anchors.iter().find(|a| &a.nickname == anchor))
        .map(|a| a.flags.clone());
    let base = match known {
        Some(flags) => flags,
        None => store
            .list()?
            .into_iter()
            .find(|r| &r.nickname == anchor)
            .map(|r| r.flags)
            .unwrap_or_else(TrustFlags::domain_ca),
    };
    let flags = base.with_server_auth();
    store.set_trust(anchor, &flags, token)?;
    tracing::info!(nickname = %anchor, flags = %flags, "Self-test anchor trusted for server authentication");
    Ok(Some(anchor.clone()))
}

/// The CA signing branch of a renewal. Every part is best-effort.
#[allow(clippy::too_many_arguments)]
pub(super) fn sync_ca_signing(
    store: &dyn CertStore,
    session: Option<&mut Session<'_>>,
    is_master: bool,
    nickname: &str,
    der: &[u8],
    token: &TokenAccess,
    ca_alias: &str,
    steps: &mut Steps,
) {
    let anchors = match session {
        None => {
            steps.skip("fetch_trust_anchors", "no directory session");
            None
        }
        Some(session) => {
            if is_master {
                steps.run("update_directory_ca_cert", || {
                    session.update_ca_cert(der).map(|outcome| {
                        if outcome == ModifyOutcome::Unchanged {
                            tracing::info!("Directory already holds the renewed CA certificate");
                        }
                    })
                });
            }
            match session.trust_anchors() {
                Ok(anchors) => {
                    steps.done("fetch_trust_anchors");
                    Some(local_anchors(anchors, ca_alias))
                }
                Err(e) => {
                    steps.fail("fetch_trust_anchors", &e);
                    None
                }
            }
        }
    };

    match &anchors {
        Some(anchors) => {
            steps.run("remove_stale_anchors", || remove_keyless(store).map(drop));
            steps.run("add_trust_anchors", || add_anchors(store, anchors).map(drop));
        }
        None => {
            let reason = "trust anchors unavailable; local store left unchanged";
            steps.skip("remove_stale_anchors", reason);
            steps.skip("add_trust_anchors", reason);
        }
    }

    steps.run("self_test_trust", || {
        trust_self_test_anchor(store, nickname, anchors.as_deref(), token).map(drop)
    });
}
