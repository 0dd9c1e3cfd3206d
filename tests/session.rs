#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use famhealth_lib::{
    FamilyCodeError, Identity, IdentityError, IdentityProvider, JoinError, MemoryRemote,
    RemoteStore, Session, StoreHandle, SyncStatus,
};
use serde_json::json;

mod util;

use util::{device, member, provider, settle};

struct CancellingProvider;

#[async_trait]
impl IdentityProvider for CancellingProvider {
    async fn sign_in(&self) -> Result<Identity, IdentityError> {
        Err(IdentityError::Cancelled)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        Err(IdentityError::Unavailable("offline".into()))
    }
}

#[tokio::test]
async fn join_normalises_input() -> Result<()> {
    let remote = MemoryRemote::new();
    remote
        .write("families/AB12CD", json!({ "createdAt": "2024-01-01T00:00:00.000Z" }))
        .await?;
    let mut session = device(&remote, "u1").await;

    let code = session.join_family("  ab12cd ").await?;
    assert_eq!(code.as_str(), "AB12CD");
    assert_eq!(session.family_code(), Some(&code));
    Ok(())
}

#[tokio::test]
async fn unknown_family_is_not_found_and_touches_nothing() -> Result<()> {
    let remote = MemoryRemote::new();
    let store = StoreHandle::in_memory();
    let mut session = util::device_with_store(&remote, "u1", store.clone()).await;

    let err = session.join_family("ZZZZ99").await.unwrap_err();
    assert_eq!(err, JoinError::NotFound("ZZZZ99".into()));
    assert!(store.family_code().is_none());
    assert!(session.family_code().is_none());
    assert_eq!(session.status(), SyncStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn malformed_codes_are_rejected_before_lookup() -> Result<()> {
    let remote = MemoryRemote::new();
    let mut session = device(&remote, "u1").await;

    assert_eq!(
        session.join_family("ABC").await.unwrap_err(),
        JoinError::InvalidCode(FamilyCodeError::WrongLength)
    );
    assert_eq!(
        session.join_family("AB-2CD").await.unwrap_err(),
        JoinError::InvalidCode(FamilyCodeError::InvalidCharacter)
    );
    Ok(())
}

#[tokio::test]
async fn created_family_is_joinable_from_another_device() -> Result<()> {
    let remote = MemoryRemote::new();
    let mut first = device(&remote, "a").await;
    let code = first.create_family().await?;
    settle().await;
    assert!(remote.peek(&format!("families/{code}/createdAt")).is_some());

    first.engine().add_member(member("m1", "Alex")).await;
    let mut second = device(&remote, "b").await;
    second.join_family(code.as_str()).await?;
    util::eventually(second.engine(), "member from first device", |e| {
        e.members().len() == 1
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn sign_in_resumes_persisted_family() -> Result<()> {
    let remote = MemoryRemote::new();
    remote
        .write("families/AB12CD", json!({ "createdAt": "2024-01-01T00:00:00.000Z" }))
        .await?;
    remote
        .write("families/AB12CD/members", json!({ "m1": { "name": "Alex" } }))
        .await?;
    let store = StoreHandle::in_memory();
    store.set_family_code(Some("AB12CD"));

    let mut session = Session::new(store, Arc::new(remote.clone()));
    assert!(session.engine().members().is_empty());
    session.sign_in(&provider("u1")).await?;
    util::eventually(session.engine(), "resumed members", |e| e.members().len() == 1).await;
    assert!(session.is_syncing());
    Ok(())
}

#[tokio::test]
async fn cancelled_sign_in_leaves_state_untouched() -> Result<()> {
    let store = StoreHandle::in_memory();
    let mut session = Session::new(store, Arc::new(MemoryRemote::new()));
    session.engine().add_member(member("m1", "Alex")).await;

    let err = session.sign_in(&CancellingProvider).await.unwrap_err();
    assert_eq!(err.code(), "IDENTITY/CANCELLED");
    assert!(session.identity().is_none());
    assert_eq!(session.engine().members().len(), 1);
    Ok(())
}

#[tokio::test]
async fn sign_out_ignores_provider_errors_and_forgets_family() -> Result<()> {
    let remote = MemoryRemote::new();
    let store = StoreHandle::in_memory();
    let mut session = util::device_with_store(&remote, "u1", store.clone()).await;
    session.create_family().await?;
    settle().await;

    session.sign_out(&CancellingProvider).await;
    assert!(session.identity().is_none());
    assert!(session.family_code().is_none());
    assert!(store.family_code().is_none());
    assert_eq!(session.status(), SyncStatus::Idle);
    Ok(())
}
