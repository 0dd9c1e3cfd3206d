//! Who is signed in and which family this device belongs to.
//!
//! A `Session` is the single owner of the identity, the joined family code
//! and the active subscription. The sync engine only replicates while the
//! session has bound both.

use std::sync::Arc;

use tracing::{info, warn};

use crate::directory::{FamilyCode, FamilyDirectory, JoinError};
use crate::identity::{Identity, IdentityProvider};
use crate::local_store::StoreHandle;
use crate::remote::RemoteStore;
use crate::sync::{SubscriptionHandle, SyncEngine, SyncStatus};
use crate::sync_logging::SyncLogScope;
use crate::{AppError, AppResult};

pub struct Session {
    store: StoreHandle,
    directory: FamilyDirectory,
    engine: SyncEngine,
    identity: Option<Identity>,
    family_code: Option<FamilyCode>,
    subscription: Option<SubscriptionHandle>,
}

impl Session {
    /// Load local data and the persisted family code. No remote traffic
    /// happens until someone signs in.
    pub fn new(store: StoreHandle, remote: Arc<dyn RemoteStore>) -> Self {
        let family_code = store
            .family_code()
            .and_then(|raw| match FamilyCode::parse(&raw) {
                Ok(code) => Some(code),
                Err(err) => {
                    warn!(
                        target: "famhealth",
                        event = "stored_family_code_invalid",
                        code = %raw,
                        error = %err
                    );
                    None
                }
            });
        let engine = SyncEngine::new(store.clone(), Arc::clone(&remote));
        Self {
            store,
            directory: FamilyDirectory::new(remote),
            engine,
            identity: None,
            family_code,
            subscription: None,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn directory(&self) -> &FamilyDirectory {
        &self.directory
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn family_code(&self) -> Option<&FamilyCode> {
        self.family_code.as_ref()
    }

    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    pub fn is_syncing(&self) -> bool {
        self.subscription
            .as_ref()
            .map(SubscriptionHandle::is_active)
            .unwrap_or(false)
    }

    /// Sign in and, if a family was joined earlier, resume replicating it.
    /// A resume failure leaves the identity in place and reports the error.
    pub async fn sign_in(&mut self, provider: &dyn IdentityProvider) -> AppResult<Identity> {
        let scope = SyncLogScope::new("sign_in", None, None);
        let identity = match provider.sign_in().await {
            Ok(identity) => identity,
            Err(err) => {
                let err = AppError::from(err);
                scope.fail(&err);
                return Err(err);
            }
        };
        self.identity = Some(identity.clone());
        info!(target: "famhealth", event = "signed_in", uid = %identity.uid);

        if let Some(code) = self.family_code.clone() {
            if let Err(err) = self.attach(code.clone(), identity.clone()).await {
                let err = AppError::from(err).with_context("family_code", code.to_string());
                scope.fail(&err);
                return Err(err);
            }
        }
        scope.success(serde_json::json!({ "resumed": self.family_code.is_some() }));
        Ok(identity)
    }

    /// Mint a new family, register it, and join it.
    pub async fn create_family(&mut self) -> AppResult<FamilyCode> {
        let Some(identity) = self.identity.clone() else {
            return Err(JoinError::NotSignedIn.into());
        };
        let code = self.directory.generate_code();
        let scope = SyncLogScope::new("create_family", Some(code.to_string()), None);
        let result = async {
            self.directory.create(&code).await?;
            self.attach(code.clone(), identity).await?;
            Ok::<_, JoinError>(())
        }
        .await;
        match result {
            Ok(()) => {
                scope.success(serde_json::json!({}));
                Ok(code)
            }
            Err(err) => {
                let err = AppError::from(err);
                scope.fail(&err);
                Err(err)
            }
        }
    }

    /// Join an existing family from user input such as `" ab12cd "`.
    pub async fn join_family(&mut self, input: &str) -> Result<FamilyCode, JoinError> {
        let Some(identity) = self.identity.clone() else {
            return Err(JoinError::NotSignedIn);
        };
        let scope = SyncLogScope::new("join_family", Some(input.trim().to_string()), None);
        let result: Result<FamilyCode, JoinError> = async {
            let code = self.directory.resolve(input).await?;
            self.attach(code.clone(), identity).await?;
            Ok(code)
        }
        .await;
        match &result {
            Ok(_) => scope.success(serde_json::json!({})),
            Err(err) => scope.fail(&AppError::from(err.clone())),
        }
        result
    }

    /// Stop replicating and forget the family code. Local collections stay.
    pub fn leave_family(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.unsubscribe();
        }
        self.engine.detach();
        self.store.set_family_code(None);
        if let Some(code) = self.family_code.take() {
            info!(target: "famhealth", event = "family_left", family_code = %code);
        }
    }

    /// Provider errors are logged and otherwise ignored; the session always
    /// ends signed out.
    pub async fn sign_out(&mut self, provider: &dyn IdentityProvider) {
        if let Err(err) = provider.sign_out().await {
            AppError::from(err).log_with_event("sign_out_failed");
        }
        self.leave_family();
        if let Some(identity) = self.identity.take() {
            info!(target: "famhealth", event = "signed_out", uid = %identity.uid);
        }
    }

    async fn attach(&mut self, code: FamilyCode, identity: Identity) -> Result<(), JoinError> {
        if let Some(previous) = self.subscription.take() {
            previous.unsubscribe();
        }
        self.store.set_family_code(Some(code.as_str()));
        self.family_code = Some(code.clone());
        self.engine.bind(code.clone(), identity);
        let handle = self.engine.subscribe(&code).await?;
        self.subscription = Some(handle);
        Ok(())
    }
}
