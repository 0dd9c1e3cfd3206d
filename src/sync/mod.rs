//! Local-first replication of the family collections.
//!
//! Every change goes through one commit path tagged with its [`Origin`].
//! Local commits are persisted and then written to the remote store when a
//! family and an identity are bound; remote commits are persisted but never
//! written back, which is what keeps a device from echoing its own writes.

mod status;
mod subscription;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collections::{
    Allergies, CheckupLogsCollection, Collection, CollectionKind, DismissedCheckupsCollection,
    Entries, GrowthRecords, Medications, Members, PeriodRecords,
};
use crate::directory::FamilyCode;
use crate::identity::Identity;
use crate::local_store::StoreHandle;
use crate::model::{
    for_member, Allergy, ByMember, FamilyData, GrowthRecord, HealthEntry, Identified, Medication,
    Member, PeriodRecord,
};
use crate::remote::{collection_path, RemoteError, RemoteStore, SnapshotStream};
use crate::sync_logging::SyncLogScope;
use crate::time::now_iso;
use crate::AppError;

pub use status::{ChangeEvent, Origin, PushOutcome, SyncStatus};
pub use subscription::SubscriptionHandle;

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const COLLECTION_COUNT: usize = CollectionKind::ALL.len();
/// Times a listener reopens its stream before the subscription is dropped.
const RESUBSCRIBE_ATTEMPTS: u32 = 3;
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(100);

/// Family and identity a device replicates under. Both must be present for
/// any remote traffic.
#[derive(Debug, Clone)]
struct SyncScope {
    family_code: FamilyCode,
    identity: Identity,
}

#[derive(Default)]
struct EngineState {
    data: FamilyData,
    scope: Option<SyncScope>,
    epoch: u64,
    /// Collections whose latest remote snapshot could not be decoded. Their
    /// local value is behind the family copy, so it must not be written out.
    held: [bool; COLLECTION_COUNT],
}

pub(crate) struct EngineInner {
    state: Mutex<EngineState>,
    store: StoreHandle,
    remote: Arc<dyn RemoteStore>,
    push_locks: [tokio::sync::Mutex<()>; COLLECTION_COUNT],
    changes: broadcast::Sender<ChangeEvent>,
    status: watch::Sender<SyncStatus>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Invalidate `epoch` if it is still current. A newer subscription is
    /// left alone.
    pub(crate) fn retire_epoch(&self, epoch: u64) {
        let mut state = self.lock_state();
        if state.epoch == epoch {
            state.epoch += 1;
        }
    }

    fn push_lock(&self, kind: CollectionKind) -> &tokio::sync::Mutex<()> {
        &self.push_locks[kind as usize]
    }

    /// Replace a collection, persist it, and announce the change. Runs with
    /// the state lock held.
    fn commit<C: Collection>(&self, state: &mut EngineState, value: C::Value, origin: Origin) {
        self.store.persist(C::KIND.local_key(), &value);
        *C::get_mut(&mut state.data) = value;
        // No receivers is fine.
        let _ = self.changes.send(ChangeEvent {
            collection: C::KIND,
            origin,
        });
    }
}

enum Inbound {
    Applied,
    Rejected,
    Stale,
}

/// Owns the in-memory copy of every collection and keeps it in step with
/// the local store and, when bound, the family's remote collections.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Seed every collection from the local store. Nothing touches the
    /// remote store until [`SyncEngine::bind`] and [`SyncEngine::subscribe`].
    pub fn new(store: StoreHandle, remote: Arc<dyn RemoteStore>) -> Self {
        let data = load_all(&store);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(SyncStatus::Idle);
        info!(
            target: "famhealth",
            event = "sync_engine_loaded",
            members = data.members.len(),
            entries = data.entries.len()
        );
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    data,
                    ..Default::default()
                }),
                store,
                remote,
                push_locks: std::array::from_fn(|_| tokio::sync::Mutex::new(())),
                changes,
                status,
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.inner.remote)
    }

    // ---- observation -------------------------------------------------

    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        *self.inner.status.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    fn set_status(&self, status: SyncStatus) {
        self.inner.status.send_replace(status);
    }

    // ---- readers -----------------------------------------------------

    pub fn read<R>(&self, f: impl FnOnce(&FamilyData) -> R) -> R {
        f(&self.inner.lock_state().data)
    }

    pub fn snapshot(&self) -> FamilyData {
        self.read(FamilyData::clone)
    }

    pub fn members(&self) -> Vec<Member> {
        self.read(|data| data.members.clone())
    }

    pub fn member(&self, member_id: &str) -> Option<Member> {
        self.read(|data| data.members.iter().find(|m| m.id == member_id).cloned())
    }

    pub fn entries(&self) -> Vec<HealthEntry> {
        self.read(|data| data.entries.clone())
    }

    pub fn entries_for(&self, member_id: &str) -> Vec<HealthEntry> {
        self.read(|data| {
            data.entries
                .iter()
                .filter(|entry| entry.member_id == member_id)
                .cloned()
                .collect()
        })
    }

    /// Checkup id → completion timestamp for one member.
    pub fn checkup_log_for(&self, member_id: &str) -> std::collections::BTreeMap<String, String> {
        self.read(|data| data.checkup_logs.get(member_id).cloned().unwrap_or_default())
    }

    pub fn dismissed_for(&self, member_id: &str) -> Vec<String> {
        self.read(|data| {
            data.dismissed_checkups
                .get(member_id)
                .cloned()
                .unwrap_or_default()
        })
    }

    pub fn allergies_for(&self, member_id: &str) -> Vec<Allergy> {
        self.read(|data| for_member(&data.allergies, member_id).to_vec())
    }

    pub fn growth_records_for(&self, member_id: &str) -> Vec<GrowthRecord> {
        self.read(|data| for_member(&data.growth_records, member_id).to_vec())
    }

    pub fn medications_for(&self, member_id: &str) -> Vec<Medication> {
        self.read(|data| for_member(&data.medications, member_id).to_vec())
    }

    pub fn period_records_for(&self, member_id: &str) -> Vec<PeriodRecord> {
        self.read(|data| for_member(&data.period_records, member_id).to_vec())
    }

    // ---- scope -------------------------------------------------------

    /// Enable remote writes for `family_code` under `identity`.
    pub fn bind(&self, family_code: FamilyCode, identity: Identity) {
        let mut state = self.inner.lock_state();
        debug!(
            target: "famhealth",
            event = "sync_scope_bound",
            family_code = %family_code,
            uid = %identity.uid
        );
        state.scope = Some(SyncScope {
            family_code,
            identity,
        });
    }

    pub fn unbind(&self) {
        self.inner.lock_state().scope = None;
    }

    pub fn family_code(&self) -> Option<FamilyCode> {
        self.inner
            .lock_state()
            .scope
            .as_ref()
            .map(|scope| scope.family_code.clone())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner
            .lock_state()
            .scope
            .as_ref()
            .map(|scope| scope.identity.clone())
    }

    /// Tear down any subscription, drop the scope, and go idle. Local data
    /// is kept.
    pub fn detach(&self) {
        self.unsubscribe();
        let mut state = self.inner.lock_state();
        state.scope = None;
        state.epoch += 1;
        state.held = [false; COLLECTION_COUNT];
        self.set_status(SyncStatus::Idle);
    }

    // ---- subscriptions -----------------------------------------------

    /// Listen to every collection of `family_code`. Any previous
    /// subscription is torn down first. Status is `Syncing` until the first
    /// snapshot lands.
    pub async fn subscribe(&self, family_code: &FamilyCode) -> Result<SubscriptionHandle, RemoteError> {
        self.unsubscribe();
        let epoch = {
            let mut state = self.inner.lock_state();
            state.epoch += 1;
            state.held = [false; COLLECTION_COUNT];
            state.epoch
        };
        self.set_status(SyncStatus::Syncing);

        let mut tasks = Vec::with_capacity(CollectionKind::ALL.len());
        for kind in CollectionKind::ALL {
            let path = collection_path(family_code.as_str(), kind.remote_name());
            match self.inner.remote.subscribe(&path).await {
                Ok(stream) => tasks.push(self.spawn_listener(kind, path, epoch, stream)),
                Err(err) => {
                    for task in tasks {
                        task.abort();
                    }
                    self.inner.retire_epoch(epoch);
                    self.set_status(SyncStatus::Error);
                    let scope = SyncLogScope::new(
                        "subscribe",
                        Some(family_code.to_string()),
                        Some(kind),
                    );
                    scope.fail(&AppError::from(err.clone()).with_context("path", path));
                    return Err(err);
                }
            }
        }

        let handle = SubscriptionHandle::new(Arc::downgrade(&self.inner), epoch, tasks);
        *self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle.clone());
        info!(
            target: "famhealth",
            event = "family_subscribed",
            family_code = %family_code,
            epoch
        );
        Ok(handle)
    }

    /// Stop the current subscription, if any. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        let current = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = current {
            handle.unsubscribe();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|handle| handle.is_active() && handle.epoch() == self.inner.lock_state().epoch)
            .unwrap_or(false)
    }

    fn spawn_listener(
        &self,
        kind: CollectionKind,
        path: String,
        epoch: u64,
        stream: SnapshotStream,
    ) -> JoinHandle<()> {
        match kind {
            CollectionKind::Members => self.spawn_typed::<Members>(path, epoch, stream),
            CollectionKind::Entries => self.spawn_typed::<Entries>(path, epoch, stream),
            CollectionKind::CheckupLogs => {
                self.spawn_typed::<CheckupLogsCollection>(path, epoch, stream)
            }
            CollectionKind::DismissedCheckups => {
                self.spawn_typed::<DismissedCheckupsCollection>(path, epoch, stream)
            }
            CollectionKind::Allergies => self.spawn_typed::<Allergies>(path, epoch, stream),
            CollectionKind::GrowthRecords => self.spawn_typed::<GrowthRecords>(path, epoch, stream),
            CollectionKind::Medications => self.spawn_typed::<Medications>(path, epoch, stream),
            CollectionKind::PeriodRecords => self.spawn_typed::<PeriodRecords>(path, epoch, stream),
        }
    }

    fn spawn_typed<C: Collection>(
        &self,
        path: String,
        epoch: u64,
        stream: SnapshotStream,
    ) -> JoinHandle<()> {
        let engine = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut stream = stream;
            let mut attempts = 0;
            loop {
                while let Some(snapshot) = stream.next().await {
                    let Some(inner) = engine.upgrade() else {
                        return;
                    };
                    let engine = SyncEngine { inner };
                    if let Inbound::Stale = engine.apply_inbound::<C>(epoch, snapshot) {
                        return;
                    }
                }

                let Some(inner) = engine.upgrade() else {
                    return;
                };
                let current = SyncEngine { inner };
                if !current.stream_ended::<C>(epoch, attempts) {
                    return;
                }
                let remote = current.remote();
                drop(current);

                attempts += 1;
                tokio::time::sleep(RESUBSCRIBE_BACKOFF * attempts).await;
                stream = match remote.subscribe(&path).await {
                    Ok(next) => next,
                    Err(err) => {
                        warn!(
                            target: "famhealth",
                            event = "resubscribe_failed",
                            collection = C::KIND.remote_name(),
                            attempt = attempts,
                            error = %err
                        );
                        futures::stream::empty().boxed()
                    }
                };
            }
        })
    }

    /// A listener's stream closed by itself (cancelled, revoked, dropped
    /// connection). Marks the sync as broken and says whether to reopen it.
    /// Once the attempts run out the whole subscription is torn down, so
    /// `is_subscribed` stops reporting a dead feed as live.
    fn stream_ended<C: Collection>(&self, epoch: u64, attempts: u32) -> bool {
        {
            let state = self.inner.lock_state();
            if state.epoch != epoch {
                return false;
            }
            self.set_status(SyncStatus::Error);
            if attempts < RESUBSCRIBE_ATTEMPTS {
                warn!(
                    target: "famhealth",
                    event = "subscription_stream_ended",
                    collection = C::KIND.remote_name(),
                    epoch,
                    attempt = attempts + 1
                );
                return true;
            }
        }

        error!(
            target: "famhealth",
            event = "subscription_lost",
            collection = C::KIND.remote_name(),
            epoch
        );
        let current = {
            let mut slot = self
                .inner
                .subscription
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|handle| handle.epoch() == epoch) {
                slot.take()
            } else {
                None
            }
        };
        match current {
            Some(handle) => handle.unsubscribe(),
            None => self.inner.retire_epoch(epoch),
        }
        false
    }

    /// Apply one remote snapshot. The epoch check and the commit happen
    /// under the same lock, so nothing lands after teardown.
    ///
    /// A snapshot that cannot be decoded leaves local state alone and holds
    /// remote writes for that collection until a readable one arrives;
    /// otherwise the next local change would overwrite data this device
    /// never saw.
    fn apply_inbound<C: Collection>(&self, epoch: u64, snapshot: Value) -> Inbound {
        let decoded = C::from_remote(snapshot);

        let mut state = self.inner.lock_state();
        if state.epoch != epoch {
            debug!(
                target: "famhealth",
                event = "inbound_snapshot_stale",
                collection = C::KIND.remote_name(),
                epoch,
                current = state.epoch
            );
            return Inbound::Stale;
        }

        let slot = C::KIND as usize;
        let decoded = match decoded {
            Ok(value) => value,
            Err(err) => {
                state.held[slot] = true;
                self.set_status(SyncStatus::Error);
                warn!(
                    target: "famhealth",
                    event = "inbound_snapshot_rejected",
                    collection = C::KIND.remote_name(),
                    error = %err
                );
                return Inbound::Rejected;
            }
        };

        state.held[slot] = false;
        let merged = C::merge_inbound(C::get(&state.data), decoded);
        self.inner.commit::<C>(&mut state, merged, Origin::Remote);
        let status = if state.held.contains(&true) {
            SyncStatus::Error
        } else {
            SyncStatus::Synced
        };
        self.set_status(status);
        debug!(
            target: "famhealth",
            event = "inbound_snapshot_applied",
            collection = C::KIND.remote_name(),
            epoch
        );
        Inbound::Applied
    }

    // ---- local commits -----------------------------------------------

    /// Edit one collection in place, persist it, then push it if bound.
    async fn mutate<C, F>(&self, edit: F) -> PushOutcome
    where
        C: Collection,
        F: FnOnce(&mut C::Value) + Send,
    {
        let (value, scope) = {
            let mut state = self.inner.lock_state();
            let mut value = C::get(&state.data).clone();
            edit(&mut value);
            self.inner.commit::<C>(&mut state, value.clone(), Origin::Local);
            (value, state.scope.clone())
        };
        self.push::<C>(value, scope).await
    }

    async fn push<C: Collection>(&self, value: C::Value, scope: Option<SyncScope>) -> PushOutcome {
        let Some(scope) = scope else {
            return PushOutcome::LocalOnly;
        };
        let path = collection_path(scope.family_code.as_str(), C::KIND.remote_name());
        let payload = C::to_remote(&value);

        let _turn = self.inner.push_lock(C::KIND).lock().await;
        if self.inner.lock_state().held[C::KIND as usize] {
            warn!(
                target: "famhealth",
                event = "remote_write_held",
                family_code = %scope.family_code,
                collection = C::KIND.remote_name()
            );
            return PushOutcome::Held;
        }
        let log = SyncLogScope::new(
            "remote_write",
            Some(scope.family_code.to_string()),
            Some(C::KIND),
        );
        match self.inner.remote.write(&path, payload).await {
            Ok(()) => {
                log.success(json!({ "path": path }));
                PushOutcome::Written
            }
            Err(err) => {
                let err = AppError::from(err).with_context("path", path);
                log.fail(&err);
                self.set_status(SyncStatus::Error);
                PushOutcome::Failed
            }
        }
    }

    async fn upsert<C, T>(&self, record: T) -> PushOutcome
    where
        C: Collection<Value = Vec<T>>,
        T: Identified + Clone + Send,
    {
        let mut record = record;
        record.ensure_id();
        self.mutate::<C, _>(move |records| {
            match records.iter_mut().find(|existing| existing.id() == record.id()) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
        })
        .await
    }

    async fn remove_by_id<C, T>(&self, id: &str) -> PushOutcome
    where
        C: Collection<Value = Vec<T>>,
        T: Identified + Clone + Send,
    {
        self.mutate::<C, _>(|records| records.retain(|record| record.id() != id))
            .await
    }

    async fn add_for_member<C, T>(&self, member_id: &str, record: T) -> PushOutcome
    where
        C: Collection<Value = ByMember<T>>,
        T: Identified + Clone + Send,
    {
        let mut record = record;
        record.ensure_id();
        self.mutate::<C, _>(move |map| {
            map.entry(member_id.to_string()).or_default().push(record);
        })
        .await
    }

    async fn remove_for_member<C, T>(&self, member_id: &str, id: &str) -> PushOutcome
    where
        C: Collection<Value = ByMember<T>>,
        T: Identified + Clone + Send,
    {
        self.mutate::<C, _>(|map| {
            if let Some(records) = map.get_mut(member_id) {
                records.retain(|record| record.id() != id);
            }
        })
        .await
    }

    // ---- operations --------------------------------------------------

    /// Appends `member`, giving it an id first if it has none.
    pub async fn add_member(&self, mut member: Member) -> PushOutcome {
        member.ensure_id();
        self.mutate::<Members, _>(move |members| members.push(member))
            .await
    }

    /// Replace the member with the same id, or append it.
    pub async fn save_member(&self, member: Member) -> PushOutcome {
        self.upsert::<Members, Member>(member).await
    }

    /// Removes the member only. Their entries and per-member records stay.
    pub async fn remove_member(&self, member_id: &str) -> PushOutcome {
        self.remove_by_id::<Members, Member>(member_id).await
    }

    pub async fn add_entry(&self, mut entry: HealthEntry) -> PushOutcome {
        entry.ensure_id();
        self.mutate::<Entries, _>(move |entries| entries.push(entry))
            .await
    }

    pub async fn save_entry(&self, entry: HealthEntry) -> PushOutcome {
        self.upsert::<Entries, HealthEntry>(entry).await
    }

    pub async fn remove_entry(&self, entry_id: &str) -> PushOutcome {
        self.remove_by_id::<Entries, HealthEntry>(entry_id).await
    }

    /// Record a checkup completion. `completed_at` defaults to now.
    pub async fn mark_checkup_done(
        &self,
        member_id: &str,
        checkup_id: &str,
        completed_at: Option<String>,
    ) -> PushOutcome {
        let completed_at = completed_at.unwrap_or_else(now_iso);
        self.mutate::<CheckupLogsCollection, _>(move |logs| {
            logs.entry(member_id.to_string())
                .or_default()
                .insert(checkup_id.to_string(), completed_at);
        })
        .await
    }

    pub async fn dismiss_checkup(&self, member_id: &str, checkup_id: &str) -> PushOutcome {
        self.mutate::<DismissedCheckupsCollection, _>(|dismissed| {
            let ids = dismissed.entry(member_id.to_string()).or_default();
            if !ids.iter().any(|id| id == checkup_id) {
                ids.push(checkup_id.to_string());
            }
        })
        .await
    }

    pub async fn restore_checkup(&self, member_id: &str, checkup_id: &str) -> PushOutcome {
        self.mutate::<DismissedCheckupsCollection, _>(|dismissed| {
            if let Some(ids) = dismissed.get_mut(member_id) {
                ids.retain(|id| id != checkup_id);
            }
        })
        .await
    }

    pub async fn add_allergy(&self, member_id: &str, allergy: Allergy) -> PushOutcome {
        self.add_for_member::<Allergies, Allergy>(member_id, allergy).await
    }

    pub async fn remove_allergy(&self, member_id: &str, allergy_id: &str) -> PushOutcome {
        self.remove_for_member::<Allergies, Allergy>(member_id, allergy_id)
            .await
    }

    pub async fn add_growth_record(&self, member_id: &str, record: GrowthRecord) -> PushOutcome {
        self.add_for_member::<GrowthRecords, GrowthRecord>(member_id, record).await
    }

    pub async fn remove_growth_record(&self, member_id: &str, record_id: &str) -> PushOutcome {
        self.remove_for_member::<GrowthRecords, GrowthRecord>(member_id, record_id)
            .await
    }

    pub async fn add_medication(&self, member_id: &str, medication: Medication) -> PushOutcome {
        self.add_for_member::<Medications, Medication>(member_id, medication)
            .await
    }

    pub async fn remove_medication(&self, member_id: &str, medication_id: &str) -> PushOutcome {
        self.remove_for_member::<Medications, Medication>(member_id, medication_id)
            .await
    }

    pub async fn add_period_record(&self, member_id: &str, record: PeriodRecord) -> PushOutcome {
        self.add_for_member::<PeriodRecords, PeriodRecord>(member_id, record).await
    }

    pub async fn remove_period_record(&self, member_id: &str, record_id: &str) -> PushOutcome {
        self.remove_for_member::<PeriodRecords, PeriodRecord>(member_id, record_id)
            .await
    }
}

fn load_collection<C: Collection>(store: &StoreHandle, data: &mut FamilyData) {
    *C::get_mut(data) = store.load(C::KIND.local_key());
}

fn load_all(store: &StoreHandle) -> FamilyData {
    let mut data = FamilyData::default();
    load_collection::<Members>(store, &mut data);
    load_collection::<Entries>(store, &mut data);
    load_collection::<CheckupLogsCollection>(store, &mut data);
    load_collection::<DismissedCheckupsCollection>(store, &mut data);
    load_collection::<Allergies>(store, &mut data);
    load_collection::<GrowthRecords>(store, &mut data);
    load_collection::<Medications>(store, &mut data);
    load_collection::<PeriodRecords>(store, &mut data);
    // Older local copies may hold records that never got an id.
    data.members.iter_mut().for_each(Identified::ensure_id);
    data.entries.iter_mut().for_each(Identified::ensure_id);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    fn engine() -> (SyncEngine, MemoryRemote) {
        let remote = MemoryRemote::new();
        let engine = SyncEngine::new(StoreHandle::in_memory(), Arc::new(remote.clone()));
        (engine, remote)
    }

    fn member(id: &str, name: &str) -> Member {
        Member {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unbound_mutation_is_local_only() {
        let (engine, remote) = engine();
        let outcome = engine.add_member(member("m1", "Alex")).await;
        assert_eq!(outcome, PushOutcome::LocalOnly);
        assert_eq!(engine.members().len(), 1);
        assert!(remote.journal().is_empty());
    }

    #[tokio::test]
    async fn mutations_persist_locally() {
        let (engine, _remote) = engine();
        engine.add_member(member("m1", "Alex")).await;
        let stored: Vec<Member> = engine.store().load("healthFamily_members");
        assert_eq!(stored, engine.members());
    }

    #[tokio::test]
    async fn save_member_replaces_by_id() {
        let (engine, _remote) = engine();
        engine.add_member(member("m1", "Alex")).await;
        engine.save_member(member("m1", "Alexandra")).await;
        engine.save_member(member("m2", "Sam")).await;
        let names: Vec<_> = engine.members().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Alexandra", "Sam"]);
    }

    #[tokio::test]
    async fn dismiss_is_a_set() {
        let (engine, _remote) = engine();
        engine.dismiss_checkup("m1", "dental").await;
        engine.dismiss_checkup("m1", "dental").await;
        assert_eq!(engine.dismissed_for("m1"), vec!["dental".to_string()]);
        engine.restore_checkup("m1", "dental").await;
        assert!(engine.dismissed_for("m1").is_empty());
    }

    #[tokio::test]
    async fn mark_checkup_done_defaults_to_now() {
        let (engine, _remote) = engine();
        engine.mark_checkup_done("m1", "vision", None).await;
        let log = engine.checkup_log_for("m1");
        let stamp = log.get("vision").unwrap();
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), "2024-01-01T00:00:00.000Z".len());
    }

    #[tokio::test]
    async fn unknown_member_reads_empty() {
        let (engine, _remote) = engine();
        assert!(engine.allergies_for("nobody").is_empty());
        assert!(engine.checkup_log_for("nobody").is_empty());
        assert!(engine.period_records_for("nobody").is_empty());
    }

    #[tokio::test]
    async fn stale_epoch_is_discarded() {
        let (engine, _remote) = engine();
        engine.inner.lock_state().epoch = 3;
        let outcome = engine.apply_inbound::<Members>(2, json!({ "m1": { "name": "Alex" } }));
        assert!(matches!(outcome, Inbound::Stale));
        assert!(engine.members().is_empty());
    }

    #[tokio::test]
    async fn undecodable_snapshot_is_ignored() {
        let (engine, _remote) = engine();
        engine.add_member(member("m1", "Alex")).await;
        let epoch = engine.inner.lock_state().epoch;
        let outcome = engine.apply_inbound::<Members>(epoch, json!("garbage"));
        assert!(matches!(outcome, Inbound::Rejected));
        assert_eq!(engine.members().len(), 1);
        assert_eq!(engine.status(), SyncStatus::Error);
    }

    #[tokio::test]
    async fn rejected_snapshot_holds_writes_until_a_readable_one() {
        let (engine, remote) = engine();
        engine.bind(
            FamilyCode::parse("AB12CD").unwrap(),
            Identity {
                uid: "u1".into(),
                display_name: None,
                id_token: None,
            },
        );
        let epoch = engine.inner.lock_state().epoch;
        engine.apply_inbound::<Members>(epoch, json!({ "m1": "not a record" }));

        assert_eq!(engine.add_member(member("m2", "Sam")).await, PushOutcome::Held);
        assert!(remote.journal().is_empty());
        // Other collections still write.
        assert_eq!(
            engine.dismiss_checkup("m2", "dental").await,
            PushOutcome::Written
        );

        engine.apply_inbound::<Members>(epoch, json!({ "m1": { "name": "Alex" } }));
        assert_eq!(engine.status(), SyncStatus::Synced);
        assert_eq!(engine.add_member(member("m2", "Sam")).await, PushOutcome::Written);
    }

    #[tokio::test]
    async fn records_without_ids_get_one() {
        let (engine, _remote) = engine();
        engine.add_member(member("", "Alex")).await;
        engine
            .add_allergy("m1", Allergy { allergen: "Dust".into(), ..Default::default() })
            .await;
        assert!(!engine.members()[0].id.is_empty());
        assert!(!engine.allergies_for("m1")[0].id.is_empty());
    }
}
