#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use famhealth_lib::model::{HealthEntry, Member};
use famhealth_lib::{Identity, MemoryRemote, Session, StaticIdentity, StoreHandle, SyncEngine};
use tracing::subscriber::{self, DefaultGuard};
use tracing_subscriber::{fmt, EnvFilter};

pub fn provider(uid: &str) -> StaticIdentity {
    StaticIdentity::new(Identity {
        uid: uid.to_string(),
        display_name: Some(format!("user {uid}")),
        id_token: None,
    })
}

/// A signed-in device sharing `remote` with every other device built on it.
pub async fn device(remote: &MemoryRemote, uid: &str) -> Session {
    device_with_store(remote, uid, StoreHandle::in_memory()).await
}

pub async fn device_with_store(remote: &MemoryRemote, uid: &str, store: StoreHandle) -> Session {
    let mut session = Session::new(store, Arc::new(remote.clone()));
    session
        .sign_in(&provider(uid))
        .await
        .expect("sign in with static identity");
    session
}

pub fn member(id: &str, name: &str) -> Member {
    Member {
        id: id.to_string(),
        name: name.to_string(),
        age: 30.0,
        role: "Parent".to_string(),
        ..Default::default()
    }
}

pub fn entry(id: &str, member_id: &str, description: &str, image: Option<&str>) -> HealthEntry {
    HealthEntry {
        id: id.to_string(),
        member_id: member_id.to_string(),
        date: "2024-05-01".to_string(),
        body_location: "left arm".to_string(),
        description: description.to_string(),
        image: image.map(str::to_string),
        ..Default::default()
    }
}

/// Poll `engine` until `check` holds. Panics after two seconds.
pub async fn eventually<F>(engine: &SyncEngine, what: &str, check: F)
where
    F: Fn(&SyncEngine) -> bool,
{
    let wait = async {
        while !check(engine) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Give listener tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

struct BufferWriter(Arc<StdMutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn init_buffer_subscriber() -> (Arc<StdMutex<Vec<u8>>>, DefaultGuard) {
    let buffer: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("famhealth=debug"))
        .with_writer(move || BufferWriter(writer.clone()))
        .json()
        .finish();
    let guard = subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn log_lines(buffer: &Arc<StdMutex<Vec<u8>>>) -> Vec<serde_json::Value> {
    let raw = String::from_utf8(buffer.lock().unwrap().clone()).expect("log utf8");
    raw.lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
