//! Family health records kept on each device and shared between devices
//! that join the same family code.

pub mod attachment;
pub mod collections;
pub mod config;
pub mod derived;
pub mod directory;
pub mod error;
pub mod identity;
pub mod local_store;
pub mod logging;
pub mod model;
pub mod remote;
pub mod session;
pub mod sync;
pub mod sync_logging;
pub mod time;

pub use error::{AppError, AppResult};
pub use logging::init_logging;

pub use collections::CollectionKind;
pub use config::Config;
pub use directory::{FamilyCode, FamilyCodeError, FamilyDirectory, JoinError};
pub use identity::{Identity, IdentityError, IdentityProvider, StaticIdentity};
pub use local_store::{FileStore, LocalStore, MemoryStore, StoreHandle};
pub use model::FamilyData;
pub use remote::{MemoryRemote, RemoteError, RemoteStore, RestRemote};
pub use session::Session;
pub use sync::{ChangeEvent, Origin, PushOutcome, SubscriptionHandle, SyncEngine, SyncStatus};
