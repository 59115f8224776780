//! ttlcached core: the shared-memory hash table, its cross-process
//! mutual-exclusion lock, the descriptor hand-off channel, and the three
//! process roles (acceptor, worker, janitor) that share them.

pub mod acceptor;
pub mod error;
pub mod ipc;
pub mod janitor;
pub mod lock;
pub mod shm;
pub mod supervisor;
pub mod table;
pub mod worker;

pub use error::{CacheError, CacheResult};
pub use supervisor::Supervisor;
pub use table::{Outcome, Table};
