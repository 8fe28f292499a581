pub mod boards;
pub mod listener;
pub mod members;
pub mod migrate;
pub mod pool;
pub mod profiles;
pub mod tasks;

pub use listener::TaskChangeListener;
use sqlx::{Postgres, Transaction};

pub(crate) type Tx<'a> = Transaction<'a, Postgres>;
