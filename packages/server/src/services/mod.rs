pub mod contest;
pub mod problem;
pub mod ranklist;
pub mod scoring;
pub mod submission;
pub mod upload;
pub mod user;

use sea_orm::sea_query::LockType;
use sea_orm::{DbBackend, EntityTrait, QuerySelect, Select};

/// Row-lock a select on backends that support it. SQLite has no row locks;
/// its single-writer model covers the same read-modify-write races there.
pub(crate) fn lock_for_update<E: EntityTrait>(select: Select<E>, backend: DbBackend) -> Select<E> {
    if backend == DbBackend::Postgres {
        select.lock(LockType::Update)
    } else {
        select
    }
}
