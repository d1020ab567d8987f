pub(crate) mod error;
pub(crate) mod fixed_queue;
pub(crate) mod flag_array;
pub(crate) mod ids;
pub(crate) mod lock_context;
pub(crate) mod needle;
pub(crate) mod needle_lock;
pub(crate) mod pool;
pub(crate) mod stats;
pub(crate) mod weak_handle;
pub(crate) mod weak_needle;

#[cfg(test)]
crate::sync::static_rwlock! {
    pub static TEST_MUTEX: crate::sync::RwLock<()> = crate::sync::RwLock::new(());
}
