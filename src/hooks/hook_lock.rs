/// A process-wide slot that the fault callback can read without blocking.
///
/// Writers (initialize and cleanup) spin. The fault callback only ever
/// tries to read: if the slot is being written, perhaps by the faulting
/// thread itself, the delivery is passed on instead of deadlocking.
#[repr(transparent)]
pub(crate) struct HookLock<T: 'static + Send + Sync>(spin::RwLock<Option<T>>);

#[repr(transparent)]
pub(crate) struct HookLockReadGuard<T: 'static + Send + Sync>(spin::RwLockReadGuard<'static, Option<T>>);

#[repr(transparent)]
pub(crate) struct HookLockWriteGuard<T: 'static + Send + Sync>(spin::RwLockWriteGuard<'static, Option<T>>);

impl<T: 'static + Send + Sync> HookLock<T> {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self(spin::RwLock::new(None))
    }

    /// Spins until no writer holds the slot. Never called from the fault path.
    #[inline]
    pub(crate) fn read(&'static self) -> HookLockReadGuard<T> {
        HookLockReadGuard(self.0.read())
    }

    #[inline]
    pub(crate) fn try_read(&'static self) -> Option<HookLockReadGuard<T>> {
        self.0.try_read().map(HookLockReadGuard)
    }

    #[inline]
    pub(crate) fn write(&'static self) -> HookLockWriteGuard<T> {
        HookLockWriteGuard(self.0.write())
    }
}

impl<T: 'static + Send + Sync> HookLockReadGuard<T> {
    #[inline]
    pub(crate) fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

impl<T: 'static + Send + Sync> HookLockWriteGuard<T> {
    #[inline]
    pub(crate) fn get(&mut self) -> &mut Option<T> {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_fails_while_written() {
        static LOCK: HookLock<u32> = HookLock::new();

        assert!(LOCK.try_read().is_some_and(|guard| guard.get().is_none()));
        {
            let mut guard = LOCK.write();
            *guard.get() = Some(7);
            assert!(LOCK.try_read().is_none());
        }
        assert_eq!(LOCK.try_read().and_then(|guard| guard.get().copied()), Some(7));
    }

    #[test]
    fn readers_share_the_slot() {
        static LOCK: HookLock<u32> = HookLock::new();

        *LOCK.write().get() = Some(3);
        let first = LOCK.read();
        let second = LOCK.read();
        assert_eq!(first.get().copied(), Some(3));
        assert_eq!(second.get().copied(), Some(3));
        assert!(LOCK.try_read().is_some());
    }
}
