/// Restores a state slot to its snapshot when dropped without `commit`.
///
/// Drivers hold one across every await point so that abandoning the driver
/// future leaves the state it had before the call.
pub(crate) struct Rollback<'a, T: Clone> {
    slot: &'a mut T,
    saved: Option<T>,
}

impl<'a, T: Clone> Rollback<'a, T> {
    pub(crate) fn new(slot: &'a mut T) -> Self {
        let saved = Some(slot.clone());
        Self { slot, saved }
    }

    pub(crate) fn get(&self) -> &T {
        &*self.slot
    }

    pub(crate) fn set(&mut self, value: T) {
        *self.slot = value;
    }

    pub(crate) fn commit(mut self) {
        self.saved = None;
    }
}

impl<T: Clone> Drop for Rollback<'_, T> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.slot = saved;
        }
    }
}
