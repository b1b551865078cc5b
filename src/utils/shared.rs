use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Shared interior-mutable cell used across the service graph.
///
/// The engine is single-threaded async, so `Rc<RefCell<_>>` is the
/// ownership model for everything that outlives one call.
pub(crate) struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Rc::new(RefCell::new(value)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(Rc::clone(&self.0))
    }
}
