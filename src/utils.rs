use std::{any::Any, rc::Rc};

#[cfg(test)]
pub mod test_helpers;

pub(crate) fn downcast_rc<T: 'static>(value: Rc<dyn Any>) -> Option<Rc<T>> {
    value.downcast().ok()
}
