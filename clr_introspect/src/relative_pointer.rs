use memory_reader::{Pointer, TypedPointer};

/// A pointer stored as a signed distance from its own location.
///
/// A stored distance of zero is a null pointer.  Since the target
/// depends on where the distance was stored, a relative pointer can
/// only be decoded together with the address of its slot.
#[derive(Debug)]
pub struct RelativePointer<T> {
    slot: Pointer,
    delta: isize,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> RelativePointer<T> {
    pub fn new(slot: Pointer, delta: isize) -> Self {
        Self {
            slot,
            delta,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn slot(&self) -> Pointer {
        self.slot
    }

    pub fn delta(&self) -> isize {
        self.delta
    }

    pub fn is_null(&self) -> bool {
        self.delta == 0
    }

    pub fn target(&self) -> Option<TypedPointer<T>> {
        if self.is_null() {
            None
        } else {
            self.slot.checked_offset(self.delta).map(TypedPointer::new)
        }
    }
}
