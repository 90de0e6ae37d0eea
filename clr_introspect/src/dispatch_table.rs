use std::collections::HashMap;
use std::rc::Rc;

use derive_more::From;
use log::{debug, warn};
use memory_reader::{MemoryAccess, Pointer, TypedPointer};

use crate::Error;

/// Signature of a Rust implementation of a dispatched operation.
/// Arguments and return value are machine words, as for the native
/// functions they stand in for.
pub type RustCallable = Rc<dyn Fn(&[usize]) -> usize>;

/// Target of a dispatched operation.
#[derive(Clone, From)]
pub enum Callable {
    /// Address of a native function in the current process.
    Native(Pointer),

    Rust(RustCallable),
}

struct DispatchEntry {
    current: Callable,
    original: Option<Callable>,
}

/// Indirection from a logical operation name to the code that
/// implements it.
///
/// Bindings retarget an entry rather than patching code, and
/// remember the previous target so that it can be restored.
#[derive(Default)]
pub struct DispatchTable {
    entries: HashMap<String, DispatchEntry>,
}

/// Record of a vtable or call slot overwritten by
/// [`DispatchTable::patch_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchedSlot {
    pub slot: TypedPointer<Pointer>,
    pub original: Pointer,
    pub target: Pointer,
}

impl Callable {
    pub fn rust(func: impl Fn(&[usize]) -> usize + 'static) -> Self {
        Self::Rust(Rc::new(func))
    }

    pub fn as_native(&self) -> Option<Pointer> {
        match self {
            Self::Native(ptr) => Some(*ptr),
            Self::Rust(_) => None,
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(ptr) => write!(f, "Native({ptr})"),
            Self::Rust(_) => write!(f, "Rust(..)"),
        }
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Install the default target of `name`.  Restoring a retargeted
    /// entry returns to this target.
    pub fn register(&mut self, name: impl Into<String>, callable: impl Into<Callable>) {
        let callable = callable.into();
        self.entries.insert(
            name.into(),
            DispatchEntry {
                current: callable.clone(),
                original: Some(callable),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.entries.get(name).map(|entry| &entry.current)
    }

    pub fn is_retargeted(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|entry| match &entry.original {
            Some(Callable::Native(original)) => {
                entry.current.as_native() != Some(*original)
            }
            Some(Callable::Rust(original)) => match &entry.current {
                Callable::Rust(current) => !Rc::ptr_eq(current, original),
                Callable::Native(_) => true,
            },
            None => true,
        })
    }

    /// Point `name` at `callable`.  The target before the first
    /// retarget is kept, so that repeated retargets still restore to
    /// the registered default.
    pub fn retarget(&mut self, name: &str, callable: impl Into<Callable>) {
        let callable = callable.into();
        debug!("Retargeting '{name}' to {callable:?}");
        match self.entries.get_mut(name) {
            Some(entry) => entry.current = callable,
            None => {
                self.entries.insert(
                    name.to_string(),
                    DispatchEntry {
                        current: callable,
                        original: None,
                    },
                );
            }
        }
    }

    /// Undo any retarget of `name`.  Entries that had no registered
    /// default are removed.  Restoring an entry that was never
    /// retargeted, or that does not exist, does nothing.
    pub fn restore(&mut self, name: &str) {
        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };
        match &entry.original {
            Some(original) => entry.current = original.clone(),
            None => {
                self.entries.remove(name);
            }
        }
    }

    /// Invoke a Rust callable.  Native targets require
    /// [`Self::call_native`].
    pub fn call(&self, name: &str, args: &[usize]) -> Result<usize, Error> {
        match self.get(name) {
            None => Err(Error::NotBound(name.to_string())),
            Some(Callable::Native(_)) => {
                Err(Error::NativeCallRequiresUnsafe(name.to_string()))
            }
            Some(Callable::Rust(func)) => Ok(func(args)),
        }
    }

    /// Invoke the target of `name`, whether native or Rust.
    ///
    /// # Safety
    ///
    /// A native target must be the address of a function in the
    /// current process, using the C calling convention, taking
    /// `args.len()` word-sized arguments and returning a word.
    pub unsafe fn call_native(
        &self,
        name: &str,
        args: &[usize],
    ) -> Result<usize, Error> {
        let ptr = match self.get(name) {
            None => return Err(Error::NotBound(name.to_string())),
            Some(Callable::Rust(func)) => return Ok(func(args)),
            Some(Callable::Native(ptr)) => *ptr,
        };

        if ptr.is_null() {
            return Err(Error::NotBound(name.to_string()));
        }

        let addr = ptr.as_usize();
        let result = match *args {
            [] => {
                let func: extern "C" fn() -> usize = std::mem::transmute(addr);
                func()
            }
            [a] => {
                let func: extern "C" fn(usize) -> usize =
                    std::mem::transmute(addr);
                func(a)
            }
            [a, b] => {
                let func: extern "C" fn(usize, usize) -> usize =
                    std::mem::transmute(addr);
                func(a, b)
            }
            [a, b, c] => {
                let func: extern "C" fn(usize, usize, usize) -> usize =
                    std::mem::transmute(addr);
                func(a, b, c)
            }
            [a, b, c, d] => {
                let func: extern "C" fn(usize, usize, usize, usize) -> usize =
                    std::mem::transmute(addr);
                func(a, b, c, d)
            }
            _ => return Err(Error::TooManyNativeArguments(args.len())),
        };
        Ok(result)
    }

    /// Overwrite a code pointer in memory, such as a vtable slot, so
    /// that existing callers reach `target`.
    ///
    /// # Safety
    ///
    /// Every caller of the slot will jump to `target`.  The target
    /// must be compatible with the signature expected at the slot,
    /// and the slot must not be in use while being overwritten.
    pub unsafe fn patch_slot(
        slot: TypedPointer<Pointer>,
        target: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<PatchedSlot, Error> {
        let original = slot.read(mem)?;
        slot.write(&target, mem)?;
        warn!("Patched code slot {slot} from {original} to {target}");
        Ok(PatchedSlot {
            slot,
            original,
            target,
        })
    }

    /// Undo [`Self::patch_slot`].
    ///
    /// # Safety
    ///
    /// As for [`Self::patch_slot`].
    pub unsafe fn restore_slot(
        patch: PatchedSlot,
        mem: &dyn MemoryAccess,
    ) -> Result<(), Error> {
        patch.slot.write(&patch.original, mem)?;
        debug!("Restored code slot {} to {}", patch.slot, patch.original);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use memory_reader::SnapshotMemory;

    use super::*;

    extern "C" fn native_add(a: usize, b: usize) -> usize {
        a + b
    }

    #[test]
    fn retarget_and_restore() -> Result<(), Error> {
        let mut table = DispatchTable::new();
        table.register("op", Callable::rust(|args| args[0] * 2));
        assert_eq!(table.call("op", &[21])?, 42);

        table.retarget("op", Callable::rust(|args| args[0] + 1));
        table.retarget("op", Callable::rust(|args| args[0] + 2));
        assert!(table.is_retargeted("op"));
        assert_eq!(table.call("op", &[1])?, 3);

        table.restore("op");
        table.restore("op");
        assert!(!table.is_retargeted("op"));
        assert_eq!(table.call("op", &[21])?, 42);
        Ok(())
    }

    #[test]
    fn unregistered_entries() {
        let mut table = DispatchTable::new();
        assert!(matches!(table.call("missing", &[]), Err(Error::NotBound(_))));

        table.retarget("temp", Pointer::new(0x1000usize));
        assert!(matches!(
            table.call("temp", &[]),
            Err(Error::NativeCallRequiresUnsafe(_))
        ));

        table.restore("temp");
        assert!(!table.contains("temp"));
        table.restore("never_registered");
        assert!(table.is_empty());
    }

    #[test]
    fn native_call() -> Result<(), Error> {
        let mut table = DispatchTable::new();
        let func: extern "C" fn(usize, usize) -> usize = native_add;
        table.register("add", Pointer::new(func as usize));

        let sum = unsafe { table.call_native("add", &[2, 3])? };
        assert_eq!(sum, 5);

        let err = unsafe { table.call_native("add", &[0; 5]) };
        assert!(matches!(err, Err(Error::TooManyNativeArguments(5))));
        Ok(())
    }

    #[test]
    fn patch_and_restore_slot() -> Result<(), Error> {
        let mem = SnapshotMemory::new()
            .with_region(0x3000usize, 0x1111usize.to_le_bytes().to_vec());
        let slot: TypedPointer<Pointer> = Pointer::new(0x3000usize).into();

        let patch =
            unsafe { DispatchTable::patch_slot(slot, Pointer::new(0x2222usize), &mem)? };
        assert_eq!(patch.original, Pointer::new(0x1111usize));
        assert_eq!(slot.read(&mem)?, Pointer::new(0x2222usize));

        unsafe { DispatchTable::restore_slot(patch, &mem)? };
        assert_eq!(slot.read(&mem)?, Pointer::new(0x1111usize));
        Ok(())
    }
}
