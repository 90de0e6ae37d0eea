use std::collections::HashMap;

use itertools::Itertools as _;
use log::{debug, info};
use memory_reader::{LoadedModule, MemoryAccess, Pointer};
use symbol_manager::SymbolResolver;

use crate::{
    Callable, DispatchTable, Error, FieldLoad, ImportMember, ImportSpec,
    MemberKind,
};

/// Tracks which [`ImportSpec`]s are loaded, and what each load
/// changed, so that it can be undone.
#[derive(Default)]
pub struct ImportManager {
    loaded: HashMap<String, LoadedImport>,

    /// Storage of fast-overwrite fields, keyed by dispatch name.
    /// Allocated on first load and kept across unloads.
    field_storage: HashMap<String, Vec<u8>>,
}

struct LoadedImport {
    spec: ImportSpec,
    mapped: HashMap<String, Pointer>,
    bound: Vec<String>,
    fields: HashMap<String, LoadedField>,
}

enum LoadedField {
    Copy { address: Pointer, bytes: Vec<u8> },
    Proxy { address: Pointer, size: usize },
    FastOverwrite { address: Pointer },
}

/// Result of reading one member, before anything is committed.
enum PendingMember {
    Map(Pointer),
    Bind(Pointer),
    Field(LoadedField),
    FastOverwrite { address: Pointer, bytes: Vec<u8> },
    Unused,
}

impl LoadedField {
    fn address(&self) -> Pointer {
        match self {
            Self::Copy { address, .. }
            | Self::Proxy { address, .. }
            | Self::FastOverwrite { address } => *address,
        }
    }
}

impl ImportManager {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_loaded(&self, type_name: &str) -> bool {
        self.loaded.contains_key(type_name)
    }

    pub fn loaded_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.loaded.keys().map(|name| name.as_str())
    }

    /// Resolve and apply every member of `spec`.
    ///
    /// The import is validated, all symbols are resolved, and all field
    /// values are read before anything is changed.  A failure at any
    /// of those steps leaves the manager and `dispatch` untouched.
    /// Loading a type that is already loaded replaces the previous
    /// load.
    pub fn load(
        &mut self,
        spec: &ImportSpec,
        module: &LoadedModule,
        symbols: &mut SymbolResolver,
        mem: &dyn MemoryAccess,
        dispatch: &mut DispatchTable,
    ) -> Result<(), Error> {
        spec.validate()?;

        let names: Vec<&str> = spec
            .members
            .iter()
            .map(|member| member.symbol.as_str())
            .collect();
        let offsets = symbols.resolve_many(&module.path, &names)?;

        let pending = spec
            .members
            .iter()
            .zip(offsets)
            .map(|(member, offset)| -> Result<PendingMember, Error> {
                let address = module.base.try_offset(offset as isize)?;
                debug!(
                    "Resolved {}::{} to {address}",
                    spec.type_name, member.name
                );
                self.read_member(spec, member, address, mem)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        self.unload(&spec.type_name, dispatch);

        let mut loaded = LoadedImport {
            spec: spec.clone(),
            mapped: HashMap::new(),
            bound: Vec::new(),
            fields: HashMap::new(),
        };
        for (member, pending) in spec.members.iter().zip(pending) {
            match pending {
                PendingMember::Map(address) => {
                    loaded.mapped.insert(member.name.clone(), address);
                }
                PendingMember::Bind(address) => {
                    let name = spec.dispatch_name(&member.name);
                    dispatch.retarget(&name, Callable::Native(address));
                    loaded.bound.push(name);
                }
                PendingMember::Field(field) => {
                    loaded.fields.insert(member.name.clone(), field);
                }
                PendingMember::FastOverwrite { address, bytes } => {
                    let storage = self
                        .field_storage
                        .entry(spec.dispatch_name(&member.name))
                        .or_insert_with(|| vec![0; bytes.len()]);
                    storage.copy_from_slice(&bytes);
                    loaded
                        .fields
                        .insert(member.name.clone(), LoadedField::FastOverwrite { address });
                }
                PendingMember::Unused => {}
            }
        }

        info!(
            "Loaded imports of {} ({})",
            spec.type_name,
            spec.members.iter().map(|member| &member.name).join(", ")
        );
        self.loaded.insert(spec.type_name.clone(), loaded);
        Ok(())
    }

    fn read_member(
        &self,
        spec: &ImportSpec,
        member: &ImportMember,
        address: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<PendingMember, Error> {
        if member.kind == MemberKind::Method {
            return Ok(if member.bind {
                PendingMember::Bind(address)
            } else if member.map {
                PendingMember::Map(address)
            } else {
                PendingMember::Unused
            });
        }

        let size = member.field_size;
        let Some(load) = member.field_load else {
            return Err(Error::MissingFieldLoad {
                type_name: spec.type_name.clone(),
                member: member.name.clone(),
            });
        };

        let pending = match load {
            FieldLoad::Copy => {
                let bytes = mem.read_bytes(address..address + size)?.take();
                PendingMember::Field(LoadedField::Copy { address, bytes })
            }
            FieldLoad::Proxy => {
                PendingMember::Field(LoadedField::Proxy { address, size })
            }
            FieldLoad::FastOverwrite => {
                let key = spec.dispatch_name(&member.name);
                if let Some(storage) = self.field_storage.get(&key) {
                    if storage.len() != size {
                        return Err(Error::FieldStorageSizeMismatch {
                            type_name: spec.type_name.clone(),
                            member: member.name.clone(),
                            expected: storage.len(),
                            provided: size,
                        });
                    }
                }
                let bytes = mem.read_bytes(address..address + size)?.take();
                PendingMember::FastOverwrite { address, bytes }
            }
        };
        Ok(pending)
    }

    /// Undo the load of `type_name`: restore every dispatch entry it
    /// retargeted, and zero its fast-overwrite storage.  Unloading a
    /// type that is not loaded does nothing.
    pub fn unload(&mut self, type_name: &str, dispatch: &mut DispatchTable) {
        let Some(loaded) = self.loaded.remove(type_name) else {
            return;
        };

        for name in &loaded.bound {
            dispatch.restore(name);
        }
        for (member, field) in &loaded.fields {
            if let LoadedField::FastOverwrite { .. } = field {
                if let Some(storage) = self
                    .field_storage
                    .get_mut(&loaded.spec.dispatch_name(member))
                {
                    storage.fill(0);
                }
            }
        }

        info!("Unloaded imports of {type_name}");
    }

    pub fn unload_all(&mut self, dispatch: &mut DispatchTable) {
        let type_names: Vec<String> = self.loaded.keys().cloned().collect();
        for type_name in type_names {
            self.unload(&type_name, dispatch);
        }
    }

    fn loaded(&self, type_name: &str, member: &str) -> Result<&LoadedImport, Error> {
        self.loaded.get(type_name).ok_or_else(|| Error::NoSuchImport {
            type_name: type_name.to_string(),
            member: member.to_string(),
        })
    }

    fn no_such_import(type_name: &str, member: &str) -> Error {
        Error::NoSuchImport {
            type_name: type_name.to_string(),
            member: member.to_string(),
        }
    }

    /// Address of a mapped method.
    pub fn method_address(
        &self,
        type_name: &str,
        member: &str,
    ) -> Result<Pointer, Error> {
        self.loaded(type_name, member)?
            .mapped
            .get(member)
            .copied()
            .ok_or_else(|| Self::no_such_import(type_name, member))
    }

    /// Address the value of an imported field was, or is, read from.
    pub fn field_address(
        &self,
        type_name: &str,
        member: &str,
    ) -> Result<Pointer, Error> {
        self.loaded(type_name, member)?
            .fields
            .get(member)
            .map(LoadedField::address)
            .ok_or_else(|| Self::no_such_import(type_name, member))
    }

    /// Current bytes of an imported field.  Proxy fields are read
    /// from `mem`; the other strategies return the bytes loaded.
    pub fn field_bytes(
        &self,
        type_name: &str,
        member: &str,
        mem: &dyn MemoryAccess,
    ) -> Result<Vec<u8>, Error> {
        let loaded = self.loaded(type_name, member)?;
        let field = loaded
            .fields
            .get(member)
            .ok_or_else(|| Self::no_such_import(type_name, member))?;

        match field {
            LoadedField::Copy { bytes, .. } => Ok(bytes.clone()),
            LoadedField::Proxy { address, size } => {
                Ok(mem.read_bytes(*address..*address + *size)?.take())
            }
            LoadedField::FastOverwrite { .. } => self
                .field_storage(&loaded.spec.dispatch_name(member))
                .map(|storage| storage.to_vec())
                .ok_or_else(|| Self::no_such_import(type_name, member)),
        }
    }

    /// Storage of a fast-overwrite field, by dispatch name.  Remains
    /// available, zeroed, after the type is unloaded.
    pub fn field_storage(&self, dispatch_name: &str) -> Option<&[u8]> {
        self.field_storage
            .get(dispatch_name)
            .map(|storage| storage.as_slice())
    }
}
