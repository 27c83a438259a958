//! # Type Table
//!
//! Storage for the type graph built from stab type definitions.
//!
//! Every node lives in a session-wide [`TypeArena`] and is addressed by a
//! [`TypeRef`]. Type numbers read from the record stream are resolved through
//! a two-level scheme:
//!
//! - file index 0 is the current compilation unit's own table ([`UnitTypes`])
//! - file index `n > 0` is the `n`-th include file opened by the compilation
//!   unit, whose table lives in the session's [`IncludeRegistry`]
//!
//! Both levels hold `TypeRef`s, never nodes, so cyclic graphs (a struct with
//! a pointer to itself) are plain index cycles.
//!
//! Placeholders are `TypeNode::Null` nodes created when a type number is
//! referenced before it is defined. A later definition either fills the
//! placeholder in place or forwards it to an existing node, so earlier
//! references observe the final type.

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;

use crate::error::{Result, SymscopeError};

/// Stable index of a node in the [`TypeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);

impl TypeRef
{
    /// Raw arena index.
    pub fn index(self) -> usize
    {
        self.0 as usize
    }
}

impl fmt::Display for TypeRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// A type number as written in a stab string: `n` or `(file,index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeNumber
{
    /// 0 for the compilation unit's own table, otherwise a 1-based include-file number.
    pub file: u32,
    /// Slot within the selected table.
    pub index: u32,
}

impl TypeNumber
{
    pub const fn new(file: u32, index: u32) -> Self
    {
        Self { file, index }
    }

    /// A bare `n` type number, addressing the compilation unit's table.
    pub const fn local(index: u32) -> Self
    {
        Self { file: 0, index }
    }
}

impl fmt::Display for TypeNumber
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "({},{})", self.file, self.index)
    }
}

/// One member of a struct or union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member
{
    pub name: String,
    pub type_ref: Option<TypeRef>,
    pub bit_offset: u64,
    pub bit_size: u64,
}

/// One named constant of an enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumerator
{
    pub name: String,
    pub value: i64,
}

/// A node of the type graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeNode
{
    /// Not defined (yet), or its definition was malformed.
    #[default]
    Null,
    Pointer
    {
        target: Option<TypeRef>,
    },
    StructOrUnion
    {
        name: Option<String>,
        is_union: bool,
        /// Byte size; `None` until the definition body has been parsed.
        size: Option<u64>,
        members: Vec<Member>,
    },
    Array
    {
        index: Option<TypeRef>,
        element: Option<TypeRef>,
        min: i64,
        max: i64,
    },
    Enum
    {
        name: Option<String>,
        members: Vec<Enumerator>,
    },
    Basic
    {
        name: String,
    },
    Function
    {
        return_type: Option<TypeRef>,
    },
}

impl TypeNode
{
    /// Category used to match allocations and typedef-cache entries.
    pub fn category(&self) -> Option<TypeCategory>
    {
        match self {
            TypeNode::Null => None,
            TypeNode::Pointer { .. } => Some(TypeCategory::Pointer),
            TypeNode::StructOrUnion { .. } => Some(TypeCategory::Aggregate),
            TypeNode::Array { .. } => Some(TypeCategory::Array),
            TypeNode::Enum { .. } => Some(TypeCategory::Enum),
            TypeNode::Basic { .. } => Some(TypeCategory::Basic),
            TypeNode::Function { .. } => Some(TypeCategory::Function),
        }
    }

    pub fn is_null(&self) -> bool
    {
        matches!(self, TypeNode::Null)
    }

    /// Short human-readable label, used by the CLI and in logs.
    pub fn describe(&self) -> String
    {
        match self {
            TypeNode::Null => "<null>".to_string(),
            TypeNode::Pointer { target } => format!("pointer to {}", fmt_ref(*target)),
            TypeNode::StructOrUnion {
                name,
                is_union,
                size,
                members,
            } => {
                let kind = if *is_union { "union" } else { "struct" };
                let size = size.map_or_else(|| "?".to_string(), |size| size.to_string());
                format!(
                    "{kind} {} (size {size}, {} members)",
                    name.as_deref().unwrap_or("<anonymous>"),
                    members.len()
                )
            }
            TypeNode::Array { element, min, max, .. } => format!("array [{min}..{max}] of {}", fmt_ref(*element)),
            TypeNode::Enum { name, members } => {
                format!("enum {} ({} values)", name.as_deref().unwrap_or("<anonymous>"), members.len())
            }
            TypeNode::Basic { name } => name.clone(),
            TypeNode::Function { return_type } => format!("function returning {}", fmt_ref(*return_type)),
        }
    }
}

fn fmt_ref(type_ref: Option<TypeRef>) -> String
{
    type_ref.map_or_else(|| "<unknown>".to_string(), |r| r.to_string())
}

/// Coarse kind of a type definition, derived from its tag character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory
{
    Pointer,
    Aggregate,
    Array,
    Enum,
    Basic,
    Function,
    /// `=<typenum>`: another number for an existing type.
    Alias,
    /// Tag character we do not understand.
    Unknown,
}

impl TypeCategory
{
    /// Whether a cached definition of category `self` may stand in for `other`.
    pub fn compatible_with(self, other: TypeCategory) -> bool
    {
        self == other || self == TypeCategory::Alias || other == TypeCategory::Alias
    }
}

#[derive(Debug, Clone)]
enum ArenaEntry
{
    Node(TypeNode),
    Forward(TypeRef),
}

/// Session-wide storage for every type node.
#[derive(Debug, Default)]
pub struct TypeArena
{
    entries: Vec<ArenaEntry>,
}

impl TypeArena
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Allocate a node and return its reference.
    pub fn new_node(&mut self, node: TypeNode) -> TypeRef
    {
        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(ArenaEntry::Node(node));
        TypeRef(index)
    }

    /// Follow forwarding links to the node that actually holds the definition.
    pub fn resolve(&self, mut type_ref: TypeRef) -> TypeRef
    {
        // A forward chain can never be longer than the arena.
        for _ in 0..=self.entries.len() {
            match self.entries.get(type_ref.index()) {
                Some(ArenaEntry::Forward(next)) => type_ref = *next,
                _ => break,
            }
        }
        type_ref
    }

    /// Node behind a reference, after forwarding.
    pub fn get(&self, type_ref: TypeRef) -> Option<&TypeNode>
    {
        match self.entries.get(self.resolve(type_ref).index()) {
            Some(ArenaEntry::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, type_ref: TypeRef) -> Option<&mut TypeNode>
    {
        let index = self.resolve(type_ref).index();
        match self.entries.get_mut(index) {
            Some(ArenaEntry::Node(node)) => Some(node),
            _ => None,
        }
    }

    /// Whether two references denote the same node.
    pub fn same(&self, a: TypeRef, b: TypeRef) -> bool
    {
        self.resolve(a) == self.resolve(b)
    }

    /// Replace the contents of a node (used to fill placeholders in place).
    pub fn replace(&mut self, type_ref: TypeRef, node: TypeNode) -> Result<()>
    {
        let slot = self.get_mut(type_ref).ok_or_else(|| unknown_ref(type_ref))?;
        *slot = node;
        Ok(())
    }

    /// Make `from` an alias of `to`; every holder of `from` now sees `to`.
    ///
    /// A no-op when both already resolve to the same node.
    pub fn forward(&mut self, from: TypeRef, to: TypeRef) -> Result<()>
    {
        let from = self.resolve(from);
        let to = self.resolve(to);
        if from == to {
            return Ok(());
        }
        let entry = self.entries.get_mut(from.index()).ok_or_else(|| unknown_ref(from))?;
        *entry = ArenaEntry::Forward(to);
        Ok(())
    }

    /// Set the target of a pointer node.
    pub fn set_pointer_target(&mut self, pointer: TypeRef, target: TypeRef) -> Result<()>
    {
        match self.get_mut(pointer) {
            Some(TypeNode::Pointer { target: slot }) => {
                *slot = Some(target);
                Ok(())
            }
            other => Err(wrong_variant(pointer, "pointer", other.map(|node| &*node))),
        }
    }

    /// Set the return type of a function node.
    pub fn set_return_type(&mut self, function: TypeRef, return_type: TypeRef) -> Result<()>
    {
        match self.get_mut(function) {
            Some(TypeNode::Function { return_type: slot }) => {
                *slot = Some(return_type);
                Ok(())
            }
            other => Err(wrong_variant(function, "function", other.map(|node| &*node))),
        }
    }

    /// Set index type, element type and bounds of an array node.
    pub fn set_array_params(
        &mut self,
        array: TypeRef,
        index: TypeRef,
        element: TypeRef,
        min: i64,
        max: i64,
    ) -> Result<()>
    {
        match self.get_mut(array) {
            Some(TypeNode::Array {
                index: index_slot,
                element: element_slot,
                min: min_slot,
                max: max_slot,
            }) => {
                *index_slot = Some(index);
                *element_slot = Some(element);
                *min_slot = min;
                *max_slot = max;
                Ok(())
            }
            other => Err(wrong_variant(array, "array", other.map(|node| &*node))),
        }
    }

    /// Set the byte size of a struct or union.
    pub fn set_struct_size(&mut self, aggregate: TypeRef, size: u64) -> Result<()>
    {
        match self.get_mut(aggregate) {
            Some(TypeNode::StructOrUnion { size: slot, .. }) => {
                *slot = Some(size);
                Ok(())
            }
            other => Err(wrong_variant(aggregate, "struct", other.map(|node| &*node))),
        }
    }

    /// Append a member to a struct or union.
    pub fn add_struct_member(&mut self, aggregate: TypeRef, member: Member) -> Result<()>
    {
        match self.get_mut(aggregate) {
            Some(TypeNode::StructOrUnion { members, .. }) => {
                members.push(member);
                Ok(())
            }
            other => Err(wrong_variant(aggregate, "struct", other.map(|node| &*node))),
        }
    }

    /// Append a constant to an enum.
    pub fn add_enumerator(&mut self, enumeration: TypeRef, enumerator: Enumerator) -> Result<()>
    {
        match self.get_mut(enumeration) {
            Some(TypeNode::Enum { members, .. }) => {
                members.push(enumerator);
                Ok(())
            }
            other => Err(wrong_variant(enumeration, "enum", other.map(|node| &*node))),
        }
    }
}

fn unknown_ref(type_ref: TypeRef) -> SymscopeError
{
    SymscopeError::InvalidArgument(format!("type reference {type_ref} is not in the arena"))
}

fn wrong_variant(type_ref: TypeRef, expected: &str, found: Option<&TypeNode>) -> SymscopeError
{
    let found = found.map_or_else(|| "nothing".to_string(), TypeNode::describe);
    SymscopeError::InvalidArgument(format!("type {type_ref} is not a {expected} node (found {found})"))
}

/// One level of slots: index -> node reference.
#[derive(Debug, Clone, Default)]
pub struct TypeTable
{
    slots: Vec<Option<TypeRef>>,
}

impl TypeTable
{
    pub fn get(&self, index: u32) -> Option<TypeRef>
    {
        self.slots.get(index as usize).copied().flatten()
    }

    pub fn bind(&mut self, index: u32, type_ref: TypeRef)
    {
        let index = index as usize;
        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(type_ref);
    }

    /// Number of bound slots.
    pub fn bound(&self) -> usize
    {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn clear(&mut self)
    {
        self.slots.clear();
    }
}

/// Handle to a registered include file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IncludeId(usize);

/// A header whose type definitions are shared by every compilation unit that includes it.
#[derive(Debug, Clone)]
pub struct IncludeFile
{
    pub name: String,
    /// Disambiguating value from the include record (a checksum in practice).
    pub value: u32,
    pub table: TypeTable,
}

/// Session-wide registry of include files, deduplicated by (name, value).
#[derive(Debug, Default)]
pub struct IncludeRegistry
{
    files: Vec<IncludeFile>,
    by_key: HashMap<(String, u32), IncludeId>,
}

impl IncludeRegistry
{
    /// Find the include file for (name, value), registering it on first sight.
    ///
    /// Returns the id and whether it already existed.
    pub fn find_or_register(&mut self, name: &str, value: u32) -> (IncludeId, bool)
    {
        if let Some(id) = self.by_key.get(&(name.to_string(), value)) {
            return (*id, true);
        }
        let id = IncludeId(self.files.len());
        self.files.push(IncludeFile {
            name: name.to_string(),
            value,
            table: TypeTable::default(),
        });
        self.by_key.insert((name.to_string(), value), id);
        (id, false)
    }

    pub fn get(&self, id: IncludeId) -> Option<&IncludeFile>
    {
        self.files.get(id.0)
    }

    fn table_mut(&mut self, id: IncludeId) -> Option<&mut TypeTable>
    {
        self.files.get_mut(id.0).map(|file| &mut file.table)
    }

    pub fn len(&self) -> usize
    {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.files.is_empty()
    }
}

/// Per-compilation-unit view of the type numbering.
///
/// `includes[n - 1]` is the include file addressed by file number `n`. The
/// list grows on every include push or reuse record and is reset at each
/// source-file boundary. `open` holds the include files entered by push
/// records and not yet closed; reuse records never enter it, and popping
/// does not renumber anything.
#[derive(Debug)]
pub struct UnitTypes
{
    local: TypeTable,
    includes: Vec<IncludeId>,
    open: Vec<IncludeId>,
    limit: usize,
}

impl UnitTypes
{
    pub fn new(limit: usize) -> Self
    {
        Self {
            local: TypeTable::default(),
            includes: Vec::new(),
            open: Vec::new(),
            limit,
        }
    }

    /// Start a new compilation unit.
    pub fn reset(&mut self)
    {
        self.local.clear();
        self.includes.clear();
        self.open.clear();
    }

    /// Give the next file number to `id`.
    ///
    /// ## Errors
    ///
    /// Returns `IncludeOverflow` when the compilation unit already uses `limit` include files.
    pub fn push_include(&mut self, id: IncludeId) -> Result<u32>
    {
        if self.includes.len() >= self.limit {
            return Err(SymscopeError::IncludeOverflow { limit: self.limit });
        }
        self.includes.push(id);
        Ok(u32::try_from(self.includes.len()).unwrap_or(u32::MAX))
    }

    /// Enter an include file whose body follows until its pop record.
    pub fn enter_include(&mut self, id: IncludeId)
    {
        self.open.push(id);
    }

    /// Close the innermost entered include file.
    pub fn pop_include(&mut self) -> Option<IncludeId>
    {
        self.open.pop()
    }

    fn include_for(&self, file: u32) -> Option<IncludeId>
    {
        let position = usize::try_from(file).ok()?.checked_sub(1)?;
        self.includes.get(position).copied()
    }
}

/// Cached result of a multi-definition typedef: one entry per definition site.
#[derive(Debug, Clone)]
pub struct TypedefCacheEntry
{
    pub sites: SmallVec<[(TypeCategory, TypeRef); 4]>,
}

/// Session-wide typedef de-duplication cache keyed by typedef name.
#[derive(Debug, Default)]
pub struct TypedefCache
{
    entries: HashMap<String, TypedefCacheEntry>,
}

impl TypedefCache
{
    pub fn lookup(&self, name: &str) -> Option<&TypedefCacheEntry>
    {
        self.entries.get(name)
    }

    /// Register an entry for `name` unless one already exists.
    pub fn register(&mut self, name: &str, entry: TypedefCacheEntry) -> bool
    {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_string(), entry);
        true
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}

/// Everything type-related that outlives a single module.
#[derive(Debug, Default)]
pub struct TypeStore
{
    pub arena: TypeArena,
    pub includes: IncludeRegistry,
    pub typedefs: TypedefCache,
}

impl TypeStore
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Node behind a reference, after forwarding.
    pub fn node(&self, type_ref: TypeRef) -> Option<&TypeNode>
    {
        self.arena.get(type_ref)
    }

    /// Slot bound to `number` in the given unit, without creating it.
    pub fn lookup(&self, unit: &UnitTypes, number: TypeNumber) -> Option<TypeRef>
    {
        if number.file == 0 {
            return unit.local.get(number.index);
        }
        let id = unit.include_for(number.file)?;
        self.includes.get(id)?.table.get(number.index)
    }

    /// Bind `number` in the given unit to `type_ref`.
    ///
    /// ## Errors
    ///
    /// Returns `InvalidArgument` when the file number names no include file of this unit.
    pub fn bind(&mut self, unit: &mut UnitTypes, number: TypeNumber, type_ref: TypeRef) -> Result<()>
    {
        if number.file == 0 {
            unit.local.bind(number.index, type_ref);
            return Ok(());
        }
        let table = unit
            .include_for(number.file)
            .and_then(|id| self.includes.table_mut(id))
            .ok_or_else(|| {
                SymscopeError::InvalidArgument(format!("type number {number} names an unknown include file"))
            })?;
        table.bind(number.index, type_ref);
        Ok(())
    }

    /// Whether `number` can be bound in this unit: local, or naming an include file it has.
    pub fn addressable(&self, unit: &UnitTypes, number: TypeNumber) -> bool
    {
        number.file == 0
            || unit
                .include_for(number.file)
                .is_some_and(|id| self.includes.get(id).is_some())
    }

    /// Slot for `number`, creating a null placeholder if it is not bound yet.
    ///
    /// ## Errors
    ///
    /// Returns `InvalidArgument` when the file number names no include file of this unit.
    pub fn slot_or_placeholder(&mut self, unit: &mut UnitTypes, number: TypeNumber) -> Result<TypeRef>
    {
        if let Some(existing) = self.lookup(unit, number) {
            return Ok(existing);
        }
        if number.file != 0 && unit.include_for(number.file).is_none() {
            return Err(SymscopeError::InvalidArgument(format!(
                "type number {number} names an unknown include file"
            )));
        }
        let placeholder = self.arena.new_node(TypeNode::Null);
        self.bind(unit, number, placeholder)?;
        Ok(placeholder)
    }

    /// Find or register an include file and give it the unit's next file number.
    ///
    /// ## Errors
    ///
    /// Returns `IncludeOverflow` when the unit's include bound is exhausted.
    pub fn register_include(&mut self, unit: &mut UnitTypes, name: &str, value: u32) -> Result<(IncludeId, bool)>
    {
        let (id, existed) = self.includes.find_or_register(name, value);
        unit.push_include(id)?;
        Ok((id, existed))
    }
}
