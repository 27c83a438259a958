//! # Type Grammar Parser
//!
//! Parses the type definitions embedded in stab strings and fills the
//! [`TypeStore`].
//!
//! A definition site is a type number followed by `=` and a tag:
//!
//! | tag | meaning | body |
//! |-----|---------|------|
//! | `*` | pointer | `*<type>` |
//! | `s` / `u` | struct / union | `s<size>name:<type>,<bitoff>,<bits>;...;` |
//! | `a` | array | `ar<index>;<min>;<max>;<element>` |
//! | `r` | basic (range) | `r<type>;<lo>;<hi>;` |
//! | `e` | enum | `ename:<value>,...;` |
//! | `f` | function | `f<return type>` |
//! | `x` | cross-reference | `xs<name>:`, `xu<name>:`, `xe<name>:` |
//! | digit, `(` | alias | `<type>` |
//!
//! Parsing runs in two passes over the same text. Pass 1 walks the sites
//! left to right and allocates an empty node of the right variant for each.
//! Pass 2 visits the same sites in exactly the reverse order, parses each
//! body into its node, and removes the consumed `=...` span from an owned
//! scratch copy of the text. Nested definitions always sit to the right of
//! their enclosing site, so by the time a struct body is parsed every member
//! type has been reduced to a plain type number, and removing a span never
//! moves a site that is still to be visited.

use std::collections::HashMap;

use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, warn};

use super::typetable::{
    Enumerator, Member, TypeCategory, TypeNode, TypeNumber, TypeRef, TypeStore, TypedefCacheEntry, UnitTypes,
};
use crate::symbols::{Diagnostic, DiagnosticKind};

/// Named struct, union and enum nodes of one module, for cross-references.
#[derive(Debug, Default)]
pub struct NamedTypes
{
    nodes: HashMap<(NamedKind, String), TypeRef>,
}

impl NamedTypes
{
    pub fn clear(&mut self)
    {
        self.nodes.clear();
    }

    pub fn len(&self) -> usize
    {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NamedKind
{
    Struct,
    Union,
    Enum,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct SyntaxError(String);

type ParseResult<T> = std::result::Result<T, SyntaxError>;

#[derive(Debug, Clone)]
struct Site
{
    /// Position of the `=`.
    eq: usize,
    number: TypeNumber,
    category: TypeCategory,
    /// Node allocated in pass 1; `None` for aliases and failed allocations.
    node: Option<TypeRef>,
    /// Pass 1 already reported this site; pass 2 only strips it.
    reported: bool,
}

/// Parser bound to one session's types, one compilation unit and one module.
pub struct TypeParser<'a>
{
    store: &'a mut TypeStore,
    unit: &'a mut UnitTypes,
    named: &'a mut NamedTypes,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> TypeParser<'a>
{
    pub fn new(
        store: &'a mut TypeStore,
        unit: &'a mut UnitTypes,
        named: &'a mut NamedTypes,
        diagnostics: &'a mut Vec<Diagnostic>,
    ) -> Self
    {
        Self {
            store,
            unit,
            named,
            diagnostics,
        }
    }

    /// Parse every type definition in `text` and return how many sites it held.
    ///
    /// `base_name` is the text before the first `:`; `descriptor` is the
    /// letter after it. Typedef-like descriptors (`t`, `T`) with more than one
    /// site go through the typedef cache.
    pub fn define(&mut self, text: &str, base_name: &str, descriptor: Option<u8>) -> usize
    {
        let mut sites = find_sites(text.as_bytes());
        if sites.is_empty() {
            return 0;
        }

        let cacheable = matches!(descriptor, Some(b't' | b'T')) && sites.len() > 1;
        let mut cache_miss = false;
        if cacheable {
            match self.store.typedefs.lookup(base_name).cloned() {
                Some(entry) if categories_match(&entry, &sites) => {
                    debug!(typedef = base_name, sites = sites.len(), "typedef cache hit");
                    if self.splice(&entry, &sites) {
                        return sites.len();
                    }
                }
                Some(_) => debug!(typedef = base_name, "typedef cache entry does not match, parsing"),
                None => cache_miss = true,
            }
        }

        for (position, site) in sites.iter_mut().enumerate() {
            self.allocate(text, site, position, base_name, descriptor);
        }

        let mut scratch = text.as_bytes().to_vec();
        for site in sites.iter().rev() {
            let end = if site.reported || (site.node.is_none() && site.category != TypeCategory::Alias) {
                skip_to_terminator(&scratch, site.eq + 1)
            } else {
                match self.parse_body(&scratch, site, base_name) {
                    Ok(end) => end,
                    Err(err) => {
                        self.report(format!(
                            "malformed {:?} definition {} in '{base_name}': {err}",
                            site.category, site.number
                        ));
                        if let Some(node) = site.node {
                            let _ = self.store.arena.replace(node, TypeNode::Null);
                        }
                        skip_to_terminator(&scratch, site.eq + 1)
                    }
                }
            };
            scratch.drain(site.eq..end.min(scratch.len()));
        }

        if cache_miss {
            self.remember(base_name, &sites);
        }
        sites.len()
    }

    /// Type referenced by a symbol string (`name:<letters><typenum>...`).
    ///
    /// The number is read from the text as written, so this works whether or
    /// not the string also defined the type.
    pub fn symbol_type(&mut self, text: &str) -> Option<TypeRef>
    {
        let after_colon = text.find(':')? + 1;
        let bytes = text.as_bytes();
        let mut cursor = Cursor::new(bytes.get(after_colon..)?);
        while cursor.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            cursor.bump();
        }
        if !cursor.peek().is_some_and(|b| b.is_ascii_digit() || b == b'(' || b == b'-') {
            return None;
        }
        let number = cursor.read_type_number().ok()?;
        self.store.slot_or_placeholder(self.unit, number).ok()
    }

    fn report(&mut self, message: String)
    {
        warn!("{message}");
        self.diagnostics.push(Diagnostic::new(DiagnosticKind::Grammar, message));
    }

    /// Pass 1 for one site.
    fn allocate(&mut self, text: &str, site: &mut Site, position: usize, base_name: &str, descriptor: Option<u8>)
    {
        let bytes = text.as_bytes();
        let template = match site.category {
            TypeCategory::Alias => return,
            TypeCategory::Unknown => {
                let tag = bytes.get(site.eq + 1).map_or('?', |&b| b as char);
                self.report(format!("unknown type tag '{tag}' in definition {} of '{base_name}'", site.number));
                site.reported = true;
                site.node = self.store.slot_or_placeholder(self.unit, site.number).ok();
                return;
            }
            TypeCategory::Pointer => TypeNode::Pointer { target: None },
            TypeCategory::Function => TypeNode::Function { return_type: None },
            TypeCategory::Array => TypeNode::Array {
                index: None,
                element: None,
                min: 0,
                max: 0,
            },
            TypeCategory::Basic => TypeNode::Basic {
                name: base_name.to_string(),
            },
            TypeCategory::Aggregate | TypeCategory::Enum => {
                let (kind, name) = aggregate_identity(bytes, site.eq, position, base_name, descriptor);
                match kind {
                    NamedKind::Enum => TypeNode::Enum { name, members: Vec::new() },
                    NamedKind::Struct | NamedKind::Union => TypeNode::StructOrUnion {
                        name,
                        is_union: kind == NamedKind::Union,
                        size: None,
                        members: Vec::new(),
                    },
                }
            }
        };

        // A cross-reference binds to whatever carries its name. A real
        // definition may only fill a node that is still an empty forward
        // reference; a complete one with the same tag belongs to another
        // definition.
        let cross_reference = bytes.get(site.eq + 1) == Some(&b'x');
        let key = named_key(&template);
        let registered = key
            .as_ref()
            .and_then(|key| self.named.nodes.get(key).copied())
            .filter(|&node| cross_reference || !self.is_complete(node));
        let existing = self.store.lookup(self.unit, site.number);

        let node = match existing {
            Some(current) if self.store.arena.get(current).is_some_and(TypeNode::is_null) => match registered {
                Some(shared) => {
                    let _ = self.store.arena.forward(current, shared);
                    shared
                }
                None => current,
            },
            Some(current) if self.store.arena.get(current).and_then(TypeNode::category) == Some(site.category) => {
                current
            }
            _ => registered.unwrap_or_else(|| self.store.arena.new_node(TypeNode::Null)),
        };
        if self.store.arena.get(node).is_some_and(TypeNode::is_null) {
            let _ = self.store.arena.replace(node, template);
        }

        if let Some(key) = key {
            if cross_reference {
                self.named.nodes.entry(key).or_insert(node);
            } else {
                self.named.nodes.insert(key, node);
            }
        }

        match self.store.bind(self.unit, site.number, node) {
            Ok(()) => site.node = Some(node),
            Err(err) => {
                self.report(format!("cannot define {} in '{base_name}': {err}", site.number));
                site.reported = true;
            }
        }
    }

    /// Whether a named aggregate already has its body.
    fn is_complete(&self, node: TypeRef) -> bool
    {
        match self.store.arena.get(node) {
            Some(TypeNode::StructOrUnion { size, .. }) => size.is_some(),
            Some(TypeNode::Enum { members, .. }) => !members.is_empty(),
            _ => false,
        }
    }

    /// Pass 2 for one site. Returns the end of the consumed span in `scratch`.
    fn parse_body(&mut self, scratch: &[u8], site: &Site, base_name: &str) -> ParseResult<usize>
    {
        let body_start = site.eq + 1;
        let mut cursor = Cursor::new(&scratch[body_start..]);

        if site.category == TypeCategory::Alias {
            let target = cursor.read_type_number()?;
            self.bind_alias(site.number, target, base_name)?;
            return Ok(body_start + cursor.position);
        }

        let node = site.node.ok_or_else(|| SyntaxError("no node allocated".into()))?;
        let tag = cursor.next_byte()?;
        match tag {
            b'*' => {
                let target = self.read_ref(&mut cursor)?;
                self.store.arena.set_pointer_target(node, target).map_err(contract)?;
            }
            b'f' => {
                let return_type = self.read_ref(&mut cursor)?;
                self.store.arena.set_return_type(node, return_type).map_err(contract)?;
            }
            b's' | b'u' => self.parse_struct(&mut cursor, node)?,
            b'a' => {
                cursor.expect(b'r')?;
                let index = self.read_ref(&mut cursor)?;
                cursor.expect(b';')?;
                let min = cursor.read_int()?;
                cursor.expect(b';')?;
                let max = cursor.read_int()?;
                cursor.expect(b';')?;
                let element = self.read_ref(&mut cursor)?;
                self.store
                    .arena
                    .set_array_params(node, index, element, min, max)
                    .map_err(contract)?;
            }
            b'r' => {
                cursor.read_type_number()?;
                cursor.expect(b';')?;
                cursor.read_int()?;
                cursor.expect(b';')?;
                cursor.read_int()?;
                cursor.expect(b';')?;
            }
            b'e' => self.parse_enum(&mut cursor, node)?,
            b'x' => {
                cursor.next_byte()?;
                cursor.read_name()?;
            }
            other => return Err(SyntaxError(format!("unexpected tag '{}'", other as char))),
        }
        Ok(body_start + cursor.position)
    }

    fn parse_struct(&mut self, cursor: &mut Cursor<'_>, node: TypeRef) -> ParseResult<()>
    {
        let size = cursor.read_unsigned()?;
        let already_sized = matches!(self.store.arena.get(node), Some(TypeNode::StructOrUnion { size: Some(_), .. }));
        if already_sized {
            return cursor.skip_member_list();
        }

        self.store.arena.set_struct_size(node, size).map_err(contract)?;
        loop {
            if cursor.eat(b';') {
                return Ok(());
            }
            let name = cursor.read_name()?;
            let type_ref = self.read_ref(cursor)?;
            cursor.expect(b',')?;
            let bit_offset = cursor.read_unsigned()?;
            cursor.expect(b',')?;
            let bit_size = cursor.read_unsigned()?;
            cursor.expect(b';')?;
            self.store
                .arena
                .add_struct_member(
                    node,
                    Member {
                        name,
                        type_ref: Some(type_ref),
                        bit_offset,
                        bit_size,
                    },
                )
                .map_err(contract)?;
        }
    }

    fn parse_enum(&mut self, cursor: &mut Cursor<'_>, node: TypeRef) -> ParseResult<()>
    {
        let fill = matches!(self.store.arena.get(node), Some(TypeNode::Enum { members, .. }) if members.is_empty());
        loop {
            if cursor.eat(b';') {
                return Ok(());
            }
            let name = cursor.read_name()?;
            let value = cursor.read_int()?;
            cursor.expect(b',')?;
            if fill {
                self.store
                    .arena
                    .add_enumerator(node, Enumerator { name, value })
                    .map_err(contract)?;
            }
        }
    }

    fn bind_alias(&mut self, number: TypeNumber, target: TypeNumber, base_name: &str) -> ParseResult<()>
    {
        let defined = self.store.lookup(self.unit, number);
        let referenced = self.store.lookup(self.unit, target);

        let node = match (defined, referenced) {
            (Some(defined), Some(referenced)) => {
                if number == target && self.store.arena.get(defined).is_some_and(TypeNode::is_null) {
                    let basic = TypeNode::Basic {
                        name: base_name.to_string(),
                    };
                    self.store.arena.replace(defined, basic).map_err(contract)?;
                } else if self.store.arena.get(defined).is_some_and(TypeNode::is_null) {
                    self.store.arena.forward(defined, referenced).map_err(contract)?;
                }
                referenced
            }
            (None, Some(referenced)) => referenced,
            (Some(defined), None) => defined,
            (None, None) => self.store.arena.new_node(TypeNode::Basic {
                name: base_name.to_string(),
            }),
        };

        self.store.bind(self.unit, number, node).map_err(contract)?;
        self.store.bind(self.unit, target, node).map_err(contract)?;
        Ok(())
    }

    fn read_ref(&mut self, cursor: &mut Cursor<'_>) -> ParseResult<TypeRef>
    {
        let number = cursor.read_type_number()?;
        self.store.slot_or_placeholder(self.unit, number).map_err(contract)
    }

    /// Bind every site's number straight to the cached nodes.
    ///
    /// Nothing is bound unless every site can be, so a refused splice leaves
    /// the unit and the cached nodes as they were.
    fn splice(&mut self, entry: &TypedefCacheEntry, sites: &[Site]) -> bool
    {
        if !sites.iter().all(|site| self.store.addressable(self.unit, site.number)) {
            debug!("typedef cache entry names an include file this unit lacks, parsing");
            return false;
        }
        for (site, &(_, cached)) in sites.iter().zip(entry.sites.iter()) {
            if let Some(current) = self.store.lookup(self.unit, site.number) {
                if self.store.arena.get(current).is_some_and(TypeNode::is_null) {
                    let _ = self.store.arena.forward(current, cached);
                }
            }
            if self.store.bind(self.unit, site.number, cached).is_err() {
                return false;
            }
        }
        true
    }

    fn remember(&mut self, base_name: &str, sites: &[Site])
    {
        let mut cached = SmallVec::new();
        for site in sites {
            let Some(type_ref) = self.store.lookup(self.unit, site.number) else {
                return;
            };
            if site.reported {
                return;
            }
            cached.push((site.category, self.store.arena.resolve(type_ref)));
        }
        if self.store.typedefs.register(base_name, TypedefCacheEntry { sites: cached }) {
            debug!(typedef = base_name, sites = sites.len(), "typedef cached");
        }
    }
}

fn contract(err: crate::error::SymscopeError) -> SyntaxError
{
    SyntaxError(err.to_string())
}

fn named_key(template: &TypeNode) -> Option<(NamedKind, String)>
{
    match template {
        TypeNode::StructOrUnion {
            name: Some(name),
            is_union,
            ..
        } => Some((if *is_union { NamedKind::Union } else { NamedKind::Struct }, name.clone())),
        TypeNode::Enum { name: Some(name), .. } => Some((NamedKind::Enum, name.clone())),
        _ => None,
    }
}

/// Kind and name of the aggregate defined at `eq`.
///
/// Cross-references carry their name inline; otherwise only the first site of
/// a `T` (struct tag) symbol is named, after the symbol.
fn aggregate_identity(
    bytes: &[u8],
    eq: usize,
    position: usize,
    base_name: &str,
    descriptor: Option<u8>,
) -> (NamedKind, Option<String>)
{
    let tag = bytes.get(eq + 1).copied();
    if tag == Some(b'x') {
        let kind = match bytes.get(eq + 2) {
            Some(b'u') => NamedKind::Union,
            Some(b'e') => NamedKind::Enum,
            _ => NamedKind::Struct,
        };
        let rest = bytes.get(eq + 3..).unwrap_or_default();
        let end = rest.iter().position(|&b| b == b':').unwrap_or(rest.len());
        let name = String::from_utf8_lossy(&rest[..end]).into_owned();
        return (kind, (!name.is_empty()).then_some(name));
    }

    let kind = match tag {
        Some(b'u') => NamedKind::Union,
        Some(b'e') => NamedKind::Enum,
        _ => NamedKind::Struct,
    };
    let name = (position == 0 && descriptor == Some(b'T') && !base_name.is_empty()).then(|| base_name.to_string());
    (kind, name)
}

fn categories_match(entry: &TypedefCacheEntry, sites: &[Site]) -> bool
{
    entry.sites.len() == sites.len()
        && entry
            .sites
            .iter()
            .zip(sites)
            .all(|((cached, _), site)| cached.compatible_with(site.category))
}

/// Every definition site in `text`, left to right.
fn find_sites(text: &[u8]) -> Vec<Site>
{
    let mut sites = Vec::new();
    for (eq, &byte) in text.iter().enumerate() {
        if byte != b'=' || eq == 0 {
            continue;
        }
        let Some(number) = type_number_before(text, eq) else {
            continue;
        };
        sites.push(Site {
            eq,
            number,
            category: classify(text.get(eq + 1..).unwrap_or_default()),
            node: None,
            reported: false,
        });
    }
    sites
}

/// Read the type number that ends right before `end`.
fn type_number_before(text: &[u8], end: usize) -> Option<TypeNumber>
{
    let last = *text.get(end.checked_sub(1)?)?;
    if last == b')' {
        let open = text[..end].iter().rposition(|&b| b == b'(')?;
        let mut cursor = Cursor::new(&text[open..end]);
        return cursor.read_type_number().ok();
    }
    if !last.is_ascii_digit() {
        return None;
    }
    let start = text[..end].iter().rposition(|b| !b.is_ascii_digit()).map_or(0, |p| p + 1);
    let digits = std::str::from_utf8(&text[start..end]).ok()?;
    digits.parse().ok().map(TypeNumber::local)
}

fn classify(body: &[u8]) -> TypeCategory
{
    match body.first() {
        Some(b'*') => TypeCategory::Pointer,
        Some(b's' | b'u') => TypeCategory::Aggregate,
        Some(b'e') => TypeCategory::Enum,
        Some(b'a') => TypeCategory::Array,
        Some(b'r') => TypeCategory::Basic,
        Some(b'f') => TypeCategory::Function,
        Some(b'x') => match body.get(1) {
            Some(b's' | b'u') => TypeCategory::Aggregate,
            Some(b'e') => TypeCategory::Enum,
            _ => TypeCategory::Unknown,
        },
        Some(b) if b.is_ascii_digit() || *b == b'(' => TypeCategory::Alias,
        _ => TypeCategory::Unknown,
    }
}

/// End of an unparseable body: the next `,` or `;`, or the end of the text.
fn skip_to_terminator(scratch: &[u8], from: usize) -> usize
{
    scratch
        .get(from..)
        .and_then(|rest| rest.iter().position(|&b| b == b',' || b == b';'))
        .map_or(scratch.len(), |offset| from + offset)
}

/// Forward-only reader over a definition body.
struct Cursor<'t>
{
    text: &'t [u8],
    position: usize,
}

impl<'t> Cursor<'t>
{
    fn new(text: &'t [u8]) -> Self
    {
        Self { text, position: 0 }
    }

    fn peek(&self) -> Option<u8>
    {
        self.text.get(self.position).copied()
    }

    fn bump(&mut self)
    {
        self.position += 1;
    }

    fn next_byte(&mut self) -> ParseResult<u8>
    {
        let byte = self.peek().ok_or_else(|| SyntaxError("unexpected end of definition".into()))?;
        self.bump();
        Ok(byte)
    }

    fn eat(&mut self, expected: u8) -> bool
    {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: u8) -> ParseResult<()>
    {
        match self.peek() {
            Some(found) if found == expected => {
                self.bump();
                Ok(())
            }
            Some(found) => Err(SyntaxError(format!(
                "expected '{}' at {}, found '{}'",
                expected as char, self.position, found as char
            ))),
            None => Err(SyntaxError(format!("expected '{}' at end of definition", expected as char))),
        }
    }

    /// Text up to the next `:`, which is consumed.
    fn read_name(&mut self) -> ParseResult<String>
    {
        let rest = &self.text[self.position..];
        let end = rest
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| SyntaxError("missing ':' after name".into()))?;
        let name = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.position += end + 1;
        Ok(name)
    }

    /// `n` or `(file,index)`.
    fn read_type_number(&mut self) -> ParseResult<TypeNumber>
    {
        if self.eat(b'(') {
            let file = self.read_u32()?;
            self.expect(b',')?;
            let index = self.read_u32()?;
            self.expect(b')')?;
            return Ok(TypeNumber::new(file, index));
        }
        // gcc writes -1..-30 for builtin types in some configurations; they have no slot.
        if self.peek() == Some(b'-') {
            return Err(SyntaxError("negative builtin type numbers are not supported".into()));
        }
        Ok(TypeNumber::local(self.read_u32()?))
    }

    fn read_u32(&mut self) -> ParseResult<u32>
    {
        let value = self.read_unsigned()?;
        u32::try_from(value).map_err(|_| SyntaxError(format!("type number {value} out of range")))
    }

    fn read_unsigned(&mut self) -> ParseResult<u64>
    {
        let value = self.read_int()?;
        u64::try_from(value).map_err(|_| SyntaxError(format!("expected unsigned number, found {value}")))
    }

    /// Decimal, or octal when written with a leading `0`; values wrap to 64 bits.
    #[allow(clippy::cast_possible_truncation)]
    fn read_int(&mut self) -> ParseResult<i64>
    {
        let negative = self.eat(b'-');
        let start = self.position;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.text[start..self.position];
        if digits.is_empty() {
            return Err(SyntaxError(format!("expected number at {start}")));
        }

        let radix: u64 = if digits.len() > 1 && digits[0] == b'0' { 8 } else { 10 };
        let mut value: u64 = 0;
        for &digit in digits {
            let digit = u64::from(digit - b'0');
            if digit >= radix {
                return Err(SyntaxError(format!("digit {digit} in octal number at {start}")));
            }
            value = value.wrapping_mul(radix).wrapping_add(digit);
        }
        let value = value as i64;
        Ok(if negative { value.wrapping_neg() } else { value })
    }

    /// Skip a struct member list that was already parsed elsewhere.
    fn skip_member_list(&mut self) -> ParseResult<()>
    {
        if self.eat(b';') {
            return Ok(());
        }
        let rest = &self.text[self.position..];
        let end = rest
            .windows(2)
            .position(|pair| pair == b";;")
            .ok_or_else(|| SyntaxError("unterminated member list".into()))?;
        self.position += end + 2;
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn parse(defs: &[(&str, &str, Option<u8>)]) -> (TypeStore, UnitTypes, Vec<Diagnostic>)
    {
        let mut store = TypeStore::new();
        let mut unit = UnitTypes::new(16);
        let mut named = NamedTypes::default();
        let mut diagnostics = Vec::new();
        for (text, base, descriptor) in defs {
            TypeParser::new(&mut store, &mut unit, &mut named, &mut diagnostics).define(text, base, *descriptor);
        }
        (store, unit, diagnostics)
    }

    fn node(store: &TypeStore, unit: &UnitTypes, index: u32) -> TypeNode
    {
        let type_ref = store.lookup(unit, TypeNumber::local(index)).unwrap();
        store.node(type_ref).unwrap().clone()
    }

    #[test]
    fn test_find_sites_reads_both_number_forms()
    {
        let sites = find_sites(b"p:t(1,2)=*3=r3;0;127;");
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].number, TypeNumber::new(1, 2));
        assert_eq!(sites[0].category, TypeCategory::Pointer);
        assert_eq!(sites[1].number, TypeNumber::local(3));
        assert_eq!(sites[1].category, TypeCategory::Basic);
    }

    #[test]
    fn test_range_becomes_named_basic()
    {
        let (store, unit, diagnostics) = parse(&[("int:t1=r1;-2147483648;2147483647;", "int", Some(b't'))]);
        assert!(diagnostics.is_empty());
        assert_eq!(node(&store, &unit, 1), TypeNode::Basic { name: "int".into() });
    }

    #[test]
    fn test_self_alias_synthesizes_basic()
    {
        let (store, unit, _) = parse(&[("void:t2=2", "void", Some(b't'))]);
        assert_eq!(node(&store, &unit, 2), TypeNode::Basic { name: "void".into() });
    }

    #[test]
    fn test_alias_shares_node()
    {
        let (store, unit, _) = parse(&[
            ("int:t1=r1;0;100;", "int", Some(b't')),
            ("myint:t7=1", "myint", Some(b't')),
        ]);
        let one = store.lookup(&unit, TypeNumber::local(1)).unwrap();
        let seven = store.lookup(&unit, TypeNumber::local(7)).unwrap();
        assert!(store.arena.same(one, seven));
    }

    #[test]
    fn test_octal_array_bounds()
    {
        let (store, unit, diagnostics) = parse(&[
            ("int:t1=r1;0;0377;", "int", Some(b't')),
            ("buf:G2=ar1;0;017;1", "buf", Some(b'G')),
        ]);
        assert!(diagnostics.is_empty());
        match node(&store, &unit, 2) {
            TypeNode::Array { min, max, element, .. } => {
                assert_eq!((min, max), (0, 15));
                assert_eq!(element, store.lookup(&unit, TypeNumber::local(1)));
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn test_enum_members()
    {
        let (store, unit, _) = parse(&[("color:T3=ered:0,green:1,blue:-1,;", "color", Some(b'T'))]);
        match node(&store, &unit, 3) {
            TypeNode::Enum { name, members } => {
                assert_eq!(name.as_deref(), Some("color"));
                let values: Vec<_> = members.iter().map(|m| (m.name.as_str(), m.value)).collect();
                assert_eq!(values, vec![("red", 0), ("green", 1), ("blue", -1)]);
            }
            other => panic!("expected enum, got {other:?}"),
        }
    }

    #[test]
    fn test_forward_reference_is_filled_in_place()
    {
        let (store, unit, _) = parse(&[
            ("p:G4=*5", "p", Some(b'G')),
            ("s:T5=s4a:6,0,32;;", "s", Some(b'T')),
        ]);
        let pointer = node(&store, &unit, 4);
        let TypeNode::Pointer { target: Some(target) } = pointer else {
            panic!("expected pointer, got {pointer:?}");
        };
        assert!(matches!(store.node(target), Some(TypeNode::StructOrUnion { size: Some(4), .. })));
    }

    #[test]
    fn test_cross_reference_resolves_to_later_definition()
    {
        let (store, unit, _) = parse(&[
            ("p:G8=*9=xsitem:", "p", Some(b'G')),
            ("item:T10=s8v:1,0,64;;", "item", Some(b'T')),
        ]);
        let nine = store.lookup(&unit, TypeNumber::local(9)).unwrap();
        let ten = store.lookup(&unit, TypeNumber::local(10)).unwrap();
        assert!(store.arena.same(nine, ten));
        assert!(matches!(store.node(nine), Some(TypeNode::StructOrUnion { size: Some(8), .. })));
    }

    #[test]
    fn test_refused_splice_leaves_cached_nodes_alone()
    {
        let mut store = TypeStore::new();
        let mut unit = UnitTypes::new(16);
        let mut named = NamedTypes::default();
        let mut diagnostics = Vec::new();

        for (text, base) in [("int:t1=r1;0;100;", "int"), ("pp:t2=*3=*1", "pp")] {
            TypeParser::new(&mut store, &mut unit, &mut named, &mut diagnostics).define(text, base, Some(b't'));
        }
        let cached = store.typedefs.lookup("pp").unwrap().clone();

        unit.reset();
        for (text, base) in [("int:t1=r1;0;100;", "int"), ("pp:t4=*(5,1)=*1", "pp")] {
            TypeParser::new(&mut store, &mut unit, &mut named, &mut diagnostics).define(text, base, Some(b't'));
        }

        let four = store.lookup(&unit, TypeNumber::local(4)).unwrap();
        assert!(!store.arena.same(four, cached.sites[0].1));
        let Some(TypeNode::Pointer { target: Some(target) }) = store.node(cached.sites[0].1) else {
            panic!("cached pointer was modified");
        };
        assert!(store.arena.same(*target, cached.sites[1].1));
    }

    #[test]
    fn test_unknown_tag_reports_once_and_keeps_siblings()
    {
        let (store, unit, diagnostics) = parse(&[("pair:T1=s8a:2=Q9,0,32;b:3=*1,32,32;;", "pair", Some(b'T'))]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Grammar);
        assert!(node(&store, &unit, 2).is_null());
        assert!(matches!(node(&store, &unit, 3), TypeNode::Pointer { target: Some(_) }));
        match node(&store, &unit, 1) {
            TypeNode::StructOrUnion { members, .. } => assert_eq!(members.len(), 2),
            other => panic!("expected struct, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_leaves_node_null()
    {
        let (store, unit, diagnostics) = parse(&[("bad:T4=s8x:1,0", "bad", Some(b'T'))]);
        assert_eq!(diagnostics.len(), 1);
        assert!(node(&store, &unit, 4).is_null());
    }

    #[test]
    fn test_symbol_type_reads_number_after_descriptor()
    {
        let mut store = TypeStore::new();
        let mut unit = UnitTypes::new(4);
        let mut named = NamedTypes::default();
        let mut diagnostics = Vec::new();
        let mut parser = TypeParser::new(&mut store, &mut unit, &mut named, &mut diagnostics);
        parser.define("int:t1=r1;0;1;", "int", Some(b't'));
        let from_global = parser.symbol_type("x:G1").unwrap();
        let from_local = parser.symbol_type("y:1").unwrap();
        assert_eq!(from_global, from_local);
        assert_eq!(parser.symbol_type("main:F"), None);
    }
}
