//! Structural types.
//!
//! Types describe the environment a program is compiled against and are
//! attached to every AST node by the checker. They are independent of the
//! host language's own types: a host describes its records, maps and
//! functions with these constructors.

use std::fmt;

/// A structural type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Type {
    /// Not yet inferred, or inference failed
    Unknown,
    /// Assignable to and from every type
    #[default]
    Any,
    Nil,
    Bool,
    Int,
    Float,
    String,
    Time,
    Duration,
    Array(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Record(RecordType),
    Func(FunctionType),
    Union(Vec<Type>),
    /// A host-named alias of another type, e.g. `Status` over `String`.
    Named { name: String, base: Box<Type> },
    /// An opaque host value that yields a scalar through the valuer adapter.
    Opaque { name: String, scalar: Box<Type> },
}

/// A host structured value: ordered, uniquely named fields plus methods.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<FieldType>,
    pub methods: Vec<(String, FunctionType)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    /// Native field name
    pub name: String,
    pub ty: Type,
    /// Name the field is visible as, when renamed by the host
    pub expose: Option<String>,
    /// Unexported fields exist on the host type but cannot be read
    pub exported: bool,
}

/// Signature of a callable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub result: Box<Type>,
    /// The last parameter is the element type of a variadic tail.
    pub variadic: bool,
    /// The first parameter receives the environment's context value.
    pub context: bool,
}

impl Type {
    pub fn array(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn named(name: impl Into<String>, base: Type) -> Type {
        Type::Named {
            name: name.into(),
            base: Box::new(base),
        }
    }

    pub fn opaque(name: impl Into<String>, scalar: Type) -> Type {
        Type::Opaque {
            name: name.into(),
            scalar: Box::new(scalar),
        }
    }

    /// Build a normalized union: nested unions are flattened, duplicates
    /// dropped, `Any` absorbs everything and a single member stands alone.
    pub fn union(types: impl IntoIterator<Item = Type>) -> Type {
        let mut members: Vec<Type> = Vec::new();
        for ty in types {
            let parts = match ty {
                Type::Union(inner) => inner,
                other => vec![other],
            };
            for part in parts {
                if matches!(part, Type::Any | Type::Unknown) {
                    return Type::Any;
                }
                if !members.contains(&part) {
                    members.push(part);
                }
            }
        }
        match members.len() {
            0 => Type::Unknown,
            1 => members.remove(0),
            _ => Type::Union(members),
        }
    }

    /// `Nil` removed from a union; other types are returned unchanged.
    pub fn without_nil(&self) -> Type {
        match self {
            Type::Union(members) => {
                Type::union(members.iter().filter(|t| **t != Type::Nil).cloned())
            }
            other => other.clone(),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any | Type::Unknown)
    }

    /// Strip aliases down to the underlying type.
    pub fn base(&self) -> &Type {
        match self {
            Type::Named { base, .. } => base.base(),
            other => other,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.base(), Type::Int)
    }

    pub fn is_float(&self) -> bool {
        matches!(self.base(), Type::Float)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.base(), Type::Int | Type::Float)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.base(), Type::String)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.base(), Type::Bool)
    }

    /// True when `self` may be used where `target` is expected.
    pub fn is_assignable_to(&self, target: &Type) -> bool {
        if self.is_any() || target.is_any() || self == target {
            return true;
        }
        match (self, target) {
            (Type::Union(members), _) => members.iter().all(|m| m.is_assignable_to(target)),
            (_, Type::Union(members)) => members.iter().any(|m| self.is_assignable_to(m)),
            (Type::Int, Type::Float) => true,
            (Type::Nil, Type::Array(_) | Type::Map(..) | Type::Record(_) | Type::Func(_)) => true,
            (Type::Array(a), Type::Array(b)) => a.is_assignable_to(b),
            (Type::Map(ak, av), Type::Map(bk, bv)) => {
                ak.is_assignable_to(bk) && av.is_assignable_to(bv)
            }
            (Type::Record(a), Type::Record(b)) => a.name == b.name,
            (Type::Func(a), Type::Func(b)) => {
                a.params.len() == b.params.len() && a.result.is_assignable_to(&b.result)
            }
            _ => false,
        }
    }

    /// Element type when iterated by a comprehension.
    pub fn elem(&self) -> Option<Type> {
        match self.base() {
            Type::Array(elem) => Some((**elem).clone()),
            Type::Any | Type::Unknown => Some(Type::Any),
            Type::Union(members) if members.contains(&Type::Nil) => {
                self.without_nil().elem()
            }
            _ => None,
        }
    }
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.fields.push(FieldType::new(name, ty));
        self
    }

    pub fn with_field(mut self, field: FieldType) -> Self {
        self.fields.push(field);
        self
    }

    pub fn method(mut self, name: impl Into<String>, signature: FunctionType) -> Self {
        self.methods.push((name.into(), signature));
        self
    }

    /// Find a field by the name expressions see it under.
    pub fn lookup(&self, visible: &str) -> Option<&FieldType> {
        self.fields.iter().find(|f| f.visible_name() == visible)
    }

    pub fn lookup_method(&self, name: &str) -> Option<&FunctionType> {
        self.methods
            .iter()
            .find(|(method, _)| method == name)
            .map(|(_, signature)| signature)
    }
}

impl FieldType {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            expose: None,
            exported: true,
        }
    }

    pub fn expose(mut self, visible: impl Into<String>) -> Self {
        self.expose = Some(visible.into());
        self
    }

    pub fn unexported(mut self) -> Self {
        self.exported = false;
        self
    }

    pub fn visible_name(&self) -> &str {
        self.expose.as_deref().unwrap_or(&self.name)
    }
}

impl FunctionType {
    pub fn new(params: Vec<Type>, result: Type) -> Self {
        Self {
            params,
            result: Box::new(result),
            variadic: false,
            context: false,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn with_context(mut self) -> Self {
        self.context = true;
        self
    }

    /// Declared type of the argument at `index`, following a variadic tail.
    pub fn param(&self, index: usize) -> Option<&Type> {
        match self.params.get(index) {
            Some(ty) => Some(ty),
            None if self.variadic => self.params.last(),
            None => None,
        }
    }

    /// Minimum number of arguments.
    pub fn min_args(&self) -> usize {
        if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => write!(f, "unknown"),
            Type::Any => write!(f, "any"),
            Type::Nil => write!(f, "nil"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Time => write!(f, "time"),
            Type::Duration => write!(f, "duration"),
            Type::Array(elem) => write!(f, "[]{}", elem),
            Type::Map(key, value) => write!(f, "map[{}]{}", key, value),
            Type::Record(record) => write!(f, "{}", record.name),
            Type::Func(func) => write!(f, "{}", func),
            Type::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", member)?;
                }
                Ok(())
            }
            Type::Named { name, .. } => write!(f, "{}", name),
            Type::Opaque { name, .. } => write!(f, "{}", name),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if self.variadic && i + 1 == self.params.len() {
                write!(f, "...")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") {}", self.result)
    }
}
