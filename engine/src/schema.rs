//! Type registry: field kinds, type definitions and schema validation.
//!
//! Types are registered with [`Registry::define_type`] and validated lazily
//! the first time data is touched. Validation checks that the reference
//! fields form a single-rooted forest and freezes the registry; the outcome
//! is cached and exposed through [`Registry::state`].

use crate::{error::Result, Error, Record, TypeName, ID_FIELD};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Prefix reserved for the synthetic keys that nest child collections.
pub const RESERVED_PREFIX: char = '$';

/// Field types supported in schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Boolean,
    Number,
    /// Identifier of a record of the named parent type
    Reference(TypeName),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Number => write!(f, "number"),
            FieldType::Reference(target) => write!(f, "id:{target}"),
        }
    }
}

/// A field type plus its nullability, written `"string"`, `"number?"`,
/// `"id:user"` and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKind {
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldKind {
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: true,
        }
    }
}

impl FromStr for FieldKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (body, nullable) = match s.strip_suffix('?') {
            Some(body) => (body, true),
            None => (s, false),
        };

        let field_type = match body {
            "string" => FieldType::String,
            "boolean" => FieldType::Boolean,
            "number" => FieldType::Number,
            other => match other.strip_prefix("id:") {
                Some(target) if !target.is_empty() => FieldType::Reference(target.to_string()),
                _ => return Err(Error::Configuration(format!("unknown field kind '{s}'"))),
            },
        };

        Ok(Self {
            field_type,
            nullable,
        })
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field_type)?;
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// Definition of a field in a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared kind
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Parent type named by this field, if it is a reference.
    pub fn reference(&self) -> Option<&TypeName> {
        match &self.kind.field_type {
            FieldType::Reference(target) => Some(target),
            _ => None,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.kind.nullable => Ok(()),
            None | Some(Value::Null) => Err(Error::MissingRequiredField(self.name.clone())),
            Some(v) => self.validate_type(v),
        }
    }

    /// Whether a non-null `value` has this field's declared kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self.kind.field_type {
            FieldType::String | FieldType::Reference(_) => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Number => value.is_number(),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.kind.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A registered record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Type name
    pub name: TypeName,
    /// Declared fields, in declaration order
    pub fields: Vec<FieldDef>,
    indexes: BTreeSet<String>,
}

impl TypeDef {
    /// Look up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The field pointing at this type's parent, if any.
    pub fn reference_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.reference().is_some())
    }

    /// Fields this type asked to have indexed, `id` included.
    pub fn indexes(&self) -> impl Iterator<Item = &str> {
        self.indexes.iter().map(String::as_str)
    }

    /// Validate a record against the declared fields.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        for key in record.keys() {
            if key != ID_FIELD && self.field(key).is_none() {
                return Err(Error::UnknownField {
                    type_name: self.name.clone(),
                    field: key.clone(),
                });
            }
        }

        for field in &self.fields {
            field.validate(record.get(&field.name))?;
        }

        Ok(())
    }

    fn check_shape(&self, types: &BTreeMap<TypeName, TypeDef>) -> Result<()> {
        let references: Vec<&FieldDef> =
            self.fields.iter().filter(|f| f.reference().is_some()).collect();

        if references.len() > 1 {
            return Err(Error::Configuration(format!(
                "type '{}' declares more than one reference field",
                self.name
            )));
        }

        if let Some(field) = references.first() {
            if field.kind.nullable {
                return Err(Error::Configuration(format!(
                    "reference field '{}.{}' cannot be nullable",
                    self.name, field.name
                )));
            }
            if let Some(target) = field.reference() {
                if !types.contains_key(target) {
                    return Err(Error::Configuration(format!(
                        "field '{}.{}' references undefined type '{}'",
                        self.name, field.name, target
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Link from a type to its parent type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Reference field on the child type
    pub field: String,
    /// The parent type
    pub type_name: TypeName,
}

/// Shape of a validated type graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    root: TypeName,
    parents: HashMap<TypeName, ParentRef>,
    children: HashMap<TypeName, Vec<TypeName>>,
    paths: HashMap<TypeName, Vec<TypeName>>,
}

impl Topology {
    /// The single type without a reference field.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_root(&self, type_name: &str) -> bool {
        self.root == type_name
    }

    /// Parent link of a non-root type.
    pub fn parent(&self, type_name: &str) -> Option<&ParentRef> {
        self.parents.get(type_name)
    }

    /// Types whose reference field points directly at `type_name`.
    pub fn children(&self, type_name: &str) -> &[TypeName] {
        self.children.get(type_name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Child collections to walk from a root document down to records of
    /// `type_name`. Empty for the root type.
    pub fn path_to_type(&self, type_name: &str) -> &[TypeName] {
        self.paths.get(type_name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Validation state of a [`Registry`].
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryState {
    /// No data has been touched yet; types may still be defined.
    Unvalidated,
    /// Frozen with a valid type graph.
    Valid,
    /// Frozen with the error every data operation re-raises.
    Invalid(Error),
}

/// Registry of record types.
#[derive(Debug, Default)]
pub struct Registry {
    types: BTreeMap<TypeName, TypeDef>,
    validated: OnceLock<Result<Topology>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type.
    ///
    /// Field kinds use the `"string" | "boolean" | "number" | "id:<type>"`
    /// notation with an optional `?` suffix. Problems with the type graph
    /// (reference count, nullable references, cycles, several roots) are
    /// reported when the registry is validated, not here.
    pub fn define_type<I, K, V>(&mut self, name: impl Into<TypeName>, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let name = name.into();

        if self.validated.get().is_some() {
            return Err(Error::RegistryFrozen(name));
        }
        if self.types.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "type '{name}' is already defined"
            )));
        }

        let mut defs: Vec<FieldDef> = Vec::new();
        for (field, kind) in fields {
            let field = field.into();
            if field == ID_FIELD {
                return Err(Error::Configuration(format!(
                    "type '{name}' cannot declare the reserved field '{ID_FIELD}'"
                )));
            }
            if field.starts_with(RESERVED_PREFIX) {
                return Err(Error::Configuration(format!(
                    "field '{name}.{field}' uses the reserved prefix '{RESERVED_PREFIX}'"
                )));
            }
            if defs.iter().any(|d| d.name == field) {
                return Err(Error::Configuration(format!(
                    "field '{name}.{field}' is declared twice"
                )));
            }
            let kind = kind.as_ref().parse()?;
            defs.push(FieldDef::new(field, kind));
        }

        tracing::debug!(type_name = %name, fields = defs.len(), "type defined");

        self.types.insert(
            name.clone(),
            TypeDef {
                name,
                fields: defs,
                indexes: BTreeSet::from([ID_FIELD.to_string()]),
            },
        );
        Ok(())
    }

    /// Add `field` to the index set of `type_name`.
    ///
    /// Indexing a type's own reference field is a no-op. Records written
    /// before the index existed are not backfilled.
    pub fn create_index(&mut self, type_name: &str, field: &str) -> Result<()> {
        let frozen = self.validated.get().is_some();
        let def = self
            .types
            .get_mut(type_name)
            .ok_or_else(|| Error::TypeNotDefined(type_name.to_string()))?;

        if field != ID_FIELD {
            match def.field(field) {
                None => {
                    return Err(Error::Configuration(format!(
                        "cannot index undeclared field '{type_name}.{field}'"
                    )))
                }
                Some(f) if f.reference().is_some() => return Ok(()),
                Some(_) => {}
            }
        }

        if def.indexes.insert(field.to_string()) && frozen {
            tracing::warn!(
                type_name = %type_name,
                field = %field,
                "index created after first data access, existing records are not indexed"
            );
        }
        Ok(())
    }

    /// Look up a type definition.
    pub fn get(&self, type_name: &str) -> Option<&TypeDef> {
        self.types.get(type_name)
    }

    /// Look up a type definition, failing if it was never defined.
    pub fn require(&self, type_name: &str) -> Result<&TypeDef> {
        self.types
            .get(type_name)
            .ok_or_else(|| Error::TypeNotDefined(type_name.to_string()))
    }

    /// Validate the type graph once and return the cached topology.
    pub fn topology(&self) -> Result<&Topology> {
        self.validated
            .get_or_init(|| {
                let result = self.validate();
                match &result {
                    Ok(topology) => {
                        tracing::info!(root = %topology.root, types = self.types.len(), "type registry frozen")
                    }
                    Err(e) => tracing::error!(error = %e, "type registry failed validation"),
                }
                result
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Definition and topology for a type about to be read or written.
    pub fn resolve(&self, type_name: &str) -> Result<(&TypeDef, &Topology)> {
        let def = self.require(type_name)?;
        let topology = self.topology()?;
        Ok((def, topology))
    }

    pub fn state(&self) -> RegistryState {
        match self.validated.get() {
            None => RegistryState::Unvalidated,
            Some(Ok(_)) => RegistryState::Valid,
            Some(Err(e)) => RegistryState::Invalid(e.clone()),
        }
    }

    fn validate(&self) -> Result<Topology> {
        if self.types.is_empty() {
            return Err(Error::Configuration("no types defined".into()));
        }

        for def in self.types.values() {
            def.check_shape(&self.types)?;
        }

        let mut roots = BTreeSet::new();
        let mut parents = HashMap::new();
        let mut children: HashMap<TypeName, Vec<TypeName>> = HashMap::new();
        let mut paths = HashMap::new();

        for (name, def) in &self.types {
            let mut chain = vec![name.clone()];
            let mut current = def;

            while let Some(target) = current.reference_field().and_then(FieldDef::reference) {
                if let Some(pos) = chain.iter().position(|t| t == target) {
                    let mut cycle = chain[pos..].to_vec();
                    cycle.push(target.clone());
                    return Err(Error::CyclicReference {
                        cycle: cycle.join(" -> "),
                    });
                }
                chain.push(target.clone());
                current = self.require(target)?;
            }

            let path: Vec<TypeName> = chain[..chain.len() - 1].iter().rev().cloned().collect();
            roots.insert(current.name.clone());
            paths.insert(name.clone(), path);

            if let Some(field) = def.reference_field() {
                if let Some(target) = field.reference() {
                    parents.insert(
                        name.clone(),
                        ParentRef {
                            field: field.name.clone(),
                            type_name: target.clone(),
                        },
                    );
                    children.entry(target.clone()).or_default().push(name.clone());
                }
            }
        }

        let mut roots = roots.into_iter();
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => root,
            (Some(first), Some(second)) => {
                let mut all = vec![first, second];
                all.extend(roots);
                return Err(Error::MultipleRoots(all));
            }
            (None, _) => return Err(Error::Configuration("no root type".into())),
        };

        Ok(Topology {
            root,
            parents,
            children,
            paths,
        })
    }
}
