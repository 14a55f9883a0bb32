//! Type registry: resource type definitions and their providers.
//!
//! Types and providers are registered once at startup and read-only during
//! a run, so a `&Registry` can be shared freely across threads.

use crate::catalog::Resource;
use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::property::Comparator;
use crate::provider::ProviderDescriptor;
use crate::value::{Attributes, ResourceRef, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Attributes accepted on every resource type
pub const METAPARAMS: &[&str] = &[
    "require",
    "before",
    "subscribe",
    "notify",
    "tag",
    "loglevel",
    "check",
    "provider",
];

/// Whole-instance validation hook, run after per-attribute checks
pub type Validator = Arc<dyn Fn(&ResourceRef, &Attributes) -> Result<()> + Send + Sync>;

/// Computes implicit ordering dependencies for an instance
pub type AutoRequire = Arc<dyn Fn(&Resource) -> Vec<ResourceRef> + Send + Sync>;

/// A managed property of a type
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: String,
    pub doc: String,
    pub default: Option<Value>,
    pub allowed: Vec<Value>,
    pub comparator: Comparator,
}

impl PropertySpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: String::new(),
            default: None,
            allowed: Vec::new(),
            comparator: Comparator::Equality,
        }
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_string();
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| Value::from(*v)).collect();
        self
    }

    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }
}

/// A non-managed parameter of a type
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub doc: String,
    pub default: Option<Value>,
    pub allowed: Vec<Value>,
    pub required: bool,
}

impl ParamSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: String::new(),
            default: None,
            allowed: Vec::new(),
            required: false,
        }
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_string();
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| Value::from(*v)).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Check `value` against an allowed-values list; empty means anything goes
pub(crate) fn check_allowed(
    reference: &ResourceRef,
    attribute: &str,
    allowed: &[Value],
    value: &Value,
) -> Result<()> {
    if allowed.is_empty() || allowed.iter().any(|a| a.loosely_eq(value)) {
        return Ok(());
    }
    let choices: Vec<String> = allowed.iter().map(ToString::to_string).collect();
    Err(Error::validation(
        reference.to_string(),
        attribute,
        format!(
            "invalid value '{}'; valid values are {}",
            value,
            choices.join(", ")
        ),
    ))
}

/// A named resource kind
#[derive(Clone)]
pub struct TypeDefinition {
    pub name: String,
    pub doc: String,
    namevar: String,
    properties: Vec<PropertySpec>,
    parameters: Vec<ParamSpec>,
    validators: Vec<Validator>,
    autorequire: Option<AutoRequire>,
}

impl TypeDefinition {
    /// A type whose `name` parameter defaults to the instance title
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            doc: String::new(),
            namevar: "name".to_string(),
            properties: Vec::new(),
            parameters: Vec::new(),
            validators: Vec::new(),
            autorequire: None,
        }
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_string();
        self
    }

    /// Parameter that defaults to the instance title
    pub fn namevar(mut self, param: &str) -> Self {
        self.namevar = param.to_string();
        self
    }

    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }

    pub fn parameter(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn validator(
        mut self,
        check: impl Fn(&ResourceRef, &Attributes) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(Arc::new(check));
        self
    }

    pub fn autorequire(
        mut self,
        hook: impl Fn(&Resource) -> Vec<ResourceRef> + Send + Sync + 'static,
    ) -> Self {
        self.autorequire = Some(Arc::new(hook));
        self
    }

    pub fn namevar_name(&self) -> &str {
        &self.namevar
    }

    pub fn properties(&self) -> &[PropertySpec] {
        &self.properties
    }

    pub fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    pub fn property_spec(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn param_spec(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub(crate) fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Implicit dependencies of `resource`, if this type declares any
    pub fn autorequires(&self, resource: &Resource) -> Vec<ResourceRef> {
        self.autorequire
            .as_ref()
            .map(|hook| hook(resource))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for TypeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("name", &self.name)
            .field("namevar", &self.namevar)
            .field("properties", &self.properties)
            .field("parameters", &self.parameters)
            .field("validators", &self.validators.len())
            .field("autorequire", &self.autorequire.is_some())
            .finish()
    }
}

/// All known types and their providers
#[derive(Debug, Default)]
pub struct Registry {
    types: BTreeMap<String, TypeDefinition>,
    providers: BTreeMap<String, Vec<ProviderDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Each name may be defined once.
    pub fn define_type(&mut self, definition: TypeDefinition) -> Result<()> {
        if self.types.contains_key(&definition.name) {
            return Err(Error::DuplicateType(definition.name));
        }
        log::debug!("Defined resource type '{}'", definition.name);
        self.types.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(&name.to_lowercase())
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    /// Register a provider for an already defined type
    pub fn register_provider(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        if !self.types.contains_key(&descriptor.type_name) {
            return Err(Error::UnknownType(descriptor.type_name));
        }
        let list = self
            .providers
            .entry(descriptor.type_name.clone())
            .or_default();
        if list.iter().any(|p| p.name == descriptor.name) {
            return Err(Error::DuplicateProvider {
                type_name: descriptor.type_name,
                provider: descriptor.name,
            });
        }
        log::debug!(
            "Registered provider '{}' for type '{}'",
            descriptor.name,
            descriptor.type_name
        );
        list.push(descriptor);
        Ok(())
    }

    /// Providers of a type in registration order
    pub fn providers_for(&self, type_name: &str) -> &[ProviderDescriptor] {
        self.providers
            .get(&type_name.to_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    pub fn provider(&self, type_name: &str, name: &str) -> Option<&ProviderDescriptor> {
        self.providers_for(type_name).iter().find(|p| p.name == name)
    }

    /// Providers of a type in selection order for these facts
    pub fn ranked_providers(&self, type_name: &str, facts: &Facts) -> Vec<&ProviderDescriptor> {
        let mut ranked: Vec<&ProviderDescriptor> = self.providers_for(type_name).iter().collect();
        ranked.sort_by_key(|p| p.rank(facts));
        ranked
    }

    /// Pick the provider for `resource`.
    ///
    /// An explicit `provider` attribute restricts the choice to that
    /// provider. Otherwise candidates are ranked (platform default, type
    /// default, confined, unconfined; ties by registration order) and the
    /// first whose confinement passes wins.
    pub fn select_provider(&self, resource: &Resource, facts: &Facts) -> Result<&ProviderDescriptor> {
        let reference = &resource.reference;
        let candidates = self.providers_for(&reference.type_name);

        if let Some(explicit) = resource.parameters.get("provider").map(ToString::to_string) {
            return match candidates.iter().find(|p| p.name == explicit) {
                Some(descriptor) if descriptor.is_suitable(facts) => Ok(descriptor),
                _ => Err(Error::NoSuitableProvider {
                    resource: reference.to_string(),
                    tried: vec![explicit],
                }),
            };
        }

        let ranked = self.ranked_providers(&reference.type_name, facts);
        for &descriptor in &ranked {
            match descriptor.failed_confine(facts) {
                None => {
                    log::debug!("Selected provider '{}' for {}", descriptor.name, reference);
                    return Ok(descriptor);
                }
                Some(rule) => log::debug!(
                    "Provider '{}' unsuitable for {}: {}",
                    descriptor.name,
                    reference,
                    rule
                ),
            }
        }

        Err(Error::NoSuitableProvider {
            resource: reference.to_string(),
            tried: ranked.iter().map(|p| p.name.clone()).collect(),
        })
    }
}
