//! The catalog: every declared resource instance, in declaration order.

use crate::error::{Error, Result};
use crate::logging::{EventLog, Level, Source};
use crate::property::Property;
use crate::registry::{METAPARAMS, Registry, TypeDefinition, check_allowed};
use crate::value::{Attributes, ResourceRef, Value};
use std::collections::{BTreeSet, HashMap};

/// Metaparameters holding resource references
pub const RELATIONSHIPS: &[&str] = &["require", "before", "subscribe", "notify"];

/// Metaparameters whose values accumulate across re-declarations
const LIST_METAPARAMS: &[&str] = &["require", "before", "subscribe", "notify", "tag", "check"];

/// Position of a resource in its catalog
pub type ResourceId = usize;

/// A declared resource instance
#[derive(Debug, Clone)]
pub struct Resource {
    pub reference: ResourceRef,
    /// Parameters and metaparameters, including the namevar
    pub parameters: Attributes,
    /// Managed and check-only properties, in type order
    pub properties: Vec<Property>,
    pub tags: BTreeSet<String>,
    /// Level for change events
    pub loglevel: Level,
}

impl Resource {
    pub fn source(&self) -> Source {
        Source::Resource {
            reference: self.reference.clone(),
            tags: self.tags.clone(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// References named by a relationship metaparameter
    pub fn references(&self, metaparam: &str) -> Vec<ResourceRef> {
        self.parameters
            .get(metaparam)
            .map(|value| {
                value
                    .to_list()
                    .iter()
                    .filter_map(|text| text.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_tagged(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_lowercase())
    }
}

impl From<&Resource> for Source {
    fn from(resource: &Resource) -> Self {
        resource.source()
    }
}

/// A declaration that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reference: ResourceRef,
    pub message: String,
}

/// Resource instances keyed by (type, name)
#[derive(Debug, Default)]
pub struct Catalog {
    resources: Vec<Resource>,
    index: HashMap<ResourceRef, ResourceId>,
    rejected: Vec<Rejection>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: ResourceId) -> &Resource {
        &self.resources[id]
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id]
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub(crate) fn resources_mut(&mut self) -> &mut [Resource] {
        &mut self.resources
    }

    pub fn lookup(&self, type_name: &str, name: &str) -> Option<&Resource> {
        self.id_of(&ResourceRef::new(type_name, name))
            .map(|id| &self.resources[id])
    }

    pub fn id_of(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.index.get(reference).copied()
    }

    /// Declarations that failed validation
    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    pub fn is_rejected(&self, reference: &ResourceRef) -> bool {
        self.rejected.iter().any(|r| &r.reference == reference)
    }

    /// Validate and add an instance.
    ///
    /// Re-declaring an existing (type, name) merges into it: list
    /// metaparameters are unioned, attributes not yet set are added and
    /// existing values win. The merged result is validated as a whole and
    /// the existing instance is left untouched when that fails.
    pub fn create_instance(
        &mut self,
        registry: &Registry,
        type_name: &str,
        name: &str,
        attributes: Attributes,
    ) -> Result<ResourceId> {
        let definition = registry
            .get_type(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))?;
        let reference = ResourceRef::new(type_name, name);

        for (attribute, value) in &attributes {
            validate_attribute(definition, &reference, attribute, value)?;
        }

        if let Some(id) = self.id_of(&reference) {
            log::debug!("Merging re-declared {}", reference);
            let mut merged = self.resources[id].clone();
            merge(definition, &mut merged, attributes)?;
            self.resources[id] = merged;
            return Ok(id);
        }

        let resource = build(definition, reference, attributes)?;
        let id = self.resources.len();
        self.index.insert(resource.reference.clone(), id);
        self.resources.push(resource);
        Ok(id)
    }

    /// Like [`create_instance`](Self::create_instance), but a failure is
    /// logged and recorded instead of returned.
    pub fn declare(
        &mut self,
        registry: &Registry,
        type_name: &str,
        name: &str,
        attributes: Attributes,
        log: &EventLog,
    ) -> Option<ResourceId> {
        match self.create_instance(registry, type_name, name, attributes) {
            Ok(id) => Some(id),
            Err(e) => {
                let reference = ResourceRef::new(type_name, name);
                log.err(&reference, format!("Could not declare resource: {}", e));
                self.rejected.push(Rejection {
                    reference,
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

fn validate_attribute(
    definition: &TypeDefinition,
    reference: &ResourceRef,
    attribute: &str,
    value: &Value,
) -> Result<()> {
    if METAPARAMS.contains(&attribute) {
        return validate_metaparam(definition, reference, attribute, value);
    }
    if let Some(spec) = definition.property_spec(attribute) {
        return check_allowed(reference, attribute, &spec.allowed, value);
    }
    if let Some(spec) = definition.param_spec(attribute) {
        return check_allowed(reference, attribute, &spec.allowed, value);
    }
    Err(Error::validation(
        reference.to_string(),
        attribute,
        format!("not a valid attribute of type '{}'", definition.name),
    ))
}

fn validate_metaparam(
    definition: &TypeDefinition,
    reference: &ResourceRef,
    attribute: &str,
    value: &Value,
) -> Result<()> {
    match attribute {
        "require" | "before" | "subscribe" | "notify" => {
            for text in value.to_list() {
                text.parse::<ResourceRef>()
                    .map_err(|e| Error::validation(reference.to_string(), attribute, e))?;
            }
        }
        "loglevel" => {
            value
                .to_string()
                .parse::<Level>()
                .map_err(|e| Error::validation(reference.to_string(), attribute, e))?;
        }
        "check" => {
            for name in value.to_list() {
                if definition.property_spec(&name).is_none() {
                    return Err(Error::validation(
                        reference.to_string(),
                        attribute,
                        format!("'{}' is not a property of type '{}'", name, definition.name),
                    ));
                }
            }
        }
        "provider" if value.as_str().is_none() => {
            return Err(Error::validation(
                reference.to_string(),
                attribute,
                "provider must be a name",
            ));
        }
        _ => {}
    }
    Ok(())
}

fn build(
    definition: &TypeDefinition,
    reference: ResourceRef,
    mut attributes: Attributes,
) -> Result<Resource> {
    let checked: Vec<String> = attributes
        .get("check")
        .map(Value::to_list)
        .unwrap_or_default();

    let mut properties = Vec::new();
    for spec in definition.properties() {
        let should = match attributes.remove(&spec.name) {
            Some(value) => Some(value),
            None if checked.contains(&spec.name) => None,
            None => spec.default.clone(),
        };
        if should.is_some() || checked.contains(&spec.name) {
            properties.push(Property::new(&spec.name, should, spec.comparator.clone()));
        }
    }

    let mut parameters = attributes;
    parameters
        .entry(definition.namevar_name().to_string())
        .or_insert_with(|| Value::from(reference.name.as_str()));
    for spec in definition.parameters() {
        if let Some(default) = &spec.default {
            parameters
                .entry(spec.name.clone())
                .or_insert_with(|| default.clone());
        }
        if spec.required && !parameters.contains_key(&spec.name) {
            return Err(Error::validation(
                reference.to_string(),
                &spec.name,
                "parameter is required",
            ));
        }
    }

    for validator in definition.validators() {
        validator(&reference, &parameters)?;
    }
    let (loglevel, tags) = derived(&reference, &parameters)?;

    Ok(Resource {
        reference,
        parameters,
        properties,
        tags,
        loglevel,
    })
}

/// Log level and tags (explicit plus automatic) implied by the parameters
fn derived(reference: &ResourceRef, parameters: &Attributes) -> Result<(Level, BTreeSet<String>)> {
    let loglevel = match parameters.get("loglevel") {
        Some(value) => value
            .to_string()
            .parse()
            .map_err(|e: String| Error::validation(reference.to_string(), "loglevel", e))?,
        None => Level::Notice,
    };

    let mut tags: BTreeSet<String> = parameters
        .get("tag")
        .map(|value| value.to_list().iter().map(|t| t.to_lowercase()).collect())
        .unwrap_or_default();
    tags.insert(reference.type_name.clone());
    tags.insert(reference.name.to_lowercase());

    Ok((loglevel, tags))
}

fn merge(definition: &TypeDefinition, resource: &mut Resource, attributes: Attributes) -> Result<()> {
    for (attribute, value) in attributes {
        if let Some(spec) = definition.property_spec(&attribute) {
            match resource.properties.iter_mut().find(|p| p.name() == attribute) {
                Some(existing) if existing.is_managed() => {}
                Some(existing) => existing.set_should(value),
                None => resource.properties.push(Property::new(
                    &attribute,
                    Some(value),
                    spec.comparator.clone(),
                )),
            }
            continue;
        }

        if LIST_METAPARAMS.contains(&attribute.as_str()) {
            let mut items = resource
                .parameters
                .get(&attribute)
                .map(Value::to_list)
                .unwrap_or_default();
            for item in value.to_list() {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            if attribute == "check" {
                for name in &items {
                    if resource.property(name).is_none()
                        && let Some(spec) = definition.property_spec(name)
                    {
                        resource
                            .properties
                            .push(Property::new(name, None, spec.comparator.clone()));
                    }
                }
            }
            resource.parameters.insert(attribute, Value::from(items));
            continue;
        }

        resource.parameters.entry(attribute).or_insert(value);
    }

    let order: Vec<&str> = definition.properties().iter().map(|s| s.name.as_str()).collect();
    resource
        .properties
        .sort_by_key(|p| order.iter().position(|n| *n == p.name()));

    for validator in definition.validators() {
        validator(&resource.reference, &resource.parameters)?;
    }
    let (loglevel, tags) = derived(&resource.reference, &resource.parameters)?;
    resource.loglevel = loglevel;
    resource.tags = tags;
    Ok(())
}
