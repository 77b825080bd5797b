//! `${name}` placeholder resolution
//!
//! Component and datasource parameters may embed `${name}` placeholders.
//! Each distinct name is resolved once with the named variable and every
//! occurrence is replaced with its value before the pipeline is assembled.

use crate::definition::{check_datasource, check_params, open_datasource, PipelineDefinition};
use crate::error::AssemblyError;
use crate::files::ConfigResolver;
use crate::registry::Registry;
use regex::Regex;
use sluice_common::ComponentConfig;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

const PLACEHOLDER: &str = r"\$\{([^}]*)\}";

fn placeholder_pattern() -> Result<Regex, AssemblyError> {
    Ok(Regex::new(PLACEHOLDER)?)
}

/// Parameter maps that may carry placeholders. Variables' own parameters
/// are not scanned.
fn configs(definition: &PipelineDefinition) -> Vec<&ComponentConfig> {
    let mut configs: Vec<&ComponentConfig> =
        definition.datasources.values().map(|ds| &ds.params).collect();
    configs.extend(
        definition
            .components()
            .into_iter()
            .map(|(_, spec)| &spec.params),
    );
    configs
}

fn configs_mut(definition: &mut PipelineDefinition) -> Vec<&mut ComponentConfig> {
    let PipelineDefinition {
        datasources,
        pre_execute,
        source,
        processors,
        sink,
        post_execute,
        ..
    } = definition;

    let mut configs: Vec<&mut ComponentConfig> =
        datasources.values_mut().map(|ds| &mut ds.params).collect();
    configs.extend(pre_execute.as_mut().map(|spec| &mut spec.params));
    configs.push(&mut source.params);
    configs.extend(processors.iter_mut().map(|spec| &mut spec.params));
    configs.push(&mut sink.params);
    configs.extend(post_execute.as_mut().map(|spec| &mut spec.params));
    configs
}

/// Distinct placeholder names used anywhere in the definition's parameters
pub fn placeholders(definition: &PipelineDefinition) -> Result<BTreeSet<String>, AssemblyError> {
    let pattern = placeholder_pattern()?;
    let mut names = BTreeSet::new();
    for config in configs(definition) {
        for (_, value) in config.iter() {
            for captures in pattern.captures_iter(value) {
                if let Some(name) = captures.get(1) {
                    names.insert(name.as_str().to_string());
                }
            }
        }
    }
    Ok(names)
}

/// Resolve one named variable.
///
/// The variable receives a freshly initialized datasource when its type
/// declares one.
pub async fn resolve_variable(
    registry: &Registry,
    definition: &PipelineDefinition,
    name: &str,
    resolver: &dyn ConfigResolver,
) -> Result<String, AssemblyError> {
    let spec = definition
        .variables
        .get(name)
        .ok_or_else(|| AssemblyError::UnknownVariable(name.to_string()))?;
    let entry = registry.variable(&spec.kind)?;
    let label = format!("variable '{}'", name);

    check_datasource(
        definition,
        &label,
        spec.datasource.as_deref(),
        entry.datasource(),
    )?;
    let mut config = spec.params.clone();
    check_params(&label, entry.params(), &mut config)?;

    let datasource = match spec.datasource.as_deref() {
        Some(ds) => Some(open_datasource(registry, definition, &label, ds, resolver).await?),
        None => None,
    };

    let mut variable = entry.create();
    let value = variable
        .get(&config, datasource)
        .await
        .map_err(|source| AssemblyError::Variable {
            name: name.to_string(),
            source,
        })?;
    debug!(variable = %name, kind = %spec.kind, "Variable resolved");
    Ok(value)
}

/// Resolve every placeholder used in the definition, each name once
pub async fn resolve_variables(
    registry: &Registry,
    definition: &PipelineDefinition,
    resolver: &dyn ConfigResolver,
) -> Result<BTreeMap<String, String>, AssemblyError> {
    let names = placeholders(definition)?;
    if let Some(unknown) = names
        .iter()
        .find(|name| !definition.variables.contains_key(name.as_str()))
    {
        return Err(AssemblyError::UnknownVariable(unknown.clone()));
    }

    let mut values = BTreeMap::new();
    for name in names {
        let value = resolve_variable(registry, definition, &name, resolver).await?;
        values.insert(name, value);
    }

    if !values.is_empty() {
        info!(variables = values.len(), "Variables resolved");
    }
    Ok(values)
}

/// Replace every `${name}` whose name has a value. Unknown placeholders are
/// left untouched.
pub fn substitute(
    definition: &mut PipelineDefinition,
    values: &BTreeMap<String, String>,
) -> Result<(), AssemblyError> {
    if values.is_empty() {
        return Ok(());
    }

    let pattern = placeholder_pattern()?;
    for config in configs_mut(definition) {
        for value in config.values_mut() {
            if !pattern.is_match(value) {
                continue;
            }
            let replaced = pattern.replace_all(value, |captures: &regex::Captures<'_>| {
                let name = captures.get(1).map_or("", |m| m.as_str());
                match values.get(name) {
                    Some(resolved) => resolved.clone(),
                    None => captures[0].to_string(),
                }
            });
            *value = replaced.into_owned();
        }
    }
    Ok(())
}
