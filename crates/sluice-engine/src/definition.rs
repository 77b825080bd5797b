//! Pipeline definitions and assembly
//!
//! A [`PipelineDefinition`] names datasources, variables and components by
//! registered type. [`assemble`] turns it into a runnable [`Pipeline`]: each
//! component is created from the registry, its declared defaults applied,
//! and every component that declares a datasource type receives a freshly
//! initialized datasource of its own.

use crate::component::{Datasource, Executor, Processor, Sink, Source};
use crate::error::AssemblyError;
use crate::files::ConfigResolver;
use crate::pipeline::{
    Bound, Pipeline, PipelineComponents, PipelineOptions, ProcessorConfig, RunConfigs, RunId,
};
use crate::registry::Registry;
use serde::{Deserialize, Deserializer, Serialize};
use sluice_common::params::{apply_defaults, missing_required};
use sluice_common::{ComponentConfig, ParamSpec};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A named datasource configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "scalar_params")]
    pub params: ComponentConfig,
}

/// A component slot: registered type, optional datasource name and params
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<String>,
    #[serde(default, deserialize_with = "scalar_params")]
    pub params: ComponentConfig,
}

impl ComponentSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_datasource(mut self, name: impl Into<String>) -> Self {
        self.datasource = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key, value);
        self
    }
}

/// Serialized description of one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub options: PipelineOptions,
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceSpec>,
    #[serde(default)]
    pub variables: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub pre_execute: Option<ComponentSpec>,
    pub source: ComponentSpec,
    #[serde(default)]
    pub processors: Vec<ComponentSpec>,
    pub sink: ComponentSpec,
    #[serde(default)]
    pub post_execute: Option<ComponentSpec>,
}

impl PipelineDefinition {
    pub fn new(source: ComponentSpec, sink: ComponentSpec) -> Self {
        Self {
            id: None,
            options: PipelineOptions::default(),
            datasources: BTreeMap::new(),
            variables: BTreeMap::new(),
            pre_execute: None,
            source,
            processors: Vec::new(),
            sink,
            post_execute: None,
        }
    }

    /// Parse a YAML document. JSON is accepted as well since it is valid YAML.
    pub fn from_yaml(content: &str) -> Result<Self, AssemblyError> {
        serde_yaml::from_str(content).map_err(|e| AssemblyError::Parse(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self, AssemblyError> {
        serde_json::from_str(content).map_err(|e| AssemblyError::Parse(e.to_string()))
    }

    /// Load a definition file; `.json` files are parsed as JSON, anything
    /// else as YAML
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AssemblyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Every component slot with a human readable label, in run order
    pub fn components(&self) -> Vec<(String, &ComponentSpec)> {
        let mut slots = Vec::with_capacity(self.processors.len() + 4);
        if let Some(spec) = &self.pre_execute {
            slots.push((format!("pre_execute '{}'", spec.kind), spec));
        }
        slots.push((format!("source '{}'", self.source.kind), &self.source));
        for (index, spec) in self.processors.iter().enumerate() {
            slots.push((format!("processor #{} '{}'", index + 1, spec.kind), spec));
        }
        slots.push((format!("sink '{}'", self.sink.kind), &self.sink));
        if let Some(spec) = &self.post_execute {
            slots.push((format!("post_execute '{}'", spec.kind), spec));
        }
        slots
    }
}

/// Accept YAML/JSON scalars as parameter values
fn scalar_params<'de, D>(deserializer: D) -> Result<ComponentConfig, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "parameter '{}' must be a scalar; encode lists and maps as JSON text, got {}",
                        key, other
                    )))
                },
            };
            Ok((key, text))
        })
        .collect()
}

/// A runnable pipeline and the configuration to run it with
pub struct AssembledPipeline {
    pub pipeline: Pipeline,
    pub configs: RunConfigs,
}

/// One component slot after checks and defaults
struct Planned<'a> {
    label: String,
    kind: &'a str,
    datasource: Option<&'a str>,
    config: ComponentConfig,
}

struct Plan<'a> {
    pre_execute: Option<Planned<'a>>,
    source: Planned<'a>,
    processors: Vec<Planned<'a>>,
    sink: Planned<'a>,
    post_execute: Option<Planned<'a>>,
}

/// Check every reference in the definition without opening anything
pub fn validate(registry: &Registry, definition: &PipelineDefinition) -> Result<(), AssemblyError> {
    for (name, spec) in &definition.datasources {
        let entry = registry.datasource(&spec.kind)?;
        let mut config = spec.params.clone();
        check_params(&format!("datasource '{}'", name), entry.params(), &mut config)?;
    }

    for (name, spec) in &definition.variables {
        let entry = registry.variable(&spec.kind)?;
        plan_slot(
            definition,
            format!("variable '{}'", name),
            spec,
            entry.datasource(),
            entry.params(),
        )?;
    }

    plan(registry, definition)?;
    Ok(())
}

fn plan<'a>(
    registry: &Registry,
    definition: &'a PipelineDefinition,
) -> Result<Plan<'a>, AssemblyError> {
    let pre_execute = match &definition.pre_execute {
        Some(spec) => {
            let entry = registry.executor(&spec.kind)?;
            let label = format!("pre_execute '{}'", spec.kind);
            Some(plan_slot(definition, label, spec, entry.datasource(), entry.params())?)
        },
        None => None,
    };

    let spec = &definition.source;
    let entry = registry.source(&spec.kind)?;
    let label = format!("source '{}'", spec.kind);
    let source = plan_slot(definition, label, spec, entry.datasource(), entry.params())?;

    let mut processors = Vec::with_capacity(definition.processors.len());
    for (index, spec) in definition.processors.iter().enumerate() {
        let entry = registry.processor(&spec.kind)?;
        let label = format!("processor #{} '{}'", index + 1, spec.kind);
        processors.push(plan_slot(definition, label, spec, None, entry.params())?);
    }

    let spec = &definition.sink;
    let entry = registry.sink(&spec.kind)?;
    let label = format!("sink '{}'", spec.kind);
    let sink = plan_slot(definition, label, spec, entry.datasource(), entry.params())?;

    let post_execute = match &definition.post_execute {
        Some(spec) => {
            let entry = registry.executor(&spec.kind)?;
            let label = format!("post_execute '{}'", spec.kind);
            Some(plan_slot(definition, label, spec, entry.datasource(), entry.params())?)
        },
        None => None,
    };

    Ok(Plan {
        pre_execute,
        source,
        processors,
        sink,
        post_execute,
    })
}

fn plan_slot<'a>(
    definition: &'a PipelineDefinition,
    label: String,
    spec: &'a ComponentSpec,
    declared: Option<&str>,
    params: &[ParamSpec],
) -> Result<Planned<'a>, AssemblyError> {
    check_datasource(definition, &label, spec.datasource.as_deref(), declared)?;
    let mut config = spec.params.clone();
    check_params(&label, params, &mut config)?;
    Ok(Planned {
        label,
        kind: &spec.kind,
        datasource: spec.datasource.as_deref(),
        config,
    })
}

pub(crate) fn check_params(
    label: &str,
    params: &[ParamSpec],
    config: &mut ComponentConfig,
) -> Result<(), AssemblyError> {
    apply_defaults(params, config);
    let missing = missing_required(params, config);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AssemblyError::MissingParams {
            component: label.to_string(),
            keys: missing.into_iter().map(str::to_string).collect(),
        })
    }
}

/// A component declaring a datasource type must reference a configured
/// datasource of exactly that type; one declaring none must reference none.
pub(crate) fn check_datasource(
    definition: &PipelineDefinition,
    label: &str,
    referenced: Option<&str>,
    declared: Option<&str>,
) -> Result<(), AssemblyError> {
    match (declared, referenced) {
        (None, None) => Ok(()),
        (None, Some(name)) => Err(AssemblyError::UnexpectedDatasource {
            component: label.to_string(),
            name: name.to_string(),
        }),
        (Some(expected), None) => Err(AssemblyError::MissingDatasource {
            component: label.to_string(),
            expected: expected.to_string(),
        }),
        (Some(expected), Some(name)) => {
            let spec = definition.datasources.get(name).ok_or_else(|| {
                AssemblyError::UnknownDatasourceRef {
                    component: label.to_string(),
                    name: name.to_string(),
                }
            })?;
            if spec.kind == expected {
                Ok(())
            } else {
                Err(AssemblyError::DatasourceMismatch {
                    component: label.to_string(),
                    name: name.to_string(),
                    expected: expected.to_string(),
                    found: spec.kind.clone(),
                })
            }
        },
    }
}

/// Create and initialize a fresh instance of the named datasource
pub(crate) async fn open_datasource(
    registry: &Registry,
    definition: &PipelineDefinition,
    label: &str,
    name: &str,
    resolver: &dyn ConfigResolver,
) -> Result<Box<dyn Datasource>, AssemblyError> {
    let spec = definition
        .datasources
        .get(name)
        .ok_or_else(|| AssemblyError::UnknownDatasourceRef {
            component: label.to_string(),
            name: name.to_string(),
        })?;
    let entry = registry.datasource(&spec.kind)?;

    let mut config = spec.params.clone();
    apply_defaults(entry.params(), &mut config);
    match resolver.resolve(&mut config).await {
        Ok(None) => {},
        Ok(Some(id)) => {
            return Err(AssemblyError::ConfigResolution {
                component: format!("datasource '{}'", name),
                source: anyhow::anyhow!("datasources cannot allocate output files (got {})", id),
            })
        },
        Err(source) => {
            return Err(AssemblyError::ConfigResolution {
                component: format!("datasource '{}'", name),
                source,
            })
        },
    }

    let mut datasource = entry.create();
    datasource
        .init(&config)
        .await
        .map_err(|source| AssemblyError::DatasourceInit {
            component: label.to_string(),
            name: name.to_string(),
            source,
        })?;
    debug!(component = %label, datasource = %name, kind = %spec.kind, "Datasource initialized");
    Ok(datasource)
}

/// Initialized datasources not yet handed to a pipeline
#[derive(Default)]
struct OpenedDatasources {
    by_label: BTreeMap<String, Box<dyn Datasource>>,
}

impl OpenedDatasources {
    async fn open_for(
        &mut self,
        registry: &Registry,
        definition: &PipelineDefinition,
        slot: Option<&Planned<'_>>,
        resolver: &dyn ConfigResolver,
    ) -> Result<(), AssemblyError> {
        let Some(slot) = slot else {
            return Ok(());
        };
        let Some(name) = slot.datasource else {
            return Ok(());
        };
        let datasource = open_datasource(registry, definition, &slot.label, name, resolver).await?;
        self.by_label.insert(slot.label.clone(), datasource);
        Ok(())
    }

    fn take(&mut self, label: &str) -> Option<Box<dyn Datasource>> {
        self.by_label.remove(label)
    }

    async fn close_all(&mut self) {
        for (label, mut datasource) in std::mem::take(&mut self.by_label) {
            if let Err(e) = datasource.close().await {
                warn!(component = %label, error = %format!("{:#}", e), "Failed to close datasource after assembly error");
            }
        }
    }
}

fn bind<T: ?Sized>(component: Box<T>, datasource: Option<Box<dyn Datasource>>) -> Bound<T> {
    Bound {
        component,
        datasource,
    }
}

/// Build a runnable pipeline from a definition.
///
/// Placeholders must already be substituted (see
/// [`crate::variables::resolve_variables`]). On error every datasource
/// initialized so far is closed again.
pub async fn assemble(
    registry: &Registry,
    definition: &PipelineDefinition,
    resolver: Arc<dyn ConfigResolver>,
) -> Result<AssembledPipeline, AssemblyError> {
    let plan = plan(registry, definition)?;

    let mut opened = OpenedDatasources::default();
    let slots = [
        plan.pre_execute.as_ref(),
        Some(&plan.source),
        Some(&plan.sink),
        plan.post_execute.as_ref(),
    ];
    for slot in slots {
        if let Err(e) = opened
            .open_for(registry, definition, slot, resolver.as_ref())
            .await
        {
            opened.close_all().await;
            return Err(e);
        }
    }

    let Plan {
        pre_execute,
        source,
        processors,
        sink,
        post_execute,
    } = plan;

    let mut configs = RunConfigs::default();

    let pre_execute = match pre_execute {
        Some(slot) => {
            let executor: Box<dyn Executor> = registry.executor(slot.kind)?.create();
            let datasource = opened.take(&slot.label);
            configs.pre_execute = Some(slot.config);
            Some(bind(executor, datasource))
        },
        None => None,
    };

    let component: Box<dyn Source> = registry.source(source.kind)?.create();
    let source_bound = bind(component, opened.take(&source.label));
    configs.source = source.config;

    let mut built: Vec<Box<dyn Processor>> = Vec::with_capacity(processors.len());
    for slot in processors {
        built.push(registry.processor(slot.kind)?.create());
        configs
            .processors
            .push(ProcessorConfig::new(slot.kind, slot.config));
    }

    let component: Box<dyn Sink> = registry.sink(sink.kind)?.create();
    let sink_bound = bind(component, opened.take(&sink.label));
    configs.sink = sink.config;

    let post_execute = match post_execute {
        Some(slot) => {
            let executor: Box<dyn Executor> = registry.executor(slot.kind)?.create();
            let datasource = opened.take(&slot.label);
            configs.post_execute = Some(slot.config);
            Some(bind(executor, datasource))
        },
        None => None,
    };

    let components = PipelineComponents {
        pre_execute,
        source: source_bound,
        processors: built,
        sink: sink_bound,
        post_execute,
    };

    let run_id = definition
        .id
        .as_deref()
        .map(RunId::from)
        .unwrap_or_else(RunId::generate);
    info!(run_id = %run_id, "Pipeline assembled");

    let pipeline = Pipeline::new(run_id, components, definition.options).with_resolver(resolver);
    Ok(AssembledPipeline { pipeline, configs })
}
