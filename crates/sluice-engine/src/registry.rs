//! Component registry and factory
//!
//! A [`Registry`] is built once at process start and then only read. It maps
//! a type name, per component kind, to the parameters the component
//! declares, the datasource type it needs (if any), and a constructor that
//! produces a fresh instance on every call.

use crate::component::{Datasource, Executor, Processor, Sink, Source, Variable};
use crate::error::RegistryError;
use serde::Serialize;
use sluice_common::ParamSpec;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Kinds of registrable components
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Datasource,
    Source,
    Processor,
    Sink,
    Executor,
    Variable,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 6] = [
        ComponentKind::Datasource,
        ComponentKind::Source,
        ComponentKind::Processor,
        ComponentKind::Sink,
        ComponentKind::Executor,
        ComponentKind::Variable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Datasource => "datasource",
            ComponentKind::Source => "source",
            ComponentKind::Processor => "processor",
            ComponentKind::Sink => "sink",
            ComponentKind::Executor => "executor",
            ComponentKind::Variable => "variable",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown component kind '{}'", s))
    }
}

type Constructor<T> = Box<dyn Fn() -> Box<T> + Send + Sync>;

/// A registered component type
pub struct Entry<T: ?Sized> {
    name: String,
    params: Vec<ParamSpec>,
    datasource: Option<String>,
    ctor: Constructor<T>,
}

impl<T: ?Sized> Entry<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Datasource type this component requires
    pub fn datasource(&self) -> Option<&str> {
        self.datasource.as_deref()
    }

    /// Construct a new, unshared instance
    pub fn create(&self) -> Box<T> {
        (self.ctor)()
    }
}

impl<T: ?Sized> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("datasource", &self.datasource)
            .finish_non_exhaustive()
    }
}

/// Listing view of a registered component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentDescriptor {
    pub kind: ComponentKind,
    pub name: String,
    pub datasource: Option<String>,
    pub params: Vec<ParamSpec>,
}

/// Catalog of every registered component type
#[derive(Default)]
pub struct Registry {
    datasources: BTreeMap<String, Entry<dyn Datasource>>,
    sources: BTreeMap<String, Entry<dyn Source>>,
    processors: BTreeMap<String, Entry<dyn Processor>>,
    sinks: BTreeMap<String, Entry<dyn Sink>>,
    executors: BTreeMap<String, Entry<dyn Executor>>,
    variables: BTreeMap<String, Entry<dyn Variable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_datasource<F>(
        &mut self,
        name: &str,
        params: Vec<ParamSpec>,
        ctor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Datasource> + Send + Sync + 'static,
    {
        insert(
            &mut self.datasources,
            ComponentKind::Datasource,
            entry(name, params, None, ctor),
            None,
        )
    }

    pub fn register_source<F>(
        &mut self,
        name: &str,
        params: Vec<ParamSpec>,
        datasource: Option<&str>,
        ctor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Source> + Send + Sync + 'static,
    {
        insert(
            &mut self.sources,
            ComponentKind::Source,
            entry(name, params, datasource, ctor),
            Some(&self.datasources),
        )
    }

    pub fn register_processor<F>(
        &mut self,
        name: &str,
        params: Vec<ParamSpec>,
        ctor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        insert(
            &mut self.processors,
            ComponentKind::Processor,
            entry(name, params, None, ctor),
            None,
        )
    }

    pub fn register_sink<F>(
        &mut self,
        name: &str,
        params: Vec<ParamSpec>,
        datasource: Option<&str>,
        ctor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Sink> + Send + Sync + 'static,
    {
        insert(
            &mut self.sinks,
            ComponentKind::Sink,
            entry(name, params, datasource, ctor),
            Some(&self.datasources),
        )
    }

    pub fn register_executor<F>(
        &mut self,
        name: &str,
        params: Vec<ParamSpec>,
        datasource: Option<&str>,
        ctor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Executor> + Send + Sync + 'static,
    {
        insert(
            &mut self.executors,
            ComponentKind::Executor,
            entry(name, params, datasource, ctor),
            Some(&self.datasources),
        )
    }

    pub fn register_variable<F>(
        &mut self,
        name: &str,
        params: Vec<ParamSpec>,
        datasource: Option<&str>,
        ctor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Variable> + Send + Sync + 'static,
    {
        insert(
            &mut self.variables,
            ComponentKind::Variable,
            entry(name, params, datasource, ctor),
            Some(&self.datasources),
        )
    }

    pub fn datasource(&self, name: &str) -> Result<&Entry<dyn Datasource>, RegistryError> {
        lookup(&self.datasources, ComponentKind::Datasource, name)
    }

    pub fn source(&self, name: &str) -> Result<&Entry<dyn Source>, RegistryError> {
        lookup(&self.sources, ComponentKind::Source, name)
    }

    pub fn processor(&self, name: &str) -> Result<&Entry<dyn Processor>, RegistryError> {
        lookup(&self.processors, ComponentKind::Processor, name)
    }

    pub fn sink(&self, name: &str) -> Result<&Entry<dyn Sink>, RegistryError> {
        lookup(&self.sinks, ComponentKind::Sink, name)
    }

    pub fn executor(&self, name: &str) -> Result<&Entry<dyn Executor>, RegistryError> {
        lookup(&self.executors, ComponentKind::Executor, name)
    }

    pub fn variable(&self, name: &str) -> Result<&Entry<dyn Variable>, RegistryError> {
        lookup(&self.variables, ComponentKind::Variable, name)
    }

    /// Registered type names of one kind, sorted
    pub fn type_names(&self, kind: ComponentKind) -> Vec<&str> {
        fn names<T: ?Sized>(map: &BTreeMap<String, Entry<T>>) -> Vec<&str> {
            map.keys().map(String::as_str).collect()
        }

        match kind {
            ComponentKind::Datasource => names(&self.datasources),
            ComponentKind::Source => names(&self.sources),
            ComponentKind::Processor => names(&self.processors),
            ComponentKind::Sink => names(&self.sinks),
            ComponentKind::Executor => names(&self.executors),
            ComponentKind::Variable => names(&self.variables),
        }
    }

    /// Descriptors of every registered component of one kind
    pub fn describe(&self, kind: ComponentKind) -> Vec<ComponentDescriptor> {
        fn describe_all<T: ?Sized>(
            kind: ComponentKind,
            map: &BTreeMap<String, Entry<T>>,
        ) -> Vec<ComponentDescriptor> {
            map.values()
                .map(|e| ComponentDescriptor {
                    kind,
                    name: e.name.clone(),
                    datasource: e.datasource.clone(),
                    params: e.params.clone(),
                })
                .collect()
        }

        match kind {
            ComponentKind::Datasource => describe_all(kind, &self.datasources),
            ComponentKind::Source => describe_all(kind, &self.sources),
            ComponentKind::Processor => describe_all(kind, &self.processors),
            ComponentKind::Sink => describe_all(kind, &self.sinks),
            ComponentKind::Executor => describe_all(kind, &self.executors),
            ComponentKind::Variable => describe_all(kind, &self.variables),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in ComponentKind::ALL {
            map.entry(&kind, &self.type_names(kind));
        }
        map.finish()
    }
}

fn entry<T: ?Sized, F>(
    name: &str,
    params: Vec<ParamSpec>,
    datasource: Option<&str>,
    ctor: F,
) -> Entry<T>
where
    F: Fn() -> Box<T> + Send + Sync + 'static,
{
    Entry {
        name: name.to_string(),
        params,
        datasource: datasource.map(str::to_string),
        ctor: Box::new(ctor),
    }
}

fn insert<T: ?Sized>(
    map: &mut BTreeMap<String, Entry<T>>,
    kind: ComponentKind,
    entry: Entry<T>,
    datasources: Option<&BTreeMap<String, Entry<dyn Datasource>>>,
) -> Result<(), RegistryError> {
    if map.contains_key(&entry.name) {
        return Err(RegistryError::Duplicate {
            kind,
            name: entry.name,
        });
    }

    if let (Some(required), Some(known)) = (entry.datasource.as_deref(), datasources) {
        if !known.contains_key(required) {
            return Err(RegistryError::UnknownDatasource {
                kind,
                name: entry.name.clone(),
                datasource: required.to_string(),
            });
        }
    }

    debug!(
        kind = %kind,
        name = %entry.name,
        datasource = ?entry.datasource,
        params = entry.params.len(),
        "Registered component"
    );
    map.insert(entry.name.clone(), entry);
    Ok(())
}

fn lookup<'a, T: ?Sized>(
    map: &'a BTreeMap<String, Entry<T>>,
    kind: ComponentKind,
    name: &str,
) -> Result<&'a Entry<T>, RegistryError> {
    map.get(name).ok_or_else(|| RegistryError::NotRegistered {
        kind,
        name: name.to_string(),
    })
}
