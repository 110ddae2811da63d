//! Shared fixtures: a plugin that records every hook call in a journal.

#![allow(dead_code)]

use plugin_lifecycle::{
    Catalog, Configurable, DeclarationMetadata, Disposable, HasOptions, Hook, Invokable, Loadable,
    MemoryStateStore, Orchestrator, OrchestratorConfig, Plugin, PluginDeclaration, PluginError,
    PluginKind, PluginTypeId, Savable, Toggleable, TypedOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Drain the journal.
pub fn take(journal: &Journal) -> Vec<String> {
    std::mem::take(&mut *journal.lock().unwrap())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderOptions {
    pub greeting: String,
    pub volume: u32,
}

/// How a recorder misbehaves.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail: Vec<Hook>,
    pub panic_on: Vec<Hook>,
}

impl Faults {
    pub fn failing(hooks: &[Hook]) -> Self {
        Self {
            fail: hooks.to_vec(),
            panic_on: Vec::new(),
        }
    }

    pub fn panicking(hooks: &[Hook]) -> Self {
        Self {
            fail: Vec::new(),
            panic_on: hooks.to_vec(),
        }
    }
}

pub struct Recorder {
    name: String,
    journal: Journal,
    faults: Faults,
    toggleable: bool,
    options: TypedOptions<RecorderOptions>,
}

impl Recorder {
    fn record(&mut self, hook: Hook) -> Result<(), PluginError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", hook, self.name));
        if self.faults.panic_on.contains(&hook) {
            panic!("{} exploded during {}", self.name, hook);
        }
        if self.faults.fail.contains(&hook) {
            return Err(PluginError::ExecutionError(format!(
                "{} refused {}",
                self.name, hook
            )));
        }
        Ok(())
    }
}

impl Configurable for Recorder {
    fn configure(&mut self) -> Result<(), PluginError> {
        self.record(Hook::Configure)
    }
}

impl Invokable for Recorder {
    fn invoke(&mut self) -> Result<(), PluginError> {
        self.record(Hook::Invoke)
    }
}

impl Loadable for Recorder {
    fn load(&mut self) -> Result<(), PluginError> {
        self.record(Hook::Load)
    }
}

impl Savable for Recorder {
    fn save(&mut self) -> Result<(), PluginError> {
        self.record(Hook::Save)
    }
}

impl Disposable for Recorder {
    fn dispose(&mut self) -> Result<(), PluginError> {
        self.record(Hook::Dispose)
    }
}

impl Toggleable for Recorder {
    fn enable(&mut self) -> Result<(), PluginError> {
        self.record(Hook::Enable)
    }

    fn disable(&mut self) -> Result<(), PluginError> {
        self.record(Hook::Disable)
    }
}

impl Plugin for Recorder {
    fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
        Some(self)
    }

    fn as_invokable(&mut self) -> Option<&mut dyn Invokable> {
        Some(self)
    }

    fn as_loadable(&mut self) -> Option<&mut dyn Loadable> {
        Some(self)
    }

    fn as_savable(&mut self) -> Option<&mut dyn Savable> {
        Some(self)
    }

    fn as_disposable(&mut self) -> Option<&mut dyn Disposable> {
        Some(self)
    }

    fn as_toggleable(&mut self) -> Option<&mut dyn Toggleable> {
        if self.toggleable {
            Some(self)
        } else {
            None
        }
    }

    fn as_options(&mut self) -> Option<&mut dyn HasOptions> {
        Some(&mut self.options)
    }
}

/// A recorder declaration. The tag's name doubles as the journal label and
/// the type id suffix.
pub fn recorder(journal: &Journal, tag: DeclarationMetadata, faults: Faults) -> PluginDeclaration {
    let name = tag.name.clone().unwrap_or_else(|| "Anonymous".to_string());
    let toggleable = tag.kind == PluginKind::Module;
    let journal = journal.clone();
    let label = name.clone();
    PluginDeclaration::new(PluginTypeId::new(format!("tests::{}", name)), move || {
        Box::new(Recorder {
            name: label.clone(),
            journal: journal.clone(),
            faults: faults.clone(),
            toggleable,
            options: TypedOptions::default(),
        }) as Box<dyn Plugin>
    })
    .with_tag(tag)
}

pub fn service(journal: &Journal, name: &str, priority: i32) -> PluginDeclaration {
    recorder(
        journal,
        DeclarationMetadata::service().name(name).priority(priority),
        Faults::default(),
    )
}

pub fn module(journal: &Journal, name: &str, priority: i32, enabled: bool) -> PluginDeclaration {
    recorder(
        journal,
        DeclarationMetadata::module()
            .name(name)
            .priority(priority)
            .enabled(enabled),
        Faults::default(),
    )
}

/// An orchestrator over a single built-in catalog with in-memory storage.
pub fn host(declarations: Vec<PluginDeclaration>) -> Orchestrator {
    host_with(OrchestratorConfig::default(), declarations)
}

pub fn host_with(config: OrchestratorConfig, declarations: Vec<PluginDeclaration>) -> Orchestrator {
    let catalog = declarations
        .into_iter()
        .fold(Catalog::new("tests", "0.1.0"), Catalog::with);
    Orchestrator::builder(config)
        .store(Arc::new(MemoryStateStore::new()))
        .catalog(catalog)
        .build()
}
