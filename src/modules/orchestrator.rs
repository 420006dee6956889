//! Enregistrement des modules et bus d'événements
//!
//! Chaque module est une tâche nommée qui peut dépendre d'autres tâches.
//! Les modules sont enregistrés dans un ordre compatible avec leurs
//! dépendances ; c'est pendant leur enregistrement, et seulement là, qu'ils
//! abonnent des écouteurs aux événements du pipeline.

use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::context::RelocContext;
use crate::error::{RelocError, Result};

/// Événements du pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// La table DMA a été lue et l'image découpée en fichiers
    Parse,
    /// Les tables peuvent contribuer au dump JSON
    Dump,
    /// Avant la réallocation : réinternement des chaînes
    PackBeforeRealloc,
    /// Après la réallocation : réécriture des adresses
    PackAfterRealloc,
}

impl Event {
    pub const ALL: [Event; 4] = [
        Event::Parse,
        Event::Dump,
        Event::PackBeforeRealloc,
        Event::PackAfterRealloc,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Event::Parse => "parse",
            Event::Dump => "dump",
            Event::PackBeforeRealloc => "pack before realloc",
            Event::PackAfterRealloc => "pack after realloc",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Event::Parse => "After the DMA table has been parsed and the image split into files",
            Event::Dump => "When a JSON dump of the parsed tables was requested",
            Event::PackBeforeRealloc => "Before file offsets in VROM and ROM are reassigned",
            Event::PackAfterRealloc => "After file offsets in VROM and ROM were reassigned",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Écouteur d'événement
pub type Listener = fn(&mut RelocContext) -> Result<()>;

/// Fonction d'enregistrement d'un module
pub type RegisterFn = fn(&mut Orchestrator, &mut RelocContext) -> Result<()>;

/// Description d'un module
#[derive(Clone)]
pub struct ModuleInfo {
    pub task: &'static str,
    pub task_dependencies: &'static [&'static str],
    pub description: &'static str,
    pub register: RegisterFn,
}

impl fmt::Debug for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInfo")
            .field("task", &self.task)
            .field("task_dependencies", &self.task_dependencies)
            .finish()
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task)?;
        if !self.description.is_empty() {
            write!(f, " - {}", self.description)?;
        }
        if !self.task_dependencies.is_empty() {
            write!(f, " (depends on {})", self.task_dependencies.join(", "))?;
        }
        Ok(())
    }
}

/// Orchestrateur des modules
#[derive(Default)]
pub struct Orchestrator {
    modules: Vec<ModuleInfo>,
    listeners: HashMap<Event, Vec<(&'static str, Listener)>>,

    /// Tâche en cours d'enregistrement
    registering: Option<&'static str>,

    /// Tâches enregistrées, dans l'ordre
    registered: Vec<&'static str>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Déclare un événement ; il doit l'être avant tout abonnement
    pub fn declare_event(&mut self, event: Event) -> Result<()> {
        if self.listeners.contains_key(&event) {
            return Err(RelocError::config(format!(
                "event already declared: {}",
                event
            )));
        }
        self.listeners.insert(event, Vec::new());
        Ok(())
    }

    pub fn is_declared(&self, event: Event) -> bool {
        self.listeners.contains_key(&event)
    }

    /// Charge des modules ; deux modules ne peuvent pas porter la même tâche
    pub fn load_modules(&mut self, modules: impl IntoIterator<Item = ModuleInfo>) -> Result<()> {
        for module in modules {
            if self.modules.iter().any(|m| m.task == module.task) {
                return Err(RelocError::config(format!(
                    "duplicate module task {}",
                    module.task
                )));
            }
            debug!("Loaded module {}", module);
            self.modules.push(module);
        }
        Ok(())
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    pub fn registered_tasks(&self) -> &[&'static str] {
        &self.registered
    }

    /// Ordre d'enregistrement : à chaque étape, le premier module chargé
    /// dont toutes les dépendances sont déjà placées
    pub fn registration_order(&self) -> Result<Vec<usize>> {
        let tasks: HashSet<&str> = self.modules.iter().map(|m| m.task).collect();
        for module in &self.modules {
            if let Some(dependency) = module
                .task_dependencies
                .iter()
                .find(|d| !tasks.contains(*d))
            {
                return Err(RelocError::config(format!(
                    "task {} depends on unknown task {}",
                    module.task, dependency
                )));
            }
        }

        let mut order = Vec::with_capacity(self.modules.len());
        let mut placed: HashSet<&str> = HashSet::new();
        while order.len() < self.modules.len() {
            let next = self.modules.iter().enumerate().position(|(i, module)| {
                !order.contains(&i)
                    && module.task_dependencies.iter().all(|d| placed.contains(d))
            });

            match next {
                Some(i) => {
                    placed.insert(self.modules[i].task);
                    order.push(i);
                }
                None => {
                    let remaining: Vec<&str> = self
                        .modules
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !order.contains(i))
                        .map(|(_, m)| m.task)
                        .collect();
                    return Err(RelocError::config(format!(
                        "cannot resolve task dependencies for: {}",
                        remaining.join(", ")
                    )));
                }
            }
        }
        Ok(order)
    }

    /// Enregistre tous les modules chargés
    pub fn register_modules(&mut self, ctx: &mut RelocContext) -> Result<()> {
        let order = self.registration_order()?;
        for i in order {
            let module = self.modules[i].clone();
            debug!("Registering {}", module);

            self.registering = Some(module.task);
            let result = (module.register)(self, ctx);
            self.registering = None;
            result.map_err(|e| e.context(format!("registering task {}", module.task)))?;

            self.registered.push(module.task);
        }
        info!("Registered modules: {}", self.registered.join(", "));
        Ok(())
    }

    /// Abonne un écouteur ; seulement pendant l'enregistrement d'un module
    pub fn add_event_listener(&mut self, event: Event, listener: Listener) -> Result<()> {
        let task = self.registering.ok_or_else(|| {
            RelocError::config(format!(
                "listener for event {} added outside of module registration",
                event
            ))
        })?;
        let listeners = self
            .listeners
            .get_mut(&event)
            .ok_or_else(|| RelocError::config(format!("event not declared: {}", event)))?;
        listeners.push((task, listener));
        Ok(())
    }

    pub fn listener_count(&self, event: Event) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }

    /// Appelle les écouteurs dans l'ordre d'abonnement ; la première
    /// erreur interrompt les suivants
    pub fn raise_event(&self, event: Event, ctx: &mut RelocContext) -> Result<()> {
        let listeners = self
            .listeners
            .get(&event)
            .ok_or_else(|| RelocError::config(format!("event not declared: {}", event)))?;

        debug!("Raising event {} ({} listeners)", event, listeners.len());
        for (task, listener) in listeners {
            listener(ctx).map_err(|e| e.context(format!("event {}, task {}", event, task)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{DmaEntry, RevisionInfo, Rom, RomFile};

    fn context() -> RelocContext {
        let mut revision = RevisionInfo::oot_mq_debug();
        revision.dma_index_makerom = 0;
        revision.dma_index_boot = 0;
        revision.dma_index_dmadata = 0;
        revision.dma_index_code = 0;
        let files = vec![RomFile::new(vec![0; 0x10], DmaEntry::new(0, 0x10, 0, 0))];
        RelocContext::new(Rom::new(revision, files, 0x10, 0).unwrap())
    }

    fn noop(_: &mut Orchestrator, _: &mut RelocContext) -> Result<()> {
        Ok(())
    }

    fn module(task: &'static str, deps: &'static [&'static str]) -> ModuleInfo {
        ModuleInfo {
            task,
            task_dependencies: deps,
            description: "",
            register: noop,
        }
    }

    fn tasks(orchestrator: &Orchestrator, order: &[usize]) -> Vec<&'static str> {
        order.iter().map(|&i| orchestrator.modules()[i].task).collect()
    }

    #[test]
    fn test_dependency_order() -> Result<()> {
        for modules in [
            vec![module("C", &["B"]), module("B", &["A"]), module("A", &[])],
            vec![module("A", &[]), module("C", &["B"]), module("B", &["A"])],
            vec![module("B", &["A"]), module("A", &[]), module("C", &["B"])],
        ] {
            let mut orchestrator = Orchestrator::new();
            orchestrator.load_modules(modules)?;
            let order = orchestrator.registration_order()?;
            assert_eq!(tasks(&orchestrator, &order), vec!["A", "B", "C"]);
        }
        Ok(())
    }

    #[test]
    fn test_independent_tasks_keep_load_order() -> Result<()> {
        let mut orchestrator = Orchestrator::new();
        orchestrator.load_modules([module("x", &[]), module("y", &["z"]), module("z", &[])])?;
        let order = orchestrator.registration_order()?;
        assert_eq!(tasks(&orchestrator, &order), vec!["x", "z", "y"]);
        Ok(())
    }

    #[test]
    fn test_cycle_rejected() {
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .load_modules([module("A", &["B"]), module("B", &["A"]), module("C", &[])])
            .unwrap();
        let err = orchestrator.registration_order().unwrap_err();
        assert!(matches!(err, RelocError::Config(ref m) if m.contains("A, B")));
    }

    #[test]
    fn test_unknown_dependency_and_duplicate() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.load_modules([module("A", &["missing"])]).unwrap();
        assert!(matches!(orchestrator.registration_order(), Err(RelocError::Config(_))));

        let result = orchestrator.load_modules([module("A", &[])]);
        assert!(matches!(result, Err(RelocError::Config(_))));
    }

    fn mark(ctx: &mut RelocContext) -> Result<()> {
        let count = ctx.dump.len();
        ctx.dump_section(&format!("call {}", count), serde_json::Value::Null);
        Ok(())
    }

    fn fail(_: &mut RelocContext) -> Result<()> {
        Err(RelocError::format("test", "listener failure"))
    }

    fn register_mark(orchestrator: &mut Orchestrator, _: &mut RelocContext) -> Result<()> {
        orchestrator.add_event_listener(Event::Parse, mark)
    }

    fn register_fail(orchestrator: &mut Orchestrator, _: &mut RelocContext) -> Result<()> {
        orchestrator.add_event_listener(Event::Parse, fail)
    }

    #[test]
    fn test_listener_gate_and_raise() -> Result<()> {
        let mut ctx = context();
        let mut orchestrator = Orchestrator::new();
        orchestrator.declare_event(Event::Parse)?;
        assert!(orchestrator.declare_event(Event::Parse).is_err());

        // hors enregistrement
        assert!(matches!(
            orchestrator.add_event_listener(Event::Parse, mark),
            Err(RelocError::Config(_))
        ));

        orchestrator.load_modules([
            ModuleInfo {
                register: register_mark,
                ..module("first", &[])
            },
            ModuleInfo {
                register: register_fail,
                ..module("second", &["first"])
            },
            ModuleInfo {
                register: register_mark,
                ..module("third", &["second"])
            },
        ])?;
        orchestrator.register_modules(&mut ctx)?;
        assert_eq!(orchestrator.registered_tasks(), &["first", "second", "third"]);
        assert_eq!(orchestrator.listener_count(Event::Parse), 3);

        let err = orchestrator.raise_event(Event::Parse, &mut ctx).unwrap_err();
        assert!(err.to_string().starts_with("event parse, task second"));
        // le troisième écouteur n'a pas été appelé
        assert_eq!(ctx.dump.len(), 1);

        assert!(matches!(
            orchestrator.raise_event(Event::Dump, &mut ctx),
            Err(RelocError::Config(_))
        ));
        Ok(())
    }

    fn register_undeclared(orchestrator: &mut Orchestrator, _: &mut RelocContext) -> Result<()> {
        orchestrator.add_event_listener(Event::Dump, mark)
    }

    #[test]
    fn test_undeclared_event_fails_registration() {
        let mut ctx = context();
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .load_modules([ModuleInfo {
                register: register_undeclared,
                ..module("lonely", &[])
            }])
            .unwrap();
        let err = orchestrator.register_modules(&mut ctx).unwrap_err();
        assert!(matches!(err.root(), RelocError::Config(m) if m.contains("not declared")));
    }
}
