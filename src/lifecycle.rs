//! Module lifecycle management.

use std::time::Instant;

/// The lifecycle interface every module instance implements.
///
/// The host calls these in the order `on_load`, `on_start`, `on_stop`,
/// `on_unload`, never skipping a step and never calling anything after
/// `on_unload`. Implementations may rely on that order.
pub trait Module: Send {
    /// Called once after the instance is created.
    fn on_load(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Called once after `on_load`.
    fn on_start(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Called once after `on_start`.
    fn on_stop(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Called once after `on_stop`, right before the instance is destroyed.
    fn on_unload(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// Module lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created but not loaded, or unloaded and awaiting destruction.
    Unloaded,
    /// `on_load` completed.
    Loaded,
    /// `on_start` completed; the module is active.
    Started,
    /// `on_stop` completed.
    Stopped,
}

impl LifecycleState {
    /// State reached by applying `transition`, if it is legal from here.
    pub fn after(&self, transition: LifecycleTransition) -> Option<LifecycleState> {
        match (self, transition) {
            (Self::Unloaded, LifecycleTransition::Load) => Some(Self::Loaded),
            (Self::Loaded, LifecycleTransition::Start) => Some(Self::Started),
            (Self::Started, LifecycleTransition::Stop) => Some(Self::Stopped),
            (Self::Stopped, LifecycleTransition::Unload) => Some(Self::Unloaded),
            _ => None,
        }
    }

    /// Check if the module can be loaded.
    pub fn can_load(&self) -> bool {
        self.after(LifecycleTransition::Load).is_some()
    }

    /// Check if the module can be started.
    pub fn can_start(&self) -> bool {
        self.after(LifecycleTransition::Start).is_some()
    }

    /// Check if the module can be stopped.
    pub fn can_stop(&self) -> bool {
        self.after(LifecycleTransition::Stop).is_some()
    }

    /// Check if the module can be unloaded.
    pub fn can_unload(&self) -> bool {
        self.after(LifecycleTransition::Unload).is_some()
    }

    /// Check if the module is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unloaded => "Module not loaded",
            Self::Loaded => "Module loaded and ready to start",
            Self::Started => "Module started",
            Self::Stopped => "Module stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Started => "started",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// A host-driven lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleTransition {
    /// `on_load`.
    Load,
    /// `on_start`.
    Start,
    /// `on_stop`.
    Stop,
    /// `on_unload`.
    Unload,
}

impl LifecycleTransition {
    /// Stage name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Unload => "unload",
        }
    }

    /// The state this step must start from.
    pub fn required_state(&self) -> LifecycleState {
        match self {
            Self::Load => LifecycleState::Unloaded,
            Self::Start => LifecycleState::Loaded,
            Self::Stop => LifecycleState::Started,
            Self::Unload => LifecycleState::Stopped,
        }
    }
}

/// Lifecycle event for hooks.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Instance was created through the ABI.
    Created {
        /// Module id.
        id: String,
        /// Creation time.
        at: Instant,
    },
    /// Module was loaded.
    Loaded {
        /// Module id.
        id: String,
        /// Load time.
        at: Instant,
    },
    /// Module was started.
    Started {
        /// Module id.
        id: String,
        /// Start time.
        at: Instant,
    },
    /// Module was stopped.
    Stopped {
        /// Module id.
        id: String,
        /// Stop time.
        at: Instant,
    },
    /// Module was unloaded.
    Unloaded {
        /// Module id.
        id: String,
        /// Unload time.
        at: Instant,
    },
    /// Instance was released through the ABI.
    Destroyed {
        /// Module id.
        id: String,
        /// Destruction time.
        at: Instant,
    },
    /// Module was replaced by a new instance.
    HotSwapped {
        /// Module id.
        id: String,
        /// Swap time.
        at: Instant,
        /// Generation after the swap.
        generation: u32,
    },
    /// Module reported an error.
    Error {
        /// Module id.
        id: String,
        /// Error message.
        message: String,
        /// Error time.
        at: Instant,
    },
}

impl LifecycleEvent {
    /// Get the module id.
    pub fn module_id(&self) -> &str {
        match self {
            Self::Created { id, .. } => id,
            Self::Loaded { id, .. } => id,
            Self::Started { id, .. } => id,
            Self::Stopped { id, .. } => id,
            Self::Unloaded { id, .. } => id,
            Self::Destroyed { id, .. } => id,
            Self::HotSwapped { id, .. } => id,
            Self::Error { id, .. } => id,
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::Created { at, .. } => *at,
            Self::Loaded { at, .. } => *at,
            Self::Started { at, .. } => *at,
            Self::Stopped { at, .. } => *at,
            Self::Unloaded { at, .. } => *at,
            Self::Destroyed { at, .. } => *at,
            Self::HotSwapped { at, .. } => *at,
            Self::Error { at, .. } => *at,
        }
    }

    /// Get the event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Loaded { .. } => "loaded",
            Self::Started { .. } => "started",
            Self::Stopped { .. } => "stopped",
            Self::Unloaded { .. } => "unloaded",
            Self::Destroyed { .. } => "destroyed",
            Self::HotSwapped { .. } => "hot-swapped",
            Self::Error { .. } => "error",
        }
    }
}

/// Hooks for lifecycle events.
pub struct LifecycleHooks {
    handlers: Vec<Box<dyn Fn(&LifecycleEvent) + Send + Sync>>,
}

impl LifecycleHooks {
    /// Create new lifecycle hooks.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a lifecycle event handler.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Emit a lifecycle event.
    pub fn emit(&self, event: LifecycleEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    /// Emit the event matching a completed transition.
    pub fn emit_transition(&self, id: &str, transition: LifecycleTransition) {
        let id = id.to_string();
        let at = Instant::now();
        self.emit(match transition {
            LifecycleTransition::Load => LifecycleEvent::Loaded { id, at },
            LifecycleTransition::Start => LifecycleEvent::Started { id, at },
            LifecycleTransition::Stop => LifecycleEvent::Stopped { id, at },
            LifecycleTransition::Unload => LifecycleEvent::Unloaded { id, at },
        });
    }

    /// Emit a created event.
    pub fn emit_created(&self, id: &str) {
        self.emit(LifecycleEvent::Created {
            id: id.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit a destroyed event.
    pub fn emit_destroyed(&self, id: &str) {
        self.emit(LifecycleEvent::Destroyed {
            id: id.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit a hot-swapped event.
    pub fn emit_hot_swapped(&self, id: &str, generation: u32) {
        self.emit(LifecycleEvent::HotSwapped {
            id: id.to_string(),
            at: Instant::now(),
            generation,
        });
    }

    /// Emit an error event.
    pub fn emit_error(&self, id: &str, message: &str) {
        self.emit(LifecycleEvent::Error {
            id: id.to_string(),
            message: message.to_string(),
            at: Instant::now(),
        });
    }
}

impl Default for LifecycleHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}
